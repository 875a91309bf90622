/// Formats a frame count as `HH:MM:SS.mmm`.
pub fn time_str(frames: u64, sample_rate: u32) -> String {
    let ms = if sample_rate == 0 {
        0
    } else {
        (frames as u128 * 1000 / sample_rate as u128) as u64
    };

    let hours = ms / 3_600_000;
    let minutes = ms / 60_000 % 60;
    let seconds = ms / 1000 % 60;
    let milliseconds = ms % 1000;

    format!(
        "{hours:0width$}:{minutes:02}:{seconds:02}.{milliseconds:03}",
        width = if hours >= 100 { 0 } else { 2 }
    )
}

#[test]
fn test_time_str() {
    assert_eq!(time_str(0, 44100), "00:00:00.000");
    assert_eq!(time_str(44100, 44100), "00:00:01.000");
    assert_eq!(time_str(72_384, 44100), "00:00:01.641");
    assert_eq!(time_str(48_000 * 3725 + 24_000, 48_000), "01:02:05.500");
    assert_eq!(time_str(100, 0), "00:00:00.000");
}
