use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use oggvorbis::{Error, Reader, ReaderOptions};

use super::command::{AudioFormat, Cli, DecodeArgs};
use crate::input::{Input, open_input};
use crate::timestamp::time_str;
use crate::wav::WAVWriter;

/// Frames pulled from the reader per message.
const CHUNK_FRAMES: usize = 4096;

fn create_path_with_extension(base_path: &Path, expected_ext: &str) -> PathBuf {
    match base_path.extension() {
        Some(ext) if ext == expected_ext => base_path.to_path_buf(),
        Some(_) => {
            let mut name = base_path.as_os_str().to_owned();
            name.push(".");
            name.push(expected_ext);
            PathBuf::from(name)
        }
        None => base_path.with_extension(expected_ext),
    }
}

enum AudioWriter {
    Pcm(BufWriter<File>),
    Wav(WAVWriter<File>),
}

impl AudioWriter {
    fn create(base_path: &Path, format: AudioFormat, sample_rate: u32, channels: u32) -> Result<Self> {
        let writer = match format {
            AudioFormat::Wav => {
                let path = create_path_with_extension(base_path, "wav");
                log::info!("Creating audio file: {}", path.display());
                let mut wav_writer = WAVWriter::new(File::create(path)?, sample_rate, channels);
                wav_writer.write_header()?;
                AudioWriter::Wav(wav_writer)
            }
            AudioFormat::Pcm => {
                let path = create_path_with_extension(base_path, "pcm");
                log::info!("Creating audio file: {}", path.display());
                AudioWriter::Pcm(BufWriter::new(File::create(path)?))
            }
        };
        Ok(writer)
    }

    fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        match self {
            AudioWriter::Pcm(pcm_writer) => {
                for sample in samples {
                    pcm_writer.write_all(&sample.to_le_bytes())?;
                }
            }
            AudioWriter::Wav(wav_writer) => wav_writer.write_samples(samples)?,
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        match self {
            AudioWriter::Pcm(pcm_writer) => pcm_writer.flush()?,
            AudioWriter::Wav(wav_writer) => wav_writer.finish()?,
        }
        Ok(())
    }
}

/// Pulls interleaved chunks from `reader` until `frames` frames were sent or
/// the stream ended.
fn spawn_decoder_thread(
    mut reader: Reader<Input>,
    frames: Option<u64>,
    tx: mpsc::Sender<Result<Vec<f32>, Error>>,
) -> thread::JoinHandle<u64> {
    thread::spawn(move || {
        let channels = reader.format().channels as u64;
        let mut remaining = frames.map(|frames| frames.saturating_mul(channels));
        let mut sent = 0u64;

        loop {
            let want = match remaining {
                Some(0) => break,
                Some(left) => left.min((CHUNK_FRAMES as u64) * channels) as usize,
                None => CHUNK_FRAMES * channels as usize,
            };

            let mut buf = vec![0.0; want];
            match reader.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    sent += n as u64;
                    if let Some(left) = remaining.as_mut() {
                        *left -= n as u64;
                    }
                    if tx.send(Ok(buf)).is_err() {
                        break;
                    }
                }
                Err(Error::EndOfStream) => break,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }

        let frames_sent = sent / channels;
        log::info!(
            "Processing complete: {frames_sent} frames from {} pages",
            reader.pages_read()
        );
        if reader.bytes_skipped() > 0 {
            log::warn!(
                "Skipped {} bytes of invalid data while resynchronising",
                reader.bytes_skipped()
            );
        }
        frames_sent
    })
}

fn create_progress_bar(multi: &MultiProgress, total_frames: Option<u64>) -> Result<ProgressBar> {
    let pb = if let Some(total) = total_frames {
        let pb = multi.add(ProgressBar::new(total));
        pb.set_style(ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} frames ({percent}%)\n{msg} | elapsed: {elapsed_precise} | ETA: {eta_precise}",
        )?);
        pb
    } else {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template(
            "{spinner:.green} {pos} frames\n{msg} | elapsed: {elapsed_precise}",
        )?);
        pb
    };
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("initializing decoder");
    Ok(pb)
}

pub fn cmd_decode(args: &DecodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    macro_rules! pb_update {
        ($pb:expr, $method:ident($($args:expr),*)) => {
            if let Some(ref pb) = $pb {
                pb.$method($($args),*);
            }
        };
    }

    log::info!(
        "Decoding Ogg stream: {} (strict mode: {})",
        args.input.display(),
        cli.strict
    );

    let options = ReaderOptions {
        fail_level: cli.fail_level(),
        ..Default::default()
    };
    let mut reader = Reader::with_options(open_input(&args.input)?, options)?;
    let format = reader.format();
    log::info!(
        "{} channels, {} Hz, {} frames",
        format.channels,
        format.sample_rate,
        reader.length()
    );

    if args.start > 0 {
        log::info!("Starting at frame {}", args.start);
        reader.set_position(args.start)?;
    }

    // the length of a sequential input is unknown until it is decoded
    let available = (reader.length() > 0).then(|| reader.length().saturating_sub(args.start));
    let total_frames = match (args.frames, available) {
        (Some(frames), Some(available)) => Some(frames.min(available)),
        (frames, available) => frames.or(available),
    };

    let mut audio_writer = match &args.output_path {
        Some(base_path) => Some(AudioWriter::create(
            base_path,
            args.format,
            format.sample_rate,
            format.channels as u32,
        )?),
        None => {
            log::info!("No output path given, decoding without writing");
            None
        }
    };

    let pb = match multi {
        Some(multi) => Some(create_progress_bar(multi, total_frames)?),
        None => None,
    };

    let (tx, rx) = mpsc::channel();
    let decode_thread = spawn_decoder_thread(reader, args.frames, tx);

    let channels = format.channels as u64;
    let mut decoded_samples = 0u64;
    let mut chunks = 0u64;
    let start_time = std::time::Instant::now();

    while let Ok(result) = rx.recv() {
        let samples = match result {
            Ok(samples) => samples,
            Err(e) => {
                pb_update!(pb, finish_with_message("decode failed"));
                return Err(e.into());
            }
        };

        if let Some(ref mut writer) = audio_writer {
            writer.write_samples(&samples)?;
        }

        decoded_samples += samples.len() as u64;
        chunks += 1;

        let decoded_frames = decoded_samples / channels;
        pb_update!(pb, set_position(decoded_frames));

        if chunks.is_multiple_of(30) {
            let audio_duration_secs = format.duration_secs(decoded_frames);
            let realtime_multiplier = audio_duration_secs / start_time.elapsed().as_secs_f64();
            let time_str = time_str(args.start + decoded_frames, format.sample_rate);

            pb_update!(
                pb,
                set_message(format!(
                    "speed: {realtime_multiplier:.1}x | timestamp: {time_str}"
                ))
            );
        }
    }

    if let Some(ref mut writer) = audio_writer {
        writer.finish()?;
    }

    match decode_thread.join() {
        Ok(frames) => {
            let audio_duration_secs = format.duration_secs(frames);
            let realtime_multiplier = audio_duration_secs / start_time.elapsed().as_secs_f64();
            pb_update!(
                pb,
                finish_with_message(format!(
                    "speed: {realtime_multiplier:.1}x | timestamp: {}",
                    time_str(args.start + frames, format.sample_rate)
                ))
            );
            log::info!("Decoding completed successfully");
        }
        Err(_) => {
            pb_update!(pb, finish_with_message("decode thread panicked"));
            return Err(anyhow::anyhow!("Decode thread panicked"));
        }
    }

    Ok(())
}
