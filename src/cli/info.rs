use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use oggvorbis::{Error, Reader, ReaderOptions};
use serde::Serialize;

use super::command::{Cli, InfoArgs, OutputFormat};
use crate::input::{Input, is_pipe, open_input};
use crate::timestamp::time_str;

#[derive(Debug, Serialize)]
struct StreamInfo {
    channels: u8,
    sample_rate: u32,
    bitrate_nominal: Option<i32>,
    bitrate_minimum: Option<i32>,
    bitrate_maximum: Option<i32>,
    blocksize_short: u16,
    blocksize_long: u16,
    length: u64,
    duration: String,
    pages_read: u64,
    bytes_skipped: u64,
    vendor: String,
    comments: Vec<String>,
}

impl StreamInfo {
    fn from_reader(reader: &Reader<Input>) -> Self {
        let format = reader.format();
        // zero and negative bitrates mean "not set"
        let bitrate = |value: i32| (value > 0).then_some(value);

        Self {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bitrate_nominal: bitrate(format.bitrate_nominal),
            bitrate_minimum: bitrate(format.bitrate_minimum),
            bitrate_maximum: bitrate(format.bitrate_maximum),
            blocksize_short: format.blocksize_0,
            blocksize_long: format.blocksize_1,
            length: reader.length(),
            duration: time_str(reader.length(), format.sample_rate),
            pages_read: reader.pages_read(),
            bytes_skipped: reader.bytes_skipped(),
            vendor: reader.comments().vendor.clone(),
            comments: reader.comments().comments.clone(),
        }
    }
}

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing Ogg stream: {}", args.input.display());

    let options = ReaderOptions {
        fail_level: cli.fail_level(),
        ..Default::default()
    };
    let mut reader = Reader::with_options(open_input(&args.input)?, options)?;

    if is_pipe(&args.input) {
        count_frames(&mut reader, multi)?;
    }

    let info = StreamInfo::from_reader(&reader);
    match args.output_format {
        OutputFormat::Text => display_stream_info(&info),
        OutputFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&info)?),
    }

    Ok(())
}

/// Decodes a sequential input to its end so that its length becomes known.
fn count_frames(reader: &mut Reader<Input>, multi: Option<&MultiProgress>) -> Result<()> {
    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Counting frames...");
            Some(pb)
        }
        None => None,
    };

    let channels = reader.format().channels as usize;
    let mut buf = vec![0.0; 4096 * channels];
    let mut calls = 0u64;

    let result = loop {
        match reader.read(&mut buf) {
            Ok(_) => {}
            Err(Error::EndOfStream) => break Ok(()),
            Err(e) => break Err(e),
        }

        calls += 1;
        if calls.is_multiple_of(100) {
            if let Some(ref pb) = pb {
                pb.set_message(format!("Counting frames...       {}", reader.position()));
            }
        }
    };

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(result?)
}

fn display_stream_info(info: &StreamInfo) {
    let kbps = |value: Option<i32>| match value {
        Some(bps) => format!("{:.1} kbps", bps as f64 / 1000.0),
        None => "not set".to_string(),
    };

    println!();
    println!("Ogg Vorbis Stream Information");
    println!("=============================");
    println!();

    println!("Stream Information");
    println!("  Channels                  {}", info.channels);
    println!("  Sampling rate             {} Hz", info.sample_rate);
    println!("  Nominal bitrate           {}", kbps(info.bitrate_nominal));
    println!("  Minimum bitrate           {}", kbps(info.bitrate_minimum));
    println!("  Maximum bitrate           {}", kbps(info.bitrate_maximum));
    println!(
        "  Block sizes               {} / {}",
        info.blocksize_short, info.blocksize_long
    );
    println!("  Length                    {} frames", info.length);
    println!("  Duration                  {}", info.duration);
    println!();

    println!("Container");
    println!("  Pages read                {}", info.pages_read);
    println!("  Bytes skipped             {}", info.bytes_skipped);
    println!();

    println!("Comments");
    println!("  Vendor                    {}", info.vendor);
    for comment in &info.comments {
        match comment.split_once('=') {
            Some((key, value)) => println!("  {key:26}{value}"),
            None => println!("  {comment}"),
        }
    }
    println!();
}
