use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::command::{Cli, Commands, LogFormat};
use cli::decode::cmd_decode;
use cli::info::cmd_info;

mod cli;
mod input;
pub(crate) mod timestamp;
mod wav;

/// Installs the logger, routing records through `multi` when progress bars are shown.
fn init_logger(cli: &Cli, multi: &MultiProgress) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(cli.loglevel.to_level_filter());

    if let LogFormat::Json = cli.log_format {
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{{\"ts\":\"{}\",\"lvl\":\"{}\",\"target\":\"{}\",\"msg\":{:?}}}",
                buf.timestamp(),
                record.level(),
                record.target(),
                record.args().to_string()
            )
        });
    } else {
        builder.format_timestamp_secs();
    }

    if cli.progress {
        LogWrapper::new(multi.clone(), builder.build()).try_init()?;
    } else {
        builder.try_init()?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let multi = MultiProgress::new();
    init_logger(&cli, &multi)?;
    let pb = cli.progress.then_some(&multi);

    log::debug!(
        "{} {} (oggvorbis {}, strict: {}) built {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("OGGVORBIS_VERSION"),
        cli.strict,
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Commands::Decode(ref args) => cmd_decode(args, &cli, pb)?,
        Commands::Info(ref args) => cmd_info(args, &cli, pb)?,
    }

    Ok(())
}
