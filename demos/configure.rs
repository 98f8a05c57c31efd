use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lostik::config::DeviceConfig;
use lostik::{LoStik, Progress};

/// Apply the channel plan from a YAML file to a LoStik.
#[derive(Parser, Debug)]
struct Args {
    /// YAML file with `serial`, `options` and `channels`
    config: PathBuf,

    /// Override the serial port from the file
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

fn print_progress(p: Progress) {
    const WIDTH: usize = 50;
    let filled = if p.total == 0 { WIDTH } else { WIDTH * p.done / p.total };
    print!(
        "\rConfiguring channels |{}{}| {:.1}%",
        "#".repeat(filled),
        "-".repeat(WIDTH - filled),
        p.percent()
    );
    let _ = io::stdout().flush();
    if p.is_complete() {
        println!();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let mut config = DeviceConfig::from_path(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.serial.address = port;
    }

    let mut stick = LoStik::open(&config.serial, config.options)?;
    println!("{}", stick.version()?);
    let progress = stick.configure_channels(&mut config.channels, print_progress)?;
    println!("{} channels configured", progress.done);

    for ch in config.channels.iter() {
        if let (Some(desired), Some(observed)) = (ch.frequency, ch.observed_frequency) {
            if desired != observed {
                println!("  ch{}: {} -> {}", ch.id, observed, desired);
            }
        }
    }
    Ok(())
}
