use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use lostik::config::{ChannelOptions, SerialConfig};
use lostik::{get_default_usb_serial, LoStik, Pin};

/// Send a timestamp plus frame counter as raw LoRa packets.
#[derive(Parser, Debug)]
struct Args {
    #[arg(default_value_t = get_default_usb_serial())]
    port: String,

    #[arg(long, default_value_t = 10)]
    power: i8,

    /// Seconds between packets
    #[arg(short, long, default_value_t = 10)]
    interval: u64,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let mut stick = LoStik::open(&SerialConfig::new(&args.port), ChannelOptions::default())
        .with_context(|| format!("opening {}", args.port))?;
    stick.set_pin(Pin::Gpio11, false)?;
    info!("{}", stick.version()?);
    for param in ["mod", "freq", "sf"] {
        info!("radio {}: {}", param, stick.radio_get(param)?);
    }
    stick.pause_mac()?;
    stick.set_radio_power(args.power)?;

    let mut frame_count: u32 = 0;
    loop {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as u32;
        let mut payload = now.to_be_bytes().to_vec();
        payload.extend_from_slice(&frame_count.to_be_bytes());

        stick.set_pin(Pin::Gpio11, true)?;
        match stick.radio_transmit(&payload, Duration::from_secs(5)) {
            Ok(()) => info!("sent frame {}", frame_count),
            Err(e) if e.is_transport() => return Err(e.into()),
            Err(e) => warn!("frame {} failed: {}", frame_count, e),
        }
        stick.set_pin(Pin::Gpio11, false)?;
        frame_count = frame_count.wrapping_add(1);
        thread::sleep(Duration::from_secs(args.interval));
    }
}
