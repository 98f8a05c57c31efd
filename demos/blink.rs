use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lostik::config::{ChannelOptions, SerialConfig};
use lostik::{get_default_usb_serial, LoStik, Pin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Leds {
    Red,
    Blue,
    Both,
}

/// Blink the LEDs of a LoStik.
#[derive(Parser, Debug)]
struct Args {
    /// Serial port of the stick
    #[arg(default_value_t = get_default_usb_serial())]
    port: String,

    #[arg(short, long, value_enum, default_value = "both")]
    mode: Leds,

    /// Delay between toggles in seconds
    #[arg(short, long, default_value_t = 0.5)]
    delay: f32,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut stick = LoStik::open(&SerialConfig::new(&args.port), ChannelOptions::default())
        .with_context(|| format!("opening {}", args.port))?;
    println!("{}", stick.version()?);

    let delay = Duration::from_secs_f32(args.delay);
    let blue = args.mode != Leds::Red;
    let red = args.mode != Leds::Blue;
    // the red LED is wired active low
    let mut on = true;
    loop {
        if blue {
            stick.set_pin(Pin::Gpio10, on)?;
            thread::sleep(delay);
        }
        if red {
            stick.set_pin(Pin::Gpio11, !on)?;
            thread::sleep(delay);
        }
        on = !on;
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
