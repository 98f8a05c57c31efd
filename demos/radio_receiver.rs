use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lostik::config::{ChannelOptions, SerialConfig};
use lostik::{get_default_usb_serial, LoStik, Pin, ResponseToken, RxPacket};

/// Listen for raw LoRa packets and print them.
#[derive(Parser, Debug)]
struct Args {
    #[arg(default_value_t = get_default_usb_serial())]
    port: String,

    #[arg(long, default_value_t = 10)]
    power: i8,

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
    println!("{}", stick.version()?);
    stick.pause_mac()?;
    stick.set_radio_power(args.power)?;
    stick.set_pin(Pin::Gpio10, false)?;

    stick.radio_receive(0)?;
    loop {
        let reply = match stick.channel().next_reply(Duration::from_secs(60))? {
            Some(reply) => reply,
            None => continue,
        };
        match reply.token {
            ResponseToken::RadioRx(_) => {
                let packet = RxPacket::try_from(&reply.token)?;
                stick.set_pin(Pin::Gpio10, true)?;
                println!("{}", hex::encode_upper(&packet.data));
                thread::sleep(Duration::from_millis(100));
                stick.set_pin(Pin::Gpio10, false)?;
                stick.radio_receive(0)?;
            }
            // receive window closed without a packet
            ResponseToken::RadioError => stick.radio_receive(0)?,
            _ => {}
        }
    }
}
