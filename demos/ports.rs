use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use lostik::config::{ChannelOptions, SerialConfig};
use lostik::{dump_all_serial_ports, find_lostik_ports, LoStik};

/// List serial ports and identify attached LoStik sticks.
#[derive(Parser, Debug)]
struct Args {
    /// Also query each stick for version, EUI and supply voltage
    #[arg(short, long)]
    identify: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dump_all_serial_ports()?;
    if !args.identify {
        return Ok(());
    }

    for port in find_lostik_ports()? {
        // short reads so closing each stick after the queries is quick
        let serial = SerialConfig::new(&port).with_read_timeout(Duration::from_millis(250));
        let mut stick = match LoStik::open(&serial, ChannelOptions::default()) {
            Ok(stick) => stick,
            Err(e) => {
                println!("{}: {}", port, e);
                continue;
            }
        };
        println!("{}:", port);
        println!("  version: {}", stick.version()?);
        println!("  hweui:   {}", stick.hardware_eui()?);
        println!("  vdd:     {} mV", stick.vdd()?);
    }
    Ok(())
}
