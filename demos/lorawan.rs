use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use lostik::command::Uplink;
use lostik::config::{
    AbpCredentials, ChannelOptions, JoinConfig, JoinMode, OtaaCredentials, SerialConfig,
};
use lostik::{get_default_usb_serial, LoStik};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Activation {
    Otaa,
    Abp,
}

/// Join a LoRaWAN network and send the current time every few seconds.
#[derive(Parser, Debug)]
struct Args {
    #[arg(default_value_t = get_default_usb_serial())]
    port: String,

    #[arg(short, long, value_enum, default_value = "otaa")]
    joinmode: Activation,

    #[arg(long, default_value = "")]
    appeui: String,
    #[arg(long, default_value = "")]
    appkey: String,
    #[arg(long, default_value = "")]
    deveui: String,

    #[arg(long, default_value = "")]
    devaddr: String,
    #[arg(long, default_value = "")]
    appskey: String,
    #[arg(long, default_value = "")]
    nwkskey: String,

    #[arg(long, default_value_t = 10)]
    retries: u32,

    /// Seconds between uplinks
    #[arg(short, long, default_value_t = 10)]
    interval: u64,

    /// Application port for uplinks
    #[arg(long, default_value_t = 1)]
    fport: u8,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn join_config(&self) -> JoinConfig {
        let mode = match self.joinmode {
            Activation::Otaa => JoinMode::Otaa(OtaaCredentials {
                app_eui: self.appeui.clone(),
                app_key: self.appkey.clone(),
                dev_eui: self.deveui.clone(),
            }),
            Activation::Abp => JoinMode::Abp(AbpCredentials {
                dev_addr: self.devaddr.clone(),
                app_session_key: self.appskey.clone(),
                network_session_key: self.nwkskey.clone(),
            }),
        };
        JoinConfig::new(mode).with_max_retries(self.retries)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut stick = LoStik::open(&SerialConfig::new(&args.port), ChannelOptions::default())
        .with_context(|| format!("opening {}", args.port))?;
    info!("connected to {}", stick.version()?);

    let mut session = stick.join_session(args.join_config())?;
    session.run().context("joining network")?;
    info!("joined after {} attempts", session.attempts_issued());

    loop {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as u32;
        if let Err(e) = session.transmit(Uplink::Unconfirmed, args.fport, &now.to_be_bytes()) {
            if e.is_transport() {
                return Err(e.into());
            }
            warn!("uplink failed: {}", e);
        }
        // replies to earlier uplinks (mac_tx_ok, mac_rx, mac_err) are only shown
        while let Some(reply) = session.poll(Duration::from_millis(100))? {
            info!("<< {}", reply.line);
        }
        thread::sleep(Duration::from_secs(args.interval));
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
