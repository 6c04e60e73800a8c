use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Arg, Command};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::{panic, process};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use trtp_rx::config::{ReceiverConfig, app_name, version};
use trtp_rx::decoder::ProbeDecoderFactory;
use trtp_rx::output::LoggingSinkFactory;
use trtp_rx::pipeline::receiver::ReceiverCoordinator;
use trtp_rx::pipeline::{CommonClock, LocalCommonClock};

const MAX_DATAGRAM: usize = 65_536;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDR")
                .help("UDP address to receive TRTP on.")
                .default_value("0.0.0.0:5004"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON receiver configuration.")
                .required(false),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let config = ReceiverConfig::load(config_path.as_deref())?;
    let bind = matches
        .get_one::<String>("bind")
        .map(String::as_str)
        .unwrap_or("0.0.0.0:5004");

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let shutdown = Arc::new(Notify::new());
    let notify = Arc::clone(&shutdown);
    ctrlc::set_handler(move || notify.notify_one()).context("Error setting Ctrl-C handler")?;

    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!("{} {} listening on {}", app_name(), version(), socket.local_addr()?);

    let clock: Arc<dyn CommonClock> = Arc::new(LocalCommonClock::new());
    let mut coordinator = ReceiverCoordinator::new(config);
    let datagram_tx = coordinator.launch_pipeline(
        Arc::new(ProbeDecoderFactory),
        Arc::new(LoggingSinkFactory::new(Arc::clone(&clock))),
        clock,
    )?;

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("Shutdown requested");
                break;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, _)) => {
                    if datagram_tx.send(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                        warn!("Receive stage closed its input");
                        break;
                    }
                }
                Err(e) => error!("Socket receive failed: {}", e),
            },
        }
    }

    drop(datagram_tx);
    coordinator.stop().await
}
