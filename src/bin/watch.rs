//! Watches for a USB serial device and prints each decoded value line.
//!
//! RUST_LOG=debug cargo run --bin watch

use std::sync::Arc;

use serialwatch::{GrantAll, LogNotifier, MonitorConfig, SerialMonitor, UsbSerialTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let monitor = SerialMonitor::new(
        Arc::new(UsbSerialTransport::new()),
        Arc::new(GrantAll),
        Arc::new(LogNotifier),
        MonitorConfig::default(),
    );

    let mut latest = monitor.subscribe_latest();
    monitor.start_scanning().await?;
    log::info!("Scanning for USB serial devices...");

    loop {
        tokio::select! {
            changed = latest.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", *latest.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
