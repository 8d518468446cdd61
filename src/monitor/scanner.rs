use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::session::MonitorInner;

/// Handle for a running scan task.
pub(crate) struct ScanSession {
    pub(crate) stop_tx: mpsc::Sender<()>,
    pub(crate) task: JoinHandle<()>,
}

/// Device acquisition loop: query the transport once per tick until a
/// device shows up or a stop signal arrives.
///
/// Enumeration errors and empty results both keep the loop going; there is
/// no backoff and no retry cap. Queries never overlap: the next tick is
/// only awaited after the previous query returns.
pub(crate) async fn scan_loop(inner: Arc<MonitorInner>, mut stop_rx: mpsc::Receiver<()>) {
    let period = inner.scan_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                log::info!("Device scanning stopped");
                return;
            }
            _ = ticker.tick() => {
                let found = match inner.transport().list().await {
                    Ok(mut devices) => {
                        if devices.is_empty() {
                            log::info!("No USB devices found, retrying");
                            None
                        } else {
                            if devices.len() > 1 {
                                log::warn!(
                                    "{} devices visible, selecting the first positionally",
                                    devices.len()
                                );
                            }
                            Some(devices.remove(0))
                        }
                    }
                    Err(e) => {
                        log::error!("Error scanning for devices: {}", e);
                        None
                    }
                };

                if let Some(device) = found {
                    log::info!("Found device {}, stopping scan", device.device_id);
                    // The timer dies with this task, before the connect
                    // sequence starts; no further enumeration until the
                    // connection is confirmed closed.
                    inner.clear_scan_slot().await;
                    MonitorInner::connect_acquired(&inner, device).await;
                    return;
                }
            }
        }
    }
}
