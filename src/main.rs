//! CLI driver: scan for boards, connect to the strongest candidate, and
//! stream decoded telemetry to the log until interrupted.

use anyhow::Result;
use boardlink::domain::models::{BoardEvent, MessageSeverity};
use boardlink::infrastructure::logging;
use boardlink::{BoardService, SettingsService};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = SettingsService::new()?;
    let _logging = logging::init_logger(&settings.get().log_settings)?;
    info!("Starting boardlink");

    let settings = Arc::new(Mutex::new(settings));
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                BoardEvent::DeviceFound(c) => {
                    info!("candidate: {} ({}) at {} dBm", c.name, c.id, c.signal_strength)
                }
                BoardEvent::StateChanged(state) => info!("state: {state:?}"),
                BoardEvent::Telemetry(t) => info!(
                    "battery {:.0}%  pitch {:+.2}  roll {:+.2}  {} rpm  {:.1} V  trip {:.2} km",
                    t.battery_percent, t.pitch, t.roll, t.rpm, t.voltage, t.trip_odometer_km
                ),
                BoardEvent::Status(m) => match m.severity {
                    MessageSeverity::Warning => warn!("{}", m.message),
                    MessageSeverity::Error => error!("{}", m.message),
                    _ => info!("{}", m.message),
                },
                BoardEvent::Fault(e) => error!("fault: {e}"),
            }
        }
    });

    let mut service = BoardService::new(event_tx, settings);

    let candidates = service.scan().await?;
    let Some(best) = candidates.iter().max_by_key(|c| c.signal_strength) else {
        warn!("no boards found");
        return Ok(());
    };
    info!("connecting to {} ({} dBm)", best.name, best.signal_strength);
    service.connect(&best.id).await?;

    info!("press Ctrl-C to disconnect");
    tokio::signal::ctrl_c().await?;
    service.disconnect().await;
    printer.abort();
    Ok(())
}
