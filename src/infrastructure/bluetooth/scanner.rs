//! BLE Scanner Module
//!
//! Device discovery and the board advertisement filter.

use crate::domain::models::{BoardEvent, DeviceCandidate, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::protocol;
use anyhow::Result;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// One advertisement as seen by the scanner, before filtering.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub rssi: Option<i16>,
    pub service_uuids: Vec<uuid::Uuid>,
}

/// Board-candidate predicate, re-applied per scan batch.
///
/// Accept when the advertisement is strong enough and either the name
/// carries a known board fragment, or the address prefix belongs to a known
/// manufacturer and the primary board service is advertised. Advertisements
/// without a signal-strength reading are kept; the floor only rejects
/// readings it can actually compare.
pub fn is_board_candidate(adv: &Advertisement) -> bool {
    if let Some(rssi) = adv.rssi {
        if rssi < protocol::RSSI_FLOOR_DBM {
            return false;
        }
    }

    if let Some(name) = &adv.name {
        let lowered = name.to_lowercase();
        if protocol::BOARD_NAME_FRAGMENTS
            .iter()
            .any(|fragment| lowered.contains(fragment))
        {
            return true;
        }
    }

    let prefix_match = adv.address.as_deref().is_some_and(|addr| {
        let lowered = addr.to_lowercase();
        protocol::BOARD_ADDRESS_PREFIXES
            .iter()
            .any(|prefix| lowered.starts_with(prefix))
    });
    prefix_match
        && adv
            .service_uuids
            .contains(&protocol::PRIMARY_SERVICE_UUID)
}

/// Scans for boards and keeps the peripherals behind the candidates it
/// reports, so a candidate can later be opened for connection.
pub struct BoardScanner {
    event_sender: mpsc::UnboundedSender<BoardEvent>,
    adapter: Option<Adapter>,
    discovered: HashMap<String, Peripheral>,
}

impl BoardScanner {
    pub fn new(event_sender: mpsc::UnboundedSender<BoardEvent>) -> Self {
        Self {
            event_sender,
            adapter: None,
            discovered: HashMap::new(),
        }
    }

    async fn adapter(&mut self) -> Result<&Adapter> {
        if self.adapter.is_none() {
            let manager = Manager::new().await?;
            let adapter = manager
                .adapters()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapter found"))?;
            self.adapter = Some(adapter);
        }
        Ok(self.adapter.as_ref().unwrap())
    }

    /// Run one scan batch and return the candidate list, keyed by platform
    /// identifier. The previous batch is discarded.
    pub async fn scan(&mut self, duration: Duration, show_all: bool) -> Result<Vec<DeviceCandidate>> {
        self.send_status("Scanning for boards...", MessageSeverity::Info);
        let adapter = self.adapter().await?.clone();

        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(duration).await;
        // Collect peripherals before stopping the scan; some platforms drop
        // advertisement data once scanning ends.
        let peripherals = adapter.peripherals().await?;
        adapter.stop_scan().await?;

        self.discovered.clear();
        let mut candidates = Vec::new();

        for peripheral in peripherals {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let adv = Advertisement {
                id: peripheral.id().to_string(),
                name: props.local_name.clone(),
                address: Some(props.address.to_string()),
                rssi: props.rssi,
                service_uuids: props.services.clone(),
            };

            if !show_all && !is_board_candidate(&adv) {
                debug!(id = %adv.id, name = ?adv.name, "rejected advertisement");
                continue;
            }

            let candidate = DeviceCandidate {
                id: adv.id.clone(),
                name: adv.name.unwrap_or_else(|| "Unknown".to_string()),
                signal_strength: adv.rssi.unwrap_or(0),
                service_uuids: adv.service_uuids,
            };
            info!(
                "found board candidate {} ({}) at {} dBm",
                candidate.name, candidate.id, candidate.signal_strength
            );
            self.discovered.insert(candidate.id.clone(), peripheral);
            let _ = self
                .event_sender
                .send(BoardEvent::DeviceFound(candidate.clone()));
            candidates.push(candidate);
        }

        self.send_status(
            &format!("Scan complete: {} candidate(s)", candidates.len()),
            MessageSeverity::Info,
        );
        Ok(candidates)
    }

    /// Peripheral behind a candidate from the latest batch.
    pub fn peripheral(&self, candidate_id: &str) -> Option<Peripheral> {
        self.discovered.get(candidate_id).cloned()
    }

    fn send_status(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(BoardEvent::Status(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}
