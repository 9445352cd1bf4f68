//! Bluetooth Service Module
//!
//! Main service coordinating scanning, connection, and the unlocked
//! session for a board over the real BLE stack.

use crate::domain::models::{
    BoardError, BoardEvent, ConnectionState, DeviceCandidate, Diagnostics, TelemetrySnapshot,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::scanner::BoardScanner;
use crate::infrastructure::bluetooth::session::BoardSession;
use crate::infrastructure::bluetooth::transport::BleTransport;
use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Facade over the scanner and the session engine. Holds the candidate
/// list from the latest scan batch so callers can pick a board by id.
pub struct BoardService {
    session: BoardSession<BleTransport>,
    scanner: BoardScanner,
    settings: Arc<Mutex<SettingsService>>,
    candidates: Vec<DeviceCandidate>,
    events: mpsc::UnboundedSender<BoardEvent>,
}

impl BoardService {
    pub fn new(
        event_sender: mpsc::UnboundedSender<BoardEvent>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> Self {
        Self {
            session: BoardSession::new(event_sender.clone()),
            scanner: BoardScanner::new(event_sender.clone()),
            settings,
            candidates: Vec::new(),
            events: event_sender,
        }
    }

    /// Run one scan batch. Each batch replaces the previous candidate
    /// list; candidates are also published as `DeviceFound` events.
    pub async fn scan(&mut self) -> Result<Vec<DeviceCandidate>> {
        let (duration, show_all) = {
            let settings = self
                .settings
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock error"))?;
            let s = settings.get();
            (
                Duration::from_secs(s.scan_seconds),
                s.debug_show_all_devices,
            )
        };

        if !self.session.begin_scan() {
            anyhow::bail!("cannot scan while a session is active");
        }
        let result = self.scanner.scan(duration, show_all).await;
        self.session.finish_scan();

        match result {
            Ok(candidates) => {
                self.candidates = candidates.clone();
                Ok(candidates)
            }
            Err(e) => {
                let _ = self
                    .events
                    .send(BoardEvent::Fault(BoardError::ScanFailure(e.to_string())));
                Err(e)
            }
        }
    }

    /// Connect to a candidate from the latest scan batch.
    pub async fn connect(&mut self, candidate_id: &str) -> Result<()> {
        let candidate = self
            .candidates
            .iter()
            .find(|c| c.id == candidate_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown candidate {candidate_id}"))?;
        let peripheral = self
            .scanner
            .peripheral(candidate_id)
            .ok_or_else(|| anyhow::anyhow!("candidate {candidate_id} is gone; rescan"))?;

        self.session
            .connect(BleTransport::new(peripheral), &candidate.name)
            .await?;

        info!("remembering board {}", candidate.id);
        let mut settings = self
            .settings
            .lock()
            .map_err(|_| anyhow::anyhow!("Lock error"))?;
        settings.record_connected_board(&candidate.id)?;
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.session.telemetry()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.session.diagnostics()
    }
}
