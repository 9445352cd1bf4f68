//! boardlink — connection and authentication engine for Onewheel-family
//! boards.
//!
//! Discovers boards over BLE, unlocks their reverse-engineered firmware
//! protocol (classic CRX challenge-response plus the GT-generation
//! fallback strategies), decodes the binary telemetry stream, and keeps
//! the session alive with heartbeat and watchdog timers. Consumers drive
//! [`BoardService`] and listen on its event channel.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{
    BoardError, BoardEvent, BoardModel, ConnectionState, DeviceCandidate, Diagnostics,
    TelemetrySnapshot,
};
pub use domain::settings::{Settings, SettingsService};
pub use infrastructure::bluetooth::session::BoardSession;
pub use infrastructure::bluetooth::BoardService;
