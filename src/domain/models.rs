//! Core domain types shared across the engine.

use thiserror::Error;
use uuid::Uuid;

/// Connection lifecycle of the single active board session.
///
/// Transitions are monotonic within one attempt and only the session
/// state machine mutates the value, through its one transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Error,
}

/// A board-shaped advertisement that survived the device filter.
///
/// Candidates are ephemeral: each scan batch replaces the previous one,
/// keyed by `id`.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    /// Platform BLE identifier (UUID string on macOS/Windows, MAC on Linux).
    pub id: String,
    pub name: String,
    pub signal_strength: i16,
    pub service_uuids: Vec<Uuid>,
}

/// Board generation, derived from the advertised name and the firmware
/// revision string. Each model owns an ordered unlock-strategy list, so a
/// new generation is added by defining a new list rather than another
/// conditional chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardModel {
    Xr,
    Pint,
    Gt,
    GtS,
    Unknown,
}

impl BoardModel {
    /// Substring match over the advertised name and the firmware revision,
    /// most specific marker first.
    pub fn detect(name: &str, firmware: &str) -> Self {
        let haystack = format!("{} {}", name.to_lowercase(), firmware.to_lowercase());
        if haystack.contains("gt-s") || haystack.contains("gts") {
            Self::GtS
        } else if haystack.contains("gt") {
            Self::Gt
        } else if haystack.contains("pint") {
            Self::Pint
        } else if haystack.contains("xr") {
            Self::Xr
        } else {
            Self::Unknown
        }
    }

    /// GT-generation boards need longer timeouts and the fallback unlock
    /// strategies; everything else speaks the classic protocol.
    pub fn is_newer_variant(&self) -> bool {
        matches!(self, Self::Gt | Self::GtS)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Xr => "XR",
            Self::Pint => "Pint",
            Self::Gt => "GT",
            Self::GtS => "GT-S",
            Self::Unknown => "Unknown",
        }
    }
}

/// Latest decoded telemetry. One shared instance per session, updated
/// field-by-field as notifications arrive; readers may observe a partially
/// updated snapshot, which is acceptable for advisory telemetry.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub battery_percent: f32,
    /// Degrees.
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
    pub rpm: u16,
    /// Degrees Celsius.
    pub motor_temperature: f32,
    /// Amps.
    pub current: f32,
    /// Volts.
    pub voltage: f32,
    /// Kilometers.
    pub trip_odometer_km: f32,
    pub lifetime_odometer_km: f32,
    pub ride_mode: u16,
    /// Unix milliseconds of the last applied update.
    pub timestamp: i64,
}

/// Session and protocol failure taxonomy. Every escalated failure forces
/// the state machine to `Error` and a full teardown, surfaced on the event
/// channel as the error itself (kind + message).
#[derive(Debug, Clone, Error)]
pub enum BoardError {
    #[error("scan failed: {0}")]
    ScanFailure(String),
    #[error("connect failed after {attempts} attempts: {reason}")]
    ConnectFailure { attempts: u32, reason: String },
    #[error("primary board service not found")]
    ServiceNotFound,
    #[error("required characteristics missing")]
    CharacteristicsMissing,
    #[error("challenge timed out with no data")]
    ChallengeTimeout,
    #[error("challenge did not carry the CRX signature")]
    InvalidChallengeSignature,
    #[error("all unlock strategies exhausted")]
    AllStrategiesExhausted,
    #[error("heartbeat write failed")]
    HeartbeatFailure,
    #[error("watchdog detected link loss")]
    WatchdogDisconnect,
    #[error("link error: {0}")]
    Link(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

/// Events published by the engine on its single outbound channel.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    DeviceFound(DeviceCandidate),
    StateChanged(ConnectionState),
    Telemetry(TelemetrySnapshot),
    Status(StatusMessage),
    Fault(BoardError),
}

/// Point-in-time view of the session internals for external tooling.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub state: ConnectionState,
    pub model: Option<BoardModel>,
    pub characteristic_count: usize,
    pub subscription_count: usize,
    pub heartbeat_alive: bool,
    pub watchdog_alive: bool,
    pub keepalive_alive: bool,
    /// Unlock strategies attempted this session, in order, with outcome.
    pub strategy_attempts: Vec<String>,
    pub last_error: Option<BoardError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_detection_prefers_specific_markers() {
        assert_eq!(BoardModel::detect("Onewheel GT-S", ""), BoardModel::GtS);
        assert_eq!(BoardModel::detect("ow123456", "gts4210"), BoardModel::GtS);
        assert_eq!(BoardModel::detect("Onewheel GT", ""), BoardModel::Gt);
        assert_eq!(BoardModel::detect("Onewheel Pint", ""), BoardModel::Pint);
        assert_eq!(BoardModel::detect("ow059301", "4134"), BoardModel::Unknown);
        assert_eq!(BoardModel::detect("Onewheel XR", ""), BoardModel::Xr);
    }

    #[test]
    fn newer_variant_covers_gt_family_only() {
        assert!(BoardModel::Gt.is_newer_variant());
        assert!(BoardModel::GtS.is_newer_variant());
        assert!(!BoardModel::Pint.is_newer_variant());
        assert!(!BoardModel::Unknown.is_newer_variant());
    }
}
