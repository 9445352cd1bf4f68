//! BLE Connection Module
//!
//! Bounded-retry connection establishment, service discovery, and the
//! per-connection characteristic registry.

use crate::domain::models::{BoardError, BoardEvent, BoardModel, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::protocol::{self, CharacteristicLayout};
use crate::infrastructure::bluetooth::transport::{BoardTransport, CharacteristicInfo, ServiceInfo};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Connect retry behavior. GT-generation boards take noticeably longer to
/// accept a connection after waking, hence the larger budget.
#[derive(Debug, Clone)]
pub struct ConnectRetryPolicy {
    pub attempts: u32,
    /// Base delay; grows linearly with the attempt number.
    pub backoff: Duration,
    pub attempt_timeout: Duration,
}

impl ConnectRetryPolicy {
    pub fn for_model(model: BoardModel) -> Self {
        if model.is_newer_variant() {
            Self {
                attempts: 5,
                backoff: Duration::from_millis(800),
                attempt_timeout: Duration::from_secs(20),
            }
        } else {
            Self {
                attempts: 3,
                backoff: Duration::from_millis(500),
                attempt_timeout: Duration::from_secs(10),
            }
        }
    }
}

/// Characteristics of the primary board service, keyed by lower-cased
/// identifier. Populated once per connection after discovery, cleared on
/// disconnect.
#[derive(Debug, Default)]
pub struct CharacteristicRegistry {
    by_uuid: HashMap<String, CharacteristicInfo>,
    layout: Option<CharacteristicLayout>,
}

impl CharacteristicRegistry {
    pub fn from_services(services: &[ServiceInfo]) -> Result<Self, BoardError> {
        let primary = services
            .iter()
            .find(|s| s.uuid == protocol::PRIMARY_SERVICE_UUID)
            .ok_or(BoardError::ServiceNotFound)?;
        if primary.characteristics.is_empty() {
            return Err(BoardError::CharacteristicsMissing);
        }

        let mut by_uuid = HashMap::new();
        for characteristic in &primary.characteristics {
            by_uuid.insert(Self::key(characteristic.uuid), characteristic.clone());
        }

        // The extended layout is the only one carrying the 0xf3ff write
        // channel; its presence pins the layout for the connection.
        let extended_write = Self::key(CharacteristicLayout::Extended.write_channel());
        let layout = if by_uuid.contains_key(&extended_write) {
            CharacteristicLayout::Extended
        } else {
            CharacteristicLayout::Legacy
        };

        info!(
            "registry populated: {} characteristics, {:?} layout",
            by_uuid.len(),
            layout
        );
        Ok(Self {
            by_uuid,
            layout: Some(layout),
        })
    }

    fn key(uuid: Uuid) -> String {
        uuid.to_string().to_lowercase()
    }

    pub fn layout(&self) -> CharacteristicLayout {
        self.layout.unwrap_or(CharacteristicLayout::Legacy)
    }

    pub fn get(&self, uuid: Uuid) -> Option<&CharacteristicInfo> {
        self.by_uuid.get(&Self::key(uuid))
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.by_uuid.contains_key(&Self::key(uuid))
    }

    pub fn notify_capable(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self
            .by_uuid
            .values()
            .filter(|c| c.notifies)
            .map(|c| c.uuid)
            .collect();
        uuids.sort();
        uuids
    }

    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_uuid.clear();
        self.layout = None;
    }
}

/// Connect with bounded retries and linear backoff.
pub async fn connect_with_retry<T: BoardTransport>(
    transport: &T,
    policy: &ConnectRetryPolicy,
    events: &mpsc::UnboundedSender<BoardEvent>,
) -> Result<(), BoardError> {
    let mut last_reason = String::new();

    for attempt in 1..=policy.attempts {
        match transport.connect(policy.attempt_timeout).await {
            Ok(()) => {
                info!("connected on attempt {attempt}/{}", policy.attempts);
                return Ok(());
            }
            Err(e) => {
                warn!("connect attempt {attempt}/{} failed: {e}", policy.attempts);
                last_reason = e.to_string();
                let _ = events.send(BoardEvent::Status(StatusMessage {
                    message: format!("Connect attempt {attempt} failed, retrying..."),
                    severity: MessageSeverity::Warning,
                }));
                if attempt < policy.attempts {
                    tokio::time::sleep(policy.backoff * attempt).await;
                }
            }
        }
    }

    Err(BoardError::ConnectFailure {
        attempts: policy.attempts,
        reason: last_reason,
    })
}

/// Run service discovery under a deadline and build the registry.
pub async fn discover_registry<T: BoardTransport>(
    transport: &T,
    timeout: Duration,
) -> Result<CharacteristicRegistry, BoardError> {
    let services = tokio::time::timeout(timeout, transport.discover())
        .await
        .map_err(|_| BoardError::Link(format!("service discovery timed out after {timeout:?}")))??;
    CharacteristicRegistry::from_services(&services)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(uuid: Uuid, characteristics: &[(Uuid, bool)]) -> ServiceInfo {
        ServiceInfo {
            uuid,
            characteristics: characteristics
                .iter()
                .map(|(uuid, notifies)| CharacteristicInfo {
                    uuid: *uuid,
                    notifies: *notifies,
                })
                .collect(),
        }
    }

    #[test]
    fn missing_primary_service_is_fatal() {
        let other = service(Uuid::from_u128(0xdead_beef), &[(Uuid::from_u128(1), true)]);
        assert!(matches!(
            CharacteristicRegistry::from_services(&[other]),
            Err(BoardError::ServiceNotFound)
        ));
    }

    #[test]
    fn empty_primary_service_reports_characteristics_missing() {
        let primary = service(protocol::PRIMARY_SERVICE_UUID, &[]);
        assert!(matches!(
            CharacteristicRegistry::from_services(&[primary]),
            Err(BoardError::CharacteristicsMissing)
        ));
    }

    #[test]
    fn layout_is_pinned_by_the_extended_write_channel() {
        let legacy_write = CharacteristicLayout::Legacy.write_channel();
        let extended_write = CharacteristicLayout::Extended.write_channel();

        let legacy = service(
            protocol::PRIMARY_SERVICE_UUID,
            &[(protocol::CHAR_BATTERY_PERCENT, true), (legacy_write, false)],
        );
        let registry = CharacteristicRegistry::from_services(&[legacy]).unwrap();
        assert_eq!(registry.layout(), CharacteristicLayout::Legacy);

        let extended = service(
            protocol::PRIMARY_SERVICE_UUID,
            &[
                (protocol::CHAR_BATTERY_PERCENT, true),
                (extended_write, false),
            ],
        );
        let registry = CharacteristicRegistry::from_services(&[extended]).unwrap();
        assert_eq!(registry.layout(), CharacteristicLayout::Extended);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(protocol::CHAR_BATTERY_PERCENT));
    }

    #[test]
    fn notify_capable_lists_only_notifying_characteristics() {
        let primary = service(
            protocol::PRIMARY_SERVICE_UUID,
            &[
                (protocol::CHAR_BATTERY_PERCENT, true),
                (protocol::CHAR_SERIAL_NUMBER, false),
            ],
        );
        let registry = CharacteristicRegistry::from_services(&[primary]).unwrap();
        assert_eq!(
            registry.notify_capable(),
            vec![protocol::CHAR_BATTERY_PERCENT]
        );
    }

    #[test]
    fn clear_empties_the_registry() {
        let primary = service(
            protocol::PRIMARY_SERVICE_UUID,
            &[(protocol::CHAR_BATTERY_PERCENT, true)],
        );
        let mut registry = CharacteristicRegistry::from_services(&[primary]).unwrap();
        registry.clear();
        assert!(registry.is_empty());
    }
}
