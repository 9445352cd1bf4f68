//! Authentication Orchestrator
//!
//! Drives the model-specific unlock sequence. Every board model owns an
//! ordered strategy list; strategies run strictly sequentially and the
//! first success wins. Classic boards answer an MD5 challenge-response
//! over the serial channels; GT-generation boards get the fixed-command
//! fallbacks first and the modified challenge flow last.

use crate::domain::models::{BoardError, BoardEvent, BoardModel, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::connection::{CharacteristicRegistry, ConnectRetryPolicy};
use crate::infrastructure::bluetooth::protocol::{self, TelemetryField};
use crate::infrastructure::bluetooth::transport::{BoardTransport, Notification};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-model protocol timing. GT-generation firmware is slower to wake,
/// slower to answer, and needs a gentler keepalive cadence.
#[derive(Debug, Clone)]
pub struct ModelTuning {
    pub connect: ConnectRetryPolicy,
    pub discovery_timeout: Duration,
    pub watchdog_grace: Duration,
    pub firmware_read_attempts: u32,
    pub firmware_read_timeout: Duration,
    pub min_challenge_len: usize,
    pub challenge_wait: Duration,
    pub keepalive_period: Duration,
}

impl ModelTuning {
    pub fn for_model(model: BoardModel) -> Self {
        if model.is_newer_variant() {
            Self {
                connect: ConnectRetryPolicy::for_model(model),
                discovery_timeout: Duration::from_secs(15),
                watchdog_grace: Duration::from_secs(5),
                firmware_read_attempts: 5,
                firmware_read_timeout: Duration::from_secs(3),
                min_challenge_len: protocol::MIN_CHALLENGE_LEN_MODIFIED,
                challenge_wait: Duration::from_secs(25),
                keepalive_period: Duration::from_secs(30),
            }
        } else {
            Self {
                connect: ConnectRetryPolicy::for_model(model),
                discovery_timeout: Duration::from_secs(10),
                watchdog_grace: Duration::from_secs(2),
                firmware_read_attempts: 3,
                firmware_read_timeout: Duration::from_secs(3),
                min_challenge_len: protocol::MIN_CHALLENGE_LEN_CLASSIC,
                challenge_wait: Duration::from_secs(15),
                keepalive_period: Duration::from_secs(20),
            }
        }
    }
}

/// Delay after a fixed unlock write before the sentinel is consulted.
const UNLOCK_SETTLE: Duration = Duration::from_millis(300);
/// Pause after the bulk subscription burst of the direct-unlock strategy.
const SUBSCRIPTION_SETTLE: Duration = Duration::from_millis(500);
/// Extra window granted after the alternate trigger write of the modified
/// challenge flow.
const ALTERNATE_TRIGGER_GRACE: Duration = Duration::from_secs(5);
const FIRMWARE_RETRY_DELAY: Duration = Duration::from_millis(250);
/// Deadline for the individual reads of sentinels and the wake sweep.
const PRIMING_READ_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStrategy {
    DirectUnlock,
    AlternateUnlock,
    WakeSweep,
    ChallengeResponse { modified: bool },
}

impl UnlockStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectUnlock => "direct-unlock",
            Self::AlternateUnlock => "alternate-unlock",
            Self::WakeSweep => "wake-sweep",
            Self::ChallengeResponse { .. } => "challenge-response",
        }
    }
}

const NEWER_STRATEGIES: [UnlockStrategy; 4] = [
    UnlockStrategy::DirectUnlock,
    UnlockStrategy::AlternateUnlock,
    UnlockStrategy::WakeSweep,
    UnlockStrategy::ChallengeResponse { modified: true },
];
const CLASSIC_STRATEGIES: [UnlockStrategy; 1] =
    [UnlockStrategy::ChallengeResponse { modified: false }];

pub fn strategies_for(model: BoardModel) -> &'static [UnlockStrategy] {
    if model.is_newer_variant() {
        &NEWER_STRATEGIES
    } else {
        &CLASSIC_STRATEGIES
    }
}

/// Result of a successful unlock.
#[derive(Debug)]
pub struct AuthOutcome {
    pub model: BoardModel,
    pub tuning: ModelTuning,
    /// Firmware-revision bytes, cached for keepalive and heartbeat writes.
    pub firmware: Vec<u8>,
    pub strategy: &'static str,
}

/// Run the full unlock sequence against an established, discovered link.
/// Every strategy attempt is appended to `attempts` with its outcome, so
/// the log survives a failed unlock.
pub async fn authenticate<T: BoardTransport>(
    transport: &T,
    registry: &CharacteristicRegistry,
    device_name: &str,
    notifications: &mut mpsc::Receiver<Notification>,
    events: &mpsc::UnboundedSender<BoardEvent>,
    attempts: &mut Vec<String>,
) -> Result<AuthOutcome, BoardError> {
    if registry.is_empty() {
        return Err(BoardError::CharacteristicsMissing);
    }

    // The firmware read budget depends on the model, which is only fully
    // known after reading the firmware; the advertised name decides.
    let preliminary = ModelTuning::for_model(BoardModel::detect(device_name, ""));
    let firmware = read_firmware(transport, registry, &preliminary).await?;

    let model = BoardModel::detect(device_name, &String::from_utf8_lossy(&firmware));
    let tuning = ModelTuning::for_model(model);
    info!("board model detected as {}", model.label());

    let strategies = strategies_for(model);
    let mut last_error = BoardError::AllStrategiesExhausted;

    for strategy in strategies {
        let _ = events.send(BoardEvent::Status(StatusMessage {
            message: format!("Unlock attempt: {}", strategy.name()),
            severity: MessageSeverity::Info,
        }));

        let result = match strategy {
            UnlockStrategy::DirectUnlock => {
                direct_unlock(transport, registry, protocol::DIRECT_UNLOCK_COMMAND, TelemetryField::BatteryPercent).await
            }
            UnlockStrategy::AlternateUnlock => {
                direct_unlock(transport, registry, protocol::ALTERNATE_UNLOCK_COMMAND, TelemetryField::Pitch).await
            }
            UnlockStrategy::WakeSweep => wake_sweep(transport, registry).await,
            UnlockStrategy::ChallengeResponse { modified } => {
                challenge_response(transport, registry, notifications, &firmware, *modified, &tuning)
                    .await
            }
        };

        match result {
            Ok(()) => {
                attempts.push(format!("{}: ok", strategy.name()));
                info!("unlocked via {}", strategy.name());
                return Ok(AuthOutcome {
                    model,
                    tuning,
                    firmware,
                    strategy: strategy.name(),
                });
            }
            Err(e) => {
                warn!("strategy {} failed: {e}", strategy.name());
                attempts.push(format!("{}: {e}", strategy.name()));
                let _ = events.send(BoardEvent::Status(StatusMessage {
                    message: format!("Unlock attempt {} failed", strategy.name()),
                    severity: MessageSeverity::Warning,
                }));
                last_error = e;
            }
        }
    }

    // A single-strategy model surfaces its concrete failure; the fallback
    // chain reports exhaustion with the attempt log alongside.
    if strategies.len() == 1 {
        Err(last_error)
    } else {
        Err(BoardError::AllStrategiesExhausted)
    }
}

/// Read the firmware revision with bounded retries; an empty result is
/// retried, not treated as a value.
async fn read_firmware<T: BoardTransport>(
    transport: &T,
    registry: &CharacteristicRegistry,
    tuning: &ModelTuning,
) -> Result<Vec<u8>, BoardError> {
    let uuid = registry.layout().firmware_revision();
    if !registry.contains(uuid) {
        return Err(BoardError::CharacteristicsMissing);
    }

    for attempt in 1..=tuning.firmware_read_attempts {
        match tokio::time::timeout(tuning.firmware_read_timeout, transport.read(uuid)).await {
            Ok(Ok(bytes)) if !bytes.is_empty() => return Ok(bytes),
            Ok(Ok(_)) => warn!("firmware read attempt {attempt} returned no bytes"),
            Ok(Err(e)) => warn!("firmware read attempt {attempt} failed: {e}"),
            Err(_) => warn!("firmware read attempt {attempt} timed out"),
        }
        if attempt < tuning.firmware_read_attempts {
            tokio::time::sleep(FIRMWARE_RETRY_DELAY).await;
        }
    }
    Err(BoardError::Link("firmware revision unreadable".to_string()))
}

/// Fixed-command unlock: subscribe everything, nudge the board, and check
/// a sentinel characteristic for live telemetry.
async fn direct_unlock<T: BoardTransport>(
    transport: &T,
    registry: &CharacteristicRegistry,
    command: &[u8],
    sentinel: TelemetryField,
) -> Result<(), BoardError> {
    for uuid in registry.notify_capable() {
        if let Err(e) = transport.subscribe(uuid).await {
            debug!("subscribe {uuid} failed during unlock: {e}");
        }
    }
    tokio::time::sleep(SUBSCRIPTION_SETTLE).await;

    transport
        .write(registry.layout().write_channel(), command)
        .await?;
    tokio::time::sleep(UNLOCK_SETTLE).await;

    verify_sentinel(transport, registry, sentinel).await
}

/// Read several known characteristics purely to prime the link, then check
/// the battery sentinel. Individual read failures are ignored.
async fn wake_sweep<T: BoardTransport>(
    transport: &T,
    registry: &CharacteristicRegistry,
) -> Result<(), BoardError> {
    for uuid in registry.layout().wake_sweep() {
        match tokio::time::timeout(PRIMING_READ_TIMEOUT, transport.read(uuid)).await {
            Ok(Ok(bytes)) => debug!("wake sweep read {uuid}: {} bytes", bytes.len()),
            Ok(Err(e)) => debug!("wake sweep read {uuid} failed: {e}"),
            Err(_) => debug!("wake sweep read {uuid} timed out"),
        }
    }
    verify_sentinel(transport, registry, TelemetryField::BatteryPercent).await
}

async fn verify_sentinel<T: BoardTransport>(
    transport: &T,
    registry: &CharacteristicRegistry,
    sentinel: TelemetryField,
) -> Result<(), BoardError> {
    let uuid = registry.layout().uuid_of(sentinel);
    let bytes = tokio::time::timeout(PRIMING_READ_TIMEOUT, transport.read(uuid))
        .await
        .map_err(|_| BoardError::Link(format!("sentinel {uuid} read timed out")))??;
    match protocol::decode_value(sentinel, &bytes) {
        Some(value) => {
            debug!("sentinel {uuid} verified: {value:?}");
            Ok(())
        }
        None => Err(BoardError::Link(format!(
            "sentinel {uuid} returned {} undecodable bytes",
            bytes.len()
        ))),
    }
}

/// Challenge-response unlock. Echo the firmware bytes to trigger the
/// challenge, accumulate notifications until the minimum length or the
/// deadline, validate the signature, and answer.
async fn challenge_response<T: BoardTransport>(
    transport: &T,
    registry: &CharacteristicRegistry,
    notifications: &mut mpsc::Receiver<Notification>,
    firmware: &[u8],
    modified: bool,
    tuning: &ModelTuning,
) -> Result<(), BoardError> {
    let layout = registry.layout();
    let read_channel = layout.read_channel();
    if !registry.contains(read_channel) {
        return Err(BoardError::CharacteristicsMissing);
    }

    transport.subscribe(read_channel).await?;
    transport
        .write(layout.firmware_revision(), firmware)
        .await?;

    let mut challenge = accumulate_challenge(
        notifications,
        read_channel,
        tuning.min_challenge_len,
        tuning.challenge_wait,
    )
    .await;

    if challenge.is_empty() && modified {
        // Some GT revisions only emit the challenge after a poke on the
        // write channel; grant one alternate trigger before giving up.
        warn!("no challenge bytes; issuing alternate trigger write");
        transport.write(layout.write_channel(), firmware).await?;
        challenge = accumulate_challenge(
            notifications,
            read_channel,
            tuning.min_challenge_len,
            ALTERNATE_TRIGGER_GRACE,
        )
        .await;
    }

    if challenge.is_empty() {
        return Err(BoardError::ChallengeTimeout);
    }
    if !protocol::has_challenge_signature(&challenge) {
        return Err(BoardError::InvalidChallengeSignature);
    }
    debug!("challenge accepted at {} bytes", challenge.len());

    let response = protocol::compute_unlock_response(&challenge, &protocol::SECRET_KEY, modified)?;
    transport.write(layout.write_channel(), &response).await?;
    tokio::time::sleep(UNLOCK_SETTLE).await;
    Ok(())
}

/// Collect read-channel payloads until `min_len` bytes or the deadline.
/// A partial, non-empty buffer is returned for the caller to judge.
async fn accumulate_challenge(
    notifications: &mut mpsc::Receiver<Notification>,
    channel: Uuid,
    min_len: usize,
    wait: Duration,
) -> Vec<u8> {
    let deadline = tokio::time::Instant::now() + wait;
    let mut buffer = Vec::new();

    while buffer.len() < min_len {
        match tokio::time::timeout_at(deadline, notifications.recv()).await {
            Ok(Some(n)) if n.uuid == channel => buffer.extend_from_slice(&n.value),
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => break,
        }
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::CharacteristicLayout;
    use crate::infrastructure::bluetooth::transport::mock::{MockScript, MockTransport};
    use crate::infrastructure::bluetooth::transport::{CharacteristicInfo, ServiceInfo};
    use std::collections::HashMap;

    fn primary_service(layout: CharacteristicLayout) -> ServiceInfo {
        let mut uuids = vec![
            protocol::CHAR_SERIAL_NUMBER,
            protocol::CHAR_RIDE_MODE,
            protocol::CHAR_BATTERY_PERCENT,
            layout.uuid_of(TelemetryField::Pitch),
            layout.uuid_of(TelemetryField::Roll),
            layout.uuid_of(TelemetryField::Yaw),
            layout.uuid_of(TelemetryField::Rpm),
            layout.uuid_of(TelemetryField::Voltage),
            layout.uuid_of(TelemetryField::TripOdometer),
            layout.firmware_revision(),
            layout.read_channel(),
        ];
        let write_channel = layout.write_channel();
        let characteristics = uuids
            .drain(..)
            .map(|uuid| CharacteristicInfo {
                uuid,
                notifies: uuid != write_channel,
            })
            .chain(std::iter::once(CharacteristicInfo {
                uuid: write_channel,
                notifies: false,
            }))
            .collect();
        ServiceInfo {
            uuid: protocol::PRIMARY_SERVICE_UUID,
            characteristics,
        }
    }

    fn registry_for(layout: CharacteristicLayout) -> CharacteristicRegistry {
        CharacteristicRegistry::from_services(&[primary_service(layout)]).unwrap()
    }

    fn events() -> (
        mpsc::UnboundedSender<BoardEvent>,
        mpsc::UnboundedReceiver<BoardEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    fn crx_challenge(len: usize) -> Vec<u8> {
        let mut c = protocol::CHALLENGE_SIGNATURE.to_vec();
        c.extend((0..len - 3).map(|i| (i as u8).wrapping_mul(7)));
        c
    }

    #[test]
    fn strategy_lists_are_model_specific() {
        assert_eq!(strategies_for(BoardModel::GtS).len(), 4);
        assert_eq!(strategies_for(BoardModel::Gt).len(), 4);
        assert_eq!(
            strategies_for(BoardModel::Pint),
            &[UnlockStrategy::ChallengeResponse { modified: false }]
        );
        assert_eq!(strategies_for(BoardModel::Unknown).len(), 1);
    }

    #[tokio::test]
    async fn gts_direct_unlock_short_circuits_later_strategies() {
        let layout = CharacteristicLayout::Extended;
        let mut reads = HashMap::new();
        reads.insert(layout.firmware_revision(), b"gts4210".to_vec());
        reads.insert(protocol::CHAR_BATTERY_PERCENT, vec![85]);

        let transport = MockTransport::new(MockScript {
            services: vec![primary_service(layout)],
            reads,
            ..Default::default()
        });
        let registry = registry_for(layout);
        let (tx, _rx) = events();
        let mut notifications = transport.notifications().await.unwrap();
        let mut attempts = Vec::new();

        let outcome = authenticate(
            &transport,
            &registry,
            "Onewheel GT-S",
            &mut notifications,
            &tx,
            &mut attempts,
        )
        .await
        .unwrap();

        assert_eq!(outcome.model, BoardModel::GtS);
        assert_eq!(outcome.strategy, "direct-unlock");
        assert_eq!(attempts, vec!["direct-unlock: ok".to_string()]);

        // Exactly one unlock write; the alternate command never went out.
        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, layout.write_channel());
        assert_eq!(writes[0].1, protocol::DIRECT_UNLOCK_COMMAND.to_vec());
    }

    #[tokio::test]
    async fn classic_flow_answers_the_challenge() {
        let layout = CharacteristicLayout::Legacy;
        let challenge = crx_challenge(20);
        let mut reads = HashMap::new();
        reads.insert(layout.firmware_revision(), b"4134".to_vec());

        let transport = MockTransport::new(MockScript {
            services: vec![primary_service(layout)],
            reads,
            challenge_trigger: Some(layout.firmware_revision()),
            challenge_channel: Some(layout.read_channel()),
            challenge: challenge.clone(),
            ..Default::default()
        });
        let registry = registry_for(layout);
        let (tx, _rx) = events();
        let mut notifications = transport.notifications().await.unwrap();
        let mut attempts = Vec::new();

        let outcome = authenticate(
            &transport,
            &registry,
            "Onewheel Pint",
            &mut notifications,
            &tx,
            &mut attempts,
        )
        .await
        .unwrap();

        assert_eq!(outcome.model, BoardModel::Pint);
        assert_eq!(outcome.strategy, "challenge-response");
        assert_eq!(outcome.firmware, b"4134".to_vec());

        let writes = transport.writes();
        // Trigger write first, then the response on the write channel.
        assert_eq!(writes[0].0, layout.firmware_revision());
        assert_eq!(writes[0].1, b"4134".to_vec());
        let expected =
            protocol::compute_unlock_response(&challenge, &protocol::SECRET_KEY, false).unwrap();
        assert_eq!(writes[1].0, layout.write_channel());
        assert_eq!(writes[1].1, expected);

        assert!(transport
            .subscriptions()
            .contains(&layout.read_channel()));
    }

    #[tokio::test]
    async fn classic_flow_rejects_an_unsigned_challenge() {
        let layout = CharacteristicLayout::Legacy;
        let mut challenge = crx_challenge(20);
        challenge[0] = 0xff;
        let mut reads = HashMap::new();
        reads.insert(layout.firmware_revision(), b"4134".to_vec());

        let transport = MockTransport::new(MockScript {
            services: vec![primary_service(layout)],
            reads,
            challenge_trigger: Some(layout.firmware_revision()),
            challenge_channel: Some(layout.read_channel()),
            challenge,
            ..Default::default()
        });
        let registry = registry_for(layout);
        let (tx, _rx) = events();
        let mut notifications = transport.notifications().await.unwrap();
        let mut attempts = Vec::new();

        let err = authenticate(
            &transport,
            &registry,
            "Onewheel XR",
            &mut notifications,
            &tx,
            &mut attempts,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BoardError::InvalidChallengeSignature));
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].starts_with("challenge-response:"));
    }

    #[tokio::test]
    async fn firmware_read_retries_past_empty_results() {
        // No scripted read at all: every attempt errors, then escalates.
        let layout = CharacteristicLayout::Legacy;
        let transport = MockTransport::new(MockScript {
            services: vec![primary_service(layout)],
            ..Default::default()
        });
        let registry = registry_for(layout);
        let (tx, _rx) = events();
        let mut notifications = transport.notifications().await.unwrap();
        let mut attempts = Vec::new();

        let err = authenticate(
            &transport,
            &registry,
            "Onewheel Pint",
            &mut notifications,
            &tx,
            &mut attempts,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BoardError::Link(_)));
        assert!(attempts.is_empty());
    }
}
