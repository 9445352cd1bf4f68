//! Board Session
//!
//! The top-level connection state machine: sequences connect, service
//! discovery, authentication, and subscriptions, then keeps the unlocked
//! session alive with heartbeat and watchdog timers. Any mid-session
//! failure forces a full teardown back to `Disconnected`.

use crate::domain::models::{
    BoardError, BoardEvent, BoardModel, ConnectionState, Diagnostics, MessageSeverity,
    StatusMessage, TelemetrySnapshot,
};
use crate::infrastructure::bluetooth::auth::{self, ModelTuning};
use crate::infrastructure::bluetooth::connection::{self, CharacteristicRegistry};
use crate::infrastructure::bluetooth::protocol::{self, CharacteristicLayout};
use crate::infrastructure::bluetooth::transport::{BoardTransport, Notification};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Heartbeat cadence while authenticated; consecutive failures are fatal.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(15);
const HEARTBEAT_FATAL_AFTER: u32 = 2;
/// Link-status poll cadence.
const WATCHDOG_PERIOD: Duration = Duration::from_secs(5);
/// Gap between the priority subscriptions of GT-generation boards.
const PRIORITY_SUBSCRIPTION_DELAY: Duration = Duration::from_millis(100);

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// State shared with the session's background tasks. Outlives the active
/// link so diagnostics stay meaningful after a teardown.
struct SessionCore {
    state: Mutex<ConnectionState>,
    events: mpsc::UnboundedSender<BoardEvent>,
    snapshot: Mutex<TelemetrySnapshot>,
    last_error: Mutex<Option<BoardError>>,
    strategy_attempts: Mutex<Vec<String>>,
    subscriptions: AtomicUsize,
}

impl SessionCore {
    fn new(events: mpsc::UnboundedSender<BoardEvent>) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            events,
            snapshot: Mutex::new(TelemetrySnapshot::default()),
            last_error: Mutex::new(None),
            strategy_attempts: Mutex::new(Vec::new()),
            subscriptions: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// The one transition point; observers learn of every change.
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if *state == next {
            return;
        }
        debug!("connection state {:?} -> {:?}", *state, next);
        *state = next;
        drop(state);
        let _ = self.events.send(BoardEvent::StateChanged(next));
    }

    /// Apply one decoded reading. The snapshot is only touched while a
    /// session is authenticating or authenticated.
    fn apply_telemetry(&self, value: protocol::TelemetryValue) {
        if !matches!(
            self.state(),
            ConnectionState::Authenticating | ConnectionState::Authenticated
        ) {
            return;
        }
        let published = {
            let mut snapshot = self.snapshot.lock().expect("snapshot lock poisoned");
            value.apply(&mut snapshot);
            snapshot.timestamp = now_ms();
            snapshot.clone()
        };
        let _ = self.events.send(BoardEvent::Telemetry(published));
    }

    fn send_status(&self, message: &str, severity: MessageSeverity) {
        let _ = self.events.send(BoardEvent::Status(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

#[derive(Default)]
struct TimerSet {
    watchdog: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl TimerSet {
    fn drain(&mut self) -> Vec<JoinHandle<()>> {
        [
            self.watchdog.take(),
            self.heartbeat.take(),
            self.keepalive.take(),
            self.pump.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// One established (or establishing) link and everything that must be torn
/// down with it.
struct ActiveLink<T: BoardTransport> {
    core: Arc<SessionCore>,
    transport: T,
    registry: Mutex<CharacteristicRegistry>,
    model: Mutex<BoardModel>,
    firmware: Mutex<Vec<u8>>,
    timers: Mutex<TimerSet>,
    torn_down: AtomicBool,
}

impl<T: BoardTransport> ActiveLink<T> {
    /// Cancel timers and subscriptions, release the connection, clear the
    /// registry, and return to `Disconnected`. Safe to call from any task;
    /// only the first call acts. Returns whether this call did the work.
    async fn teardown(self: Arc<Self>, failure: Option<BoardError>) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(e) = &failure {
            error!("session failure: {e}");
            *self.core.last_error.lock().expect("error lock poisoned") = Some(e.clone());
            self.core.set_state(ConnectionState::Error);
            let _ = self.core.events.send(BoardEvent::Fault(e.clone()));
        }

        let handles = self.timers.lock().expect("timer lock poisoned").drain();
        for handle in handles {
            handle.abort();
        }

        if let Err(e) = self.transport.disconnect().await {
            debug!("disconnect during teardown: {e}");
        }
        self.registry.lock().expect("registry lock poisoned").clear();
        self.core.subscriptions.store(0, Ordering::SeqCst);
        self.core.set_state(ConnectionState::Disconnected);
        true
    }

    async fn write_firmware_bytes(&self) -> Result<(), BoardError> {
        let uuid = {
            self.registry
                .lock()
                .expect("registry lock poisoned")
                .layout()
                .firmware_revision()
        };
        let payload = self.firmware.lock().expect("firmware lock poisoned").clone();
        self.transport.write(uuid, &payload).await
    }
}

/// A task noticing a fatal condition must not tear down inline: teardown
/// aborts the timer tasks, including the caller, so it runs detached.
fn teardown_detached<T: BoardTransport>(link: Arc<ActiveLink<T>>, failure: BoardError) {
    tokio::spawn(async move {
        link.teardown(Some(failure)).await;
    });
}

fn spawn_watchdog<T: BoardTransport>(link: &Arc<ActiveLink<T>>, grace: Duration) {
    let l = Arc::clone(link);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        loop {
            tokio::time::sleep(WATCHDOG_PERIOD).await;
            if !l.transport.is_connected().await {
                warn!("watchdog: link no longer connected");
                teardown_detached(Arc::clone(&l), BoardError::WatchdogDisconnect);
                break;
            }
        }
    });
    link.timers.lock().expect("timer lock poisoned").watchdog = Some(handle);
}

fn spawn_heartbeat<T: BoardTransport>(link: &Arc<ActiveLink<T>>) {
    let l = Arc::clone(link);
    let handle = tokio::spawn(async move {
        let mut consecutive_failures = 0u32;
        loop {
            tokio::time::sleep(HEARTBEAT_PERIOD).await;
            match l.write_firmware_bytes().await {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    warn!("heartbeat write failed ({consecutive_failures} in a row): {e}");
                    if consecutive_failures >= HEARTBEAT_FATAL_AFTER {
                        teardown_detached(Arc::clone(&l), BoardError::HeartbeatFailure);
                        break;
                    }
                }
            }
        }
    });
    link.timers.lock().expect("timer lock poisoned").heartbeat = Some(handle);
}

/// Model-paced keepalive. Unlike the heartbeat, a failed keepalive is
/// logged and tolerated.
fn spawn_keepalive<T: BoardTransport>(link: &Arc<ActiveLink<T>>, period: Duration) {
    let l = Arc::clone(link);
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            if let Err(e) = l.write_firmware_bytes().await {
                warn!("keepalive write failed: {e}");
            }
        }
    });
    link.timers.lock().expect("timer lock poisoned").keepalive = Some(handle);
}

/// Route notifications through the codec into the shared snapshot. A
/// payload that fails to decode is dropped without affecting the rest.
fn spawn_pump<T: BoardTransport>(
    link: &Arc<ActiveLink<T>>,
    mut notifications: mpsc::Receiver<Notification>,
    layout: CharacteristicLayout,
) {
    let l = Arc::clone(link);
    let handle = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            trace!(
                "raw packet {}: {:02x?}",
                notification.uuid,
                notification.value
            );
            match protocol::decode_characteristic(layout, notification.uuid, &notification.value) {
                Some(value) => l.core.apply_telemetry(value),
                None => debug!(
                    "notification from {} not decoded ({} bytes)",
                    notification.uuid,
                    notification.value.len()
                ),
            }
        }
        debug!("notification channel closed");
    });
    link.timers.lock().expect("timer lock poisoned").pump = Some(handle);
}

/// Enable notifications on every notify-capable characteristic. GT boards
/// get the priority subset first, spaced out; the board drops subscription
/// bursts while its radio is still settling.
async fn subscribe_telemetry<T: BoardTransport>(
    transport: &T,
    registry: &CharacteristicRegistry,
    model: BoardModel,
) -> usize {
    let mut subscribed: Vec<Uuid> = Vec::new();

    if model.is_newer_variant() {
        for uuid in registry.layout().priority_subscriptions() {
            let notifies = registry.get(uuid).map(|c| c.notifies).unwrap_or(false);
            if !notifies || subscribed.contains(&uuid) {
                continue;
            }
            match transport.subscribe(uuid).await {
                Ok(()) => subscribed.push(uuid),
                Err(e) => warn!("priority subscribe {uuid} failed: {e}"),
            }
            tokio::time::sleep(PRIORITY_SUBSCRIPTION_DELAY).await;
        }
    }

    for uuid in registry.notify_capable() {
        if subscribed.contains(&uuid) {
            continue;
        }
        match transport.subscribe(uuid).await {
            Ok(()) => subscribed.push(uuid),
            Err(e) => warn!("subscribe {uuid} failed: {e}"),
        }
    }

    subscribed.len()
}

/// Single-session engine: at most one board is non-disconnected at a time.
pub struct BoardSession<T: BoardTransport> {
    core: Arc<SessionCore>,
    link: Option<Arc<ActiveLink<T>>>,
}

impl<T: BoardTransport> BoardSession<T> {
    pub fn new(events: mpsc::UnboundedSender<BoardEvent>) -> Self {
        Self {
            core: Arc::new(SessionCore::new(events)),
            link: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.core
            .snapshot
            .lock()
            .expect("snapshot lock poisoned")
            .clone()
    }

    /// Mark the session as scanning. Refused while a link is active.
    pub fn begin_scan(&self) -> bool {
        if self.core.state() != ConnectionState::Disconnected {
            return false;
        }
        self.core.set_state(ConnectionState::Scanning);
        true
    }

    pub fn finish_scan(&self) {
        if self.core.state() == ConnectionState::Scanning {
            self.core.set_state(ConnectionState::Disconnected);
        }
    }

    /// Establish, authenticate, and wire up a board. A connect request
    /// while a session is already underway is a no-op.
    pub async fn connect(&mut self, transport: T, device_name: &str) -> Result<(), BoardError> {
        match self.core.state() {
            ConnectionState::Disconnected | ConnectionState::Scanning => {}
            state => {
                info!("connect ignored; session already {state:?}");
                return Ok(());
            }
        }

        *self.core.last_error.lock().expect("error lock poisoned") = None;
        self.core
            .strategy_attempts
            .lock()
            .expect("attempts lock poisoned")
            .clear();
        *self.core.snapshot.lock().expect("snapshot lock poisoned") =
            TelemetrySnapshot::default();

        let link = Arc::new(ActiveLink {
            core: Arc::clone(&self.core),
            transport,
            registry: Mutex::new(CharacteristicRegistry::default()),
            model: Mutex::new(BoardModel::detect(device_name, "")),
            firmware: Mutex::new(Vec::new()),
            timers: Mutex::new(TimerSet::default()),
            torn_down: AtomicBool::new(false),
        });
        self.link = Some(Arc::clone(&link));

        match self.establish(&link, device_name).await {
            Ok(()) => Ok(()),
            Err(e) => {
                Arc::clone(&link).teardown(Some(e.clone())).await;
                self.link = None;
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        link: &Arc<ActiveLink<T>>,
        device_name: &str,
    ) -> Result<(), BoardError> {
        let core = &self.core;
        // The advertised name decides the budgets until the firmware read
        // refines the model.
        let preliminary = ModelTuning::for_model(*link.model.lock().expect("model lock poisoned"));

        core.set_state(ConnectionState::Connecting);
        connection::connect_with_retry(&link.transport, &preliminary.connect, &core.events).await?;
        core.set_state(ConnectionState::Connected);
        spawn_watchdog(link, preliminary.watchdog_grace);

        let registry =
            connection::discover_registry(&link.transport, preliminary.discovery_timeout).await?;

        core.set_state(ConnectionState::Authenticating);
        let mut notifications = link.transport.notifications().await?;

        let mut attempts = Vec::new();
        let outcome = auth::authenticate(
            &link.transport,
            &registry,
            device_name,
            &mut notifications,
            &core.events,
            &mut attempts,
        )
        .await;
        *core
            .strategy_attempts
            .lock()
            .expect("attempts lock poisoned") = attempts;
        let outcome = outcome?;

        *link.model.lock().expect("model lock poisoned") = outcome.model;
        *link.firmware.lock().expect("firmware lock poisoned") = outcome.firmware.clone();

        let count = subscribe_telemetry(&link.transport, &registry, outcome.model).await;
        core.subscriptions.store(count, Ordering::SeqCst);
        info!("{count} telemetry subscriptions active");

        let layout = registry.layout();
        *link.registry.lock().expect("registry lock poisoned") = registry;

        core.set_state(ConnectionState::Authenticated);
        core.send_status(
            &format!(
                "Board unlocked ({} via {})",
                outcome.model.label(),
                outcome.strategy
            ),
            MessageSeverity::Success,
        );

        spawn_pump(link, notifications, layout);
        spawn_heartbeat(link);
        spawn_keepalive(link, outcome.tuning.keepalive_period);

        Ok(())
    }

    /// Tear the session down. Idempotent: a second call leaves the state
    /// `Disconnected` with no timers and an empty registry.
    pub async fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            if link.teardown(None).await {
                info!("disconnected from board");
                self.core
                    .send_status("Disconnected from board", MessageSeverity::Info);
            }
        } else {
            self.core.set_state(ConnectionState::Disconnected);
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        fn alive(handle: &Option<JoinHandle<()>>) -> bool {
            handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
        }

        let (model, characteristic_count, heartbeat, watchdog, keepalive) = match &self.link {
            Some(link) => {
                let timers = link.timers.lock().expect("timer lock poisoned");
                (
                    Some(*link.model.lock().expect("model lock poisoned")),
                    link.registry.lock().expect("registry lock poisoned").len(),
                    alive(&timers.heartbeat),
                    alive(&timers.watchdog),
                    alive(&timers.keepalive),
                )
            }
            None => (None, 0, false, false, false),
        };

        Diagnostics {
            state: self.core.state(),
            model,
            characteristic_count,
            subscription_count: self.core.subscriptions.load(Ordering::SeqCst),
            heartbeat_alive: heartbeat,
            watchdog_alive: watchdog,
            keepalive_alive: keepalive,
            strategy_attempts: self
                .core
                .strategy_attempts
                .lock()
                .expect("attempts lock poisoned")
                .clone(),
            last_error: self
                .core
                .last_error
                .lock()
                .expect("error lock poisoned")
                .clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::TelemetryField;
    use crate::infrastructure::bluetooth::transport::mock::{MockScript, MockTransport};
    use crate::infrastructure::bluetooth::transport::{CharacteristicInfo, ServiceInfo};
    use std::collections::HashMap;

    fn primary_service(layout: CharacteristicLayout) -> ServiceInfo {
        let write_channel = layout.write_channel();
        let uuids = [
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
            write_channel,
        ];
        ServiceInfo {
            uuid: protocol::PRIMARY_SERVICE_UUID,
            characteristics: uuids
                .into_iter()
                .map(|uuid| CharacteristicInfo {
                    uuid,
                    notifies: uuid != write_channel,
                })
                .collect(),
        }
    }

    fn crx_challenge(len: usize) -> Vec<u8> {
        let mut c = protocol::CHALLENGE_SIGNATURE.to_vec();
        c.extend((0..len - 3).map(|i| (i as u8).wrapping_add(11)));
        c
    }

    fn pint_script() -> MockScript {
        let layout = CharacteristicLayout::Legacy;
        let mut reads = HashMap::new();
        reads.insert(layout.firmware_revision(), b"4134".to_vec());
        MockScript {
            services: vec![primary_service(layout)],
            reads,
            challenge_trigger: Some(layout.firmware_revision()),
            challenge_channel: Some(layout.read_channel()),
            challenge: crx_challenge(20),
            ..Default::default()
        }
    }

    fn drain_states(events: &mut mpsc::UnboundedReceiver<BoardEvent>) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let BoardEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        states
    }

    async fn wait_for_telemetry(
        events: &mut mpsc::UnboundedReceiver<BoardEvent>,
    ) -> TelemetrySnapshot {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("timed out waiting for telemetry")
                .expect("event channel closed");
            if let BoardEvent::Telemetry(snapshot) = event {
                return snapshot;
            }
        }
    }

    #[tokio::test]
    async fn pint_end_to_end_reaches_authenticated_and_streams() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new(pint_script());
        let mut session = BoardSession::new(tx);

        session
            .connect(transport.clone(), "Onewheel Pint")
            .await
            .unwrap();
        assert_eq!(session.state(), ConnectionState::Authenticated);
        assert_eq!(transport.connect_attempts(), 1);

        let states = drain_states(&mut rx);
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Authenticating,
                ConnectionState::Authenticated,
            ]
        );

        let diagnostics = session.diagnostics();
        assert_eq!(diagnostics.characteristic_count, 12);
        assert!(diagnostics.subscription_count > 0);
        assert!(diagnostics.heartbeat_alive);
        assert!(diagnostics.watchdog_alive);
        assert!(diagnostics.keepalive_alive);
        assert_eq!(
            diagnostics.strategy_attempts,
            vec!["challenge-response: ok".to_string()]
        );

        transport.notify(protocol::CHAR_BATTERY_PERCENT, vec![77]);
        let snapshot = wait_for_telemetry(&mut rx).await;
        assert_eq!(snapshot.battery_percent, 77.0);

        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn second_connect_while_active_is_a_noop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new(pint_script());
        let mut session = BoardSession::new(tx);
        session
            .connect(transport.clone(), "Onewheel Pint")
            .await
            .unwrap();

        let second = MockTransport::new(pint_script());
        session
            .connect(second.clone(), "Onewheel Pint")
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Authenticated);
        assert_eq!(second.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn disconnect_twice_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new(pint_script());
        let mut session = BoardSession::new(tx);
        session
            .connect(transport.clone(), "Onewheel Pint")
            .await
            .unwrap();

        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(session.state(), ConnectionState::Disconnected);
        let diagnostics = session.diagnostics();
        assert_eq!(diagnostics.characteristic_count, 0);
        assert!(!diagnostics.heartbeat_alive);
        assert!(!diagnostics.watchdog_alive);
        assert!(!diagnostics.keepalive_alive);
        assert!(!transport.state_connected());
    }

    #[tokio::test]
    async fn connect_retries_then_reports_exhaustion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut script = pint_script();
        script.connect_failures = 5;
        let transport = MockTransport::new(script);
        let mut session = BoardSession::new(tx);

        let err = session
            .connect(transport.clone(), "Onewheel Pint")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BoardError::ConnectFailure { attempts: 3, .. }
        ));
        assert_eq!(transport.connect_attempts(), 3);
        assert_eq!(session.state(), ConnectionState::Disconnected);

        let states = drain_states(&mut rx);
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Error,
                ConnectionState::Disconnected,
            ]
        );
        assert!(matches!(
            session.diagnostics().last_error,
            Some(BoardError::ConnectFailure { .. })
        ));
    }

    #[tokio::test]
    async fn missing_primary_service_is_fatal_for_the_attempt() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let script = MockScript {
            services: vec![ServiceInfo {
                uuid: Uuid::from_u128(0xfeed),
                characteristics: vec![CharacteristicInfo {
                    uuid: Uuid::from_u128(0xbeef),
                    notifies: true,
                }],
            }],
            ..Default::default()
        };
        let transport = MockTransport::new(script);
        let mut session = BoardSession::new(tx);

        let err = session
            .connect(transport, "Onewheel Pint")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::ServiceNotFound));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn scan_state_round_trips_and_respects_active_sessions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session: BoardSession<MockTransport> = BoardSession::new(tx);

        assert!(session.begin_scan());
        assert_eq!(session.state(), ConnectionState::Scanning);
        session.finish_scan();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session
            .connect(MockTransport::new(pint_script()), "Onewheel Pint")
            .await
            .unwrap();
        assert!(!session.begin_scan());
        assert_eq!(session.state(), ConnectionState::Authenticated);
    }

    #[tokio::test]
    async fn watchdog_tears_the_session_down_on_link_loss() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new(pint_script());
        let mut session = BoardSession::new(tx);
        session
            .connect(transport.clone(), "Onewheel Pint")
            .await
            .unwrap();

        transport.drop_link();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(12);
        while session.state() != ConnectionState::Disconnected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "watchdog never fired"
            );
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(matches!(
            session.diagnostics().last_error,
            Some(BoardError::WatchdogDisconnect)
        ));
    }
}
