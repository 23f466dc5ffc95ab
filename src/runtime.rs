// Zenoh command channel + fixed-rate control loop
//
// Commands arrive on their own task and only ever touch the atomic targets.
// The control loop ticks on a dedicated thread and owns the applied speeds and
// the PWM device, so blocking serial writes never stall the async runtime.
// Health reports go from the control thread to a publisher task through a
// watch channel. Losing a command client (liveliness token gone, or the
// optional watchdog firing) zeroes every target, and the ramp brings the
// motors down.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};
use zenoh::sample::SampleKind;

use crate::command::{CommandError, interpret};
use crate::config::{
    ALIVE_RESPONSE, GREETING, RuntimeConfig, SELF_TEST_DURATION, SELF_TEST_SPEED, TOPIC_ALIVE, TOPIC_CLIENT_PREFIX,
    TOPIC_CLIENTS, TOPIC_CMD, TOPIC_CMD_REPLY, TOPIC_HEALTH,
};
use crate::control::ControlLoop;
use crate::fault::FaultLatch;
use crate::messages::{HealthReport, RuntimeHealth, SpeedSet};
use crate::motor::{MotorDriver, PwmError, PwmOutput, SerialBridge, SimulatedPwm};
use crate::state::{Actuator, HealthCell, TargetSpeeds};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Command-side state: who is connected and when they last spoke
pub struct CommandChannel {
    targets: Arc<TargetSpeeds>,
    health: Arc<HealthCell>,
    clients: HashSet<String>,
    cmd_received_at: Instant,
    command_timeout: Option<Duration>,
}

impl CommandChannel {
    pub fn new(targets: Arc<TargetSpeeds>, health: Arc<HealthCell>, command_timeout: Option<Duration>) -> Self {
        health.set(RuntimeHealth::NoClient);
        Self {
            targets,
            health,
            clients: HashSet::new(),
            cmd_received_at: Instant::now(),
            command_timeout,
        }
    }

    /// Process one incoming command, returning the reply text
    pub fn on_command(&mut self, payload: &[u8], now: Instant) -> String {
        self.cmd_received_at = now;
        let raw = String::from_utf8_lossy(payload);
        debug!("Raw command: [{}]", raw);

        let result = match std::str::from_utf8(payload) {
            Ok(msg) => interpret(msg, &self.targets),
            Err(_) => Err(CommandError::Malformed { msg: raw.to_string() }),
        };
        self.refresh_health();

        match result {
            Ok(ack) => {
                let [left, right, base] = self.targets.snapshot();
                info!("{} (targets: left={}, right={}, base={})", ack, left, right, base);
                ack.to_string()
            }
            Err(e) => {
                warn!("Rejected command [{}]: {}", raw, e);
                e.to_string()
            }
        }
    }

    /// A client declared its liveliness token; returns the greeting
    pub fn on_client_joined(&mut self, id: &str, now: Instant) -> &'static str {
        info!("Command client {} connected", id);
        self.clients.insert(id.to_string());
        self.cmd_received_at = now;
        self.refresh_health();
        GREETING
    }

    /// A client's liveliness token went away
    pub fn on_client_left(&mut self, id: &str) {
        warn!("Command client {} disconnected, stopping all motors", id);
        self.clients.remove(id);
        self.targets.zero_all();
        self.refresh_health();
    }

    /// Fire the fail-safe if a connected client went silent for too long
    pub fn check_watchdog(&mut self, now: Instant) {
        let Some(timeout) = self.command_timeout else {
            return;
        };
        if self.clients.is_empty() || self.health.get() == RuntimeHealth::CmdStale {
            return;
        }

        let cmd_age = now.saturating_duration_since(self.cmd_received_at);
        if cmd_age > timeout {
            warn!("Command stale ({:?} old), stopping all motors", cmd_age);
            self.targets.zero_all();
            self.health.set(RuntimeHealth::CmdStale);
        }
    }

    fn refresh_health(&self) {
        self.health.set(if self.clients.is_empty() {
            RuntimeHealth::NoClient
        } else {
            RuntimeHealth::Ok
        });
    }
}

/// Client id from a liveliness key such as `rover/clients/<id>`
fn client_id(key: &str) -> &str {
    key.strip_prefix(TOPIC_CLIENT_PREFIX)
        .map(|rest| rest.trim_start_matches('/'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(key)
}

/// Open the configured PWM device
fn open_pwm(config: &RuntimeConfig) -> Result<Box<dyn PwmOutput>, PwmError> {
    match &config.bridge_port {
        Some(port) => {
            info!("Opening PWM bridge on {}", port);
            let mut bridge = SerialBridge::open(port, config.bridge_baudrate)?;
            if !bridge.ping()? {
                warn!("PWM bridge on {} not responding to ping", port);
                return Err(PwmError::Timeout);
            }
            Ok(Box::new(bridge))
        }
        None => {
            info!("No PWM bridge configured, using simulated outputs");
            Ok(Box::new(SimulatedPwm::new()))
        }
    }
}

/// Boot self-test: run each actuator forward briefly, one at a time
fn self_test<P: PwmOutput>(driver: &mut MotorDriver<P>) -> Result<(), PwmError> {
    for actuator in Actuator::ALL {
        driver.drive(actuator, SELF_TEST_SPEED)?;
        info!(
            "{} moving forward for {} seconds...",
            actuator.label(),
            SELF_TEST_DURATION.as_secs()
        );
        std::thread::sleep(SELF_TEST_DURATION);
        driver.drive(actuator, 0)?;
        info!("{} stopped.", actuator.label());
    }
    Ok(())
}

/// Open, bring up and optionally self-test the PWM device. Blocking.
fn prepare_driver(config: &RuntimeConfig) -> Result<MotorDriver<Box<dyn PwmOutput>>, PwmError> {
    let mut driver = MotorDriver::new(open_pwm(config)?);
    driver.initialize(config.pwm_frequency_hz, config.pwm_resolution_bits)?;

    if config.self_test {
        info!("Running boot self-test");
        self_test(&mut driver)?;
    }
    Ok(driver)
}

/// Destination of serialized health reports
pub trait HealthSink {
    fn publish(&self, json: String) -> impl Future<Output = Result<(), BoxError>> + Send;
}

impl HealthSink for zenoh::pubsub::Publisher<'static> {
    async fn publish(&self, json: String) -> Result<(), BoxError> {
        self.put(json).await
    }
}

/// Publishes health reports; failures are logged once per outage and never
/// end the runtime
pub struct HealthPublisher<S> {
    sink: S,
    latch: FaultLatch,
}

impl<S: HealthSink> HealthPublisher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            latch: FaultLatch::new("Health publish"),
        }
    }

    /// Returns whether the report went out
    pub async fn publish(&mut self, report: &HealthReport) -> bool {
        let outcome = match serde_json::to_string(report) {
            Ok(json) => self.sink.publish(json).await,
            Err(e) => Err(e.into()),
        };
        self.latch.record(outcome);
        !self.latch.is_faulted()
    }
}

/// Publish the latest report whenever the control thread posts one. Ends when
/// the control thread drops its sender.
async fn health_task<S: HealthSink>(mut reports: watch::Receiver<HealthReport>, mut publisher: HealthPublisher<S>) {
    while reports.changed().await.is_ok() {
        let report = *reports.borrow_and_update();
        publisher.publish(&report).await;
    }
}

async fn command_task(
    mut channel: CommandChannel,
    commands: zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
    clients: zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
    replies: zenoh::pubsub::Publisher<'static>,
    watchdog_period: Duration,
) {
    let mut watchdog = interval(watchdog_period);

    loop {
        tokio::select! {
            sample = commands.recv_async() => {
                let Ok(sample) = sample else {
                    warn!("Command subscriber closed");
                    break;
                };
                let payload = sample.payload().to_bytes();
                let reply = channel.on_command(&payload, Instant::now());
                if let Err(e) = replies.put(reply).await {
                    warn!("Failed to publish reply: {}", e);
                }
            }
            sample = clients.recv_async() => {
                let Ok(sample) = sample else {
                    warn!("Liveliness subscriber closed");
                    break;
                };
                let id = client_id(sample.key_expr().as_str());
                match sample.kind() {
                    SampleKind::Put => {
                        let greeting = channel.on_client_joined(id, Instant::now());
                        if let Err(e) = replies.put(greeting).await {
                            warn!("Failed to publish greeting: {}", e);
                        }
                    }
                    SampleKind::Delete => channel.on_client_left(id),
                }
            }
            _ = watchdog.tick() => channel.check_watchdog(Instant::now()),
        }
    }

    // Without a command channel nobody can stop the rover
    channel.targets.zero_all();
}

async fn alive_task(
    queryable: zenoh::query::Queryable<zenoh::handlers::FifoChannelHandler<zenoh::query::Query>>,
) {
    while let Ok(query) = queryable.recv_async().await {
        debug!("Liveness query on {}", query.key_expr());
        if let Err(e) = query.reply(query.key_expr().clone(), ALIVE_RESPONSE).await {
            warn!("Failed to answer liveness query: {}", e);
        }
    }
}

pub async fn run(config: RuntimeConfig) -> Result<(), BoxError> {
    let driver = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || prepare_driver(&config)).await??
    };

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers, subscribers and queryable...");
    let commands = session.declare_subscriber(TOPIC_CMD).await?;
    let clients = session
        .liveliness()
        .declare_subscriber(TOPIC_CLIENTS)
        .history(true)
        .await?;
    let alive = session.declare_queryable(TOPIC_ALIVE).await?;
    let pub_replies = session.declare_publisher(TOPIC_CMD_REPLY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let targets = Arc::new(TargetSpeeds::new());
    let health = Arc::new(HealthCell::new(RuntimeHealth::NoClient));
    let channel = CommandChannel::new(Arc::clone(&targets), Arc::clone(&health), config.command_timeout());

    let (report_tx, report_rx) = watch::channel(HealthReport {
        health: health.get(),
        target: SpeedSet::default(),
        applied: SpeedSet::default(),
        output_fault: false,
    });

    let command_handle = tokio::spawn(command_task(
        channel,
        commands,
        clients,
        pub_replies,
        config.tick_period(),
    ));
    let alive_handle = tokio::spawn(alive_task(alive));
    let health_handle = tokio::spawn(health_task(report_rx, HealthPublisher::new(pub_health)));

    let control = ControlLoop::new(driver, Arc::clone(&targets), &config);
    let stop = Arc::new(AtomicBool::new(false));
    let control_thread = {
        let stop = Arc::clone(&stop);
        let targets = Arc::clone(&targets);
        let period = config.tick_period();
        std::thread::Builder::new()
            .name("control".to_string())
            .spawn(move || {
                control.run(period, &stop, |control, applied| {
                    report_tx.send_replace(HealthReport {
                        health: health.get(),
                        target: targets.snapshot().into(),
                        applied: applied.into(),
                        output_fault: control.output_fault(),
                    });
                })
            })?
    };

    info!(
        "Runtime started: {}Hz loop, ramp step {}, deadzone {}",
        config.loop_hz, config.ramp_step, config.deadzone_min
    );
    if let Some(timeout) = config.command_timeout() {
        info!("Command watchdog: {}ms", timeout.as_millis());
    }
    info!("Subscribed to: {}, {}", TOPIC_CMD, TOPIC_CLIENTS);
    info!("Publishing to: {}, {}", TOPIC_CMD_REPLY, TOPIC_HEALTH);

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");

    command_handle.abort();
    alive_handle.abort();
    targets.zero_all();
    stop.store(true, Ordering::Relaxed);
    match tokio::task::spawn_blocking(move || control_thread.join()).await {
        Ok(Ok(_ticks)) => {}
        Ok(Err(_)) => warn!("Control thread panicked"),
        Err(e) => warn!("Failed to join control thread: {}", e),
    }
    // Sender is gone with the control thread, so this drains and returns
    if let Err(e) = health_handle.await {
        warn!("Health task failed: {}", e);
    }
    session.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(timeout: Option<Duration>) -> (CommandChannel, Arc<TargetSpeeds>, Arc<HealthCell>) {
        let targets = Arc::new(TargetSpeeds::new());
        let health = Arc::new(HealthCell::new(RuntimeHealth::Ok));
        let channel = CommandChannel::new(Arc::clone(&targets), Arc::clone(&health), timeout);
        (channel, targets, health)
    }

    #[test]
    fn test_starts_without_client() {
        let (_channel, _targets, health) = channel(None);
        assert_eq!(health.get(), RuntimeHealth::NoClient);
    }

    #[test]
    fn test_command_replies() {
        let (mut channel, targets, _health) = channel(None);
        let now = Instant::now();

        assert_eq!(
            channel.on_command(b"forward:100", now),
            "VALID FORWARD COMMAND --- forward:100"
        );
        assert_eq!(targets.snapshot(), [100, 100, 0]);

        assert_eq!(
            channel.on_command(b"leftTrack:300", now),
            "INVALID COMMAND --- leftTrack:300"
        );
        assert_eq!(
            channel.on_command(b"hello", now),
            "MALFORMED COMMAND --- NO \":\" GIVEN"
        );
        assert_eq!(targets.snapshot(), [100, 100, 0]);
    }

    #[test]
    fn test_non_utf8_payload_is_malformed() {
        let (mut channel, targets, _health) = channel(None);
        let reply = channel.on_command(&[0xFF, b':', b'1'], Instant::now());
        assert_eq!(reply, "MALFORMED COMMAND --- NO \":\" GIVEN");
        assert_eq!(targets.snapshot(), [0, 0, 0]);
    }

    #[test]
    fn test_connect_greets_and_disconnect_stops() {
        let (mut channel, targets, health) = channel(None);
        let now = Instant::now();

        assert_eq!(channel.on_client_joined("teleop", now), GREETING);
        assert_eq!(health.get(), RuntimeHealth::Ok);

        channel.on_command(b"leftTrack:200", now);
        channel.on_command(b"base:-120", now);
        channel.on_client_left("teleop");

        assert_eq!(targets.snapshot(), [0, 0, 0]);
        assert_eq!(health.get(), RuntimeHealth::NoClient);
    }

    #[test]
    fn test_unknown_client_leaving_still_stops() {
        let (mut channel, targets, _health) = channel(None);
        channel.on_command(b"forward:90", Instant::now());
        channel.on_client_left("ghost");
        assert_eq!(targets.snapshot(), [0, 0, 0]);
    }

    #[test]
    fn test_watchdog_disabled_by_default() {
        let (mut channel, targets, health) = channel(None);
        let start = Instant::now();
        channel.on_client_joined("teleop", start);
        channel.on_command(b"forward:90", start);

        channel.check_watchdog(start + Duration::from_secs(3600));
        assert_eq!(targets.snapshot(), [90, 90, 0]);
        assert_eq!(health.get(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_watchdog_stops_silent_client() {
        let (mut channel, targets, health) = channel(Some(Duration::from_millis(250)));
        let start = Instant::now();
        channel.on_client_joined("teleop", start);
        channel.on_command(b"forward:90", start);

        channel.check_watchdog(start + Duration::from_millis(200));
        assert_eq!(targets.snapshot(), [90, 90, 0]);

        channel.check_watchdog(start + Duration::from_millis(300));
        assert_eq!(targets.snapshot(), [0, 0, 0]);
        assert_eq!(health.get(), RuntimeHealth::CmdStale);

        // Next command brings the channel back
        channel.on_command(b"base:70", start + Duration::from_millis(400));
        assert_eq!(health.get(), RuntimeHealth::Ok);
        assert_eq!(targets.snapshot(), [0, 0, 70]);
    }

    #[test]
    fn test_watchdog_ignores_clientless_commands() {
        let (mut channel, targets, health) = channel(Some(Duration::from_millis(250)));
        let start = Instant::now();
        channel.on_command(b"forward:90", start);
        channel.check_watchdog(start + Duration::from_secs(1));
        assert_eq!(targets.snapshot(), [90, 90, 0]);
        assert_eq!(health.get(), RuntimeHealth::NoClient);
    }

    #[derive(Default)]
    struct RecordingSink {
        down: AtomicBool,
        attempts: std::sync::atomic::AtomicUsize,
        published: std::sync::Mutex<Vec<String>>,
    }

    impl HealthSink for RecordingSink {
        async fn publish(&self, json: String) -> Result<(), BoxError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            if self.down.load(Ordering::Relaxed) {
                return Err("session closed".into());
            }
            self.published.lock().unwrap().push(json);
            Ok(())
        }
    }

    fn report(applied: i16) -> HealthReport {
        HealthReport {
            health: RuntimeHealth::Ok,
            target: SpeedSet::from([100, 100, 0]),
            applied: SpeedSet::from([applied, applied, 0]),
            output_fault: false,
        }
    }

    #[tokio::test]
    async fn test_health_publish_failure_is_latched_not_fatal() {
        let mut publisher = HealthPublisher::new(RecordingSink::default());
        assert!(publisher.publish(&report(3)).await);

        publisher.sink.down.store(true, Ordering::Relaxed);
        assert!(!publisher.publish(&report(6)).await);
        assert!(!publisher.publish(&report(9)).await);
        assert!(publisher.latch.is_faulted());

        publisher.sink.down.store(false, Ordering::Relaxed);
        assert!(publisher.publish(&report(12)).await);
        assert!(!publisher.latch.is_faulted());

        assert_eq!(publisher.sink.attempts.load(Ordering::Relaxed), 4);
        let published = publisher.sink.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert!(published[1].contains(r#""left_track":12"#));
    }

    #[tokio::test]
    async fn test_health_task_outlives_failing_sink() {
        let sink = RecordingSink::default();
        sink.down.store(true, Ordering::Relaxed);
        let (tx, rx) = watch::channel(report(0));
        tx.send_replace(report(3));
        drop(tx);

        // Returns once the sender is gone, after trying the pending report
        health_task(rx, HealthPublisher::new(sink)).await;
    }

    #[test]
    fn test_client_id_from_key() {
        assert_eq!(client_id("rover/clients/abc123"), "abc123");
        assert_eq!(client_id("rover/clients/teleop/1"), "teleop/1");
        assert_eq!(client_id("elsewhere/x"), "elsewhere/x");
    }
}
