//! Integration tests for the RoastController → sensor → sink pipeline.
//!
//! Everything runs on virtual time: `MockClock::sleep_until` jumps to
//! the deadline, so a multi-second run finishes instantly and the
//! reading timestamps are exact.

use embassy_sync::signal::Signal;
use futures_lite::future::block_on;

use roastmon::app::controller::{ControllerState, CycleOutcome, RoastController, StopSignal};
use roastmon::app::ports::{BrokerError, SinkLifecycle, SinkPort};
use roastmon::app::reading::DeviceState;
use roastmon::config::{BrokerConfig, Configuration, OutputMode};
use roastmon::error::{InitError, SensorFault, SinkError, StartupError};
use roastmon::indicator::{Condition, StatusIndicator};
use roastmon::network::NetworkLink;
use roastmon::sensors::{Max31855, RawFrame};
use roastmon::sinks::BrokerSink;

use crate::mock_hw::{MockBrokerSession, MockClock, MockPin, MockRadio, MockSink, MockSpi};

type Controller<S> = RoastController<S, MockRadio, MockSpi, MockPin, MockClock>;

const OPEN_CIRCUIT: u32 = 0x0001_0001;

fn config() -> Configuration {
    let mut c = Configuration::console("pico01");
    c.read_interval_secs = 1.0;
    c.fault_status_every_n_cycles = 3;
    c
}

fn controller<S: SinkPort>(
    config: &Configuration,
    sink: S,
    radio: Option<MockRadio>,
    spi: MockSpi,
    clock: MockClock,
    pin: MockPin,
) -> Controller<S> {
    let link = radio.map(|r| NetworkLink::new(r, "RoastLab", "beans4ever", config.link_policy));
    RoastController::new(
        config,
        sink,
        link,
        Max31855::new(spi),
        StatusIndicator::new(pin),
        clock,
    )
}

fn broker_config() -> BrokerConfig {
    let mut host = heapless::String::new();
    host.push_str("192.168.1.20").unwrap();
    let mut prefix = heapless::String::new();
    prefix.push_str("icl/roast_monitor").unwrap();
    BrokerConfig {
        host,
        port: 1883,
        username: None,
        password: None,
        topic_prefix: prefix,
        keep_alive_secs: 60,
    }
}

// ── Startup ───────────────────────────────────────────────────

#[test]
fn console_sink_starts_without_network() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(false);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        None,
        MockSpi::steady(21.0),
        MockClock::new(),
        MockPin::default(),
    );

    block_on(ctl.start(&STOP)).unwrap();
    assert_eq!(ctl.state(), ControllerState::Running);
    assert_eq!(ctl.indicator().current(), Condition::Idle);
    assert_eq!(sink.lifecycle(), SinkLifecycle::Active);

    let outcome = block_on(ctl.run_cycle());
    assert!(matches!(outcome, CycleOutcome::Sent(r) if r.temperature_celsius == 21.0));
    assert_eq!(ctl.indicator().current(), Condition::DataSent);
}

#[test]
fn fatal_init_error_cleans_up_and_shows_fault() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(false);
    sink.log.borrow_mut().init_error = Some(InitError::Bind);
    let pin = MockPin::default();
    let clock = MockClock::new().stop_at(2_000, &STOP);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        None,
        MockSpi::steady(21.0),
        clock,
        pin.clone(),
    );

    let err = block_on(ctl.start(&STOP)).unwrap_err();
    assert_eq!(err, StartupError::Init(InitError::Bind));
    assert_eq!(ctl.state(), ControllerState::Stopped);
    assert_eq!(sink.log.borrow().cleanups, 1);
    assert_eq!(ctl.indicator().current(), Condition::Fault);

    // The fault pattern keeps blinking until stopped.
    block_on(ctl.hold_fault(&STOP));
    let levels = pin.levels.borrow();
    assert!(levels.contains(&true) && levels.contains(&false));

    // run() after a failed start does nothing.
    drop(levels);
    block_on(ctl.run(&STOP));
    assert_eq!(sink.log.borrow().cleanups, 1);
    assert!(sink.log.borrow().readings.is_empty());
}

#[test]
fn startup_retries_network_until_up() {
    static STOP: StopSignal = Signal::new();
    // Cold-boot miss, five counted failures, one more, then success.
    let radio = MockRadio::failing(7);
    let sink = MockSink::new(true);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        Some(radio.clone()),
        MockSpi::steady(21.0),
        MockClock::new(),
        MockPin::default(),
    );

    block_on(ctl.start(&STOP)).unwrap();
    assert_eq!(radio.attempts.get(), 8);
    assert_eq!(ctl.state(), ControllerState::Running);
    assert_eq!(ctl.indicator().current(), Condition::JustConnected);
    assert_eq!(sink.lifecycle(), SinkLifecycle::Active);
}

#[test]
fn stop_during_startup_stops_cleanly() {
    static STOP: StopSignal = Signal::new();
    let radio = MockRadio::failing(u32::MAX);
    let sink = MockSink::new(true);
    let clock = MockClock::new().stop_at(60_000, &STOP);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        Some(radio),
        MockSpi::steady(21.0),
        clock,
        MockPin::default(),
    );

    block_on(ctl.start(&STOP)).unwrap();
    assert_eq!(ctl.state(), ControllerState::Stopped);
    block_on(ctl.run(&STOP));
    assert_eq!(sink.log.borrow().cleanups, 1);
    assert!(sink.log.borrow().readings.is_empty());
}

#[test]
fn first_reading_keeps_the_connected_pattern() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(true);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        Some(MockRadio::new()),
        MockSpi::steady(21.0),
        MockClock::new(),
        MockPin::default(),
    );

    block_on(ctl.start(&STOP)).unwrap();
    assert_eq!(ctl.indicator().current(), Condition::JustConnected);
    assert!(matches!(block_on(ctl.run_cycle()), CycleOutcome::Sent(_)));
    assert_eq!(ctl.indicator().current(), Condition::JustConnected);
    assert_eq!(sink.log.borrow().readings.len(), 1);
}

// ── End to end ────────────────────────────────────────────────

#[test]
fn broker_publishes_one_reading_per_cycle() {
    static STOP: StopSignal = Signal::new();
    let mut cfg = config();
    cfg.output_mode = OutputMode::Broker;
    cfg.broker = Some(broker_config());
    let session = MockBrokerSession::new();
    let sink = BrokerSink::new(session.clone(), broker_config(), "pico01");
    let mut ctl = controller(
        &cfg,
        sink,
        Some(MockRadio::new()),
        MockSpi::steady(150.5),
        MockClock::new(),
        MockPin::default(),
    );

    block_on(ctl.start(&STOP)).unwrap();
    block_on(ctl.run_cycle());

    let bodies = session.on_topic("icl/roast_monitor/pico01/temperature");
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains(r#""temperature_c":150.5"#));
    assert!(bodies[0].contains(r#""temperature_f":302.9"#));
    assert!(bodies[0].contains(r#""device_id":"pico01""#));
    assert!(bodies[0].contains(r#""is_valid":true"#));
    assert!(bodies[0].contains(r#""status":"good""#));

    // Shutdown announces offline on the status topic.
    ctl.shutdown();
    let status = session.on_topic("icl/roast_monitor/pico01/status");
    assert!(status.iter().any(|b| b.contains("online")));
    assert!(status.last().unwrap().contains("offline"));
}

#[test]
fn slow_broker_handshake_is_awaited_without_blocking_the_led() {
    static STOP: StopSignal = Signal::new();
    let mut cfg = config();
    cfg.output_mode = OutputMode::Broker;
    cfg.broker = Some(broker_config());
    let session = MockBrokerSession::new();
    session.log.borrow_mut().handshake_polls = 10;
    let sink = BrokerSink::new(session.clone(), broker_config(), "pico01");
    let clock = MockClock::new();
    let pin = MockPin::default();
    let mut ctl = controller(
        &cfg,
        sink,
        Some(MockRadio::new()),
        MockSpi::steady(150.5),
        clock.clone(),
        pin.clone(),
    );

    block_on(ctl.start(&STOP)).unwrap();
    assert_eq!(ctl.state(), ControllerState::Running);
    // Ten 50 ms slices while the broker handshake was pending.
    assert_eq!(clock.now(), 500);
    assert_eq!(session.log.borrow().opens, 1);
    // The connecting pattern kept blinking during the wait.
    let levels = pin.levels.borrow();
    assert!(levels.contains(&true) && levels.contains(&false));
    drop(levels);

    let status = session.on_topic("icl/roast_monitor/pico01/status");
    assert_eq!(status.len(), 1);
    assert!(status[0].contains("online"));
}

// ── Sink failures ─────────────────────────────────────────────

#[test]
fn disconnect_is_retried_once_after_recover() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(true);
    sink.fail_next(&[SinkError::Disconnected]);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        Some(MockRadio::new()),
        MockSpi::steady(180.0),
        MockClock::new(),
        MockPin::default(),
    );
    block_on(ctl.start(&STOP)).unwrap();

    assert!(matches!(block_on(ctl.run_cycle()), CycleOutcome::Sent(_)));
    let log = sink.log.borrow();
    assert_eq!(log.attempts, 2);
    assert_eq!(log.recovers, 1);
    assert_eq!(log.readings.len(), 1);
}

#[test]
fn repeated_disconnects_show_fault_without_stopping() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(true);
    // Each cycle tries twice.
    sink.fail_next(&[SinkError::Disconnected; 6]);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        Some(MockRadio::new()),
        MockSpi::steady(180.0),
        MockClock::new(),
        MockPin::default(),
    );
    block_on(ctl.start(&STOP)).unwrap();

    for n in 1..=3 {
        let outcome = block_on(ctl.run_cycle());
        assert_eq!(outcome, CycleOutcome::DispatchFailed(SinkError::Disconnected));
        assert_eq!(ctl.indicator().current(), Condition::Fault);
        assert_eq!(ctl.state(), ControllerState::Running);
        assert_eq!(ctl.consecutive_errors(), n);
    }
    assert!(sink.log.borrow().readings.is_empty());

    assert!(matches!(block_on(ctl.run_cycle()), CycleOutcome::Sent(_)));
    assert_eq!(ctl.consecutive_errors(), 0);
    assert_eq!(ctl.indicator().current(), Condition::DataSent);
}

#[test]
fn broker_session_loss_three_times_keeps_running() {
    static STOP: StopSignal = Signal::new();
    let mut cfg = config();
    cfg.output_mode = OutputMode::Broker;
    cfg.broker = Some(broker_config());
    let session = MockBrokerSession::new();
    let sink = BrokerSink::new(session.clone(), broker_config(), "pico01");
    let mut ctl = controller(
        &cfg,
        sink,
        Some(MockRadio::new()),
        MockSpi::steady(180.0),
        MockClock::new(),
        MockPin::default(),
    );
    block_on(ctl.start(&STOP)).unwrap();
    assert_eq!(session.log.borrow().opens, 1);

    // Per cycle the reading and the "online" re-announce after the
    // reconnect both lose the session, so the retry never happens.
    session
        .log
        .borrow_mut()
        .fail_publish
        .extend([BrokerError::SessionLost; 6]);

    for n in 1..=3 {
        let outcome = block_on(ctl.run_cycle());
        assert_eq!(outcome, CycleOutcome::DispatchFailed(SinkError::Disconnected));
        assert_eq!(ctl.indicator().current(), Condition::Fault);
        assert_eq!(ctl.state(), ControllerState::Running);
        assert_eq!(ctl.consecutive_errors(), n);
        assert_eq!(ctl.sink().lifecycle(), SinkLifecycle::Degraded);
    }
    assert_eq!(session.log.borrow().opens, 4);
    assert!(session.on_topic("icl/roast_monitor/pico01/temperature").is_empty());

    // The broker comes back: one reconnect and the reading goes out.
    assert!(matches!(block_on(ctl.run_cycle()), CycleOutcome::Sent(_)));
    assert_eq!(ctl.consecutive_errors(), 0);
    assert_eq!(ctl.sink().lifecycle(), SinkLifecycle::Active);
    assert_eq!(session.log.borrow().opens, 5);
    assert_eq!(session.on_topic("icl/roast_monitor/pico01/temperature").len(), 1);
}

#[test]
fn write_failure_is_not_retried() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(false);
    sink.fail_next(&[SinkError::WriteFailed]);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        None,
        MockSpi::steady(180.0),
        MockClock::new(),
        MockPin::default(),
    );
    block_on(ctl.start(&STOP)).unwrap();

    assert_eq!(
        block_on(ctl.run_cycle()),
        CycleOutcome::DispatchFailed(SinkError::WriteFailed)
    );
    assert_eq!(sink.log.borrow().attempts, 1);
    assert_eq!(sink.log.borrow().recovers, 0);
}

// ── Sensor faults ─────────────────────────────────────────────

#[test]
fn fault_status_is_rate_limited() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(false);
    let spi = MockSpi::steady(0.0);
    spi.set_fallback(OPEN_CIRCUIT);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        None,
        spi.clone(),
        MockClock::new(),
        MockPin::default(),
    );
    block_on(ctl.start(&STOP)).unwrap();

    for _ in 0..7 {
        assert_eq!(
            block_on(ctl.run_cycle()),
            CycleOutcome::SensorFault(SensorFault::OpenCircuit)
        );
        assert_eq!(ctl.indicator().current(), Condition::Fault);
    }
    // Faulted cycles 1, 4 and 7 report; nothing reaches output_reading.
    let reasons = sink.status_reasons();
    assert_eq!(reasons, vec![Some("open_circuit"); 3]);
    assert_eq!(sink.log.borrow().attempts, 0);

    spi.set_fallback(RawFrame::from_celsius(200.0).0);
    assert!(matches!(block_on(ctl.run_cycle()), CycleOutcome::Sent(_)));
    let log = sink.log.borrow();
    let last = log.statuses.last().unwrap();
    assert_eq!(last.state, DeviceState::Good);
    assert_eq!(last.reason, Some("recovered"));
}

#[test]
fn bus_error_skips_dispatch() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(false);
    let spi = MockSpi::steady(90.0);
    spi.push_bus_error();
    let mut ctl = controller(
        &config(),
        sink.clone(),
        None,
        spi,
        MockClock::new(),
        MockPin::default(),
    );
    block_on(ctl.start(&STOP)).unwrap();

    assert_eq!(
        block_on(ctl.run_cycle()),
        CycleOutcome::SensorFault(SensorFault::BusError)
    );
    assert!(matches!(block_on(ctl.run_cycle()), CycleOutcome::Sent(_)));
    assert_eq!(sink.log.borrow().readings.len(), 1);
}

// ── Link supervision ──────────────────────────────────────────

#[test]
fn link_drop_degrades_then_recovers() {
    static STOP: StopSignal = Signal::new();
    let radio = MockRadio::new();
    let sink = MockSink::new(true);
    let spi = MockSpi::steady(120.0);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        Some(radio.clone()),
        spi.clone(),
        MockClock::new(),
        MockPin::default(),
    );
    block_on(ctl.start(&STOP)).unwrap();

    radio.drop_link();
    radio.fail_next.set(100);
    let outcome = block_on(ctl.run_cycle());
    assert!(matches!(outcome, CycleOutcome::LinkDown(_)));
    assert_eq!(ctl.state(), ControllerState::Degraded);
    assert_eq!(ctl.indicator().current(), Condition::Fault);
    assert_eq!(spi.reads(), 0);

    radio.fail_next.set(0);
    assert!(matches!(block_on(ctl.run_cycle()), CycleOutcome::Sent(_)));
    assert_eq!(ctl.state(), ControllerState::Running);
    assert_eq!(ctl.indicator().current(), Condition::JustConnected);
    assert_eq!(sink.log.borrow().recovers, 1);
}

// ── Scheduling and shutdown ───────────────────────────────────

#[test]
fn schedule_does_not_drift_with_cycle_cost() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(false);
    let clock = MockClock::new().stop_at(5_000, &STOP);
    let spi = MockSpi::steady(150.0).costing(&clock, 30);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        None,
        spi,
        clock,
        MockPin::default(),
    );

    block_on(ctl.start(&STOP)).unwrap();
    block_on(ctl.run(&STOP));

    assert_eq!(sink.reading_times(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    assert_eq!(ctl.state(), ControllerState::Stopped);
    let log = sink.log.borrow();
    assert_eq!(log.cleanups, 1);
    assert!(log.polls > 0);
    assert_eq!(log.statuses.first().unwrap().reason, Some("starting"));
    let last = log.statuses.last().unwrap();
    assert_eq!(last.reason, Some("shutdown"));
    assert_eq!(last.state, DeviceState::Disconnected);
}

#[test]
fn overrun_skips_missed_ticks() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(false);
    let clock = MockClock::new().stop_at(7_000, &STOP);
    let spi = MockSpi::steady(150.0).costing(&clock, 2_500);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        None,
        spi,
        clock,
        MockPin::default(),
    );

    block_on(ctl.start(&STOP)).unwrap();
    block_on(ctl.run(&STOP));

    assert_eq!(sink.reading_times(), vec![0.0, 3.0, 6.0]);
}

#[test]
fn shutdown_cleans_up_exactly_once() {
    static STOP: StopSignal = Signal::new();
    let sink = MockSink::new(false);
    let mut ctl = controller(
        &config(),
        sink.clone(),
        None,
        MockSpi::steady(150.0),
        MockClock::new(),
        MockPin::default(),
    );
    block_on(ctl.start(&STOP)).unwrap();

    ctl.shutdown();
    ctl.shutdown();
    STOP.signal(());
    block_on(ctl.run(&STOP));

    assert_eq!(sink.log.borrow().cleanups, 1);
    assert_eq!(ctl.state(), ControllerState::Stopped);
}
