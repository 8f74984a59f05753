//! Event ordering and microstep semantics.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

use chronix::component::{Component, Context, Interface};
use chronix::scheduler::{Config, Network, Scheduler, SchedulerError, StopReason};
use chronix::time::MonotonicTime;

fn secs(s: u64) -> MonotonicTime {
    MonotonicTime::EPOCH + Duration::from_secs(s)
}

/// A component without ports that reports every firing.
struct Reporter {
    log: Sender<(MonotonicTime, u64)>,
}

impl Component<i32> for Reporter {
    fn interface(&self) -> Interface {
        Interface::new()
    }

    fn fire(&mut self, ctx: &mut Context<i32>) {
        self.log.send((ctx.time(), ctx.microstep())).unwrap();
    }
}

#[test]
fn events_fire_in_time_order() {
    let (log, firings) = channel();
    let mut network = Network::new();
    let reporter = network.add(Reporter { log }, "reporter");

    let mut scheduler = Scheduler::new(network, Config::default());
    // Queue the activations out of order.
    scheduler.schedule_at(reporter, secs(3)).unwrap();
    scheduler.schedule_at(reporter, secs(1)).unwrap();
    scheduler.schedule_at(reporter, secs(2)).unwrap();

    assert_eq!(scheduler.run().unwrap(), StopReason::QueueEmpty);

    let times: Vec<MonotonicTime> = firings.try_iter().map(|(t, _)| t).collect();
    assert_eq!(times, vec![secs(1), secs(2), secs(3)]);
    assert_eq!(scheduler.time(), secs(3));
}

/// An input-less source that sends a single value when fired.
struct Impulse {
    value: i32,
}

impl Component<i32> for Impulse {
    fn interface(&self) -> Interface {
        Interface::new().output("out", 1)
    }

    fn fire(&mut self, ctx: &mut Context<i32>) {
        ctx.send(0, self.value);
    }
}

/// Consumes tokens, reports each firing, and re-schedules itself once at the
/// current time.
struct EchoTwice {
    log: Sender<(&'static str, MonotonicTime, u64)>,
    rescheduled: bool,
}

impl Component<i32> for EchoTwice {
    fn interface(&self) -> Interface {
        Interface::new().input("in", 1)
    }

    fn fire(&mut self, ctx: &mut Context<i32>) {
        while ctx.take(0, 0).is_some() {}
        self.log.send(("echo", ctx.time(), ctx.microstep())).unwrap();
        if !self.rescheduled {
            self.rescheduled = true;
            ctx.schedule_at(ctx.time()).unwrap();
        }
    }
}

#[test]
fn rescheduling_at_current_time_advances_microstep() {
    let (log, firings) = channel();
    let mut network = Network::new();
    let source = network.add(Impulse { value: 1 }, "source");
    let echo = network.add(
        EchoTwice {
            log,
            rescheduled: false,
        },
        "echo",
    );
    network
        .connect(network.output(source, 0), network.input(echo, 0))
        .unwrap();

    let mut scheduler = Scheduler::new(network, Config::default());
    // An initial event at the start time runs in round 0, not round 1.
    scheduler.schedule_at(source, MonotonicTime::EPOCH).unwrap();
    scheduler.run().unwrap();

    let firings: Vec<(&str, MonotonicTime, u64)> = firings.try_iter().collect();
    assert_eq!(
        firings,
        vec![
            ("echo", MonotonicTime::EPOCH, 0),
            ("echo", MonotonicTime::EPOCH, 1),
        ]
    );
    // Time never advanced: both rounds happened at the start timestamp.
    assert_eq!(scheduler.time(), MonotonicTime::EPOCH);
    assert_eq!(scheduler.microstep(), 1);
}

/// Logs every token it consumes.
struct Collector {
    log: Sender<(MonotonicTime, i32)>,
}

impl Component<i32> for Collector {
    fn interface(&self) -> Interface {
        Interface::new().input("in", 1)
    }

    fn fire(&mut self, ctx: &mut Context<i32>) {
        while let Some(value) = ctx.take(0, 0) {
            self.log.send((ctx.time(), value)).unwrap();
        }
    }
}

fn collector_bench() -> (Scheduler<i32>, chronix::scheduler::InputHandle<i32>, Receiver<(MonotonicTime, i32)>) {
    let (log, values) = channel();
    let mut network = Network::new();
    let collector = network.add(Collector { log }, "collector");
    let input = network.input(collector, 0);

    let scheduler = Scheduler::new(network, Config::default());
    let handle = scheduler.input_handle(input).unwrap();

    (scheduler, handle, values)
}

#[test]
fn identical_tags_preserve_fifo_order() {
    let (mut scheduler, handle, values) = collector_bench();

    // All three tokens target the same port at the same tag and depth.
    handle.put(0, 10).unwrap();
    handle.put(0, 11).unwrap();
    handle.put(0, 12).unwrap();

    scheduler.run().unwrap();

    let received: Vec<i32> = values.try_iter().map(|(_, v)| v).collect();
    assert_eq!(received, vec![10, 11, 12]);
}

#[test]
fn duplicate_trigger_event_is_enqueued_once() {
    let (mut scheduler, handle, values) = collector_bench();

    // A value-identical token for the same destination at the same tag is
    // dropped by the queue.
    handle.put(0, 42).unwrap();
    handle.put(0, 42).unwrap();

    scheduler.run().unwrap();

    let received: Vec<i32> = values.try_iter().map(|(_, v)| v).collect();
    assert_eq!(received, vec![42]);
}

#[test]
fn run_stops_on_empty_queue_before_stop_time() {
    let (log, firings) = channel();
    let mut network = Network::new();
    let reporter = network.add(Reporter { log }, "reporter");

    let config = Config {
        stop_time: Some(secs(5)),
        ..Default::default()
    };
    let mut scheduler = Scheduler::new(network, config);
    scheduler.schedule_at(reporter, secs(1)).unwrap();
    scheduler.schedule_at(reporter, secs(3)).unwrap();

    // Nothing remains after t=3s: the run ends there, not at the stop time.
    assert_eq!(scheduler.run().unwrap(), StopReason::QueueEmpty);
    assert_eq!(scheduler.time(), secs(3));
    assert_eq!(firings.try_iter().count(), 2);
}

/// Re-schedules itself forever with a fixed period.
struct Metronome {
    period: Duration,
    log: Sender<MonotonicTime>,
}

impl Component<i32> for Metronome {
    fn interface(&self) -> Interface {
        Interface::new()
    }

    fn initial_schedule(&self) -> Option<MonotonicTime> {
        Some(MonotonicTime::EPOCH)
    }

    fn fire(&mut self, ctx: &mut Context<i32>) {
        self.log.send(ctx.time()).unwrap();
        ctx.schedule_in(self.period).unwrap();
    }
}

#[test]
fn stop_time_leaves_later_events_pending() {
    let (log, firings) = channel();
    let mut network = Network::new();
    network.add(
        Metronome {
            period: Duration::from_secs(1),
            log,
        },
        "metronome",
    );

    let config = Config {
        stop_time: Some(secs(3)),
        ..Default::default()
    };
    let mut scheduler = Scheduler::new(network, config);

    assert_eq!(scheduler.run().unwrap(), StopReason::StopTimeReached);
    assert_eq!(scheduler.time(), secs(3));
    // The t=4s activation is still pending, beyond the stop time.
    assert_eq!(scheduler.next_time(), Some(secs(4)));
    assert_eq!(
        firings.try_iter().collect::<Vec<_>>(),
        vec![secs(0), secs(1), secs(2), secs(3)]
    );
}

#[test]
fn scheduling_in_the_past_is_rejected() {
    let (log, _firings) = channel();
    let mut network = Network::new();
    let reporter = network.add(Reporter { log }, "laggard");

    let config = Config {
        start_time: secs(5),
        ..Default::default()
    };
    let mut scheduler = Scheduler::new(network, config);

    match scheduler.schedule_at(reporter, secs(1)) {
        Err(SchedulerError::PastEvent {
            component,
            scheduled,
            current,
        }) => {
            assert_eq!(component, "laggard");
            assert_eq!(scheduled, secs(1));
            assert_eq!(current, secs(5));
        }
        other => panic!("expected a past-event error, got {:?}", other),
    }

    // The diagnostic names the component.
    let error = scheduler.schedule_at(reporter, secs(1)).unwrap_err();
    assert!(error.to_string().contains("laggard"));
}

#[test]
fn first_event_time_is_latched() {
    let (log, _firings) = channel();
    let mut network = Network::new();
    let reporter = network.add(Reporter { log }, "reporter");

    let mut scheduler = Scheduler::new(network, Config::default());
    assert_eq!(scheduler.first_event_time(), None);

    scheduler.schedule_at(reporter, secs(2)).unwrap();
    scheduler.schedule_at(reporter, secs(7)).unwrap();
    scheduler.run().unwrap();

    assert_eq!(scheduler.first_event_time(), Some(secs(2)));
}
