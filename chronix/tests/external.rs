//! External producers, blocking waits, stop requests and component
//! disabling.

use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chronix::component::{Component, Context, Interface};
use chronix::rendezvous::{rendezvous, Host};
use chronix::scheduler::{Config, EmptyQueuePolicy, Network, Scheduler, StopReason};
use chronix::time::MonotonicTime;

fn secs(s: u64) -> MonotonicTime {
    MonotonicTime::EPOCH + Duration::from_secs(s)
}

/// Logs every token it consumes.
struct Collector {
    log: Sender<u64>,
}

impl Component<u64> for Collector {
    fn interface(&self) -> Interface {
        Interface::new().input("in", 1)
    }

    fn fire(&mut self, ctx: &mut Context<u64>) {
        while let Some(value) = ctx.take(0, 0) {
            self.log.send(value).unwrap();
        }
    }
}

#[test]
fn producer_thread_feeds_a_waiting_scheduler() {
    let (log, values) = channel();
    let mut network = Network::new();
    let collector = network.add(Collector { log }, "collector");
    let input = network.input(collector, 0);

    let config = Config {
        empty_queue: EmptyQueuePolicy::Wait,
        ..Default::default()
    };
    let mut scheduler = Scheduler::new(network, config);
    let handle = scheduler.input_handle(input).unwrap();
    let stop = scheduler.stop_handle();

    let producer = thread::spawn(move || {
        for value in [1u64, 2, 3] {
            thread::sleep(Duration::from_millis(10));
            handle.put(0, value).unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        stop.request_stop();
    });

    let started = Instant::now();
    assert_eq!(scheduler.run().unwrap(), StopReason::Requested);
    producer.join().unwrap();

    assert_eq!(values.try_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn stop_request_unblocks_an_empty_wait() {
    let (log, _values) = channel();
    let mut network = Network::new();
    network.add(Collector { log }, "collector");

    let config = Config {
        empty_queue: EmptyQueuePolicy::Wait,
        ..Default::default()
    };
    let mut scheduler = Scheduler::new(network, config);
    let stop = scheduler.stop_handle();

    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stop.request_stop();
    });

    let started = Instant::now();
    assert_eq!(scheduler.run().unwrap(), StopReason::Requested);
    interrupter.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// Reports each firing, then opts out of the schedule on the first
/// `postfire`.
struct OneShot {
    firings: Sender<MonotonicTime>,
}

impl Component<u64> for OneShot {
    fn interface(&self) -> Interface {
        Interface::new().input("in", 1)
    }

    fn fire(&mut self, ctx: &mut Context<u64>) {
        while ctx.take(0, 0).is_some() {}
        self.firings.send(ctx.time()).unwrap();
    }

    fn postfire(&mut self, _: &mut Context<u64>) -> bool {
        false
    }
}

#[test]
fn disabled_component_is_never_fired_again() {
    let (firings_tx, firings) = channel();
    let mut network = Network::new();
    let mortal = network.add(OneShot { firings: firings_tx }, "mortal");
    let input = network.input(mortal, 0);

    let mut scheduler = Scheduler::new(network, Config::default());
    let handle = scheduler.input_handle(input).unwrap();

    // Several activations, the later ones already pending when the first
    // firing disables the component.
    scheduler.schedule_at(mortal, secs(1)).unwrap();
    scheduler.schedule_at(mortal, secs(2)).unwrap();
    scheduler.schedule_at(mortal, secs(3)).unwrap();

    assert_eq!(scheduler.run().unwrap(), StopReason::QueueEmpty);
    assert_eq!(firings.try_iter().collect::<Vec<_>>(), vec![secs(1)]);

    // Tokens offered after the disabling are dropped at enqueue time.
    handle.put(0, 99).unwrap();
    assert_eq!(scheduler.run().unwrap(), StopReason::QueueEmpty);
    assert_eq!(firings.try_iter().count(), 0);
}

/// A source whose values are produced by a dedicated thread, handed over
/// through a rendezvous so that only one side ever runs at a time.
struct ThreadedSource {
    host: Option<Host>,
    worker: Option<thread::JoinHandle<()>>,
    slot: Arc<Mutex<Option<u64>>>,
    remaining: u32,
}

impl ThreadedSource {
    fn new(count: u32) -> Self {
        let (host, guest) = rendezvous();
        let slot = Arc::new(Mutex::new(None));
        let worker_slot = slot.clone();
        let worker = thread::spawn(move || {
            let mut next = 100u64;
            while guest.await_turn().is_ok() {
                *worker_slot.lock().unwrap() = Some(next);
                next += 1;
                if guest.yield_turn().is_err() {
                    break;
                }
            }
        });

        Self {
            host: Some(host),
            worker: Some(worker),
            slot,
            remaining: count,
        }
    }
}

impl Drop for ThreadedSource {
    fn drop(&mut self) {
        // Disconnect the rendezvous first so the worker can wind down.
        self.host = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Component<u64> for ThreadedSource {
    fn interface(&self) -> Interface {
        Interface::new().output("out", 1)
    }

    fn initial_schedule(&self) -> Option<MonotonicTime> {
        Some(MonotonicTime::EPOCH)
    }

    fn fire(&mut self, ctx: &mut Context<u64>) {
        let host = match &self.host {
            Some(host) => host,
            None => return,
        };
        if host.turn().is_err() {
            return;
        }
        if let Some(value) = self.slot.lock().unwrap().take() {
            ctx.send(0, value);
        }
        self.remaining -= 1;
        if self.remaining > 0 {
            ctx.schedule_in(Duration::from_secs(1)).unwrap();
        }
    }
}

#[test]
fn component_thread_rendezvous() {
    let mut network = Network::new();
    let source = network.add(ThreadedSource::new(3), "threaded");
    network.export(network.output(source, 0)).unwrap();

    let mut scheduler = Scheduler::new(network, Config::default());
    assert_eq!(scheduler.run().unwrap(), StopReason::QueueEmpty);

    let values: Vec<u64> = scheduler
        .take_exports()
        .into_iter()
        .map(|(_, _, value)| value)
        .collect();
    assert_eq!(values, vec![100, 101, 102]);
    assert_eq!(scheduler.time(), secs(2));
}
