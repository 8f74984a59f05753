//! Example: a paced sampling pipeline.
//!
//! This example demonstrates a three-stage pipeline where a sampler emits a
//! ramp signal every 500ms, a gain stage scales it, and the scaled samples
//! are exported to the host program. The schedule runs against a real-time
//! clock sped up 10x so the whole run takes ~0.5s of wall time.
//!
//! ```text
//!                ┌─────────┐      ┌────────┐
//!                │         │      │        │ exported
//!                │ Sampler ├─────▶│  Gain  ├─────────▶
//!                │         │ f64  │        │  f64
//!                └─────────┘      └────────┘
//! ```

use std::time::{Duration, Instant};

use chronix::component::{Component, Context, Interface};
use chronix::scheduler::{Config, Network, Scheduler};
use chronix::time::{MonotonicTime, SystemClock};

/// Emits `count` samples of a unit ramp, one every `period`.
struct Sampler {
    period: Duration,
    count: u32,
    emitted: u32,
}

impl Component<f64> for Sampler {
    fn interface(&self) -> Interface {
        Interface::new().output("sample", 1)
    }

    fn initial_schedule(&self) -> Option<MonotonicTime> {
        Some(MonotonicTime::EPOCH)
    }

    fn fire(&mut self, ctx: &mut Context<f64>) {
        ctx.send(0, f64::from(self.emitted));
        self.emitted += 1;
        if self.emitted < self.count {
            ctx.schedule_in(self.period).unwrap();
        }
    }
}

/// Forwards its input multiplied by a constant.
struct Gain {
    factor: f64,
}

impl Component<f64> for Gain {
    fn interface(&self) -> Interface {
        Interface::new().input("in", 1).output("out", 1)
    }

    fn fire(&mut self, ctx: &mut Context<f64>) {
        while let Some(sample) = ctx.take(0, 0) {
            ctx.send(0, self.factor * sample);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut network = Network::new();
    let sampler = network.add(
        Sampler {
            period: Duration::from_millis(500),
            count: 10,
            emitted: 0,
        },
        "sampler",
    );
    let gain = network.add(Gain { factor: 2.5 }, "gain");
    network
        .connect(network.output(sampler, 0), network.input(gain, 0))
        .unwrap();
    network.export(network.output(gain, 0)).unwrap();

    // Model time runs 10x faster than the wall clock.
    let clock = SystemClock::with_ratio(MonotonicTime::EPOCH, Instant::now(), 10.0);
    let mut scheduler = Scheduler::new(network, Config::default()).set_clock(clock);

    let started = Instant::now();
    scheduler.run().unwrap();
    println!(
        "processed {}s of model time in {:.3}s",
        scheduler.time().as_secs(),
        started.elapsed().as_secs_f64()
    );

    for (_, _, sample) in scheduler.take_exports() {
        println!("sample: {}", sample);
    }
}
