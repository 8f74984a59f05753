//! A discrete-event scheduling kernel for networks of reactive components.
//!
//! Chronix drives a set of inter-connected components ("actors") in strict
//! time order. It is an in-process library meant to be embedded in a host
//! runtime: the host assembles a network, injects events, and the kernel
//! guarantees that every component observes its inputs in a deterministic,
//! reproducible order, including when many events are simultaneous.
//!
//! The kernel is built around four pieces:
//!
//! * a global event queue implemented as a *calendar queue*, a bucketed
//!   priority queue with expected *O*(1) insertion and extraction and
//!   adaptive rebinning,
//! * a total order over events: the [`Tag`](time::Tag), made of a timestamp,
//!   a *microstep* distinguishing successive firing rounds at one timestamp,
//!   and a *depth* prioritizing simultaneous events,
//! * a depth assigner that topologically sorts the component ports along
//!   their zero-delay data dependencies, rejecting dependency cycles,
//! * the [`Scheduler`](scheduler::Scheduler) proper, which repeatedly
//!   advances model time to the earliest pending event and drives the
//!   `prefire → fire → postfire` protocol of every component with an event
//!   at that tag.
//!
//! # A practical overview
//!
//! Running a model typically involves three distinct activities:
//!
//! 1. the design of components implementing the
//!    [`Component`](component::Component) trait,
//! 2. the assembly of a [`Network`](scheduler::Network) by registering
//!    components and connecting their ports,
//! 3. the execution of the schedule, by stepping or running a
//!    [`Scheduler`](scheduler::Scheduler) while observing exported outputs.
//!
//! A component reacts to *trigger events* (tokens arriving at its input
//! ports) and to *pure events* (self-scheduled activations without a
//! payload). Tokens sent on an output port during a firing become trigger
//! events for all connected input ports, scheduled at the current tag with
//! the priority of the receiving port; a component can also request its own
//! re-activation at the current or a future time. Requesting the current
//! time advances the microstep, so iterative behaviors at one timestamp
//! still execute as a sequence of deterministic rounds.
//!
//! External threads interact with a running schedule through two handles:
//! an [`InputHandle`](scheduler::InputHandle) enqueues tokens for an input
//! port (the destination component only sees them once the schedule reaches
//! their tag), and a [`StopHandle`](scheduler::StopHandle) requests a stop,
//! unblocking any wait in progress.
//!
//! By default a schedule runs as fast as possible. It can instead be paced
//! against wall-clock time by attaching a [`Clock`](time::Clock) such as
//! [`SystemClock`](time::SystemClock), which maps model time to wall time
//! with a fixed ratio.
//!
//! Hierarchical models embed a whole scheduler inside a component of another
//! scheduler using [`Composite`](scheduler::Composite); the embedded
//! schedule advances only while its container fires and mirrors its earliest
//! pending event into the enclosing schedule.
//!
//! # Example
//!
//! A source component feeding a doubling filter, with the filter's output
//! exported:
//!
//! ```
//! use std::time::Duration;
//!
//! use chronix::component::{Component, Context, Interface};
//! use chronix::scheduler::{Config, Network, Scheduler};
//! use chronix::time::MonotonicTime;
//!
//! /// Emits the values 1..=3, one second apart.
//! struct Source {
//!     next: u64,
//! }
//!
//! impl Component<u64> for Source {
//!     fn interface(&self) -> Interface {
//!         Interface::new().output("out", 1)
//!     }
//!
//!     fn initial_schedule(&self) -> Option<MonotonicTime> {
//!         Some(MonotonicTime::EPOCH)
//!     }
//!
//!     fn fire(&mut self, ctx: &mut Context<u64>) {
//!         ctx.send(0, self.next);
//!         self.next += 1;
//!         if self.next <= 3 {
//!             ctx.schedule_in(Duration::from_secs(1)).unwrap();
//!         }
//!     }
//! }
//!
//! /// Forwards its input multiplied by 2.
//! struct Doubler {}
//!
//! impl Component<u64> for Doubler {
//!     fn interface(&self) -> Interface {
//!         Interface::new().input("in", 1).output("out", 1)
//!     }
//!
//!     fn fire(&mut self, ctx: &mut Context<u64>) {
//!         while let Some(value) = ctx.take(0, 0) {
//!             ctx.send(0, 2 * value);
//!         }
//!     }
//! }
//!
//! let mut network = Network::new();
//! let source = network.add(Source { next: 1 }, "source");
//! let doubler = network.add(Doubler {}, "doubler");
//! network
//!     .connect(network.output(source, 0), network.input(doubler, 0))
//!     .unwrap();
//! network.export(network.output(doubler, 0)).unwrap();
//!
//! let mut scheduler = Scheduler::new(network, Config::default());
//! scheduler.run().unwrap();
//!
//! let doubled: Vec<u64> = scheduler
//!     .take_exports()
//!     .into_iter()
//!     .map(|(_, _, value)| value)
//!     .collect();
//! assert_eq!(doubled, vec![2, 4, 6]);
//! ```
//!
//! # Determinism and ordering guarantees
//!
//! Events are delivered in non-decreasing tag order: by timestamp, then by
//! microstep, then by the topological depth of the destination. Events with
//! fully identical tags are delivered in the order in which they were
//! enqueued. Because depths are derived from the zero-delay dependency
//! graph, a component always fires after everything that can still influence
//! its inputs at the current tag. This is also why zero-delay feedback
//! loops are rejected outright instead of being resolved arbitrarily.
//!
//! # Modules documentation
//!
//! More information is available in the documentation of the different
//! modules:
//!
//! * the [`component`] module describes the component protocol and the
//!   firing context,
//! * the [`scheduler`] module covers network assembly, the fire loop, stop
//!   handling and hierarchical composition,
//! * the [`time`] module documents model time, tags and pacing clocks,
//! * the [`rendezvous`] module provides the handshake primitive for
//!   components running their own thread.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

pub mod component;
pub mod rendezvous;
pub mod scheduler;
pub mod time;
pub(crate) mod util;
