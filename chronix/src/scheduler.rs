//! Discrete-event schedule management.
//!
//! This module contains most notably the [`Network`] assembly registry, the
//! [`Scheduler`] that drives a network in tag order, the [`InputHandle`]
//! producer handle and the [`Composite`] adapter for embedding a scheduler
//! inside a component of another scheduler.
//!
//! # Schedule lifecycle
//!
//! Driving a component network typically comprises the following stages:
//!
//! 1. instantiation of components and their registration in a [`Network`]
//!    with [`Network::add()`],
//! 2. connection of output ports to input ports using the [`PortId`]s handed
//!    out by [`Network::input()`] and [`Network::output()`], and optionally
//!    the designation of boundary outputs with [`Network::export()`],
//! 3. construction of a [`Scheduler`] from the network and a [`Config`],
//! 4. injection of initial events with [`Scheduler::schedule_at()`] or
//!    through [`InputHandle`]s,
//! 5. execution with [`Scheduler::run()`] or stepwise with
//!    [`Scheduler::step()`].
//!
//! # Event ordering
//!
//! Every pending event carries a [`Tag`](crate::time::Tag). The scheduler
//! repeatedly advances to the smallest pending tag and runs one *firing
//! round*: all events of that exact timestamp and microstep are dequeued in
//! depth order and their destination components are invoked. Trigger events
//! become visible in the destination's mailboxes just before it fires, never
//! earlier, so a component observes its inputs strictly in tag order.
//! Within a round, events for the same destination that are adjacent in the
//! queue are delivered together, so a component sees all its simultaneous
//! inputs in a single firing whenever the depth assignment allows it.
//!
//! Events with a fully identical tag are processed in the order in which
//! they were enqueued.
//!
//! # Example
//!
//! A self-scheduling counter whose output is exported:
//!
//! ```
//! use std::time::Duration;
//!
//! use chronix::component::{Component, Context, Interface};
//! use chronix::scheduler::{Config, Network, Scheduler};
//! use chronix::time::MonotonicTime;
//!
//! struct Ticker {
//!     period: Duration,
//!     remaining: u32,
//! }
//!
//! impl Component<u32> for Ticker {
//!     fn interface(&self) -> Interface {
//!         Interface::new().output("tick", 1)
//!     }
//!
//!     fn fire(&mut self, ctx: &mut Context<u32>) {
//!         ctx.send(0, self.remaining);
//!         if self.remaining > 0 {
//!             self.remaining -= 1;
//!             ctx.schedule_in(self.period).unwrap();
//!         }
//!     }
//! }
//!
//! let mut network = Network::new();
//! let ticker = network.add(
//!     Ticker {
//!         period: Duration::from_secs(1),
//!         remaining: 2,
//!     },
//!     "ticker",
//! );
//! network.export(network.output(ticker, 0)).unwrap();
//!
//! let mut scheduler = Scheduler::new(network, Config::default());
//! scheduler.schedule_at(ticker, MonotonicTime::EPOCH).unwrap();
//! scheduler.run().unwrap();
//!
//! let values: Vec<u32> = scheduler
//!     .take_exports()
//!     .into_iter()
//!     .map(|(_, _, value)| value)
//!     .collect();
//! assert_eq!(values, vec![2, 1, 0]);
//! assert_eq!(scheduler.time(), MonotonicTime::EPOCH + Duration::from_secs(2));
//! ```

mod composite;
pub(crate) mod depth;
pub(crate) mod mailbox;

pub use crate::util::calendar_queue::QueueConfig;
pub use composite::Composite;
pub use mailbox::{InputHandle, SendError};

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use slab::Slab;
use tracing::{debug, trace};

use crate::component::{Component, ComponentId, Context, Interface, PortDirection, PortId, Token};
use crate::component::Action;
use crate::time::{Clock, MonotonicTime, NoClock, SyncStatus, Tag};
use crate::util::calendar_queue::CalendarQueue;

use depth::DepthTable;
use mailbox::Mailbox;

/// A pending event.
///
/// The tag is not part of the event itself: it is the key under which the
/// event is held by the queue.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Event<T> {
    /// Destination component.
    pub(crate) dest: ComponentId,
    /// Destination input channel; `None` makes this a pure event.
    pub(crate) port: Option<PortRef>,
    /// Carried token; always present on trigger events, never on pure ones.
    pub(crate) payload: Option<T>,
}

/// Input channel coordinates local to the destination component.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct PortRef {
    pub(crate) input: usize,
    pub(crate) channel: usize,
}

/// A registry of components and their connections.
///
/// A network is an assembly-time object: once handed to
/// [`Scheduler::new()`], further topology changes go through
/// [`Scheduler::connect()`] so that the priority depths can be invalidated
/// along the way.
pub struct Network<T: Token> {
    pub(crate) entries: Slab<ComponentEntry<T>>,
    /// Fan-out of each output channel.
    pub(crate) connections: HashMap<(PortId, usize), Vec<(PortId, usize)>>,
    /// Output ports whose tokens are additionally collected by the scheduler.
    pub(crate) exports: HashSet<PortId>,
    /// Bumped on every topology mutation; stale depth tables are detected by
    /// comparing against it.
    pub(crate) version: u64,
}

pub(crate) struct ComponentEntry<T: Token> {
    /// Taken out while the component is being fired.
    pub(crate) component: Option<Box<dyn Component<T>>>,
    pub(crate) name: String,
    pub(crate) interface: Interface,
    /// One mailbox per input port.
    pub(crate) mailboxes: Vec<Mailbox<T>>,
}

impl<T: Token> Network<T> {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self {
            entries: Slab::new(),
            connections: HashMap::new(),
            exports: HashSet::new(),
            version: 0,
        }
    }

    /// Adds a component to the network.
    ///
    /// The component's [`interface()`](Component::interface) is read once at
    /// this point. The name needs not be unique; it is used to identify the
    /// component in diagnostics.
    pub fn add(&mut self, component: impl Component<T> + 'static, name: impl Into<String>) -> ComponentId {
        let interface = component.interface();
        let mailboxes = interface
            .inputs
            .iter()
            .map(|spec| Mailbox::new(spec.width))
            .collect();
        let key = self.entries.insert(ComponentEntry {
            component: Some(Box::new(component)),
            name: name.into(),
            interface,
            mailboxes,
        });
        self.version += 1;

        ComponentId(key)
    }

    /// Returns the identifier of an input port of a component.
    ///
    /// # Panics
    ///
    /// Panics if the component does not declare an input port at this index.
    pub fn input(&self, component: ComponentId, index: usize) -> PortId {
        let entry = &self.entries[component.0];
        assert!(
            index < entry.interface.inputs.len(),
            "component '{}' has no input port {}",
            entry.name,
            index
        );

        PortId {
            component,
            direction: PortDirection::Input,
            index,
        }
    }

    /// Returns the identifier of an output port of a component.
    ///
    /// # Panics
    ///
    /// Panics if the component does not declare an output port at this index.
    pub fn output(&self, component: ComponentId, index: usize) -> PortId {
        let entry = &self.entries[component.0];
        assert!(
            index < entry.interface.outputs.len(),
            "component '{}' has no output port {}",
            entry.name,
            index
        );

        PortId {
            component,
            direction: PortDirection::Output,
            index,
        }
    }

    /// Returns the name of a component.
    pub fn name(&self, component: ComponentId) -> &str {
        &self.entries[component.0].name
    }

    /// Connects an output port to an input port, channel by channel.
    ///
    /// An output port may feed any number of input ports; every token sent on
    /// it is then delivered to all of them.
    pub fn connect(&mut self, output: PortId, input: PortId) -> Result<(), SchedulerError> {
        self.check_output(output)?;
        self.check_input(input)?;
        let output_width = self.port_width(output);
        let input_width = self.port_width(input);
        if output_width != input_width {
            return Err(SchedulerError::WidthMismatch {
                output: self.port_label(output),
                output_width,
                input: self.port_label(input),
                input_width,
            });
        }
        for channel in 0..output_width {
            self.connections
                .entry((output, channel))
                .or_default()
                .push((input, channel));
        }
        self.version += 1;

        Ok(())
    }

    /// Connects a single channel of an output port to a single channel of an
    /// input port.
    pub fn connect_channel(
        &mut self,
        output: PortId,
        output_channel: usize,
        input: PortId,
        input_channel: usize,
    ) -> Result<(), SchedulerError> {
        self.check_output(output)?;
        self.check_input(input)?;
        if output_channel >= self.port_width(output) {
            return Err(SchedulerError::ChannelOutOfRange {
                port: self.port_label(output),
                channel: output_channel,
            });
        }
        if input_channel >= self.port_width(input) {
            return Err(SchedulerError::ChannelOutOfRange {
                port: self.port_label(input),
                channel: input_channel,
            });
        }
        self.connections
            .entry((output, output_channel))
            .or_default()
            .push((input, input_channel));
        self.version += 1;

        Ok(())
    }

    /// Marks an output port as a boundary output.
    ///
    /// Tokens sent on an exported port are collected by the scheduler and can
    /// be retrieved with [`Scheduler::take_exports()`], in addition to being
    /// forwarded to any connected input port.
    pub fn export(&mut self, output: PortId) -> Result<(), SchedulerError> {
        self.check_output(output)?;
        self.exports.insert(output);

        Ok(())
    }

    fn check_output(&self, port: PortId) -> Result<(), SchedulerError> {
        if port.direction != PortDirection::Output {
            return Err(SchedulerError::NotAnOutput {
                port: self.port_label(port),
            });
        }

        Ok(())
    }

    fn check_input(&self, port: PortId) -> Result<(), SchedulerError> {
        if port.direction != PortDirection::Input {
            return Err(SchedulerError::NotAnInput {
                port: self.port_label(port),
            });
        }

        Ok(())
    }

    fn port_width(&self, port: PortId) -> usize {
        let interface = &self.entries[port.component.0].interface;
        match port.direction {
            PortDirection::Input => interface.inputs[port.index].width,
            PortDirection::Output => interface.outputs[port.index].width,
        }
    }

    /// Returns a `component.port` label for diagnostics.
    pub(crate) fn port_label(&self, port: PortId) -> String {
        let entry = &self.entries[port.component.0];
        let spec = match port.direction {
            PortDirection::Input => &entry.interface.inputs[port.index],
            PortDirection::Output => &entry.interface.outputs[port.index],
        };

        format!("{}.{}", entry.name, spec.name)
    }
}

impl<T: Token> Default for Network<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Token> fmt::Debug for Network<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("components", &self.entries.len())
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

/// Behavior of the scheduler when its event queue runs empty.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EmptyQueuePolicy {
    /// End the run.
    Stop,
    /// Block until another thread enqueues an event or requests a stop.
    Wait,
    /// Return control to the caller; used for schedulers embedded in an
    /// enclosing scheduler.
    Yield,
}

/// Configuration of a [`Scheduler`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Initial model time.
    pub start_time: MonotonicTime,
    /// Model time at which the run ends; events tagged beyond it are left
    /// pending.
    pub stop_time: Option<MonotonicTime>,
    /// Behavior on an empty event queue.
    pub empty_queue: EmptyQueuePolicy,
    /// Event queue tuning.
    pub queue: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_time: MonotonicTime::EPOCH,
            stop_time: None,
            empty_queue: EmptyQueuePolicy::Stop,
            queue: QueueConfig::default(),
        }
    }
}

/// Outcome of a call to [`Scheduler::step()`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// A firing round completed at the returned time and microstep.
    Fired {
        /// Model time of the round.
        time: MonotonicTime,
        /// Microstep of the round.
        microstep: u64,
    },
    /// The run ended.
    Stopped(StopReason),
    /// The queue is empty and the scheduler is configured to yield.
    Yielded,
}

/// Reason for which a run ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The event queue ran empty.
    QueueEmpty,
    /// The earliest pending event lies beyond the configured stop time.
    StopTimeReached,
    /// A stop was requested through a [`StopHandle`] or by a component.
    Requested,
}

/// Internal outcome of the time-advancing phase.
enum Advance {
    Round { time: MonotonicTime, microstep: u64 },
    Stopped(StopReason),
    Idle,
}

/// Shared stop flag.
pub(crate) struct StopSignal {
    stop: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

/// Handle requesting a running scheduler to stop.
///
/// The handle can be cloned and moved to other threads. A stop request
/// unblocks a scheduler waiting on an empty queue as well as a clock pacing
/// to real time, prevents new firing rounds from starting, and can be
/// observed by component-owned threads via
/// [`is_stop_requested()`](StopHandle::is_stop_requested).
pub struct StopHandle {
    signal: Arc<StopSignal>,
    queue_waker: Arc<dyn Fn() + Send + Sync>,
}

impl StopHandle {
    fn new(signal: Arc<StopSignal>, queue_waker: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            signal,
            queue_waker,
        }
    }

    /// Creates a handle that is not attached to any scheduler.
    ///
    /// Useful for driving a [`Clock`](crate::time::Clock) outside of a
    /// scheduler.
    pub(crate) fn unconnected() -> Self {
        Self::new(
            Arc::new(StopSignal {
                stop: AtomicBool::new(false),
                lock: Mutex::new(()),
                cond: Condvar::new(),
            }),
            Arc::new(|| {}),
        )
    }

    /// Requests the scheduler to stop.
    pub fn request_stop(&self) {
        self.signal.stop.store(true, Ordering::Relaxed);
        // Waiters check the flag under their respective mutex; acquiring it
        // before notifying closes the window between their check and their
        // wait.
        {
            let _guard = self.signal.lock.lock().unwrap();
            self.signal.cond.notify_all();
        }
        (self.queue_waker)();
    }

    /// Returns `true` if a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.signal.stop.load(Ordering::Relaxed)
    }

    /// Blocks until the deadline or until a stop is requested, whichever
    /// comes first. Returns `true` if a stop was requested.
    pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
        let mut guard = self.signal.lock.lock().unwrap();
        loop {
            if self.signal.stop.load(Ordering::Relaxed) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (new_guard, _) = self.signal.cond.wait_timeout(guard, deadline - now).unwrap();
            guard = new_guard;
        }
    }
}

impl Clone for StopHandle {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            queue_waker: self.queue_waker.clone(),
        }
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stop_requested", &self.is_stop_requested())
            .finish_non_exhaustive()
    }
}

/// State shared between the scheduler thread and producer handles.
pub(crate) struct Shared<T: Token> {
    pub(crate) core: Mutex<Core<T>>,
    /// Notified on every successful enqueue and on stop requests.
    pub(crate) cond: Condvar,
}

/// The single mutual-exclusion domain of a scheduler: the event queue, the
/// current tag, the priority depths and the disabled-component set are only
/// ever read or written under this lock.
pub(crate) struct Core<T: Token> {
    pub(crate) queue: CalendarQueue<Event<T>>,
    /// Current model time and microstep; the depth field is unused.
    pub(crate) tag: Tag,
    pub(crate) depths: Option<DepthTable>,
    pub(crate) disabled: HashSet<ComponentId>,
    /// Becomes `true` once the first firing round begins. Until then,
    /// scheduling a pure event at the current time does not bump the
    /// microstep, so that initial events run in round 0.
    pub(crate) started: bool,
}

impl<T: Token> Core<T> {
    /// Drops pending events addressed to disabled components.
    fn discard_disabled(&mut self) {
        loop {
            let drop_head = match self.queue.peek() {
                Some((_, event)) => self.disabled.contains(&event.dest),
                None => false,
            };
            if !drop_head {
                return;
            }
            if let Some((_, event)) = self.queue.take() {
                trace!(component = ?event.dest, "discarding event for a disabled component");
            }
        }
    }
}

/// The director of a component network.
///
/// A `Scheduler` owns a [`Network`] and a global event queue, and drives the
/// network in strict tag order: it repeatedly advances model time to the
/// earliest pending event and fires every component with an event at that
/// exact tag, highest priority first.
///
/// The scheduler is driven from one thread, but events may be injected
/// concurrently through [`InputHandle`]s and a run may be interrupted from
/// any thread through a [`StopHandle`].
pub struct Scheduler<T: Token> {
    network: Network<T>,
    shared: Arc<Shared<T>>,
    clock: Box<dyn Clock>,
    stop: StopHandle,
    stop_time: Option<MonotonicTime>,
    empty_queue: EmptyQueuePolicy,
    /// Network version the depth table was computed against.
    depth_version: Option<u64>,
    /// Whether the components' initial self-schedules were collected.
    seeded: bool,
    /// Time of the first processed event.
    first_event: Option<MonotonicTime>,
    exports: Vec<(PortId, usize, T)>,
}

impl<T: Token> Scheduler<T> {
    /// Creates a scheduler for the given network.
    pub fn new(network: Network<T>, config: Config) -> Self {
        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                queue: CalendarQueue::new(config.queue),
                tag: Tag::new(config.start_time, 0, 0),
                depths: None,
                disabled: HashSet::new(),
                started: false,
            }),
            cond: Condvar::new(),
        });
        let signal = Arc::new(StopSignal {
            stop: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        });
        let queue_waker = {
            let shared = shared.clone();
            Arc::new(move || {
                let _guard = shared.core.lock().unwrap();
                shared.cond.notify_all();
            }) as Arc<dyn Fn() + Send + Sync>
        };

        Self {
            network,
            shared,
            clock: Box::new(NoClock::new()),
            stop: StopHandle::new(signal, queue_waker),
            stop_time: config.stop_time,
            empty_queue: config.empty_queue,
            depth_version: None,
            seeded: false,
            first_event: None,
            exports: Vec::new(),
        }
    }

    /// Paces the schedule with the provided [`Clock`].
    ///
    /// If no clock is set, the default [`NoClock`] is used and the schedule
    /// runs as fast as possible.
    pub fn set_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);

        self
    }

    /// Returns the current model time.
    pub fn time(&self) -> MonotonicTime {
        self.shared.core.lock().unwrap().tag.time
    }

    /// Returns the current microstep.
    pub fn microstep(&self) -> u64 {
        self.shared.core.lock().unwrap().tag.microstep
    }

    /// Returns the timestamp of the earliest pending event, if any.
    pub fn next_time(&self) -> Option<MonotonicTime> {
        let mut core = self.shared.core.lock().unwrap();
        core.discard_disabled();

        core.queue.peek().map(|(tag, _)| tag.time)
    }

    /// Returns the time of the first event processed by this scheduler, if
    /// any event was processed yet.
    pub fn first_event_time(&self) -> Option<MonotonicTime> {
        self.first_event
    }

    /// Returns a read-only view of the underlying network.
    pub fn network(&self) -> &Network<T> {
        &self.network
    }

    /// Returns a handle that can stop this scheduler from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Returns a producer handle to the specified input port.
    pub fn input_handle(&self, port: PortId) -> Result<InputHandle<T>, SchedulerError> {
        self.network.check_input(port)?;
        let width = self.network.port_width(port);

        Ok(InputHandle {
            shared: Arc::downgrade(&self.shared),
            port,
            width,
        })
    }

    /// Connects an output port to an input port of the already-scheduled
    /// network.
    ///
    /// The priority depths are recomputed, and the depths of all pending
    /// events re-ranked, before the next firing round.
    pub fn connect(&mut self, output: PortId, input: PortId) -> Result<(), SchedulerError> {
        self.network.connect(output, input)
    }

    /// Eagerly computes the priority depths and collects the components'
    /// initial self-schedules, reporting any zero-delay dependency cycle.
    ///
    /// This is otherwise done lazily before the first firing round.
    pub fn validate(&mut self) -> Result<(), SchedulerError> {
        self.prepare()
    }

    /// Schedules a pure event for the component at the specified time.
    ///
    /// Scheduling at the current model time targets the next microstep of the
    /// current timestamp (or round 0, if no round ran yet); scheduling in the
    /// future targets microstep 0 of that timestamp. Scheduling in the past
    /// is an error.
    pub fn schedule_at(
        &mut self,
        component: ComponentId,
        time: MonotonicTime,
    ) -> Result<(), SchedulerError> {
        self.prepare()?;
        let mut core = self.shared.core.lock().unwrap();
        let enqueued = Self::enqueue_pure_locked(&mut core, &self.network, component, time)?;
        drop(core);
        if enqueued {
            self.shared.cond.notify_all();
        }

        Ok(())
    }

    /// Schedules a pure event for the component at the lapse of the
    /// specified delay.
    ///
    /// A zero delay targets the next microstep of the current timestamp.
    pub fn schedule_in(
        &mut self,
        component: ComponentId,
        delay: Duration,
    ) -> Result<(), SchedulerError> {
        let time = self.time() + delay;

        self.schedule_at(component, time)
    }

    /// Returns all tokens collected on exported ports since the last call.
    ///
    /// Each element carries the exported port, the channel and the token, in
    /// emission order.
    pub fn take_exports(&mut self) -> Vec<(PortId, usize, T)> {
        mem::take(&mut self.exports)
    }

    /// Executes one firing round.
    ///
    /// The call advances model time to the earliest pending event, optionally
    /// paces to the configured clock, and fires every component with an event
    /// at the new tag. With [`EmptyQueuePolicy::Wait`], the call blocks on an
    /// empty queue until an event is enqueued or a stop is requested.
    pub fn step(&mut self) -> Result<StepOutcome, SchedulerError> {
        self.prepare()?;
        match self.advance(None)? {
            Advance::Round { time, microstep } => {
                if let SyncStatus::Interrupted = self.clock.synchronize(time, &self.stop) {
                    return Ok(StepOutcome::Stopped(StopReason::Requested));
                }
                self.fire_round(time, microstep)?;

                Ok(StepOutcome::Fired { time, microstep })
            }
            Advance::Stopped(reason) => Ok(StepOutcome::Stopped(reason)),
            Advance::Idle => Ok(StepOutcome::Yielded),
        }
    }

    /// Executes firing rounds until the run ends.
    ///
    /// With [`EmptyQueuePolicy::Yield`], the first yield ends the run as if
    /// the queue had run empty.
    pub fn run(&mut self) -> Result<StopReason, SchedulerError> {
        loop {
            match self.step()? {
                StepOutcome::Fired { .. } => {}
                StepOutcome::Stopped(reason) => {
                    debug!(reason = ?reason, "run ended");
                    return Ok(reason);
                }
                StepOutcome::Yielded => return Ok(StopReason::QueueEmpty),
            }
        }
    }

    /// Executes all firing rounds with a timestamp not later than the bound,
    /// without blocking and without pacing.
    ///
    /// Returns the timestamp of the earliest event left pending, if any.
    /// This is the driving entry point for embedded schedulers, which are
    /// advanced up to the time of their container's firing.
    pub fn process_up_to(
        &mut self,
        bound: MonotonicTime,
    ) -> Result<Option<MonotonicTime>, SchedulerError> {
        self.prepare()?;
        loop {
            match self.advance(Some(bound))? {
                Advance::Round { time, microstep } => self.fire_round(time, microstep)?,
                Advance::Stopped(_) => return Ok(None),
                Advance::Idle => return Ok(self.next_time()),
            }
        }
    }

    /// Brings the schedule up to date with the network: recomputes stale
    /// priority depths and, once, collects the initial self-schedules
    /// declared by the components.
    fn prepare(&mut self) -> Result<(), SchedulerError> {
        self.ensure_depths()?;
        if self.seeded {
            return Ok(());
        }
        self.seeded = true;
        let requests: Vec<(ComponentId, MonotonicTime)> = self
            .network
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                entry
                    .component
                    .as_ref()
                    .and_then(|c| c.initial_schedule())
                    .map(|time| (ComponentId(key), time))
            })
            .collect();
        if requests.is_empty() {
            return Ok(());
        }
        let mut core = self.shared.core.lock().unwrap();
        for (component, time) in requests {
            Self::enqueue_pure_locked(&mut core, &self.network, component, time)?;
        }
        drop(core);
        self.shared.cond.notify_all();

        Ok(())
    }

    /// Recomputes the depth table if the topology changed, re-ranking all
    /// pending events.
    fn ensure_depths(&mut self) -> Result<(), SchedulerError> {
        let mut core = self.shared.core.lock().unwrap();
        if core.depths.is_some() && self.depth_version == Some(self.network.version) {
            return Ok(());
        }
        let table = depth::compute(&self.network)?;
        core.queue.remap_depths(|_, event| match event.port {
            Some(port_ref) => table
                .port_rank(PortId {
                    component: event.dest,
                    direction: PortDirection::Input,
                    index: port_ref.input,
                })
                .expect("internal scheduling error: a queued trigger event has no rank"),
            None => table
                .component_rank(event.dest)
                .expect("internal scheduling error: a queued pure event has no rank"),
        });
        core.depths = Some(table);
        self.depth_version = Some(self.network.version);

        Ok(())
    }

    /// Advances model time to the earliest pending event.
    ///
    /// With a bound, the call never blocks and reports `Idle` when the
    /// earliest event lies beyond the bound or the queue is empty; without a
    /// bound, the empty-queue behavior follows the configured policy.
    fn advance(&mut self, bound: Option<MonotonicTime>) -> Result<Advance, SchedulerError> {
        enum Next {
            Earliest(Tag, Tag),
            Empty,
        }

        let shared = self.shared.clone();
        let mut guard = shared.core.lock().unwrap();

        loop {
            if self.stop.is_stop_requested() {
                return Ok(Advance::Stopped(StopReason::Requested));
            }
            let next = {
                let core = &mut *guard;
                core.discard_disabled();
                match core.queue.peek() {
                    Some((&tag, _)) => Next::Earliest(tag, core.tag),
                    None => Next::Empty,
                }
            };
            match next {
                Next::Earliest(tag, current) => {
                    if let Some(stop_time) = self.stop_time {
                        if tag.time > stop_time {
                            return Ok(Advance::Stopped(StopReason::StopTimeReached));
                        }
                    }
                    if let Some(bound) = bound {
                        if tag.time > bound {
                            return Ok(Advance::Idle);
                        }
                    }
                    if (tag.time, tag.microstep) < (current.time, current.microstep) {
                        return Err(SchedulerError::MissedEvent {
                            event: tag,
                            current,
                        });
                    }
                    guard.tag = Tag::new(tag.time, tag.microstep, 0);
                    guard.started = true;
                    if self.first_event.is_none() {
                        self.first_event = Some(tag.time);
                    }

                    return Ok(Advance::Round {
                        time: tag.time,
                        microstep: tag.microstep,
                    });
                }
                Next::Empty if bound.is_some() => return Ok(Advance::Idle),
                Next::Empty => match self.empty_queue {
                    EmptyQueuePolicy::Stop => {
                        return Ok(Advance::Stopped(StopReason::QueueEmpty))
                    }
                    EmptyQueuePolicy::Yield => return Ok(Advance::Idle),
                    EmptyQueuePolicy::Wait => {
                        // Spurious wakeups simply re-run the checks above.
                        guard = shared.cond.wait(guard).unwrap();
                    }
                },
            }
        }
    }

    /// Dequeues and processes every event belonging to the specified round.
    fn fire_round(&mut self, time: MonotonicTime, microstep: u64) -> Result<(), SchedulerError> {
        let round = Tag::new(time, microstep, 0);
        debug!(
            time = %DisplaySecs(time),
            microstep,
            "firing round"
        );

        loop {
            // Head of queue, copied out so the lock-free phase below can
            // borrow the network.
            enum Head {
                Batch(ComponentId),
                Done,
                Missed(Tag, Tag),
            }

            let batch: Vec<Event<T>> = {
                let mut core = self.shared.core.lock().unwrap();
                core.discard_disabled();
                let head = match core.queue.peek() {
                    Some((tag, event)) if tag.same_round(&round) => Head::Batch(event.dest),
                    Some((&tag, _)) => {
                        if (tag.time, tag.microstep) < (time, microstep) {
                            Head::Missed(tag, core.tag)
                        } else {
                            Head::Done
                        }
                    }
                    None => Head::Done,
                };
                let dest = match head {
                    Head::Batch(dest) => dest,
                    Head::Done => break,
                    Head::Missed(event, current) => {
                        return Err(SchedulerError::MissedEvent { event, current })
                    }
                };

                // Drain all adjacent same-round events for this destination
                // so they are visible within a single firing.
                let mut batch = Vec::new();
                loop {
                    let more = match core.queue.peek() {
                        Some((tag, event)) => tag.same_round(&round) && event.dest == dest,
                        None => false,
                    };
                    if !more {
                        break;
                    }
                    batch.push(core.queue.take().unwrap().1);
                }
                batch
            };

            let dest = batch[0].dest;
            {
                let entry = self
                    .network
                    .entries
                    .get_mut(dest.0)
                    .expect("internal scheduling error: event for an unknown component");
                for event in batch {
                    if let (Some(port_ref), Some(value)) = (event.port, event.payload) {
                        entry.mailboxes[port_ref.input].deliver(port_ref.channel, value);
                    }
                }
            }

            self.fire_cycle(dest, time, microstep)?;
        }

        Ok(())
    }

    /// Runs the `prefire → fire → postfire` cycle of one component until its
    /// delivered tokens are consumed or it opts out.
    fn fire_cycle(
        &mut self,
        dest: ComponentId,
        time: MonotonicTime,
        microstep: u64,
    ) -> Result<(), SchedulerError> {
        let mut actions: Vec<Action<T>> = Vec::new();
        let mut disabled = false;
        {
            let entry = self
                .network
                .entries
                .get_mut(dest.0)
                .expect("internal scheduling error: firing an unknown component");
            let mut component = entry
                .component
                .take()
                .expect("internal scheduling error: the component is already being fired");

            loop {
                let mut ctx = Context {
                    time,
                    microstep,
                    name: &entry.name,
                    inputs: &mut entry.mailboxes,
                    outputs: &entry.interface.outputs,
                    actions: &mut actions,
                };
                if !component.prefire(&mut ctx) {
                    break;
                }
                component.fire(&mut ctx);
                if !component.postfire(&mut ctx) {
                    disabled = true;
                    break;
                }
                if entry.mailboxes.iter().all(|m| m.is_drained()) {
                    break;
                }
            }

            entry.component = Some(component);
            if disabled {
                for mailbox in &mut entry.mailboxes {
                    mailbox.clear();
                }
            }
        }

        if disabled {
            let mut core = self.shared.core.lock().unwrap();
            core.disabled.insert(dest);
            debug!(
                component = %self.network.entries[dest.0].name,
                "component disabled by postfire"
            );
        }

        self.apply_actions(dest, actions)
    }

    /// Applies the outputs and scheduling requests recorded during a firing.
    fn apply_actions(
        &mut self,
        source: ComponentId,
        actions: Vec<Action<T>>,
    ) -> Result<(), SchedulerError> {
        if actions.is_empty() {
            return Ok(());
        }
        let mut enqueued = false;
        let mut stop_requested = false;
        let mut core = self.shared.core.lock().unwrap();

        for action in actions {
            match action {
                Action::Send {
                    output,
                    channel,
                    value,
                } => {
                    let out_port = PortId {
                        component: source,
                        direction: PortDirection::Output,
                        index: output,
                    };
                    if self.network.exports.contains(&out_port) {
                        self.exports.push((out_port, channel, value.clone()));
                    }
                    let Some(destinations) = self.network.connections.get(&(out_port, channel))
                    else {
                        continue;
                    };
                    for &(in_port, in_channel) in destinations {
                        if core.disabled.contains(&in_port.component) {
                            trace!(
                                port = %self.network.port_label(in_port),
                                "dropping token for a disabled component"
                            );
                            continue;
                        }
                        let depth = core
                            .depths
                            .as_ref()
                            .and_then(|d| d.port_rank(in_port))
                            .ok_or_else(|| SchedulerError::MissingDepth {
                                port: self.network.port_label(in_port),
                            })?;
                        let tag = Tag::new(core.tag.time, core.tag.microstep, depth);
                        let event = Event {
                            dest: in_port.component,
                            port: Some(PortRef {
                                input: in_port.index,
                                channel: in_channel,
                            }),
                            payload: Some(value.clone()),
                        };
                        enqueued |= core.queue.put(tag, event);
                    }
                }
                Action::ScheduleSelf { time } => {
                    enqueued |=
                        Self::enqueue_pure_locked(&mut core, &self.network, source, time)?;
                }
                Action::Stop => stop_requested = true,
            }
        }

        drop(core);
        if enqueued {
            self.shared.cond.notify_all();
        }
        if stop_requested {
            self.stop.request_stop();
        }

        Ok(())
    }

    /// Enqueues a pure event, validating its time against the current tag.
    fn enqueue_pure_locked(
        core: &mut Core<T>,
        network: &Network<T>,
        component: ComponentId,
        time: MonotonicTime,
    ) -> Result<bool, SchedulerError> {
        let current = core.tag;
        if time < current.time {
            return Err(SchedulerError::PastEvent {
                component: network.entries[component.0].name.clone(),
                scheduled: time,
                current: current.time,
            });
        }
        if core.disabled.contains(&component) {
            trace!(
                component = %network.entries[component.0].name,
                "dropping pure event for a disabled component"
            );
            return Ok(false);
        }
        let microstep = if time == current.time {
            if core.started {
                current.microstep + 1
            } else {
                current.microstep
            }
        } else {
            0
        };
        let depth = match core.depths.as_ref() {
            Some(table) => table.component_rank(component).ok_or_else(|| {
                SchedulerError::MissingDepth {
                    port: network.entries[component.0].name.clone(),
                }
            })?,
            // Pre-ordering placeholder; the queue is re-ranked when the
            // depth table is (re)computed.
            None => 0,
        };
        let tag = Tag::new(time, microstep, depth);
        trace!(
            component = %network.entries[component.0].name,
            tag = %tag,
            "scheduling pure event"
        );

        Ok(core.queue.put(
            tag,
            Event {
                dest: component,
                port: None,
                payload: None,
            },
        ))
    }
}

impl<T: Token> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("time", &self.time())
            .finish_non_exhaustive()
    }
}

/// Formats a timestamp as fractional seconds.
struct DisplaySecs(MonotonicTime);

impl fmt::Display for DisplaySecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.0.as_secs(), self.0.subsec_nanos())
    }
}

/// Error raised by scheduling operations.
///
/// All fatal conditions name the offending components and tags so that a
/// misconfigured network can be diagnosed from the message alone.
#[derive(Clone, Debug, PartialEq)]
pub enum SchedulerError {
    /// An event was scheduled strictly in the past of the current model time.
    PastEvent {
        /// Name of the destination component.
        component: String,
        /// Requested timestamp.
        scheduled: MonotonicTime,
        /// Model time at the moment of the request.
        current: MonotonicTime,
    },
    /// The port dependency graph contains a zero-delay cycle, so no firing
    /// priority can make simultaneous events deterministic.
    DependencyCycle {
        /// Names of the components on or downstream of the cycle.
        components: Vec<String>,
    },
    /// The queue yielded an event tagged behind the current model tag.
    MissedEvent {
        /// Tag of the dequeued event.
        event: Tag,
        /// Current model tag.
        current: Tag,
    },
    /// No priority depth is assigned to the destination of an event.
    MissingDepth {
        /// Port or component label.
        port: String,
    },
    /// The port used as a connection source is not an output port.
    NotAnOutput {
        /// Port label.
        port: String,
    },
    /// The port used as a connection destination is not an input port.
    NotAnInput {
        /// Port label.
        port: String,
    },
    /// Two ports of different widths were connected without specifying
    /// channels.
    WidthMismatch {
        /// Output port label.
        output: String,
        /// Output port width.
        output_width: usize,
        /// Input port label.
        input: String,
        /// Input port width.
        input_width: usize,
    },
    /// A channel index exceeds the width of its port.
    ChannelOutOfRange {
        /// Port label.
        port: String,
        /// Offending channel index.
        channel: usize,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PastEvent {
                component,
                scheduled,
                current,
            } => write!(
                f,
                "component '{}' attempted to schedule an event at {}, in the past of the current time {}",
                component,
                DisplaySecs(*scheduled),
                DisplaySecs(*current)
            ),
            Self::DependencyCycle { components } => write!(
                f,
                "zero-delay dependency cycle involving components: {}",
                components.join(", ")
            ),
            Self::MissedEvent { event, current } => write!(
                f,
                "internal scheduling error: dequeued an event tagged {} behind the current tag {}",
                event, current
            ),
            Self::MissingDepth { port } => {
                write!(f, "no priority depth is assigned to '{}'", port)
            }
            Self::NotAnOutput { port } => {
                write!(f, "port '{}' is not an output port", port)
            }
            Self::NotAnInput { port } => {
                write!(f, "port '{}' is not an input port", port)
            }
            Self::WidthMismatch {
                output,
                output_width,
                input,
                input_width,
            } => write!(
                f,
                "cannot connect '{}' ({} channels) to '{}' ({} channels)",
                output, output_width, input, input_width
            ),
            Self::ChannelOutOfRange { port, channel } => {
                write!(f, "channel {} is out of range for port '{}'", channel, port)
            }
        }
    }
}

impl Error for SchedulerError {}
