//! Reactive components.
//!
//! # Component trait
//!
//! Every entity driven by the scheduler implements the [`Component`] trait.
//! A component declares its ports once through [`Component::interface()`] and
//! is then invoked through the `prefire`/`fire`/`postfire` protocol:
//!
//! * [`prefire()`](Component::prefire) reports whether the component is ready
//!   to fire; returning `false` skips the firing,
//! * [`fire()`](Component::fire) consumes input tokens and produces output
//!   tokens and/or self-scheduling requests,
//! * [`postfire()`](Component::postfire) commits state; returning `false`
//!   permanently removes the component from the schedule.
//!
//! All three methods receive a [`Context`], the only capability surface a
//! component has while it executes: it exposes the current model time, the
//! tokens delivered to the component's input ports, and the operations that
//! produce outputs or request a future firing.
//!
//! #### Example
//!
//! A component that forwards its input after multiplying it by 2:
//!
//! ```
//! use chronix::component::{Component, Context, Interface};
//!
//! pub struct Multiplier {}
//!
//! impl Component<f64> for Multiplier {
//!     fn interface(&self) -> Interface {
//!         Interface::new().input("value", 1).output("scaled", 1)
//!     }
//!
//!     fn fire(&mut self, ctx: &mut Context<f64>) {
//!         while let Some(value) = ctx.take(0, 0) {
//!             ctx.send(0, 2.0 * value);
//!         }
//!     }
//! }
//! ```
//!
//! # Tokens
//!
//! Components of one network exchange values of a single token type, chosen
//! when the network is assembled. Any `Clone + PartialEq + Send + Debug +
//! 'static` type qualifies; the [`Token`] trait is blanket-implemented and
//! never needs to be implemented by hand. Equality is required because the
//! event queue refuses to enqueue a duplicate of an already-pending trigger
//! event.

use std::fmt;
use std::time::Duration;

use crate::scheduler::mailbox::Mailbox;
use crate::scheduler::SchedulerError;
use crate::time::{MonotonicTime, Tag};

/// Marker trait for types that can be carried by events.
///
/// This trait is blanket-implemented for all eligible types.
pub trait Token: Clone + PartialEq + Send + fmt::Debug + 'static {}

impl<T: Clone + PartialEq + Send + fmt::Debug + 'static> Token for T {}

/// Identifier of a component within its network.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub(crate) usize);

/// Direction of a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PortDirection {
    /// Tokens flow into the component.
    Input,
    /// Tokens flow out of the component.
    Output,
}

/// Identifier of one port of one component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId {
    pub(crate) component: ComponentId,
    pub(crate) direction: PortDirection,
    pub(crate) index: usize,
}

impl PortId {
    /// Returns the component owning this port.
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Returns the direction of this port.
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Returns the index of this port among the ports of the same direction
    /// of its component.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Declaration of a single port: a name used in diagnostics and a channel
/// count.
#[derive(Clone, Debug)]
pub(crate) struct PortSpec {
    pub(crate) name: String,
    pub(crate) width: usize,
}

/// The port declaration of a component.
///
/// An interface lists the input and output ports of a component in the index
/// order used by [`Context`], and carries two scheduling hints:
///
/// * the *non-strict* flag, for components able to fire meaningfully with
///   only a subset of their inputs present. The depth assignment gives all
///   input ports of a non-strict component the same priority so that
///   simultaneous tokens are delivered in a single firing instead of several
///   partial ones;
/// * *delayed* input/output pairs, stating that an output does **not** depend
///   on an input within the same firing round. Declaring the actual delays of
///   a component is what breaks dependency cycles in feedback loops.
#[derive(Clone, Debug, Default)]
pub struct Interface {
    pub(crate) inputs: Vec<PortSpec>,
    pub(crate) outputs: Vec<PortSpec>,
    pub(crate) non_strict: bool,
    pub(crate) delayed: Vec<(usize, usize)>,
}

impl Interface {
    /// Creates an interface with no ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an input port with the specified number of channels.
    ///
    /// # Panics
    ///
    /// Panics if the width is 0.
    pub fn input(mut self, name: impl Into<String>, width: usize) -> Self {
        assert!(width > 0, "a port must have at least one channel");
        self.inputs.push(PortSpec {
            name: name.into(),
            width,
        });

        self
    }

    /// Appends an output port with the specified number of channels.
    ///
    /// # Panics
    ///
    /// Panics if the width is 0.
    pub fn output(mut self, name: impl Into<String>, width: usize) -> Self {
        assert!(width > 0, "a port must have at least one channel");
        self.outputs.push(PortSpec {
            name: name.into(),
            width,
        });

        self
    }

    /// Marks the component as non-strict.
    pub fn non_strict(mut self) -> Self {
        self.non_strict = true;

        self
    }

    /// Declares that the output port at `output` does not depend on the input
    /// port at `input` within the same firing round.
    pub fn delayed(mut self, input: usize, output: usize) -> Self {
        self.delayed.push((input, output));

        self
    }
}

/// Trait implemented by all schedulable components.
///
/// Only [`interface()`](Component::interface) and
/// [`fire()`](Component::fire) are mandatory; `prefire` and `postfire`
/// default to returning `true`.
///
/// When tokens were delivered to the component for the current tag, the
/// `prefire → fire → postfire` cycle is repeated until all delivered tokens
/// are consumed or `prefire` returns `false`; a component that never consumes
/// its tokens therefore never finishes its firing round. A firing caused by a
/// self-scheduling request alone runs the cycle exactly once.
pub trait Component<T: Token>: Send {
    /// Declares the ports of this component.
    ///
    /// This method is called once, when the component is added to a network.
    fn interface(&self) -> Interface;

    /// Returns the time of an initial self-scheduled firing, if the
    /// component needs one before any input can arrive.
    ///
    /// This method is queried once, before the first firing round of the
    /// scheduler hosting the component. Sources with no input ports
    /// typically return their first activation time here instead of relying
    /// on an explicit
    /// [`Scheduler::schedule_at()`](crate::scheduler::Scheduler::schedule_at)
    /// call.
    fn initial_schedule(&self) -> Option<MonotonicTime> {
        None
    }

    /// Reports whether the component is ready to fire at the current tag.
    fn prefire(&mut self, ctx: &mut Context<T>) -> bool {
        let _ = ctx;
        true
    }

    /// Reacts to the tokens delivered to the input ports, or to a
    /// self-scheduling request.
    fn fire(&mut self, ctx: &mut Context<T>);

    /// Commits state after a firing; returning `false` permanently disables
    /// the component.
    fn postfire(&mut self, ctx: &mut Context<T>) -> bool {
        let _ = ctx;
        true
    }
}

/// Deferred effect of a firing, applied by the scheduler once the component
/// call returns.
#[derive(Debug)]
pub(crate) enum Action<T> {
    Send {
        output: usize,
        channel: usize,
        value: T,
    },
    ScheduleSelf {
        time: MonotonicTime,
    },
    Stop,
}

/// Execution context handed to a component while it is being invoked.
///
/// The context exposes the current model time and the component's delivered
/// input tokens, and records the outputs and scheduling requests of the
/// firing. Ports are addressed by their index in the declaration order of the
/// component's [`Interface`].
#[derive(Debug)]
pub struct Context<'a, T: Token> {
    pub(crate) time: MonotonicTime,
    pub(crate) microstep: u64,
    pub(crate) name: &'a str,
    pub(crate) inputs: &'a mut [Mailbox<T>],
    pub(crate) outputs: &'a [PortSpec],
    pub(crate) actions: &'a mut Vec<Action<T>>,
}

impl<'a, T: Token> Context<'a, T> {
    /// Returns the current model time.
    pub fn time(&self) -> MonotonicTime {
        self.time
    }

    /// Returns the microstep of the current firing round.
    pub fn microstep(&self) -> u64 {
        self.microstep
    }

    /// Returns the tag of the current firing round.
    pub fn tag(&self) -> Tag {
        Tag::new(self.time, self.microstep, 0)
    }

    /// Returns `true` if a token is available on the specified input channel.
    ///
    /// # Panics
    ///
    /// Panics if the port index or channel is out of range.
    pub fn has_token(&self, input: usize, channel: usize) -> bool {
        self.inputs[input].has_token(channel)
    }

    /// Removes and returns the oldest token delivered to the specified input
    /// channel, if any.
    ///
    /// # Panics
    ///
    /// Panics if the port index or channel is out of range.
    pub fn take(&mut self, input: usize, channel: usize) -> Option<T> {
        self.inputs[input].take(channel)
    }

    /// Returns a reference to the oldest token delivered to the specified
    /// input channel without removing it.
    ///
    /// # Panics
    ///
    /// Panics if the port index or channel is out of range.
    pub fn peek(&self, input: usize, channel: usize) -> Option<&T> {
        self.inputs[input].peek(channel)
    }

    /// Sends a token on channel 0 of the specified output port.
    ///
    /// The token becomes a trigger event for every input port connected to
    /// the output, scheduled at the current tag with the priority of the
    /// receiving port.
    ///
    /// # Panics
    ///
    /// Panics if the port index is out of range.
    pub fn send(&mut self, output: usize, value: T) {
        self.send_on(output, 0, value);
    }

    /// Sends a token on the specified channel of the specified output port.
    ///
    /// # Panics
    ///
    /// Panics if the port index or channel is out of range.
    pub fn send_on(&mut self, output: usize, channel: usize, value: T) {
        assert!(
            channel < self.outputs[output].width,
            "channel {} is out of range for output port '{}'",
            channel,
            self.outputs[output].name,
        );
        self.actions.push(Action::Send {
            output,
            channel,
            value,
        });
    }

    /// Requests that this component be fired again at the specified time.
    ///
    /// Requesting the current time schedules the firing at the next microstep
    /// of the same timestamp; requesting a future time schedules it at
    /// microstep 0 of that timestamp. Requesting a past time is an error.
    pub fn schedule_at(&mut self, time: MonotonicTime) -> Result<(), SchedulerError> {
        if time < self.time {
            return Err(SchedulerError::PastEvent {
                component: self.name.into(),
                scheduled: time,
                current: self.time,
            });
        }
        self.actions.push(Action::ScheduleSelf { time });

        Ok(())
    }

    /// Requests that this component be fired again after the specified delay.
    ///
    /// A zero delay schedules the firing at the next microstep of the current
    /// timestamp.
    pub fn schedule_in(&mut self, delay: Duration) -> Result<(), SchedulerError> {
        self.schedule_at(self.time + delay)
    }

    /// Requests that the whole schedule stop at the end of the current firing
    /// round.
    pub fn request_stop(&mut self) {
        self.actions.push(Action::Stop);
    }
}
