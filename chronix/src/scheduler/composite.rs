use std::fmt;

use tracing::error;

use crate::component::{Component, Context, Interface, PortId, Token};
use crate::time::MonotonicTime;

use super::{EmptyQueuePolicy, InputHandle, Scheduler, SchedulerError};

/// A component hosting an embedded [`Scheduler`].
///
/// A `Composite` makes a whole scheduled network usable as a single
/// component of an enclosing network. The embedded scheduler is never driven
/// on its own: whenever the enclosing scheduler fires the composite, the
/// embedded schedule is advanced up to the container's model time, and on
/// postfire the composite requests a refire of itself at the time of its
/// earliest remaining event. Each level therefore only ever keeps its own
/// pending events.
///
/// Boundary crossing is explicit: outer input ports are mapped onto input
/// ports of the embedded network with [`map_input()`](Composite::map_input),
/// and exported output ports of the embedded network are surfaced as outer
/// output ports with [`map_output()`](Composite::map_output).
///
/// A composite declares itself non-strict, since its mapped inputs are
/// independent of one another.
pub struct Composite<T: Token> {
    inner: Scheduler<T>,
    inputs: Vec<BoundaryInput<T>>,
    outputs: Vec<BoundaryOutput>,
    /// Set when the embedded schedule failed; the composite then reports
    /// itself dead through `postfire`.
    poisoned: bool,
}

struct BoundaryInput<T: Token> {
    name: String,
    width: usize,
    handle: InputHandle<T>,
}

struct BoundaryOutput {
    name: String,
    width: usize,
    inner_port: PortId,
}

impl<T: Token> Composite<T> {
    /// Wraps a scheduler into a component.
    ///
    /// The scheduler's empty-queue policy is forced to
    /// [`EmptyQueuePolicy::Yield`], and its network is validated so that a
    /// zero-delay cycle in the embedded network surfaces at assembly time.
    pub fn new(mut inner: Scheduler<T>) -> Result<Self, SchedulerError> {
        inner.empty_queue = EmptyQueuePolicy::Yield;
        inner.validate()?;

        Ok(Self {
            inner,
            inputs: Vec::new(),
            outputs: Vec::new(),
            poisoned: false,
        })
    }

    /// Declares an outer input port forwarding to an input port of the
    /// embedded network.
    pub fn map_input(
        mut self,
        name: impl Into<String>,
        inner_input: PortId,
    ) -> Result<Self, SchedulerError> {
        let handle = self.inner.input_handle(inner_input)?;
        let width = handle.width;
        self.inputs.push(BoundaryInput {
            name: name.into(),
            width,
            handle,
        });

        Ok(self)
    }

    /// Declares an outer output port surfacing an output port of the
    /// embedded network.
    ///
    /// The inner port is exported from the embedded network as a side
    /// effect.
    pub fn map_output(
        mut self,
        name: impl Into<String>,
        inner_output: PortId,
    ) -> Result<Self, SchedulerError> {
        self.inner.network.export(inner_output)?;
        let width = self.inner.network.port_width(inner_output);
        self.outputs.push(BoundaryOutput {
            name: name.into(),
            width,
            inner_port: inner_output,
        });

        Ok(self)
    }

    /// Returns a read-only view of the embedded scheduler.
    pub fn inner(&self) -> &Scheduler<T> {
        &self.inner
    }
}

impl<T: Token> Component<T> for Composite<T> {
    fn interface(&self) -> Interface {
        let mut interface = Interface::new().non_strict();
        for input in &self.inputs {
            interface = interface.input(input.name.clone(), input.width);
        }
        for output in &self.outputs {
            interface = interface.output(output.name.clone(), output.width);
        }

        interface
    }

    fn initial_schedule(&self) -> Option<MonotonicTime> {
        // Events pending inside the embedded network at assembly time need a
        // first firing of the container to get a chance to run.
        self.inner.next_time()
    }

    fn fire(&mut self, ctx: &mut Context<T>) {
        if self.poisoned {
            return;
        }
        let time = ctx.time();

        // Hand the outer tokens over at the container's time; the embedded
        // schedule may still lag behind it.
        for (index, input) in self.inputs.iter().enumerate() {
            for channel in 0..input.width {
                while let Some(value) = ctx.take(index, channel) {
                    if input.handle.put_at(channel, value, time).is_err() {
                        self.poisoned = true;
                        return;
                    }
                }
            }
        }

        if let Err(err) = self.inner.process_up_to(time) {
            error!(error = %err, "embedded schedule failed, disabling its container");
            self.poisoned = true;
            return;
        }

        for (port, channel, value) in self.inner.take_exports() {
            if let Some(index) = self.outputs.iter().position(|o| o.inner_port == port) {
                ctx.send_on(index, channel, value);
            }
        }
    }

    fn postfire(&mut self, ctx: &mut Context<T>) -> bool {
        if self.poisoned {
            return false;
        }
        // Keep the per-level queues short: only the earliest remaining inner
        // event is mirrored into the enclosing schedule.
        if let Some(next) = self.inner.next_time() {
            if ctx.schedule_at(next).is_err() {
                return false;
            }
        }

        true
    }
}

impl<T: Token> fmt::Debug for Composite<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composite")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}
