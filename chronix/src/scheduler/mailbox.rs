use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::Weak;

use tracing::trace;

use crate::component::{PortId, Token};
use crate::time::{MonotonicTime, Tag};

use super::{Event, PortRef, Shared};

/// Per-input-port buffer of delivered tokens.
///
/// A mailbox only ever contains tokens whose trigger event was already
/// dequeued by the firing round of their tag: tokens produced by an upstream
/// component or an [`InputHandle`] are invisible to the destination component
/// until the schedule has advanced to them.
#[derive(Debug)]
pub(crate) struct Mailbox<T> {
    channels: Vec<VecDeque<T>>,
}

impl<T> Mailbox<T> {
    /// Creates a mailbox with the specified number of channels.
    pub(crate) fn new(width: usize) -> Self {
        Self {
            channels: (0..width).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Makes a token visible on the specified channel.
    pub(crate) fn deliver(&mut self, channel: usize, value: T) {
        self.channels[channel].push_back(value);
    }

    /// Returns `true` if a token is visible on the specified channel.
    pub(crate) fn has_token(&self, channel: usize) -> bool {
        !self.channels[channel].is_empty()
    }

    /// Removes and returns the oldest visible token of the specified channel.
    pub(crate) fn take(&mut self, channel: usize) -> Option<T> {
        self.channels[channel].pop_front()
    }

    /// Returns a reference to the oldest visible token of the specified
    /// channel.
    pub(crate) fn peek(&self, channel: usize) -> Option<&T> {
        self.channels[channel].front()
    }

    /// Returns `true` if no channel holds a token.
    pub(crate) fn is_drained(&self) -> bool {
        self.channels.iter().all(|c| c.is_empty())
    }

    /// Discards all tokens.
    pub(crate) fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
    }
}

/// Producer handle to one input port of a scheduled network.
///
/// An `InputHandle` is obtained with
/// [`Scheduler::input_handle()`](super::Scheduler::input_handle). It can be
/// cloned and moved to other threads, e.g. to inject externally produced
/// values into a running schedule.
///
/// [`put()`](InputHandle::put) is fire-and-forget: it enqueues a trigger
/// event at the current tag and returns immediately. The value is delivered
/// to the destination component only when the scheduler processes that tag,
/// so a component always observes its inputs in tag order.
pub struct InputHandle<T: Token> {
    pub(crate) shared: Weak<Shared<T>>,
    pub(crate) port: PortId,
    pub(crate) width: usize,
}

impl<T: Token> InputHandle<T> {
    /// Enqueues a trigger event carrying the value at the current tag.
    ///
    /// If the destination component was disabled, the value is silently
    /// dropped.
    pub fn put(&self, channel: usize, value: T) -> Result<(), SendError> {
        if channel >= self.width {
            return Err(SendError::InvalidChannel);
        }
        let shared = self.shared.upgrade().ok_or(SendError::Disconnected)?;
        let mut core = shared.core.lock().unwrap();

        if core.disabled.contains(&self.port.component) {
            trace!(port = ?self.port, "dropping token for a disabled component");
            return Ok(());
        }
        let depth = core
            .depths
            .as_ref()
            .and_then(|d| d.port_rank(self.port))
            // A pre-ordering placeholder; the queue is re-ranked before the
            // event can be processed.
            .unwrap_or(0);
        let tag = Tag::new(core.tag.time, core.tag.microstep, depth);
        let event = Event {
            dest: self.port.component,
            port: Some(PortRef {
                input: self.port.index,
                channel,
            }),
            payload: Some(value),
        };
        if core.queue.put(tag, event) {
            shared.cond.notify_all();
        }

        Ok(())
    }

    /// Enqueues a trigger event at the specified future-or-present timestamp.
    ///
    /// Used for boundary transfers into an embedded schedule, whose local
    /// time may lag behind the time of the delivered value.
    pub(crate) fn put_at(
        &self,
        channel: usize,
        value: T,
        time: MonotonicTime,
    ) -> Result<(), SendError> {
        if channel >= self.width {
            return Err(SendError::InvalidChannel);
        }
        let shared = self.shared.upgrade().ok_or(SendError::Disconnected)?;
        let mut core = shared.core.lock().unwrap();

        if time < core.tag.time {
            return Err(SendError::PastTime);
        }
        if core.disabled.contains(&self.port.component) {
            trace!(port = ?self.port, "dropping token for a disabled component");
            return Ok(());
        }
        let microstep = if time == core.tag.time {
            core.tag.microstep
        } else {
            0
        };
        let depth = core
            .depths
            .as_ref()
            .and_then(|d| d.port_rank(self.port))
            .unwrap_or(0);
        let tag = Tag::new(time, microstep, depth);
        let event = Event {
            dest: self.port.component,
            port: Some(PortRef {
                input: self.port.index,
                channel,
            }),
            payload: Some(value),
        };
        if core.queue.put(tag, event) {
            shared.cond.notify_all();
        }

        Ok(())
    }
}

impl<T: Token> Clone for InputHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            port: self.port,
            width: self.width,
        }
    }
}

impl<T: Token> fmt::Debug for InputHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputHandle")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Error returned when a value could not be handed to a scheduler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendError {
    /// The scheduler was dropped.
    Disconnected,
    /// The channel index exceeds the width of the destination port.
    InvalidChannel,
    /// The specified timestamp lies in the past of the destination schedule.
    PastTime,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "the scheduler is no longer reachable"),
            Self::InvalidChannel => write!(f, "the channel is out of range for the port"),
            Self::PastTime => write!(f, "the timestamp lies in the past of the schedule"),
        }
    }
}

impl Error for SendError {}
