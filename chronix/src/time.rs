//! Model time, event tags and pacing clocks.
//!
//! This module provides most notably:
//!
//! * [`MonotonicTime`]: a monotonic timestamp based on the [TAI] time
//!   standard, used as model time,
//! * [`Tag`]: the (timestamp, microstep, depth) ordering key of a scheduled
//!   event,
//! * [`Clock`]: a trait for types that can pace a scheduler against wall
//!   time, implemented for instance by [`SystemClock`] and
//!   [`AutoSystemClock`].
//!
//! [TAI]: https://en.wikipedia.org/wiki/International_Atomic_Time

mod clock;
mod tag;

pub use tai_time::MonotonicTime;

pub use clock::{AutoSystemClock, Clock, NoClock, SyncStatus, SystemClock};
pub use tag::Tag;
