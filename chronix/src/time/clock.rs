use std::time::{Duration, Instant};

use crate::scheduler::StopHandle;
use crate::time::MonotonicTime;

/// Wall-clock margin below which a paced wait switches from an interruptible
/// condition-variable wait to a high-precision spin sleep.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

/// A type that can pace a scheduler against an external time reference.
///
/// This trait abstracts over different types of clocks, such as
/// as-fast-as-possible and real-time clocks.
///
/// A clock can be attached to a scheduler with
/// [`Scheduler::set_clock()`](crate::scheduler::Scheduler::set_clock).
pub trait Clock: Send {
    /// Blocks until the deadline, or until a stop is requested.
    fn synchronize(&mut self, deadline: MonotonicTime, stop: &StopHandle) -> SyncStatus;
}

/// The synchronization status reported by a clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// The clock reached the deadline.
    Synchronized,
    /// The deadline had already elapsed and lags behind the current clock
    /// time by the duration given in the payload.
    OutOfSync(Duration),
    /// The wait was cut short by a stop request.
    Interrupted,
}

/// A dummy [`Clock`] that ignores synchronization.
///
/// Choosing this clock effectively makes the scheduler run as fast as
/// possible.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoClock {}

impl NoClock {
    /// Constructs a new `NoClock` object.
    pub fn new() -> Self {
        Self {}
    }
}

impl Clock for NoClock {
    /// Returns immediately with status `SyncStatus::Synchronized`.
    fn synchronize(&mut self, _: MonotonicTime, _: &StopHandle) -> SyncStatus {
        SyncStatus::Synchronized
    }
}

/// A real-time [`Clock`] based on the system's monotonic clock.
///
/// The clock maps model time to wall-clock time with a fixed ratio, anchored
/// at a reference point associating a model timestamp to an [`Instant`]. A
/// ratio of 1 runs the model in real time; a ratio of 2 runs it twice as fast
/// as the wall clock.
///
/// The bulk of a paced wait is interruptible by a stop request; only the last
/// fraction of a millisecond is serviced by a spin sleep for precision.
#[derive(Copy, Clone, Debug)]
pub struct SystemClock {
    model_ref: MonotonicTime,
    wall_ref: Instant,
    ratio: f64,
}

impl SystemClock {
    /// Constructs a `SystemClock` running at wall-clock speed, with the
    /// offset between model time and wall-clock time specified by a model
    /// timestamp matched to an [`Instant`].
    ///
    /// The provided reference may lie in the past or in the future.
    pub fn from_instant(model_ref: MonotonicTime, wall_ref: Instant) -> Self {
        Self::with_ratio(model_ref, wall_ref, 1.0)
    }

    /// Constructs a `SystemClock` with the specified model-to-wall-clock time
    /// ratio.
    ///
    /// The ratio is expressed in model seconds per wall-clock second and must
    /// be finite and strictly positive.
    ///
    /// # Panics
    ///
    /// Panics if the ratio is not finite and strictly positive.
    pub fn with_ratio(model_ref: MonotonicTime, wall_ref: Instant, ratio: f64) -> Self {
        assert!(
            ratio.is_finite() && ratio > 0.0,
            "the model-to-wall-clock time ratio must be finite and strictly positive"
        );

        Self {
            model_ref,
            wall_ref,
            ratio,
        }
    }

    /// Maps a model timestamp to its wall-clock deadline.
    ///
    /// Deadlines anterior to the reference are clamped to the reference.
    fn wall_deadline(&self, deadline: MonotonicTime) -> Instant {
        if deadline <= self.model_ref {
            return self.wall_ref;
        }
        let model_delta = deadline.duration_since(self.model_ref);

        self.wall_ref + Duration::from_secs_f64(model_delta.as_secs_f64() / self.ratio)
    }
}

impl Clock for SystemClock {
    /// Blocks until the system time corresponds to the specified model time,
    /// or until a stop is requested.
    fn synchronize(&mut self, deadline: MonotonicTime, stop: &StopHandle) -> SyncStatus {
        let target = self.wall_deadline(deadline);
        let now = Instant::now();

        if now > target {
            return SyncStatus::OutOfSync(now - target);
        }
        if stop.wait_until(target - SPIN_THRESHOLD.min(target - now)) {
            return SyncStatus::Interrupted;
        }
        spin_sleep::sleep(target.saturating_duration_since(Instant::now()));

        SyncStatus::Synchronized
    }
}

/// An automatically initialized real-time [`Clock`] based on the system's
/// monotonic clock.
///
/// This clock is similar to [`SystemClock`] except that the first call to
/// [`synchronize()`](Clock::synchronize) never blocks and implicitly defines
/// the reference time. In other words, the clock starts running on its first
/// invocation.
#[derive(Copy, Clone, Debug)]
pub struct AutoSystemClock {
    inner: Option<SystemClock>,
    ratio: f64,
}

impl AutoSystemClock {
    /// Constructs a new `AutoSystemClock` running at wall-clock speed.
    pub fn new() -> Self {
        Self::with_ratio(1.0)
    }

    /// Constructs a new `AutoSystemClock` with the specified
    /// model-to-wall-clock time ratio.
    ///
    /// # Panics
    ///
    /// Panics if the ratio is not finite and strictly positive.
    pub fn with_ratio(ratio: f64) -> Self {
        assert!(
            ratio.is_finite() && ratio > 0.0,
            "the model-to-wall-clock time ratio must be finite and strictly positive"
        );

        Self { inner: None, ratio }
    }
}

impl Default for AutoSystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for AutoSystemClock {
    /// Initializes the time reference and returns immediately on the first
    /// call, otherwise blocks until the system time corresponds to the
    /// specified model time or until a stop is requested.
    fn synchronize(&mut self, deadline: MonotonicTime, stop: &StopHandle) -> SyncStatus {
        match &mut self.inner {
            None => {
                let now = Instant::now();
                self.inner = Some(SystemClock::with_ratio(deadline, now, self.ratio));

                SyncStatus::Synchronized
            }
            Some(clock) => clock.synchronize(deadline, stop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_system_clock() {
        let t0 = MonotonicTime::EPOCH;
        const TOLERANCE: f64 = 0.005; // [s]

        let stop = StopHandle::unconnected();
        let now = Instant::now();
        let mut clock = SystemClock::from_instant(t0, now);
        let t1 = t0 + Duration::from_millis(200);
        assert_eq!(clock.synchronize(t1, &stop), SyncStatus::Synchronized);
        let elapsed = now.elapsed().as_secs_f64();
        let dt = t1.duration_since(t0).as_secs_f64();

        assert!(
            (dt - elapsed).abs() <= TOLERANCE,
            "Expected t = {:.6}s +/- {:.6}s, measured t = {:.6}s",
            dt,
            TOLERANCE,
            elapsed,
        );
    }

    #[test]
    fn scaled_system_clock() {
        let t0 = MonotonicTime::EPOCH;
        const TOLERANCE: f64 = 0.005; // [s]

        let stop = StopHandle::unconnected();
        let now = Instant::now();
        // Model time runs 4x faster than the wall clock.
        let mut clock = SystemClock::with_ratio(t0, now, 4.0);
        let t1 = t0 + Duration::from_millis(400);
        assert_eq!(clock.synchronize(t1, &stop), SyncStatus::Synchronized);
        let elapsed = now.elapsed().as_secs_f64();

        assert!(
            (0.1 - elapsed).abs() <= TOLERANCE,
            "Expected t = 0.1s +/- {:.6}s, measured t = {:.6}s",
            TOLERANCE,
            elapsed,
        );
    }

    #[test]
    fn elapsed_deadline_reports_out_of_sync() {
        let t0 = MonotonicTime::EPOCH;

        let stop = StopHandle::unconnected();
        let wall_ref = Instant::now() - Duration::from_secs(1);
        let mut clock = SystemClock::from_instant(t0, wall_ref);
        match clock.synchronize(t0 + Duration::from_millis(100), &stop) {
            SyncStatus::OutOfSync(lag) => assert!(lag >= Duration::from_millis(800)),
            status => panic!("unexpected synchronization status: {:?}", status),
        }
    }

    #[test]
    fn stop_request_interrupts_wait() {
        let t0 = MonotonicTime::EPOCH;

        let stop = StopHandle::unconnected();
        let remote = stop.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.request_stop();
        });

        let now = Instant::now();
        let mut clock = SystemClock::from_instant(t0, now);
        let status = clock.synchronize(t0 + Duration::from_secs(60), &stop);
        handle.join().unwrap();

        assert_eq!(status, SyncStatus::Interrupted);
        assert!(now.elapsed() < Duration::from_secs(10));
    }
}
