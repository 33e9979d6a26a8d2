//! Simulation of elapsed time in the simulated system.
use std::time::{Duration, Instant};

use crate::context::Context;

/// Clock is a simulated system clock.  Its run rate may be real-time
/// (i.e. one simulated second per actual wall-clock second) or it may
/// run faster or slower than real-time.
pub trait Clock {
    /// Retrieves the current (simulated) time.
    fn now(&self) -> Duration;

    /// The caller calls `consume` to simulate the passing of a
    /// duration `interval`.
    fn consume(&mut self, interval: &Duration);
}

/// BasicClock provides a simulated clock.
///
/// With a speed multiplier, simulated time keeps pace with real time
/// (scaled by the multiplier) but never runs backward.  Without one,
/// simulated time only moves when the owner advances it, so the
/// simulation runs as fast as the host allows.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use iobus::{BasicClock, Clock};
/// let mut clk = BasicClock::new(None);
/// clk.consume(&Duration::from_micros(12));
/// assert_eq!(clk.now(), Duration::from_micros(12));
/// ```
#[derive(Debug)]
pub struct BasicClock {
    /// Elapsed time as measured by the simulated clock.
    simulator_elapsed: Duration,
    origin: Instant,
    speed_multiplier: Option<f64>,
}

impl BasicClock {
    #[must_use]
    pub fn new(speed_multiplier: Option<f64>) -> BasicClock {
        BasicClock {
            simulator_elapsed: Duration::ZERO,
            origin: Instant::now(),
            speed_multiplier,
        }
    }

    #[must_use]
    pub fn speed_multiplier(&self) -> Option<f64> {
        self.speed_multiplier
    }

    pub fn advance_to_simulated_time(&mut self, when: Duration) {
        if when > self.simulator_elapsed {
            self.simulator_elapsed = when;
        }
    }

    pub fn make_fresh_context(&mut self) -> Context {
        let real_elapsed_time = self.origin.elapsed();
        if let Some(m) = self.speed_multiplier {
            self.advance_to_simulated_time(real_elapsed_time.mul_f64(m));
        }
        Context {
            simulated_time: self.simulator_elapsed,
            real_elapsed_time,
        }
    }

    /// How long, in real time, until the simulated clock reaches
    /// `when`.  A clock without a speed multiplier never waits.
    #[must_use]
    pub fn real_time_until(&self, when: Duration) -> Duration {
        match self.speed_multiplier {
            Some(m) if m > 0.0 => when
                .div_f64(m)
                .saturating_sub(self.origin.elapsed()),
            _ => Duration::ZERO,
        }
    }
}

impl Default for BasicClock {
    fn default() -> Self {
        Self::new(Some(1.0))
    }
}

impl Clock for BasicClock {
    fn now(&self) -> Duration {
        self.simulator_elapsed
    }

    fn consume(&mut self, interval: &Duration) {
        self.simulator_elapsed += *interval;
    }
}

#[test]
fn test_unpaced_clock_only_moves_forward() {
    let mut clk = BasicClock::new(None);
    clk.advance_to_simulated_time(Duration::from_millis(5));
    clk.advance_to_simulated_time(Duration::from_millis(2));
    assert_eq!(clk.now(), Duration::from_millis(5));
    assert_eq!(clk.make_fresh_context().simulated_time, Duration::from_millis(5));
    assert_eq!(clk.real_time_until(Duration::from_secs(100)), Duration::ZERO);
}

#[test]
fn test_paced_clock_waits_for_future_times() {
    let clk = BasicClock::new(Some(1.0));
    let wait = clk.real_time_until(Duration::from_secs(3600));
    assert!(wait > Duration::from_secs(3500));
    assert_eq!(clk.real_time_until(Duration::ZERO), Duration::ZERO);
}
