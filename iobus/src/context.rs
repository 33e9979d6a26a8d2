//! The context in which the I/O system performs a single operation.
//!
//! Every call into the controller (a poll, an action, a
//! reconfiguration) is an opportunity for peripherals to change
//! state.  Peripherals are mostly concerned with how much time would
//! have elapsed on the PDP-8 being simulated: this tells us when the
//! teleprinter would have finished punching a character, when the
//! next disk word passes under the head, and so on.  The caller also
//! keeps track of the actual elapsed time.
//!
//! To avoid confusing these two quantities of the same type, we keep
//! them together in a struct with clear names.
use core::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub simulated_time: Duration,
    pub real_elapsed_time: Duration,
}

impl Context {
    #[must_use]
    pub fn new(simulated_time: Duration, real_elapsed_time: Duration) -> Context {
        Context {
            simulated_time,
            real_elapsed_time,
        }
    }

    /// A context in which simulated and real time are the same.
    /// Mostly useful in tests.
    #[must_use]
    pub fn at(simulated_time: Duration) -> Context {
        Context::new(simulated_time, simulated_time)
    }
}
