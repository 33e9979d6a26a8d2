//! The bus side of the data-break handshake.
//!
//! On the real machine the memory cycles of a data break are carried
//! out by the CPU's timing and memory logic.  `BusResponder` does the
//! same job against a [`CoreMemory`], so that the peripherals can be
//! run without a CPU emulation attached (for example in tests, or by
//! the command-line driver).
//!
//! A three-cycle break works like this:
//!
//! 1. Word count cycle: the word count (in field 0, at the address in
//!    the request) is incremented.  If it becomes zero, the reply
//!    reports word count overflow.
//! 2. Current address cycle: the following word is read and, if the
//!    request says so, incremented first.
//! 3. Break cycle: the word is transferred at the current address in
//!    the field named by the request.
//!
//! A break which touches a field without installed memory is denied.
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use crate::databreak::{DataBreakReply, DataBreakRequest};
use crate::memory::{CoreMemory, MemoryOpFailure};
use crate::regs::{RegisterBus, BREAK_REPLIED, BREAK_REQUESTED, REG_BREAK_CONTROL, REG_BREAK_DATA};

const IDLE_BACKOFF: Duration = Duration::from_micros(20);

fn transfer(
    mem: &mut CoreMemory,
    request: &DataBreakRequest,
) -> Result<DataBreakReply, MemoryOpFailure> {
    let (target, mut overflow) = if request.three_cycle {
        let wc_addr = Address::in_field_zero(request.address);
        let ca_addr = wc_addr.wrapping_next_in_field();
        let (wc, wc_overflow) = mem.peek_word(&wc_addr)?.overflowing_increment();
        mem.poke_word(&wc_addr, wc)?;
        let mut ca = mem.peek_word(&ca_addr)?;
        if request.increment_ca {
            ca = ca.wrapping_add(Unsigned12Bit::ONE);
            mem.poke_word(&ca_addr, ca)?;
        }
        (Address::new(request.field, ca), wc_overflow)
    } else {
        (Address::new(request.field, request.address), false)
    };

    let data = if request.increment_mb {
        let (incremented, carry) = mem.peek_word(&target)?.overflowing_increment();
        mem.poke_word(&target, incremented)?;
        overflow = overflow || carry;
        incremented
    } else if request.write {
        mem.poke_word(&target, request.data)?;
        request.data
    } else {
        mem.peek_word(&target)?
    };
    event!(
        Level::TRACE,
        "break cycle at {}: {} {:04o}",
        target,
        if request.write { "stored" } else { "fetched" },
        data
    );
    Ok(DataBreakReply {
        data,
        word_count_overflow: overflow,
        accepted: true,
    })
}

/// Perform the memory cycles of a data break.
pub fn perform_break(mem: &mut CoreMemory, request: &DataBreakRequest) -> DataBreakReply {
    match transfer(mem, request) {
        Ok(reply) => reply,
        Err(e) => {
            event!(Level::WARN, "denying data break {:?}: {}", request, e);
            DataBreakReply::denied()
        }
    }
}

pub struct BusResponder {
    bus: Arc<dyn RegisterBus>,
    memory: Arc<Mutex<CoreMemory>>,
}

impl BusResponder {
    #[must_use]
    pub fn new(bus: Arc<dyn RegisterBus>, memory: Arc<Mutex<CoreMemory>>) -> BusResponder {
        BusResponder { bus, memory }
    }

    /// Service the pending request, if there is one.  Returns true if
    /// a request was serviced.
    pub fn service_pending(&self) -> bool {
        if self.bus.read(REG_BREAK_CONTROL) != BREAK_REQUESTED {
            return false;
        }
        let request = DataBreakRequest::decode(self.bus.read(REG_BREAK_DATA));
        let reply = {
            let mut mem = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
            perform_break(&mut mem, &request)
        };
        self.bus.write(REG_BREAK_DATA, reply.encode());
        self.bus.write(REG_BREAK_CONTROL, BREAK_REPLIED);
        true
    }

    /// Service requests on a thread of its own until `keep_alive`
    /// becomes false.
    pub fn spawn(self, keep_alive: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("bus-responder".to_string())
            .spawn(move || {
                event!(Level::DEBUG, "bus responder started");
                while keep_alive.load(Ordering::SeqCst) {
                    if !self.service_pending() {
                        thread::sleep(IDLE_BACKOFF);
                    }
                }
                event!(Level::DEBUG, "bus responder stopped");
            })
    }
}

impl Debug for BusResponder {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("BusResponder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConfiguration;

    fn addr(extended: usize) -> Address {
        Address::try_from(extended).expect("test address should be valid")
    }

    fn memory() -> CoreMemory {
        CoreMemory::new(&MemoryConfiguration { fields: 2 })
    }

    #[test]
    fn three_cycle_write_increments_wc_and_ca() {
        let mut mem = memory();
        mem.poke_word(&addr(0o7750), u12!(0o7776)).unwrap(); // -2
        mem.poke_word(&addr(0o7751), u12!(0o0777)).unwrap();
        let req = DataBreakRequest::three_cycle(u12!(0o7750), u3!(1)).into_memory(u12!(0o4321));

        let reply = perform_break(&mut mem, &req);
        assert!(reply.accepted);
        assert!(!reply.word_count_overflow);
        assert_eq!(mem.peek_word(&addr(0o7750)), Ok(u12!(0o7777)));
        assert_eq!(mem.peek_word(&addr(0o7751)), Ok(u12!(0o1000)));
        assert_eq!(mem.peek_word(&addr(0o11000)), Ok(u12!(0o4321)));

        let reply = perform_break(&mut mem, &req);
        assert!(reply.word_count_overflow);
        assert_eq!(mem.peek_word(&addr(0o11001)), Ok(u12!(0o4321)));
    }

    #[test]
    fn three_cycle_read_returns_memory_word() {
        let mut mem = memory();
        mem.poke_word(&addr(0o7754), u12!(0o7700)).unwrap();
        mem.poke_word(&addr(0o7755), u12!(0o0177)).unwrap();
        mem.poke_word(&addr(0o0200), u12!(0o7402)).unwrap();
        let reply = perform_break(&mut mem, &DataBreakRequest::three_cycle(u12!(0o7754), u3!(0)));
        assert!(reply.accepted);
        assert_eq!(reply.data, u12!(0o7402));
    }

    #[test]
    fn three_cycle_without_ca_increment() {
        let mut mem = memory();
        mem.poke_word(&addr(0o7755), u12!(0o0300)).unwrap();
        let req = DataBreakRequest::three_cycle(u12!(0o7754), u3!(0))
            .without_ca_increment()
            .into_memory(u12!(0o12));
        perform_break(&mut mem, &req);
        assert_eq!(mem.peek_word(&addr(0o7755)), Ok(u12!(0o0300)));
        assert_eq!(mem.peek_word(&addr(0o0300)), Ok(u12!(0o12)));
    }

    #[test]
    fn one_cycle_memory_increment() {
        let mut mem = memory();
        mem.poke_word(&addr(0o40), Unsigned12Bit::MAX).unwrap();
        let req = DataBreakRequest {
            increment_mb: true,
            ..DataBreakRequest::one_cycle(addr(0o40))
        };
        let reply = perform_break(&mut mem, &req);
        assert!(reply.word_count_overflow);
        assert_eq!(reply.data, Unsigned12Bit::ZERO);
    }

    #[test]
    fn break_into_missing_field_is_denied() {
        let mut mem = memory();
        let req = DataBreakRequest::one_cycle(addr(0o70000)).into_memory(u12!(1));
        assert_eq!(perform_break(&mut mem, &req), DataBreakReply::denied());
    }
}
