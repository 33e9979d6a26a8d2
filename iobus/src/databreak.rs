//! The data-break (DMA) channel.
//!
//! A peripheral which needs to move a word to or from core memory
//! makes a data-break request.  The request is written to the
//! break-data register and the break-control register is set to
//! [`BREAK_REQUESTED`].  The bus side of the simulation performs the
//! memory cycles, writes the reply into the break-data register and
//! sets break-control to [`BREAK_REPLIED`].  The requester then
//! consumes the reply and returns break-control to [`BREAK_IDLE`].
//!
//! ## Request word
//!
//! | Bits  | Meaning                                               |
//! | ----- | ----------------------------------------------------- |
//! | 0-11  | Data (for a write into memory)                        |
//! | 12-23 | Address (of the word count, for a three-cycle break)  |
//! | 24-26 | Memory field of the transferred word                  |
//! | 27    | Write: the word moves from the device into memory     |
//! | 28    | Increment the memory buffer (add one to the word)     |
//! | 29    | Increment the current address before use              |
//! | 30    | Three-cycle break                                     |
//!
//! ## Reply word
//!
//! | Bits  | Meaning                            |
//! | ----- | ---------------------------------- |
//! | 0-11  | The word transferred               |
//! | 12    | Word count overflow                |
//! | 13    | Accepted                           |
//!
//! Only one break may be in flight in the whole system.  The channel
//! holds a mutex for the duration of the handshake so that requests
//! from different threads are strictly sequential.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use crate::regs::{
    RegisterBus, BREAK_IDLE, BREAK_REPLIED, BREAK_REQUESTED, REG_BREAK_CONTROL, REG_BREAK_DATA,
};

const REQ_ADDRESS_SHIFT: u32 = 12;
const REQ_FIELD_SHIFT: u32 = 24;
const REQ_WRITE: u32 = 1 << 27;
const REQ_INCREMENT_MB: u32 = 1 << 28;
const REQ_INCREMENT_CA: u32 = 1 << 29;
const REQ_THREE_CYCLE: u32 = 1 << 30;

const REPLY_WC_OVERFLOW: u32 = 1 << 12;
const REPLY_ACCEPTED: u32 = 1 << 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBreakRequest {
    pub data: Unsigned12Bit,
    /// For a three-cycle break, the (field 0) address of the word
    /// count; the current address follows it.  Otherwise, the
    /// address of the word to transfer.
    pub address: Unsigned12Bit,
    pub field: Unsigned3Bit,
    /// The word moves from the device into memory.
    pub write: bool,
    pub increment_mb: bool,
    pub increment_ca: bool,
    pub three_cycle: bool,
}

impl DataBreakRequest {
    /// A three-cycle break using the word count at `wc_address` and
    /// the current address after it, incrementing the current address
    /// before the transfer.  Use [`DataBreakRequest::into_memory`] to
    /// turn it into a write.
    #[must_use]
    pub fn three_cycle(wc_address: Unsigned12Bit, field: Unsigned3Bit) -> DataBreakRequest {
        DataBreakRequest {
            data: Unsigned12Bit::ZERO,
            address: wc_address,
            field,
            write: false,
            increment_mb: false,
            increment_ca: true,
            three_cycle: true,
        }
    }

    /// A single-cycle break addressing memory directly.
    #[must_use]
    pub fn one_cycle(address: Address) -> DataBreakRequest {
        DataBreakRequest {
            data: Unsigned12Bit::ZERO,
            address: address.offset(),
            field: address.field(),
            write: false,
            increment_mb: false,
            increment_ca: false,
            three_cycle: false,
        }
    }

    #[must_use]
    pub fn into_memory(self, data: Unsigned12Bit) -> DataBreakRequest {
        DataBreakRequest {
            data,
            write: true,
            ..self
        }
    }

    #[must_use]
    pub fn without_ca_increment(self) -> DataBreakRequest {
        DataBreakRequest {
            increment_ca: false,
            ..self
        }
    }

    #[must_use]
    pub fn encode(&self) -> u32 {
        let mut word = u32::from(self.data)
            | (u32::from(self.address) << REQ_ADDRESS_SHIFT)
            | (u32::from(self.field) << REQ_FIELD_SHIFT);
        if self.write {
            word |= REQ_WRITE;
        }
        if self.increment_mb {
            word |= REQ_INCREMENT_MB;
        }
        if self.increment_ca {
            word |= REQ_INCREMENT_CA;
        }
        if self.three_cycle {
            word |= REQ_THREE_CYCLE;
        }
        word
    }

    #[must_use]
    pub fn decode(word: u32) -> DataBreakRequest {
        DataBreakRequest {
            data: Unsigned12Bit::truncating_from(word),
            address: Unsigned12Bit::truncating_from(word >> REQ_ADDRESS_SHIFT),
            field: Unsigned3Bit::truncating_from(word >> REQ_FIELD_SHIFT),
            write: word & REQ_WRITE != 0,
            increment_mb: word & REQ_INCREMENT_MB != 0,
            increment_ca: word & REQ_INCREMENT_CA != 0,
            three_cycle: word & REQ_THREE_CYCLE != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBreakReply {
    pub data: Unsigned12Bit,
    pub word_count_overflow: bool,
    pub accepted: bool,
}

impl DataBreakReply {
    #[must_use]
    pub fn denied() -> DataBreakReply {
        DataBreakReply {
            data: Unsigned12Bit::ZERO,
            word_count_overflow: false,
            accepted: false,
        }
    }

    #[must_use]
    pub fn encode(&self) -> u32 {
        let mut word = u32::from(self.data);
        if self.word_count_overflow {
            word |= REPLY_WC_OVERFLOW;
        }
        if self.accepted {
            word |= REPLY_ACCEPTED;
        }
        word
    }

    #[must_use]
    pub fn decode(word: u32) -> DataBreakReply {
        DataBreakReply {
            data: Unsigned12Bit::truncating_from(word),
            word_count_overflow: word & REPLY_WC_OVERFLOW != 0,
            accepted: word & REPLY_ACCEPTED != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBreakError {
    /// The bus side did not reply within the polling budget.
    Timeout(DataBreakRequest),
    /// The bus side replied, but refused the transfer.
    Denied(DataBreakRequest),
}

impl Display for DataBreakError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            DataBreakError::Timeout(req) => write!(
                f,
                "data break timed out (address {:o}, field {:o})",
                req.address, req.field
            ),
            DataBreakError::Denied(req) => write!(
                f,
                "data break denied (address {:o}, field {:o})",
                req.address, req.field
            ),
        }
    }
}

impl Error for DataBreakError {}

/// Polling budget for the handshake.  The emulated hardware expects
/// microsecond turnaround, so each poll first spins briefly before
/// sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakTiming {
    /// Polls to wait for a previous break to finish.
    pub idle_polls: u32,
    /// Polls to wait for the reply.
    pub reply_polls: u32,
    pub spins_per_poll: u32,
    pub poll_interval: Duration,
}

impl Default for BreakTiming {
    fn default() -> Self {
        BreakTiming {
            idle_polls: 50,
            reply_polls: 100,
            spins_per_poll: 1000,
            poll_interval: Duration::from_millis(1),
        }
    }
}

pub struct DataBreakChannel {
    bus: Arc<dyn RegisterBus>,
    timing: BreakTiming,
    in_flight: Mutex<()>,
}

impl DataBreakChannel {
    #[must_use]
    pub fn new(bus: Arc<dyn RegisterBus>, timing: BreakTiming) -> DataBreakChannel {
        DataBreakChannel {
            bus,
            timing,
            in_flight: Mutex::new(()),
        }
    }

    fn wait_for_control(&self, wanted: u32, polls: u32) -> bool {
        for _ in 0..polls {
            for _ in 0..self.timing.spins_per_poll {
                if self.bus.read(REG_BREAK_CONTROL) == wanted {
                    return true;
                }
                std::hint::spin_loop();
            }
            thread::sleep(self.timing.poll_interval);
        }
        self.bus.read(REG_BREAK_CONTROL) == wanted
    }

    /// Return the channel to idle.  Used when the device table is
    /// cleared.
    pub fn reset(&self) {
        let _guard = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        self.bus.write(REG_BREAK_CONTROL, BREAK_IDLE);
    }

    /// Perform one data break, blocking until it completes.
    pub fn do_data_break(
        &self,
        request: &DataBreakRequest,
    ) -> Result<DataBreakReply, DataBreakError> {
        // A peripheral which panicked while holding the lock leaves
        // the channel itself in a usable state, so poisoning is
        // ignored.
        let _guard = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        if self.bus.read(REG_BREAK_CONTROL) != BREAK_IDLE
            && !self.wait_for_control(BREAK_IDLE, self.timing.idle_polls)
        {
            event!(
                Level::ERROR,
                "previous data break never completed (control={}); resetting the channel",
                self.bus.read(REG_BREAK_CONTROL)
            );
            self.bus.write(REG_BREAK_CONTROL, BREAK_IDLE);
        }

        event!(Level::TRACE, "data break request {:?}", request);
        self.bus.write(REG_BREAK_DATA, request.encode());
        self.bus.write(REG_BREAK_CONTROL, BREAK_REQUESTED);

        if !self.wait_for_control(BREAK_REPLIED, self.timing.reply_polls) {
            self.bus.write(REG_BREAK_CONTROL, BREAK_IDLE);
            event!(Level::WARN, "data break timed out: {:?}", request);
            return Err(DataBreakError::Timeout(*request));
        }

        let reply = DataBreakReply::decode(self.bus.read(REG_BREAK_DATA));
        self.bus.write(REG_BREAK_CONTROL, BREAK_IDLE);
        if reply.accepted {
            event!(Level::TRACE, "data break reply {:?}", reply);
            Ok(reply)
        } else {
            event!(Level::WARN, "data break denied: {:?}", request);
            Err(DataBreakError::Denied(*request))
        }
    }
}

#[test]
fn test_request_encoding() {
    let req = DataBreakRequest {
        data: u12!(0o1234),
        address: u12!(0o7750),
        field: u3!(5),
        write: true,
        increment_mb: false,
        increment_ca: true,
        three_cycle: true,
    };
    let word = req.encode();
    assert_eq!(word & 0o7777, 0o1234);
    assert_eq!((word >> 12) & 0o7777, 0o7750);
    assert_eq!((word >> 24) & 7, 5);
    assert_eq!(word & (1 << 27), 1 << 27);
    assert_eq!(word & (1 << 28), 0);
    assert_eq!(word & (1 << 29), 1 << 29);
    assert_eq!(word & (1 << 30), 1 << 30);
    assert_eq!(DataBreakRequest::decode(word), req);
}

#[test]
fn test_reply_decoding() {
    let reply = DataBreakReply::decode(0o17 | (1 << 12) | (1 << 13));
    assert_eq!(reply.data, u12!(0o17));
    assert!(reply.word_count_overflow);
    assert!(reply.accepted);
    assert!(!DataBreakReply::decode(0o17).accepted);
    assert_eq!(DataBreakReply::denied().encode(), 0);
}
