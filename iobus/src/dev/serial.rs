//! The reader and punch halves shared by the serial devices (the
//! console teleprinter and the high-speed paper tape station).
//!
//! ## Registers
//!
//! | Register | Bits  | Meaning                                       |
//! | -------- | ----- | --------------------------------------------- |
//! | 1        | 0-7   | Character read                                |
//! | 1        | 12    | Reader flag: a character is waiting           |
//! | 2        | 0-7   | Character to punch                            |
//! | 2        | 12    | Punch request (set by the CPU)                |
//! | 2        | 13    | Punch flag: the previous character is done    |
//!
//! The CPU clears the reader flag when it takes the character.  The
//! reader will not overwrite a character which has not been taken.
use std::collections::VecDeque;
use std::time::Duration;

use tracing::{event, Level};

use super::DevicePort;
use crate::event::OutputEvent;

pub const REG_READER: usize = 1;
pub const REG_PUNCH: usize = 2;

pub const READER_READY: u32 = 1 << 12;
pub const PUNCH_REQUEST: u32 = 1 << 12;
pub const PUNCH_DONE: u32 = 1 << 13;

const CHAR_MASK: u32 = 0o377;

/// How often an idle device looks at its registers.
pub(crate) const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Characters per second at the given baud rate (ten bits per
/// character).
#[must_use]
pub(crate) fn chars_per_second(baud_rate: u32) -> u32 {
    (baud_rate / 10).max(1)
}

#[must_use]
pub(crate) fn char_interval(cps: u32) -> Duration {
    Duration::from_secs(1) / cps.max(1)
}

fn low_byte(value: u32) -> u8 {
    (value & CHAR_MASK) as u8
}

#[derive(Debug)]
pub(crate) struct SerialReader {
    tape: Vec<u8>,
    position: usize,
    keys: VecDeque<u8>,
    /// When set, tape input takes priority over key presses.
    active: bool,
    cps: u32,
    next_char_time: Duration,
    already_warned_eof: bool,
}

impl SerialReader {
    pub(crate) fn new(cps: u32, active: bool) -> SerialReader {
        SerialReader {
            tape: Vec::new(),
            position: 0,
            keys: VecDeque::new(),
            active,
            cps,
            next_char_time: Duration::ZERO,
            already_warned_eof: false,
        }
    }

    /// Takes effect from the next character.
    pub(crate) fn set_cps(&mut self, cps: u32) {
        self.cps = cps;
    }

    pub(crate) fn load_tape(&mut self, data: Vec<u8>) {
        event!(Level::INFO, "reader tape loaded ({} characters)", data.len());
        self.tape = data;
        self.position = 0;
        self.already_warned_eof = false;
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) fn push_key(&mut self, key: u8) {
        self.keys.push_back(key);
    }

    fn next_char(&mut self, events: &mut Vec<OutputEvent>) -> Option<u8> {
        if self.active {
            match self.tape.get(self.position) {
                Some(ch) => {
                    self.position += 1;
                    events.push(OutputEvent::ReaderPosition {
                        position: self.position,
                    });
                    return Some(*ch);
                }
                None => {
                    if !self.tape.is_empty() && !self.already_warned_eof {
                        self.already_warned_eof = true;
                        event!(
                            Level::WARN,
                            "end of reader tape at position {}",
                            self.position
                        );
                    }
                }
            }
        }
        self.keys.pop_front()
    }

    /// Advance the reader; returns the time at which it next needs
    /// attention.
    pub(crate) fn poll(
        &mut self,
        now: Duration,
        port: &DevicePort,
        events: &mut Vec<OutputEvent>,
    ) -> Duration {
        if port.read(REG_READER) & READER_READY != 0 {
            // The CPU has not yet taken the previous character.
            return now + IDLE_POLL_INTERVAL;
        }
        if now < self.next_char_time {
            return self.next_char_time;
        }
        match self.next_char(events) {
            Some(ch) => {
                event!(Level::TRACE, "reader delivers {:03o}", ch);
                port.write(REG_READER, u32::from(ch) | READER_READY);
                port.raise_attention();
                self.next_char_time = now + char_interval(self.cps);
                self.next_char_time
            }
            None => now + IDLE_POLL_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SerialPunch {
    cps: u32,
    /// Character being punched, and when it will be finished.
    in_progress: Option<(u8, Duration)>,
    output_mask: u8,
}

impl SerialPunch {
    pub(crate) fn new(cps: u32, output_mask: u8) -> SerialPunch {
        SerialPunch {
            cps,
            in_progress: None,
            output_mask,
        }
    }

    /// Takes effect from the next character; a character already
    /// being punched keeps its original finishing time.
    pub(crate) fn set_cps(&mut self, cps: u32) {
        self.cps = cps;
    }

    pub(crate) fn set_output_mask(&mut self, mask: u8) {
        self.output_mask = mask;
    }

    pub(crate) fn poll(
        &mut self,
        now: Duration,
        port: &DevicePort,
        events: &mut Vec<OutputEvent>,
    ) -> Duration {
        if let Some((ch, done_at)) = self.in_progress {
            if now < done_at {
                return done_at;
            }
            self.in_progress = None;
            event!(Level::TRACE, "punched {:03o}", ch);
            events.push(OutputEvent::Punch { ch });
            port.write(REG_PUNCH, u32::from(ch) | PUNCH_DONE);
            port.raise_attention();
        }
        let reg = port.read(REG_PUNCH);
        if reg & PUNCH_REQUEST == 0 {
            return now + IDLE_POLL_INTERVAL;
        }
        let ch = low_byte(reg) & self.output_mask;
        port.clear_bits(REG_PUNCH, PUNCH_REQUEST | PUNCH_DONE);
        let done_at = now + char_interval(self.cps);
        self.in_progress = Some((ch, done_at));
        done_at
    }
}

#[test]
fn test_char_interval() {
    assert_eq!(chars_per_second(110), 11);
    assert_eq!(char_interval(11), Duration::from_nanos(90_909_090));
    assert_eq!(char_interval(chars_per_second(3000)), Duration::from_micros(3333) + Duration::from_nanos(333));
}
