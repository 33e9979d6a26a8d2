//! The TC08 DECtape controller (device codes 76 and 77) with up to
//! eight TU55/TU56 transports.
//!
//! ## Registers
//!
//! Status register A (register 1) holds the command:
//!
//! | Bits  | Meaning                                                 |
//! | ----- | ------------------------------------------------------- |
//! | 9-11  | Unit select                                             |
//! | 8     | Reverse                                                 |
//! | 7     | Go (clear to stop the tape)                             |
//! | 6     | Continuous mode                                         |
//! | 3-5   | Function: 0 move, 1 search, 2-3 read, 4-5 write         |
//! | 1     | When clear, a new command clears the error flags        |
//! | 0     | When clear, a new command clears the DECtape flag       |
//! | 12    | Set by the CPU to start the command in bits 0-11        |
//!
//! Status register B (register 2) holds the flags and the memory
//! field for transfers (bits 3-5).  The flags are error (bit 11),
//! mark track error (bit 10), end of tape (bit 9), select error
//! (bit 8), timing error (bit 6) and the DECtape flag (bit 0).
//!
//! Transfers use three-cycle data breaks with the word count and
//! current address at 7754 and 7755 of field 0.
//!
//! ## Tape geometry
//!
//! Positions along the tape are measured in lines (one line holds
//! three bits of each of the data tracks; four lines make a word).
//! The tape starts and ends with an end zone; between the end zones
//! lie two short synchronisation zones and the 1474 blocks.  Each
//! block is laid out as a five word header (the block mark is its
//! first word), 129 data words and a five word trailer.  A forward
//! search sees the block mark at the end of the first header word; a
//! reverse search sees the reverse block mark at the start of the
//! last trailer word.
use std::time::Duration;

use conv::ValueFrom;
use tracing::{event, Level};

use base::prelude::*;

use super::serial::IDLE_POLL_INTERVAL;
use super::{check_reconfiguration, not_valid_for, DevicePort, Peripheral, PollOutcome};
use crate::config::{DecTapeConfig, PeripheralConfig};
use crate::context::Context;
use crate::databreak::DataBreakRequest;
use crate::event::{Action, ActionError, OutputEvent, TapeState};
use crate::image::UnitImage;
use crate::types::DeviceKind;

pub const REG_STATUS_A: usize = 1;
pub const REG_STATUS_B: usize = 2;

pub const STATUS_A_NEW_COMMAND: u32 = 1 << 12;
const COMMAND_MASK: u32 = 0o7777;
const A_REVERSE: u32 = 0o400;
const A_GO: u32 = 0o200;
const A_CONTINUOUS: u32 = 0o100;
const A_KEEP_ERRORS: u32 = 0o2;
const A_KEEP_DT_FLAG: u32 = 0o1;

pub const B_ERROR: u32 = 0o4000;
pub const B_MARK_TRACK: u32 = 0o2000;
pub const B_END_OF_TAPE: u32 = 0o1000;
pub const B_SELECT: u32 = 0o0400;
pub const B_TIMING: u32 = 0o0100;
pub const B_DT_FLAG: u32 = 0o0001;
const ERROR_FLAGS: u32 = B_ERROR | B_MARK_TRACK | B_END_OF_TAPE | B_SELECT | B_TIMING;

const WORD_COUNT_ADDRESS: Unsigned12Bit = u12!(0o7754);

pub const BLOCKS: u32 = 1474;
pub const WORDS_PER_BLOCK: u32 = 129;
const HEADER_WORDS: u32 = 5;
const TRAILER_WORDS: u32 = 5;
const LINES_PER_WORD: u32 = 4;
const LINES_PER_BLOCK: u32 = (HEADER_WORDS + WORDS_PER_BLOCK + TRAILER_WORDS) * LINES_PER_WORD;
const END_ZONE_LINES: u32 = 5000;
const SYNC_LINES: u32 = 300;
const FIRST_BLOCK: u32 = END_ZONE_LINES + SYNC_LINES;
const TAPE_LINES: u32 = FIRST_BLOCK + BLOCKS * LINES_PER_BLOCK + SYNC_LINES + END_ZONE_LINES;

const LINE_TIME: Duration = Duration::from_micros(33);
const BLOCK_TIME: Duration = Duration::from_micros(33 * LINES_PER_BLOCK as u64);
/// How often a moving transport reports where it is.
const POSITION_REPORT_INTERVAL: Duration = Duration::from_millis(10);

fn block_start(block: u32) -> u32 {
    FIRST_BLOCK + block * LINES_PER_BLOCK
}

fn forward_mark(block: u32) -> u32 {
    block_start(block) + LINES_PER_WORD
}

fn reverse_mark(block: u32) -> u32 {
    block_start(block) + LINES_PER_BLOCK - LINES_PER_WORD
}

fn data_start(block: u32) -> u32 {
    block_start(block) + HEADER_WORDS * LINES_PER_WORD
}

/// The first block mark strictly ahead of `line` in the direction of
/// travel.
fn next_mark(line: u32, reverse: bool) -> Option<(u32, u32)> {
    let block = if reverse {
        if line <= reverse_mark(0) {
            return None;
        }
        ((line - reverse_mark(0) - 1) / LINES_PER_BLOCK).min(BLOCKS - 1)
    } else if line < forward_mark(0) {
        0
    } else {
        (line - forward_mark(0)) / LINES_PER_BLOCK + 1
    };
    if block < BLOCKS {
        let mark = if reverse { reverse_mark(block) } else { forward_mark(block) };
        Some((block, mark))
    } else {
        None
    }
}

/// The first block whose data area has not yet started at `line`.
fn next_data_block(line: u32) -> Option<u32> {
    let block = if line <= data_start(0) {
        0
    } else {
        (line - data_start(0)).div_ceil(LINES_PER_BLOCK)
    };
    (block < BLOCKS).then_some(block)
}

/// Where a transport travelling in the given direction enters the end
/// zone.  A transport already in that end zone stays where it is.
fn end_zone_edge(line: u32, reverse: bool) -> u32 {
    if reverse {
        line.min(END_ZONE_LINES - 1)
    } else {
        line.max(TAPE_LINES - END_ZONE_LINES)
    }
}

fn image_words() -> usize {
    (BLOCKS * WORDS_PER_BLOCK) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Move,
    Search,
    Read,
    Write,
    Unsupported(u32),
}

impl Function {
    fn decode(command: u32) -> Function {
        match (command >> 3) & 7 {
            0 => Function::Move,
            1 => Function::Search,
            2 | 3 => Function::Read,
            4 | 5 => Function::Write,
            n => Function::Unsupported(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Moving {
        command: u32,
        unit: usize,
        reverse: bool,
    },
    Searching {
        command: u32,
        unit: usize,
        reverse: bool,
        continuous: bool,
        /// The search has run into the end zone.
        at_end: bool,
    },
    Transferring {
        command: u32,
        unit: usize,
        continuous: bool,
        write: bool,
        /// The block and the next word within it, once the tape has
        /// reached a data area.
        position: Option<(u32, u32)>,
    },
}

impl State {
    fn command(&self) -> Option<u32> {
        match self {
            State::Idle => None,
            State::Moving { command, .. }
            | State::Searching { command, .. }
            | State::Transferring { command, .. } => Some(*command),
        }
    }

    fn unit(&self) -> Option<usize> {
        match self {
            State::Idle => None,
            State::Moving { unit, .. }
            | State::Searching { unit, .. }
            | State::Transferring { unit, .. } => Some(*unit),
        }
    }
}

/// Tape motion between two positions at the nominal tape speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Travel {
    from: u32,
    to: u32,
    departed: Duration,
    arrival: Duration,
    /// The block whose mark or word is waiting at `to`.
    block: Option<u32>,
}

impl Travel {
    fn new(from: u32, to: u32, block: Option<u32>, now: Duration) -> Travel {
        Travel {
            from,
            to,
            departed: now,
            arrival: now + LINE_TIME * from.abs_diff(to),
            block,
        }
    }

    fn position_at(&self, t: Duration) -> u32 {
        if t >= self.arrival {
            return self.to;
        }
        let elapsed = t.saturating_sub(self.departed).as_nanos() / LINE_TIME.as_nanos();
        let lines = u32::try_from(elapsed).unwrap_or(u32::MAX);
        if self.to >= self.from {
            self.from.saturating_add(lines).min(self.to)
        } else {
            self.from.saturating_sub(lines).max(self.to)
        }
    }
}

#[derive(Debug)]
struct Transport {
    image: Option<UnitImage>,
    line: u32,
    selected: bool,
    moving: bool,
    reverse: bool,
    writing: bool,
}

impl Transport {
    fn new() -> Transport {
        Transport {
            image: None,
            line: 0,
            selected: false,
            moving: false,
            reverse: false,
            writing: false,
        }
    }

    fn state(&self, unit: usize) -> TapeState {
        TapeState {
            unit: u8::try_from(unit).unwrap_or(u8::MAX),
            loaded: self.image.is_some(),
            selected: self.selected,
            moving: self.moving,
            reverse: self.reverse,
            writing: self.writing,
            normalized_position: f64::value_from(self.line).unwrap_or(0.0)
                / f64::value_from(TAPE_LINES).unwrap_or(f64::MAX),
        }
    }

    /// The parts of the state a display cares about, at block
    /// resolution.
    fn visible(&self) -> (bool, bool, bool, bool, bool, u32) {
        (
            self.image.is_some(),
            self.selected,
            self.moving,
            self.reverse,
            self.writing,
            self.line / LINES_PER_BLOCK,
        )
    }
}

#[derive(Debug)]
pub struct DecTape {
    config: DecTapeConfig,
    transports: Vec<Transport>,
    state: State,
    travel: Option<Travel>,
    last_reported: Vec<(bool, bool, bool, bool, bool, u32)>,
}

impl DecTape {
    #[must_use]
    pub fn new(config: DecTapeConfig) -> DecTape {
        DecTape {
            config,
            transports: (0..config.units).map(|_| Transport::new()).collect(),
            state: State::Idle,
            travel: None,
            last_reported: Vec::new(),
        }
    }

    fn tape_states(&self) -> OutputEvent {
        OutputEvent::TapeStates {
            states: self
                .transports
                .iter()
                .enumerate()
                .map(|(unit, t)| t.state(unit))
                .collect(),
        }
    }

    fn report_if_changed(&mut self) -> Option<OutputEvent> {
        let visible: Vec<_> = self.transports.iter().map(Transport::visible).collect();
        if visible == self.last_reported {
            None
        } else {
            self.last_reported = visible;
            Some(self.tape_states())
        }
    }

    fn transport(&mut self, unit: u8) -> Result<&mut Transport, ActionError> {
        self.transports
            .get_mut(usize::from(unit))
            .ok_or(ActionError::NoSuchUnit(unit))
    }

    /// Stop the tape where it is.
    fn halt(&mut self, now: Duration) {
        if let (Some(unit), Some(travel)) = (self.state.unit(), self.travel.take()) {
            if let Some(t) = self.transports.get_mut(unit) {
                t.line = travel.position_at(now);
            }
        }
        self.travel = None;
        for t in &mut self.transports {
            t.moving = false;
            t.writing = false;
        }
        self.state = State::Idle;
    }

    fn fail(&mut self, now: Duration, port: &DevicePort, flags: u32) {
        event!(Level::DEBUG, "DECtape error, status B flags {:04o}", flags);
        port.set_bits(REG_STATUS_B, B_ERROR | flags);
        port.raise_attention();
        self.halt(now);
    }

    fn raise_dt_flag(port: &DevicePort) {
        port.set_bits(REG_STATUS_B, B_DT_FLAG);
        port.raise_attention();
    }

    fn memory_field(port: &DevicePort) -> Unsigned3Bit {
        Unsigned3Bit::truncating_from(port.read(REG_STATUS_B) >> 3)
    }

    fn accept_command(&mut self, command: u32, now: Duration, port: &DevicePort) {
        if command & A_KEEP_ERRORS == 0 {
            port.clear_bits(REG_STATUS_B, ERROR_FLAGS);
        }
        if command & A_KEEP_DT_FLAG == 0 {
            port.clear_bits(REG_STATUS_B, B_DT_FLAG);
        }
        self.halt(now);
        let unit = ((command >> 9) & 7) as usize;
        for (i, t) in self.transports.iter_mut().enumerate() {
            t.selected = i == unit;
        }
        if command & A_GO == 0 {
            event!(Level::TRACE, "DECtape unit {} stopped", unit);
            return;
        }
        let reverse = command & A_REVERSE != 0;
        let continuous = command & A_CONTINUOUS != 0;
        if !self.transports.get(unit).is_some_and(|t| t.image.is_some()) {
            event!(Level::DEBUG, "DECtape unit {} is not ready", unit);
            self.fail(now, port, B_SELECT);
            return;
        }
        let function = Function::decode(command);
        let state = match function {
            Function::Move => State::Moving {
                command,
                unit,
                reverse,
            },
            Function::Search => State::Searching {
                command,
                unit,
                reverse,
                continuous,
                at_end: false,
            },
            Function::Read | Function::Write if reverse => {
                event!(Level::WARN, "DECtape transfers in reverse are not supported");
                self.fail(now, port, B_MARK_TRACK);
                return;
            }
            Function::Read | Function::Write => State::Transferring {
                command,
                unit,
                continuous,
                write: function == Function::Write,
                position: None,
            },
            Function::Unsupported(n) => {
                event!(Level::WARN, "DECtape function {} is not supported", n);
                self.fail(now, port, B_MARK_TRACK);
                return;
            }
        };
        event!(
            Level::DEBUG,
            "DECtape unit {} {:?} {}",
            unit,
            function,
            if reverse { "reverse" } else { "forward" }
        );
        if let Some(t) = self.transports.get_mut(unit) {
            t.moving = true;
            t.reverse = reverse;
            t.writing = function == Function::Write;
        }
        self.state = state;
    }

    /// Where the tape must get to before the current operation can
    /// make progress, and the block waiting there.
    fn next_stop(&self, line: u32) -> (u32, Option<u32>) {
        match self.state {
            State::Idle => (line, None),
            State::Moving { reverse, .. } => (end_zone_edge(line, reverse), None),
            State::Searching { at_end: true, .. } => (line, None),
            State::Searching { reverse, .. } => match next_mark(line, reverse) {
                Some((block, mark)) => (mark, Some(block)),
                None => (end_zone_edge(line, reverse), None),
            },
            State::Transferring { position: None, .. } => match next_data_block(line) {
                Some(block) => (data_start(block), Some(block)),
                None => (end_zone_edge(line, false), None),
            },
            State::Transferring {
                position: Some((block, word)),
                ..
            } => (data_start(block) + (word + 1) * LINES_PER_WORD, Some(block)),
        }
    }

    fn advance(&mut self, now: Duration, port: &DevicePort) -> Duration {
        let Some(unit) = self.state.unit() else {
            return now + IDLE_POLL_INTERVAL;
        };
        let Some(line) = self.transports.get(unit).map(|t| t.line) else {
            self.halt(now);
            return now + IDLE_POLL_INTERVAL;
        };
        let travel = match self.travel {
            Some(travel) => travel,
            None => {
                let (to, block) = self.next_stop(line);
                Travel::new(line, to, block, now)
            }
        };
        if let Some(t) = self.transports.get_mut(unit) {
            t.line = travel.position_at(now);
        }
        if now < travel.arrival {
            self.travel = Some(travel);
            return travel.arrival.min(now + POSITION_REPORT_INTERVAL);
        }
        self.travel = None;
        self.arrive(travel.block, now, port)
    }

    /// The tape has reached the stop computed by `next_stop`.
    fn arrive(&mut self, block: Option<u32>, now: Duration, port: &DevicePort) -> Duration {
        match self.state {
            State::Idle => now + IDLE_POLL_INTERVAL,
            State::Moving { .. } => {
                self.fail(now, port, B_END_OF_TAPE);
                now + IDLE_POLL_INTERVAL
            }
            State::Searching { at_end: true, .. } => {
                port.set_bits(REG_STATUS_B, B_ERROR | B_END_OF_TAPE);
                port.raise_attention();
                now + BLOCK_TIME
            }
            State::Searching {
                command,
                unit,
                reverse,
                continuous,
                at_end: false,
            } => match block {
                Some(block) => self.found_block(block, continuous, now, port),
                None => {
                    event!(Level::DEBUG, "DECtape search ran into the end zone");
                    port.set_bits(REG_STATUS_B, B_ERROR | B_END_OF_TAPE);
                    port.raise_attention();
                    if let Some(t) = self.transports.get_mut(unit) {
                        t.moving = false;
                    }
                    self.state = State::Searching {
                        command,
                        unit,
                        reverse,
                        continuous,
                        at_end: true,
                    };
                    now + BLOCK_TIME
                }
            },
            State::Transferring {
                command,
                unit,
                continuous,
                write,
                position: None,
            } => {
                if block.is_none() {
                    self.fail(now, port, B_END_OF_TAPE);
                    return now + IDLE_POLL_INTERVAL;
                }
                self.state = State::Transferring {
                    command,
                    unit,
                    continuous,
                    write,
                    position: block.map(|b| (b, 0)),
                };
                now
            }
            State::Transferring {
                command,
                unit,
                continuous,
                write,
                position: Some((block, word)),
            } => {
                let overflow = match self.transfer_word(unit, block, word, write, port) {
                    Ok(overflow) => overflow,
                    Err(()) => {
                        self.fail(now, port, B_TIMING);
                        return now + IDLE_POLL_INTERVAL;
                    }
                };
                let next_word = word + 1;
                if overflow || (next_word == WORDS_PER_BLOCK && !continuous) {
                    event!(
                        Level::DEBUG,
                        "DECtape transfer stopped after word {} of block {}",
                        word,
                        block
                    );
                    DecTape::raise_dt_flag(port);
                    self.halt(now);
                    return now + IDLE_POLL_INTERVAL;
                }
                self.state = State::Transferring {
                    command,
                    unit,
                    continuous,
                    write,
                    position: (next_word < WORDS_PER_BLOCK).then_some((block, next_word)),
                };
                now
            }
        }
    }

    fn found_block(
        &mut self,
        block: u32,
        continuous: bool,
        now: Duration,
        port: &DevicePort,
    ) -> Duration {
        event!(Level::TRACE, "DECtape search found block {}", block);
        let request = DataBreakRequest::three_cycle(WORD_COUNT_ADDRESS, DecTape::memory_field(port))
            .without_ca_increment()
            .into_memory(Unsigned12Bit::truncating_from(block));
        match port.data_break(&request) {
            Ok(reply) => {
                if !continuous {
                    DecTape::raise_dt_flag(port);
                    self.halt(now);
                    return now + IDLE_POLL_INTERVAL;
                }
                if reply.word_count_overflow {
                    DecTape::raise_dt_flag(port);
                }
                now
            }
            Err(e) => {
                event!(Level::WARN, "DECtape search break failed: {}", e);
                self.fail(now, port, B_TIMING);
                now + IDLE_POLL_INTERVAL
            }
        }
    }

    /// Move one word between the tape and memory.  Returns true when
    /// the word count has overflowed.
    fn transfer_word(
        &mut self,
        unit: usize,
        block: u32,
        word: u32,
        write: bool,
        port: &DevicePort,
    ) -> Result<bool, ()> {
        let index = (block * WORDS_PER_BLOCK + word) as usize;
        let request = DataBreakRequest::three_cycle(WORD_COUNT_ADDRESS, DecTape::memory_field(port));
        let Some(image) = self.transports.get_mut(unit).and_then(|t| t.image.as_mut()) else {
            return Err(());
        };
        let result = if write {
            port.data_break(&request).map(|reply| {
                image.set_word(index, reply.data);
                reply
            })
        } else {
            let data = image.word(index).unwrap_or(Unsigned12Bit::ZERO);
            port.data_break(&request.into_memory(data))
        };
        match result {
            Ok(reply) => Ok(reply.word_count_overflow),
            Err(e) => {
                event!(Level::WARN, "DECtape transfer break failed: {}", e);
                Err(())
            }
        }
    }

    fn resize(&mut self, units: u8) {
        let units = usize::from(units);
        if self.state.unit().is_some_and(|u| u >= units) {
            self.halt(Duration::ZERO);
        }
        self.transports.truncate(units);
        while self.transports.len() < units {
            self.transports.push(Transport::new());
        }
    }
}

impl Peripheral for DecTape {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Tc08
    }

    fn bus_connections(&self) -> Vec<Unsigned6Bit> {
        vec![u6!(0o76), u6!(0o77)]
    }

    fn attach(&mut self, _ctx: &Context, _port: &DevicePort) {
        self.state = State::Idle;
        self.travel = None;
        self.last_reported.clear();
    }

    fn poll(&mut self, ctx: &Context, port: &DevicePort) -> PollOutcome {
        let now = ctx.simulated_time;
        let reg = port.read(REG_STATUS_A);
        if reg & STATUS_A_NEW_COMMAND != 0 {
            port.clear_bits(REG_STATUS_A, STATUS_A_NEW_COMMAND);
            self.accept_command(reg & COMMAND_MASK, now, port);
        } else if let Some(command) = self.state.command() {
            if reg & COMMAND_MASK != command {
                event!(
                    Level::DEBUG,
                    "DECtape command changed from {:04o} to {:04o}; operation abandoned",
                    command,
                    reg & COMMAND_MASK
                );
                self.halt(now);
            }
        }
        let poll_after = self.advance(now, port);
        PollOutcome {
            poll_after,
            events: self.report_if_changed().into_iter().collect(),
        }
    }

    fn request_action(
        &mut self,
        ctx: &Context,
        _port: &DevicePort,
        action: Action,
    ) -> Result<Vec<OutputEvent>, ActionError> {
        match action {
            Action::LoadTape { unit, data } => {
                let mut image = UnitImage::blank(image_words());
                image.upload(&data)?;
                let transport = self.transport(unit)?;
                transport.image = Some(image);
                transport.line = 0;
                event!(Level::INFO, "DECtape unit {} loaded ({} bytes)", unit, data.len());
            }
            Action::UnloadTape { unit } => {
                self.transport(unit)?.image = None;
                if self.state.unit() == Some(usize::from(unit)) {
                    self.halt(ctx.simulated_time);
                }
                event!(Level::INFO, "DECtape unit {} unloaded", unit);
            }
            Action::DownloadTape { unit } => {
                let data = self
                    .transport(unit)?
                    .image
                    .as_ref()
                    .map(UnitImage::download)
                    .ok_or(ActionError::NotLoaded(unit))?;
                return Ok(vec![OutputEvent::DumpData { unit, data }]);
            }
            Action::Reconfigure(conf) => {
                check_reconfiguration(self.kind(), &conf)?;
                if let PeripheralConfig::Tc08(conf) = conf {
                    self.resize(conf.units);
                    self.config = conf;
                }
            }
            other => return Err(not_valid_for(&other, self.kind())),
        }
        self.last_reported = self.transports.iter().map(Transport::visible).collect();
        Ok(vec![self.tape_states()])
    }

    fn configuration(&self) -> PeripheralConfig {
        PeripheralConfig::Tc08(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::Harness;
    use crate::image::ImageError;
    use crate::types::DeviceId;

    const SEARCH: u32 = 1 << 3;
    const READ: u32 = 2 << 3;
    const WRITE: u32 = 4 << 3;
    const BUFFER: usize = 0o1000;

    fn tape_bytes(words: impl Iterator<Item = u16>) -> Vec<u8> {
        words.flat_map(u16::to_le_bytes).collect()
    }

    fn loaded(units: u8) -> (Harness, DeviceId) {
        let mut h = Harness::new(&[PeripheralConfig::Tc08(DecTapeConfig { units })]);
        let id = h.device_ids()[0];
        // Each word holds its own index, modulo 4096.
        let data = tape_bytes((0..image_words()).map(|i| (i % 4096) as u16));
        h.action(id, Action::LoadTape { unit: 0, data })
            .expect("a full tape image fits");
        (h, id)
    }

    /// Issue a command and wait until the controller has taken it, so
    /// that flags left over from the previous command are gone.
    fn command(h: &mut Harness, id: DeviceId, command: u32) {
        h.set_device_register(id, REG_STATUS_A, command | STATUS_A_NEW_COMMAND);
        h.run_until(Duration::from_millis(100), |h| {
            h.device_register(id, REG_STATUS_A) & STATUS_A_NEW_COMMAND == 0
        });
    }

    fn wait_for_flags(h: &mut Harness, id: DeviceId, limit: Duration) -> u32 {
        h.run_until(limit, |h| {
            h.device_register(id, REG_STATUS_B) & (B_DT_FLAG | B_ERROR) != 0
        });
        h.device_register(id, REG_STATUS_B)
    }

    #[test]
    fn mark_positions() {
        assert_eq!(next_mark(0, false), Some((0, forward_mark(0))));
        assert_eq!(next_mark(forward_mark(0), false), Some((1, forward_mark(1))));
        assert_eq!(next_mark(forward_mark(BLOCKS - 1), false), None);
        assert_eq!(next_mark(0, true), None);
        assert_eq!(next_mark(reverse_mark(1), true), Some((0, reverse_mark(0))));
        assert_eq!(next_mark(TAPE_LINES, true), Some((BLOCKS - 1, reverse_mark(BLOCKS - 1))));
        assert_eq!(next_data_block(data_start(0)), Some(0));
        assert_eq!(next_data_block(data_start(0) + 1), Some(1));
        assert_eq!(LINES_PER_BLOCK, 556);
    }

    #[test]
    fn forward_search_visits_every_block() {
        let (mut h, id) = loaded(1);
        h.poke(0o7755, 0o100);
        let mut blocks = Vec::new();
        let status = loop {
            command(&mut h, id, A_GO | SEARCH);
            let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
            if status & B_ERROR != 0 {
                break status;
            }
            assert_eq!(status & B_DT_FLAG, B_DT_FLAG);
            blocks.push(u32::from(h.peek(0o100)));
            assert!(blocks.len() <= BLOCKS as usize);
        };
        assert_eq!(status & B_END_OF_TAPE, B_END_OF_TAPE);
        assert_eq!(blocks.len(), BLOCKS as usize);
        assert!(blocks.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(blocks[0], 0);

        // The end of tape condition is reported again on each tick.
        h.set_device_register(id, REG_STATUS_B, 0);
        h.run_for(Duration::from_millis(100));
        assert_eq!(
            h.device_register(id, REG_STATUS_B) & (B_ERROR | B_END_OF_TAPE),
            B_ERROR | B_END_OF_TAPE
        );
    }

    #[test]
    fn continuous_search_flags_word_count_overflow() {
        let (mut h, id) = loaded(1);
        h.poke(0o7754, 0o7775);
        h.poke(0o7755, 0o100);
        command(&mut h, id, A_GO | A_CONTINUOUS | SEARCH);
        let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
        assert_eq!(status & (B_DT_FLAG | B_ERROR), B_DT_FLAG);
        assert_eq!(h.peek(0o100), 2);
        assert_eq!(h.peek(0o7754), 0);
    }

    #[test]
    fn reverse_search_from_the_far_end() {
        let (mut h, id) = loaded(1);
        command(&mut h, id, A_GO);
        h.run_until(Duration::from_secs(60), |h| {
            h.device_register(id, REG_STATUS_B) & B_END_OF_TAPE != 0
        });
        h.poke(0o7755, 0o100);
        command(&mut h, id, A_GO | A_REVERSE | SEARCH);
        let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
        assert_eq!(status & (B_DT_FLAG | B_ERROR), B_DT_FLAG);
        assert_eq!(u32::from(h.peek(0o100)), BLOCKS - 1);
    }

    #[test]
    fn read_block_then_continue() {
        let (mut h, id) = loaded(1);
        h.poke(0o7754, (0o10000 - WORDS_PER_BLOCK) as u16);
        h.poke(0o7755, (BUFFER - 1) as u16);
        command(&mut h, id, A_GO | READ);
        let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
        assert_eq!(status & (B_DT_FLAG | B_ERROR), B_DT_FLAG);
        for i in 0..WORDS_PER_BLOCK as usize {
            assert_eq!(h.peek(BUFFER + i) as usize, i);
        }

        // The next read starts with the following block.
        h.poke(0o7754, 0o7766);
        h.poke(0o7755, (BUFFER - 1) as u16);
        command(&mut h, id, A_GO | READ);
        let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
        assert_eq!(status & (B_DT_FLAG | B_ERROR), B_DT_FLAG);
        assert_eq!(h.peek(BUFFER) as u32, WORDS_PER_BLOCK);
        assert_eq!(h.peek(BUFFER + 9) as u32, WORDS_PER_BLOCK + 9);
        assert_eq!(h.peek(BUFFER + 10) as u32, 10);
    }

    #[test]
    fn continuous_write_crosses_blocks() {
        const N: usize = 200;
        let (mut h, id) = loaded(1);
        for i in 0..N {
            h.poke(BUFFER + i, (0o7000 + i) as u16);
        }
        h.poke(0o7754, (0o10000 - N) as u16);
        h.poke(0o7755, (BUFFER - 1) as u16);
        command(&mut h, id, A_GO | A_CONTINUOUS | WRITE);
        let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
        assert_eq!(status & (B_DT_FLAG | B_ERROR), B_DT_FLAG);
        let dump = h
            .download(id, Action::DownloadTape { unit: 0 })
            .expect("unit 0 is loaded");
        let word_at = |i: usize| u16::from_le_bytes([dump[2 * i], dump[2 * i + 1]]);
        for i in 0..N {
            assert_eq!(word_at(i) as usize, 0o7000 + i);
        }
        assert_eq!(word_at(N) as usize, N);
    }

    #[test]
    fn reverse_read_is_an_error() {
        let (mut h, id) = loaded(1);
        command(&mut h, id, A_GO | A_REVERSE | READ);
        let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
        assert_eq!(status & (B_ERROR | B_MARK_TRACK), B_ERROR | B_MARK_TRACK);
    }

    #[test]
    fn break_failure_is_a_timing_error() {
        let mut h =
            Harness::without_responder(&[PeripheralConfig::Tc08(DecTapeConfig { units: 1 })]);
        let id = h.device_ids()[0];
        h.action(id, Action::LoadTape { unit: 0, data: vec![] })
            .expect("an empty image fits");
        command(&mut h, id, A_GO | SEARCH);
        let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
        assert_eq!(status & (B_ERROR | B_TIMING), B_ERROR | B_TIMING);
        assert_eq!(status & B_DT_FLAG, 0);

        // Reading fails the same way.
        command(&mut h, id, A_GO | READ);
        let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
        assert_eq!(status & (B_ERROR | B_TIMING), B_ERROR | B_TIMING);
    }

    #[test]
    fn unloaded_unit_is_a_select_error() {
        let (mut h, id) = loaded(2);
        command(&mut h, id, A_GO | (1 << 9) | SEARCH);
        let status = wait_for_flags(&mut h, id, Duration::from_secs(1));
        assert_eq!(status & (B_ERROR | B_SELECT), B_ERROR | B_SELECT);

        // A new command without the keep bit clears the flags.
        command(&mut h, id, 0);
        h.run_for(Duration::from_millis(10));
        assert_eq!(h.device_register(id, REG_STATUS_B) & ERROR_FLAGS, 0);
    }

    #[test]
    fn command_change_stops_the_tape() {
        let (mut h, id) = loaded(1);
        command(&mut h, id, A_GO);
        h.run_for(Duration::from_millis(500));
        h.set_device_register(id, REG_STATUS_A, 0);
        h.run_for(Duration::from_millis(50));
        let stopped = h
            .events()
            .iter()
            .rev()
            .find_map(|e| match &e.event {
                OutputEvent::TapeStates { states } => Some(states[0]),
                _ => None,
            })
            .expect("the tape reported its motion");
        assert!(!stopped.moving);
        assert!(stopped.normalized_position > 0.0);
        assert!(stopped.normalized_position < 0.1);
        h.run_for(Duration::from_secs(30));
        assert_eq!(h.device_register(id, REG_STATUS_B), 0);
    }

    #[test]
    fn tape_actions() {
        let (mut h, id) = loaded(2);
        assert_eq!(
            h.action(id, Action::LoadTape { unit: 1, data: vec![0; 2 * image_words() + 1] }),
            Err(ActionError::Image(ImageError::TooLarge {
                size: 2 * image_words() + 1,
                capacity: 2 * image_words(),
            }))
        );
        assert_eq!(
            h.action(id, Action::DownloadTape { unit: 1 }),
            Err(ActionError::NotLoaded(1))
        );
        assert_eq!(
            h.action(id, Action::LoadTape { unit: 2, data: vec![] }),
            Err(ActionError::NoSuchUnit(2))
        );
        let events = h
            .action(id, Action::UnloadTape { unit: 0 })
            .expect("unit 0 exists");
        match &events[0].event {
            OutputEvent::TapeStates { states } => {
                assert_eq!(states.len(), 2);
                assert!(!states[0].loaded);
            }
            other => panic!("unexpected event {other:?}"),
        }
        h.action(
            id,
            Action::Reconfigure(PeripheralConfig::Tc08(DecTapeConfig { units: 4 })),
        )
        .expect("four units is a valid configuration");
        assert_eq!(
            h.configuration(id),
            Some(PeripheralConfig::Tc08(DecTapeConfig { units: 4 }))
        );
        assert!(h
            .action(id, Action::LoadTape { unit: 3, data: vec![1, 2] })
            .is_ok());
        assert!(matches!(
            h.action(id, Action::KeyPress { key: b'a' }),
            Err(ActionError::NotValidForDevice { .. })
        ));
    }
}
