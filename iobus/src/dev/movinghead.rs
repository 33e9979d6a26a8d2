//! The RK8E moving-head disk controller with up to four RK05 drives,
//! device code 74.
//!
//! Unlike the fixed-head disks, the RK8E keeps its word count and
//! current address in its own registers and transfers through
//! single-cycle data breaks.
//!
//! ## Registers
//!
//! | Register | Meaning                                            |
//! | -------- | -------------------------------------------------- |
//! | 1        | Command (bits 0-11) and GO (bit 12)                |
//! | 2        | Disk address                                       |
//! | 3        | Current address                                    |
//! | 4        | Word count (two's complement)                      |
//! | 5        | Status                                             |
//!
//! Command bits, PDP-8 numbering (bit 0 is the most significant):
//! 0-2 function, 5 half block, 6-8 memory field, 9-10 drive,
//! 11 high bit of the cylinder.  The disk address holds the low seven
//! bits of the cylinder in bits 0-6, the surface in bit 7 and the
//! sector in bits 8-11.
//!
//! Setting GO starts the command in register 1.  A word count of zero
//! transfers a whole sector (256 words, or 128 for a half block).
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::serial::IDLE_POLL_INTERVAL;
use super::{check_reconfiguration, not_valid_for, DevicePort, Peripheral, PollOutcome};
use crate::config::PeripheralConfig;
use crate::context::Context;
use crate::databreak::DataBreakRequest;
use crate::event::{Action, ActionError, OutputEvent};
use crate::image::UnitImage;
use crate::types::DeviceKind;

pub const REG_COMMAND: usize = 1;
pub const REG_DISK_ADDRESS: usize = 2;
pub const REG_CURRENT_ADDRESS: usize = 3;
pub const REG_WORD_COUNT: usize = 4;
pub const REG_STATUS: usize = 5;

pub const COMMAND_GO: u32 = 1 << 12;
const COMMAND_BITS: u32 = 0o7777;
const COMMAND_HALF_BLOCK: u32 = 0o100;

pub const STATUS_DONE: u32 = 0o4000;
pub const STATUS_HEAD_IN_MOTION: u32 = 0o2000;
pub const STATUS_WRITE_LOCK: u32 = 0o0020;
pub const STATUS_DATA_LATE: u32 = 0o0004;
pub const STATUS_DRIVE_ERROR: u32 = 0o0002;
pub const STATUS_CYLINDER_ERROR: u32 = 0o0001;

pub const CYLINDERS: u32 = 203;
const SURFACES: usize = 2;
const SECTORS: usize = 16;
const WORDS_PER_SECTOR: usize = 256;
const WORDS_PER_DRIVE: usize = CYLINDERS as usize * SURFACES * SECTORS * WORDS_PER_SECTOR;
const DRIVES: usize = 4;

const SETTLE_TIME: Duration = Duration::from_millis(10);
const TIME_PER_CYLINDER: Duration = Duration::from_micros(100);
const WORD_TIME: Duration = Duration::from_micros(11);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Read,
    ReadAll,
    WriteProtect,
    Seek,
    Write,
    WriteAll,
    Unused(u32),
}

impl Function {
    fn decode(command: u32) -> Function {
        match (command >> 9) & 7 {
            0 => Function::Read,
            1 => Function::ReadAll,
            2 => Function::WriteProtect,
            3 => Function::Seek,
            4 => Function::Write,
            5 => Function::WriteAll,
            n => Function::Unused(n),
        }
    }

    fn writes(&self) -> bool {
        matches!(self, Function::Write | Function::WriteAll)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Operation {
    command: u32,
    function: Function,
    drive: usize,
    cylinder: u32,
    field: Unsigned3Bit,
    /// Index on the drive of the first word of the transfer.
    start: usize,
    words_done: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Seeking { op: Operation, until: Duration },
    Transferring { op: Operation },
}

#[derive(Debug)]
struct Drive {
    image: UnitImage,
    cylinder: u32,
    write_protected: bool,
}

#[derive(Debug)]
pub struct MovingHeadDisk {
    drives: Vec<Drive>,
    state: State,
}

impl Default for MovingHeadDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl MovingHeadDisk {
    #[must_use]
    pub fn new() -> MovingHeadDisk {
        MovingHeadDisk {
            drives: (0..DRIVES)
                .map(|_| Drive {
                    image: UnitImage::blank(WORDS_PER_DRIVE),
                    cylinder: 0,
                    write_protected: false,
                })
                .collect(),
            state: State::Idle,
        }
    }

    fn finish(&mut self, port: &DevicePort, status: u32) {
        event!(Level::DEBUG, "RK8E command finished with status {:04o}", status);
        port.write(REG_STATUS, STATUS_DONE | status);
        port.raise_attention();
        self.state = State::Idle;
    }

    fn seek_time(&self, drive: usize, cylinder: u32) -> Duration {
        let from = self.drives.get(drive).map_or(0, |d| d.cylinder);
        SETTLE_TIME + TIME_PER_CYLINDER * from.abs_diff(cylinder)
    }

    fn start(&mut self, command: u32, now: Duration, port: &DevicePort) -> Duration {
        let function = Function::decode(command);
        let drive = ((command >> 1) & 3) as usize;
        let disk_address = port.read(REG_DISK_ADDRESS) & 0o7777;
        let cylinder = ((command & 1) << 7) | ((disk_address >> 5) & 0o177);
        let surface = ((disk_address >> 4) & 1) as usize;
        let sector = (disk_address & 0o17) as usize;
        event!(
            Level::DEBUG,
            "RK8E {:?} drive {} cylinder {} surface {} sector {}",
            function,
            drive,
            cylinder,
            surface,
            sector
        );
        port.write(REG_STATUS, 0);

        match function {
            Function::Unused(n) => {
                event!(Level::WARN, "RK8E function {} is not implemented", n);
                self.finish(port, STATUS_DRIVE_ERROR);
                return now + IDLE_POLL_INTERVAL;
            }
            Function::WriteProtect => {
                if let Some(d) = self.drives.get_mut(drive) {
                    d.write_protected = true;
                }
                self.finish(port, 0);
                return now + IDLE_POLL_INTERVAL;
            }
            _ => (),
        }
        if cylinder >= CYLINDERS {
            self.finish(port, STATUS_CYLINDER_ERROR);
            return now + IDLE_POLL_INTERVAL;
        }
        if function.writes() && self.drives.get(drive).is_some_and(|d| d.write_protected) {
            self.finish(port, STATUS_WRITE_LOCK);
            return now + IDLE_POLL_INTERVAL;
        }
        if function != Function::Seek && port.read_word(REG_WORD_COUNT).is_zero() {
            let words: u32 = if command & COMMAND_HALF_BLOCK != 0 {
                128
            } else {
                256
            };
            port.write(REG_WORD_COUNT, 0o10000 - words);
        }
        let block = (cylinder as usize * SURFACES + surface) * SECTORS + sector;
        let op = Operation {
            command,
            function,
            drive,
            cylinder,
            field: Unsigned3Bit::truncating_from(command >> 3),
            start: block * WORDS_PER_SECTOR,
            words_done: 0,
        };
        let until = now + self.seek_time(drive, cylinder);
        port.set_bits(REG_STATUS, STATUS_HEAD_IN_MOTION);
        self.state = State::Seeking { op, until };
        until
    }

    fn transfer_word(&mut self, mut op: Operation, now: Duration, port: &DevicePort) -> Duration {
        let Some(drive) = self.drives.get_mut(op.drive) else {
            self.finish(port, STATUS_DRIVE_ERROR);
            return now + IDLE_POLL_INTERVAL;
        };
        let index = op.start + op.words_done;
        if index >= drive.image.capacity_words() {
            self.finish(port, STATUS_CYLINDER_ERROR);
            return now + IDLE_POLL_INTERVAL;
        }
        let ca = port.read_word(REG_CURRENT_ADDRESS);
        let target = DataBreakRequest::one_cycle(Address::new(op.field, ca));
        let result = if op.function.writes() {
            port.data_break(&target).map(|reply| {
                drive.image.set_word(index, reply.data);
            })
        } else {
            let word = drive.image.word(index).unwrap_or_default();
            port.data_break(&target.into_memory(word)).map(|_| ())
        };
        if let Err(e) = result {
            event!(Level::WARN, "RK8E transfer failed: {}", e);
            self.finish(port, STATUS_DATA_LATE);
            return now + IDLE_POLL_INTERVAL;
        }
        port.write(
            REG_CURRENT_ADDRESS,
            u32::from(ca.wrapping_add(Unsigned12Bit::ONE)),
        );
        let (wc, overflow) = port.read_word(REG_WORD_COUNT).overflowing_increment();
        port.write(REG_WORD_COUNT, u32::from(wc));
        op.words_done += 1;

        if overflow {
            if op.function.writes() {
                // The rest of a partly written sector is zero filled.
                let sector_end = (index / WORDS_PER_SECTOR + 1) * WORDS_PER_SECTOR;
                for i in index + 1..sector_end {
                    drive.image.set_word(i, Unsigned12Bit::ZERO);
                }
            }
            self.finish(port, 0);
            now + IDLE_POLL_INTERVAL
        } else {
            self.state = State::Transferring { op };
            now + WORD_TIME
        }
    }

    fn drive_image(&mut self, unit: u8) -> Result<&mut UnitImage, ActionError> {
        self.drives
            .get_mut(usize::from(unit))
            .map(|d| &mut d.image)
            .ok_or(ActionError::NoSuchUnit(unit))
    }
}

impl Peripheral for MovingHeadDisk {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Rk8e
    }

    fn bus_connections(&self) -> Vec<Unsigned6Bit> {
        vec![u6!(0o74)]
    }

    fn attach(&mut self, _ctx: &Context, _port: &DevicePort) {
        self.state = State::Idle;
    }

    fn poll(&mut self, ctx: &Context, port: &DevicePort) -> PollOutcome {
        let now = ctx.simulated_time;
        let reg = port.read(REG_COMMAND);
        let poll_after = match self.state {
            State::Idle => {
                if reg & COMMAND_GO == 0 {
                    now + IDLE_POLL_INTERVAL
                } else {
                    port.clear_bits(REG_COMMAND, COMMAND_GO);
                    self.start(reg & COMMAND_BITS, now, port)
                }
            }
            State::Seeking { op, .. } | State::Transferring { op }
                if reg & COMMAND_GO != 0 || reg & COMMAND_BITS != op.command =>
            {
                event!(
                    Level::DEBUG,
                    "RK8E command changed from {:04o} to {:04o}; operation abandoned",
                    op.command,
                    reg
                );
                port.clear_bits(REG_STATUS, STATUS_HEAD_IN_MOTION);
                self.state = State::Idle;
                now
            }
            State::Seeking { op, until } => {
                if now < until {
                    until
                } else {
                    if let Some(d) = self.drives.get_mut(op.drive) {
                        d.cylinder = op.cylinder;
                    }
                    port.clear_bits(REG_STATUS, STATUS_HEAD_IN_MOTION);
                    if op.function == Function::Seek {
                        self.finish(port, 0);
                        now + IDLE_POLL_INTERVAL
                    } else {
                        self.transfer_word(op, now, port)
                    }
                }
            }
            State::Transferring { op } => self.transfer_word(op, now, port),
        };
        PollOutcome::after(poll_after)
    }

    fn request_action(
        &mut self,
        _ctx: &Context,
        _port: &DevicePort,
        action: Action,
    ) -> Result<Vec<OutputEvent>, ActionError> {
        match action {
            Action::UploadDisk { unit, data } => {
                self.drive_image(unit)?.upload(&data)?;
                event!(Level::INFO, "RK05 drive {} loaded ({} bytes)", unit, data.len());
                Ok(Vec::new())
            }
            Action::DownloadDisk { unit } => {
                let data = self.drive_image(unit)?.download();
                Ok(vec![OutputEvent::DumpData { unit, data }])
            }
            Action::Reconfigure(conf) => {
                check_reconfiguration(self.kind(), &conf)?;
                Ok(Vec::new())
            }
            other => Err(not_valid_for(&other, self.kind())),
        }
    }

    fn configuration(&self) -> PeripheralConfig {
        PeripheralConfig::Rk8e
    }
}
