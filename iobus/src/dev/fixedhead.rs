//! Fixed-head disks: the DF32 (device codes 60-62) and the RF08
//! (device codes 60-62 and 64).
//!
//! Both transfer through three-cycle data breaks using the word count
//! and current address at 7750 and 7751 of field 0.  A transfer runs
//! until the word count overflows, advancing the disk address by one
//! for each word.
//!
//! ## Registers
//!
//! | Register | Meaning                                                  |
//! | -------- | -------------------------------------------------------- |
//! | 1        | Command: bit 0 read (disk to memory), bit 1 write        |
//! | 2        | Disk address, low 12 bits                                |
//! | 3        | Extended address (EMA)                                   |
//! | 4        | Status: bit 0 done, bit 1 error                          |
//! | 5        | RF08 only: memory extension, field in bits 3-5           |
//!
//! The DF32 keeps the high disk address bits in EMA bits 0-4 and the
//! memory field in EMA bits 6-8.  The RF08 keeps the high disk
//! address bits in EMA bits 0-7.  Either way there are four disk
//! units: the DF32 with its DS32 expanders holds 4 x 16 tracks of
//! 2048 words, and the RF08 with RS08 disks 4 x 128 tracks.
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::serial::IDLE_POLL_INTERVAL;
use super::{check_reconfiguration, not_valid_for, DevicePort, Peripheral, PollOutcome};
use crate::config::PeripheralConfig;
use crate::context::Context;
use crate::databreak::{DataBreakError, DataBreakRequest};
use crate::event::{Action, ActionError, OutputEvent};
use crate::image::UnitImage;
use crate::types::DeviceKind;

pub const REG_COMMAND: usize = 1;
pub const REG_DISK_ADDRESS: usize = 2;
pub const REG_EXTENDED_ADDRESS: usize = 3;
pub const REG_STATUS: usize = 4;
pub const REG_MEMORY_FIELD: usize = 5;

pub const COMMAND_READ: u32 = 1 << 0;
pub const COMMAND_WRITE: u32 = 1 << 1;
const COMMAND_MASK: u32 = COMMAND_READ | COMMAND_WRITE;

pub const STATUS_DONE: u32 = 1 << 0;
pub const STATUS_ERROR: u32 = 1 << 1;

const WORD_COUNT_ADDRESS: Unsigned12Bit = u12!(0o7750);
const WORDS_PER_TRACK: usize = 2048;
const UNITS: usize = 4;
const LATENCY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Model {
    Df32,
    Rf08,
}

impl Model {
    fn tracks_per_unit(&self) -> usize {
        match self {
            Model::Df32 => 16,
            Model::Rf08 => 128,
        }
    }

    fn word_time(&self) -> Duration {
        match self {
            Model::Df32 => Duration::from_micros(66),
            Model::Rf08 => Duration::from_micros(16),
        }
    }

    /// The EMA bits which extend the disk address.
    fn extended_address_mask(&self) -> u32 {
        match self {
            Model::Df32 => 0o37,
            Model::Rf08 => 0o377,
        }
    }

    fn memory_field(&self, port: &DevicePort) -> Unsigned3Bit {
        match self {
            Model::Df32 => Unsigned3Bit::truncating_from(port.read(REG_EXTENDED_ADDRESS) >> 6),
            Model::Rf08 => Unsigned3Bit::truncating_from(port.read(REG_MEMORY_FIELD) >> 3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Latency { command: u32, until: Duration },
    Transferring { command: u32 },
}

#[derive(Debug)]
enum TransferFailure {
    Break(DataBreakError),
    NoSuchAddress(usize),
}

impl Display for TransferFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            TransferFailure::Break(e) => write!(f, "{e}"),
            TransferFailure::NoSuchAddress(addr) => {
                write!(f, "disk address {addr:o} is beyond the last unit")
            }
        }
    }
}

#[derive(Debug)]
pub struct FixedHeadDisk {
    model: Model,
    units: Vec<UnitImage>,
    state: State,
}

impl FixedHeadDisk {
    #[must_use]
    pub fn df32() -> FixedHeadDisk {
        FixedHeadDisk::new(Model::Df32)
    }

    #[must_use]
    pub fn rf08() -> FixedHeadDisk {
        FixedHeadDisk::new(Model::Rf08)
    }

    fn new(model: Model) -> FixedHeadDisk {
        let words = model.tracks_per_unit() * WORDS_PER_TRACK;
        FixedHeadDisk {
            model,
            units: (0..UNITS).map(|_| UnitImage::blank(words)).collect(),
            state: State::Idle,
        }
    }

    fn words_per_unit(&self) -> usize {
        self.model.tracks_per_unit() * WORDS_PER_TRACK
    }

    fn disk_address(&self, port: &DevicePort) -> usize {
        let high = port.read(REG_EXTENDED_ADDRESS) & self.model.extended_address_mask();
        let low = port.read(REG_DISK_ADDRESS) & 0o7777;
        ((high << 12) | low) as usize
    }

    fn store_disk_address(&self, port: &DevicePort, addr: usize) {
        let mask = self.model.extended_address_mask();
        let high = ((addr >> 12) as u32) & mask;
        let ema = port.read(REG_EXTENDED_ADDRESS);
        port.write(REG_DISK_ADDRESS, (addr & 0o7777) as u32);
        port.write(REG_EXTENDED_ADDRESS, (ema & !mask) | high);
    }

    /// Move one word.  Returns true when the word count has
    /// overflowed.
    fn transfer_word(&mut self, command: u32, port: &DevicePort) -> Result<bool, TransferFailure> {
        let addr = self.disk_address(port);
        let words_per_unit = self.words_per_unit();
        let (unit, offset) = (addr / words_per_unit, addr % words_per_unit);
        let image = self
            .units
            .get_mut(unit)
            .ok_or(TransferFailure::NoSuchAddress(addr))?;
        let request = DataBreakRequest::three_cycle(WORD_COUNT_ADDRESS, self.model.memory_field(port));
        let reply = if command == COMMAND_READ {
            let word = image
                .word(offset)
                .ok_or(TransferFailure::NoSuchAddress(addr))?;
            port.data_break(&request.into_memory(word))
                .map_err(TransferFailure::Break)?
        } else {
            let reply = port.data_break(&request).map_err(TransferFailure::Break)?;
            if !image.set_word(offset, reply.data) {
                return Err(TransferFailure::NoSuchAddress(addr));
            }
            reply
        };
        self.store_disk_address(port, (addr + 1) % (words_per_unit * UNITS));
        Ok(reply.word_count_overflow)
    }

    fn finish(&mut self, port: &DevicePort, status: u32) {
        port.write(REG_STATUS, status);
        port.write(REG_COMMAND, 0);
        port.raise_attention();
        self.state = State::Idle;
    }

    fn unit_image(&mut self, unit: u8) -> Result<&mut UnitImage, ActionError> {
        self.units
            .get_mut(usize::from(unit))
            .ok_or(ActionError::NoSuchUnit(unit))
    }
}

impl Peripheral for FixedHeadDisk {
    fn kind(&self) -> DeviceKind {
        match self.model {
            Model::Df32 => DeviceKind::Df32,
            Model::Rf08 => DeviceKind::Rf08,
        }
    }

    fn bus_connections(&self) -> Vec<Unsigned6Bit> {
        match self.model {
            Model::Df32 => vec![u6!(0o60), u6!(0o61), u6!(0o62)],
            Model::Rf08 => vec![u6!(0o60), u6!(0o61), u6!(0o62), u6!(0o64)],
        }
    }

    fn attach(&mut self, _ctx: &Context, _port: &DevicePort) {
        self.state = State::Idle;
    }

    fn poll(&mut self, ctx: &Context, port: &DevicePort) -> PollOutcome {
        let now = ctx.simulated_time;
        let live = port.read(REG_COMMAND) & COMMAND_MASK;
        let command = match self.state {
            State::Idle => {
                if live == 0 {
                    return PollOutcome::after(now + IDLE_POLL_INTERVAL);
                }
                if live == COMMAND_MASK {
                    event!(Level::WARN, "disk command {:o} asks to read and write", live);
                    self.finish(port, STATUS_ERROR);
                    return PollOutcome::after(now + IDLE_POLL_INTERVAL);
                }
                event!(
                    Level::DEBUG,
                    "disk {} starting at disk address {:o}",
                    if live == COMMAND_READ { "read" } else { "write" },
                    self.disk_address(port)
                );
                port.write(REG_STATUS, 0);
                let until = now + LATENCY;
                self.state = State::Latency {
                    command: live,
                    until,
                };
                return PollOutcome::after(until);
            }
            State::Latency { command, until } => {
                if live == command && now < until {
                    return PollOutcome::after(until);
                }
                command
            }
            State::Transferring { command } => command,
        };
        if live != command {
            event!(
                Level::DEBUG,
                "disk command changed from {:o} to {:o}; transfer abandoned",
                command,
                live
            );
            self.state = State::Idle;
            return PollOutcome::after(now + IDLE_POLL_INTERVAL);
        }

        self.state = State::Transferring { command };
        match self.transfer_word(command, port) {
            Ok(false) => PollOutcome::after(now + self.model.word_time()),
            Ok(true) => {
                event!(Level::DEBUG, "disk transfer complete");
                self.finish(port, STATUS_DONE);
                PollOutcome::after(now + IDLE_POLL_INTERVAL)
            }
            Err(e) => {
                event!(Level::WARN, "disk transfer failed: {}", e);
                self.finish(port, STATUS_ERROR);
                PollOutcome::after(now + IDLE_POLL_INTERVAL)
            }
        }
    }

    fn request_action(
        &mut self,
        _ctx: &Context,
        _port: &DevicePort,
        action: Action,
    ) -> Result<Vec<OutputEvent>, ActionError> {
        match action {
            Action::UploadDisk { unit, data } => {
                self.unit_image(unit)?.upload(&data)?;
                event!(Level::INFO, "disk unit {} loaded ({} bytes)", unit, data.len());
                Ok(Vec::new())
            }
            Action::DownloadDisk { unit } => {
                let data = self.unit_image(unit)?.download();
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
        match self.model {
            Model::Df32 => PeripheralConfig::Df32,
            Model::Rf08 => PeripheralConfig::Rf08,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::Harness;
    use crate::image::ImageError;

    const BUFFER: usize = 0o1000;

    fn start(h: &mut Harness, command: u32, words: usize, dar: u32) {
        let id = h.device_ids()[0];
        h.poke(0o7750, (0o10000 - words) as u16);
        h.poke(0o7751, (BUFFER - 1) as u16);
        h.set_device_register(id, REG_DISK_ADDRESS, dar);
        h.set_device_register(id, REG_COMMAND, command);
    }

    fn wait_for_status(h: &mut Harness) -> u32 {
        let id = h.device_ids()[0];
        h.run_until(Duration::from_secs(5), |h| {
            h.device_register(id, REG_STATUS) != 0
        });
        h.device_register(id, REG_STATUS)
    }

    #[test]
    fn write_then_read_back() {
        const N: usize = 100;
        let mut h = Harness::new(&[PeripheralConfig::Df32]);
        let id = h.device_ids()[0];
        for i in 0..N {
            h.poke(BUFFER + i, (0o5000 + i) as u16);
        }
        start(&mut h, COMMAND_WRITE, N, 0o200);
        assert_eq!(wait_for_status(&mut h), STATUS_DONE);
        assert_eq!(h.peek(0o7750), 0);
        assert_eq!(h.peek(0o7751) as usize, BUFFER + N - 1);
        assert_eq!(h.device_register(id, REG_DISK_ADDRESS), 0o200 + N as u32);
        assert_eq!(h.device_register(id, REG_COMMAND), 0);

        let dump = h
            .download(id, Action::DownloadDisk { unit: 0 })
            .expect("disk unit 0 exists");
        let word_at = |i: usize| u16::from_le_bytes([dump[2 * i], dump[2 * i + 1]]);
        assert_eq!(word_at(0o200), 0o5000);
        assert_eq!(word_at(0o200 + N - 1), (0o5000 + N - 1) as u16);
        // Exactly N words were transferred.
        assert_eq!(word_at(0o200 + N), 0);

        for i in 0..N {
            h.poke(BUFFER + i, 0);
        }
        h.set_device_register(id, REG_STATUS, 0);
        start(&mut h, COMMAND_READ, N, 0o200);
        assert_eq!(wait_for_status(&mut h), STATUS_DONE);
        for i in 0..N {
            assert_eq!(h.peek(BUFFER + i) as usize, 0o5000 + i);
        }
        assert_eq!(h.peek(BUFFER + N), 0);
    }

    #[test]
    fn upload_download_round_trip() {
        let mut h = Harness::new(&[PeripheralConfig::Df32]);
        let id = h.device_ids()[0];
        let dump = vec![0x55_u8; 65536];
        h.action(id, Action::UploadDisk { unit: 0, data: dump.clone() })
            .expect("64K dump fits a DF32 unit");
        assert_eq!(h.download(id, Action::DownloadDisk { unit: 0 }), Some(dump));
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let mut h = Harness::new(&[PeripheralConfig::Df32]);
        let id = h.device_ids()[0];
        h.action(id, Action::UploadDisk { unit: 1, data: vec![1, 2, 3, 4] })
            .expect("small dump fits");
        assert_eq!(
            h.action(id, Action::UploadDisk { unit: 1, data: vec![0; 65537] }),
            Err(ActionError::Image(ImageError::TooLarge {
                size: 65537,
                capacity: 65536
            }))
        );
        let kept = h
            .download(id, Action::DownloadDisk { unit: 1 })
            .expect("unit 1 exists");
        assert_eq!(&kept[..4], &[1, 2, 3, 4]);
        assert_eq!(
            h.action(id, Action::UploadDisk { unit: 4, data: vec![] }),
            Err(ActionError::NoSuchUnit(4))
        );
    }

    #[test]
    fn command_change_aborts_without_done() {
        let mut h = Harness::new(&[PeripheralConfig::Df32]);
        let id = h.device_ids()[0];
        start(&mut h, COMMAND_READ, 1000, 0);
        h.run_until(Duration::from_secs(1), |h| h.peek(0o7750) > 0o7000);
        h.set_device_register(id, REG_COMMAND, 0);
        h.run_for(Duration::from_millis(100));
        assert_eq!(h.device_register(id, REG_STATUS), 0);
        let remaining = h.peek(0o7750);
        assert!(remaining != 0);
        h.run_for(Duration::from_millis(100));
        assert_eq!(h.peek(0o7750), remaining);
    }

    #[test]
    fn rf08_field_and_extended_address() {
        let mut h = Harness::new(&[PeripheralConfig::Rf08]);
        let id = h.device_ids()[0];
        // Unit 1 begins at disk word 0o1000000.
        let mut image = vec![0_u8; 2 * 128 * 2048];
        image[0] = 0o17;
        h.action(id, Action::UploadDisk { unit: 1, data: image })
            .expect("image fits an RS08");
        h.set_device_register(id, REG_EXTENDED_ADDRESS, 0o100);
        h.set_device_register(id, REG_MEMORY_FIELD, 1 << 3);
        start(&mut h, COMMAND_READ, 1, 0);
        assert_eq!(wait_for_status(&mut h), STATUS_DONE);
        assert_eq!(h.peek(0o10000 + BUFFER), 0o17);
        assert_eq!(h.device_register(id, REG_DISK_ADDRESS), 1);
        assert_eq!(h.device_register(id, REG_EXTENDED_ADDRESS), 0o100);
    }

    #[test]
    fn df32_memory_field_comes_from_ema() {
        let mut h = Harness::new(&[PeripheralConfig::Df32]);
        let id = h.device_ids()[0];
        h.poke(0o10000 + BUFFER, 0o4321);
        // Field 1, disk address 0o40000.
        h.set_device_register(id, REG_EXTENDED_ADDRESS, (1 << 6) | 0o4);
        start(&mut h, COMMAND_WRITE, 1, 0);
        assert_eq!(wait_for_status(&mut h), STATUS_DONE);
        let dump = h
            .download(id, Action::DownloadDisk { unit: 0 })
            .expect("unit 0 exists");
        let i = 0o40000;
        assert_eq!(u16::from_le_bytes([dump[2 * i], dump[2 * i + 1]]), 0o4321);
        // The field bits survive the disk address update.
        assert_eq!(h.device_register(id, REG_EXTENDED_ADDRESS), (1 << 6) | 0o4);
    }

    #[test]
    fn break_failure_sets_error() {
        let mut h = Harness::without_responder(&[PeripheralConfig::Df32]);
        let id = h.device_ids()[0];
        h.set_device_register(id, REG_COMMAND, COMMAND_READ);
        assert_eq!(wait_for_status(&mut h), STATUS_ERROR);
        assert_eq!(h.device_register(id, REG_COMMAND), 0);
    }

    #[test]
    fn transfer_failure_display() {
        assert_eq!(
            TransferFailure::NoSuchAddress(0o400000).to_string(),
            "disk address 400000 is beyond the last unit"
        );
        let request = DataBreakRequest::three_cycle(WORD_COUNT_ADDRESS, u3!(2));
        assert_eq!(
            TransferFailure::Break(DataBreakError::Timeout(request)).to_string(),
            DataBreakError::Timeout(request).to_string()
        );
    }
}
