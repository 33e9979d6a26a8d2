//! The peripherals.
//!
//! Each peripheral is a polled state machine.  The controller polls
//! it when the simulated time it asked for arrives; the peripheral
//! inspects its registers, advances its protocol (perhaps performing
//! data breaks) and says when it next wants to be polled.  Timing
//! (character intervals, seek latency, tape motion) is expressed only
//! through that next poll time; peripherals never sleep.
//!
//! The set of peripherals is closed: [`Device`] has one variant per
//! device family, so adding a family is a change the compiler checks
//! everywhere it matters.
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use base::prelude::*;

use crate::config::{ConfigError, PeripheralConfig};
use crate::context::Context;
use crate::databreak::{DataBreakChannel, DataBreakError, DataBreakReply, DataBreakRequest};
use crate::event::{Action, ActionError, OutputEvent};
use crate::regs::{device_register_address, RegisterBus, REG_ATTENTION};
use crate::types::{DeviceId, DeviceKind};

mod dectape;
mod fixedhead;
mod movinghead;
mod papertape;
mod rtc;
mod serial;
mod teleprinter;

pub use dectape::DecTape;
pub use fixedhead::FixedHeadDisk;
pub use movinghead::MovingHeadDisk;
pub use papertape::PaperTape;
pub use rtc::RealTimeClock;
pub use teleprinter::Teleprinter;

/// Register layouts, for whoever plays the part of the CPU.
pub mod registers {
    pub use super::dectape::{
        REG_STATUS_A as TC08_REG_STATUS_A, REG_STATUS_B as TC08_REG_STATUS_B,
        STATUS_A_NEW_COMMAND as TC08_NEW_COMMAND,
    };
    pub use super::fixedhead::{
        REG_COMMAND as DISK_REG_COMMAND, REG_DISK_ADDRESS as DISK_REG_DAR,
        REG_EXTENDED_ADDRESS as DISK_REG_EMA, REG_MEMORY_FIELD as DISK_REG_MEMORY_FIELD,
        REG_STATUS as DISK_REG_STATUS,
    };
    pub use super::movinghead::{
        REG_COMMAND as RK8E_REG_COMMAND, REG_CURRENT_ADDRESS as RK8E_REG_CURRENT_ADDRESS,
        REG_DISK_ADDRESS as RK8E_REG_DISK_ADDRESS, REG_STATUS as RK8E_REG_STATUS,
        REG_WORD_COUNT as RK8E_REG_WORD_COUNT,
    };
    pub use super::rtc::{REG_EXTERNAL_SYNC as CLOCK_REG_EXTERNAL_SYNC, REG_FREQUENCY as CLOCK_REG_FREQUENCY};
    pub use super::serial::{
        PUNCH_DONE, PUNCH_REQUEST, READER_READY, REG_PUNCH as SERIAL_REG_PUNCH,
        REG_READER as SERIAL_REG_READER,
    };
}

/// A peripheral's view of the bus: its own register block, its
/// attention bit and the shared data-break channel.
#[derive(Clone)]
pub struct DevicePort {
    id: DeviceId,
    bus: Arc<dyn RegisterBus>,
    breaks: Arc<DataBreakChannel>,
}

impl DevicePort {
    pub(crate) fn new(
        id: DeviceId,
        bus: Arc<dyn RegisterBus>,
        breaks: Arc<DataBreakChannel>,
    ) -> DevicePort {
        DevicePort { id, bus, breaks }
    }

    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[must_use]
    pub fn read(&self, reg: usize) -> u32 {
        self.bus.read(device_register_address(self.id, reg))
    }

    pub fn write(&self, reg: usize, value: u32) {
        self.bus.write(device_register_address(self.id, reg), value);
    }

    pub fn set_bits(&self, reg: usize, bits: u32) {
        self.bus.fetch_or(device_register_address(self.id, reg), bits);
    }

    pub fn clear_bits(&self, reg: usize, bits: u32) {
        self.bus.fetch_and(device_register_address(self.id, reg), !bits);
    }

    /// Read the low 12 bits of a register.
    #[must_use]
    pub fn read_word(&self, reg: usize) -> Unsigned12Bit {
        Unsigned12Bit::truncating_from(self.read(reg))
    }

    pub fn raise_attention(&self) {
        self.bus.fetch_or(REG_ATTENTION, self.id.attention_bit());
    }

    pub fn data_break(&self, request: &DataBreakRequest) -> Result<DataBreakReply, DataBreakError> {
        self.breaks.do_data_break(request)
    }
}

impl Debug for DevicePort {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("DevicePort")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// What a peripheral reports after being polled.
#[derive(Debug, PartialEq)]
pub struct PollOutcome {
    /// The (simulated) time at which the peripheral next wants to be
    /// polled.
    pub poll_after: Duration,
    pub events: Vec<OutputEvent>,
}

impl PollOutcome {
    #[must_use]
    pub fn after(poll_after: Duration) -> PollOutcome {
        PollOutcome {
            poll_after,
            events: Vec::new(),
        }
    }
}

pub trait Peripheral {
    fn kind(&self) -> DeviceKind;

    /// The device codes this peripheral answers to.
    fn bus_connections(&self) -> Vec<Unsigned6Bit>;

    /// Called once the peripheral has been given its register block.
    fn attach(&mut self, ctx: &Context, port: &DevicePort);

    fn poll(&mut self, ctx: &Context, port: &DevicePort) -> PollOutcome;

    fn request_action(
        &mut self,
        ctx: &Context,
        port: &DevicePort,
        action: Action,
    ) -> Result<Vec<OutputEvent>, ActionError>;

    fn configuration(&self) -> PeripheralConfig;

    fn name(&self) -> String {
        self.kind().to_string()
    }
}

pub(crate) fn not_valid_for(action: &Action, device: DeviceKind) -> ActionError {
    ActionError::NotValidForDevice {
        action: action.name(),
        device,
    }
}

/// Check that `offered` is a valid configuration for a device of kind
/// `device`.
pub(crate) fn check_reconfiguration(
    device: DeviceKind,
    offered: &PeripheralConfig,
) -> Result<(), ConfigError> {
    if offered.kind() != device {
        return Err(ConfigError::KindMismatch {
            device,
            offered: offered.kind(),
        });
    }
    offered.validate()
}

pub enum Device {
    Teleprinter(Teleprinter),
    PaperTape(PaperTape),
    FixedHeadDisk(FixedHeadDisk),
    MovingHeadDisk(MovingHeadDisk),
    DecTape(DecTape),
    Clock(RealTimeClock),
}

impl Device {
    pub fn from_config(config: &PeripheralConfig) -> Result<Device, ConfigError> {
        config.validate()?;
        Ok(match config {
            PeripheralConfig::Teleprinter(conf) => Device::Teleprinter(Teleprinter::new(*conf)),
            PeripheralConfig::PaperTape(conf) => Device::PaperTape(PaperTape::new(*conf)),
            PeripheralConfig::Df32 => Device::FixedHeadDisk(FixedHeadDisk::df32()),
            PeripheralConfig::Rf08 => Device::FixedHeadDisk(FixedHeadDisk::rf08()),
            PeripheralConfig::Rk8e => Device::MovingHeadDisk(MovingHeadDisk::new()),
            PeripheralConfig::Tc08(conf) => Device::DecTape(DecTape::new(*conf)),
            PeripheralConfig::Clock(conf) => Device::Clock(RealTimeClock::new(*conf)),
        })
    }

    fn inner(&self) -> &dyn Peripheral {
        match self {
            Device::Teleprinter(d) => d,
            Device::PaperTape(d) => d,
            Device::FixedHeadDisk(d) => d,
            Device::MovingHeadDisk(d) => d,
            Device::DecTape(d) => d,
            Device::Clock(d) => d,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Peripheral {
        match self {
            Device::Teleprinter(d) => d,
            Device::PaperTape(d) => d,
            Device::FixedHeadDisk(d) => d,
            Device::MovingHeadDisk(d) => d,
            Device::DecTape(d) => d,
            Device::Clock(d) => d,
        }
    }
}

impl Peripheral for Device {
    fn kind(&self) -> DeviceKind {
        self.inner().kind()
    }

    fn bus_connections(&self) -> Vec<Unsigned6Bit> {
        self.inner().bus_connections()
    }

    fn attach(&mut self, ctx: &Context, port: &DevicePort) {
        self.inner_mut().attach(ctx, port)
    }

    fn poll(&mut self, ctx: &Context, port: &DevicePort) -> PollOutcome {
        self.inner_mut().poll(ctx, port)
    }

    fn request_action(
        &mut self,
        ctx: &Context,
        port: &DevicePort,
        action: Action,
    ) -> Result<Vec<OutputEvent>, ActionError> {
        self.inner_mut().request_action(ctx, port, action)
    }

    fn configuration(&self) -> PeripheralConfig {
        self.inner().configuration()
    }

    fn name(&self) -> String {
        self.inner().name()
    }
}

impl Debug for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "Device({})", self.name())
    }
}
