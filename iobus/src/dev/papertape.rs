//! The high-speed paper tape reader and punch, device codes 01
//! (reader) and 02 (punch).
//!
//! This is the same shape as the teleprinter but has no keyboard, and
//! the reader is active from the start.  The punch runs at a fixed 50
//! characters per second.
use base::prelude::*;

use super::serial::{chars_per_second, SerialPunch, SerialReader};
use super::{check_reconfiguration, not_valid_for, DevicePort, Peripheral, PollOutcome};
use crate::config::{PaperTapeConfig, PeripheralConfig};
use crate::context::Context;
use crate::event::{Action, ActionError, OutputEvent};
use crate::types::DeviceKind;

const PUNCH_CPS: u32 = 50;

#[derive(Debug)]
pub struct PaperTape {
    config: PaperTapeConfig,
    reader: SerialReader,
    punch: SerialPunch,
}

impl PaperTape {
    #[must_use]
    pub fn new(config: PaperTapeConfig) -> PaperTape {
        PaperTape {
            config,
            reader: SerialReader::new(chars_per_second(config.baud_rate), true),
            punch: SerialPunch::new(PUNCH_CPS, 0o377),
        }
    }
}

impl Peripheral for PaperTape {
    fn kind(&self) -> DeviceKind {
        DeviceKind::PaperTape
    }

    fn bus_connections(&self) -> Vec<Unsigned6Bit> {
        vec![u6!(0o01), u6!(0o02)]
    }

    fn attach(&mut self, _ctx: &Context, _port: &DevicePort) {}

    fn poll(&mut self, ctx: &Context, port: &DevicePort) -> PollOutcome {
        let now = ctx.simulated_time;
        let mut events = Vec::new();
        let reader_next = self.reader.poll(now, port, &mut events);
        let punch_next = self.punch.poll(now, port, &mut events);
        PollOutcome {
            poll_after: reader_next.min(punch_next),
            events,
        }
    }

    fn request_action(
        &mut self,
        _ctx: &Context,
        _port: &DevicePort,
        action: Action,
    ) -> Result<Vec<OutputEvent>, ActionError> {
        match action {
            Action::ReaderTapeSet { data } => self.reader.load_tape(data),
            Action::ReaderSetActive { active } => self.reader.set_active(active),
            Action::Reconfigure(conf) => {
                check_reconfiguration(self.kind(), &conf)?;
                if let PeripheralConfig::PaperTape(conf) = conf {
                    self.reader.set_cps(chars_per_second(conf.baud_rate));
                    self.config = conf;
                }
            }
            other => return Err(not_valid_for(&other, self.kind())),
        }
        Ok(Vec::new())
    }

    fn configuration(&self) -> PeripheralConfig {
        PeripheralConfig::PaperTape(self.config)
    }
}
