//! The real-time (line frequency) clock, device code 13.
//!
//! The clock only publishes its configuration: register 1 holds the
//! line frequency in hertz and register 2 is non-zero when the clock
//! is synchronised to an external source.  Generating the clock
//! interrupts is the CPU side's business.
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::{check_reconfiguration, not_valid_for, DevicePort, Peripheral, PollOutcome};
use crate::config::{ClockConfig, PeripheralConfig};
use crate::context::Context;
use crate::event::{Action, ActionError, OutputEvent};
use crate::types::DeviceKind;

pub const REG_FREQUENCY: usize = 1;
pub const REG_EXTERNAL_SYNC: usize = 2;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct RealTimeClock {
    config: ClockConfig,
}

impl RealTimeClock {
    #[must_use]
    pub fn new(config: ClockConfig) -> RealTimeClock {
        RealTimeClock { config }
    }

    fn publish(&self, port: &DevicePort) {
        port.write(REG_FREQUENCY, self.config.frequency.hertz());
        port.write(REG_EXTERNAL_SYNC, u32::from(self.config.external_sync));
    }
}

impl Peripheral for RealTimeClock {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Clock
    }

    fn bus_connections(&self) -> Vec<Unsigned6Bit> {
        vec![u6!(0o13)]
    }

    fn attach(&mut self, _ctx: &Context, port: &DevicePort) {
        self.publish(port);
    }

    fn poll(&mut self, ctx: &Context, _port: &DevicePort) -> PollOutcome {
        PollOutcome::after(ctx.simulated_time + POLL_INTERVAL)
    }

    fn request_action(
        &mut self,
        _ctx: &Context,
        port: &DevicePort,
        action: Action,
    ) -> Result<Vec<OutputEvent>, ActionError> {
        match action {
            Action::Reconfigure(conf) => {
                check_reconfiguration(self.kind(), &conf)?;
                if let PeripheralConfig::Clock(conf) = conf {
                    event!(Level::INFO, "clock reconfigured: {:?}", conf);
                    self.config = conf;
                    self.publish(port);
                }
                Ok(Vec::new())
            }
            other => Err(not_valid_for(&other, self.kind())),
        }
    }

    fn configuration(&self) -> PeripheralConfig {
        PeripheralConfig::Clock(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LineFrequency;
    use crate::harness::Harness;

    #[test]
    fn publishes_configuration() {
        let mut h = Harness::new(&[PeripheralConfig::Clock(ClockConfig::default())]);
        let id = h.device_ids()[0];
        assert_eq!(h.device_register(id, REG_FREQUENCY), 60);
        assert_eq!(h.device_register(id, REG_EXTERNAL_SYNC), 0);

        let conf = ClockConfig {
            frequency: LineFrequency::Hz50,
            external_sync: true,
        };
        h.action(id, Action::Reconfigure(PeripheralConfig::Clock(conf)))
            .expect("valid reconfiguration");
        assert_eq!(h.device_register(id, REG_FREQUENCY), 50);
        assert_eq!(h.device_register(id, REG_EXTERNAL_SYNC), 1);
        assert_eq!(h.configuration(id), Some(PeripheralConfig::Clock(conf)));
    }

    #[test]
    fn refuses_configuration_for_another_device() {
        let mut h = Harness::new(&[PeripheralConfig::Clock(ClockConfig::default())]);
        let id = h.device_ids()[0];
        assert!(matches!(
            h.action(id, Action::Reconfigure(PeripheralConfig::Rk8e)),
            Err(ActionError::Config(_))
        ));
    }
}
