//! The I/O controller owns the device table.  It assigns device IDs,
//! publishes each device in the register file, routes external
//! actions and polls the peripherals when they are due.
//!
//! The device table is rebuilt from scratch whenever the system
//! configuration changes: [`IoController::clear_device_table`] is the
//! only way to remove a device, and peripherals may be registered
//! only between a clear and the next poll.
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use tracing::{event, span, Level};

use base::prelude::*;

use crate::config::{ConfigError, PeripheralConfig, SystemConfiguration};
use crate::context::Context;
use crate::databreak::{
    BreakTiming, DataBreakChannel, DataBreakError, DataBreakReply, DataBreakRequest,
};
use crate::dev::{Device, DevicePort, Peripheral};
use crate::event::{Action, ActionError, DeviceEvent};
use crate::pollq::PollQueue;
use crate::regs::{
    device_register_address, mapping_table_address, RegisterBus, DEVICE_INFO_ENABLED,
    DEVICE_REG_INFO, MAPPING_TABLE_ENTRIES, MAX_DEVICES, REGISTERS_PER_DEVICE, REG_ATTENTION,
};
use crate::types::DeviceId;

/// A device which asks to be polled again immediately is polled no
/// sooner than this.
const MINIMUM_POLL_INTERVAL: Duration = Duration::from_micros(1);

struct AttachedDevice {
    device: Device,
    port: DevicePort,
}

pub struct IoController {
    bus: Arc<dyn RegisterBus>,
    breaks: Arc<DataBreakChannel>,
    devices: BTreeMap<DeviceId, AttachedDevice>,
    poll_queue: PollQueue,
    registration_open: bool,
}

impl IoController {
    /// The device table of a new controller is empty and open for
    /// registration.
    #[must_use]
    pub fn new(bus: Arc<dyn RegisterBus>, timing: BreakTiming) -> IoController {
        let breaks = Arc::new(DataBreakChannel::new(Arc::clone(&bus), timing));
        IoController {
            bus,
            breaks,
            devices: BTreeMap::new(),
            poll_queue: PollQueue::new(),
            registration_open: true,
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<dyn RegisterBus> {
        &self.bus
    }

    #[must_use]
    pub fn data_break_channel(&self) -> &Arc<DataBreakChannel> {
        &self.breaks
    }

    /// Remove every device: zero the device registers, the mapping
    /// table and the attention bitmap, and return the data-break
    /// channel to idle.
    pub fn clear_device_table(&mut self) {
        event!(Level::DEBUG, "clearing the device table");
        let mut id = Some(DeviceId::FIRST);
        while let Some(current) = id {
            for reg in 0..REGISTERS_PER_DEVICE {
                self.bus.write(device_register_address(current, reg), 0);
            }
            id = current.next();
        }
        for code in 0..MAPPING_TABLE_ENTRIES {
            self.bus.write(
                mapping_table_address(Unsigned6Bit::truncating_from(code as u32)),
                0,
            );
        }
        self.bus.write(REG_ATTENTION, 0);
        self.breaks.reset();
        self.devices.clear();
        self.poll_queue.clear();
        self.registration_open = true;
    }

    /// The device answering to device code `code`, if any.
    #[must_use]
    pub fn device_for_bus_address(&self, code: Unsigned6Bit) -> Option<DeviceId> {
        u8::try_from(self.bus.read(mapping_table_address(code)))
            .ok()
            .and_then(DeviceId::new)
    }

    /// Attach a peripheral, returning its device ID.
    ///
    /// # Panics
    ///
    /// Panics if the controller has been polled since the device
    /// table was last cleared.
    pub fn register_peripheral(
        &mut self,
        ctx: &Context,
        mut device: Device,
    ) -> Result<DeviceId, ConfigError> {
        assert!(
            self.registration_open,
            "peripherals can only be registered between clearing the device table and the next poll"
        );
        let id = match self.devices.keys().next_back() {
            None => DeviceId::FIRST,
            Some(last) => last.next().ok_or(ConfigError::TooManyDevices)?,
        };
        let codes = device.bus_connections();
        for code in &codes {
            if let Some(existing) = self.device_for_bus_address(*code) {
                event!(
                    Level::ERROR,
                    "{} wants device code {:02o} but device {} already has it",
                    device.name(),
                    code,
                    existing
                );
                return Err(ConfigError::BusConflict {
                    code: *code,
                    existing,
                });
            }
        }
        self.bus.write(
            device_register_address(id, DEVICE_REG_INFO),
            DEVICE_INFO_ENABLED | device.kind().code(),
        );
        for code in &codes {
            self.bus.write(mapping_table_address(*code), u32::from(u8::from(id)));
        }
        let port = DevicePort::new(id, Arc::clone(&self.bus), Arc::clone(&self.breaks));
        device.attach(ctx, &port);
        event!(
            Level::INFO,
            "registered {} as device {} on device codes {:?}",
            device.name(),
            id,
            codes
        );
        self.poll_queue.push(id, ctx.simulated_time);
        self.devices.insert(id, AttachedDevice { device, port });
        Ok(id)
    }

    /// Replace the whole device table with the peripherals of
    /// `config`.  On failure the device table is left empty.
    pub fn configure(
        &mut self,
        ctx: &Context,
        config: &SystemConfiguration,
    ) -> Result<Vec<DeviceId>, ConfigError> {
        config.validate()?;
        let devices = config
            .peripherals
            .iter()
            .map(Device::from_config)
            .collect::<Result<Vec<Device>, ConfigError>>()?;
        event!(
            Level::INFO,
            "configuring {} with {} peripherals",
            config.name,
            devices.len()
        );
        self.clear_device_table();
        let mut ids = Vec::with_capacity(devices.len());
        for device in devices {
            match self.register_peripheral(ctx, device) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    self.clear_device_table();
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    /// Pass an action to a device.  Actions for unknown devices are
    /// dropped.
    pub fn request_device_action(
        &mut self,
        ctx: &Context,
        id: DeviceId,
        action: Action,
    ) -> Result<Vec<DeviceEvent>, ActionError> {
        let Some(attached) = self.devices.get_mut(&id) else {
            event!(
                Level::DEBUG,
                "ignoring {} action for unknown device {}",
                action.name(),
                id
            );
            return Ok(Vec::new());
        };
        let events = attached
            .device
            .request_action(ctx, &attached.port, action)?;
        Ok(events
            .into_iter()
            .map(|event| DeviceEvent {
                device: id,
                at: ctx.simulated_time,
                event,
            })
            .collect())
    }

    pub fn do_data_break(
        &self,
        request: &DataBreakRequest,
    ) -> Result<DataBreakReply, DataBreakError> {
        self.breaks.do_data_break(request)
    }

    /// Poll every device which is due.  Returns the events they
    /// emitted and the time at which the next device will be due.
    pub fn poll(&mut self, ctx: &Context) -> (Vec<DeviceEvent>, Option<Duration>) {
        self.registration_open = false;
        let system_time = ctx.simulated_time;
        let mut events = Vec::new();
        let next_poll = loop {
            match self.poll_queue.peek() {
                None => break None,
                Some((_, poll_time)) if *poll_time > system_time => {
                    event!(
                        Level::TRACE,
                        "poll: next poll is not due yet; due={:?}, now={:?}",
                        poll_time,
                        system_time
                    );
                    break Some(*poll_time);
                }
                Some(_) => (),
            }
            let Some((id, _)) = self.poll_queue.pop() else {
                break None;
            };
            let span = span!(Level::ERROR, "poll", device=%id);
            let _enter = span.enter();
            let Some(attached) = self.devices.get_mut(&id) else {
                event!(
                    Level::ERROR,
                    "device {} is in the polling queue but not in the device table; ignoring it",
                    id
                );
                continue;
            };
            let outcome = attached.device.poll(ctx, &attached.port);
            event!(
                Level::TRACE,
                "device wants to be polled again at {:?}",
                outcome.poll_after
            );
            events.extend(outcome.events.into_iter().map(|event| DeviceEvent {
                device: id,
                at: system_time,
                event,
            }));
            self.poll_queue
                .push(id, outcome.poll_after.max(system_time + MINIMUM_POLL_INTERVAL));
        };
        (events, next_poll)
    }

    #[must_use]
    pub fn next_poll_time(&self) -> Option<Duration> {
        self.poll_queue.peek().map(|(_, when)| *when)
    }

    pub fn devices(&self) -> impl Iterator<Item = (DeviceId, &Device)> {
        self.devices.iter().map(|(id, attached)| (*id, &attached.device))
    }

    #[must_use]
    pub fn configuration(&self, id: DeviceId) -> Option<PeripheralConfig> {
        self.devices
            .get(&id)
            .map(|attached| attached.device.configuration())
    }

    /// The number of device IDs still available.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        MAX_DEVICES - 1 - self.devices.len()
    }
}

impl Debug for IoController {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("IoController")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .field("poll_queue", &self.poll_queue)
            .field("registration_open", &self.registration_open)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::thread;

    use super::*;
    use crate::config::{DecTapeConfig, PaperTapeConfig, TeleprinterConfig};
    use crate::memory::{CoreMemory, MemoryConfiguration};
    use crate::regs::{RegisterFile, BREAK_IDLE, BREAK_REPLIED, BREAK_REQUESTED, REG_BREAK_CONTROL};
    use crate::responder::BusResponder;
    use crate::types::DeviceKind;

    fn quick_timing() -> BreakTiming {
        BreakTiming {
            idle_polls: 2,
            reply_polls: 2,
            spins_per_poll: 10,
            poll_interval: Duration::from_micros(100),
        }
    }

    fn controller() -> IoController {
        IoController::new(Arc::new(RegisterFile::new()), quick_timing())
    }

    fn system(peripherals: Vec<PeripheralConfig>) -> SystemConfiguration {
        SystemConfiguration {
            name: "test".to_string(),
            memory_fields: 1,
            peripherals,
        }
    }

    fn id(n: u8) -> DeviceId {
        DeviceId::new(n).expect("valid test device id")
    }

    #[test]
    fn registration_publishes_the_device() {
        let mut c = controller();
        let ctx = Context::at(Duration::ZERO);
        let ids = c
            .configure(
                &ctx,
                &system(vec![
                    PeripheralConfig::Teleprinter(TeleprinterConfig::default()),
                    PeripheralConfig::Tc08(DecTapeConfig::default()),
                ]),
            )
            .expect("valid configuration");
        assert_eq!(ids, vec![id(1), id(2)]);
        assert_eq!(
            c.bus().read(device_register_address(id(2), DEVICE_REG_INFO)),
            DEVICE_INFO_ENABLED | DeviceKind::Tc08.code()
        );
        assert_eq!(c.device_for_bus_address(u6!(0o03)), Some(id(1)));
        assert_eq!(c.device_for_bus_address(u6!(0o04)), Some(id(1)));
        assert_eq!(c.device_for_bus_address(u6!(0o77)), Some(id(2)));
        assert_eq!(c.device_for_bus_address(u6!(0o60)), None);
        assert_eq!(c.free_slots(), 29);
        assert_eq!(c.devices().count(), 2);
    }

    #[test]
    fn reconfiguration_leaves_no_stale_mapping() {
        let mut c = controller();
        let ctx = Context::at(Duration::ZERO);
        c.configure(
            &ctx,
            &system(vec![
                PeripheralConfig::Teleprinter(TeleprinterConfig::default()),
                PeripheralConfig::Df32,
            ]),
        )
        .expect("valid configuration");
        c.bus().write(device_register_address(id(2), 3), 0o1234);
        c.bus().write(REG_ATTENTION, id(2).attention_bit());

        c.configure(
            &ctx,
            &system(vec![PeripheralConfig::PaperTape(PaperTapeConfig::default())]),
        )
        .expect("valid configuration");
        for code in 0..MAPPING_TABLE_ENTRIES {
            let code = Unsigned6Bit::truncating_from(code as u32);
            let expected = if code == u6!(0o01) || code == u6!(0o02) {
                Some(id(1))
            } else {
                None
            };
            assert_eq!(c.device_for_bus_address(code), expected, "code {code:02o}");
        }
        assert_eq!(c.bus().read(device_register_address(id(2), 0)), 0);
        assert_eq!(c.bus().read(device_register_address(id(2), 3)), 0);
        assert_eq!(c.bus().read(REG_ATTENTION), 0);
        assert_eq!(c.configuration(id(2)), None);
        assert_eq!(
            c.configuration(id(1)),
            Some(PeripheralConfig::PaperTape(PaperTapeConfig::default()))
        );
    }

    #[test]
    fn conflicting_device_codes_are_rejected() {
        let mut c = controller();
        let ctx = Context::at(Duration::ZERO);
        assert_eq!(
            c.configure(
                &ctx,
                &system(vec![PeripheralConfig::Df32, PeripheralConfig::Rf08])
            ),
            Err(ConfigError::BusConflict {
                code: u6!(0o60),
                existing: id(1)
            })
        );
        assert_eq!(c.devices().count(), 0);
        assert_eq!(c.device_for_bus_address(u6!(0o60)), None);
    }

    #[test]
    fn invalid_configuration_leaves_table_alone() {
        let mut c = controller();
        let ctx = Context::at(Duration::ZERO);
        c.configure(&ctx, &system(vec![PeripheralConfig::Df32]))
            .expect("valid configuration");
        assert_eq!(
            c.configure(
                &ctx,
                &system(vec![PeripheralConfig::Tc08(DecTapeConfig { units: 0 })])
            ),
            Err(ConfigError::TapeUnitCountOutOfRange(0))
        );
        assert_eq!(c.device_for_bus_address(u6!(0o60)), Some(id(1)));
    }

    #[test]
    #[should_panic(expected = "peripherals can only be registered")]
    fn registration_after_poll_panics() {
        let mut c = controller();
        let ctx = Context::at(Duration::ZERO);
        c.poll(&ctx);
        let device = Device::from_config(&PeripheralConfig::Df32).expect("valid configuration");
        let _ = c.register_peripheral(&ctx, device);
    }

    #[test]
    fn unknown_device_action_is_ignored() {
        let mut c = controller();
        let ctx = Context::at(Duration::ZERO);
        assert_eq!(
            c.request_device_action(&ctx, id(7), Action::KeyPress { key: b'x' }),
            Ok(Vec::new())
        );
    }

    #[test]
    fn poll_reports_next_due_time() {
        let mut c = controller();
        let ctx = Context::at(Duration::ZERO);
        c.configure(&ctx, &system(vec![PeripheralConfig::Df32]))
            .expect("valid configuration");
        assert_eq!(c.next_poll_time(), Some(Duration::ZERO));
        let (events, next) = c.poll(&ctx);
        assert!(events.is_empty());
        let next = next.expect("the disk is always polled");
        assert!(next > Duration::ZERO);
        assert_eq!(c.next_poll_time(), Some(next));
    }

    #[test]
    fn data_break_times_out_without_responder() {
        let c = controller();
        let request = DataBreakRequest::one_cycle(Address::in_field_zero(u12!(0o200)));
        assert_eq!(
            c.do_data_break(&request),
            Err(DataBreakError::Timeout(request))
        );
        assert_eq!(c.bus().read(REG_BREAK_CONTROL), BREAK_IDLE);
    }

    #[test]
    fn clearing_the_table_idles_the_break_channel() {
        let mut c = controller();
        c.bus().write(REG_BREAK_CONTROL, BREAK_REQUESTED);
        c.clear_device_table();
        assert_eq!(c.bus().read(REG_BREAK_CONTROL), BREAK_IDLE);
    }

    fn with_responder<F: FnOnce(&IoController, &Arc<Mutex<CoreMemory>>)>(fields: usize, f: F) {
        let bus: Arc<dyn RegisterBus> = Arc::new(RegisterFile::new());
        let c = IoController::new(Arc::clone(&bus), BreakTiming::default());
        let memory = Arc::new(Mutex::new(CoreMemory::new(&MemoryConfiguration { fields })));
        let keep_alive = Arc::new(AtomicBool::new(true));
        let handle = BusResponder::new(bus, Arc::clone(&memory))
            .spawn(Arc::clone(&keep_alive))
            .expect("responder thread starts");
        f(&c, &memory);
        keep_alive.store(false, Ordering::SeqCst);
        handle.join().expect("responder thread exits cleanly");
    }

    #[test]
    fn data_break_accepted_and_denied() {
        with_responder(1, |c, memory| {
            let addr = Address::in_field_zero(u12!(0o200));
            let reply = c
                .do_data_break(&DataBreakRequest::one_cycle(addr).into_memory(u12!(0o4567)))
                .expect("field 0 exists");
            assert!(reply.accepted);
            assert_eq!(
                memory.lock().expect("memory lock").peek_word(&addr),
                Ok(u12!(0o4567))
            );

            let missing = DataBreakRequest::one_cycle(Address::new(u3!(3), u12!(0o200)));
            assert_eq!(c.do_data_break(&missing), Err(DataBreakError::Denied(missing)));
            assert_eq!(c.bus().read(REG_BREAK_CONTROL), BREAK_IDLE);
        });
    }

    #[test]
    fn stuck_break_channel_is_reset() {
        with_responder(1, |c, memory| {
            let addr = Address::in_field_zero(u12!(0o200));
            memory
                .lock()
                .expect("memory lock")
                .poke_word(&addr, u12!(0o17))
                .expect("field 0 exists");
            // A reply that nobody collected.
            c.bus().write(REG_BREAK_CONTROL, BREAK_REPLIED);
            let reply = c
                .do_data_break(&DataBreakRequest::one_cycle(addr))
                .expect("the channel recovers");
            assert!(reply.accepted);
            assert_eq!(reply.data, u12!(0o17));
            assert_eq!(c.bus().read(REG_BREAK_CONTROL), BREAK_IDLE);
        });
    }

    #[test]
    fn concurrent_breaks_are_serialized() {
        const EACH: u32 = 200;
        with_responder(1, |c, memory| {
            let addr = Address::in_field_zero(u12!(0o300));
            let request = DataBreakRequest {
                increment_mb: true,
                ..DataBreakRequest::one_cycle(addr)
            };
            thread::scope(|s| {
                for _ in 0..2 {
                    s.spawn(|| {
                        for _ in 0..EACH {
                            c.do_data_break(&request).expect("break accepted");
                        }
                    });
                }
            });
            assert_eq!(
                memory.lock().expect("memory lock").peek_word(&addr),
                Ok(Unsigned12Bit::truncating_from(2 * EACH))
            );
        });
    }
}
