//! A test bench which plays the part of the CPU.  It owns a
//! controller, a core memory with a responder thread servicing data
//! breaks, and a simulated clock which it advances one poll at a
//! time.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use base::prelude::*;

use crate::config::{PeripheralConfig, SystemConfiguration};
use crate::context::Context;
use crate::controller::IoController;
use crate::databreak::BreakTiming;
use crate::event::{Action, ActionError, DeviceEvent, OutputEvent};
use crate::memory::{CoreMemory, MemoryConfiguration};
use crate::regs::{device_register_address, RegisterBus, RegisterFile};
use crate::responder::BusResponder;
use crate::types::DeviceId;

pub(crate) struct Harness {
    controller: IoController,
    memory: Arc<Mutex<CoreMemory>>,
    keep_alive: Arc<AtomicBool>,
    responder: Option<JoinHandle<()>>,
    ids: Vec<DeviceId>,
    now: Duration,
    events: Vec<DeviceEvent>,
}

impl Harness {
    pub(crate) fn new(peripherals: &[PeripheralConfig]) -> Harness {
        Harness::build(peripherals, true, BreakTiming::default())
    }

    /// A bench on which nothing answers data breaks.
    pub(crate) fn without_responder(peripherals: &[PeripheralConfig]) -> Harness {
        Harness::build(
            peripherals,
            false,
            BreakTiming {
                idle_polls: 1,
                reply_polls: 2,
                spins_per_poll: 10,
                poll_interval: Duration::from_micros(100),
            },
        )
    }

    fn build(peripherals: &[PeripheralConfig], respond: bool, timing: BreakTiming) -> Harness {
        let bus: Arc<dyn RegisterBus> = Arc::new(RegisterFile::new());
        let memory = Arc::new(Mutex::new(CoreMemory::new(&MemoryConfiguration::default())));
        let keep_alive = Arc::new(AtomicBool::new(true));
        let responder = respond.then(|| {
            BusResponder::new(Arc::clone(&bus), Arc::clone(&memory))
                .spawn(Arc::clone(&keep_alive))
                .expect("responder thread should start")
        });
        let mut controller = IoController::new(bus, timing);
        let ids = controller
            .configure(
                &Context::at(Duration::ZERO),
                &SystemConfiguration {
                    name: "test bench".to_string(),
                    memory_fields: 8,
                    peripherals: peripherals.to_vec(),
                },
            )
            .expect("test configuration should be valid");
        Harness {
            controller,
            memory,
            keep_alive,
            responder,
            ids,
            now: Duration::ZERO,
            events: Vec::new(),
        }
    }

    pub(crate) fn device_ids(&self) -> Vec<DeviceId> {
        self.ids.clone()
    }

    pub(crate) fn now(&self) -> Duration {
        self.now
    }

    pub(crate) fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    pub(crate) fn configuration(&self, id: DeviceId) -> Option<PeripheralConfig> {
        self.controller.configuration(id)
    }

    pub(crate) fn action(
        &mut self,
        id: DeviceId,
        action: Action,
    ) -> Result<Vec<DeviceEvent>, ActionError> {
        let events = self
            .controller
            .request_device_action(&Context::at(self.now), id, action)?;
        self.events.extend(events.iter().cloned());
        Ok(events)
    }

    /// Perform a download action and return the dumped bytes.
    pub(crate) fn download(&mut self, id: DeviceId, action: Action) -> Option<Vec<u8>> {
        self.action(id, action)
            .ok()?
            .into_iter()
            .find_map(|e| match e.event {
                OutputEvent::DumpData { data, .. } => Some(data),
                _ => None,
            })
    }

    /// Advance to the next poll time (if it is in the future) and
    /// poll.
    pub(crate) fn step(&mut self) {
        if let Some(next) = self.controller.next_poll_time() {
            self.now = self.now.max(next);
        }
        let (events, _) = self.controller.poll(&Context::at(self.now));
        self.events.extend(events);
    }

    /// Step until `done` returns true.
    ///
    /// # Panics
    ///
    /// Panics if that takes more than `limit` of simulated time.
    pub(crate) fn run_until<F>(&mut self, limit: Duration, mut done: F)
    where
        F: FnMut(&mut Harness) -> bool,
    {
        let deadline = self.now + limit;
        while !done(self) {
            assert!(
                self.now <= deadline,
                "condition not met within {limit:?} (now {:?})",
                self.now
            );
            self.step();
        }
    }

    pub(crate) fn run_for(&mut self, duration: Duration) {
        let until = self.now + duration;
        while self
            .controller
            .next_poll_time()
            .is_some_and(|next| next <= until)
        {
            self.step();
        }
        self.now = self.now.max(until);
    }

    pub(crate) fn device_register(&self, id: DeviceId, reg: usize) -> u32 {
        self.controller.bus().read(device_register_address(id, reg))
    }

    pub(crate) fn set_device_register(&self, id: DeviceId, reg: usize, value: u32) {
        self.controller
            .bus()
            .write(device_register_address(id, reg), value);
    }

    fn address(extended: usize) -> Address {
        Address::try_from(extended).expect("test address should be valid")
    }

    pub(crate) fn poke(&self, extended: usize, value: u16) {
        self.memory
            .lock()
            .expect("memory lock")
            .poke_word(
                &Harness::address(extended),
                Unsigned12Bit::truncating_from(u32::from(value)),
            )
            .expect("test address should be mapped");
    }

    pub(crate) fn peek(&self, extended: usize) -> u16 {
        let word = self
            .memory
            .lock()
            .expect("memory lock")
            .peek_word(&Harness::address(extended))
            .expect("test address should be mapped");
        u16::from(word)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.keep_alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.responder.take() {
            // Don't double-panic if the test already failed.
            let _ = handle.join();
        }
    }
}
