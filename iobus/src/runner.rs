//! A thread which owns the I/O controller and drives its poll loop.
//!
//! The rest of the program talks to the thread over two channels:
//! [`IoCommand`]s go in, [`IoNotification`]s come out.  The thread
//! checks its keep-alive flag on every iteration, so shutdown is
//! prompt even while peripherals are busy.
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, SendError, Sender, TryRecvError};
use tracing::{event, Level};

use crate::clock::BasicClock;
use crate::config::{ConfigError, PeripheralConfig, SystemConfiguration};
use crate::controller::IoController;
use crate::event::{Action, ActionError, DeviceEvent};
use crate::types::DeviceId;

/// The longest the thread waits for a command before polling again.
const MAX_IDLE_WAIT: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq)]
pub enum IoCommand {
    Configure(SystemConfiguration),
    Action { device: DeviceId, action: Action },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IoNotification {
    Event(DeviceEvent),
    Configured(Vec<(DeviceId, PeripheralConfig)>),
    ConfigurationFailed(ConfigError),
    ActionFailed { device: DeviceId, error: ActionError },
}

struct Worker {
    controller: IoController,
    clock: BasicClock,
    commands: Receiver<IoCommand>,
    notifications: Sender<IoNotification>,
    keep_alive: Arc<AtomicBool>,
}

impl Worker {
    /// Returns false when the thread should stop.
    fn notify(&self, notification: IoNotification) -> bool {
        self.notifications.send(notification).is_ok()
    }

    fn handle(&mut self, command: IoCommand) -> bool {
        let ctx = self.clock.make_fresh_context();
        match command {
            IoCommand::Configure(config) => match self.controller.configure(&ctx, &config) {
                Ok(ids) => {
                    let devices = ids
                        .into_iter()
                        .filter_map(|id| self.controller.configuration(id).map(|conf| (id, conf)))
                        .collect();
                    self.notify(IoNotification::Configured(devices))
                }
                Err(e) => {
                    event!(Level::ERROR, "configuration rejected: {}", e);
                    self.notify(IoNotification::ConfigurationFailed(e))
                }
            },
            IoCommand::Action { device, action } => {
                match self.controller.request_device_action(&ctx, device, action) {
                    Ok(events) => events
                        .into_iter()
                        .all(|e| self.notify(IoNotification::Event(e))),
                    Err(error) => {
                        event!(Level::WARN, "action for device {} failed: {}", device, error);
                        self.notify(IoNotification::ActionFailed { device, error })
                    }
                }
            }
            IoCommand::Shutdown => false,
        }
    }

    fn run(mut self) {
        event!(Level::DEBUG, "I/O thread started");
        while self.keep_alive.load(Ordering::SeqCst) {
            let ctx = self.clock.make_fresh_context();
            let (events, next_poll) = self.controller.poll(&ctx);
            if !events
                .into_iter()
                .all(|e| self.notify(IoNotification::Event(e)))
            {
                break;
            }
            let wait = match (self.clock.speed_multiplier(), next_poll) {
                (Some(_), Some(t)) => self.clock.real_time_until(t).min(MAX_IDLE_WAIT),
                (None, Some(t)) => {
                    // Free-running: jump straight to the next poll.
                    self.clock.advance_to_simulated_time(t);
                    Duration::ZERO
                }
                (_, None) => MAX_IDLE_WAIT,
            };
            let command = if wait.is_zero() {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match self.commands.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };
            if let Some(command) = command {
                if !self.handle(command) {
                    break;
                }
            }
        }
        event!(Level::DEBUG, "I/O thread stopped");
    }
}

pub struct IoThread {
    commands: Sender<IoCommand>,
    notifications: Receiver<IoNotification>,
    keep_alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IoThread {
    /// Start the thread.  `speed_multiplier` is passed to the
    /// thread's [`BasicClock`]; `None` runs the peripherals as fast
    /// as possible.
    pub fn spawn(
        controller: IoController,
        speed_multiplier: Option<f64>,
    ) -> std::io::Result<IoThread> {
        let (command_tx, command_rx) = unbounded();
        let (notify_tx, notify_rx) = unbounded();
        let keep_alive = Arc::new(AtomicBool::new(true));
        let worker = Worker {
            controller,
            clock: BasicClock::new(speed_multiplier),
            commands: command_rx,
            notifications: notify_tx,
            keep_alive: Arc::clone(&keep_alive),
        };
        let handle = thread::Builder::new()
            .name("io".to_string())
            .spawn(move || worker.run())?;
        Ok(IoThread {
            commands: command_tx,
            notifications: notify_rx,
            keep_alive,
            handle: Some(handle),
        })
    }

    pub fn send(&self, command: IoCommand) -> Result<(), SendError<IoCommand>> {
        self.commands.send(command)
    }

    #[must_use]
    pub fn notifications(&self) -> &Receiver<IoNotification> {
        &self.notifications
    }

    /// Stop the thread and wait for it to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.keep_alive.store(false, Ordering::SeqCst);
        // The thread may already have gone.
        let _ = self.commands.send(IoCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                event!(Level::ERROR, "I/O thread panicked");
            }
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Debug for IoThread {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("IoThread")
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::{PaperTapeConfig, TeleprinterConfig};
    use crate::databreak::BreakTiming;
    use crate::dev::registers::{PUNCH_REQUEST, SERIAL_REG_PUNCH};
    use crate::event::OutputEvent;
    use crate::memory::{CoreMemory, MemoryConfiguration};
    use crate::regs::{device_register_address, RegisterBus, RegisterFile};
    use crate::responder::BusResponder;

    fn wait_for<F: FnMut(&IoNotification) -> bool>(io: &IoThread, mut f: F) -> IoNotification {
        loop {
            let n = io
                .notifications()
                .recv_timeout(Duration::from_secs(10))
                .expect("notification arrives in time");
            if f(&n) {
                return n;
            }
        }
    }

    #[test]
    fn configure_act_and_shut_down() {
        let bus: Arc<dyn RegisterBus> = Arc::new(RegisterFile::new());
        let memory = Arc::new(Mutex::new(CoreMemory::new(&MemoryConfiguration::default())));
        let keep_alive = Arc::new(AtomicBool::new(true));
        let responder = BusResponder::new(Arc::clone(&bus), memory)
            .spawn(Arc::clone(&keep_alive))
            .expect("responder starts");
        let controller = IoController::new(Arc::clone(&bus), BreakTiming::default());
        let io = IoThread::spawn(controller, None).expect("I/O thread starts");

        io.send(IoCommand::Configure(SystemConfiguration {
            name: "bad".to_string(),
            memory_fields: 1,
            peripherals: vec![PeripheralConfig::PaperTape(PaperTapeConfig { baud_rate: 7 })],
        }))
        .expect("thread is running");
        assert_eq!(
            wait_for(&io, |n| !matches!(n, IoNotification::Event(_))),
            IoNotification::ConfigurationFailed(ConfigError::UnsupportedBaudRate(7))
        );

        let teleprinter = PeripheralConfig::Teleprinter(TeleprinterConfig {
            baud_rate: 9600,
            ..TeleprinterConfig::default()
        });
        io.send(IoCommand::Configure(SystemConfiguration {
            name: "console only".to_string(),
            memory_fields: 1,
            peripherals: vec![teleprinter],
        }))
        .expect("thread is running");
        let id = match wait_for(&io, |n| matches!(n, IoNotification::Configured(_))) {
            IoNotification::Configured(devices) => {
                assert_eq!(devices.len(), 1);
                assert_eq!(devices[0].1, teleprinter);
                devices[0].0
            }
            other => unreachable!("unexpected notification {other:?}"),
        };

        bus.write(
            device_register_address(id, SERIAL_REG_PUNCH),
            u32::from(b'Z') | PUNCH_REQUEST,
        );
        let punched = wait_for(&io, |n| {
            matches!(
                n,
                IoNotification::Event(DeviceEvent {
                    event: OutputEvent::Punch { .. },
                    ..
                })
            )
        });
        assert!(matches!(
            punched,
            IoNotification::Event(DeviceEvent {
                event: OutputEvent::Punch { ch: b'Z' },
                ..
            })
        ));

        io.send(IoCommand::Action {
            device: id,
            action: Action::DownloadDisk { unit: 0 },
        })
        .expect("thread is running");
        assert!(matches!(
            wait_for(&io, |n| matches!(n, IoNotification::ActionFailed { .. })),
            IoNotification::ActionFailed {
                error: ActionError::NotValidForDevice { .. },
                ..
            }
        ));

        io.shutdown();
        keep_alive.store(false, Ordering::SeqCst);
        responder.join().expect("responder exits cleanly");
    }
}
