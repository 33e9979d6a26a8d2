//! A console for the simulated PDP-8/I peripherals.
//!
//! Key presses go to the console teleprinter and whatever it punches
//! is printed.  Tape and disk images named on the command line are
//! mounted before the peripherals start and (with `--save`) written
//! back when standard input reaches end of file.
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::ArgAction::{Append, Set, SetTrue};
use clap::Parser;
use crossbeam_channel::{select, tick, unbounded, Receiver};
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use iobus::dev::registers::{
    PUNCH_REQUEST, READER_READY, SERIAL_REG_PUNCH, SERIAL_REG_READER,
};
use iobus::regs::device_register_address;
use iobus::{
    Action, BreakTiming, BusResponder, CoreMemory, DeviceEvent, DeviceId, DeviceKind, IoCommand,
    IoController, IoNotification, IoThread, MemoryConfiguration, OutputEvent, PeripheralConfig,
    RegisterBus, RegisterFile, SystemConfiguration,
};

mod console;
mod images;

use console::ConsoleWriter;
use images::UnitFile;

/// How long to keep printing output after input has ended.
const DRAIN_TIME: Duration = Duration::from_millis(500);
const ECHO_INTERVAL: Duration = Duration::from_millis(1);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive the peripherals of a simulated PDP-8/I
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// JSON file holding the system configuration
    #[clap(action = Set, long)]
    config: Option<PathBuf>,

    /// Run this many times faster than real-time ('MAX' for as-fast-as-possible)
    #[clap(action = Set, long)]
    speed_multiplier: Option<String>,

    /// File to load into the high-speed paper tape reader
    #[clap(action = Set, long)]
    reader_tape: Option<PathBuf>,

    /// File to which the high-speed punch writes
    #[clap(action = Set, long)]
    punch_output: Option<PathBuf>,

    /// DECtape image to mount, as UNIT=FILE
    #[clap(action = Append, long)]
    dectape: Vec<UnitFile>,

    /// Disk image to load, as UNIT=FILE
    #[clap(action = Append, long)]
    disk: Vec<UnitFile>,

    /// Core memory image (little-endian words) to load before starting
    #[clap(action = Set, long)]
    core: Option<PathBuf>,

    /// Write the DECtape and disk images back to their files on exit
    #[clap(action = SetTrue, long)]
    save: bool,

    /// Copy characters from the console reader to its punch
    #[clap(action = SetTrue, long)]
    echo: bool,

    /// Print the effective system configuration as JSON and exit
    #[clap(action = SetTrue, long)]
    print_config: bool,
}

fn speed_multiplier(arg: Option<&str>) -> Result<Option<f64>, Box<dyn Error>> {
    match arg {
        None => {
            event!(
                Level::INFO,
                "No --speed-multiplier option specified, using multiplier of 1.0"
            );
            Ok(Some(1.0))
        }
        Some("MAX") => {
            event!(
                Level::INFO,
                "--speed-multiplier=MAX, running at maximum speed"
            );
            Ok(None)
        }
        Some(s) => {
            let x = s.parse::<f64>()?;
            event!(
                Level::INFO,
                "--speed-multiplier={}, running at speed multiplier {}",
                s,
                x
            );
            Ok(Some(x))
        }
    }
}

fn load_configuration(path: Option<&PathBuf>) -> Result<SystemConfiguration, Box<dyn Error>> {
    let config = match path {
        None => SystemConfiguration::default(),
        Some(path) => serde_json::from_slice(&fs::read(path)?)?,
    };
    config.validate()?;
    Ok(config)
}

/// Which device plays which part, once the I/O thread has told us
/// the device IDs.
#[derive(Debug, Default)]
struct Roles {
    console: Option<DeviceId>,
    paper_tape: Option<DeviceId>,
    dectape: Option<DeviceId>,
    disk: Option<DeviceId>,
}

impl Roles {
    fn new(devices: &[(DeviceId, PeripheralConfig)]) -> Roles {
        let first = |wanted: &[DeviceKind]| {
            devices
                .iter()
                .find(|(_, conf)| wanted.contains(&conf.kind()))
                .map(|(id, _)| *id)
        };
        Roles {
            console: first(&[DeviceKind::Teleprinter]),
            paper_tape: first(&[DeviceKind::PaperTape]),
            dectape: first(&[DeviceKind::Tc08]),
            disk: first(&[DeviceKind::Df32, DeviceKind::Rf08, DeviceKind::Rk8e]),
        }
    }
}

fn wait_for_configuration(
    io: &IoThread,
) -> Result<Vec<(DeviceId, PeripheralConfig)>, Box<dyn Error>> {
    loop {
        match io.notifications().recv()? {
            IoNotification::Configured(devices) => return Ok(devices),
            IoNotification::ConfigurationFailed(e) => return Err(Box::new(e)),
            other => event!(Level::DEBUG, "ignoring {:?} during configuration", other),
        }
    }
}

/// Read standard input on a thread of its own; the channel closes at
/// end of file.
fn spawn_keyboard() -> Result<Receiver<u8>, io::Error> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("keyboard".to_string())
        .spawn(move || {
            for byte in io::stdin().lock().bytes() {
                match byte {
                    Ok(b) => {
                        if tx.send(b).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        event!(Level::ERROR, "failed to read standard input: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Play the part of a program which copies each character typed to
/// the printer.
fn echo(bus: &dyn RegisterBus, console: DeviceId) {
    let reader = device_register_address(console, SERIAL_REG_READER);
    let punch = device_register_address(console, SERIAL_REG_PUNCH);
    let ch = bus.read(reader);
    if ch & READER_READY != 0 && bus.read(punch) & PUNCH_REQUEST == 0 {
        bus.write(reader, 0);
        bus.write(punch, (ch & 0o377) | PUNCH_REQUEST);
    }
}

struct Session {
    io: IoThread,
    roles: Roles,
    console: ConsoleWriter,
    punch_output: Vec<u8>,
}

impl Session {
    fn send_action(&self, device: Option<DeviceId>, action: Action) -> Result<(), Box<dyn Error>> {
        match device {
            Some(device) => Ok(self.io.send(IoCommand::Action { device, action })?),
            None => {
                event!(
                    Level::WARN,
                    "no device to accept {}; check the configuration",
                    action.name()
                );
                Ok(())
            }
        }
    }

    fn mount(&self, cli: &Cli) -> Result<(), Box<dyn Error>> {
        if let Some(path) = &cli.reader_tape {
            let data = fs::read(path)?;
            self.send_action(self.roles.paper_tape, Action::ReaderTapeSet { data })?;
        }
        for tape in &cli.dectape {
            let data = tape.load()?;
            self.send_action(
                self.roles.dectape,
                Action::LoadTape {
                    unit: tape.unit,
                    data,
                },
            )?;
        }
        for disk in &cli.disk {
            let data = disk.load()?;
            self.send_action(
                self.roles.disk,
                Action::UploadDisk {
                    unit: disk.unit,
                    data,
                },
            )?;
        }
        Ok(())
    }

    /// Returns the dumped data, if the notification carries some.
    fn handle(
        &mut self,
        notification: IoNotification,
    ) -> Result<Option<(DeviceId, u8, Vec<u8>)>, io::Error> {
        match notification {
            IoNotification::Event(DeviceEvent { device, event, .. }) => match event {
                OutputEvent::Punch { ch } if Some(device) == self.roles.console => {
                    self.console.punch(ch)?;
                }
                OutputEvent::Punch { ch } => self.punch_output.push(ch),
                OutputEvent::DumpData { unit, data } => return Ok(Some((device, unit, data))),
                OutputEvent::ReaderPosition { .. } | OutputEvent::TapeStates { .. } => {
                    event!(Level::TRACE, "device {}: {:?}", device, event);
                }
            },
            IoNotification::ActionFailed { device, error } => {
                self.console
                    .status(&format!("device {device} refused an action: {error}"))?;
            }
            IoNotification::ConfigurationFailed(e) => {
                self.console.status(&format!("configuration failed: {e}"))?;
            }
            IoNotification::Configured(devices) => {
                self.roles = Roles::new(&devices);
            }
        }
        Ok(None)
    }

    fn run(
        &mut self,
        bus: &dyn RegisterBus,
        keys: &Receiver<u8>,
        echo_mode: bool,
    ) -> Result<(), Box<dyn Error>> {
        let notifications = self.io.notifications().clone();
        let ticker = tick(ECHO_INTERVAL);
        loop {
            select! {
                recv(keys) -> key => match key {
                    Ok(key) => self.send_action(self.roles.console, Action::KeyPress { key })?,
                    Err(_) => {
                        event!(Level::INFO, "end of input");
                        break;
                    }
                },
                recv(notifications) -> n => {
                    self.handle(n?)?;
                }
                recv(ticker) -> _ => {
                    if let (true, Some(console)) = (echo_mode, self.roles.console) {
                        echo(bus, console);
                    }
                }
            }
        }
        let drain = tick(DRAIN_TIME);
        loop {
            select! {
                recv(notifications) -> n => {
                    self.handle(n?)?;
                }
                recv(drain) -> _ => break,
            }
        }
        Ok(())
    }

    fn save(&mut self, cli: &Cli) -> Result<(), Box<dyn Error>> {
        let mut wanted: BTreeMap<(DeviceId, u8), &UnitFile> = BTreeMap::new();
        if let Some(dectape) = self.roles.dectape {
            for tape in &cli.dectape {
                self.send_action(Some(dectape), Action::DownloadTape { unit: tape.unit })?;
                wanted.insert((dectape, tape.unit), tape);
            }
        }
        if let Some(disk) = self.roles.disk {
            for image in &cli.disk {
                self.send_action(Some(disk), Action::DownloadDisk { unit: image.unit })?;
                wanted.insert((disk, image.unit), image);
            }
        }
        while !wanted.is_empty() {
            let n = self.io.notifications().recv_timeout(DOWNLOAD_TIMEOUT)?;
            if let IoNotification::ActionFailed { device, .. } = &n {
                // Whatever was refused will never arrive.
                wanted.retain(|(d, _), _| d != device);
            }
            if let Some((device, unit, data)) = self.handle(n)? {
                if let Some(file) = wanted.remove(&(device, unit)) {
                    file.save(&data)?;
                }
            }
        }
        Ok(())
    }
}

fn run_console() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // See
    // https://docs.rs/tracing-subscriber/0.2.19/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(io::stderr);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let config = load_configuration(cli.config.as_ref())?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    let multiplier = speed_multiplier(cli.speed_multiplier.as_deref())?;

    let mut memory = CoreMemory::new(&MemoryConfiguration {
        fields: config.memory_fields,
    });
    if let Some(path) = &cli.core {
        memory.load_le_bytes(&fs::read(path)?);
    }
    let memory = Arc::new(Mutex::new(memory));
    let bus = Arc::new(RegisterFile::new());
    let shared_bus: Arc<dyn RegisterBus> = bus.clone();
    let keep_alive = Arc::new(AtomicBool::new(true));
    let responder = BusResponder::new(Arc::clone(&shared_bus), memory)
        .spawn(Arc::clone(&keep_alive))?;

    let io = IoThread::spawn(
        IoController::new(Arc::clone(&shared_bus), BreakTiming::default()),
        multiplier,
    )?;
    io.send(IoCommand::Configure(config))?;
    let devices = wait_for_configuration(&io)?;
    let mut session = Session {
        io,
        roles: Roles::new(&devices),
        console: ConsoleWriter::new(),
        punch_output: Vec::new(),
    };
    session.mount(&cli)?;

    let keys = spawn_keyboard()?;
    let outcome = session.run(bus.as_ref(), &keys, cli.echo).and_then(|()| {
        if cli.save {
            session.save(&cli)
        } else {
            Ok(())
        }
    });
    session.console.disconnect();
    if let Some(path) = &cli.punch_output {
        fs::write(path, &session.punch_output)?;
    }
    session.io.shutdown();
    keep_alive.store(false, Ordering::SeqCst);
    if responder.join().is_err() {
        event!(Level::ERROR, "bus responder panicked");
    }
    outcome
}

fn main() {
    match run_console() {
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}

#[test]
fn test_command_line() {
    use clap::CommandFactory;

    Cli::command().debug_assert();
    assert_eq!(Cli::command().get_author(), None);
    let cli = Cli::try_parse_from([
        "pdp8io",
        "--dectape",
        "0=a.tap",
        "--dectape",
        "1=b.tap",
        "--save",
    ])
    .expect("valid command line");
    assert_eq!(cli.dectape.len(), 2);
    assert_eq!(cli.dectape[1].unit, 1);
    assert!(cli.save);
}
