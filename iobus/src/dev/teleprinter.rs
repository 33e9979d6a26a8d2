//! The console teleprinter (an ASR-33 or similar), device codes 03
//! (keyboard/reader) and 04 (printer/punch).
//!
//! The reader side delivers either characters from a loaded paper
//! tape or key presses.  The tape only takes priority when the reader
//! has been made active, which is what pressing START on the ASR-33
//! tape reader does.
use tracing::{event, Level};

use base::prelude::*;

use super::serial::{chars_per_second, SerialPunch, SerialReader};
use super::{check_reconfiguration, not_valid_for, DevicePort, Peripheral, PollOutcome};
use crate::config::{PeripheralConfig, TeleprinterConfig};
use crate::context::Context;
use crate::event::{Action, ActionError, OutputEvent};
use crate::types::DeviceKind;

const MARK_PARITY: u8 = 0o200;

fn output_mask(conf: &TeleprinterConfig) -> u8 {
    if conf.seven_bit {
        0o177
    } else {
        0o377
    }
}

#[derive(Debug)]
pub struct Teleprinter {
    config: TeleprinterConfig,
    reader: SerialReader,
    punch: SerialPunch,
}

impl Teleprinter {
    #[must_use]
    pub fn new(config: TeleprinterConfig) -> Teleprinter {
        let cps = chars_per_second(config.baud_rate);
        Teleprinter {
            config,
            reader: SerialReader::new(cps, false),
            punch: SerialPunch::new(cps, output_mask(&config)),
        }
    }

    fn translate_key(&self, key: u8) -> u8 {
        let key = if self.config.auto_caps {
            key.to_ascii_uppercase()
        } else {
            key
        };
        if self.config.seven_bit {
            key | MARK_PARITY
        } else {
            key
        }
    }

    fn reconfigure(&mut self, config: TeleprinterConfig) {
        event!(Level::INFO, "teleprinter reconfigured: {:?}", config);
        let cps = chars_per_second(config.baud_rate);
        self.reader.set_cps(cps);
        self.punch.set_cps(cps);
        self.punch.set_output_mask(output_mask(&config));
        self.config = config;
    }
}

impl Peripheral for Teleprinter {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Teleprinter
    }

    fn bus_connections(&self) -> Vec<Unsigned6Bit> {
        vec![u6!(0o03), u6!(0o04)]
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
            Action::KeyPress { key } => {
                let ch = self.translate_key(key);
                self.reader.push_key(ch);
            }
            Action::ReaderTapeSet { data } => self.reader.load_tape(data),
            Action::ReaderSetActive { active } => self.reader.set_active(active),
            Action::Reconfigure(conf) => {
                check_reconfiguration(self.kind(), &conf)?;
                if let PeripheralConfig::Teleprinter(conf) = conf {
                    self.reconfigure(conf);
                }
            }
            other => return Err(not_valid_for(&other, self.kind())),
        }
        Ok(Vec::new())
    }

    fn configuration(&self) -> PeripheralConfig {
        PeripheralConfig::Teleprinter(self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dev::serial::{PUNCH_DONE, PUNCH_REQUEST, READER_READY, REG_PUNCH, REG_READER};
    use crate::event::OutputEvent;
    use crate::harness::Harness;

    fn config(baud_rate: u32) -> TeleprinterConfig {
        TeleprinterConfig {
            baud_rate,
            seven_bit: false,
            auto_caps: false,
        }
    }

    /// Act as the CPU: take each character the reader offers.
    fn read_chars(h: &mut Harness, count: usize) -> Vec<(Duration, u8)> {
        let id = h.device_ids()[0];
        let mut got = Vec::new();
        h.run_until(Duration::from_secs(60), |h| {
            let reg = h.device_register(id, REG_READER);
            if reg & READER_READY != 0 {
                got.push((h.now(), (reg & 0o377) as u8));
                h.set_device_register(id, REG_READER, 0);
            }
            got.len() == count
        });
        got
    }

    #[test]
    fn tape_is_read_in_order_at_baud_rate() {
        let mut h = Harness::new(&[PeripheralConfig::Teleprinter(config(110))]);
        let id = h.device_ids()[0];
        let tape = b"HELLO".to_vec();
        h.action(id, Action::ReaderTapeSet { data: tape.clone() })
            .expect("tape should load");
        h.action(id, Action::ReaderSetActive { active: true })
            .expect("reader should start");
        h.action(id, Action::KeyPress { key: b'X' })
            .expect("key press is queued");

        let got = read_chars(&mut h, tape.len());
        let chars: Vec<u8> = got.iter().map(|(_, ch)| *ch).collect();
        assert_eq!(chars, tape);
        let min_gap = Duration::from_secs(1) / 11;
        for pair in got.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= min_gap, "{pair:?}");
        }
        // Once the tape runs out, the queued key press comes through.
        assert_eq!(read_chars(&mut h, 1)[0].1, b'X');
    }

    #[test]
    fn inactive_reader_delivers_key_presses() {
        let mut h = Harness::new(&[PeripheralConfig::Teleprinter(config(9600))]);
        let id = h.device_ids()[0];
        h.action(id, Action::ReaderTapeSet { data: b"TAPE".to_vec() })
            .expect("tape should load");
        for key in b"ok" {
            h.action(id, Action::KeyPress { key: *key })
                .expect("key press is queued");
        }
        let got: Vec<u8> = read_chars(&mut h, 2).into_iter().map(|(_, ch)| ch).collect();
        assert_eq!(got, b"ok".to_vec());
        assert!(!h
            .events()
            .iter()
            .any(|e| matches!(e.event, OutputEvent::ReaderPosition { .. })));
    }

    #[test]
    fn seven_bit_mode_and_auto_caps() {
        let mut h = Harness::new(&[PeripheralConfig::Teleprinter(TeleprinterConfig {
            baud_rate: 1200,
            seven_bit: true,
            auto_caps: true,
        })]);
        let id = h.device_ids()[0];
        h.action(id, Action::KeyPress { key: b'q' })
            .expect("key press is queued");
        assert_eq!(read_chars(&mut h, 1)[0].1, b'Q' | 0o200);

        h.set_device_register(id, REG_PUNCH, u32::from(b'Z' | 0o200) | PUNCH_REQUEST);
        h.run_until(Duration::from_secs(1), |h| {
            h.device_register(id, REG_PUNCH) & PUNCH_DONE != 0
        });
        assert!(h
            .events()
            .iter()
            .any(|e| e.event == OutputEvent::Punch { ch: b'Z' }));
    }

    #[test]
    fn punch_at_110_baud() {
        let mut h = Harness::new(&[PeripheralConfig::Teleprinter(config(110))]);
        let id = h.device_ids()[0];
        for ch in b"ABC" {
            h.set_device_register(id, REG_PUNCH, u32::from(*ch) | PUNCH_REQUEST);
            h.run_until(Duration::from_secs(10), |h| {
                h.device_register(id, REG_PUNCH) & PUNCH_DONE != 0
            });
        }
        let punched: Vec<(Duration, u8)> = h
            .events()
            .iter()
            .filter_map(|e| match e.event {
                OutputEvent::Punch { ch } => Some((e.at, ch)),
                _ => None,
            })
            .collect();
        assert_eq!(
            punched.iter().map(|(_, ch)| *ch).collect::<Vec<u8>>(),
            b"ABC".to_vec()
        );
        for pair in punched.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_micros(90_900));
        }
    }

    #[test]
    fn baud_rate_change_applies_to_next_character() {
        let mut h = Harness::new(&[PeripheralConfig::Teleprinter(config(110))]);
        let id = h.device_ids()[0];
        h.set_device_register(id, REG_PUNCH, u32::from(b'A') | PUNCH_REQUEST);
        h.step();
        let started = h.now();
        h.action(
            id,
            Action::Reconfigure(PeripheralConfig::Teleprinter(config(9600))),
        )
        .expect("valid reconfiguration");
        h.run_until(Duration::from_secs(1), |h| {
            h.device_register(id, REG_PUNCH) & PUNCH_DONE != 0
        });
        assert!(h.now() - started >= Duration::from_secs(1) / 11);

        h.set_device_register(id, REG_PUNCH, u32::from(b'B') | PUNCH_REQUEST);
        h.step();
        let started = h.now();
        h.run_until(Duration::from_secs(1), |h| {
            h.device_register(id, REG_PUNCH) & PUNCH_DONE != 0
        });
        assert!(h.now() - started < Duration::from_millis(5));
    }

    #[test]
    fn rejects_bad_reconfiguration_and_disk_actions() {
        let mut h = Harness::new(&[PeripheralConfig::Teleprinter(config(110))]);
        let id = h.device_ids()[0];
        assert!(matches!(
            h.action(
                id,
                Action::Reconfigure(PeripheralConfig::Teleprinter(config(111)))
            ),
            Err(ActionError::Config(_))
        ));
        assert!(matches!(
            h.action(id, Action::DownloadDisk { unit: 0 }),
            Err(ActionError::NotValidForDevice { .. })
        ));
        assert_eq!(
            h.configuration(id),
            Some(PeripheralConfig::Teleprinter(config(110)))
        );
    }
}
