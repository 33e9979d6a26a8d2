//! The boundary between the peripherals and the outside world.
//!
//! Peripherals emit [`OutputEvent`]s (a character was punched, a tape
//! moved) and accept [`Action`]s (a key was pressed, a disk image was
//! uploaded).  The user interface and any transport layer live on the
//! other side of this boundary.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, PeripheralConfig};
use crate::image::ImageError;
use crate::types::{DeviceId, DeviceKind};

/// The visible state of one DECtape transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapeState {
    pub unit: u8,
    pub loaded: bool,
    pub selected: bool,
    pub moving: bool,
    pub reverse: bool,
    pub writing: bool,
    /// 0.0 at the start of the reverse end zone, 1.0 at the end of
    /// the forward end zone.
    pub normalized_position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputEvent {
    /// The reader has consumed `position` characters of its tape.
    ReaderPosition { position: usize },
    /// A character was punched (or printed).  The byte is passed on
    /// unchanged; the host decides how to render it.
    Punch { ch: u8 },
    TapeStates { states: Vec<TapeState> },
    /// The contents of a disk or tape unit, in response to a download
    /// request.
    DumpData { unit: u8, data: Vec<u8> },
}

/// An event together with the device which emitted it and the
/// simulated time at which it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub device: DeviceId,
    pub at: Duration,
    pub event: OutputEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    KeyPress { key: u8 },
    ReaderTapeSet { data: Vec<u8> },
    ReaderSetActive { active: bool },
    LoadTape { unit: u8, data: Vec<u8> },
    UnloadTape { unit: u8 },
    UploadDisk { unit: u8, data: Vec<u8> },
    DownloadDisk { unit: u8 },
    DownloadTape { unit: u8 },
    Reconfigure(PeripheralConfig),
}

impl Action {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Action::KeyPress { .. } => "key-press",
            Action::ReaderTapeSet { .. } => "reader-tape-set",
            Action::ReaderSetActive { .. } => "reader-set-active",
            Action::LoadTape { .. } => "load-tape",
            Action::UnloadTape { .. } => "unload-tape",
            Action::UploadDisk { .. } => "upload-disk",
            Action::DownloadDisk { .. } => "download-disk",
            Action::DownloadTape { .. } => "download-tape",
            Action::Reconfigure(_) => "reconfigure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    NotValidForDevice {
        action: &'static str,
        device: DeviceKind,
    },
    NoSuchUnit(u8),
    /// The unit exists but has no medium mounted.
    NotLoaded(u8),
    Image(ImageError),
    Config(ConfigError),
}

impl Display for ActionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ActionError::NotValidForDevice { action, device } => {
                write!(f, "action {action} is not valid for a {device}")
            }
            ActionError::NoSuchUnit(unit) => write!(f, "unit {unit} does not exist"),
            ActionError::NotLoaded(unit) => write!(f, "unit {unit} has nothing loaded"),
            ActionError::Image(e) => write!(f, "image rejected: {e}"),
            ActionError::Config(e) => write!(f, "configuration rejected: {e}"),
        }
    }
}

impl Error for ActionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ActionError::Image(e) => Some(e),
            ActionError::Config(e) => Some(e),
            ActionError::NotValidForDevice { .. }
            | ActionError::NoSuchUnit(_)
            | ActionError::NotLoaded(_) => None,
        }
    }
}

impl From<ImageError> for ActionError {
    fn from(e: ImageError) -> ActionError {
        ActionError::Image(e)
    }
}

impl From<ConfigError> for ActionError {
    fn from(e: ConfigError) -> ActionError {
        ActionError::Config(e)
    }
}
