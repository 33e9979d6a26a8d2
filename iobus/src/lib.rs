//! Peripheral and I/O bus simulation for a PDP-8/I.
//!
//! The peripherals (teleprinter, paper tape, disks, DECtape and the
//! real-time clock) talk to the CPU side of the simulation only
//! through a register file and the data-break handshake described in
//! [`regs`] and [`databreak`].  The [`IoController`] owns them and
//! polls each one when its next event is due.
#![crate_name = "iobus"]

mod clock;
mod config;
mod context;
mod controller;
mod databreak;
mod event;
mod image;
mod memory;
mod pollq;
mod responder;
mod runner;
mod types;

pub mod dev;
pub mod regs;

#[cfg(test)]
mod harness;

pub use clock::{BasicClock, Clock};
pub use config::*;
pub use context::Context;
pub use controller::IoController;
pub use databreak::{BreakTiming, DataBreakChannel, DataBreakError, DataBreakReply, DataBreakRequest};
pub use dev::{Device, DevicePort, Peripheral, PollOutcome};
pub use event::*;
pub use image::{ImageError, UnitImage};
pub use memory::{words_from_le_bytes, words_to_le_bytes, CoreMemory, MemoryConfiguration, MemoryOpFailure};
pub use regs::{RegisterBus, RegisterFile};
pub use responder::{perform_break, BusResponder};
pub use runner::{IoCommand, IoNotification, IoThread};
pub use types::{DeviceId, DeviceKind};
