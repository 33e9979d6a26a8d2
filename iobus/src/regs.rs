//! The register bus: a flat file of 32-bit registers shared between
//! the peripherals and the CPU side of the simulation.
//!
//! ## Layout
//!
//! | Byte offset          | Register                                      |
//! | -------------------- | --------------------------------------------- |
//! | 0x000                | Magic number (`MAGIC_VALUE`)                  |
//! | 0x004                | Maximum number of devices                     |
//! | 0x008                | Attention bitmap (bit N for device ID N)      |
//! | 0x00C                | Data-break request / reply word               |
//! | 0x010                | Data-break control                            |
//! | 0x100-0x1FC          | Mapping table, one slot per device code       |
//! | 0x200 + id*64 + r*4  | Device register `r` of device `id`            |
//!
//! Every register occupies a 4-byte aligned slot and is stored little
//! endian.  Device register 0 is written by the controller (enabled
//! bit and device kind); the others belong to the device.
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};

use base::prelude::*;

use crate::types::DeviceId;

pub const REG_MAGIC: usize = 0x000;
pub const REG_MAX_DEVICES: usize = 0x004;
pub const REG_ATTENTION: usize = 0x008;
pub const REG_BREAK_DATA: usize = 0x00C;
pub const REG_BREAK_CONTROL: usize = 0x010;

pub const MAGIC_VALUE: u32 = 0x5044_5038;

pub const MAPPING_TABLE_BASE: usize = 0x100;
pub const MAPPING_TABLE_ENTRIES: usize = 64;

pub const DEVICE_BASE: usize = 0x200;
pub const DEVICE_STRIDE: usize = 64;
pub const REGISTERS_PER_DEVICE: usize = DEVICE_STRIDE / 4;

/// Register block 0 is never used, so 31 devices can be attached.
pub const MAX_DEVICES: usize = 32;

pub const REGISTER_SPACE_SIZE: usize = DEVICE_BASE + MAX_DEVICES * DEVICE_STRIDE;

/// Values of the data-break control register.
pub const BREAK_IDLE: u32 = 0;
pub const BREAK_REQUESTED: u32 = 1;
pub const BREAK_REPLIED: u32 = 2;

/// Device register 0: the device is enabled.  The low byte holds the
/// device kind.
pub const DEVICE_REG_INFO: usize = 0;
pub const DEVICE_INFO_ENABLED: u32 = 1 << 31;

#[must_use]
pub fn mapping_table_address(code: Unsigned6Bit) -> usize {
    MAPPING_TABLE_BASE + usize::from(code) * 4
}

/// Byte address of register `reg` of device `id`.
///
/// # Panics
///
/// Panics if `reg` is outside the device's register block; register
/// indexes are fixed when the device is written, so this is a bug.
#[must_use]
pub fn device_register_address(id: DeviceId, reg: usize) -> usize {
    assert!(
        reg < REGISTERS_PER_DEVICE,
        "device register index {reg} is out of range"
    );
    DEVICE_BASE + usize::from(id) * DEVICE_STRIDE + reg * 4
}

/// Word-level access to the register file.  The backing store may be
/// a mapping of physical shared memory or an in-process buffer; the
/// peripherals can't tell the difference.
///
/// Addresses are byte offsets.  An address outside the register space
/// or not 4-byte aligned is a programming error and implementations
/// panic.
pub trait RegisterBus: Send + Sync {
    fn read(&self, addr: usize) -> u32;
    fn write(&self, addr: usize, value: u32);

    /// Set `bits`, returning the previous value.
    fn fetch_or(&self, addr: usize, bits: u32) -> u32 {
        let old = self.read(addr);
        self.write(addr, old | bits);
        old
    }

    /// Clear the bits not in `mask`, returning the previous value.
    fn fetch_and(&self, addr: usize, mask: u32) -> u32 {
        let old = self.read(addr);
        self.write(addr, old & mask);
        old
    }

    /// Read the low half-word of a slot.  16-bit registers are read
    /// this way.
    fn read16(&self, addr: usize) -> u16 {
        (self.read(addr) & 0xFFFF) as u16
    }
}

/// An in-process register file.  Every slot is an atomic, so a value
/// written by one thread is visible to the next read from any other.
pub struct RegisterFile {
    slots: Box<[AtomicU32]>,
}

impl RegisterFile {
    #[must_use]
    pub fn new() -> RegisterFile {
        let slots: Vec<AtomicU32> = (0..REGISTER_SPACE_SIZE / 4)
            .map(|_| AtomicU32::new(0))
            .collect();
        let regs = RegisterFile {
            slots: slots.into_boxed_slice(),
        };
        regs.write(REG_MAGIC, MAGIC_VALUE);
        regs.write(REG_MAX_DEVICES, (MAX_DEVICES - 1) as u32);
        regs
    }

    fn slot(&self, addr: usize) -> &AtomicU32 {
        assert!(
            addr % 4 == 0,
            "register address {addr:#x} is not 4-byte aligned"
        );
        match self.slots.get(addr / 4) {
            Some(slot) => slot,
            None => panic!("register address {addr:#x} is outside the register space"),
        }
    }

    /// The whole register space as little-endian bytes, in the layout
    /// a shared-memory backend would present.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.slots
            .iter()
            .flat_map(|slot| slot.load(Ordering::SeqCst).to_le_bytes())
            .collect()
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for RegisterFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("RegisterFile")
            .field("attention", &format_args!("{:#x}", self.read(REG_ATTENTION)))
            .field(
                "break_control",
                &format_args!("{}", self.read(REG_BREAK_CONTROL)),
            )
            .finish_non_exhaustive()
    }
}

impl RegisterBus for RegisterFile {
    fn read(&self, addr: usize) -> u32 {
        self.slot(addr).load(Ordering::SeqCst)
    }

    fn write(&self, addr: usize, value: u32) {
        self.slot(addr).store(value, Ordering::SeqCst)
    }

    fn fetch_or(&self, addr: usize, bits: u32) -> u32 {
        self.slot(addr).fetch_or(bits, Ordering::SeqCst)
    }

    fn fetch_and(&self, addr: usize, mask: u32) -> u32 {
        self.slot(addr).fetch_and(mask, Ordering::SeqCst)
    }
}

#[test]
fn test_system_registers_initialised() {
    let regs = RegisterFile::new();
    assert_eq!(regs.read(REG_MAGIC), MAGIC_VALUE);
    assert_eq!(regs.read(REG_MAX_DEVICES), 31);
    assert_eq!(regs.read(REG_BREAK_CONTROL), BREAK_IDLE);
}

#[test]
fn test_le_layout() {
    let regs = RegisterFile::new();
    regs.write(REG_BREAK_DATA, 0x1234_5678);
    let bytes = regs.to_le_bytes();
    assert_eq!(bytes.len(), REGISTER_SPACE_SIZE);
    assert_eq!(&bytes[REG_BREAK_DATA..REG_BREAK_DATA + 4], &[0x78, 0x56, 0x34, 0x12]);
    assert_eq!(regs.read16(REG_BREAK_DATA), 0x5678);
}

#[test]
fn test_device_register_addresses() {
    let id = DeviceId::new(2).expect("valid device id");
    assert_eq!(device_register_address(id, 0), 0x280);
    assert_eq!(device_register_address(id, 15), 0x2BC);
    assert_eq!(mapping_table_address(u6!(0o77)), 0x1FC);
}

#[test]
fn test_atomic_bit_operations() {
    let regs = RegisterFile::new();
    assert_eq!(regs.fetch_or(REG_ATTENTION, 0b100), 0);
    assert_eq!(regs.fetch_or(REG_ATTENTION, 0b010), 0b100);
    assert_eq!(regs.fetch_and(REG_ATTENTION, !0b100), 0b110);
    assert_eq!(regs.read(REG_ATTENTION), 0b010);
}

#[test]
#[should_panic(expected = "outside the register space")]
fn test_out_of_range_address_panics() {
    let regs = RegisterFile::new();
    regs.read(REGISTER_SPACE_SIZE);
}

#[test]
#[should_panic(expected = "not 4-byte aligned")]
fn test_misaligned_address_panics() {
    let regs = RegisterFile::new();
    regs.write(REG_ATTENTION + 1, 0);
}

#[test]
#[should_panic(expected = "out of range")]
fn test_device_register_index_checked() {
    let id = DeviceId::new(1).expect("valid device id");
    let _ = device_register_address(id, REGISTERS_PER_DEVICE);
}
