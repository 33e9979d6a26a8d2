use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identifies a registered peripheral.  Device IDs select a block of
/// registers in the register file and a bit in the attention bitmap.
/// ID 0 is never assigned, because a zero entry in the mapping table
/// means "no device".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u8);

impl DeviceId {
    pub const FIRST: DeviceId = DeviceId(1);

    /// Returns `None` for 0 and for values too large to have a
    /// register block.
    #[must_use]
    pub fn new(id: u8) -> Option<DeviceId> {
        if id == 0 || usize::from(id) >= crate::regs::MAX_DEVICES {
            None
        } else {
            Some(DeviceId(id))
        }
    }

    #[must_use]
    pub fn next(&self) -> Option<DeviceId> {
        self.0.checked_add(1).and_then(DeviceId::new)
    }

    #[must_use]
    pub fn attention_bit(&self) -> u32 {
        1 << self.0
    }
}

impl From<DeviceId> for u8 {
    fn from(id: DeviceId) -> u8 {
        id.0
    }
}

impl From<DeviceId> for usize {
    fn from(id: DeviceId) -> usize {
        usize::from(id.0)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl Debug for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "DeviceId({})", self.0)
    }
}

/// The closed set of device families this simulator knows how to
/// drive.  The numeric values appear in device register 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Teleprinter = 1,
    PaperTape = 2,
    Df32 = 3,
    Rf08 = 4,
    Rk8e = 5,
    Tc08 = 6,
    Clock = 7,
}

impl DeviceKind {
    #[must_use]
    pub fn code(&self) -> u32 {
        *self as u32
    }
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            DeviceKind::Teleprinter => "teleprinter",
            DeviceKind::PaperTape => "high-speed paper tape",
            DeviceKind::Df32 => "DF32 disk",
            DeviceKind::Rf08 => "RF08 disk",
            DeviceKind::Rk8e => "RK8E disk",
            DeviceKind::Tc08 => "TC08 DECtape",
            DeviceKind::Clock => "real-time clock",
        })
    }
}

#[test]
fn test_device_id_range() {
    assert!(DeviceId::new(0).is_none());
    assert!(DeviceId::new(31).is_some());
    assert!(DeviceId::new(32).is_none());
    assert_eq!(DeviceId::FIRST.next(), DeviceId::new(2));
    assert_eq!(DeviceId::new(31).and_then(|id| id.next()), None);
    assert_eq!(DeviceId::FIRST.attention_bit(), 2);
}
