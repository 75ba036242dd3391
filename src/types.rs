use serde::{Deserialize, Serialize};
use std::fmt;

/// 64-bit transaction identifier.
///
/// Ordering between transaction ids is cyclic, so `Ord` is deliberately not
/// implemented; retention comparisons must go through [`TransactionId::precedes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub const INVALID: TransactionId = TransactionId(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Modular "is older than" relation over the transaction id space.
    pub fn precedes(self, other: TransactionId) -> bool {
        (self.0.wrapping_sub(other.0) as i64) < 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte position in the write-ahead log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 as u32)
    }
}

/// Database a logical slot is bound to; [`DatabaseId::NONE`] marks a
/// physical slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DatabaseId(pub u32);

impl DatabaseId {
    pub const NONE: DatabaseId = DatabaseId(0);

    /// Logical slots carry a database binding, physical slots do not.
    pub fn is_logical(self) -> bool {
        self != Self::NONE
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a slot survives release and restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotPersistency {
    #[default]
    Persistent,
    /// Deleted on release; never restored at startup.
    Ephemeral,
}

impl SlotPersistency {
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            SlotPersistency::Persistent => 1,
            SlotPersistency::Ephemeral => 0,
        }
    }

    pub(crate) fn from_wire(value: u8) -> Option<SlotPersistency> {
        match value {
            1 => Some(SlotPersistency::Persistent),
            0 => Some(SlotPersistency::Ephemeral),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedes_is_wrap_aware() {
        assert!(TransactionId(3).precedes(TransactionId(4)));
        assert!(!TransactionId(4).precedes(TransactionId(3)));
        assert!(!TransactionId(7).precedes(TransactionId(7)));
        // An id just past the wrap point is newer than one just before it.
        assert!(TransactionId(u64::MAX).precedes(TransactionId(1)));
        assert!(!TransactionId(1).precedes(TransactionId(u64::MAX)));
    }

    #[test]
    fn lsn_displays_as_hi_lo() {
        assert_eq!(Lsn(0x0000_0001_0000_2A00).to_string(), "1/2A00");
        assert_eq!(Lsn::INVALID.to_string(), "0/0");
    }

    #[test]
    fn database_id_classifies_slots() {
        assert!(!DatabaseId::NONE.is_logical());
        assert!(DatabaseId(16384).is_logical());
    }

    #[test]
    fn persistency_wire_round_trip() {
        for p in [SlotPersistency::Persistent, SlotPersistency::Ephemeral] {
            assert_eq!(SlotPersistency::from_wire(p.to_wire()), Some(p));
        }
        assert_eq!(SlotPersistency::from_wire(7), None);
    }
}
