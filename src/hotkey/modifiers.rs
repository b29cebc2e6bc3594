//! Modifier bitmask with stable bit positions.
//!
//! bit0 = Alt/Option, bit1 = Ctrl/Control, bit2 = Shift,
//! bit3 = Meta/Super/Cmd. These positions are part of the C ABI and
//! must never change.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of keyboard modifiers.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const ALT: Self = Self(0x1);
    pub const CTRL: Self = Self(0x2);
    pub const SHIFT: Self = Self(0x4);
    pub const META: Self = Self(0x8);

    /// Every valid bit.
    pub const ALL: Self = Self(0xF);

    /// Display order: Ctrl, Shift, Alt, Meta.
    const NAMED: [(Self, &'static str); 4] = [
        (Self::CTRL, "CTRL"),
        (Self::SHIFT, "SHIFT"),
        (Self::ALT, "ALT"),
        (Self::META, "META"),
    ];

    /// Convert a raw bitmask, rejecting bits above bit 3.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !(Self::ALL.0 as u32) != 0 {
            None
        } else {
            Some(Self(bits as u8))
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modifiers({self} = {:#06b})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_are_stable() {
        assert_eq!(Modifiers::ALT.bits(), 0b0001);
        assert_eq!(Modifiers::CTRL.bits(), 0b0010);
        assert_eq!(Modifiers::SHIFT.bits(), 0b0100);
        assert_eq!(Modifiers::META.bits(), 0b1000);
    }

    #[test]
    fn from_bits_rejects_unknown_bits() {
        assert_eq!(Modifiers::from_bits(0b0110), Some(Modifiers::CTRL | Modifiers::SHIFT));
        assert_eq!(Modifiers::from_bits(0x10), None);
        assert_eq!(Modifiers::from_bits(u32::MAX), None);
    }

    #[test]
    fn contains_checks_all_bits() {
        let mods = Modifiers::CTRL | Modifiers::SHIFT;
        assert!(mods.contains(Modifiers::CTRL));
        assert!(mods.contains(Modifiers::CTRL | Modifiers::SHIFT));
        assert!(!mods.contains(Modifiers::CTRL | Modifiers::ALT));
        assert!(mods.contains(Modifiers::NONE));
    }

    #[test]
    fn display_uses_fixed_order() {
        let mods = Modifiers::META | Modifiers::ALT | Modifiers::CTRL;
        assert_eq!(mods.to_string(), "CTRL+ALT+META");
        assert_eq!(Modifiers::NONE.to_string(), "NONE");
    }
}
