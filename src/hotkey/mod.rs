//! Hotkey identity — modifier set plus a platform-neutral key.
//!
//! `Hotkey` is the key of the registration set and the element type of
//! the trigger buffer. Equality and hashing are by value only.

mod key;
mod modifiers;

pub use key::Key;
pub use modifiers::Modifiers;

use std::fmt;

use crate::error::HotkeyError;

/// A (modifiers, key) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hotkey {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl Hotkey {
    pub const fn new(modifiers: Modifiers, key: Key) -> Self {
        Self { modifiers, key }
    }

    /// A hotkey with no modifiers.
    pub const fn bare(key: Key) -> Self {
        Self::new(Modifiers::NONE, key)
    }

    /// Build a hotkey from the raw integers used at the C ABI.
    pub fn from_raw(modifiers: u32, key: u32) -> Result<Self, HotkeyError> {
        match (Modifiers::from_bits(modifiers), Key::from_code(key)) {
            (Some(modifiers), Some(key)) => Ok(Self { modifiers, key }),
            _ => Err(HotkeyError::InvalidHotkey { modifiers, key }),
        }
    }

    /// The `(modifiers, key)` pair as raw integers.
    pub const fn to_raw(self) -> (u32, u32) {
        (self.modifiers.bits() as u32, self.key.code())
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}+{}", self.modifiers, self.key)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn equality_is_by_value() {
        let a = Hotkey::new(Modifiers::CTRL | Modifiers::SHIFT, Key::K);
        let b = Hotkey::from_raw(0b0110, 10).unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b), "same combination must hash identically");
    }

    #[test]
    fn from_raw_rejects_invalid_parts() {
        assert!(matches!(
            Hotkey::from_raw(0x10, 0),
            Err(HotkeyError::InvalidHotkey { modifiers: 0x10, key: 0 })
        ));
        assert!(matches!(
            Hotkey::from_raw(0, 56),
            Err(HotkeyError::InvalidHotkey { modifiers: 0, key: 56 })
        ));
    }

    #[test]
    fn raw_pair_matches_abi() {
        let alt_space = Hotkey::new(Modifiers::ALT, Key::Space);
        assert_eq!(alt_space.to_raw(), (0b0001, 52));
    }

    #[test]
    fn display() {
        assert_eq!(Hotkey::bare(Key::F9).to_string(), "F9");
        assert_eq!(
            Hotkey::new(Modifiers::SHIFT | Modifiers::CTRL, Key::L).to_string(),
            "CTRL+SHIFT+L"
        );
    }
}
