//! Neutral key ⇄ X11 keysym ⇄ keycode translation, and modifier masks.

use std::collections::HashMap;

use x11rb::protocol::xproto::{Keycode, Keysym};

use crate::hotkey::{Key, Modifiers};

/// Core protocol modifier bits used for grabs.
const SHIFT_MASK: u16 = 0x0001;
const CONTROL_MASK: u16 = 0x0004;
const MOD1_MASK: u16 = 0x0008; // Alt
const MOD4_MASK: u16 = 0x0040; // Super

const XK_UPPER_A: Keysym = 0x0041;
const XK_UPPER_Z: Keysym = 0x005a;
const XK_LOWER_A: Keysym = 0x0061;

/// Keysym for each neutral key, indexed by key code.
const KEYSYMS: [Keysym; 56] = [
    0x0061, 0x0062, 0x0063, 0x0064, 0x0065, 0x0066, 0x0067, 0x0068, 0x0069, 0x006a, 0x006b,
    0x006c, 0x006d, 0x006e, 0x006f, 0x0070, 0x0071, 0x0072, 0x0073, 0x0074, 0x0075, 0x0076,
    0x0077, 0x0078, 0x0079, 0x007a, // a..z
    0x0030, 0x0031, 0x0032, 0x0033, 0x0034, 0x0035, 0x0036, 0x0037, 0x0038, 0x0039, // 0..9
    0xffbe, 0xffbf, 0xffc0, 0xffc1, 0xffc2, 0xffc3, 0xffc4, 0xffc5, 0xffc6, 0xffc7, 0xffc8,
    0xffc9, // F1..F12
    0xff52, 0xff54, 0xff51, 0xff53, // Up Down Left Right
    0x0020, 0xff0d, 0xff1b, 0xff09, // space Return Escape Tab
];

const _: () = assert!(KEYSYMS.len() == Key::ALL.len());

/// The keysym a neutral key is grabbed by.
pub(super) fn keysym_for(key: Key) -> Keysym {
    KEYSYMS[key.code() as usize]
}

/// Reverse of [`keysym_for`], also accepting upper-case letters.
fn key_for_keysym(sym: Keysym) -> Option<Key> {
    let sym = match sym {
        XK_UPPER_A..=XK_UPPER_Z => sym - XK_UPPER_A + XK_LOWER_A,
        _ => sym,
    };
    let index = KEYSYMS.iter().position(|&k| k == sym)?;
    Key::from_code(index as u32)
}

/// Grab modifier mask for a neutral modifier set.
pub(super) fn grab_mask(modifiers: Modifiers) -> u16 {
    let mut mask = 0;
    if modifiers.contains(Modifiers::SHIFT) {
        mask |= SHIFT_MASK;
    }
    if modifiers.contains(Modifiers::CTRL) {
        mask |= CONTROL_MASK;
    }
    if modifiers.contains(Modifiers::ALT) {
        mask |= MOD1_MASK;
    }
    if modifiers.contains(Modifiers::META) {
        mask |= MOD4_MASK;
    }
    mask
}

/// Neutral modifiers from an event's state field. Lock and button bits
/// are ignored.
pub(super) fn modifiers_from_state(state: u16) -> Modifiers {
    let mut modifiers = Modifiers::NONE;
    if state & SHIFT_MASK != 0 {
        modifiers |= Modifiers::SHIFT;
    }
    if state & CONTROL_MASK != 0 {
        modifiers |= Modifiers::CTRL;
    }
    if state & MOD1_MASK != 0 {
        modifiers |= Modifiers::ALT;
    }
    if state & MOD4_MASK != 0 {
        modifiers |= Modifiers::META;
    }
    modifiers
}

/// Keycode lookup built from the server's keyboard mapping.
#[derive(Debug, Default)]
pub(super) struct Keymap {
    keycodes: HashMap<Key, Keycode>,
    keys: HashMap<Keycode, Key>,
}

impl Keymap {
    /// Build from a `GetKeyboardMapping` reply covering keycodes from
    /// `min_keycode` upward.
    ///
    /// The first keycode carrying a key's keysym wins.
    pub(super) fn from_mapping(
        min_keycode: Keycode,
        keysyms_per_keycode: u8,
        keysyms: &[Keysym],
    ) -> Self {
        let mut keymap = Self::default();
        if keysyms_per_keycode == 0 {
            return keymap;
        }

        for (offset, column) in keysyms.chunks(keysyms_per_keycode as usize).enumerate() {
            let Some(keycode) = u8::try_from(min_keycode as usize + offset).ok() else {
                break;
            };
            if let Some(key) = column.iter().find_map(|&sym| key_for_keysym(sym)) {
                keymap.keycodes.entry(key).or_insert(keycode);
                keymap.keys.entry(keycode).or_insert(key);
            }
        }
        keymap
    }

    pub(super) fn keycode(&self, key: Key) -> Option<Keycode> {
        self.keycodes.get(&key).copied()
    }

    pub(super) fn key(&self, keycode: Keycode) -> Option<Key> {
        self.keys.get(&keycode).copied()
    }

    pub(super) fn len(&self) -> usize {
        self.keycodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keysym_round_trip_for_every_key() {
        for &key in Key::ALL {
            assert_eq!(key_for_keysym(keysym_for(key)), Some(key), "{key}");
        }
    }

    #[test]
    fn upper_case_letters_resolve() {
        assert_eq!(key_for_keysym(0x004b), Some(Key::K));
        assert_eq!(key_for_keysym(0x0021), None); // exclam
    }

    #[test]
    fn mapping_assigns_first_matching_keycode() {
        // Three keysyms per keycode starting at keycode 8:
        //   8: a A       9: 1 exclam    10: (nothing known)
        //  11: a A (duplicate, 8 wins)  12: F1
        let keysyms = [
            0x61, 0x41, 0, //
            0x31, 0x21, 0, //
            0xfe03, 0, 0, //
            0x61, 0x41, 0, //
            0xffbe, 0, 0,
        ];
        let keymap = Keymap::from_mapping(8, 3, &keysyms);

        assert_eq!(keymap.keycode(Key::A), Some(8));
        assert_eq!(keymap.keycode(Key::Num1), Some(9));
        assert_eq!(keymap.keycode(Key::F1), Some(12));
        assert_eq!(keymap.keycode(Key::Space), None);
        assert_eq!(keymap.key(10), None);
        assert_eq!(keymap.key(11), Some(Key::A));
        assert_eq!(keymap.len(), 3);
    }

    #[test]
    fn mapping_with_zero_width_is_empty() {
        let keymap = Keymap::from_mapping(8, 0, &[0x61]);
        assert_eq!(keymap.len(), 0);
    }

    #[test]
    fn modifier_masks_round_trip() {
        for bits in 0..=0xF {
            let modifiers = Modifiers::from_bits(bits).unwrap();
            assert_eq!(modifiers_from_state(grab_mask(modifiers)), modifiers);
        }
    }

    #[test]
    fn lock_bits_are_ignored() {
        let caps_num_ctrl = 0x0002 | 0x0010 | CONTROL_MASK;
        assert_eq!(modifiers_from_state(caps_num_ctrl), Modifiers::CTRL);
    }
}
