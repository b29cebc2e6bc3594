//! Platform-neutral key codes.
//!
//! The numbering is part of the C ABI: letters, digits, function keys,
//! arrows, then a handful of special keys. Adapters translate these to
//! and from their native codes.

use std::fmt;

macro_rules! keys {
    ($($variant:ident = $code:literal => $name:literal,)+) => {
        /// A key that can be the primary key of a hotkey.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum Key {
            $($variant = $code,)+
        }

        impl Key {
            /// All keys, ordered by code.
            pub const ALL: &'static [Key] = &[$(Key::$variant,)+];

            /// Upper-case display name, e.g. `"F9"` or `"SPACE"`.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Key::$variant => $name,)+
                }
            }
        }
    };
}

keys! {
    A = 0 => "A",
    B = 1 => "B",
    C = 2 => "C",
    D = 3 => "D",
    E = 4 => "E",
    F = 5 => "F",
    G = 6 => "G",
    H = 7 => "H",
    I = 8 => "I",
    J = 9 => "J",
    K = 10 => "K",
    L = 11 => "L",
    M = 12 => "M",
    N = 13 => "N",
    O = 14 => "O",
    P = 15 => "P",
    Q = 16 => "Q",
    R = 17 => "R",
    S = 18 => "S",
    T = 19 => "T",
    U = 20 => "U",
    V = 21 => "V",
    W = 22 => "W",
    X = 23 => "X",
    Y = 24 => "Y",
    Z = 25 => "Z",
    Num0 = 26 => "0",
    Num1 = 27 => "1",
    Num2 = 28 => "2",
    Num3 = 29 => "3",
    Num4 = 30 => "4",
    Num5 = 31 => "5",
    Num6 = 32 => "6",
    Num7 = 33 => "7",
    Num8 = 34 => "8",
    Num9 = 35 => "9",
    F1 = 36 => "F1",
    F2 = 37 => "F2",
    F3 = 38 => "F3",
    F4 = 39 => "F4",
    F5 = 40 => "F5",
    F6 = 41 => "F6",
    F7 = 42 => "F7",
    F8 = 43 => "F8",
    F9 = 44 => "F9",
    F10 = 45 => "F10",
    F11 = 46 => "F11",
    F12 = 47 => "F12",
    Up = 48 => "UP",
    Down = 49 => "DOWN",
    Left = 50 => "LEFT",
    Right = 51 => "RIGHT",
    Space = 52 => "SPACE",
    Enter = 53 => "ENTER",
    Escape = 54 => "ESCAPE",
    Tab = 55 => "TAB",
}

impl Key {
    /// Look up a key by its neutral code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn is_letter(self) -> bool {
        (self as u32) <= Key::Z as u32
    }

    pub const fn is_digit(self) -> bool {
        let code = self as u32;
        code >= Key::Num0 as u32 && code <= Key::Num9 as u32
    }

    pub const fn is_function(self) -> bool {
        let code = self as u32;
        code >= Key::F1 as u32 && code <= Key::F12 as u32
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_indexed_by_code() {
        for (index, key) in Key::ALL.iter().enumerate() {
            assert_eq!(key.code() as usize, index, "{key} out of place");
        }
        assert_eq!(Key::ALL.len(), 56);
    }

    #[test]
    fn from_code_bounds() {
        assert_eq!(Key::from_code(0), Some(Key::A));
        assert_eq!(Key::from_code(52), Some(Key::Space));
        assert_eq!(Key::from_code(55), Some(Key::Tab));
        assert_eq!(Key::from_code(56), None);
        assert_eq!(Key::from_code(u32::MAX), None);
    }

    #[test]
    fn classification() {
        assert!(Key::Q.is_letter());
        assert!(!Key::Num0.is_letter());
        assert!(Key::Num7.is_digit());
        assert!(Key::F12.is_function());
        assert!(!Key::Up.is_function());
    }
}
