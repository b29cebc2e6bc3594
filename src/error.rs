//! Error types for hotkey contexts and configuration.

use crate::hotkey::Hotkey;

/// Errors returned by [`Context`](crate::Context) operations and adapters.
///
/// None of these is fatal to the process. A failed operation never
/// leaves the registration set half-updated.
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    /// The context has been shut down.
    #[error("hotkey context has been shut down")]
    InvalidHandle,

    /// The hotkey is already registered in this context.
    #[error("{0} is already registered in this context")]
    DuplicateRegistration(Hotkey),

    /// The platform refused to bind or release the hotkey (claimed by
    /// another process, reserved, no native key, insufficient privilege).
    #[error("platform rejected {hotkey}: {reason}")]
    OsRejected { hotkey: Hotkey, reason: String },

    /// Unregister of a hotkey that is not bound in this context.
    #[error("{0} is not registered in this context")]
    NotRegistered(Hotkey),

    /// No system hook could be installed. Only returned from init.
    #[error("hotkey hook unavailable: {0}")]
    HookUnavailable(String),

    /// Raw integers that do not name a valid hotkey.
    #[error("invalid hotkey: modifiers={modifiers:#x} key={key}")]
    InvalidHotkey { modifiers: u32, key: u32 },
}

impl HotkeyError {
    pub(crate) fn rejected(hotkey: Hotkey, reason: impl Into<String>) -> Self {
        Self::OsRejected {
            hotkey,
            reason: reason.into(),
        }
    }
}

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidVar { var: &'static str, value: String },
}
