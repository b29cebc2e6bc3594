//! Platform hook adapters — translate hotkeys into OS-level registrations
//! and feed OS key events back to the owning context.
//!
//! One adapter instance belongs to exactly one context. The context
//! serialises every call on the trait; the adapter's own event thread
//! talks to the context only through the [`TriggerSink`] handed to
//! [`HookAdapter::start`].

pub mod virtual_hook;

#[cfg(target_os = "linux")]
pub mod x11;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "macos")]
pub mod macos;

pub use virtual_hook::{VirtualHook, VirtualKeyboard};

use crate::context::TriggerSink;
use crate::error::HotkeyError;
use crate::hotkey::Hotkey;

/// Owned token for one OS-level registration.
///
/// Not `Clone`: each handle lives in exactly one registration-set entry
/// and is released once, by unregister or by the shutdown sweep.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping a registration handle leaks the OS binding"]
pub struct RegistrationHandle {
    hotkey: Hotkey,
    token: u64,
}

impl RegistrationHandle {
    /// `token` is adapter-defined (grab id, hotkey id, ...).
    pub fn new(hotkey: Hotkey, token: u64) -> Self {
        Self { hotkey, token }
    }

    pub fn hotkey(&self) -> Hotkey {
        self.hotkey
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// A platform's global-hotkey capability.
pub trait HookAdapter: Send {
    /// Short name for logs (`"x11"`, `"win32"`, ...).
    fn name(&self) -> &'static str;

    /// Install the system hook and begin delivering events to `sink`.
    ///
    /// Failure here means the context cannot be created.
    fn start(&mut self, sink: TriggerSink) -> Result<(), HotkeyError>;

    /// Bind `hotkey` at the OS level.
    ///
    /// Must not leave a partial binding behind on failure.
    fn register(&mut self, hotkey: Hotkey) -> Result<RegistrationHandle, HotkeyError>;

    /// Release the binding behind `handle`.
    ///
    /// On error the binding is assumed to still be in place.
    fn unregister(&mut self, handle: &RegistrationHandle) -> Result<(), HotkeyError>;

    /// Tear down the hook. Blocks until no callback is in flight.
    /// Calling it more than once is a no-op.
    fn stop(&mut self);
}

/// The adapter for the platform this crate was built for.
pub fn platform_default() -> Result<Box<dyn HookAdapter>, HotkeyError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(x11::X11Hook::connect()?))
    }

    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(windows::Win32Hook::new()))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(macos::EventTapHook::new()))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        Err(HotkeyError::HookUnavailable(
            "no hotkey adapter for this platform".into(),
        ))
    }
}
