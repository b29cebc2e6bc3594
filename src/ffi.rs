//! C ABI — opaque integer handles over [`Context`].
//!
//! Handles index a process-wide table rather than pointing at memory.
//! Shutdown removes the entry, so a stale or forged handle is simply not
//! found and the call fails instead of touching freed state.
//!
//! ```c
//! uint64_t h = system_hotkey_init();
//! system_hotkey_register(h, 0x1 /* ALT */, 52 /* SPACE */);
//! HotkeyArray fired = system_hotkey_poll(h);
//! system_hotkey_free_array(fired);
//! system_hotkey_shutdown(h);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::config::Config;
use crate::context::Context;
use crate::error::HotkeyError;
use crate::hotkey::Hotkey;

/// A `(modifiers, key)` pair as seen by C callers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHotkey {
    pub modifiers: u32,
    pub key: u32,
}

impl From<Hotkey> for RawHotkey {
    fn from(hotkey: Hotkey) -> Self {
        let (modifiers, key) = hotkey.to_raw();
        Self { modifiers, key }
    }
}

/// Triggered hotkeys returned by [`system_hotkey_poll`], in trigger order.
///
/// Must be released with [`system_hotkey_free_array`]. An empty result has
/// `count == 0` and a null `data` pointer.
#[repr(C)]
#[derive(Debug)]
pub struct HotkeyArray {
    pub count: usize,
    pub data: *mut RawHotkey,
}

impl HotkeyArray {
    fn empty() -> Self {
        Self {
            count: 0,
            data: std::ptr::null_mut(),
        }
    }

    fn from_hotkeys(hotkeys: Vec<Hotkey>) -> Self {
        if hotkeys.is_empty() {
            return Self::empty();
        }
        let raw: Box<[RawHotkey]> = hotkeys.into_iter().map(RawHotkey::from).collect();
        let count = raw.len();
        let data = Box::into_raw(raw) as *mut RawHotkey;
        Self { count, data }
    }
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn table() -> MutexGuard<'static, HashMap<u64, Arc<Context>>> {
    static CONTEXTS: OnceLock<Mutex<HashMap<u64, Arc<Context>>>> = OnceLock::new();
    CONTEXTS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Add a context to the handle table.
pub(crate) fn insert(ctx: Context) -> u64 {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    table().insert(handle, Arc::new(ctx));
    handle
}

/// Resolve a handle. The table lock is released before the caller
/// operates on the context.
fn lookup(handle: u64) -> Result<Arc<Context>, HotkeyError> {
    table()
        .get(&handle)
        .cloned()
        .ok_or(HotkeyError::InvalidHandle)
}

fn report(op: &'static str, handle: u64, result: Result<(), HotkeyError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(op, handle, error = %e, "hotkey call failed");
            false
        }
    }
}

/// Create a context on the platform adapter.
///
/// Configuration is read from `SYSTEM_HOTKEY_*` environment variables.
/// Returns `0` if no hook could be installed.
#[unsafe(no_mangle)]
pub extern "C" fn system_hotkey_init() -> u64 {
    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring invalid hotkey configuration");
        Config::default()
    });

    match Context::with_config(config) {
        Ok(ctx) => insert(ctx),
        Err(e) => {
            tracing::error!(error = %e, "hotkey context init failed");
            0
        }
    }
}

/// Unregister everything and invalidate `handle`. Unknown handles are
/// ignored, so calling this twice is harmless.
#[unsafe(no_mangle)]
pub extern "C" fn system_hotkey_shutdown(handle: u64) {
    let removed = table().remove(&handle);
    if let Some(ctx) = removed {
        ctx.shutdown();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn system_hotkey_register(handle: u64, modifiers: u32, key: u32) -> bool {
    let result = lookup(handle).and_then(|ctx| ctx.register(Hotkey::from_raw(modifiers, key)?));
    report("register", handle, result)
}

#[unsafe(no_mangle)]
pub extern "C" fn system_hotkey_unregister(handle: u64, modifiers: u32, key: u32) -> bool {
    let result = lookup(handle).and_then(|ctx| ctx.unregister(Hotkey::from_raw(modifiers, key)?));
    report("unregister", handle, result)
}

/// Drain triggered hotkeys. Returns an empty array for unknown handles.
#[unsafe(no_mangle)]
pub extern "C" fn system_hotkey_poll(handle: u64) -> HotkeyArray {
    match lookup(handle).and_then(|ctx| ctx.poll()) {
        Ok(hotkeys) => HotkeyArray::from_hotkeys(hotkeys),
        Err(e) => {
            tracing::debug!(handle, error = %e, "poll failed");
            HotkeyArray::empty()
        }
    }
}

/// Release an array returned by [`system_hotkey_poll`].
///
/// # Safety
///
/// `array` must come from `system_hotkey_poll` and must not be freed
/// twice.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn system_hotkey_free_array(array: HotkeyArray) {
    if array.data.is_null() {
        return;
    }
    let slice = std::ptr::slice_from_raw_parts_mut(array.data, array.count);
    // SAFETY: data/count were produced by Box::into_raw on a boxed slice
    // of exactly this length.
    drop(unsafe { Box::from_raw(slice) });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{VirtualHook, VirtualKeyboard};
    use crate::hotkey::{Key, Modifiers};

    fn virtual_handle() -> (u64, VirtualKeyboard) {
        let (hook, keyboard) = VirtualHook::new();
        let ctx = Context::with_adapter(Box::new(hook), Config::default()).unwrap();
        (insert(ctx), keyboard)
    }

    fn poll_vec(handle: u64) -> Vec<RawHotkey> {
        let array = system_hotkey_poll(handle);
        let out = if array.data.is_null() {
            Vec::new()
        } else {
            // SAFETY: array comes straight from system_hotkey_poll.
            unsafe { std::slice::from_raw_parts(array.data, array.count) }.to_vec()
        };
        // SAFETY: freed exactly once.
        unsafe { system_hotkey_free_array(array) };
        out
    }

    #[test]
    fn register_trigger_poll_through_abi() {
        let (handle, keyboard) = virtual_handle();
        let space = Key::Space.code();

        assert!(system_hotkey_register(handle, 0b0001, space));
        keyboard.tap(Hotkey::new(Modifiers::ALT, Key::Space));

        assert_eq!(poll_vec(handle), vec![RawHotkey { modifiers: 0b0001, key: space }]);
        assert!(poll_vec(handle).is_empty());

        system_hotkey_shutdown(handle);
    }

    #[test]
    fn flat_sequence_preserves_trigger_order() {
        let (handle, keyboard) = virtual_handle();
        let ctrl_shift = (Modifiers::CTRL | Modifiers::SHIFT).bits() as u32;

        assert!(system_hotkey_register(handle, ctrl_shift, Key::K.code()));
        assert!(system_hotkey_register(handle, ctrl_shift, Key::L.code()));
        keyboard.tap(Hotkey::from_raw(ctrl_shift, Key::K.code()).unwrap());
        keyboard.tap(Hotkey::from_raw(ctrl_shift, Key::L.code()).unwrap());

        let keys: Vec<u32> = poll_vec(handle).iter().map(|raw| raw.key).collect();
        assert_eq!(keys, vec![Key::K.code(), Key::L.code()]);

        system_hotkey_shutdown(handle);
    }

    #[test]
    fn failures_are_reported_as_false() {
        let (handle, _keyboard) = virtual_handle();

        assert!(!system_hotkey_register(handle, 0x10, 0), "invalid modifier bit");
        assert!(!system_hotkey_register(handle, 0, 999), "invalid key");
        assert!(!system_hotkey_unregister(handle, 0, Key::F1.code()), "never registered");

        assert!(system_hotkey_register(handle, 0, Key::F1.code()));
        assert!(!system_hotkey_register(handle, 0, Key::F1.code()), "duplicate");

        system_hotkey_shutdown(handle);
    }

    #[test]
    fn stale_handle_is_rejected() {
        let (handle, keyboard) = virtual_handle();
        assert!(system_hotkey_register(handle, 0, Key::F9.code()));

        system_hotkey_shutdown(handle);
        assert!(keyboard.is_stopped());

        assert!(!system_hotkey_register(handle, 0, Key::F9.code()));
        assert!(!system_hotkey_unregister(handle, 0, Key::F9.code()));
        assert!(poll_vec(handle).is_empty());
        system_hotkey_shutdown(handle);
    }

    #[test]
    fn unknown_handles_are_harmless() {
        assert!(!system_hotkey_register(0, 0, 0));
        assert!(poll_vec(u64::MAX).is_empty());
        system_hotkey_shutdown(0);
        // SAFETY: null arrays are accepted.
        unsafe { system_hotkey_free_array(HotkeyArray::empty()) };
    }
}
