//! macOS adapter — an active CGEventTap on its own run-loop thread.
//!
//! The tap sees every key-down/key-up in the login session. Events that
//! match a registered hotkey are swallowed (the callback returns null);
//! everything else passes through untouched. Requires the Accessibility
//! (or Input Monitoring) permission; without it the tap cannot be created
//! and init fails.
//!
//! Unlike X11 and Win32 there is no system-wide reservation to compete
//! for, so registering a combination another app also listens for always
//! succeeds here.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{HookAdapter, RegistrationHandle};
use crate::context::TriggerSink;
use crate::error::HotkeyError;
use crate::hotkey::{Hotkey, Key, Modifiers};

/// Virtual key codes (kVK_*), indexed by neutral key code.
const KEYCODES: [u16; 56] = [
    0x00, 0x0B, 0x08, 0x02, 0x0E, 0x03, 0x05, 0x04, 0x22, 0x26, 0x28, 0x25, 0x2E, // A–M
    0x2D, 0x1F, 0x23, 0x0C, 0x0F, 0x01, 0x11, 0x20, 0x09, 0x0D, 0x07, 0x10, 0x06, // N–Z
    0x1D, 0x12, 0x13, 0x14, 0x15, 0x17, 0x16, 0x1A, 0x1C, 0x19, // 0–9
    0x7A, 0x78, 0x63, 0x76, 0x60, 0x61, 0x62, 0x64, 0x65, 0x6D, 0x67, 0x6F, // F1–F12
    0x7E, 0x7D, 0x7B, 0x7C, // Up Down Left Right
    0x31, 0x24, 0x35, 0x30, // Space Return Escape Tab
];

const _: () = assert!(KEYCODES.len() == Key::ALL.len());

const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Run-loop slice between stop-flag checks, in seconds.
const RUN_LOOP_SLICE: f64 = 0.1;

fn keycode_for(key: Key) -> u16 {
    KEYCODES[key.code() as usize]
}

fn key_for_keycode(keycode: u16) -> Option<Key> {
    let index = KEYCODES.iter().position(|&k| k == keycode)?;
    Key::from_code(index as u32)
}

fn modifiers_from_flags(flags: ffi::CGEventFlags) -> Modifiers {
    let mut modifiers = Modifiers::NONE;
    if flags & ffi::kCGEventFlagMaskAlternate != 0 {
        modifiers |= Modifiers::ALT;
    }
    if flags & ffi::kCGEventFlagMaskControl != 0 {
        modifiers |= Modifiers::CTRL;
    }
    if flags & ffi::kCGEventFlagMaskShift != 0 {
        modifiers |= Modifiers::SHIFT;
    }
    if flags & ffi::kCGEventFlagMaskCommand != 0 {
        modifiers |= Modifiers::META;
    }
    modifiers
}

/// macOS hotkey hook.
#[derive(Default)]
pub struct EventTapHook {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EventTapHook {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HookAdapter for EventTapHook {
    fn name(&self) -> &'static str {
        "cg-event-tap"
    }

    fn start(&mut self, sink: TriggerSink) -> Result<(), HotkeyError> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::SeqCst);

        let stop = Arc::clone(&self.stop);
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("event-tap-hotkeys".into())
            .spawn(move || run_event_tap(sink, stop, ready_tx))
            .map_err(|e| HotkeyError::HookUnavailable(format!("spawn event tap thread: {e}")))?;

        let ready = ready_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .unwrap_or_else(|_| Err("event tap thread did not start".into()));

        if let Err(reason) = ready {
            self.stop.store(true, Ordering::SeqCst);
            let _ = handle.join();
            return Err(HotkeyError::HookUnavailable(reason));
        }

        self.thread = Some(handle);
        Ok(())
    }

    fn register(&mut self, hotkey: Hotkey) -> Result<RegistrationHandle, HotkeyError> {
        let token = (u64::from(keycode_for(hotkey.key)) << 8) | u64::from(hotkey.modifiers.bits());
        Ok(RegistrationHandle::new(hotkey, token))
    }

    fn unregister(&mut self, _handle: &RegistrationHandle) -> Result<(), HotkeyError> {
        // Matching happens against the context's registration set, which
        // drops the entry once this returns.
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("event tap thread panicked");
            }
        }
    }
}

impl Drop for EventTapHook {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State reachable from the tap callback. Lives on the tap thread only.
struct TapContext {
    sink: TriggerSink,
    tap: AtomicPtr<c_void>,
    /// Hotkey swallowed for each virtual keycode currently down.
    down: Mutex<HashMap<u16, Hotkey>>,
}

/// Create the tap, report readiness, and run the loop until `stop`.
fn run_event_tap(
    sink: TriggerSink,
    stop: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<(), String>>,
) {
    let context_ptr = Box::into_raw(Box::new(TapContext {
        sink,
        tap: AtomicPtr::new(std::ptr::null_mut()),
        down: Mutex::new(HashMap::new()),
    }));

    let mask = (1u64 << ffi::kCGEventKeyDown) | (1u64 << ffi::kCGEventKeyUp);

    // SAFETY: context_ptr stays valid until reclaimed below, after the tap
    // is disabled and released, so the callback never sees a dangling
    // pointer.
    unsafe {
        let tap = ffi::CGEventTapCreate(
            ffi::kCGSessionEventTap,
            ffi::kCGHeadInsertEventTap,
            ffi::kCGEventTapOptionDefault,
            mask,
            tap_callback,
            context_ptr as *mut c_void,
        );
        if tap.is_null() {
            drop(Box::from_raw(context_ptr));
            let _ = ready.send(Err(
                "CGEventTapCreate failed; grant Accessibility permission".into(),
            ));
            return;
        }
        (*context_ptr).tap.store(tap, Ordering::SeqCst);

        let source = ffi::CFMachPortCreateRunLoopSource(std::ptr::null(), tap, 0);
        if source.is_null() {
            ffi::CFRelease(tap as *const c_void);
            drop(Box::from_raw(context_ptr));
            let _ = ready.send(Err("CFMachPortCreateRunLoopSource failed".into()));
            return;
        }

        let run_loop = ffi::CFRunLoopGetCurrent();
        ffi::CFRunLoopAddSource(run_loop, source, ffi::kCFRunLoopCommonModes);
        ffi::CGEventTapEnable(tap, true);

        tracing::debug!("event tap created and enabled");
        let _ = ready.send(Ok(()));

        while !stop.load(Ordering::SeqCst) {
            let result = ffi::CFRunLoopRunInMode(ffi::kCFRunLoopDefaultMode, RUN_LOOP_SLICE, false);
            if result == ffi::kCFRunLoopRunFinished {
                break;
            }
        }

        ffi::CGEventTapEnable(tap, false);
        ffi::CFRunLoopRemoveSource(run_loop, source, ffi::kCFRunLoopCommonModes);
        ffi::CFRelease(source as *const c_void);
        ffi::CFRelease(tap as *const c_void);
        drop(Box::from_raw(context_ptr));
    }

    tracing::debug!("event tap stopped");
}

extern "C" fn tap_callback(
    _proxy: ffi::CGEventTapProxy,
    event_type: ffi::CGEventType,
    event: ffi::CGEventRef,
    user_info: *mut c_void,
) -> ffi::CGEventRef {
    // SAFETY: user_info is the TapContext owned by the tap thread, which
    // outlives the tap.
    let context = unsafe { &*(user_info as *const TapContext) };

    match event_type {
        ffi::kCGEventTapDisabledByTimeout | ffi::kCGEventTapDisabledByUserInput => {
            tracing::warn!("event tap disabled by the system, re-enabling");
            let tap = context.tap.load(Ordering::SeqCst);
            if !tap.is_null() {
                // SAFETY: tap is live until the thread releases it after the loop.
                unsafe { ffi::CGEventTapEnable(tap, true) };
            }
            event
        }
        ffi::kCGEventKeyDown => {
            // SAFETY: event is a valid CGEventRef for the callback's duration.
            let (keycode, flags) = unsafe {
                (
                    ffi::CGEventGetIntegerValueField(event, ffi::kCGKeyboardEventKeycode) as u16,
                    ffi::CGEventGetFlags(event),
                )
            };
            let Some(key) = key_for_keycode(keycode) else {
                return event;
            };
            let hotkey = Hotkey::new(modifiers_from_flags(flags), key);
            if context.sink.press(hotkey) {
                context
                    .down
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(keycode, hotkey);
                std::ptr::null_mut()
            } else {
                event
            }
        }
        ffi::kCGEventKeyUp => {
            // SAFETY: as above.
            let keycode = unsafe {
                ffi::CGEventGetIntegerValueField(event, ffi::kCGKeyboardEventKeycode) as u16
            };
            let swallowed = context
                .down
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&keycode);
            match swallowed {
                Some(hotkey) => {
                    context.sink.release(hotkey);
                    std::ptr::null_mut()
                }
                None => event,
            }
        }
        _ => event,
    }
}

/// CoreGraphics / CoreFoundation declarations used by the tap.
#[allow(non_upper_case_globals)]
mod ffi {
    use std::ffi::c_void;

    pub type CGEventTapProxy = *mut c_void;
    pub type CGEventRef = *mut c_void;
    pub type CGEventType = u32;
    pub type CGEventFlags = u64;
    pub type CFMachPortRef = *mut c_void;
    pub type CFRunLoopSourceRef = *mut c_void;
    pub type CFRunLoopRef = *mut c_void;
    pub type CFAllocatorRef = *const c_void;
    pub type CFStringRef = *const c_void;
    pub type CFTypeRef = *const c_void;

    pub const kCGEventKeyDown: CGEventType = 10;
    pub const kCGEventKeyUp: CGEventType = 11;
    pub const kCGEventTapDisabledByTimeout: CGEventType = 0xFFFF_FFFE;
    pub const kCGEventTapDisabledByUserInput: CGEventType = 0xFFFF_FFFF;

    pub const kCGSessionEventTap: u32 = 1;
    pub const kCGHeadInsertEventTap: u32 = 0;
    /// Active tap: the callback may modify or swallow events.
    pub const kCGEventTapOptionDefault: u32 = 0;

    pub const kCGKeyboardEventKeycode: u32 = 9;

    pub const kCGEventFlagMaskShift: CGEventFlags = 0x0002_0000;
    pub const kCGEventFlagMaskControl: CGEventFlags = 0x0004_0000;
    pub const kCGEventFlagMaskAlternate: CGEventFlags = 0x0008_0000;
    pub const kCGEventFlagMaskCommand: CGEventFlags = 0x0010_0000;

    pub const kCFRunLoopRunFinished: i32 = 1;

    pub type CGEventTapCallBack =
        extern "C" fn(CGEventTapProxy, CGEventType, CGEventRef, *mut c_void) -> CGEventRef;

    #[link(name = "CoreFoundation", kind = "framework")]
    unsafe extern "C" {
        pub static kCFRunLoopCommonModes: CFStringRef;
        pub static kCFRunLoopDefaultMode: CFStringRef;

        pub fn CFRunLoopGetCurrent() -> CFRunLoopRef;
        pub fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        pub fn CFRunLoopRemoveSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        pub fn CFRunLoopRunInMode(mode: CFStringRef, seconds: f64, return_after_source_handled: bool) -> i32;
        pub fn CFMachPortCreateRunLoopSource(
            allocator: CFAllocatorRef,
            port: CFMachPortRef,
            order: i64,
        ) -> CFRunLoopSourceRef;
        pub fn CFRelease(cf: CFTypeRef);
    }

    #[link(name = "CoreGraphics", kind = "framework")]
    unsafe extern "C" {
        pub fn CGEventTapCreate(
            tap: u32,
            place: u32,
            options: u32,
            events_of_interest: u64,
            callback: CGEventTapCallBack,
            user_info: *mut c_void,
        ) -> CFMachPortRef;
        pub fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
        pub fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
        pub fn CGEventGetFlags(event: CGEventRef) -> CGEventFlags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keycodes_are_unique_and_reversible() {
        for &key in Key::ALL {
            assert_eq!(key_for_keycode(keycode_for(key)), Some(key), "{key}");
        }
        assert_eq!(key_for_keycode(0x3A), None); // left Option
    }

    #[test]
    fn flags_translate_to_modifiers() {
        let flags = ffi::kCGEventFlagMaskCommand | ffi::kCGEventFlagMaskShift | 0x100; // device bit
        assert_eq!(modifiers_from_flags(flags), Modifiers::META | Modifiers::SHIFT);
    }
}
