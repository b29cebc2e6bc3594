//! Virtual adapter — an in-process stand-in for an OS keyboard.
//!
//! [`VirtualHook`] is the adapter handed to a context; [`VirtualKeyboard`]
//! is the paired handle a test uses to press keys, simulate another
//! process holding a combination, or make the OS fail an unregister.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{HookAdapter, RegistrationHandle};
use crate::context::TriggerSink;
use crate::error::HotkeyError;
use crate::hotkey::Hotkey;

#[derive(Debug, Default)]
struct Desk {
    sink: Option<TriggerSink>,
    /// Combinations this hook currently intercepts.
    grabbed: HashSet<Hotkey>,
    /// Combinations held by some other (simulated) process.
    claimed: HashSet<Hotkey>,
    failing_unregisters: u32,
    stopped: bool,
}

type SharedDesk = Arc<Mutex<Desk>>;

fn lock(desk: &SharedDesk) -> MutexGuard<'_, Desk> {
    desk.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Adapter backed by a simulated keyboard.
#[derive(Debug)]
pub struct VirtualHook {
    desk: SharedDesk,
    available: bool,
    next_token: u64,
}

impl VirtualHook {
    /// Create a hook and the keyboard that drives it.
    pub fn new() -> (Self, VirtualKeyboard) {
        let desk = SharedDesk::default();
        let hook = Self {
            desk: Arc::clone(&desk),
            available: true,
            next_token: 1,
        };
        (hook, VirtualKeyboard { desk })
    }

    /// A hook whose `start` always fails, as when the OS has no hook to
    /// offer.
    pub fn unavailable() -> Self {
        Self {
            desk: SharedDesk::default(),
            available: false,
            next_token: 1,
        }
    }
}

impl HookAdapter for VirtualHook {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn start(&mut self, sink: TriggerSink) -> Result<(), HotkeyError> {
        if !self.available {
            return Err(HotkeyError::HookUnavailable(
                "virtual keyboard is unavailable".into(),
            ));
        }
        let mut desk = lock(&self.desk);
        desk.sink = Some(sink);
        desk.stopped = false;
        Ok(())
    }

    fn register(&mut self, hotkey: Hotkey) -> Result<RegistrationHandle, HotkeyError> {
        let mut desk = lock(&self.desk);
        if desk.claimed.contains(&hotkey) {
            return Err(HotkeyError::rejected(hotkey, "claimed by another process"));
        }
        if !desk.grabbed.insert(hotkey) {
            return Err(HotkeyError::rejected(hotkey, "already grabbed"));
        }
        let token = self.next_token;
        self.next_token += 1;
        Ok(RegistrationHandle::new(hotkey, token))
    }

    fn unregister(&mut self, handle: &RegistrationHandle) -> Result<(), HotkeyError> {
        let mut desk = lock(&self.desk);
        if desk.failing_unregisters > 0 {
            desk.failing_unregisters -= 1;
            return Err(HotkeyError::rejected(handle.hotkey(), "transient failure"));
        }
        if !desk.grabbed.remove(&handle.hotkey()) {
            return Err(HotkeyError::rejected(handle.hotkey(), "not grabbed"));
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut desk = lock(&self.desk);
        desk.sink = None;
        desk.grabbed.clear();
        desk.stopped = true;
    }
}

/// Test-side handle onto a [`VirtualHook`].
#[derive(Debug, Clone)]
pub struct VirtualKeyboard {
    desk: SharedDesk,
}

impl VirtualKeyboard {
    /// Sink to deliver to, if `hotkey` is intercepted right now.
    fn intercepting_sink(&self, hotkey: Hotkey) -> Option<TriggerSink> {
        let desk = lock(&self.desk);
        if desk.grabbed.contains(&hotkey) {
            desk.sink.clone()
        } else {
            None
        }
    }

    /// Press `hotkey`. Returns `true` if the hook intercepted it, i.e. it
    /// did not reach other applications.
    pub fn press(&self, hotkey: Hotkey) -> bool {
        // Desk lock is released before the sink takes the engine lock.
        match self.intercepting_sink(hotkey) {
            Some(sink) => sink.press(hotkey),
            None => false,
        }
    }

    /// Release `hotkey`. Returns `true` if the release was intercepted.
    pub fn release(&self, hotkey: Hotkey) -> bool {
        match self.intercepting_sink(hotkey) {
            Some(sink) => sink.release(hotkey),
            None => false,
        }
    }

    /// Press and release once.
    pub fn tap(&self, hotkey: Hotkey) -> bool {
        let intercepted = self.press(hotkey);
        self.release(hotkey);
        intercepted
    }

    /// Hold `hotkey` long enough for `presses` key-down events (the first
    /// plus OS auto-repeat), then release it.
    pub fn repeat(&self, hotkey: Hotkey, presses: usize) {
        for _ in 0..presses {
            self.press(hotkey);
        }
        self.release(hotkey);
    }

    /// Simulate another process holding `hotkey`.
    pub fn claim(&self, hotkey: Hotkey) {
        lock(&self.desk).claimed.insert(hotkey);
    }

    pub fn unclaim(&self, hotkey: Hotkey) {
        lock(&self.desk).claimed.remove(&hotkey);
    }

    /// Make the next unregister fail as a transient OS error.
    pub fn fail_next_unregister(&self) {
        lock(&self.desk).failing_unregisters += 1;
    }

    pub fn is_grabbed(&self, hotkey: Hotkey) -> bool {
        lock(&self.desk).grabbed.contains(&hotkey)
    }

    pub fn grab_count(&self) -> usize {
        lock(&self.desk).grabbed.len()
    }

    /// Whether the hook has been stopped.
    pub fn is_stopped(&self) -> bool {
        lock(&self.desk).stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{Key, Modifiers};

    #[test]
    fn claimed_combination_is_rejected() {
        let (mut hook, keyboard) = VirtualHook::new();
        let hotkey = Hotkey::new(Modifiers::META, Key::L);
        keyboard.claim(hotkey);

        assert!(matches!(hook.register(hotkey), Err(HotkeyError::OsRejected { .. })));
        assert!(!keyboard.is_grabbed(hotkey));

        keyboard.unclaim(hotkey);
        let handle = hook.register(hotkey).unwrap();
        assert!(keyboard.is_grabbed(hotkey));
        hook.unregister(&handle).unwrap();
    }

    #[test]
    fn tokens_are_unique() {
        let (mut hook, _keyboard) = VirtualHook::new();
        let a = hook.register(Hotkey::bare(Key::A)).unwrap();
        let b = hook.register(Hotkey::bare(Key::B)).unwrap();
        assert_ne!(a.token(), b.token());
        hook.unregister(&a).unwrap();
        hook.unregister(&b).unwrap();
    }

    #[test]
    fn unregister_twice_fails() {
        let (mut hook, _keyboard) = VirtualHook::new();
        let handle = hook.register(Hotkey::bare(Key::Tab)).unwrap();
        hook.unregister(&handle).unwrap();
        assert!(hook.unregister(&handle).is_err());
    }

    #[test]
    fn presses_before_start_are_not_intercepted() {
        let (mut hook, keyboard) = VirtualHook::new();
        let hotkey = Hotkey::bare(Key::F3);
        let _handle = hook.register(hotkey).unwrap();
        assert!(!keyboard.press(hotkey), "no sink attached yet");
    }
}
