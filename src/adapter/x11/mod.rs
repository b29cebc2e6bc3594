//! X11 adapter — connection, key grabs and the event thread.
//!
//! Each hook owns its own `RustConnection`. Hotkeys are bound with
//! `XGrabKey` on the root window, which also keeps them from reaching
//! other clients. A dedicated thread polls the connection and reports
//! key presses and releases to the context's sink.
//!
//! The keymap is reloaded on `MappingNotify`. Grabs already in place keep
//! the keycode they were made with; re-register a hotkey to follow a
//! remap of its key.

mod keymap;

use std::collections::HashMap;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xkb::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{self, GrabMode, Keycode, Mapping, ModMask, Window};
use x11rb::rust_connection::RustConnection;

use self::keymap::{Keymap, grab_mask, modifiers_from_state};
use super::{HookAdapter, RegistrationHandle};
use crate::context::TriggerSink;
use crate::error::HotkeyError;
use crate::hotkey::Hotkey;

/// Lock modifier bits to mask during XGrabKey registration.
///
/// NumLock = Mod2 (bit 4), CapsLock = Lock (bit 1).
/// Each grab is registered 4 times with all combinations of these bits
/// so hotkeys fire regardless of lock state.
const LOCK_MASK: u16 = 0x0002; // LockMask (CapsLock)
const NUM_LOCK_MASK: u16 = 0x0010; // Mod2Mask (NumLock)
const LOCK_MASKS: [u16; 4] = [0, LOCK_MASK, NUM_LOCK_MASK, LOCK_MASK | NUM_LOCK_MASK];

/// Poll timeout between stop-flag checks.
const POLL_INTERVAL_MS: u16 = 100;

/// One grab as encoded in a registration token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Grab {
    keycode: Keycode,
    mask: u16,
}

impl Grab {
    fn token(self) -> u64 {
        (u64::from(self.mask) << 8) | u64::from(self.keycode)
    }

    fn from_token(token: u64) -> Self {
        Self {
            keycode: (token & 0xff) as Keycode,
            mask: (token >> 8) as u16,
        }
    }
}

type SharedKeymap = Arc<RwLock<Keymap>>;

/// Query the server's keyboard mapping.
fn load_keymap(conn: &RustConnection) -> Result<Keymap, String> {
    let setup = conn.setup();
    let min_keycode = setup.min_keycode;
    let count = setup.max_keycode - min_keycode + 1;

    let mapping = xproto::get_keyboard_mapping(conn, min_keycode, count)
        .map_err(|e| format!("get_keyboard_mapping: {e}"))?
        .reply()
        .map_err(|e| format!("get_keyboard_mapping reply: {e}"))?;

    Ok(Keymap::from_mapping(
        min_keycode,
        mapping.keysyms_per_keycode,
        &mapping.keysyms,
    ))
}

/// Ask the server to report auto-repeat as repeated presses only.
///
/// Returns `false` if XKB or the per-client flag is unsupported, in which
/// case the server keeps sending synthetic release/press pairs.
fn enable_detectable_auto_repeat(conn: &RustConnection) -> Result<bool, String> {
    let supported = conn
        .xkb_use_extension(1, 0)
        .map_err(|e| format!("xkb_use_extension: {e}"))?
        .reply()
        .map_err(|e| format!("xkb_use_extension reply: {e}"))?
        .supported;
    if !supported {
        return Ok(false);
    }

    let flag = xkb::PerClientFlag::DETECTABLE_AUTO_REPEAT;
    let reply = conn
        .xkb_per_client_flags(
            xkb::ID::USE_CORE_KBD.into(),
            flag,
            flag,
            0u32.into(),
            0u32.into(),
            0u32.into(),
        )
        .map_err(|e| format!("xkb_per_client_flags: {e}"))?
        .reply()
        .map_err(|e| format!("xkb_per_client_flags reply: {e}"))?;

    Ok(u32::from(reply.value) & u32::from(flag) != 0)
}

/// X11 hotkey hook.
pub struct X11Hook {
    conn: Arc<RustConnection>,
    root: Window,
    keymap: SharedKeymap,
    detectable_repeat: bool,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl X11Hook {
    /// Connect to the X11 display and load the keyboard mapping.
    pub fn connect() -> Result<Self, HotkeyError> {
        let (conn, screen_num) = RustConnection::connect(None)
            .map_err(|e| HotkeyError::HookUnavailable(format!("X11 connect failed: {e}")))?;

        let root = conn.setup().roots[screen_num].root;
        let keymap = load_keymap(&conn).map_err(HotkeyError::HookUnavailable)?;
        tracing::debug!(screen = screen_num, mapped_keys = keymap.len(), "X11 keymap loaded");

        let detectable_repeat = enable_detectable_auto_repeat(&conn).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "XKB detectable auto-repeat request failed");
            false
        });
        if !detectable_repeat {
            tracing::debug!("detectable auto-repeat unavailable, filtering repeat releases");
        }

        Ok(Self {
            conn: Arc::new(conn),
            root,
            keymap: Arc::new(RwLock::new(keymap)),
            detectable_repeat,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    /// Release all 4 lock-mask variants of a grab.
    ///
    /// Returns the first error, after attempting every variant.
    fn ungrab(&self, grab: Grab) -> Result<(), String> {
        let mut first_error = None;

        for &lock_mask in &LOCK_MASKS {
            let mods = ModMask::from(grab.mask | lock_mask);
            let result = xproto::ungrab_key(&*self.conn, grab.keycode, self.root, mods)
                .map_err(|e| format!("ungrab_key send: {e}"))
                .and_then(|cookie| cookie.check().map_err(|e| format!("ungrab_key: {e}")));

            if let Err(e) = result {
                tracing::debug!(keycode = grab.keycode, lock_mask, error = %e, "XUngrabKey failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl HookAdapter for X11Hook {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn start(&mut self, sink: TriggerSink) -> Result<(), HotkeyError> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::SeqCst);
        let dispatcher = Dispatcher {
            keymap: Arc::clone(&self.keymap),
            sink,
            down: HashMap::new(),
        };
        let handle = spawn_event_thread(
            Arc::clone(&self.conn),
            dispatcher,
            RepeatFilter::new(!self.detectable_repeat),
            Arc::clone(&self.stop),
        )?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Register a global key grab on the root window.
    ///
    /// Registers 4 grabs per hotkey (with/without NumLock/CapsLock). If
    /// any variant is refused (another client holds it), the variants
    /// already taken are released again.
    fn register(&mut self, hotkey: Hotkey) -> Result<RegistrationHandle, HotkeyError> {
        let keycode = self
            .keymap
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keycode(hotkey.key)
            .ok_or_else(|| HotkeyError::rejected(hotkey, "no keycode for key in current keymap"))?;
        let grab = Grab {
            keycode,
            mask: grab_mask(hotkey.modifiers),
        };

        for &lock_mask in &LOCK_MASKS {
            let mods = ModMask::from(grab.mask | lock_mask);

            let result = xproto::grab_key(
                &*self.conn,
                true, // owner_events
                self.root,
                mods,
                grab.keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )
            .map_err(|e| format!("grab_key send: {e}"))
            // Check for error reply (grab conflict).
            .and_then(|cookie| cookie.check().map_err(|e| format!("XGrabKey: {e}")));

            if let Err(e) = result {
                tracing::warn!(
                    hotkey = %hotkey,
                    lock_mask,
                    error = %e,
                    "grab failed; combination may be held by another client"
                );
                // Ungrab only touches this client's grabs.
                let _ = self.ungrab(grab);
                return Err(HotkeyError::rejected(hotkey, e));
            }
        }

        Ok(RegistrationHandle::new(hotkey, grab.token()))
    }

    fn unregister(&mut self, handle: &RegistrationHandle) -> Result<(), HotkeyError> {
        self.ungrab(Grab::from_token(handle.token()))
            .map_err(|e| HotkeyError::rejected(handle.hotkey(), e))
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("x11 event thread panicked");
            }
        }
        if let Err(e) = self.conn.flush() {
            tracing::debug!(error = %e, "flush after stop failed");
        }
    }
}

impl Drop for X11Hook {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Key event reduced to what hotkey matching needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawKey {
    pressed: bool,
    keycode: Keycode,
    state: u16,
    time: u32,
}

impl RawKey {
    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::KeyPress(ev) => Some(Self {
                pressed: true,
                keycode: ev.detail,
                state: u16::from(ev.state),
                time: ev.time,
            }),
            Event::KeyRelease(ev) => Some(Self {
                pressed: false,
                keycode: ev.detail,
                state: u16::from(ev.state),
                time: ev.time,
            }),
            _ => None,
        }
    }
}

/// Drops the release half of auto-repeat pairs.
///
/// Without detectable auto-repeat the server sends KeyRelease followed
/// by KeyPress with the same keycode and timestamp for every repeat.
/// Dropping the release keeps the hotkey held so the context coalesces
/// the press. A release that ends a batch is held back until the next
/// batch shows whether its press follows, or until [`flush`] on a quiet
/// poll.
///
/// [`flush`]: RepeatFilter::flush
#[derive(Debug, Default)]
struct RepeatFilter {
    enabled: bool,
    trailing_release: Option<RawKey>,
}

impl RepeatFilter {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            trailing_release: None,
        }
    }

    fn apply(&mut self, events: &[RawKey]) -> Vec<RawKey> {
        if !self.enabled {
            return events.to_vec();
        }

        let mut kept = Vec::with_capacity(events.len() + 1);
        let mut pending = self
            .trailing_release
            .take()
            .into_iter()
            .chain(events.iter().copied())
            .peekable();

        while let Some(event) = pending.next() {
            if !event.pressed {
                match pending.peek() {
                    Some(next)
                        if next.pressed && next.keycode == event.keycode && next.time == event.time =>
                    {
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        self.trailing_release = Some(event);
                        break;
                    }
                }
            }
            kept.push(event);
        }
        kept
    }

    /// Release held back from the previous batch, if any.
    fn flush(&mut self) -> Option<RawKey> {
        self.trailing_release.take()
    }
}

fn reload_keymap(conn: &RustConnection, keymap: &SharedKeymap) {
    match load_keymap(conn) {
        Ok(fresh) => {
            tracing::debug!(mapped_keys = fresh.len(), "X11 keymap reloaded");
            *keymap.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        }
        Err(e) => tracing::warn!(error = %e, "keymap reload failed"),
    }
}

fn keymap_changed(event: &Event) -> bool {
    matches!(event, Event::MappingNotify(ev) if ev.request == Mapping::KEYBOARD)
}

/// Per-thread state that turns raw key events into sink calls.
struct Dispatcher {
    keymap: SharedKeymap,
    sink: TriggerSink,
    /// Hotkey reported for each keycode currently down. Releases are
    /// matched by keycode since modifiers may be let go first.
    down: HashMap<Keycode, Hotkey>,
}

impl Dispatcher {
    fn dispatch(&mut self, event: RawKey) {
        if event.pressed {
            let key = self
                .keymap
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .key(event.keycode);
            let Some(key) = key else {
                return;
            };
            let hotkey = Hotkey::new(modifiers_from_state(event.state), key);
            if self.sink.press(hotkey) {
                self.down.insert(event.keycode, hotkey);
            }
        } else if let Some(hotkey) = self.down.remove(&event.keycode) {
            self.sink.release(hotkey);
        }
    }
}

/// Spawn a dedicated thread that polls the X11 connection for events.
///
/// Uses `nix::poll()` on the X11 connection fd with a 100ms timeout.
/// When readable, drains all available events via `poll_for_event()`.
/// Checks the `stop` flag each iteration for clean shutdown.
fn spawn_event_thread(
    conn: Arc<RustConnection>,
    mut dispatcher: Dispatcher,
    mut repeats: RepeatFilter,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, HotkeyError> {
    std::thread::Builder::new()
        .name("x11-hotkeys".into())
        .spawn(move || {
            let raw_fd = conn.stream().as_raw_fd();
            let mut batch = Vec::new();

            while !stop.load(Ordering::Relaxed) {
                // SAFETY: raw_fd is the X11 connection fd, valid while conn is alive.
                let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
                let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];

                match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                    Ok(0) => {
                        // Quiet: a held-back release was a real one.
                        if let Some(release) = repeats.flush() {
                            dispatcher.dispatch(release);
                        }
                    }
                    Ok(_) => {
                        // Drain all available events. A keymap reload waits for a
                        // reply, and events read meanwhile are only queued in
                        // the connection, so drain again after it.
                        loop {
                            let mut remapped = false;
                            loop {
                                match conn.poll_for_event() {
                                    Ok(Some(event)) => {
                                        remapped |= keymap_changed(&event);
                                        batch.extend(RawKey::from_event(&event));
                                    }
                                    Ok(None) => break,
                                    Err(e) => {
                                        tracing::error!(error = %e, "X11 connection error");
                                        return;
                                    }
                                }
                            }
                            if !remapped {
                                break;
                            }
                            reload_keymap(&conn, &dispatcher.keymap);
                        }

                        let mut events = repeats.apply(&batch);
                        if batch.is_empty() {
                            events.extend(repeats.flush());
                        }
                        for event in events {
                            dispatcher.dispatch(event);
                        }
                        batch.clear();
                    }
                    Err(nix::Error::EINTR) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "poll error on X11 fd");
                        return;
                    }
                }
            }
        })
        .map_err(|e| HotkeyError::HookUnavailable(format!("spawn x11 event thread: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(keycode: Keycode, time: u32) -> RawKey {
        RawKey {
            pressed: true,
            keycode,
            state: 0x0004,
            time,
        }
    }

    fn release(keycode: Keycode, time: u32) -> RawKey {
        RawKey {
            pressed: false,
            ..press(keycode, time)
        }
    }

    #[test]
    fn grab_token_round_trip() {
        let grab = Grab {
            keycode: 0xfe,
            mask: 0x004d,
        };
        assert_eq!(Grab::from_token(grab.token()), grab);
    }

    fn filter(events: &[RawKey]) -> Vec<RawKey> {
        let mut repeats = RepeatFilter::new(true);
        let mut kept = repeats.apply(events);
        kept.extend(repeats.flush());
        kept
    }

    #[test]
    fn repeat_release_is_stripped() {
        let events = [
            press(38, 100),
            release(38, 130),
            press(38, 130),
            release(38, 160),
            press(38, 160),
            release(38, 400),
        ];
        assert_eq!(
            filter(&events),
            vec![press(38, 100), press(38, 130), press(38, 160), release(38, 400)]
        );
    }

    #[test]
    fn distinct_presses_are_kept() {
        // Same timestamp but different key: not a repeat.
        let events = [press(38, 100), release(38, 200), press(39, 200)];
        assert_eq!(filter(&events), events.to_vec());
    }

    #[test]
    fn repeat_pair_split_across_batches_is_stripped() {
        let mut repeats = RepeatFilter::new(true);

        assert_eq!(repeats.apply(&[press(38, 100), release(38, 130)]), vec![press(38, 100)]);
        assert_eq!(repeats.apply(&[press(38, 130)]), vec![press(38, 130)]);
        assert_eq!(repeats.flush(), None);
    }

    #[test]
    fn trailing_release_is_held_until_flush() {
        let mut repeats = RepeatFilter::new(true);

        assert_eq!(repeats.apply(&[press(10, 1), release(10, 5)]), vec![press(10, 1)]);
        assert_eq!(repeats.flush(), Some(release(10, 5)));
        assert_eq!(repeats.flush(), None);
    }

    #[test]
    fn held_release_followed_by_other_key_is_kept() {
        let mut repeats = RepeatFilter::new(true);

        repeats.apply(&[press(10, 1), release(10, 5)]);
        assert_eq!(repeats.apply(&[press(11, 9)]), vec![release(10, 5), press(11, 9)]);
    }

    #[test]
    fn disabled_filter_passes_everything_through() {
        let mut repeats = RepeatFilter::new(false);
        let events = [press(38, 100), release(38, 130), press(38, 130), release(38, 160)];

        assert_eq!(repeats.apply(&events), events.to_vec());
        assert_eq!(repeats.flush(), None);
    }

    fn mapping_notify(request: Mapping) -> Event {
        Event::MappingNotify(xproto::MappingNotifyEvent {
            response_type: xproto::MAPPING_NOTIFY_EVENT,
            sequence: 0,
            request,
            first_keycode: 8,
            count: 248,
        })
    }

    #[test]
    fn keyboard_mapping_change_triggers_reload() {
        assert!(keymap_changed(&mapping_notify(Mapping::KEYBOARD)));
        assert!(!keymap_changed(&mapping_notify(Mapping::MODIFIER)));
        assert!(!keymap_changed(&mapping_notify(Mapping::POINTER)));
    }
}
