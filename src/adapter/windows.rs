//! Win32 adapter — `RegisterHotKey` on a dedicated message-loop thread.
//!
//! Hotkeys registered with a null window are posted as `WM_HOTKEY` to the
//! registering thread's queue, and can only be unregistered from that
//! thread. The hook therefore owns one thread per context; register and
//! unregister are sent to it as commands and answered over a channel.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    HOT_KEY_MODIFIERS, MOD_ALT, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT, MOD_WIN, RegisterHotKey,
    UnregisterHotKey,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetMessageW, MSG, PM_NOREMOVE, PeekMessageW, PostThreadMessageW, WM_APP, WM_HOTKEY, WM_QUIT,
};

use super::{HookAdapter, RegistrationHandle};
use crate::context::TriggerSink;
use crate::error::HotkeyError;
use crate::hotkey::{Hotkey, Key, Modifiers};

/// Posted to wake the message thread when commands are queued.
const WM_HOTKEY_COMMAND: u32 = WM_APP + 1;

/// How long a caller waits for the message thread to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

type Reply = Sender<Result<(), String>>;

enum Command {
    Register {
        id: i32,
        modifiers: HOT_KEY_MODIFIERS,
        vk: u32,
        reply: Reply,
    },
    Unregister {
        id: i32,
        reply: Reply,
    },
}

/// Why a command round trip did not succeed.
#[derive(Debug, PartialEq, Eq)]
enum CallError {
    /// No message thread to run it.
    Unavailable(String),
    /// The OS call ran and failed.
    Os(String),
    /// No answer in time. The command may still run later.
    TimedOut,
}

impl CallError {
    fn into_hotkey_error(self, hotkey: Hotkey) -> HotkeyError {
        match self {
            Self::Unavailable(reason) | Self::Os(reason) => HotkeyError::rejected(hotkey, reason),
            Self::TimedOut => HotkeyError::rejected(hotkey, "message thread did not answer"),
        }
    }
}

/// Queue an unregister behind a register whose answer never came.
///
/// Commands run in order, so it executes after the register and releases
/// the binding if the register did succeed late. Nobody waits for its
/// answer.
fn withdraw_late_register(commands: &Sender<Command>, id: i32) -> bool {
    let (reply, _) = mpsc::channel();
    commands.send(Command::Unregister { id, reply }).is_ok()
}

/// `WM_HOTKEY` id for a hotkey: `((modifiers << 8) | key) + 1`.
///
/// Always within the 0x0000–0xBFFF range reserved for applications.
fn hotkey_id(hotkey: Hotkey) -> i32 {
    let (modifiers, key) = hotkey.to_raw();
    ((modifiers << 8) | key) as i32 + 1
}

fn hotkey_from_id(id: i32) -> Option<Hotkey> {
    let raw = u32::try_from(id.checked_sub(1)?).ok()?;
    Hotkey::from_raw(raw >> 8, raw & 0xff).ok()
}

fn native_modifiers(modifiers: Modifiers) -> HOT_KEY_MODIFIERS {
    // Auto-repeat never produces WM_HOTKEY.
    let mut native = MOD_NOREPEAT;
    if modifiers.contains(Modifiers::ALT) {
        native = native | MOD_ALT;
    }
    if modifiers.contains(Modifiers::CTRL) {
        native = native | MOD_CONTROL;
    }
    if modifiers.contains(Modifiers::SHIFT) {
        native = native | MOD_SHIFT;
    }
    if modifiers.contains(Modifiers::META) {
        native = native | MOD_WIN;
    }
    native
}

/// Virtual-key code for each neutral key, indexed by key code.
const VIRTUAL_KEYS: [u32; 56] = [
    0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A, 0x4B, 0x4C, 0x4D, // VK_A..
    0x4E, 0x4F, 0x50, 0x51, 0x52, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, // ..VK_Z
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, // VK_0..VK_9
    0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A, 0x7B, // VK_F1..VK_F12
    0x26, 0x28, 0x25, 0x27, // VK_UP VK_DOWN VK_LEFT VK_RIGHT
    0x20, 0x0D, 0x1B, 0x09, // VK_SPACE VK_RETURN VK_ESCAPE VK_TAB
];

const _: () = assert!(VIRTUAL_KEYS.len() == Key::ALL.len());

fn virtual_key(key: Key) -> u32 {
    VIRTUAL_KEYS[key.code() as usize]
}

/// Win32 hotkey hook.
#[derive(Default)]
pub struct Win32Hook {
    thread_id: u32,
    commands: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl Win32Hook {
    pub fn new() -> Self {
        Self::default()
    }

    fn commands(&self) -> Result<&Sender<Command>, CallError> {
        self.commands
            .as_ref()
            .ok_or_else(|| CallError::Unavailable("hook is not running".into()))
    }

    /// Wake the message thread to drain queued commands.
    fn wake(&self) -> Result<(), CallError> {
        // SAFETY: posting to a thread id we created; no pointers are passed.
        unsafe { PostThreadMessageW(self.thread_id, WM_HOTKEY_COMMAND, WPARAM(0), LPARAM(0)) }
            .map_err(|e| CallError::Unavailable(format!("PostThreadMessageW: {e}")))
    }

    /// Run a command on the message thread and wait for its answer.
    fn call(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), CallError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands()?
            .send(command(reply_tx))
            .map_err(|_| CallError::Unavailable("message thread exited".into()))?;
        self.wake()?;

        match reply_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(result) => result.map_err(CallError::Os),
            Err(_) => Err(CallError::TimedOut),
        }
    }
}

impl HookAdapter for Win32Hook {
    fn name(&self) -> &'static str {
        "win32"
    }

    fn start(&mut self, sink: TriggerSink) -> Result<(), HotkeyError> {
        if self.thread.is_some() {
            return Ok(());
        }

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("win32-hotkeys".into())
            .spawn(move || {
                let mut msg = MSG::default();
                // SAFETY: PeekMessageW forces this thread's message queue into
                // existence so PostThreadMessageW cannot race its creation.
                unsafe {
                    let _ = PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_NOREMOVE);
                }
                // SAFETY: no preconditions.
                let thread_id = unsafe { GetCurrentThreadId() };
                if ready_tx.send(thread_id).is_err() {
                    return;
                }
                run_message_loop(&command_rx, &sink);
            })
            .map_err(|e| HotkeyError::HookUnavailable(format!("spawn message thread: {e}")))?;

        self.thread_id = ready_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| HotkeyError::HookUnavailable("message thread did not start".into()))?;
        self.commands = Some(command_tx);
        self.thread = Some(handle);

        tracing::debug!(thread_id = self.thread_id, "win32 message thread started");
        Ok(())
    }

    fn register(&mut self, hotkey: Hotkey) -> Result<RegistrationHandle, HotkeyError> {
        let id = hotkey_id(hotkey);
        let modifiers = native_modifiers(hotkey.modifiers);
        let vk = virtual_key(hotkey.key);

        let result = self.call(|reply| Command::Register {
            id,
            modifiers,
            vk,
            reply,
        });

        if result == Err(CallError::TimedOut) {
            tracing::warn!(hotkey = %hotkey, "register timed out, withdrawing it");
            let queued = self
                .commands()
                .is_ok_and(|commands| withdraw_late_register(commands, id));
            if queued {
                if let Err(e) = self.wake() {
                    tracing::warn!(hotkey = %hotkey, error = ?e, "failed to wake message thread");
                }
            }
        }

        result.map_err(|e| e.into_hotkey_error(hotkey))?;
        Ok(RegistrationHandle::new(hotkey, id as u64))
    }

    fn unregister(&mut self, handle: &RegistrationHandle) -> Result<(), HotkeyError> {
        let id = handle.token() as i32;
        self.call(|reply| Command::Unregister { id, reply })
            .map_err(|e| e.into_hotkey_error(handle.hotkey()))
    }

    fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.commands = None;

        // SAFETY: posting to a thread id we created; no pointers are passed.
        if let Err(e) = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) } {
            tracing::error!(error = %e, "failed to post WM_QUIT to message thread");
            return;
        }
        if handle.join().is_err() {
            tracing::error!("win32 message thread panicked");
        }
    }
}

impl Drop for Win32Hook {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_message_loop(commands: &Receiver<Command>, sink: &TriggerSink) {
    let mut msg = MSG::default();
    loop {
        // SAFETY: msg is a valid out-pointer; a null window selects
        // thread messages as well.
        let status = unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) };
        match status.0 {
            0 => break, // WM_QUIT
            -1 => {
                tracing::error!("GetMessageW failed; stopping message thread");
                break;
            }
            _ => {}
        }

        match msg.message {
            WM_HOTKEY => {
                let id = msg.wParam.0 as i32;
                match hotkey_from_id(id) {
                    // MOD_NOREPEAT: one message per physical press.
                    Some(hotkey) => {
                        if sink.press(hotkey) {
                            sink.release(hotkey);
                        }
                    }
                    None => tracing::debug!(id, "WM_HOTKEY with unknown id"),
                }
            }
            WM_HOTKEY_COMMAND => {
                while let Ok(command) = commands.try_recv() {
                    execute(command);
                }
            }
            _ => {}
        }
    }
}

fn execute(command: Command) {
    match command {
        Command::Register {
            id,
            modifiers,
            vk,
            reply,
        } => {
            // SAFETY: plain OS call on the thread that will receive WM_HOTKEY.
            let result = unsafe { RegisterHotKey(HWND::default(), id, modifiers, vk) }
                .map_err(|e| format!("RegisterHotKey: {e}"));
            let _ = reply.send(result);
        }
        Command::Unregister { id, reply } => {
            // SAFETY: called on the thread that registered `id`.
            let result = unsafe { UnregisterHotKey(HWND::default(), id) }
                .map_err(|e| format!("UnregisterHotKey: {e}"));
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotkey_id_round_trip_and_range() {
        for bits in 0..=0xF {
            for &key in Key::ALL {
                let hotkey = Hotkey::new(Modifiers::from_bits(bits).unwrap(), key);
                let id = hotkey_id(hotkey);
                assert!((1..0xC000).contains(&id));
                assert_eq!(hotkey_from_id(id), Some(hotkey));
            }
        }
    }

    #[test]
    fn late_register_is_withdrawn_in_order() {
        let (commands, queue) = mpsc::channel();
        let id = hotkey_id(Hotkey::new(Modifiers::CTRL, Key::K));

        let (reply, _) = mpsc::channel();
        commands
            .send(Command::Register {
                id,
                modifiers: native_modifiers(Modifiers::CTRL),
                vk: virtual_key(Key::K),
                reply,
            })
            .unwrap();
        assert!(withdraw_late_register(&commands, id));

        assert!(matches!(queue.try_recv(), Ok(Command::Register { id: r, .. }) if r == id));
        assert!(matches!(queue.try_recv(), Ok(Command::Unregister { id: u, .. }) if u == id));
        assert!(queue.try_recv().is_err());
    }

    #[test]
    fn withdraw_fails_once_thread_is_gone() {
        let (commands, queue) = mpsc::channel();
        drop(queue);
        assert!(!withdraw_late_register(&commands, 1));
    }

    #[test]
    fn timeout_maps_to_rejection() {
        let hotkey = Hotkey::bare(Key::F9);
        assert!(matches!(
            CallError::TimedOut.into_hotkey_error(hotkey),
            HotkeyError::OsRejected { hotkey: h, .. } if h == hotkey
        ));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        assert_eq!(hotkey_from_id(0), None);
        assert_eq!(hotkey_from_id(-5), None);
        assert_eq!(hotkey_from_id((0x10 << 8) + 1), None);
    }

    #[test]
    fn virtual_keys() {
        assert_eq!(virtual_key(Key::A), 0x41);
        assert_eq!(virtual_key(Key::Z), 0x5A);
        assert_eq!(virtual_key(Key::Num9), 0x39);
        assert_eq!(virtual_key(Key::F12), 0x7B);
        assert_eq!(virtual_key(Key::Enter), 0x0D);
        assert_eq!(virtual_key(Key::Up), 0x26);
        assert_eq!(virtual_key(Key::Right), 0x27);
        assert_eq!(virtual_key(Key::Tab), 0x09);
    }

    #[test]
    fn modifiers_always_suppress_repeat() {
        assert_eq!(native_modifiers(Modifiers::NONE), MOD_NOREPEAT);
        assert_eq!(
            native_modifiers(Modifiers::CTRL | Modifiers::META),
            MOD_NOREPEAT | MOD_CONTROL | MOD_WIN
        );
    }
}
