//! System-wide hotkeys that fire regardless of which application has focus.
//!
//! A [`Context`] owns a set of registered [`Hotkey`]s and the platform hook
//! that watches for them. The hook runs on its own thread and records
//! triggers into a bounded buffer; [`Context::poll`] drains that buffer in
//! trigger order. Only registered combinations are consumed; every other
//! keystroke reaches the focused application untouched.
//!
//! ```no_run
//! use system_hotkey::{Context, Hotkey, Key, Modifiers};
//!
//! let ctx = Context::init()?;
//! ctx.register(Hotkey::new(Modifiers::ALT, Key::Space))?;
//! for hotkey in ctx.poll()? {
//!     println!("triggered {hotkey}");
//! }
//! ctx.shutdown();
//! # Ok::<(), system_hotkey::HotkeyError>(())
//! ```
//!
//! Adapters: X11 key grabs on Linux, `RegisterHotKey` on Windows, and an
//! active event tap on macOS. [`adapter::VirtualHook`] drives a context
//! from synthetic key events. The [`ffi`] module exposes the same
//! operations over a C ABI.

pub mod adapter;
pub mod config;
mod context;
pub mod error;
pub mod ffi;
pub mod hotkey;

pub use config::{Config, OverflowPolicy};
pub use context::{Context, ContextStats, TriggerSink};
pub use error::{ConfigError, HotkeyError};
pub use hotkey::{Hotkey, Key, Modifiers};
