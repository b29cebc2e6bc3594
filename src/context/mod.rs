//! Hotkey context — registration set, trigger buffer and the platform
//! adapter that feeds it.
//!
//! Locking: the adapter mutex serialises register/unregister/shutdown;
//! the engine mutex guards the registration set, held keys and trigger
//! buffer. Order is always adapter, then engine. No OS call is made with
//! the engine lock held, since the adapter's event thread needs it to
//! deliver triggers. While a register or unregister call is in flight the
//! hotkey stays intercepted, so presses the OS delivers meanwhile are
//! recorded.

mod buffer;
mod sink;

pub use sink::TriggerSink;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::adapter::{self, HookAdapter, RegistrationHandle};
use crate::config::Config;
use crate::error::HotkeyError;
use crate::hotkey::Hotkey;

use sink::Engine;

/// Snapshot of a context's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    /// Hotkeys currently registered.
    pub registered: usize,
    /// Triggers waiting for the next poll.
    pub pending: usize,
    /// Triggers discarded by the overflow policy since init.
    pub dropped: u64,
}

/// A set of global hotkey registrations and their pending triggers.
///
/// Each context owns its own adapter and OS resources. All methods take
/// `&self`; a context can be shared across threads behind an `Arc`.
pub struct Context {
    engine: Arc<Engine>,
    adapter: Mutex<Box<dyn HookAdapter>>,
    adapter_name: &'static str,
}

impl Context {
    /// Create a context on the platform's default adapter.
    pub fn init() -> Result<Self, HotkeyError> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self, HotkeyError> {
        Self::with_adapter(adapter::platform_default()?, config)
    }

    /// Create a context on a specific adapter and start it.
    pub fn with_adapter(
        mut adapter: Box<dyn HookAdapter>,
        config: Config,
    ) -> Result<Self, HotkeyError> {
        let engine = Arc::new(Engine::new(&config));
        let adapter_name = adapter.name();

        adapter
            .start(TriggerSink::new(Arc::clone(&engine)))
            .map_err(|e| match e {
                HotkeyError::HookUnavailable(_) => e,
                other => HotkeyError::HookUnavailable(other.to_string()),
            })?;

        tracing::info!(
            adapter = adapter_name,
            max_pending = config.max_pending,
            overflow = ?config.overflow,
            coalesce_repeats = config.coalesce_repeats,
            "hotkey context started"
        );

        Ok(Self {
            engine,
            adapter: Mutex::new(adapter),
            adapter_name,
        })
    }

    /// Name of the adapter backing this context.
    pub fn adapter_name(&self) -> &'static str {
        self.adapter_name
    }

    fn lock_adapter(&self) -> MutexGuard<'_, Box<dyn HookAdapter>> {
        self.adapter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `hotkey` at the OS level.
    ///
    /// Registering a hotkey that is already bound in this context fails
    /// with [`HotkeyError::DuplicateRegistration`] and changes nothing.
    pub fn register(&self, hotkey: Hotkey) -> Result<(), HotkeyError> {
        let mut adapter = self.lock_adapter();

        {
            let mut state = self.engine.lock();
            if state.closed {
                return Err(HotkeyError::InvalidHandle);
            }
            if state.is_bound(&hotkey) {
                return Err(HotkeyError::DuplicateRegistration(hotkey));
            }
            // Presses delivered while the OS call runs are recorded.
            state.registering.insert(hotkey);
        }

        let result = adapter.register(hotkey);

        let mut state = self.engine.lock();
        state.registering.remove(&hotkey);
        match result {
            Ok(handle) => {
                state.registrations.insert(hotkey, handle);
                tracing::debug!(hotkey = %hotkey, adapter = self.adapter_name, "registered");
                Ok(())
            }
            Err(e) => {
                state.held.remove(&hotkey);
                tracing::warn!(hotkey = %hotkey, error = %e, "register failed");
                Err(e)
            }
        }
    }

    /// Release `hotkey`'s OS binding.
    ///
    /// If the OS call fails the registration is kept and the error is
    /// returned; the caller may retry.
    pub fn unregister(&self, hotkey: Hotkey) -> Result<(), HotkeyError> {
        let mut adapter = self.lock_adapter();

        // Take the handle out so the OS call runs without the engine lock.
        // `releasing` keeps the hotkey intercepted until the call returns.
        let handle: RegistrationHandle = {
            let mut state = self.engine.lock();
            if state.closed {
                return Err(HotkeyError::InvalidHandle);
            }
            let handle = state
                .registrations
                .remove(&hotkey)
                .ok_or(HotkeyError::NotRegistered(hotkey))?;
            state.releasing.insert(hotkey);
            handle
        };

        let result = adapter.unregister(&handle);

        let mut state = self.engine.lock();
        state.releasing.remove(&hotkey);
        match result {
            Ok(()) => {
                state.held.remove(&hotkey);
                tracing::debug!(hotkey = %hotkey, adapter = self.adapter_name, "unregistered");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(hotkey = %hotkey, error = %e, "unregister failed, keeping registration");
                state.registrations.insert(hotkey, handle);
                Err(e)
            }
        }
    }

    /// Drain every trigger recorded since the last poll, oldest first.
    ///
    /// Never blocks waiting for events.
    pub fn poll(&self) -> Result<Vec<Hotkey>, HotkeyError> {
        let mut state = self.engine.lock();
        if state.closed {
            return Err(HotkeyError::InvalidHandle);
        }
        Ok(state.buffer.drain())
    }

    pub fn is_registered(&self, hotkey: Hotkey) -> bool {
        let state = self.engine.lock();
        !state.closed && state.is_bound(&hotkey)
    }

    /// Currently registered hotkeys, sorted.
    pub fn registered(&self) -> Vec<Hotkey> {
        let state = self.engine.lock();
        let mut hotkeys: Vec<Hotkey> = state
            .registrations
            .keys()
            .chain(&state.releasing)
            .copied()
            .collect();
        hotkeys.sort();
        hotkeys
    }

    pub fn stats(&self) -> ContextStats {
        let state = self.engine.lock();
        ContextStats {
            registered: state.registrations.len() + state.releasing.len(),
            pending: state.buffer.len(),
            dropped: state.buffer.dropped(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.engine.lock().closed
    }

    /// Unregister everything, stop the adapter and invalidate the context.
    ///
    /// Returns once the adapter's event thread has finished. Further
    /// calls are no-ops.
    pub fn shutdown(&self) {
        let mut adapter = self.lock_adapter();

        let handles: Vec<RegistrationHandle> = {
            let mut state = self.engine.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.registrations.drain().map(|(_, handle)| handle).collect()
        };

        for handle in &handles {
            if let Err(e) = adapter.unregister(handle) {
                tracing::warn!(
                    hotkey = %handle.hotkey(),
                    error = %e,
                    "unregister during shutdown failed"
                );
            }
        }

        adapter.stop();

        {
            let mut state = self.engine.lock();
            state.buffer.clear();
            state.held.clear();
        }

        tracing::info!(
            adapter = self.adapter_name,
            released = handles.len(),
            "hotkey context shut down"
        );
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("adapter", &self.adapter_name)
            .field("stats", &self.stats())
            .field("closed", &self.is_shut_down())
            .finish()
    }
}
