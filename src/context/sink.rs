//! Engine state shared between the context and its adapter's event
//! thread, and the sink through which adapters report key activity.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::buffer::TriggerBuffer;
use crate::adapter::RegistrationHandle;
use crate::config::Config;
use crate::hotkey::Hotkey;

/// Everything guarded by the engine lock.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) closed: bool,
    pub(crate) registrations: HashMap<Hotkey, RegistrationHandle>,
    /// Hotkeys whose OS binding is being created. The OS may already
    /// deliver them.
    pub(crate) registering: HashSet<Hotkey>,
    /// Hotkeys whose OS binding is being released. Their handle is out of
    /// `registrations` for the duration of the call.
    pub(crate) releasing: HashSet<Hotkey>,
    /// Registered hotkeys currently held down, for repeat coalescing.
    pub(crate) held: HashSet<Hotkey>,
    pub(crate) buffer: TriggerBuffer,
}

impl EngineState {
    /// Registered, or on its way out: what [`Context`](super::Context)
    /// reports as bound.
    pub(crate) fn is_bound(&self, hotkey: &Hotkey) -> bool {
        self.registrations.contains_key(hotkey) || self.releasing.contains(hotkey)
    }

    /// Whether a key event for `hotkey` belongs to this context. Includes
    /// bindings with an OS call in flight in either direction.
    fn intercepts(&self, hotkey: &Hotkey) -> bool {
        !self.closed && (self.is_bound(hotkey) || self.registering.contains(hotkey))
    }
}

#[derive(Debug)]
pub(crate) struct Engine {
    state: Mutex<EngineState>,
    coalesce_repeats: bool,
}

impl Engine {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            state: Mutex::new(EngineState {
                closed: false,
                registrations: HashMap::new(),
                registering: HashSet::new(),
                releasing: HashSet::new(),
                held: HashSet::new(),
                buffer: TriggerBuffer::new(config.max_pending, config.overflow),
            }),
            coalesce_repeats: config.coalesce_repeats,
        }
    }

    /// Acquire the engine lock.
    ///
    /// Critical sections never panic mid-update, so a poisoned lock still
    /// holds consistent state and is recovered rather than propagated.
    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Callback-side handle onto a context's engine.
///
/// Adapters translate native events into [`Hotkey`] values and report
/// them here. The sink matches them against the registration set under
/// the engine lock; it never calls back into the adapter, so it is safe
/// to use from an OS hook thread.
#[derive(Debug, Clone)]
pub struct TriggerSink {
    engine: Arc<Engine>,
}

impl TriggerSink {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Report a key-down of `hotkey`.
    ///
    /// Returns `true` if the hotkey is registered in this context, in
    /// which case the adapter should suppress the native event. An
    /// auto-repeat press of a held hotkey still returns `true` but is not
    /// recorded again when repeat coalescing is on.
    pub fn press(&self, hotkey: Hotkey) -> bool {
        let mut state = self.engine.lock();
        if !state.intercepts(&hotkey) {
            return false;
        }

        if self.engine.coalesce_repeats && !state.held.insert(hotkey) {
            tracing::trace!(hotkey = %hotkey, "repeat coalesced");
            return true;
        }

        if let Some(dropped) = state.buffer.push(hotkey) {
            tracing::warn!(
                dropped = %dropped,
                total_dropped = state.buffer.dropped(),
                "trigger buffer full, entry discarded"
            );
        }
        true
    }

    /// Report a key-up of `hotkey`.
    ///
    /// Returns `true` if the hotkey was held, i.e. its key-down was
    /// reported and matched.
    pub fn release(&self, hotkey: Hotkey) -> bool {
        let mut state = self.engine.lock();
        if state.closed {
            return false;
        }
        let was_held = state.held.remove(&hotkey);
        was_held || (!self.engine.coalesce_repeats && state.intercepts(&hotkey))
    }
}
