//! Listener registry: event name → ordered callbacks.
//!
//! Each [`Session`](crate::session::Session) owns one registry. Callbacks
//! are compared by identity ([`Arc::ptr_eq`]), so the same callback may be
//! registered several times and fires once per registration.
//!
//! [`ListenerRegistry::emit`] snapshots the callback list under a short lock
//! and invokes the callbacks outside it, so listeners may register or remove
//! listeners (including themselves) while being dispatched.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Shared callback invoked with an event payload.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle identifying one `(name, callback)` registration.
#[derive(Clone)]
pub struct Subscription {
    name: String,
    listener: Listener,
}

impl Subscription {
    /// Event name the callback is registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registered callback.
    #[must_use]
    pub fn listener(&self) -> &Listener {
        &self.listener
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Mapping from event name to the callbacks subscribed to it.
pub struct ListenerRegistry {
    table: Mutex<HashMap<String, Vec<Listener>>>,
    warn_unregistered: bool,
}

impl ListenerRegistry {
    /// Create an empty registry.
    ///
    /// With `warn_unregistered` set, emitting a name that was never
    /// registered logs a warning.
    #[must_use]
    pub fn new(warn_unregistered: bool) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            warn_unregistered,
        }
    }

    /// Register `callback` for `name`.
    pub fn on<F>(&self, name: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add(name, Arc::new(callback))
    }

    /// Register an already shared callback for `name`.
    pub fn add(&self, name: impl Into<String>, listener: Listener) -> Subscription {
        let name = name.into();
        self.lock()
            .entry(name.clone())
            .or_default()
            .push(Arc::clone(&listener));
        debug!(event = name.as_str(), "listener registered");
        Subscription { name, listener }
    }

    /// Remove the registration(s) identified by `subscription`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotRegistered`] if the name was never registered.
    pub fn remove_listener(&self, subscription: &Subscription) -> Result<bool> {
        self.remove_callback(&subscription.name, &subscription.listener)
    }

    /// Remove every registration of `listener` under `name`.
    ///
    /// Returns `Ok(true)` if at least one registration was removed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotRegistered`] if the name was never registered.
    pub fn remove_callback(&self, name: &str, listener: &Listener) -> Result<bool> {
        let mut table = self.lock();
        let list = table
            .get_mut(name)
            .ok_or_else(|| AppError::NotRegistered(name.to_owned()))?;

        let before = list.len();
        list.retain(|registered| !Arc::ptr_eq(registered, listener));
        Ok(list.len() != before)
    }

    /// Clear every callback registered for `name`.
    ///
    /// The name stays known to the registry. Returns `true` if any callback
    /// was removed; a never-registered name returns `false`.
    pub fn remove_listeners(&self, name: &str) -> bool {
        match self.lock().get_mut(name) {
            Some(list) => {
                let removed = !list.is_empty();
                list.clear();
                removed
            }
            None => false,
        }
    }

    /// Invoke every callback registered for `name`, in registration order.
    ///
    /// Returns the number of callbacks invoked. Panics raised by a callback
    /// are not caught here and abort the remaining fan-out.
    pub fn emit(&self, name: &str, payload: &Value) -> usize {
        let snapshot = match self.lock().get(name) {
            Some(list) => list.clone(),
            None => {
                if self.warn_unregistered {
                    warn!(
                        event = name,
                        "event has been received, but it has never been registered as listener"
                    );
                }
                return 0;
            }
        };

        for listener in &snapshot {
            listener(payload);
        }
        snapshot.len()
    }

    /// Number of callbacks currently registered for `name`.
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, Vec::len)
    }

    /// Whether `name` has ever been registered.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Listener>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Debug for ListenerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let table = self.lock();
        let mut names: Vec<(&String, usize)> =
            table.iter().map(|(name, list)| (name, list.len())).collect();
        names.sort();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &names)
            .field("warn_unregistered", &self.warn_unregistered)
            .finish()
    }
}
