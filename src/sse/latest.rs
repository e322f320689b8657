use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::source::EventStream;

#[derive(Debug, Default)]
struct LatestState {
    events: HashMap<String, Value>,
    connected: bool,
}

/// Keeps the most recent payload of every subscribed event type, plus
/// whether the stream is currently connected.
#[derive(Debug, Clone, Default)]
pub struct LatestEvents {
    state: Arc<Mutex<LatestState>>,
}

impl LatestEvents {
    /// Track connection state of `source`. Call before starting it.
    pub fn attach<S: EventStream>(source: &S) -> Self {
        let latest = Self::default();

        let state = Arc::clone(&latest.state);
        source.on_open(move || lock(&state).connected = true);
        let state = Arc::clone(&latest.state);
        source.on_error(move |_| lock(&state).connected = false);

        latest
    }

    /// Start remembering the latest payload of `event_type`.
    pub fn subscribe<S: EventStream>(&self, source: &S, event_type: &str) {
        let state = Arc::clone(&self.state);
        let key = event_type.to_string();
        source.on::<Value, _>(event_type, move |event| {
            lock(&state).events.insert(key.clone(), event.data);
        });
    }

    /// Latest payload of `event_type`, if one arrived and decodes as `T`.
    pub fn get<T: DeserializeOwned>(&self, event_type: &str) -> Option<T> {
        let value = self.raw(event_type)?;
        serde_json::from_value(value).ok()
    }

    pub fn raw(&self, event_type: &str) -> Option<Value> {
        lock(&self.state).events.get(event_type).cloned()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

fn lock(state: &Mutex<LatestState>) -> MutexGuard<'_, LatestState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
