/*!
Reactive state containers.

A container holds a flat mapping of field names to JSON values, applies partial
patches atomically and pushes every change to its registered effects.
[`SignalStore`] is the in-process implementation; hosts with their own reactive
runtime implement [`StateContainer`] instead.
*/

use crate::{Result, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Ordered field name → value mapping of a container at one point in time
pub type Snapshot = serde_json::Map<String, Value>;

/// Callback run with the latest snapshot after every change batch
pub type Effect = Box<dyn FnMut(&Snapshot) + Send>;

/// Identifier of an installed effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u64);

/// Host state container the storage binder plugs into
pub trait StateContainer {
    /// Deep copy of the live state
    fn snapshot(&self) -> Snapshot;

    /// Field names known to the container
    fn field_names(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    /// Apply `patch` in one update and notify effects once
    fn apply_patch(&self, patch: Snapshot);

    /// Install `effect`; it runs once right away and again after every change
    fn effect(&self, effect: Effect) -> EffectId;

    /// Flag `key` as rehydrated, returning `true` only the first time
    fn mark_hydrated(&self, key: &str) -> bool;
}

#[derive(Clone)]
struct Registered {
    id: EffectId,
    run: Arc<Mutex<Effect>>,
}

/// Thread-safe reactive store over a JSON object
///
/// # Example
/// ```rust
/// use serde_json::json;
/// use signal_storage_core::SignalStore;
///
/// let store = SignalStore::new(&json!({ "count": 0 }))?;
/// store.update(|state| state["count"] = json!(1));
/// assert_eq!(store.field("count"), Some(json!(1)));
/// # Ok::<(), signal_storage_core::StorageError>(())
/// ```
pub struct SignalStore {
    state: RwLock<Snapshot>,
    effects: Mutex<Vec<Registered>>,
    hydrated: Mutex<HashSet<String>>,
    next_id: AtomicU64,
    notifying: AtomicBool,
    dirty: AtomicBool,
}

impl SignalStore {
    /// Create a store whose initial state is `initial` encoded as a JSON object
    ///
    /// # Errors
    /// * `StorageError::Json` - If `initial` cannot be encoded
    /// * `StorageError::InvalidState` - If `initial` does not encode to an object
    pub fn new<T: Serialize + ?Sized>(initial: &T) -> Result<Self> {
        match serde_json::to_value(initial)? {
            Value::Object(state) => Ok(Self::from_snapshot(state)),
            other => Err(StorageError::invalid_state(format!(
                "state must encode to a JSON object, got {}",
                kind_of(&other)
            ))),
        }
    }

    pub fn from_snapshot(state: Snapshot) -> Self {
        Self {
            state: RwLock::new(state),
            effects: Mutex::new(Vec::new()),
            hydrated: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
            notifying: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    /// Decode the whole state into `T`
    pub fn get<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.snapshot()))?)
    }

    /// Current value of one field
    pub fn field(&self, name: &str) -> Option<Value> {
        self.read_state().get(name).cloned()
    }

    /// Overwrite the fields present in `patch`
    pub fn patch_state(&self, patch: Snapshot) {
        if patch.is_empty() {
            return;
        }
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            for (name, value) in patch {
                state.insert(name, value);
            }
        }
        self.notify();
    }

    /// Mutate the state in place and notify effects once
    ///
    /// A change that turns the state into something other than an object is discarded.
    pub fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut Value),
    {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let mut value = Value::Object(state.clone());
            change(&mut value);
            match value {
                Value::Object(next) => *state = next,
                other => {
                    tracing::warn!(
                        kind = kind_of(&other),
                        "update replaced state with a non-object, change discarded"
                    );
                    return;
                }
            }
        }
        self.notify();
    }

    /// Remove a previously installed effect
    ///
    /// Safe to call from inside an effect; a removed effect does not run again,
    /// not even in the notification pass that is currently running.
    pub fn remove_effect(&self, id: EffectId) -> bool {
        let mut effects = self.lock_effects();
        let before = effects.len();
        effects.retain(|effect| effect.id != id);
        effects.len() != before
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_effects(&self) -> std::sync::MutexGuard<'_, Vec<Registered>> {
        self.effects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_registered(&self, id: EffectId) -> bool {
        self.lock_effects().iter().any(|effect| effect.id == id)
    }

    /// Run every effect with the latest snapshot
    ///
    /// One thread runs notification passes at a time. A change made while a pass
    /// is running, from inside an effect or from another thread, marks the store
    /// dirty and is delivered by a further pass of the running loop.
    fn notify(&self) {
        self.dirty.store(true, Ordering::SeqCst);

        while self
            .notifying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            {
                let _pass = NotifyingGuard(&self.notifying);
                while self.dirty.swap(false, Ordering::SeqCst) {
                    self.run_effects(&self.snapshot());
                }
            }

            // a change that landed between the last pass and the flag clearing
            if !self.dirty.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    /// Effects run without the registry locked, so they may install or remove effects
    fn run_effects(&self, snapshot: &Snapshot) {
        let effects = self.lock_effects().clone();
        for effect in effects {
            if !self.is_registered(effect.id) {
                continue;
            }
            let mut run = effect.run.lock().unwrap_or_else(PoisonError::into_inner);
            (*run)(snapshot);
        }
    }
}

/// Clears the notifying flag when a pass ends, including by a panicking effect
struct NotifyingGuard<'a>(&'a AtomicBool);

impl Drop for NotifyingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl StateContainer for SignalStore {
    fn snapshot(&self) -> Snapshot {
        self.read_state().clone()
    }

    fn apply_patch(&self, patch: Snapshot) {
        self.patch_state(patch);
    }

    fn effect(&self, mut effect: Effect) -> EffectId {
        let id = EffectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        effect(&self.snapshot());
        self.lock_effects().push(Registered {
            id,
            run: Arc::new(Mutex::new(effect)),
        });
        id
    }

    fn mark_hydrated(&self, key: &str) -> bool {
        self.hydrated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string())
    }
}

impl fmt::Debug for SignalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalStore")
            .field("state", &*self.read_state())
            .finish_non_exhaustive()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        count: i64,
        label: String,
    }

    fn recorder(store: &SignalStore) -> Arc<Mutex<Vec<Snapshot>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.effect(Box::new(move |snapshot| {
            sink.lock().unwrap().push(snapshot.clone());
        }));
        seen
    }

    #[test]
    fn test_new_from_struct() {
        let store = SignalStore::new(&Counter {
            count: 3,
            label: "a".into(),
        })
        .unwrap();

        assert_eq!(store.field_names(), vec!["count", "label"]);
        assert_eq!(
            store.get::<Counter>().unwrap(),
            Counter {
                count: 3,
                label: "a".into()
            }
        );
    }

    #[test]
    fn test_new_rejects_non_object() {
        let result = SignalStore::new(&[1, 2, 3]);
        assert!(matches!(result, Err(StorageError::InvalidState(_))));
        assert!(result.unwrap_err().to_string().contains("array"));
    }

    #[test]
    fn test_effect_runs_immediately_and_on_change() {
        let store = SignalStore::new(&json!({ "count": 0 })).unwrap();
        let seen = recorder(&store);
        assert_eq!(seen.lock().unwrap().len(), 1);

        let mut patch = Snapshot::new();
        patch.insert("count".into(), json!(1));
        store.patch_state(patch);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1]["count"], json!(1));
    }

    #[test]
    fn test_empty_patch_does_not_notify() {
        let store = SignalStore::new(&json!({ "count": 0 })).unwrap();
        let seen = recorder(&store);

        store.patch_state(Snapshot::new());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_update_in_place() {
        let store = SignalStore::new(&json!({ "count": 1, "nested": { "v": 1 } })).unwrap();
        store.update(|state| {
            state["count"] = json!(2);
            state["nested"]["v"] = json!(5);
        });

        assert_eq!(store.field("count"), Some(json!(2)));
        assert_eq!(store.field("nested"), Some(json!({ "v": 5 })));
    }

    #[test]
    fn test_update_to_non_object_is_discarded() {
        let store = SignalStore::new(&json!({ "count": 1 })).unwrap();
        let seen = recorder(&store);

        store.update(|state| *state = json!(5));

        assert_eq!(store.field("count"), Some(json!(1)));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = SignalStore::new(&json!({ "count": 1 })).unwrap();
        let mut snapshot = store.snapshot();
        snapshot.remove("count");

        assert_eq!(store.field("count"), Some(json!(1)));
    }

    #[test]
    fn test_reentrant_patch_is_batched() {
        let store = Arc::new(SignalStore::new(&json!({ "count": 0, "double": 0 })).unwrap());
        let inner = store.clone();
        store.effect(Box::new(move |snapshot| {
            let count = snapshot["count"].as_i64().unwrap_or_default();
            if snapshot["double"] != json!(count * 2) {
                let mut patch = Snapshot::new();
                patch.insert("double".into(), json!(count * 2));
                inner.patch_state(patch);
            }
        }));
        let seen = recorder(&store);

        store.update(|state| state["count"] = json!(4));

        assert_eq!(store.field("double"), Some(json!(8)));
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last["double"], json!(8));
    }

    #[test]
    fn test_remove_effect() {
        let store = SignalStore::new(&json!({ "count": 0 })).unwrap();
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let id = store.effect(Box::new(move |_| *sink.lock().unwrap() += 1));

        assert!(store.remove_effect(id));
        assert!(!store.remove_effect(id));
        store.update(|state| state["count"] = json!(1));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_effect_installed_from_inside_an_effect() {
        let store = Arc::new(SignalStore::new(&json!({ "count": 0 })).unwrap());
        let nested = Arc::new(Mutex::new(Vec::new()));
        let inner = store.clone();
        let sink = nested.clone();
        store.effect(Box::new(move |snapshot| {
            if snapshot["count"] == json!(1) {
                let sink = sink.clone();
                inner.effect(Box::new(move |snapshot| {
                    sink.lock().unwrap().push(snapshot["count"].clone());
                }));
            }
        }));

        store.update(|state| state["count"] = json!(1));
        store.update(|state| state["count"] = json!(2));

        assert_eq!(*nested.lock().unwrap(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_effect_removed_from_inside_an_effect() {
        let store = Arc::new(SignalStore::new(&json!({ "count": 0 })).unwrap());
        let runs = Arc::new(Mutex::new(0));
        let own_id = Arc::new(Mutex::new(None::<EffectId>));
        let inner = store.clone();
        let (counter, id_slot) = (runs.clone(), own_id.clone());
        let id = store.effect(Box::new(move |snapshot| {
            *counter.lock().unwrap() += 1;
            if snapshot["count"] == json!(1) {
                if let Some(id) = *id_slot.lock().unwrap() {
                    inner.remove_effect(id);
                }
            }
        }));
        *own_id.lock().unwrap() = Some(id);

        store.update(|state| state["count"] = json!(1));
        store.update(|state| state["count"] = json!(2));

        assert_eq!(*runs.lock().unwrap(), 2);
    }

    #[test]
    fn test_panicking_effect_does_not_stop_notification() {
        let store = SignalStore::new(&json!({ "count": 0 })).unwrap();
        store.effect(Box::new(|snapshot| {
            if snapshot["count"] == json!(1) {
                panic!("effect failure");
            }
        }));
        let seen = recorder(&store);

        let result = catch_unwind(AssertUnwindSafe(|| {
            store.update(|state| state["count"] = json!(1));
        }));
        assert!(result.is_err());

        store.update(|state| state["count"] = json!(2));
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last["count"], json!(2));
    }

    #[test]
    fn test_concurrent_updates_deliver_final_state() {
        let store = Arc::new(SignalStore::new(&json!({ "count": 0 })).unwrap());
        let seen = recorder(&store);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.update(|state| {
                            let count = state["count"].as_i64().unwrap();
                            state["count"] = json!(count + 1);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.field("count"), Some(json!(1000)));
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last, store.snapshot());
    }

    #[test]
    fn test_mark_hydrated_once_per_key() {
        let store = SignalStore::new(&json!({ "count": 0 })).unwrap();
        assert!(store.mark_hydrated("a"));
        assert!(!store.mark_hydrated("a"));
        assert!(store.mark_hydrated("b"));
    }
}
