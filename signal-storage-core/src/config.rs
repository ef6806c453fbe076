//! Configuration for the storage binder
//!
//! A [`Config`] is a set of independently overridable policy hooks. Callers
//! build a [`ConfigOverrides`] with only the hooks they care about and the
//! binder merges it field by field over [`Config::default`].

use crate::state::Snapshot;
use crate::{Result, StorageError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub type ErrorHook = Arc<dyn Fn(&StorageError) + Send + Sync>;
pub type SerializeHook = Arc<dyn Fn(&Snapshot) -> Result<String> + Send + Sync>;
pub type DeserializeHook = Arc<dyn Fn(&str) -> Result<Snapshot> + Send + Sync>;
pub type SaveIfHook = Arc<dyn Fn(&Snapshot) -> bool + Send + Sync>;

/// How persisted fields are merged back into live state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Restore every persisted field the container knows, whatever its value
    #[default]
    KeyPresence,
    /// Restore only truthy values; `0`, `false`, `""`, `[]` and `null` keep the live default
    Truthy,
}

impl MergeStrategy {
    /// Whether `value` read from storage should replace the live field
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            MergeStrategy::KeyPresence => true,
            MergeStrategy::Truthy => is_truthy(value),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Complete binder configuration
#[derive(Clone)]
pub struct Config {
    /// Called on any failure reading or writing storage; must not panic
    pub error: ErrorHook,
    /// Encodes the (filtered) snapshot, JSON by default
    pub serialize: SerializeHook,
    /// Decodes a stored record, JSON by default
    pub deserialize: DeserializeHook,
    /// Writing is skipped entirely when this returns `false`
    pub save_if: SaveIfHook,
    /// Fields stripped from the copy that gets written
    pub exclude_keys: BTreeSet<String>,
    pub merge: MergeStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            error: Arc::new(log_error),
            serialize: Arc::new(json_serialize),
            deserialize: Arc::new(json_deserialize),
            save_if: Arc::new(|_: &Snapshot| true),
            exclude_keys: BTreeSet::new(),
            merge: MergeStrategy::default(),
        }
    }
}

impl Config {
    /// Defaults with every hook set in `overrides` replaced
    pub fn merged(overrides: ConfigOverrides) -> Self {
        let mut config = Self::default();
        config.apply(overrides);
        config
    }

    /// Replace the hooks set in `overrides`; later calls win
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            error,
            serialize,
            deserialize,
            save_if,
            exclude_keys,
            merge,
        } = overrides;

        if let Some(error) = error {
            self.error = error;
        }
        if let Some(serialize) = serialize {
            self.serialize = serialize;
        }
        if let Some(deserialize) = deserialize {
            self.deserialize = deserialize;
        }
        if let Some(save_if) = save_if {
            self.save_if = save_if;
        }
        if let Some(exclude_keys) = exclude_keys {
            self.exclude_keys = exclude_keys;
        }
        if let Some(merge) = merge {
            self.merge = merge;
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("exclude_keys", &self.exclude_keys)
            .field("merge", &self.merge)
            .finish_non_exhaustive()
    }
}

/// Partial configuration; unset fields keep their defaults
#[derive(Clone, Default)]
pub struct ConfigOverrides {
    pub error: Option<ErrorHook>,
    pub serialize: Option<SerializeHook>,
    pub deserialize: Option<DeserializeHook>,
    pub save_if: Option<SaveIfHook>,
    pub exclude_keys: Option<BTreeSet<String>>,
    pub merge: Option<MergeStrategy>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StorageError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(hook));
        self
    }

    pub fn serialize<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Snapshot) -> Result<String> + Send + Sync + 'static,
    {
        self.serialize = Some(Arc::new(hook));
        self
    }

    pub fn deserialize<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) -> Result<Snapshot> + Send + Sync + 'static,
    {
        self.deserialize = Some(Arc::new(hook));
        self
    }

    pub fn save_if<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Snapshot) -> bool + Send + Sync + 'static,
    {
        self.save_if = Some(Arc::new(hook));
        self
    }

    /// Gate writes on a predicate over the typed state
    ///
    /// A snapshot that does not decode into `T` is not saved.
    pub fn save_if_typed<T, F>(self, hook: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.save_if(move |snapshot| {
            match serde_json::from_value::<T>(Value::Object(snapshot.clone())) {
                Ok(state) => hook(&state),
                Err(err) => {
                    tracing::debug!(error = %err, "snapshot does not decode, skipping save");
                    false
                }
            }
        })
    }

    pub fn exclude_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn merge(mut self, strategy: MergeStrategy) -> Self {
        self.merge = Some(strategy);
        self
    }
}

fn log_error(err: &StorageError) {
    tracing::error!(error = %err, "state storage failure");
}

fn json_serialize(snapshot: &Snapshot) -> Result<String> {
    Ok(serde_json::to_string(snapshot)?)
}

fn json_deserialize(raw: &str) -> Result<Snapshot> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(snapshot) => Ok(snapshot),
        other => Err(StorageError::serialization(format!(
            "stored state is not a JSON object: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    fn snapshot(value: Value) -> Snapshot {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        let state = snapshot(json!({ "count": 1, "todos": [] }));

        assert!((config.save_if)(&state));
        assert!(config.exclude_keys.is_empty());
        assert_eq!(config.merge, MergeStrategy::KeyPresence);
        assert_eq!((config.serialize)(&state).unwrap(), r#"{"count":1,"todos":[]}"#);
        assert_eq!((config.deserialize)(r#"{"count":1,"todos":[]}"#).unwrap(), state);
    }

    #[test]
    fn test_default_deserialize_rejects_non_object() {
        let config = Config::default();
        assert!(matches!(
            (config.deserialize)("[1,2]"),
            Err(StorageError::Serialization(_))
        ));
        assert!(matches!(
            (config.deserialize)("{"),
            Err(StorageError::Json(_))
        ));
    }

    #[test]
    fn test_default_error_hook_does_not_panic() {
        let config = Config::default();
        (config.error)(&StorageError::storage("boom"));
    }

    #[test]
    fn test_overrides_replace_only_given_fields() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let config = Config::merged(
            ConfigOverrides::new()
                .error(move |err| sink.lock().unwrap().push(err.to_string()))
                .exclude_keys(["secret"]),
        );

        (config.error)(&StorageError::storage("boom"));
        assert_eq!(*calls.lock().unwrap(), vec!["Storage error: boom".to_string()]);
        assert!(config.exclude_keys.contains("secret"));

        // untouched hooks keep their defaults
        let state = snapshot(json!({ "count": 0 }));
        assert!((config.save_if)(&state));
        assert_eq!((config.serialize)(&state).unwrap(), r#"{"count":0}"#);
    }

    #[test]
    fn test_apply_later_overrides_win() {
        let mut config = Config::merged(ConfigOverrides::new().exclude_keys(["a"]));
        config.apply(ConfigOverrides::new().exclude_keys(["b"]).merge(MergeStrategy::Truthy));

        assert_eq!(config.exclude_keys, BTreeSet::from(["b".to_string()]));
        assert_eq!(config.merge, MergeStrategy::Truthy);
    }

    #[test]
    fn test_save_if_typed() {
        #[derive(Deserialize)]
        struct Counter {
            count: i64,
        }

        let overrides = ConfigOverrides::new().save_if_typed(|state: &Counter| state.count > 0);
        let save_if = overrides.save_if.unwrap();

        assert!(!save_if(&snapshot(json!({ "count": 0 }))));
        assert!(save_if(&snapshot(json!({ "count": 3 }))));
        assert!(!save_if(&snapshot(json!({ "count": "three" }))));
    }

    #[test]
    fn test_merge_strategy_accepts() {
        let falsy = [json!(0), json!(false), json!(""), json!([]), json!(null)];
        for value in &falsy {
            assert!(MergeStrategy::KeyPresence.accepts(value));
            assert!(!MergeStrategy::Truthy.accepts(value), "{value} is falsy");
        }

        let truthy = [json!(1), json!(true), json!("x"), json!([0]), json!({})];
        for value in &truthy {
            assert!(MergeStrategy::Truthy.accepts(value), "{value} is truthy");
        }
    }
}
