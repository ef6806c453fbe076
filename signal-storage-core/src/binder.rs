/*!
Binds a state container to a key-value store.

Binding runs once per container: it rehydrates the container from the record
stored under the key, then installs an effect that writes the state back after
every change. Storage failures on either path go to the configured error hook
and never reach the container.
*/

use crate::config::{Config, ConfigOverrides};
use crate::environment::EnvironmentProbe;
use crate::observability;
use crate::state::{EffectId, Snapshot, StateContainer};
use crate::storage::SharedStore;
use crate::{Result, StorageError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Supplies the store to read from and write to, resolved on every access
pub trait StoreProvider: Send + Sync {
    fn store(&self) -> Result<SharedStore>;
}

impl<F> StoreProvider for F
where
    F: Fn() -> Result<SharedStore> + Send + Sync,
{
    fn store(&self) -> Result<SharedStore> {
        self()
    }
}

/// Provider that always hands out `store`
pub fn provide(store: SharedStore) -> impl StoreProvider {
    move || -> Result<SharedStore> { Ok(store.clone()) }
}

/// Outcome of [`StorageBinder::bind`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub key: String,
    /// Fields patched from storage, in container order
    pub restored: Vec<String>,
    /// Write-back effect, `None` when binding was skipped on the server
    pub effect: Option<EffectId>,
}

impl Binding {
    /// Whether any field was restored from storage
    pub fn hydrated(&self) -> bool {
        !self.restored.is_empty()
    }

    pub fn skipped(&self) -> bool {
        self.effect.is_none()
    }
}

/// Builder wiring a container to storage under one key
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use signal_storage_core::{provide, MemoryStorage, SignalStore, StorageBinder};
/// use signal_storage_core::storage::KeyValueStore;
///
/// let storage = Arc::new(MemoryStorage::new());
/// let store = SignalStore::new(&json!({ "count": 0 }))?;
///
/// StorageBinder::new("counter", provide(storage.clone())).bind(&store)?;
/// assert_eq!(storage.get("counter")?.as_deref(), Some(r#"{"count":0}"#));
/// # Ok::<(), signal_storage_core::StorageError>(())
/// ```
pub struct StorageBinder {
    key: String,
    provider: Arc<dyn StoreProvider>,
    config: Config,
    environment: Option<Arc<dyn EnvironmentProbe>>,
}

impl StorageBinder {
    pub fn new(key: impl Into<String>, provider: impl StoreProvider + 'static) -> Self {
        Self {
            key: key.into(),
            provider: Arc::new(provider),
            config: Config::default(),
            environment: None,
        }
    }

    /// Override hooks of the default configuration
    pub fn config(mut self, overrides: ConfigOverrides) -> Self {
        self.config.apply(overrides);
        self
    }

    /// Skip binding entirely when `probe` reports a server environment
    pub fn environment(mut self, probe: impl EnvironmentProbe + 'static) -> Self {
        self.environment = Some(Arc::new(probe));
        self
    }

    /// Rehydrate `container` and install the write-back effect
    ///
    /// Rehydration happens only the first time a key is bound to a container;
    /// binding the same key again only installs another write-back.
    ///
    /// # Errors
    /// * `StorageError::EmptyState` - If the container has no fields
    pub fn bind<C>(self, container: &C) -> Result<Binding>
    where
        C: StateContainer + ?Sized,
    {
        let Self {
            key,
            provider,
            config,
            environment,
        } = self;

        if environment.as_ref().is_some_and(|probe| probe.is_server()) {
            debug!(%key, "server environment, storage binding skipped");
            return Ok(Binding {
                key,
                restored: Vec::new(),
                effect: None,
            });
        }

        let fields = container.field_names();
        if fields.is_empty() {
            return Err(StorageError::EmptyState);
        }

        let mut restored = Vec::new();
        if container.mark_hydrated(&key) {
            match read(&key, provider.as_ref(), &config) {
                Ok(Some(persisted)) => {
                    let patch = build_patch(&fields, persisted, &config);
                    restored = patch.keys().cloned().collect();
                    if !patch.is_empty() {
                        container.apply_patch(patch);
                        observability::record_hydration();
                        info!(%key, fields = ?restored, "rehydrated state from storage");
                    }
                }
                Ok(None) => debug!(%key, "nothing stored, keeping initial state"),
                Err(err) => report(&config, &err),
            }
        }

        let writer = Writer {
            key: key.clone(),
            provider,
            config,
        };
        let effect = container.effect(Box::new(move |snapshot| writer.run(snapshot)));

        Ok(Binding {
            key,
            restored,
            effect: Some(effect),
        })
    }
}

impl fmt::Debug for StorageBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBinder")
            .field("key", &self.key)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Bind `container` to the store supplied by `provider` under `key`
pub fn with_storage<C>(
    container: &C,
    key: impl Into<String>,
    provider: impl StoreProvider + 'static,
    overrides: ConfigOverrides,
) -> Result<Binding>
where
    C: StateContainer + ?Sized,
{
    StorageBinder::new(key, provider)
        .config(overrides)
        .bind(container)
}

fn report(config: &Config, err: &StorageError) {
    observability::record_error();
    (config.error)(err);
}

fn read(key: &str, provider: &dyn StoreProvider, config: &Config) -> Result<Option<Snapshot>> {
    let Some(raw) = provider.store()?.get(key)? else {
        return Ok(None);
    };
    (config.deserialize)(&raw).map(Some)
}

/// Persisted fields the container knows and the merge strategy accepts
fn build_patch(fields: &[String], mut persisted: Snapshot, config: &Config) -> Snapshot {
    let mut patch = Snapshot::new();
    for field in fields {
        if let Some(value) = persisted.remove(field) {
            if config.merge.accepts(&value) {
                patch.insert(field.clone(), value);
            }
        }
    }
    if !persisted.is_empty() {
        debug!(dropped = ?persisted.keys().collect::<Vec<_>>(), "ignoring unknown persisted fields");
    }
    patch
}

struct Writer {
    key: String,
    provider: Arc<dyn StoreProvider>,
    config: Config,
}

impl Writer {
    fn run(&self, snapshot: &Snapshot) {
        if let Err(err) = self.write(snapshot) {
            report(&self.config, &err);
        }
    }

    fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if !(self.config.save_if)(snapshot) {
            observability::record_skipped_write();
            debug!(key = %self.key, "saveIf returned false, write skipped");
            return Ok(());
        }

        let mut copy = snapshot.clone();
        for excluded in &self.config.exclude_keys {
            copy.remove(excluded);
        }

        let serialized = (self.config.serialize)(&copy)?;
        self.provider.store()?.set(&self.key, &serialized)?;
        observability::record_write(serialized.len());
        debug!(key = %self.key, bytes = serialized.len(), "state written to storage");
        Ok(())
    }
}
