/*!
# Signal Storage

Persist reactive state containers to browser-style key-value storage and
rehydrate them on startup.

- A container is bound to one key of a store; binding restores every persisted
  field the container knows and then writes the state back after each change
- Serialization, exclusion and write gating are pluggable hooks
- Storage failures are routed to an error hook and never reach the container
- Server environments resolve to an inert store, so binding code needs no branches

## Architecture

The crate follows hexagonal architecture principles:
- [`StateContainer`] and [`KeyValueStore`] are the ports the binder talks to
- [`SignalStore`], [`FileStorage`], [`MemoryStorage`] and [`NoopStorage`] are adapters
- [`EnvironmentProbe`] replaces the ambient "is there a window" check

## Usage

```rust
use serde_json::json;
use signal_storage_core::{provide, resolve, ConfigOverrides, DesktopContext, Environment,
    SignalStore, StorageBinder, StorageKind};

# let dir = tempfile::tempdir()?;
let env = Environment::client(DesktopContext::open(dir.path())?);
let store = SignalStore::new(&json!({ "count": 10, "draft": "" }))?;

let local = resolve(StorageKind::Local, &env);
StorageBinder::new("counter", provide(local))
    .config(ConfigOverrides::new().exclude_keys(["draft"]))
    .environment(env)
    .bind(&store)?;

store.update(|state| state["count"] = json!(11));
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

pub mod binder;
pub mod config;
pub mod environment;
pub mod error;
pub mod observability;
pub mod state;
pub mod storage;


pub use binder::{provide, with_storage, Binding, StorageBinder, StoreProvider};
pub use config::{Config, ConfigOverrides, MergeStrategy};
pub use environment::{
    get_storage, resolve, BrowserContext, DesktopContext, Environment, EnvironmentProbe,
};
pub use error::{Result, StorageError};
pub use state::{EffectId, Snapshot, SignalStore, StateContainer};
pub use storage::{
    FileStorage, KeyValueStore, MemoryStorage, NoopStorage, SharedStore, StorageKind,
};
