/*!
Execution environment probing and storage resolution.

The host decides whether a browser-like context exists. On the server there is
none, and every storage lookup yields a [`NoopStorage`] so calling code never
has to branch on where it runs.
*/

use crate::storage::{
    FileStorage, KeyValueStore, MemoryStorage, NoopStorage, SharedStore, StorageKind,
};
use crate::Result;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A context that owns real local and session stores
pub trait BrowserContext: Send + Sync {
    fn local_storage(&self) -> SharedStore;
    fn session_storage(&self) -> SharedStore;
}

/// Capability answering "is there a browser-like context here?"
pub trait EnvironmentProbe: Send + Sync {
    /// The current browser-like context, `None` while rendering on a server
    fn context(&self) -> Option<Arc<dyn BrowserContext>>;

    fn is_server(&self) -> bool {
        self.context().is_none()
    }
}

/// Fixed environment: either a server or a client with a known context
#[derive(Clone, Default)]
pub struct Environment {
    context: Option<Arc<dyn BrowserContext>>,
}

impl Environment {
    /// Environment without any browser-like context
    pub fn server() -> Self {
        Self { context: None }
    }

    /// Environment exposing `context`
    pub fn client(context: impl BrowserContext + 'static) -> Self {
        Self {
            context: Some(Arc::new(context)),
        }
    }

    /// Client when `server` is false, server otherwise
    ///
    /// `context` is only invoked for a client, so a server never touches the
    /// stores a client would open.
    pub fn detect<C, F>(server: bool, context: F) -> Result<Self>
    where
        C: BrowserContext + 'static,
        F: FnOnce() -> Result<C>,
    {
        if server {
            debug!("no browser context, storage is inert");
            return Ok(Self::server());
        }
        Ok(Self::client(context()?))
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("server", &self.context.is_none())
            .finish()
    }
}

impl EnvironmentProbe for Environment {
    fn context(&self) -> Option<Arc<dyn BrowserContext>> {
        self.context.clone()
    }
}

/// Context of a desktop host: local storage on disk, session storage in memory
#[derive(Clone)]
pub struct DesktopContext {
    local: SharedStore,
    session: SharedStore,
}

impl DesktopContext {
    /// Keep local storage in `dir`, session storage in process memory
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Ok(Self::with_stores(
            Arc::new(FileStorage::in_dir(dir)?),
            Arc::new(MemoryStorage::new()),
        ))
    }

    /// Context over caller-provided stores
    pub fn with_stores(local: SharedStore, session: SharedStore) -> Self {
        Self { local, session }
    }
}

impl BrowserContext for DesktopContext {
    fn local_storage(&self) -> SharedStore {
        self.local.clone()
    }

    fn session_storage(&self) -> SharedStore {
        self.session.clone()
    }
}

/// Resolve the store of `kind` for the probed environment
///
/// Without a browser-like context the result is a [`NoopStorage`].
pub fn resolve(kind: StorageKind, probe: &dyn EnvironmentProbe) -> SharedStore {
    match probe.context() {
        Some(context) => match kind {
            StorageKind::Local => context.local_storage(),
            StorageKind::Session => context.session_storage(),
        },
        None => {
            debug!(%kind, "no browser context, using noop storage");
            noop()
        }
    }
}

/// Resolve a store by its browser-style name (`localStorage`, `sessionStorage`)
///
/// Unknown names resolve to a [`NoopStorage`] instead of failing.
pub fn get_storage(name: &str, probe: &dyn EnvironmentProbe) -> SharedStore {
    match name.parse::<StorageKind>() {
        Ok(kind) => resolve(kind, probe),
        Err(err) => {
            debug!(error = %err, "falling back to noop storage");
            noop()
        }
    }
}

fn noop() -> SharedStore {
    Arc::new(NoopStorage::new())
}

/// `true` when `store` is inert; such a store reports a length of `-1`
pub fn is_noop(store: &dyn KeyValueStore) -> bool {
    store.length() < 0
}
