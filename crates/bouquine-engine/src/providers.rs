//! External collaborators, reduced to the seams the engine needs.
//!
//! The real application wires these to its auth backend and object
//! storage; tests use the in-process implementations below.

use std::collections::HashMap;
use std::sync::Mutex;

use bouquine_shared::UserId;
use futures::future::BoxFuture;
use tokio::sync::watch;

/// Identity source.  `current_user` answers synchronously from the last
/// known state; `watch_identity` delivers sign-in/sign-out transitions.
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
    fn watch_identity(&self) -> watch::Receiver<Option<UserId>>;
}

/// Binary object storage: hand over bytes under a key, get back a stable
/// public reference.  Used for avatars and chat image attachments.
pub trait ObjectStore: Send + Sync {
    fn upload(&self, key: String, bytes: Vec<u8>)
        -> BoxFuture<'static, Result<String, String>>;
}

/// Auth provider holding a locally switchable identity.  Suits tests and
/// single-account desktop use.
pub struct LocalAuth {
    tx: watch::Sender<Option<UserId>>,
}

impl LocalAuth {
    pub fn signed_in(user: UserId) -> Self {
        let (tx, _) = watch::channel(Some(user));
        Self { tx }
    }

    pub fn signed_out() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn sign_in(&self, user: UserId) {
        let _ = self.tx.send(Some(user));
    }

    pub fn sign_out(&self) {
        let _ = self.tx.send(None);
    }
}

impl AuthProvider for LocalAuth {
    fn current_user(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn watch_identity(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}

/// Object store keeping uploads in memory and returning `mem://` refs.
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn upload(
        &self,
        key: String,
        bytes: Vec<u8>,
    ) -> BoxFuture<'static, Result<String, String>> {
        let reference = format!("mem://{key}");
        match self.objects.lock() {
            Ok(mut objects) => {
                objects.insert(key, bytes);
                Box::pin(async move { Ok(reference) })
            }
            Err(e) => {
                let message = format!("object store poisoned: {e}");
                Box::pin(async move { Err(message) })
            }
        }
    }
}
