//! Async access to the SQLite record store.
//!
//! `rusqlite` is synchronous, so every call is moved onto the blocking
//! thread pool with the connection held under a standard mutex.

use std::sync::{Arc, Mutex};

use murmur_store::Database;

use crate::error::ServerError;

#[derive(Clone)]
pub struct Records {
    db: Arc<Mutex<Database>>,
}

impl Records {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Fresh in-memory store, for tests.
    pub fn in_memory() -> Result<Self, ServerError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` against the database on a blocking thread.
    pub async fn call<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> murmur_store::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| ServerError::Internal("database mutex poisoned".into()))?;
            f(&guard).map_err(ServerError::from)
        })
        .await?
    }
}
