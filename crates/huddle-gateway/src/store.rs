use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{error, warn};

use huddle_db::{ChatError, Database};

/// Async face of the chat store. Every call runs on the blocking pool and
/// is bounded by a timeout, so a stuck write surfaces as an error instead
/// of stalling the connection loop that issued it.
#[derive(Clone)]
pub struct ChatStore {
    db: Arc<Database>,
    timeout: Duration,
}

impl ChatStore {
    pub fn new(db: Arc<Database>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Run `f` against the database.
    pub async fn call<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        self.run_blocking(move || f(&db)).await
    }

    /// Run any blocking closure under the same timeout policy. Used for
    /// collaborators (social graph, profiles) that may hit the database too.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce() -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::task::spawn_blocking(f);
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("spawn_blocking join error: {}", e);
                Err(ChatError::Internal(anyhow!("store task failed: {}", e)))
            }
            Err(_) => {
                warn!("store call exceeded {:?}", self.timeout);
                Err(ChatError::Timeout)
            }
        }
    }
}
