use anyhow::Result;

use murmur_db::{Database, TokenRegistration};

/// Persistent token registry the dispatcher and reconciler work against.
///
/// Calls are blocking; async callers run them on `spawn_blocking`.
pub trait TokenStore: Send + Sync {
    /// Atomic upsert keyed by token. Re-registering under another user moves it.
    fn register(&self, user_id: &str, token: &str) -> Result<TokenRegistration>;

    fn list_tokens_for_user(&self, user_id: &str) -> Result<Vec<String>>;

    /// Removing an unknown token is not an error; the flag says whether a row went away.
    fn remove(&self, token: &str) -> Result<bool>;
}

impl TokenStore for Database {
    fn register(&self, user_id: &str, token: &str) -> Result<TokenRegistration> {
        self.register_device_token(user_id, token)
    }

    fn list_tokens_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        Database::list_tokens_for_user(self, user_id)
    }

    fn remove(&self, token: &str) -> Result<bool> {
        self.remove_device_token(token)
    }
}
