//! Client library for the Murmur API: typed requests, a session holder and
//! the unread-notification counter UIs bind to.

pub mod api;
pub mod error;
pub mod session;
pub mod unread;

pub use api::ApiClient;
pub use error::ClientError;
pub use session::Session;
pub use unread::{DEFAULT_POLL_INTERVAL, Generation, UnreadCounter, UnreadSource, UnreadState};
