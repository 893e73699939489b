//! Push-notification fan-out: token storage seam, the FCM transport, the
//! per-user dispatcher and the reconciler that prunes dead tokens.

pub mod config;
pub mod dispatcher;
pub mod fcm;
pub mod reconciler;
pub mod store;
pub mod transport;

pub use config::{FcmCredentials, PushConfig};
pub use dispatcher::NotificationDispatcher;
pub use fcm::FcmTransport;
pub use reconciler::{ReconcileReport, Reconciler, TokenResult};
pub use store::TokenStore;
pub use transport::{DeliveryError, DeliveryOutcome, DisabledTransport, PushMessage, PushTransport, TransportError};

use sha2::{Digest, Sha256};

/// Short stable identifier for a push token, safe to put in logs.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = token_fingerprint("device-token-a");
        assert_eq!(a.len(), 12);
        assert_eq!(a, token_fingerprint("device-token-a"));
        assert_ne!(a, token_fingerprint("device-token-b"));
    }
}
