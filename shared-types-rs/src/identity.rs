// shared-types-rs/src/identity.rs
// Non-authoritative caller fingerprint used for attribution only

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Width of an identity token in hex characters
pub const IDENTITY_LEN: usize = 32;

/// Opaque fixed-width token derived from (origin address, client signature).
///
/// Equal inputs always give equal tokens. This is not a credential: anyone can
/// forge the inputs, so it is only used to group telemetry and error context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn derive(origin: &str, client_signature: &str) -> Self {
        let digest = Sha256::digest(format!("{}:{}", origin, client_signature).as_bytes());
        let mut token = hex::encode(digest);
        token.truncate(IDENTITY_LEN);
        Identity(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_deterministic_and_fixed_width() {
        let a = Identity::derive("10.0.0.1", "Mozilla/5.0");
        let b = Identity::derive("10.0.0.1", "Mozilla/5.0");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), IDENTITY_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_differs_by_input() {
        let a = Identity::derive("10.0.0.1", "curl/8.0");
        assert_ne!(a, Identity::derive("10.0.0.2", "curl/8.0"));
        assert_ne!(a, Identity::derive("10.0.0.1", "curl/8.1"));
        assert_eq!(Identity::derive("", "").as_str().len(), IDENTITY_LEN);
    }
}
