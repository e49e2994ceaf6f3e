//! Message authentication
//!
//! Every request carries an HMAC-SHA1 tag computed with the secret bound to
//! the session identity, over the command bytes prefixed with their length
//! as a big-endian `u32`. Responses are verified the same way before the
//! dispatcher looks at them.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{KineticError, Result};
use crate::protocol::AuthInfo;

type HmacSha1 = Hmac<Sha1>;

/// Signs outbound commands and verifies inbound ones
#[derive(Clone)]
pub struct Authenticator {
    identity: i64,
    key: Bytes,
}

impl Authenticator {
    pub fn new(identity: i64, key: impl Into<Bytes>) -> Self {
        Self {
            identity,
            key: key.into(),
        }
    }

    pub fn identity(&self) -> i64 {
        self.identity
    }

    /// Compute the tag for `command`
    pub fn sign(&self, command: &[u8]) -> Result<Bytes> {
        let mac = self.mac(command)?;
        Ok(Bytes::copy_from_slice(&mac.finalize().into_bytes()))
    }

    /// Auth block to attach to an outbound command
    pub fn auth_info(&self, command: &[u8]) -> Result<AuthInfo> {
        Ok(AuthInfo::Hmac {
            identity: self.identity,
            hmac: self.sign(command)?,
        })
    }

    /// Verify the identity and tag of an inbound command
    pub fn verify(&self, identity: i64, command: &[u8], tag: &[u8]) -> Result<()> {
        if identity != self.identity {
            return Err(KineticError::Authentication(format!(
                "Unexpected identity {} (session identity {})",
                identity, self.identity
            )));
        }
        self.mac(command)?
            .verify_slice(tag)
            .map_err(|_| KineticError::Authentication("HMAC mismatch".to_string()))
    }

    fn mac(&self, command: &[u8]) -> Result<HmacSha1> {
        let len = u32::try_from(command.len()).map_err(|_| {
            KineticError::Authentication(format!("Command too large to sign: {}", command.len()))
        })?;
        let mut mac = HmacSha1::new_from_slice(&self.key)
            .map_err(|e| KineticError::Authentication(format!("Invalid HMAC key: {}", e)))?;
        mac.update(&len.to_be_bytes());
        mac.update(command);
        Ok(mac)
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the key
        f.debug_struct("Authenticator")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
