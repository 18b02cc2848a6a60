//! HMAC request signing.
//!
//! Venues sign REST requests with HMAC over a canonical payload string
//! (query string, body, or a concatenation the venue defines) using the
//! account secret. The core only fixes the algorithm/encoding choices;
//! the canonical payload shape is the venue plugin's business.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{RestError, RestResult};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Output encoding for a signature digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    Hex,
    Base64,
}

/// Builds an authenticated request signature from a payload and a
/// secret key. Pure: same input, same output, no side effects.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &str, secret: &[u8]) -> RestResult<String>;
}

/// HMAC-SHA256 signer.
#[derive(Debug, Clone, Copy)]
pub struct HmacSha256Signer {
    pub encoding: SignatureEncoding,
}

impl Signer for HmacSha256Signer {
    fn sign(&self, payload: &str, secret: &[u8]) -> RestResult<String> {
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| RestError::Signature(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(encode(&mac.finalize().into_bytes(), self.encoding))
    }
}

/// HMAC-SHA512 signer.
#[derive(Debug, Clone, Copy)]
pub struct HmacSha512Signer {
    pub encoding: SignatureEncoding,
}

impl Signer for HmacSha512Signer {
    fn sign(&self, payload: &str, secret: &[u8]) -> RestResult<String> {
        let mut mac = HmacSha512::new_from_slice(secret)
            .map_err(|e| RestError::Signature(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(encode(&mac.finalize().into_bytes(), self.encoding))
    }
}

fn encode(digest: &[u8], encoding: SignatureEncoding) -> String {
    match encoding {
        SignatureEncoding::Hex => hex::encode(digest),
        SignatureEncoding::Base64 => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(digest)
        }
    }
}

/// API credentials for one venue account.
///
/// The secret is wiped from memory on drop.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    secret: Secret,
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct Secret(String);

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: Secret(secret.into()),
        }
    }

    pub fn secret(&self) -> &[u8] {
        self.secret.0.as_bytes()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret intentionally not printed.
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
    #[test]
    fn test_hmac_sha256_hex_known_vector() {
        let signer = HmacSha256Signer {
            encoding: SignatureEncoding::Hex,
        };
        let sig = signer
            .sign("what do ya want for nothing?", b"Jefe")
            .unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_sha512_hex_known_vector() {
        let signer = HmacSha512Signer {
            encoding: SignatureEncoding::Hex,
        };
        let sig = signer
            .sign("what do ya want for nothing?", b"Jefe")
            .unwrap();
        assert_eq!(
            sig,
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
             9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn test_signing_is_deterministic() {
        let signer = HmacSha256Signer {
            encoding: SignatureEncoding::Base64,
        };
        let a = signer.sign("payload", b"secret").unwrap();
        let b = signer.sign("payload", b"secret").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::new("key-id", "super-secret");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("super-secret"));
    }
}
