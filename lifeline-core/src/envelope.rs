//! Authenticated-encryption envelope: AES-256-GCM seal + HMAC-SHA256 signature
//! over `data|nonce|timestamp`, plus the sealed host-string codec used by
//! cloud registries. The per-secret key is SHA-256 of the shared secret.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Wire envelope. `data` is base64(AES-256-GCM ciphertext || tag), `nonce` is
/// base64 of the 12 random bytes, `signature` is base64 of
/// HMAC-SHA256(key, "data|nonce|timestamp").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: String,
    pub nonce: String,
    pub timestamp: u64,
    pub signature: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("signature mismatch")]
    Signature,
    #[error("invalid encoding")]
    Encoding,
}

/// Fixed per-secret key: SHA-256 of the shared secret, not per-message.
pub fn derive_key(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Unix seconds now.
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn random_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn sign(key: &[u8; 32], data_b64: &str, nonce_b64: &str, timestamp: u64) -> Result<String, EnvelopeError> {
    // Qualified: `aes_gcm::aead::KeyInit` also provides `new_from_slice`.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| EnvelopeError::Key)?;
    mac.update(format!("{data_b64}|{nonce_b64}|{timestamp}").as_bytes());
    Ok(B64.encode(mac.finalize().into_bytes()))
}

/// Build an envelope with a fresh random nonce and the current timestamp.
pub fn build_envelope(plaintext: &str, secret: &str) -> Result<Envelope, EnvelopeError> {
    build_envelope_with(plaintext, secret, random_nonce(), unix_timestamp())
}

/// Deterministic construction: the same `(plaintext, secret, nonce, timestamp)`
/// always yields the same ciphertext and signature.
pub fn build_envelope_with(
    plaintext: &str,
    secret: &str,
    nonce: [u8; 12],
    timestamp: u64,
) -> Result<Envelope, EnvelopeError> {
    let key = derive_key(secret);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EnvelopeError::Key)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| EnvelopeError::Encrypt)?;
    let data = B64.encode(&ciphertext);
    let nonce_b64 = B64.encode(nonce);
    let signature = sign(&key, &data, &nonce_b64, timestamp)?;
    Ok(Envelope {
        data,
        nonce: nonce_b64,
        timestamp,
        signature,
    })
}

/// Verify the signature and decrypt. Any alteration of `data`, `nonce` or
/// `timestamp` fails verification before decryption is attempted.
pub fn open_envelope(envelope: &Envelope, secret: &str) -> Result<String, EnvelopeError> {
    let key = derive_key(secret);
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key).map_err(|_| EnvelopeError::Key)?;
    mac.update(format!("{}|{}|{}", envelope.data, envelope.nonce, envelope.timestamp).as_bytes());
    let sig = B64
        .decode(&envelope.signature)
        .map_err(|_| EnvelopeError::Encoding)?;
    mac.verify_slice(&sig).map_err(|_| EnvelopeError::Signature)?;

    let nonce = B64
        .decode(&envelope.nonce)
        .map_err(|_| EnvelopeError::Encoding)?;
    if nonce.len() != 12 {
        return Err(EnvelopeError::Encoding);
    }
    let ciphertext = B64
        .decode(&envelope.data)
        .map_err(|_| EnvelopeError::Encoding)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EnvelopeError::Key)?;
    let plain = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| EnvelopeError::Decrypt)?;
    String::from_utf8(plain).map_err(|_| EnvelopeError::Encoding)
}

/// Seal one opaque host string as carried by cloud registries and the winning
/// conf reply: base64(nonce || AES-256-GCM ciphertext).
pub fn seal_host(plain: &str, secret: &str) -> Result<String, EnvelopeError> {
    let key = derive_key(secret);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EnvelopeError::Key)?;
    let nonce = random_nonce();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
        .map_err(|_| EnvelopeError::Encrypt)?;
    let mut blob = Vec::with_capacity(12 + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(B64.encode(blob))
}

/// Unseal one registry item. Fails on bad base64, a short blob, or a bad tag.
pub fn unseal_host(blob_b64: &str, secret: &str) -> Result<String, EnvelopeError> {
    let blob = B64.decode(blob_b64.trim()).map_err(|_| EnvelopeError::Encoding)?;
    if blob.len() < 12 {
        return Err(EnvelopeError::Encoding);
    }
    let (nonce, ciphertext) = blob.split_at(12);
    let key = derive_key(secret);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EnvelopeError::Key)?;
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EnvelopeError::Decrypt)?;
    String::from_utf8(plain).map_err(|_| EnvelopeError::Encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "33d50673-ad86-4b87-bcf2-b76e7a30c9ef";

    #[test]
    fn fixed_nonce_is_reproducible() {
        let nonce = [7u8; 12];
        let a = build_envelope_with("{\"k\":1}", SECRET, nonce, 1_700_000_000).unwrap();
        let b = build_envelope_with("{\"k\":1}", SECRET, nonce, 1_700_000_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn roundtrip() {
        let env = build_envelope("{\"actionType\":\"click\"}", SECRET).unwrap();
        let plain = open_envelope(&env, SECRET).unwrap();
        assert_eq!(plain, "{\"actionType\":\"click\"}");
    }

    #[test]
    fn tampered_data_fails_signature() {
        let mut env = build_envelope("payload", SECRET).unwrap();
        env.data = B64.encode(b"forged");
        assert!(matches!(
            open_envelope(&env, SECRET),
            Err(EnvelopeError::Signature)
        ));
    }

    #[test]
    fn tampered_nonce_fails_signature() {
        let mut env = build_envelope("payload", SECRET).unwrap();
        env.nonce = B64.encode([0u8; 12]);
        assert!(matches!(
            open_envelope(&env, SECRET),
            Err(EnvelopeError::Signature)
        ));
    }

    #[test]
    fn tampered_timestamp_fails_signature() {
        let mut env = build_envelope("payload", SECRET).unwrap();
        env.timestamp += 1;
        assert!(matches!(
            open_envelope(&env, SECRET),
            Err(EnvelopeError::Signature)
        ));
    }

    #[test]
    fn wrong_secret_fails() {
        let env = build_envelope("payload", SECRET).unwrap();
        assert!(open_envelope(&env, "other-secret").is_err());
    }

    #[test]
    fn sealed_host_roundtrip() {
        let blob = seal_host("https://c.test", SECRET).unwrap();
        assert_eq!(unseal_host(&blob, SECRET).unwrap(), "https://c.test");
    }

    #[test]
    fn unseal_rejects_garbage() {
        assert!(unseal_host("not base64 ???", SECRET).is_err());
        assert!(unseal_host(&B64.encode(b"short"), SECRET).is_err());
        let blob = seal_host("https://c.test", SECRET).unwrap();
        assert!(unseal_host(&blob, "other-secret").is_err());
    }
}
