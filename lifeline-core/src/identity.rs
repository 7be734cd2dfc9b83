//! Device identity: a persisted 32-char alphanumeric device id plus a
//! visitor/request fingerprint recomputed on every process start.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Minimum length a persisted device id must have to be reused.
const MIN_DEVICE_ID_LEN: usize = 16;

/// 32 random bytes, each mapped into the 62-char alphanumeric alphabet.
pub fn generate_device_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|&b| ALPHABET[b as usize % ALPHABET.len()] as char)
        .collect()
}

/// A persisted id is reused unconditionally when it is long enough; no other
/// validation is applied.
pub fn is_usable_device_id(id: &str) -> bool {
    id.len() >= MIN_DEVICE_ID_LEN
}

/// Identity attached to every telemetry dispatch.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// Stable per-install id, persisted once and reused forever.
    pub device_id: String,
    /// Fingerprint of the running environment, recomputed each process start.
    pub visitor_id: String,
    /// Fresh per-process request id.
    pub request_id: String,
    pub platform: String,
}

impl DeviceIdentity {
    /// Build the process identity around an already-resolved device id.
    pub fn new(device_id: String) -> Self {
        Self {
            device_id,
            visitor_id: fingerprint(),
            request_id: uuid::Uuid::new_v4().to_string(),
            platform: platform().to_string(),
        }
    }
}

/// Coarse platform name carried in the `X-Platform` header.
pub fn platform() -> &'static str {
    if cfg!(target_os = "android") {
        "android"
    } else if cfg!(target_os = "ios") {
        "ios"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "other"
    }
}

/// Environment fingerprint: SHA-256 over stable platform facts. Deterministic
/// within an install, cheap to recompute at startup.
fn fingerprint() -> String {
    let exe = std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(std::env::consts::OS.as_bytes());
    hasher.update(b"|");
    hasher.update(std::env::consts::ARCH.as_bytes());
    hasher.update(b"|");
    hasher.update(exe.as_bytes());
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
