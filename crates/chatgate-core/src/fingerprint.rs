use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable client attributes reported by the browser. Low entropy on
/// purpose; this is a heuristic identity, not a security boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAttributes {
    pub user_agent: String,
    pub language: String,
    pub screen: (u32, u32),
    pub timezone_offset_minutes: i32,
    pub hardware_threads: u32,
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FingerprintId(String);

impl FingerprintId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Loose identity check: exact match, or a length drift of at most two
    /// characters where the shorter value is a prefix of the longer one.
    /// Absorbs minor environment jitter without discarding history.
    pub fn matches_stored(&self, stored: &str) -> bool {
        if self.0 == stored {
            return true;
        }
        let (short, long) = if self.0.len() <= stored.len() {
            (self.0.as_str(), stored)
        } else {
            (stored, self.0.as_str())
        };
        long.len() - short.len() <= 2 && long.starts_with(short)
    }
}

impl std::fmt::Display for FingerprintId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic for a given set of attributes.
pub fn identify(attributes: &ClientAttributes) -> FingerprintId {
    let canonical = format!(
        "{}|{}|{}x{}|{}|{}|{}",
        attributes.user_agent,
        attributes.language,
        attributes.screen.0,
        attributes.screen.1,
        attributes.timezone_offset_minutes,
        attributes.hardware_threads,
        attributes.platform,
    );
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{byte:02x}"));
    }
    FingerprintId(hex)
}
