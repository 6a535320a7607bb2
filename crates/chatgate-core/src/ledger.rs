use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use time::macros::time;
use time::{Duration, OffsetDateTime};
use tracing::warn;

use crate::fingerprint::FingerprintId;

/// One logical ledger per anonymous client, persisted in two independent
/// slots for tamper detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLedger {
    pub count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub reset_at: OffsetDateTime,
    pub fingerprint: String,
    #[serde(with = "time::serde::rfc3339")]
    pub session_start: OffsetDateTime,
}

impl UsageLedger {
    pub fn fresh(fingerprint: &FingerprintId, now: OffsetDateTime) -> Self {
        Self {
            count: 0,
            reset_at: next_reset(now),
            fingerprint: fingerprint.as_str().to_string(),
            session_start: now,
        }
    }
}

/// The next 02:00 boundary strictly after `now`, in `now`'s own offset.
pub fn next_reset(now: OffsetDateTime) -> OffsetDateTime {
    let boundary = now.replace_time(time!(2:00));
    if boundary > now {
        boundary
    } else {
        boundary + Duration::days(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Primary,
    Mirror,
}

const SLOTS: [Slot; 2] = [Slot::Primary, Slot::Mirror];

/// Two-slot key-value persistence behind one interface, so reconciliation
/// is testable without a real browser storage backend.
pub trait SlotStore: Send + Sync {
    fn read(&self, fingerprint: &str, slot: Slot) -> Option<String>;
    fn write(&self, fingerprint: &str, slot: Slot, value: &str);
}

#[derive(Default)]
pub struct MemorySlotStore {
    inner: RwLock<HashMap<(String, Slot), String>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStore for MemorySlotStore {
    fn read(&self, fingerprint: &str, slot: Slot) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(fingerprint.to_string(), slot))
            .cloned()
    }

    fn write(&self, fingerprint: &str, slot: Slot, value: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((fingerprint.to_string(), slot), value.to_string());
    }
}

#[derive(Clone)]
pub struct LedgerBook {
    store: Arc<dyn SlotStore>,
}

impl LedgerBook {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }

    /// Reads both slots, reconciles toward the larger count and applies the
    /// lazy daily reset. The slots are rewritten only when the stored state
    /// needed repair, so a settled load costs no writes.
    pub fn load(&self, fingerprint: &FingerprintId, now: OffsetDateTime) -> UsageLedger {
        let key = fingerprint.as_str();
        let mut candidates: Vec<UsageLedger> = Vec::with_capacity(SLOTS.len());
        for slot in SLOTS {
            let Some(raw) = self.store.read(key, slot) else { continue };
            match serde_json::from_str::<UsageLedger>(&raw) {
                Ok(ledger) if fingerprint.matches_stored(&ledger.fingerprint) => {
                    candidates.push(ledger);
                }
                Ok(_) => {
                    warn!(fingerprint = key, ?slot, "ledger fingerprint mismatch, discarding");
                }
                Err(err) => {
                    warn!(fingerprint = key, ?slot, error = %err, "unreadable ledger slot");
                }
            }
        }

        if candidates.len() == 2 && candidates[0].count != candidates[1].count {
            // Fail-safe toward stricter limiting, never toward leniency.
            warn!(
                fingerprint = key,
                primary = candidates[0].count,
                mirror = candidates[1].count,
                "ledger slots disagree, keeping larger count"
            );
        }
        let mut dirty = candidates.len() < SLOTS.len()
            || candidates[0] != candidates[1];
        let mut ledger = candidates
            .into_iter()
            .max_by_key(|ledger| ledger.count)
            .unwrap_or_else(|| UsageLedger::fresh(fingerprint, now));

        if now >= ledger.reset_at {
            ledger = UsageLedger::fresh(fingerprint, now);
            dirty = true;
        }

        if dirty {
            self.write_both(key, &ledger);
        }
        ledger
    }

    /// Increments the count and rewrites both slots. The daily limit is
    /// enforced by the quota gate before this is called.
    pub fn record(&self, fingerprint: &FingerprintId, now: OffsetDateTime) -> UsageLedger {
        let mut ledger = self.load(fingerprint, now);
        ledger.count += 1;
        self.write_both(fingerprint.as_str(), &ledger);
        ledger
    }

    fn write_both(&self, key: &str, ledger: &UsageLedger) {
        match serde_json::to_string(ledger) {
            Ok(raw) => {
                for slot in SLOTS {
                    self.store.write(key, slot, &raw);
                }
            }
            Err(err) => warn!(fingerprint = key, error = %err, "ledger encode failed"),
        }
    }
}
