pub mod backend;
pub mod fingerprint;
pub mod flight;
pub mod ledger;
pub mod orchestrator;
pub mod quota;
pub mod router;
pub mod session;
pub mod write;

pub use backend::{ChatBackend, ChatRequest, EventStream};
pub use fingerprint::{identify, ClientAttributes, FingerprintId};
pub use flight::{FlightGuard, FlightMap};
pub use ledger::{next_reset, LedgerBook, MemorySlotStore, Slot, SlotStore, UsageLedger};
pub use orchestrator::{Orchestrator, SendRequest};
pub use quota::{Identity, QuotaConfig, QuotaGate, QuotaStore, RemoteQuota};
pub use router::{ProviderRegistry, ProviderRoute, Transport};
pub use session::{AuthClient, Credential, SessionCache};
pub use write::WriteJob;
