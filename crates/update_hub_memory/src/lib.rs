//! In-memory adapters for every update pipeline port — registry store,
//! governance oracle, signer, hash-chained audit log, distribution bus,
//! validator pool, and watchdog. Used by tests, development, and embedding
//! callers that bring their own durability.

pub mod audit;
pub mod bus;
pub mod governance;
pub mod registry;
pub mod signer;
pub mod validators;
pub mod watchdog;

pub use audit::{AuditEvent, InMemoryAuditLog};
pub use bus::{InMemoryBus, PublishedEvent};
pub use governance::PolicyTableOracle;
pub use registry::InMemoryRegistry;
pub use signer::KeyedSigner;
pub use validators::standard_pool;
pub use watchdog::{RecordingWatchdog, WatchRegistration};
