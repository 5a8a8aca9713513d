//! Unified update pipeline — the single mandatory path for every
//! system-altering change: schema migrations, behavioral code modules,
//! remediation playbooks, configuration values, and metric definitions.
//!
//! Each update flows through eight ordered stages — governance check,
//! signing, proposal logging, validation, packaging, distribution,
//! completion logging, watchdog registration — with explicit failure states
//! for policy rejection and infrastructure exhaustion, and a rollback path
//! that is itself a fully governed pipeline run.
//!
//! External collaborators (governance oracle, signer, audit log, validator
//! pool, distribution bus, anomaly watchdog, registry store) are consumed
//! through the port traits in [`ports`]; `update_hub_memory` provides
//! in-process adapters.

pub mod applied;
pub mod canonical;
pub mod codes;
pub mod config;
pub mod error;
pub mod metrics;
mod orchestrator;
pub mod package;
pub mod ports;
pub mod service;
pub mod types;

pub use config::PipelineConfig;
pub use error::HubError;
pub use ports::{
    AnomalyWatchdog, AuditLog, DistributionBus, GovernanceOracle, RegistryStore, Signer,
    UpdateValidator, ValidatorPool,
};
pub use service::UpdatePipeline;
pub use types::{
    Diagnostic, DiagnosticSeverity, FailureInfo, GovernanceDecision, GovernanceVerdict,
    ListFilter, Package, RegistryStats, RiskLevel, RollbackStep, SignatureEnvelope, StageCommit,
    StatusEntry, UpdateDescriptor, UpdateKind, UpdateRecord, UpdateStatus, UpdateView,
    ValidationOutcome,
};
