pub mod audit;
pub mod masking;

pub use audit::{AuditEntry, AuditLog, AuditOutcome};
pub use masking::SecretMasker;
