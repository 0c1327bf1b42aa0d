pub mod classify;
pub mod handler;
pub mod strategy;

pub use classify::{ErrorCategory, ErrorSeverity};
pub use handler::{ErrorContext, ErrorHandler, ErrorRecord, ErrorStats, ServiceHealth};
pub use strategy::{recovery_action, RecoveryAction, RecoveryStrategy};
