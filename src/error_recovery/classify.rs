// =============================================================================
// Fault classification — category and severity inference
// =============================================================================
//
// The error chain is walked first for concrete source types (socket errors,
// timeouts, websocket and JSON failures).  When nothing recognisable is found
// the rendered message is matched against keyword lists, checked in a fixed
// order so that e.g. "order rejected: connection reset" stays an execution
// fault.
// =============================================================================

use std::io::ErrorKind;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    /// Broker- and order-adjacent faults, closest to money movement.
    Execution,
    DataFeed,
    Database,
    Validation,
    System,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::Network,
        ErrorCategory::Execution,
        ErrorCategory::DataFeed,
        ErrorCategory::Database,
        ErrorCategory::Validation,
        ErrorCategory::System,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Execution => "execution",
            ErrorCategory::DataFeed => "data_feed",
            ErrorCategory::Database => "database",
            ErrorCategory::Validation => "validation",
            ErrorCategory::System => "system",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Severity used when the caller does not supply one and the message
    /// carries no escalation keyword.
    pub fn default_severity(&self) -> ErrorSeverity {
        match self {
            ErrorCategory::Execution | ErrorCategory::System => ErrorSeverity::High,
            ErrorCategory::Network
            | ErrorCategory::DataFeed
            | ErrorCategory::Database
            | ErrorCategory::Unknown => ErrorSeverity::Medium,
            ErrorCategory::Validation => ErrorSeverity::Low,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const EXECUTION_KEYWORDS: &[&str] = &[
    "order",
    "broker",
    "execution",
    "position",
    "margin",
    "insufficient funds",
    "rejected",
];
const DATABASE_KEYWORDS: &[&str] = &["database", "sql", "query", "deadlock", "db "];
const VALIDATION_KEYWORDS: &[&str] = &[
    "invalid",
    "validation",
    "missing field",
    "required",
    "must be",
    "out of range",
];
const DATA_FEED_KEYWORDS: &[&str] = &[
    "tick",
    "feed",
    "market data",
    "quote",
    "subscription",
    "subscribe",
    "normaliz",
];
const NETWORK_KEYWORDS: &[&str] = &[
    "connection",
    "connect",
    "timeout",
    "timed out",
    "network",
    "socket",
    "unreachable",
    "refused",
    "dns",
    "websocket",
];
const SYSTEM_KEYWORDS: &[&str] = &["memory", "disk", "permission", "thread", "panic", "runtime"];

const ESCALATION_KEYWORDS: &[&str] = &["fatal", "critical"];

/// Infer a category from the error chain, falling back to message keywords.
pub fn classify(err: &anyhow::Error) -> ErrorCategory {
    for cause in err.chain() {
        if let Some(category) = classify_source(cause) {
            return category;
        }
    }
    classify_message(&format!("{err:#}"))
}

fn classify_source(cause: &(dyn std::error::Error + 'static)) -> Option<ErrorCategory> {
    if cause.is::<tokio::time::error::Elapsed>() {
        return Some(ErrorCategory::Network);
    }
    if cause.is::<tokio_tungstenite::tungstenite::Error>() {
        return Some(ErrorCategory::Network);
    }
    if cause.is::<serde_json::Error>() {
        return Some(ErrorCategory::DataFeed);
    }
    if let Some(io) = cause.downcast_ref::<std::io::Error>() {
        return Some(match io.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrInUse
            | ErrorKind::AddrNotAvailable
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut => ErrorCategory::Network,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => ErrorCategory::Validation,
            _ => ErrorCategory::System,
        });
    }
    None
}

/// Keyword classification of a rendered error message.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    let table: [(&[&str], ErrorCategory); 6] = [
        (EXECUTION_KEYWORDS, ErrorCategory::Execution),
        (DATABASE_KEYWORDS, ErrorCategory::Database),
        (VALIDATION_KEYWORDS, ErrorCategory::Validation),
        (DATA_FEED_KEYWORDS, ErrorCategory::DataFeed),
        (NETWORK_KEYWORDS, ErrorCategory::Network),
        (SYSTEM_KEYWORDS, ErrorCategory::System),
    ];
    table
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, category)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

/// Category default, escalated to `Critical` on fatal/critical keywords.
pub fn determine_severity(category: ErrorCategory, message: &str) -> ErrorSeverity {
    let lower = message.to_lowercase();
    if ESCALATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ErrorSeverity::Critical
    } else {
        category.default_severity()
    }
}
