// =============================================================================
// Error Handler — single chokepoint for fault bookkeeping and recovery
// =============================================================================
//
// `handle` always returns a fully populated record and never consumes the
// caller's error; propagating it afterwards is the caller's decision.
//
// Rate limiting is advisory only: a category whose error count inside the
// sliding window reaches the threshold is flagged, and callers may use that
// flag to trip their own circuit breaker.
// =============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::classify::{classify, determine_severity, ErrorCategory, ErrorSeverity};
use super::strategy::RecoveryStrategy;
use crate::runtime_config::ErrorRecoveryConfig;

const RECENT_ERRORS_IN_STATS: usize = 10;

/// Free-form causal context attached by the caller (symbol, operation, ...).
pub type ErrorContext = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: ErrorContext,
    pub timestamp: DateTime<Utc>,
    pub recovery_attempted: bool,
    pub recovery_succeeded: bool,
    pub resolved: bool,
}

impl ErrorRecord {
    pub fn new(category: ErrorCategory, severity: ErrorSeverity, message: String, context: ErrorContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            category,
            severity,
            message,
            context,
            timestamp: Utc::now(),
            recovery_attempted: false,
            recovery_succeeded: false,
            resolved: false,
        }
    }
}

/// Health of one named service, as last reported by its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub healthy: bool,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    pub by_category: BTreeMap<ErrorCategory, u64>,
    pub by_severity: BTreeMap<ErrorSeverity, u64>,
    pub rate_limited: Vec<ErrorCategory>,
    /// Most recent records, newest first.
    pub recent: Vec<ErrorRecord>,
    pub services: Vec<ServiceHealth>,
}

struct Ledger {
    records: VecDeque<ErrorRecord>,
    total: u64,
    by_category: BTreeMap<ErrorCategory, u64>,
    by_severity: BTreeMap<ErrorSeverity, u64>,
    windows: HashMap<ErrorCategory, VecDeque<Instant>>,
    rate_limited: BTreeSet<ErrorCategory>,
    services: BTreeMap<String, ServiceHealth>,
}

pub struct ErrorHandler {
    capacity: usize,
    window: Duration,
    threshold: usize,
    ledger: Mutex<Ledger>,
    strategies: RwLock<HashMap<ErrorCategory, Arc<RecoveryStrategy>>>,
}

impl ErrorHandler {
    pub fn new(config: &ErrorRecoveryConfig) -> Self {
        Self {
            capacity: config.history_capacity.max(1),
            window: Duration::from_secs(config.rate_limit_window_secs),
            threshold: config.rate_limit_threshold.max(1),
            ledger: Mutex::new(Ledger {
                records: VecDeque::new(),
                total: 0,
                by_category: BTreeMap::new(),
                by_severity: BTreeMap::new(),
                windows: HashMap::new(),
                rate_limited: BTreeSet::new(),
                services: BTreeMap::new(),
            }),
            strategies: RwLock::new(HashMap::new()),
        }
    }

    /// Classify, record and (if a strategy is registered) try to recover
    /// from `err`.  Explicit `category`/`severity` override inference.
    pub async fn handle(
        &self,
        err: &anyhow::Error,
        category: Option<ErrorCategory>,
        severity: Option<ErrorSeverity>,
        context: Option<ErrorContext>,
    ) -> ErrorRecord {
        let message = format!("{err:#}");
        let category = category.unwrap_or_else(|| classify(err));
        let severity = severity.unwrap_or_else(|| determine_severity(category, &message));
        let mut record = ErrorRecord::new(category, severity, message, context.unwrap_or_default());

        log_record(&record);
        self.store(&record);

        let strategy = self.strategies.read().get(&category).cloned();
        if let Some(strategy) = strategy {
            record.recovery_attempted = true;
            record.recovery_succeeded = strategy.execute(&record).await;
            if record.recovery_succeeded {
                info!(error_id = %record.id, strategy = strategy.name(), "error recovered");
            } else {
                warn!(error_id = %record.id, strategy = strategy.name(), "recovery failed");
            }

            let mut ledger = self.ledger.lock();
            if let Some(stored) = ledger.records.iter_mut().find(|r| r.id == record.id) {
                stored.recovery_attempted = true;
                stored.recovery_succeeded = record.recovery_succeeded;
            }
        }

        record
    }

    fn store(&self, record: &ErrorRecord) {
        let now = Instant::now();
        let mut ledger = self.ledger.lock();

        ledger.total += 1;
        *ledger.by_category.entry(record.category).or_insert(0) += 1;
        *ledger.by_severity.entry(record.severity).or_insert(0) += 1;

        ledger.records.push_back(record.clone());
        while ledger.records.len() > self.capacity {
            ledger.records.pop_front();
        }

        ledger.windows.entry(record.category).or_default().push_back(now);
        self.refresh_rate_limit(&mut ledger, record.category, now);
    }

    fn refresh_rate_limit(&self, ledger: &mut Ledger, category: ErrorCategory, now: Instant) {
        let count = match ledger.windows.get_mut(&category) {
            Some(window) => {
                while window.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
                    window.pop_front();
                }
                window.len()
            }
            None => 0,
        };

        if count >= self.threshold {
            if ledger.rate_limited.insert(category) {
                warn!(
                    category = %category,
                    count,
                    window_secs = self.window.as_secs(),
                    "error category rate limited"
                );
            }
        } else if ledger.rate_limited.remove(&category) {
            info!(category = %category, count, "error category no longer rate limited");
        }
    }

    /// Register (or replace) the strategy run for faults of `category`.
    pub fn register_recovery_strategy(&self, category: ErrorCategory, strategy: RecoveryStrategy) {
        info!(category = %category, strategy = strategy.name(), "recovery strategy registered");
        self.strategies.write().insert(category, Arc::new(strategy));
    }

    pub fn is_rate_limited(&self, category: ErrorCategory) -> bool {
        let mut ledger = self.ledger.lock();
        self.refresh_rate_limit(&mut ledger, category, Instant::now());
        ledger.rate_limited.contains(&category)
    }

    pub fn update_service_health(&self, name: &str, healthy: bool, error: Option<&str>) {
        let mut ledger = self.ledger.lock();
        let entry = ledger
            .services
            .entry(name.to_string())
            .or_insert_with(|| ServiceHealth {
                name: name.to_string(),
                healthy: true,
                error_count: 0,
                last_error: None,
                last_checked: Utc::now(),
            });

        if entry.healthy && !healthy {
            warn!(service = %name, error = ?error, "service unhealthy");
        } else if !entry.healthy && healthy {
            info!(service = %name, "service healthy again");
        }

        entry.healthy = healthy;
        if let Some(e) = error {
            entry.error_count += 1;
            entry.last_error = Some(e.to_string());
        }
        entry.last_checked = Utc::now();
    }

    pub fn get_service_health(&self, name: &str) -> Option<ServiceHealth> {
        self.ledger.lock().services.get(name).cloned()
    }

    /// Mark a stored record as resolved.  Returns `false` if the record is
    /// unknown or has already been evicted.
    pub fn resolve_error(&self, id: &str) -> bool {
        let mut ledger = self.ledger.lock();
        match ledger.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.resolved = true;
                true
            }
            None => false,
        }
    }

    pub fn get_error_stats(&self) -> ErrorStats {
        let now = Instant::now();
        let mut ledger = self.ledger.lock();
        for category in ErrorCategory::ALL {
            self.refresh_rate_limit(&mut ledger, category, now);
        }

        ErrorStats {
            total_errors: ledger.total,
            by_category: ledger.by_category.clone(),
            by_severity: ledger.by_severity.clone(),
            rate_limited: ledger.rate_limited.iter().copied().collect(),
            recent: ledger
                .records
                .iter()
                .rev()
                .take(RECENT_ERRORS_IN_STATS)
                .cloned()
                .collect(),
            services: ledger.services.values().cloned().collect(),
        }
    }

    /// Records currently retained, oldest first.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.ledger.lock().records.iter().cloned().collect()
    }
}

fn log_record(record: &ErrorRecord) {
    match record.severity {
        ErrorSeverity::Low => info!(
            error_id = %record.id,
            category = %record.category,
            severity = %record.severity,
            context = ?record.context,
            "{}", record.message
        ),
        ErrorSeverity::Medium => warn!(
            error_id = %record.id,
            category = %record.category,
            severity = %record.severity,
            context = ?record.context,
            "{}", record.message
        ),
        ErrorSeverity::High | ErrorSeverity::Critical => error!(
            error_id = %record.id,
            category = %record.category,
            severity = %record.severity,
            context = ?record.context,
            "{}", record.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_recovery::strategy::recovery_action;
    use crate::runtime_config::RetryPolicy;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handler() -> ErrorHandler {
        ErrorHandler::new(&ErrorRecoveryConfig::default())
    }

    #[tokio::test]
    async fn handle_without_strategy_returns_full_record() {
        let h = handler();
        let mut ctx = ErrorContext::new();
        ctx.insert("symbol".into(), "NIFTY".into());

        let record = h.handle(&anyhow!("order rejected"), None, None, Some(ctx)).await;
        assert_eq!(record.category, ErrorCategory::Execution);
        assert_eq!(record.severity, ErrorSeverity::High);
        assert_eq!(record.context["symbol"], "NIFTY");
        assert!(!record.recovery_attempted);
        assert!(!record.resolved);
        assert_eq!(h.records().len(), 1);
    }

    #[tokio::test]
    async fn explicit_category_and_severity_win() {
        let h = handler();
        let record = h
            .handle(
                &anyhow!("fatal order failure"),
                Some(ErrorCategory::Database),
                Some(ErrorSeverity::Low),
                None,
            )
            .await;
        assert_eq!(record.category, ErrorCategory::Database);
        assert_eq!(record.severity, ErrorSeverity::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn registered_strategy_runs_and_updates_stored_record() {
        let h = handler();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        h.register_recovery_strategy(
            ErrorCategory::DataFeed,
            RecoveryStrategy::retry(
                RetryPolicy::default(),
                recovery_action(move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            ),
        );

        let record = h.handle(&anyhow!("tick feed stalled"), None, None, None).await;
        assert!(record.recovery_attempted);
        assert!(record.recovery_succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(h.records()[0].recovery_succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_strategy_still_returns_record() {
        let h = handler();
        h.register_recovery_strategy(
            ErrorCategory::Network,
            RecoveryStrategy::retry(
                RetryPolicy::default(),
                recovery_action(|| async { Err(anyhow!("still down")) }),
            ),
        );
        let record = h.handle(&anyhow!("connection refused"), None, None, None).await;
        assert!(record.recovery_attempted);
        assert!(!record.recovery_succeeded);
        assert!(!record.resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn data_feed_recovers_after_an_exhausted_fault() {
        let h = handler();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_secs: 1.0,
            multiplier: 2.0,
            max_delay_secs: 60.0,
        };
        h.register_recovery_strategy(
            ErrorCategory::DataFeed,
            RecoveryStrategy::retry(
                policy,
                recovery_action(move || {
                    let c = c.clone();
                    async move {
                        if c.fetch_add(1, Ordering::SeqCst) < 3 {
                            Err(anyhow!("resubscribe rejected"))
                        } else {
                            Ok(())
                        }
                    }
                }),
            ),
        );

        let first = h.handle(&anyhow!("tick feed stalled"), None, None, None).await;
        assert!(first.recovery_attempted);
        assert!(!first.recovery_succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let second = h.handle(&anyhow!("tick feed stalled"), None, None, None).await;
        assert!(second.recovery_succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn eleven_errors_in_one_category_rate_limit_after_tenth() {
        let h = handler();
        for i in 0..11 {
            h.handle(&anyhow!("e{i}"), Some(ErrorCategory::Network), None, None).await;
            assert_eq!(h.is_rate_limited(ErrorCategory::Network), i >= 9, "after error {}", i + 1);
        }
        assert_eq!(h.get_error_stats().rate_limited, vec![ErrorCategory::Network]);
    }

    #[tokio::test(start_paused = true)]
    async fn eleven_errors_split_across_categories_flag_neither() {
        let h = handler();
        for i in 0..11 {
            let category = if i % 2 == 0 { ErrorCategory::Network } else { ErrorCategory::DataFeed };
            h.handle(&anyhow!("e{i}"), Some(category), None, None).await;
        }
        assert!(!h.is_rate_limited(ErrorCategory::Network));
        assert!(!h.is_rate_limited(ErrorCategory::DataFeed));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_clears_once_window_slides() {
        let h = handler();
        for _ in 0..10 {
            h.handle(&anyhow!("x"), Some(ErrorCategory::System), None, None).await;
        }
        assert!(h.is_rate_limited(ErrorCategory::System));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!h.is_rate_limited(ErrorCategory::System));
    }

    #[tokio::test]
    async fn history_evicts_oldest() {
        let config = ErrorRecoveryConfig {
            history_capacity: 3,
            ..ErrorRecoveryConfig::default()
        };
        let h = ErrorHandler::new(&config);
        for i in 0..5 {
            h.handle(&anyhow!("e{i}"), Some(ErrorCategory::Unknown), None, None).await;
        }
        let messages: Vec<String> = h.records().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);
        let stats = h.get_error_stats();
        assert_eq!(stats.total_errors, 5);
        assert_eq!(stats.by_category[&ErrorCategory::Unknown], 5);
        assert_eq!(stats.recent[0].message, "e4");
    }

    #[tokio::test]
    async fn resolve_marks_record() {
        let h = handler();
        let record = h.handle(&anyhow!("x"), None, None, None).await;
        assert!(h.resolve_error(&record.id));
        assert!(h.records()[0].resolved);
        assert!(!h.resolve_error("missing"));
    }

    #[test]
    fn service_health_only_changes_on_explicit_update() {
        let h = handler();
        assert!(h.get_service_health("vendor").is_none());

        h.update_service_health("vendor", false, Some("socket closed"));
        h.update_service_health("vendor", false, Some("socket closed again"));
        let health = h.get_service_health("vendor").unwrap();
        assert!(!health.healthy);
        assert_eq!(health.error_count, 2);
        assert_eq!(health.last_error.as_deref(), Some("socket closed again"));

        h.update_service_health("vendor", true, None);
        let health = h.get_service_health("vendor").unwrap();
        assert!(health.healthy);
        assert_eq!(health.error_count, 2);
        assert_eq!(h.get_error_stats().services.len(), 1);
    }
}
