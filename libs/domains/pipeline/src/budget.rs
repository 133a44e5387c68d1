//! Process-wide daily token budget shared by the dispatch workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use tokio::sync::watch;
use tracing::info;

use crate::metrics::PipelineMetrics;
use crate::shutdown::{is_shutdown, sleep_or_shutdown};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Tokens used today against a daily ceiling.
///
/// Only `fetch_add`, `load` and `store` touch the counter. Concurrent workers
/// may overshoot the ceiling by at most one completion each, since a worker
/// checks before calling the model and adds after.
#[derive(Debug)]
pub struct TokenBudget {
    used: AtomicU64,
    limit: u64,
    /// Bumped on every reset.
    resets: watch::Sender<u64>,
}

impl TokenBudget {
    pub fn new(limit: u64) -> Self {
        let (resets, _) = watch::channel(0);
        Self {
            used: AtomicU64::new(0),
            limit,
            resets,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    /// Record usage. Returns the new total.
    pub fn add(&self, tokens: u64) -> u64 {
        self.used.fetch_add(tokens, Ordering::SeqCst) + tokens
    }

    pub fn is_exhausted(&self) -> bool {
        self.used() >= self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    pub fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
        self.resets.send_modify(|count| *count += 1);
    }

    /// Wait until the budget has room again.
    ///
    /// Returns `false` if shutdown arrives first.
    pub async fn wait_for_reset(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut resets = self.resets.subscribe();
        loop {
            if !self.is_exhausted() {
                return true;
            }
            if is_shutdown(shutdown) {
                return false;
            }

            tokio::select! {
                _ = resets.changed() => {}
                _ = shutdown.wait_for(|stop| *stop) => return false,
            }
        }
    }
}

/// Time left until the next midnight in `now`'s time zone.
pub fn duration_until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let next = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| now.timezone().from_local_datetime(&midnight).earliest());

    match next {
        Some(next) => (next - now.clone()).to_std().unwrap_or(DAY),
        // Midnight falls in a DST gap.
        None => DAY,
    }
}

/// Zero `budget` at every local midnight until shutdown.
pub async fn run_daily_reset(
    budget: Arc<TokenBudget>,
    metrics: PipelineMetrics,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let wait = duration_until_next_midnight(&Local::now());
        if sleep_or_shutdown(wait, &mut shutdown).await {
            break;
        }
        reset_budget(&budget, &metrics);
    }
}

fn reset_budget(budget: &TokenBudget, metrics: &PipelineMetrics) {
    let used = budget.used();
    budget.reset();
    metrics.budget_used(0);
    info!(previous_usage = used, limit = budget.limit(), "Daily token budget reset");
}
