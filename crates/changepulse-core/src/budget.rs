//! Cooperative time budget for analyzer runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline plus a shared cancellation flag.
///
/// Analyzers poll [`Budget::is_exhausted`] between units of work and stop
/// early, keeping whatever they already computed. Clones share the flag, so
/// the orchestrator can cancel a run it has stopped waiting for. A
/// [`Budget::child`] also stops when any of its ancestors is cancelled.
///
/// A budget can also be capped by work units instead of wall time with
/// [`Budget::with_check_limit`], which makes partial runs reproducible.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use changepulse_core::Budget;
///
/// let budget = Budget::with_timeout(Duration::from_secs(30));
/// assert!(!budget.is_exhausted());
///
/// let handle = budget.clone();
/// handle.cancel();
/// assert!(budget.is_exhausted());
/// ```
#[derive(Debug, Clone)]
pub struct Budget {
    started: Instant,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
    inherited: Vec<Arc<AtomicBool>>,
    checks_left: Option<Arc<AtomicU64>>,
}

impl Budget {
    /// A budget that only ends on [`Budget::cancel`].
    pub fn unlimited() -> Self {
        Self {
            started: Instant::now(),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            inherited: Vec::new(),
            checks_left: None,
        }
    }

    /// A budget that ends `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started.checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
            inherited: Vec::new(),
            checks_left: None,
        }
    }

    /// A budget that passes `checks` calls to [`Budget::is_exhausted`] and
    /// reports exhaustion from then on.
    ///
    /// Clones and children draw from the same allowance.
    ///
    /// ```
    /// use changepulse_core::Budget;
    ///
    /// let budget = Budget::with_check_limit(2);
    /// assert!(!budget.is_exhausted());
    /// assert!(!budget.is_exhausted());
    /// assert!(budget.is_exhausted());
    /// ```
    pub fn with_check_limit(checks: u64) -> Self {
        Self {
            checks_left: Some(Arc::new(AtomicU64::new(checks))),
            ..Self::unlimited()
        }
    }

    /// A budget ending `timeout` from now or at this budget's deadline,
    /// whichever comes first.
    ///
    /// Cancelling `self` stops the child; cancelling the child leaves `self`
    /// running.
    pub fn child(&self, timeout: Duration) -> Self {
        let started = Instant::now();
        let deadline = match (self.deadline, started.checked_add(timeout)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let mut inherited = Vec::with_capacity(self.inherited.len() + 1);
        inherited.push(Arc::clone(&self.cancelled));
        inherited.extend(self.inherited.iter().cloned());
        Self {
            started,
            deadline,
            cancelled: Arc::new(AtomicBool::new(false)),
            inherited,
            checks_left: self.checks_left.clone(),
        }
    }

    /// Stop every holder of this budget at its next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// `true` once cancelled, past the deadline or out of checks.
    pub fn is_exhausted(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed)
            || self.inherited.iter().any(|flag| flag.load(Ordering::Relaxed))
        {
            return true;
        }
        if let Some(left) = &self.checks_left {
            let spent = left
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_err();
            if spent {
                return true;
            }
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Milliseconds since the budget was created.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::unlimited()
    }
}
