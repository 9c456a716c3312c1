//! Time-Limit Tracker
//!
//! Background-context accounting of minutes spent per domain. Each cycle
//! charges the time elapsed since the previous cycle to the domain that was
//! active then, looks at the tab that is active now, and tells that tab to
//! show or hide its block overlay.
//!
//! The tracker owns all of its state. Methods take `&self` so a run can be
//! in flight while timer and event callbacks schedule further runs; at most
//! one run executes at a time and overlapping triggers are dropped.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::Value;

use crate::config::TrackerConfig;
use crate::domain::{get_domain_from_url, today_date_string};
use crate::limits::{find_limit, is_exceeded};
use crate::storage::{coerce_date, coerce_time_limits, coerce_usage, entry, Storage, StorageChanges, StorageError, StorageMap};
use crate::types::{BlockSignal, DailyUsage, TimeLimit, DAILY_USAGE_KEY, LAST_RESET_DATE_KEY, TIME_LIMITS_KEY};

const MS_PER_MINUTE: f64 = 60_000.0;

// =============================================================================
// Host Interfaces
// =============================================================================

/// Active tab of the focused browser window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTab {
    pub id: i32,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Active tab query failed: {0}")]
    Query(String),
    #[error("Failed to signal tab {tab_id}: {reason}")]
    Delivery { tab_id: i32, reason: String },
}

/// Browser tab and window access.
#[allow(async_fn_in_trait)]
pub trait TabHost {
    /// Active tab of the last-focused window, if that window has focus.
    async fn active_tab(&self) -> Result<Option<ActiveTab>, HostError>;

    async fn send_block_signal(&self, tab_id: i32, signal: BlockSignal) -> Result<(), HostError>;
}

pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> f64;

    /// Local calendar date string.
    fn today(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64
    }

    fn today(&self) -> String {
        today_date_string()
    }
}

/// Clock driven by hand, for tests and trace replay.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: Cell<f64>,
    today: RefCell<String>,
}

impl ManualClock {
    pub fn new(now_ms: f64, today: &str) -> Self {
        Self {
            now_ms: Cell::new(now_ms),
            today: RefCell::new(today.to_string()),
        }
    }

    pub fn set(&self, now_ms: f64, today: &str) {
        self.now_ms.set(now_ms);
        *self.today.borrow_mut() = today.to_string();
    }

    pub fn advance_minutes(&self, minutes: f64) {
        self.now_ms.set(self.now_ms.get() + minutes * MS_PER_MINUTE);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now_ms.get()
    }

    fn today(&self) -> String {
        self.today.borrow().clone()
    }
}

/// [`TabHost`] with a settable active tab that records every signal sent.
#[derive(Debug, Default)]
pub struct ScriptedTabs {
    active: RefCell<Option<ActiveTab>>,
    sent: RefCell<Vec<(i32, BlockSignal)>>,
    failing: Cell<bool>,
}

impl ScriptedTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, tab: Option<ActiveTab>) {
        *self.active.borrow_mut() = tab;
    }

    /// Focus a tab showing `url`.
    pub fn open(&self, id: i32, url: &str) {
        self.set_active(Some(ActiveTab {
            id,
            url: url.to_string(),
        }));
    }

    /// Make tab queries fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn sent(&self) -> Vec<(i32, BlockSignal)> {
        self.sent.borrow().clone()
    }

    pub fn last_signal(&self) -> Option<BlockSignal> {
        self.sent.borrow().last().map(|(_, s)| *s)
    }
}

impl TabHost for ScriptedTabs {
    async fn active_tab(&self) -> Result<Option<ActiveTab>, HostError> {
        if self.failing.get() {
            return Err(HostError::Query("windows unavailable".to_string()));
        }
        Ok(self.active.borrow().clone())
    }

    async fn send_block_signal(&self, tab_id: i32, signal: BlockSignal) -> Result<(), HostError> {
        self.sent.borrow_mut().push((tab_id, signal));
        Ok(())
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Result of one tracking run.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Another run was in flight
    Busy,
    /// A storage or host call failed; the cycle was abandoned
    Aborted,
    /// Nothing to track: no focused tab, no domain, or no matching limit
    Untracked { tab_id: Option<i32> },
    Tracked {
        tab_id: i32,
        domain: String,
        used_minutes: f64,
        signal: BlockSignal,
    },
}

#[derive(Debug, Default)]
struct TrackerState {
    limits: Vec<TimeLimit>,
    usage: DailyUsage,
    last_reset_date: String,
    save_pending: bool,
    /// Bumped on every local usage change; a save only clears
    /// `save_pending` if nothing changed while it was writing.
    usage_generation: u64,
    last_tracked_at: Option<f64>,
    last_tracked_domain: Option<String>,
}

impl TrackerState {
    fn apply_elapsed(&mut self, elapsed_minutes: f64) {
        let Some(domain) = self.last_tracked_domain.as_deref() else {
            return;
        };
        if elapsed_minutes <= 0.0 {
            return;
        }
        *self.usage.entry(domain.to_string()).or_insert(0.0) += elapsed_minutes;
        self.mark_dirty();
    }

    /// Fold usage recorded under a visited domain into the limit's key.
    fn ensure_usage_key(&mut self, domain: &str, usage_key: &str) {
        if domain == usage_key {
            return;
        }
        if let Some(stray) = self.usage.remove(domain) {
            *self.usage.entry(usage_key.to_string()).or_insert(0.0) += stray;
            self.mark_dirty();
        }
    }

    fn mark_dirty(&mut self) {
        self.save_pending = true;
        self.usage_generation += 1;
    }

    fn set_cursor(&mut self, now_ms: f64, domain: Option<String>) {
        self.last_tracked_at = Some(now_ms);
        self.last_tracked_domain = domain;
    }
}

/// Minutes between the cursor and `now_ms`; zero without a cursor.
pub fn elapsed_minutes(now_ms: f64, last_tracked_at: Option<f64>) -> f64 {
    match last_tracked_at {
        Some(at) => ((now_ms - at) / MS_PER_MINUTE).max(0.0),
        None => 0.0,
    }
}

struct InFlight<'a>(&'a Cell<bool>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct TimeLimitTracker<S: Storage, H: TabHost, C: Clock> {
    storage: S,
    host: H,
    clock: C,
    config: TrackerConfig,
    state: RefCell<TrackerState>,
    in_flight: Cell<bool>,
    scheduled: Cell<bool>,
}

impl<S: Storage, H: TabHost, C: Clock> TimeLimitTracker<S, H, C> {
    pub fn new(storage: S, host: H, clock: C, config: TrackerConfig) -> Self {
        Self {
            storage,
            host,
            clock,
            config,
            state: RefCell::new(TrackerState::default()),
            in_flight: Cell::new(false),
            scheduled: Cell::new(false),
        }
    }

    /// Read limits, usage and the reset date from storage. A missing date
    /// counts as today.
    pub async fn load_state(&self) -> Result<(), StorageError> {
        let stored = self
            .storage
            .get(&[TIME_LIMITS_KEY, DAILY_USAGE_KEY, LAST_RESET_DATE_KEY])
            .await?;

        let mut state = self.state.borrow_mut();
        state.limits = coerce_time_limits(stored.get(TIME_LIMITS_KEY));
        state.usage = coerce_usage(stored.get(DAILY_USAGE_KEY));
        state.last_reset_date = coerce_date(stored.get(LAST_RESET_DATE_KEY)).unwrap_or_else(|| self.clock.today());
        info!(
            "Tracker loaded {} limit(s), {} usage entr(ies), reset date {}",
            state.limits.len(),
            state.usage.len(),
            state.last_reset_date
        );
        Ok(())
    }

    /// Clear usage when the calendar day changed. Memory is cleared before
    /// the cleared map and the new date are written together, so a batched
    /// save running meanwhile has nothing of yesterday's to write. A failed
    /// write restores the previous day's state.
    pub async fn check_date_reset(&self) -> Result<bool, StorageError> {
        let today = self.clock.today();
        if self.state.borrow().last_reset_date == today {
            return Ok(false);
        }

        let entries: StorageMap = [
            entry(DAILY_USAGE_KEY, &DailyUsage::new())?,
            entry(LAST_RESET_DATE_KEY, &today)?,
        ]
        .into_iter()
        .collect();

        let previous = {
            let mut state = self.state.borrow_mut();
            let previous = (
                std::mem::take(&mut state.usage),
                std::mem::replace(&mut state.last_reset_date, today.clone()),
                std::mem::replace(&mut state.save_pending, false),
            );
            state.usage_generation += 1;
            previous
        };

        if let Err(e) = self.storage.set(entries).await {
            let mut state = self.state.borrow_mut();
            let (usage, date, pending) = previous;
            state.usage = usage;
            state.last_reset_date = date;
            state.save_pending = pending;
            state.usage_generation += 1;
            return Err(e);
        }

        info!("New day {} (was {}), daily usage reset", today, previous.1);
        Ok(true)
    }

    /// One tracking cycle. Returns [`CycleOutcome::Busy`] without doing
    /// anything if a run is already in flight.
    pub async fn run_tracking(&self) -> CycleOutcome {
        if self.in_flight.replace(true) {
            debug!("Tracking already in flight, trigger dropped");
            return CycleOutcome::Busy;
        }
        let _guard = InFlight(&self.in_flight);
        self.track_active_tab().await
    }

    async fn track_active_tab(&self) -> CycleOutcome {
        if let Err(e) = self.check_date_reset().await {
            error!("Daily reset failed, skipping cycle: {}", e);
            return CycleOutcome::Aborted;
        }

        let now = self.clock.now_ms();
        {
            let mut state = self.state.borrow_mut();
            let elapsed = elapsed_minutes(now, state.last_tracked_at);
            state.apply_elapsed(elapsed);
        }

        let tab = match self.host.active_tab().await {
            Ok(Some(tab)) => tab,
            Ok(None) => {
                self.state.borrow_mut().set_cursor(now, None);
                return CycleOutcome::Untracked { tab_id: None };
            }
            Err(e) => {
                // Elapsed time is already charged; stop counting until the
                // next successful query.
                error!("Tracking cycle aborted: {}", e);
                self.state.borrow_mut().set_cursor(now, None);
                return CycleOutcome::Aborted;
            }
        };

        let Some(domain) = get_domain_from_url(&tab.url) else {
            self.state.borrow_mut().set_cursor(now, None);
            return CycleOutcome::Untracked { tab_id: Some(tab.id) };
        };

        let tracked = {
            let mut state = self.state.borrow_mut();
            match find_limit(&state.limits, &domain).cloned() {
                Some(limit) => {
                    state.ensure_usage_key(&domain, &limit.domain);
                    let used = state.usage.get(&limit.domain).copied().unwrap_or(0.0);
                    state.set_cursor(now, Some(limit.domain.clone()));
                    Some((limit, used))
                }
                None => {
                    state.set_cursor(now, None);
                    None
                }
            }
        };

        match tracked {
            Some((limit, used)) => {
                let signal = BlockSignal::from_exceeded(is_exceeded(used, &limit));
                debug!("{}: {:.2}/{} min, sending {}", limit.domain, used, limit.minutes, signal.type_tag());
                self.signal(tab.id, signal).await;
                CycleOutcome::Tracked {
                    tab_id: tab.id,
                    domain: limit.domain,
                    used_minutes: used,
                    signal,
                }
            }
            None => {
                self.signal(tab.id, BlockSignal::Hide).await;
                CycleOutcome::Untracked { tab_id: Some(tab.id) }
            }
        }
    }

    async fn signal(&self, tab_id: i32, signal: BlockSignal) {
        // Tabs without the content script reject messages.
        if let Err(e) = self.host.send_block_signal(tab_id, signal).await {
            debug!("{}", e);
        }
    }

    /// Request a run after the trigger debounce. Returns `true` if the
    /// caller should arm a timer; `false` if one is already pending.
    pub fn schedule_tracking(&self) -> bool {
        !self.scheduled.replace(true)
    }

    /// The debounce timer fired; run the pending cycle.
    pub async fn run_scheduled(&self) -> CycleOutcome {
        self.scheduled.set(false);
        self.run_tracking().await
    }

    /// Persist usage if it changed since the last save.
    pub async fn save_pending_data(&self) -> Result<bool, StorageError> {
        let (usage, generation) = {
            let state = self.state.borrow();
            if !state.save_pending {
                return Ok(false);
            }
            (state.usage.clone(), state.usage_generation)
        };

        let entries: StorageMap = [entry(DAILY_USAGE_KEY, &usage)?].into_iter().collect();
        self.storage.set(entries).await?;

        let mut state = self.state.borrow_mut();
        if state.usage_generation == generation {
            state.save_pending = false;
        } else {
            debug!("Usage changed during save, keeping it pending");
        }
        debug!("Saved usage for {} domain(s)", usage.len());
        Ok(true)
    }

    /// Apply a storage-change notification from another context. External
    /// usage edits are ignored while our own save is pending.
    pub fn on_storage_changed(&self, changes: &StorageChanges) {
        let mut state = self.state.borrow_mut();
        if let Some(value) = changes.get(TIME_LIMITS_KEY) {
            state.limits = coerce_time_limits(Some(value));
            debug!("Time limits updated ({} configured)", state.limits.len());
        }
        if let Some(value) = changes.get(DAILY_USAGE_KEY) {
            if state.save_pending {
                warn!("Ignoring external usage change while a save is pending");
            } else {
                state.usage = coerce_usage(non_null(value));
                state.usage_generation += 1;
            }
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracking_interval(&self) -> Duration {
        self.config.tracking_interval()
    }

    pub fn save_interval(&self) -> Duration {
        self.config.save_interval()
    }

    pub fn trigger_debounce(&self) -> Duration {
        self.config.trigger_debounce()
    }

    pub fn limits(&self) -> Vec<TimeLimit> {
        self.state.borrow().limits.clone()
    }

    pub fn usage(&self) -> DailyUsage {
        self.state.borrow().usage.clone()
    }

    pub fn last_reset_date(&self) -> String {
        self.state.borrow().last_reset_date.clone()
    }

    pub fn is_save_pending(&self) -> bool {
        self.state.borrow().save_pending
    }

    /// Domain the next cycle will charge elapsed time to.
    pub fn tracked_domain(&self) -> Option<String> {
        self.state.borrow().last_tracked_domain.clone()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

fn non_null(value: &Value) -> Option<&Value> {
    (!value.is_null()).then_some(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryStorage;

    type TestTracker = TimeLimitTracker<MemoryStorage, ScriptedTabs, ManualClock>;

    const DAY_ONE: &str = "2024-05-01";
    const DAY_TWO: &str = "2024-05-02";

    fn tracker_with(storage: MemoryStorage) -> TestTracker {
        TimeLimitTracker::new(
            storage,
            ScriptedTabs::new(),
            ManualClock::new(0.0, DAY_ONE),
            TrackerConfig::default(),
        )
    }

    fn reddit_storage() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.insert(TIME_LIMITS_KEY, json!([{ "id": "1", "domain": "reddit.com", "minutes": 10 }]));
        storage.insert(LAST_RESET_DATE_KEY, json!(DAY_ONE));
        storage
    }

    #[test]
    fn test_elapsed_minutes() {
        assert_eq!(elapsed_minutes(120_000.0, None), 0.0);
        assert_eq!(elapsed_minutes(120_000.0, Some(0.0)), 2.0);
        assert_eq!(elapsed_minutes(0.0, Some(60_000.0)), 0.0);
    }

    #[tokio::test]
    async fn test_limit_exceeded_then_daily_reset() {
        let tracker = tracker_with(reddit_storage());
        tracker.load_state().await.unwrap();
        tracker.host().open(7, "https://www.reddit.com/r/rust");

        let first = tracker.run_tracking().await;
        assert!(matches!(first, CycleOutcome::Tracked { signal: BlockSignal::Hide, .. }));

        tracker.clock().advance_minutes(5.0);
        tracker.run_tracking().await;
        assert_eq!(tracker.host().last_signal(), Some(BlockSignal::Hide));

        tracker.clock().advance_minutes(6.0);
        let third = tracker.run_tracking().await;
        assert_eq!(
            third,
            CycleOutcome::Tracked {
                tab_id: 7,
                domain: "reddit.com".to_string(),
                used_minutes: 11.0,
                signal: BlockSignal::Show,
            }
        );

        tracker.clock().set(tracker.clock().now_ms() + MS_PER_MINUTE, DAY_TWO);
        tracker.run_tracking().await;
        assert_eq!(tracker.host().last_signal(), Some(BlockSignal::Hide));
        assert_eq!(tracker.usage().get("reddit.com"), Some(&1.0));
        assert_eq!(tracker.host().sent().len(), 4);
    }

    #[tokio::test]
    async fn test_reset_once_per_day() {
        let storage = MemoryStorage::new();
        storage.insert(DAILY_USAGE_KEY, json!({ "reddit.com": 42 }));
        storage.insert(LAST_RESET_DATE_KEY, json!(DAY_ONE));
        let tracker = tracker_with(storage);
        tracker.load_state().await.unwrap();
        tracker.clock().set(0.0, DAY_TWO);

        tracker.run_tracking().await;
        assert!(tracker.usage().is_empty());
        assert_eq!(tracker.storage().value(DAILY_USAGE_KEY), Some(json!({})));
        assert_eq!(tracker.storage().value(LAST_RESET_DATE_KEY), Some(json!(DAY_TWO)));
        assert_eq!(tracker.storage().write_count(), 1);

        tracker.run_tracking().await;
        assert_eq!(tracker.storage().write_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_date_counts_as_today() {
        let tracker = tracker_with(MemoryStorage::new());
        tracker.load_state().await.unwrap();
        assert_eq!(tracker.last_reset_date(), DAY_ONE);
        assert!(!tracker.check_date_reset().await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_failure_leaves_state_unchanged() {
        let storage = MemoryStorage::new();
        storage.insert(DAILY_USAGE_KEY, json!({ "reddit.com": 3 }));
        storage.insert(LAST_RESET_DATE_KEY, json!(DAY_ONE));
        let tracker = tracker_with(storage);
        tracker.load_state().await.unwrap();

        tracker.clock().set(0.0, DAY_TWO);
        tracker.storage().set_failing(true);
        assert_eq!(tracker.run_tracking().await, CycleOutcome::Aborted);
        assert_eq!(tracker.usage().get("reddit.com"), Some(&3.0));
        assert_eq!(tracker.last_reset_date(), DAY_ONE);

        tracker.storage().set_failing(false);
        tracker.run_tracking().await;
        assert!(tracker.usage().is_empty());
        assert_eq!(tracker.last_reset_date(), DAY_TWO);
    }

    #[tokio::test]
    async fn test_load_failure_is_reported() {
        let storage = MemoryStorage::new();
        storage.set_failing(true);
        let tracker = tracker_with(storage);
        assert!(tracker.load_state().await.is_err());
        assert!(tracker.limits().is_empty());
    }

    #[tokio::test]
    async fn test_subdomain_usage_migrated_to_limit_key() {
        let storage = reddit_storage();
        storage.insert(DAILY_USAGE_KEY, json!({ "old.reddit.com": 4, "reddit.com": 2 }));
        let tracker = tracker_with(storage);
        tracker.load_state().await.unwrap();
        tracker.host().open(1, "https://old.reddit.com/");

        let outcome = tracker.run_tracking().await;
        assert!(matches!(outcome, CycleOutcome::Tracked { used_minutes, .. } if used_minutes == 6.0));
        let usage = tracker.usage();
        assert_eq!(usage.get("reddit.com"), Some(&6.0));
        assert!(!usage.contains_key("old.reddit.com"));
        assert!(tracker.is_save_pending());
    }

    #[tokio::test]
    async fn test_unlimited_domain_hides_and_stops_counting() {
        let tracker = tracker_with(reddit_storage());
        tracker.load_state().await.unwrap();
        tracker.host().open(3, "https://reddit.com/");
        tracker.run_tracking().await;

        tracker.host().open(4, "https://example.org/");
        tracker.clock().advance_minutes(2.0);
        assert_eq!(tracker.run_tracking().await, CycleOutcome::Untracked { tab_id: Some(4) });
        assert_eq!(tracker.host().sent().last(), Some(&(4, BlockSignal::Hide)));
        assert_eq!(tracker.tracked_domain(), None);

        // Time spent on the unlimited site is not charged to reddit.
        tracker.clock().advance_minutes(30.0);
        tracker.run_tracking().await;
        assert_eq!(tracker.usage().get("reddit.com"), Some(&2.0));
    }

    #[tokio::test]
    async fn test_no_focused_tab_sends_nothing() {
        let tracker = tracker_with(reddit_storage());
        tracker.load_state().await.unwrap();
        assert_eq!(tracker.run_tracking().await, CycleOutcome::Untracked { tab_id: None });
        assert!(tracker.host().sent().is_empty());

        tracker.host().open(2, "about:blank");
        assert_eq!(tracker.run_tracking().await, CycleOutcome::Untracked { tab_id: Some(2) });
        assert!(tracker.host().sent().is_empty());
    }

    #[tokio::test]
    async fn test_host_failure_aborts_cycle() {
        let tracker = tracker_with(reddit_storage());
        tracker.load_state().await.unwrap();
        tracker.host().open(1, "https://reddit.com/");
        tracker.run_tracking().await;

        tracker.host().set_failing(true);
        tracker.clock().advance_minutes(1.0);
        assert_eq!(tracker.run_tracking().await, CycleOutcome::Aborted);
        assert_eq!(tracker.usage().get("reddit.com"), Some(&1.0));

        tracker.host().set_failing(false);
        tracker.clock().advance_minutes(1.0);
        tracker.run_tracking().await;
        assert_eq!(tracker.usage().get("reddit.com"), Some(&1.0));
    }

    #[tokio::test]
    async fn test_save_pending_batches_writes() {
        let tracker = tracker_with(reddit_storage());
        tracker.load_state().await.unwrap();
        assert!(!tracker.save_pending_data().await.unwrap());

        tracker.host().open(1, "https://reddit.com/");
        tracker.run_tracking().await;
        tracker.clock().advance_minutes(0.5);
        tracker.run_tracking().await;
        tracker.clock().advance_minutes(0.5);
        tracker.run_tracking().await;
        assert_eq!(tracker.storage().write_count(), 0);

        assert!(tracker.save_pending_data().await.unwrap());
        assert_eq!(tracker.storage().value(DAILY_USAGE_KEY), Some(json!({ "reddit.com": 1.0 })));
        assert!(!tracker.is_save_pending());
        assert!(!tracker.save_pending_data().await.unwrap());
        assert_eq!(tracker.storage().write_count(), 1);
    }

    #[tokio::test]
    async fn test_storage_changes() {
        let tracker = tracker_with(reddit_storage());
        tracker.load_state().await.unwrap();

        let mut changes = StorageChanges::new();
        changes.insert(
            TIME_LIMITS_KEY.to_string(),
            json!([{ "id": "2", "domain": "www.X.com", "minutes": 5 }]),
        );
        changes.insert(DAILY_USAGE_KEY.to_string(), json!({ "x.com": 1 }));
        tracker.on_storage_changed(&changes);
        assert_eq!(tracker.limits()[0].domain, "x.com");
        assert_eq!(tracker.usage().get("x.com"), Some(&1.0));

        // Pending local minutes win over an external usage write.
        tracker.host().open(1, "https://x.com/");
        tracker.run_tracking().await;
        tracker.clock().advance_minutes(2.0);
        tracker.run_tracking().await;
        let mut changes = StorageChanges::new();
        changes.insert(DAILY_USAGE_KEY.to_string(), Value::Null);
        tracker.on_storage_changed(&changes);
        assert_eq!(tracker.usage().get("x.com"), Some(&3.0));

        tracker.save_pending_data().await.unwrap();
        tracker.on_storage_changed(&changes);
        assert!(tracker.usage().is_empty());
    }

    /// Yields once per query so a second run can start mid-cycle.
    struct SlowTabs(ScriptedTabs);

    impl TabHost for SlowTabs {
        async fn active_tab(&self) -> Result<Option<ActiveTab>, HostError> {
            tokio::task::yield_now().await;
            self.0.active_tab().await
        }

        async fn send_block_signal(&self, tab_id: i32, signal: BlockSignal) -> Result<(), HostError> {
            self.0.send_block_signal(tab_id, signal).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_runs_are_dropped() {
        let tracker = TimeLimitTracker::new(
            reddit_storage(),
            SlowTabs(ScriptedTabs::new()),
            ManualClock::new(0.0, DAY_ONE),
            TrackerConfig::default(),
        );
        tracker.load_state().await.unwrap();
        tracker.host().0.open(1, "https://reddit.com/");

        let (a, b) = tokio::join!(tracker.run_tracking(), tracker.run_tracking());
        assert!(matches!(a, CycleOutcome::Tracked { .. }));
        assert_eq!(b, CycleOutcome::Busy);
        assert!(matches!(tracker.run_tracking().await, CycleOutcome::Tracked { .. }));
    }

    /// Yields once per write so other work can run while it is in flight.
    struct SlowStorage(MemoryStorage);

    impl Storage for SlowStorage {
        async fn get(&self, keys: &[&str]) -> Result<StorageMap, StorageError> {
            self.0.get(keys).await
        }

        async fn set(&self, entries: StorageMap) -> Result<(), StorageError> {
            tokio::task::yield_now().await;
            self.0.set(entries).await
        }
    }

    fn slow_tracker() -> TimeLimitTracker<SlowStorage, ScriptedTabs, ManualClock> {
        TimeLimitTracker::new(
            SlowStorage(reddit_storage()),
            ScriptedTabs::new(),
            ManualClock::new(0.0, DAY_ONE),
            TrackerConfig::default(),
        )
    }

    fn usage_change(value: Value) -> StorageChanges {
        let mut changes = StorageChanges::new();
        changes.insert(DAILY_USAGE_KEY.to_string(), value);
        changes
    }

    #[tokio::test]
    async fn test_save_during_reset_keeps_new_day_clean() {
        let tracker = slow_tracker();
        tracker.load_state().await.unwrap();
        tracker.host().open(1, "https://reddit.com/");
        tracker.run_tracking().await;
        tracker.clock().advance_minutes(9.0);
        tracker.run_tracking().await;
        assert!(tracker.is_save_pending());

        tracker.clock().set(10.0 * MS_PER_MINUTE, DAY_TWO);
        let (_, saved) = tokio::join!(tracker.run_tracking(), tracker.save_pending_data());
        assert!(!saved.unwrap());

        let stored = &tracker.storage().0;
        assert_eq!(stored.value(DAILY_USAGE_KEY), Some(json!({})));
        assert_eq!(stored.value(LAST_RESET_DATE_KEY), Some(json!(DAY_TWO)));

        // The echo of the reset write does not bring yesterday back.
        tracker.on_storage_changed(&usage_change(json!({})));
        assert_eq!(tracker.usage().get("reddit.com"), Some(&1.0));
        assert_eq!(tracker.last_reset_date(), DAY_TWO);
    }

    #[tokio::test]
    async fn test_minutes_added_during_save_stay_pending() {
        let tracker = slow_tracker();
        tracker.load_state().await.unwrap();
        tracker.host().open(1, "https://reddit.com/");
        tracker.run_tracking().await;
        tracker.clock().advance_minutes(5.0);
        tracker.run_tracking().await;

        tracker.clock().advance_minutes(4.0);
        let (saved, _) = tokio::join!(tracker.save_pending_data(), tracker.run_tracking());
        assert!(saved.unwrap());
        assert_eq!(tracker.storage().0.value(DAILY_USAGE_KEY), Some(json!({ "reddit.com": 5.0 })));
        assert!(tracker.is_save_pending());

        tracker.on_storage_changed(&usage_change(json!({ "reddit.com": 5.0 })));
        assert_eq!(tracker.usage().get("reddit.com"), Some(&9.0));

        assert!(tracker.save_pending_data().await.unwrap());
        assert!(!tracker.is_save_pending());
        assert_eq!(tracker.storage().0.value(DAILY_USAGE_KEY), Some(json!({ "reddit.com": 9.0 })));
    }

    #[tokio::test]
    async fn test_schedule_collapses_triggers() {
        let tracker = tracker_with(reddit_storage());
        tracker.load_state().await.unwrap();
        assert!(tracker.schedule_tracking());
        assert!(!tracker.schedule_tracking());
        assert!(!tracker.schedule_tracking());

        tracker.run_scheduled().await;
        assert!(tracker.schedule_tracking());
        assert_eq!(tracker.trigger_debounce(), Duration::from_millis(250));
    }
}
