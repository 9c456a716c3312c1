//! Replay a recorded tab-activity trace through the time-limit tracker.

use std::fs;

use serde::Deserialize;
use serde_json::json;

use aqt_core::storage::MemoryStorage;
use aqt_core::tracker::{CycleOutcome, ManualClock, ScriptedTabs};
use aqt_core::types::{LAST_RESET_DATE_KEY, TIME_LIMITS_KEY};
use aqt_core::{DailyUsage, TimeLimitTracker, TrackerConfig};

const TRACE_TAB_ID: i32 = 1;

/// One tracker cycle: the clock reading and the focused tab at that moment.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceStep {
    pub at_minute: f64,
    pub date: String,
    /// Focused tab URL; absent when no browser window has focus
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: TraceStep,
    pub outcome: CycleOutcome,
}

pub fn load_trace(path: &str) -> Result<Vec<TraceStep>, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid trace '{}': {}", path, e))
}

/// Run every step in order and return the per-step outcomes and the final
/// usage map.
pub async fn replay(
    steps: &[TraceStep],
    limits: serde_json::Value,
    config: TrackerConfig,
) -> Result<(Vec<StepReport>, DailyUsage), String> {
    let first = steps.first().ok_or_else(|| "Trace is empty".to_string())?;

    let storage = MemoryStorage::new();
    storage.insert(TIME_LIMITS_KEY, limits);
    storage.insert(LAST_RESET_DATE_KEY, json!(first.date));

    let clock = ManualClock::new(first.at_minute * 60_000.0, &first.date);
    let tracker = TimeLimitTracker::new(storage, ScriptedTabs::new(), clock, config);
    tracker.load_state().await.map_err(|e| e.to_string())?;

    let mut reports = Vec::with_capacity(steps.len());
    for step in steps {
        tracker.clock().set(step.at_minute * 60_000.0, &step.date);
        match &step.url {
            Some(url) => tracker.host().open(TRACE_TAB_ID, url),
            None => tracker.host().set_active(None),
        }

        let outcome = tracker.run_tracking().await;
        log::debug!("t={} {:?}", step.at_minute, outcome);
        reports.push(StepReport {
            step: step.clone(),
            outcome,
        });
    }

    tracker.save_pending_data().await.map_err(|e| e.to_string())?;
    Ok((reports, tracker.usage()))
}

pub fn describe(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Busy => "busy".to_string(),
        CycleOutcome::Aborted => "aborted".to_string(),
        CycleOutcome::Untracked { tab_id: None } => "no focused tab".to_string(),
        CycleOutcome::Untracked { tab_id: Some(_) } => "untracked".to_string(),
        CycleOutcome::Tracked {
            domain,
            used_minutes,
            signal,
            ..
        } => format!("{} {:.2} min -> {}", domain, used_minutes, signal.type_tag()),
    }
}

#[cfg(test)]
mod tests {
    use aqt_core::BlockSignal;

    use super::*;

    fn step(at_minute: f64, date: &str, url: Option<&str>) -> TraceStep {
        TraceStep {
            at_minute,
            date: date.to_string(),
            url: url.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_replay_reaches_limit_and_resets() {
        let steps = vec![
            step(0.0, "2024-05-01", Some("https://www.reddit.com/")),
            step(5.0, "2024-05-01", Some("https://www.reddit.com/r/rust")),
            step(11.0, "2024-05-01", Some("https://reddit.com/")),
            step(12.0, "2024-05-02", None),
            step(13.0, "2024-05-02", Some("https://reddit.com/")),
        ];
        let limits = json!([{ "id": "1", "domain": "reddit.com", "minutes": 10 }]);

        let (reports, usage) = replay(&steps, limits, TrackerConfig::default()).await.unwrap();
        let signals: Vec<Option<BlockSignal>> = reports
            .iter()
            .map(|r| match r.outcome {
                CycleOutcome::Tracked { signal, .. } => Some(signal),
                _ => None,
            })
            .collect();
        assert_eq!(
            signals,
            vec![
                Some(BlockSignal::Hide),
                Some(BlockSignal::Hide),
                Some(BlockSignal::Show),
                None,
                Some(BlockSignal::Hide),
            ]
        );
        // Only the minute straddling midnight counts towards the new day.
        assert_eq!(usage.get("reddit.com"), Some(&1.0));
    }

    #[tokio::test]
    async fn test_empty_trace_rejected() {
        assert!(replay(&[], json!([]), TrackerConfig::default()).await.is_err());
    }

    #[test]
    fn test_trace_parses_without_url() {
        let steps: Vec<TraceStep> =
            serde_json::from_str(r#"[{ "at_minute": 1, "date": "2024-05-01" }]"#).unwrap();
        assert_eq!(steps[0].url, None);
    }
}
