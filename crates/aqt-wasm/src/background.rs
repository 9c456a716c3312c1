//! Background context
//!
//! Drives the [`TimeLimitTracker`] from timers and tab/window events.

use std::cell::RefCell;
use std::rc::Rc;

use aqt_core::tracker::{CycleOutcome, SystemClock};
use aqt_core::{TimeLimitTracker, TrackerConfig};
use gloo_timers::callback::{Interval, Timeout};
use js_sys::Reflect;
use log::{debug, error, info};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use crate::ext::{storage_changes, ChromeStorage, ChromeTabs, Handler, Subscriptions};

type Tracker = TimeLimitTracker<ChromeStorage, ChromeTabs, SystemClock>;

struct BackgroundState {
    tracker: Tracker,
    subs: RefCell<Subscriptions>,
    intervals: RefCell<Vec<Interval>>,
    /// Debounce timer of the last trigger. It has always fired by the time
    /// the next one is armed.
    trigger_timer: RefCell<Option<Timeout>>,
}

impl BackgroundState {
    fn run(self: &Rc<Self>) {
        let state = self.clone();
        spawn_local(async move {
            log_outcome(state.tracker.run_tracking().await);
        });
    }

    /// Debounced trigger for tab and window events.
    fn trigger(self: &Rc<Self>) {
        if !self.tracker.schedule_tracking() {
            return;
        }
        let weak = Rc::downgrade(self);
        let ms = self.tracker.config().trigger_debounce_ms;
        let timer = Timeout::new(ms, move || {
            if let Some(state) = weak.upgrade() {
                spawn_local(async move {
                    log_outcome(state.tracker.run_scheduled().await);
                });
            }
        });
        *self.trigger_timer.borrow_mut() = Some(timer);
    }

    fn save(self: &Rc<Self>) {
        let state = self.clone();
        spawn_local(async move {
            if let Err(e) = state.tracker.save_pending_data().await {
                error!("Failed to save usage: {}", e);
            }
        });
    }

    fn every(self: &Rc<Self>, ms: u32, f: fn(&Rc<Self>)) {
        let weak = Rc::downgrade(self);
        let interval = Interval::new(ms, move || {
            if let Some(state) = weak.upgrade() {
                f(&state);
            }
        });
        self.intervals.borrow_mut().push(interval);
    }

    fn subscribe(self: &Rc<Self>) -> Result<(), JsValue> {
        let mut subs = self.subs.borrow_mut();

        let weak = Rc::downgrade(self);
        subs.chrome(
            &["storage", "onChanged"],
            Handler::two(move |changes: JsValue, area: JsValue| {
                if area.as_string().as_deref() != Some("local") {
                    return;
                }
                if let Some(state) = weak.upgrade() {
                    state.tracker.on_storage_changed(&storage_changes(&changes));
                }
            }),
        )?;

        let weak = Rc::downgrade(self);
        subs.chrome(
            &["tabs", "onActivated"],
            Handler::one(move |_| {
                if let Some(state) = weak.upgrade() {
                    state.trigger();
                }
            }),
        )?;

        let weak = Rc::downgrade(self);
        subs.chrome(
            &["tabs", "onUpdated"],
            Handler::two(move |_tab_id: JsValue, change: JsValue| {
                if is_relevant_update(&change) {
                    if let Some(state) = weak.upgrade() {
                        state.trigger();
                    }
                }
            }),
        )?;

        let weak = Rc::downgrade(self);
        subs.chrome(
            &["windows", "onFocusChanged"],
            Handler::one(move |_| {
                if let Some(state) = weak.upgrade() {
                    state.trigger();
                }
            }),
        )?;
        Ok(())
    }

    fn stop(&self) {
        self.subs.borrow_mut().clear();
        // Dropping a timer cancels it.
        self.intervals.borrow_mut().clear();
        self.trigger_timer.borrow_mut().take();
    }
}

/// A finished load or a URL change can move the active tab to another
/// domain.
fn is_relevant_update(change: &JsValue) -> bool {
    let status = Reflect::get(change, &"status".into()).ok().and_then(|v| v.as_string());
    let url = Reflect::get(change, &"url".into()).ok().and_then(|v| v.as_string());
    status.as_deref() == Some("complete") || url.is_some_and(|u| !u.is_empty())
}

fn log_outcome(outcome: CycleOutcome) {
    match outcome {
        CycleOutcome::Tracked {
            domain, used_minutes, signal, ..
        } => debug!("Tracked {} at {:.2} min ({})", domain, used_minutes, signal.type_tag()),
        other => debug!("Tracking cycle: {:?}", other),
    }
}

/// Entry point for the background service worker.
#[wasm_bindgen]
pub struct BackgroundApp {
    state: Rc<BackgroundState>,
}

#[wasm_bindgen]
impl BackgroundApp {
    #[wasm_bindgen(constructor)]
    pub fn new() -> BackgroundApp {
        BackgroundApp {
            state: Rc::new(BackgroundState {
                tracker: TimeLimitTracker::new(ChromeStorage, ChromeTabs, SystemClock, TrackerConfig::default()),
                subs: RefCell::new(Subscriptions::default()),
                intervals: RefCell::new(Vec::new()),
                trigger_timer: RefCell::new(None),
            }),
        }
    }

    /// Subscribe to tab events, load state, run once and start the tracking
    /// and save loops.
    pub fn start(&self) -> js_sys::Promise {
        let state = self.state.clone();
        future_to_promise(async move {
            state.subscribe()?;
            state
                .tracker
                .load_state()
                .await
                .map_err(|e| JsValue::from_str(&e.to_string()))?;

            log_outcome(state.tracker.run_tracking().await);
            let config = state.tracker.config().clone();
            state.every(config.tracking_interval_ms, BackgroundState::run);
            state.every(config.save_interval_ms, BackgroundState::save);
            info!(
                "Background tracker started ({} ms tracking, {} ms save)",
                config.tracking_interval_ms, config.save_interval_ms
            );
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Trigger a debounced tracking run.
    pub fn poke(&self) {
        self.state.trigger();
    }

    pub fn stop(&self) {
        self.state.stop();
    }
}

impl Default for BackgroundApp {
    fn default() -> Self {
        Self::new()
    }
}
