//! Page content context
//!
//! One [`ContentApp`] per loaded video-site page owns the element manager,
//! the speed enforcer and the speed widget, and wires them to the page's
//! mutation feed, navigation events and storage changes.

use std::cell::RefCell;
use std::rc::Rc;

use aqt_core::catalog::default_rules;
use aqt_core::dom::{Dom, Media};
use aqt_core::overlay::SpeedWidget;
use aqt_core::playback::{speed_from_stored, ArtistChannelProbe};
use aqt_core::storage::{entry, Storage, StorageMap};
use aqt_core::types::{ELEMENTS_KEY, PLAYBACK_SPEED_KEY};
use aqt_core::{ContentConfig, ElementManager, SpeedEnforcer};
use gloo_timers::callback::{Interval, Timeout};
use log::{debug, info, warn};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, spawn_local};
use web_sys::{Element, MutationObserver, MutationObserverInit};

use crate::ext::{storage_changes, ChromeStorage, Handler, Subscriptions};
use crate::overlay_ui;
use crate::web_dom::WebDom;

pub(crate) struct ContentState {
    pub(crate) dom: WebDom,
    pub(crate) config: ContentConfig,
    pub(crate) manager: RefCell<ElementManager>,
    pub(crate) enforcer: RefCell<SpeedEnforcer<WebDom>>,
    pub(crate) widget: RefCell<SpeedWidget>,
    pub(crate) widget_subs: RefCell<Subscriptions>,
    pub(crate) hide_timer: RefCell<Option<Timeout>>,
    subs: RefCell<Subscriptions>,
    observer: RefCell<Option<(MutationObserver, Closure<dyn FnMut(JsValue)>)>>,
    debounce: RefCell<Option<Timeout>>,
    interval: RefCell<Option<Interval>>,
}

impl ContentState {
    pub(crate) fn new(config: ContentConfig) -> Result<Rc<Self>, JsValue> {
        let dom = WebDom::new()?;
        Ok(Rc::new(Self {
            manager: RefCell::new(ElementManager::new(default_rules(), config.clone())),
            enforcer: RefCell::new(SpeedEnforcer::new(&config, Box::new(ArtistChannelProbe))),
            widget: RefCell::new(SpeedWidget::new(config.menu_hide_delay_ms)),
            widget_subs: RefCell::new(Subscriptions::default()),
            hide_timer: RefCell::new(None),
            subs: RefCell::new(Subscriptions::default()),
            observer: RefCell::new(None),
            debounce: RefCell::new(None),
            interval: RefCell::new(None),
            dom,
            config,
        }))
    }

    async fn initialize(self: &Rc<Self>) -> Result<(), JsValue> {
        let stored = match ChromeStorage.get(&[ELEMENTS_KEY, PLAYBACK_SPEED_KEY]).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Using defaults, settings unavailable: {}", e);
                StorageMap::new()
            }
        };

        self.install_rate_listener();
        let stats = self.manager.borrow_mut().initialize(&self.dom, stored.get(ELEMENTS_KEY));
        debug!("Initial pass: {:?}", stats);
        self.enforcer
            .borrow_mut()
            .initialize(&self.dom, stored.get(PLAYBACK_SPEED_KEY));
        overlay_ui::ensure_injected(self);

        self.observe_mutations()?;
        self.start_enforcement();
        self.subscribe()?;
        info!("Content context started on {}", self.dom.location());
        Ok(())
    }

    fn install_rate_listener(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        // Handed to JS for good: videos keep the listener after teardown, so
        // the body only holds a weak reference.
        let listener = Closure::<dyn FnMut(JsValue)>::new(move |event: JsValue| {
            if let Some(state) = weak.upgrade() {
                state.on_rate_change(&event);
            }
        })
        .into_js_value();
        self.dom.set_rate_listener(Some(listener.unchecked_into()));
    }

    fn observe_mutations(self: &Rc<Self>) -> Result<(), JsValue> {
        let weak = Rc::downgrade(self);
        let callback = Closure::<dyn FnMut(JsValue)>::new(move |_records: JsValue| {
            if let Some(state) = weak.upgrade() {
                state.schedule_reconcile();
            }
        });
        let observer = MutationObserver::new(callback.as_ref().unchecked_ref())?;
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);

        let root = self
            .dom
            .document()
            .document_element()
            .ok_or_else(|| JsValue::from_str("No document element"))?;
        observer.observe_with_options(&root, &init)?;
        *self.observer.borrow_mut() = Some((observer, callback));
        Ok(())
    }

    fn start_enforcement(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let interval = Interval::new(self.config.enforcement_interval_ms, move || {
            if let Some(state) = weak.upgrade() {
                state.enforcer.borrow().apply_speed(&state.dom);
            }
        });
        *self.interval.borrow_mut() = Some(interval);
    }

    fn subscribe(self: &Rc<Self>) -> Result<(), JsValue> {
        let mut subs = self.subs.borrow_mut();

        let weak = Rc::downgrade(self);
        let on_nav = move |_: JsValue| {
            if let Some(state) = weak.upgrade() {
                state.on_navigation();
            }
        };
        subs.dom(self.dom.window(), "popstate", Handler::one(on_nav.clone()))?;
        subs.dom(self.dom.document(), "yt-navigate-finish", Handler::one(on_nav))?;

        let weak = Rc::downgrade(self);
        subs.chrome(
            &["storage", "onChanged"],
            Handler::two(move |changes: JsValue, area: JsValue| {
                if area.as_string().as_deref() != Some("local") {
                    return;
                }
                if let Some(state) = weak.upgrade() {
                    state.on_storage_changed(&changes);
                }
            }),
        )?;
        Ok(())
    }

    /// Restart the quiet-period timer; the pass runs once mutations settle.
    /// Replacing the pending timer cancels it.
    fn schedule_reconcile(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let timer = Timeout::new(self.config.mutation_debounce_ms, move || {
            if let Some(state) = weak.upgrade() {
                state.reconcile();
            }
        });
        *self.debounce.borrow_mut() = Some(timer);
    }

    fn reconcile(self: &Rc<Self>) {
        self.manager.borrow().on_dom_changed(&self.dom);
        self.enforcer.borrow().on_nodes_added(&self.dom);
        overlay_ui::ensure_injected(self);
    }

    fn on_navigation(self: &Rc<Self>) {
        let stats = self.manager.borrow_mut().on_navigation(&self.dom);
        debug!("Navigation pass: {:?}", stats);
        self.enforcer.borrow().reapply(&self.dom);
        overlay_ui::ensure_injected(self);
    }

    fn on_storage_changed(self: &Rc<Self>, changes: &JsValue) {
        let changes = storage_changes(changes);

        if let Some(value) = changes.get(ELEMENTS_KEY) {
            self.manager.borrow_mut().update_elements(&self.dom, stored_or_none(value));
        }

        if let Some(value) = changes.get(PLAYBACK_SPEED_KEY) {
            let speed = speed_from_stored(Some(value));
            if speed != self.enforcer.borrow().speed() {
                self.enforcer.borrow_mut().set_speed(&self.dom, speed);
                overlay_ui::refresh_display(self);
            }
        }
    }

    fn on_rate_change(self: &Rc<Self>, event: &JsValue) {
        let video = js_sys::Reflect::get(event, &"target".into())
            .ok()
            .and_then(|t| t.dyn_into::<Element>().ok());
        if let Some(video) = video {
            self.enforcer.borrow().on_rate_change(&self.dom, &video);
        }
        overlay_ui::refresh_display(self);
    }

    /// Speed chosen through the widget: apply, show and persist it.
    pub(crate) fn user_set_speed(self: &Rc<Self>, value: f64) {
        let speed = self.enforcer.borrow_mut().set_speed(&self.dom, value);
        overlay_ui::refresh_display(self);

        spawn_local(async move {
            let entries: Result<StorageMap, _> = entry(PLAYBACK_SPEED_KEY, &speed).map(|e| [e].into_iter().collect());
            let result = match entries {
                Ok(entries) => ChromeStorage.set(entries).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Failed to save playback speed: {}", e);
            }
        });
    }

    /// Live rate of the main video, or the target when there is none.
    pub(crate) fn current_rate(&self) -> f64 {
        let enforcer = self.enforcer.borrow();
        self.dom
            .main_video()
            .and_then(|v| self.dom.playback_rate(&v))
            .unwrap_or_else(|| enforcer.speed())
    }

    fn destroy(&self) {
        self.subs.borrow_mut().clear();
        self.widget_subs.borrow_mut().clear();
        if let Some((observer, _callback)) = self.observer.borrow_mut().take() {
            observer.disconnect();
        }
        self.interval.borrow_mut().take();
        self.debounce.borrow_mut().take();
        self.hide_timer.borrow_mut().take();
        self.manager.borrow_mut().destroy();
        self.enforcer.borrow_mut().destroy();
        info!("Content context stopped");
    }
}

/// Entry point for the page content script.
#[wasm_bindgen]
pub struct ContentApp {
    state: Rc<ContentState>,
}

#[wasm_bindgen]
impl ContentApp {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<ContentApp, JsValue> {
        Ok(ContentApp {
            state: ContentState::new(ContentConfig::default())?,
        })
    }

    /// Load settings, run the first pass and start observing the page.
    pub fn start(&self) -> js_sys::Promise {
        let state = self.state.clone();
        future_to_promise(async move {
            state.initialize().await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Current target playback speed.
    pub fn speed(&self) -> f64 {
        self.state.enforcer.borrow().speed()
    }

    #[wasm_bindgen(js_name = setSpeed)]
    pub fn set_speed(&self, value: f64) {
        self.state.user_set_speed(value);
    }

    pub fn destroy(&self) {
        self.state.destroy();
    }
}

impl Drop for ContentApp {
    fn drop(&mut self) {
        self.state.destroy();
    }
}

fn stored_or_none(value: &Value) -> Option<&Value> {
    (!value.is_null()).then_some(value)
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use wasm_bindgen_test::*;

    use super::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_mutation_bursts_keep_one_timer() {
        let state = ContentState::new(ContentConfig::default()).unwrap();
        for _ in 0..20 {
            state.schedule_reconcile();
        }
        assert!(state.debounce.borrow().is_some());

        state.destroy();
        assert!(state.debounce.borrow().is_none());
        assert!(state.interval.borrow().is_none());
    }
}
