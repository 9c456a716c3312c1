//! Extension API access
//!
//! `chrome.*` is reached through `js_sys::Reflect` so the same bindings work
//! in a page content script and in the background service worker, neither of
//! which has a typed `web-sys` surface for it.

use aqt_core::storage::{Storage, StorageChanges, StorageError, StorageMap};
use aqt_core::tracker::{ActiveTab, HostError, TabHost};
use aqt_core::BlockSignal;
use js_sys::{Array, Function, Object, Promise, Reflect, JSON};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

// =============================================================================
// Helpers
// =============================================================================

/// Readable message from a thrown JS value.
pub fn js_error(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            Reflect::get(value, &"message".into())
                .ok()
                .and_then(|m| m.as_string())
        })
        .unwrap_or_else(|| format!("{:?}", value))
}

/// Walk a property path from the global object, e.g. `["chrome", "tabs"]`.
pub fn global_path(path: &[&str]) -> Result<JsValue, JsValue> {
    let mut current: JsValue = js_sys::global().into();
    for key in path {
        current = Reflect::get(&current, &JsValue::from_str(key))?;
        if current.is_undefined() {
            return Err(JsValue::from_str(&format!("{} is not available", path.join("."))));
        }
    }
    Ok(current)
}

/// Call a promise-returning method and await it.
pub async fn call_async(target: &JsValue, method: &str, args: &Array) -> Result<JsValue, JsValue> {
    let func: Function = Reflect::get(target, &JsValue::from_str(method))?.dyn_into()?;
    let promise: Promise = func.apply(target, args)?.dyn_into()?;
    JsFuture::from(promise).await
}

pub fn json_to_js(value: &Value) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value).map_err(|e| JsValue::from_str(&e.to_string()))?;
    JSON::parse(&text)
}

/// JSON view of a JS value. `undefined` and unserializable values map to
/// `Null`.
pub fn js_to_json(value: &JsValue) -> Value {
    if value.is_undefined() || value.is_null() {
        return Value::Null;
    }
    JSON::stringify(value)
        .ok()
        .and_then(|s| s.as_string())
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

/// New values from a `chrome.storage.onChanged` payload.
pub fn storage_changes(changes: &JsValue) -> StorageChanges {
    let mut out = StorageChanges::new();
    let Some(obj) = changes.dyn_ref::<Object>() else {
        return out;
    };
    for key in Object::keys(obj).iter() {
        let Some(name) = key.as_string() else {
            continue;
        };
        let new_value = Reflect::get(changes, &key)
            .and_then(|change| Reflect::get(&change, &"newValue".into()))
            .map(|v| js_to_json(&v))
            .unwrap_or(Value::Null);
        out.insert(name, new_value);
    }
    out
}

// =============================================================================
// Listener Registry
// =============================================================================

pub enum Handler {
    One(Closure<dyn FnMut(JsValue)>),
    Two(Closure<dyn FnMut(JsValue, JsValue)>),
}

impl Handler {
    pub fn one(f: impl FnMut(JsValue) + 'static) -> Self {
        Handler::One(Closure::new(f))
    }

    pub fn two(f: impl FnMut(JsValue, JsValue) + 'static) -> Self {
        Handler::Two(Closure::new(f))
    }

    fn function(&self) -> &Function {
        match self {
            Handler::One(c) => c.as_ref().unchecked_ref(),
            Handler::Two(c) => c.as_ref().unchecked_ref(),
        }
    }
}

enum Source {
    Dom(web_sys::EventTarget, &'static str),
    Chrome(JsValue),
}

/// Owns every installed listener so teardown can remove them.
#[derive(Default)]
pub struct Subscriptions {
    items: Vec<(Source, Handler)>,
}

impl Subscriptions {
    pub fn dom(&mut self, target: &web_sys::EventTarget, event: &'static str, handler: Handler) -> Result<(), JsValue> {
        target.add_event_listener_with_callback(event, handler.function())?;
        self.items.push((Source::Dom(target.clone(), event), handler));
        Ok(())
    }

    /// Subscribe to a `chrome.*` event such as `["tabs", "onActivated"]`.
    pub fn chrome(&mut self, path: &[&str], handler: Handler) -> Result<(), JsValue> {
        let mut full = vec!["chrome"];
        full.extend_from_slice(path);
        let event = global_path(&full)?;
        let add: Function = Reflect::get(&event, &"addListener".into())?.dyn_into()?;
        add.call1(&event, handler.function())?;
        self.items.push((Source::Chrome(event), handler));
        Ok(())
    }

    /// Remove every listener and drop its closure.
    pub fn clear(&mut self) {
        for (source, handler) in self.items.drain(..) {
            match source {
                Source::Dom(target, event) => {
                    let _ = target.remove_event_listener_with_callback(event, handler.function());
                }
                Source::Chrome(event) => {
                    if let Ok(remove) = Reflect::get(&event, &"removeListener".into()) {
                        if let Some(remove) = remove.dyn_ref::<Function>() {
                            let _ = remove.call1(&event, handler.function());
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// chrome.storage.local
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeStorage;

impl ChromeStorage {
    fn area() -> Result<JsValue, StorageError> {
        global_path(&["chrome", "storage", "local"]).map_err(|e| StorageError::Backend(js_error(&e)))
    }
}

impl Storage for ChromeStorage {
    async fn get(&self, keys: &[&str]) -> Result<StorageMap, StorageError> {
        let area = Self::area()?;
        let names: Array = keys.iter().map(|k| JsValue::from_str(k)).collect();
        let result = call_async(&area, "get", &Array::of1(&names))
            .await
            .map_err(|e| StorageError::Backend(js_error(&e)))?;

        match js_to_json(&result) {
            Value::Object(map) => Ok(map),
            _ => Ok(StorageMap::new()),
        }
    }

    async fn set(&self, entries: StorageMap) -> Result<(), StorageError> {
        let area = Self::area()?;
        let items = json_to_js(&Value::Object(entries)).map_err(|e| StorageError::Backend(js_error(&e)))?;
        call_async(&area, "set", &Array::of1(&items))
            .await
            .map_err(|e| StorageError::Backend(js_error(&e)))?;
        Ok(())
    }
}

// =============================================================================
// chrome.tabs / chrome.windows
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeTabs;

fn query_error(e: JsValue) -> HostError {
    HostError::Query(js_error(&e))
}

impl TabHost for ChromeTabs {
    async fn active_tab(&self) -> Result<Option<ActiveTab>, HostError> {
        let windows = global_path(&["chrome", "windows"]).map_err(query_error)?;
        let window = call_async(&windows, "getLastFocused", &Array::new())
            .await
            .map_err(query_error)?;

        let focused = Reflect::get(&window, &"focused".into())
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let Some(window_id) = Reflect::get(&window, &"id".into()).ok().and_then(|v| v.as_f64()) else {
            return Ok(None);
        };
        if !focused {
            return Ok(None);
        }

        let query = Object::new();
        Reflect::set(&query, &"active".into(), &JsValue::TRUE).map_err(query_error)?;
        Reflect::set(&query, &"windowId".into(), &JsValue::from(window_id)).map_err(query_error)?;

        let tabs = global_path(&["chrome", "tabs"]).map_err(query_error)?;
        let found: Array = call_async(&tabs, "query", &Array::of1(&query))
            .await
            .map_err(query_error)?
            .dyn_into()
            .map_err(query_error)?;

        let tab = found.get(0);
        let id = Reflect::get(&tab, &"id".into()).ok().and_then(|v| v.as_f64());
        let url = Reflect::get(&tab, &"url".into()).ok().and_then(|v| v.as_string());
        match (id, url) {
            (Some(id), Some(url)) if id > 0.0 && !url.is_empty() => Ok(Some(ActiveTab { id: id as i32, url })),
            _ => Ok(None),
        }
    }

    async fn send_block_signal(&self, tab_id: i32, signal: BlockSignal) -> Result<(), HostError> {
        let delivery = |e: JsValue| HostError::Delivery {
            tab_id,
            reason: js_error(&e),
        };
        let tabs = global_path(&["chrome", "tabs"]).map_err(delivery)?;
        let message = Object::new();
        Reflect::set(&message, &"type".into(), &JsValue::from_str(signal.type_tag())).map_err(delivery)?;
        call_async(&tabs, "sendMessage", &Array::of2(&JsValue::from(tab_id), &message))
            .await
            .map_err(delivery)?;
        Ok(())
    }
}

/// Block signal carried by a `chrome.runtime.onMessage` payload.
pub fn block_signal_from_message(message: &JsValue) -> Option<BlockSignal> {
    let tag = Reflect::get(message, &"type".into()).ok()?.as_string()?;
    BlockSignal::from_type_tag(&tag)
}
