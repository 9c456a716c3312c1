//! Block overlay context
//!
//! [`BlockOverlayApp`] runs on every page, independent of the video-site
//! content script. It listens for the background tracker's block signals
//! and mounts or removes a full-viewport blocking layer.

use std::cell::RefCell;
use std::rc::Rc;

use aqt_core::overlay::{BlockAction, BlockOverlayState, BLOCK_OVERLAY_ID};
use log::{debug, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::Document;

use crate::ext::{self, block_signal_from_message, Handler, Subscriptions};

const BLOCK_CSS: &str = "position: fixed; inset: 0; z-index: 2147483647; display: flex; flex-direction: column; \
align-items: center; justify-content: center; gap: 16px; background: #0f0f0f; color: #f1f1f1; \
font-family: Roboto, Arial, sans-serif;";

// =============================================================================
// Block Overlay
// =============================================================================

fn mount_block_overlay(document: &Document) -> Result<(), JsValue> {
    if document.get_element_by_id(BLOCK_OVERLAY_ID).is_some() {
        return Ok(());
    }

    let overlay = document.create_element("div")?;
    overlay.set_id(BLOCK_OVERLAY_ID);
    overlay.set_attribute("style", BLOCK_CSS)?;

    let title = document.create_element("h1")?;
    title.set_text_content(Some("Daily time limit reached"));
    let body = document.create_element("p")?;
    body.set_text_content(Some("You have used up today's time on this site. It resets at midnight."));

    let back = document.create_element("button")?;
    back.set_text_content(Some("Go back"));
    // Lives as long as the button; the page may outlive our handle to it.
    let on_back = Closure::<dyn FnMut()>::new(|| {
        if let Some(history) = web_sys::window().and_then(|w| w.history().ok()) {
            let _ = history.back();
        }
    })
    .into_js_value();
    back.add_event_listener_with_callback("click", on_back.unchecked_ref())?;

    overlay.append_child(&title)?;
    overlay.append_child(&body)?;
    overlay.append_child(&back)?;

    let root = document
        .document_element()
        .ok_or_else(|| JsValue::from_str("No document element"))?;
    root.append_child(&overlay)?;
    debug!("Block overlay mounted");
    Ok(())
}

fn unmount_block_overlay(document: &Document) {
    if let Some(overlay) = document.get_element_by_id(BLOCK_OVERLAY_ID) {
        overlay.remove();
        debug!("Block overlay removed");
    }
}

struct BlockState {
    document: Document,
    overlay: RefCell<BlockOverlayState>,
    subs: RefCell<Subscriptions>,
}

impl BlockState {
    fn on_message(&self, message: &JsValue) {
        let Some(signal) = block_signal_from_message(message) else {
            return;
        };
        let action = self.overlay.borrow_mut().on_signal(signal);
        match action {
            Some(BlockAction::Mount) => {
                if let Err(e) = mount_block_overlay(&self.document) {
                    warn!("Failed to mount block overlay: {}", ext::js_error(&e));
                    *self.overlay.borrow_mut() = BlockOverlayState::default();
                }
            }
            Some(BlockAction::Unmount) => unmount_block_overlay(&self.document),
            None => {}
        }
    }

    fn destroy(&self) {
        self.subs.borrow_mut().clear();
        unmount_block_overlay(&self.document);
        *self.overlay.borrow_mut() = BlockOverlayState::default();
    }
}

/// Entry point for the all-pages block overlay script.
#[wasm_bindgen]
pub struct BlockOverlayApp {
    state: Rc<BlockState>,
}

#[wasm_bindgen]
impl BlockOverlayApp {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<BlockOverlayApp, JsValue> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| JsValue::from_str("No document"))?;
        Ok(BlockOverlayApp {
            state: Rc::new(BlockState {
                document,
                overlay: RefCell::new(BlockOverlayState::default()),
                subs: RefCell::new(Subscriptions::default()),
            }),
        })
    }

    /// Subscribe to block signals from the background tracker.
    pub fn start(&self) -> Result<(), JsValue> {
        let weak = Rc::downgrade(&self.state);
        self.state.subs.borrow_mut().chrome(
            &["runtime", "onMessage"],
            Handler::one(move |message: JsValue| {
                if let Some(state) = weak.upgrade() {
                    state.on_message(&message);
                }
            }),
        )?;
        info!("Block overlay listener started");
        Ok(())
    }

    /// Whether the blocking layer is currently shown.
    #[wasm_bindgen(js_name = isBlocked)]
    pub fn is_blocked(&self) -> bool {
        self.state.overlay.borrow().is_mounted()
    }

    pub fn destroy(&self) {
        self.state.destroy();
    }
}

impl Drop for BlockOverlayApp {
    fn drop(&mut self) {
        self.state.destroy();
    }
}
