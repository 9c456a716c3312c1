//! Speed widget elements.

use std::rc::Rc;

use aqt_core::dom::Dom;
use aqt_core::overlay::{
    format_speed, injection_decision, Injection, ANCHOR_SELECTOR, MENU_ID, OVERLAY_ID,
    SLIDER_MAX, SLIDER_MIN, SLIDER_STEP, SLIDER_STYLE_ID,
};
use gloo_timers::callback::Timeout;
use log::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement, HtmlInputElement, WheelEvent};

use crate::content::ContentState;
use crate::ext::{self, Handler, Subscriptions};

const READOUT_CLASS: &str = "aqt-speed-readout";
const SLIDER_CLASS: &str = "aqt-speed-slider";
const RESET_CLASS: &str = "aqt-speed-reset";

const SLIDER_CSS: &str = "
#aqt-speed-overlay { position: relative; display: inline-flex; align-items: center; justify-content: center; width: auto; padding: 0 8px; cursor: pointer; }
#aqt-speed-overlay .aqt-speed-readout { font-size: 13px; font-weight: 500; color: #fff; user-select: none; }
#aqt-speed-menu { position: absolute; bottom: 100%; left: 50%; transform: translateX(-50%); padding: 10px 12px; border-radius: 8px; background: rgba(28, 28, 28, 0.9); }
#aqt-speed-menu .aqt-speed-slider { width: 120px; accent-color: #fff; vertical-align: middle; }
#aqt-speed-menu .aqt-speed-reset { margin-left: 8px; font-size: 14px; color: #fff; cursor: pointer; user-select: none; vertical-align: middle; }
";

fn set_display(element: &Element, visible: bool) {
    if let Some(el) = element.dyn_ref::<HtmlElement>() {
        let _ = el.style().set_property("display", if visible { "block" } else { "none" });
    }
}

// =============================================================================
// Speed Widget
// =============================================================================

/// Inject the widget into the control bar unless it is already there.
pub(crate) fn ensure_injected(state: &Rc<ContentState>) {
    let present = state.dom.element_by_id(OVERLAY_ID).is_some();
    let anchor = state.dom.query(ANCHOR_SELECTOR);

    match (injection_decision(present, anchor.is_some()), anchor) {
        (Injection::Inject, Some(anchor)) => {
            if let Err(e) = build(state, &anchor) {
                warn!("Failed to inject speed overlay: {}", ext::js_error(&e));
            }
        }
        (decision, _) => debug!("Speed overlay: {:?}", decision),
    }
}

fn ensure_style(document: &Document) -> Result<(), JsValue> {
    if document.get_element_by_id(SLIDER_STYLE_ID).is_some() {
        return Ok(());
    }
    let style = document.create_element("style")?;
    style.set_id(SLIDER_STYLE_ID);
    style.set_text_content(Some(SLIDER_CSS));
    match document.head() {
        Some(head) => head.append_child(&style)?,
        None => document
            .document_element()
            .ok_or_else(|| JsValue::from_str("No document element"))?
            .append_child(&style)?,
    };
    Ok(())
}

fn build(state: &Rc<ContentState>, anchor: &Element) -> Result<(), JsValue> {
    let document = state.dom.document();
    ensure_style(document)?;

    let container = document.create_element("div")?;
    container.set_id(OVERLAY_ID);
    container.set_class_name("ytp-button");

    let readout = document.create_element("span")?;
    readout.set_class_name(READOUT_CLASS);
    readout.set_text_content(Some(&format_speed(state.current_rate())));

    let menu = document.create_element("div")?;
    menu.set_id(MENU_ID);
    set_display(&menu, false);

    let slider: HtmlInputElement = document.create_element("input")?.dyn_into()?;
    slider.set_type("range");
    slider.set_class_name(SLIDER_CLASS);
    slider.set_min(&SLIDER_MIN.to_string());
    slider.set_max(&SLIDER_MAX.to_string());
    slider.set_step(&SLIDER_STEP.to_string());
    slider.set_value_as_number(state.current_rate());

    let reset = document.create_element("span")?;
    reset.set_class_name(RESET_CLASS);
    reset.set_attribute("title", "Reset speed")?;
    reset.set_text_content(Some("\u{21BA}"));

    menu.append_child(&slider)?;
    menu.append_child(&reset)?;
    container.append_child(&readout)?;
    container.append_child(&menu)?;

    // Listeners on a replaced widget are stale.
    let mut subs = state.widget_subs.borrow_mut();
    subs.clear();
    wire(state, &mut subs, &container, &[&readout, &reset], &menu, &slider)?;
    drop(subs);

    anchor.prepend_with_node_1(&container)?;
    debug!("Speed overlay injected");
    Ok(())
}

fn wire(
    state: &Rc<ContentState>,
    subs: &mut Subscriptions,
    container: &Element,
    reset_targets: &[&Element],
    menu: &Element,
    slider: &HtmlInputElement,
) -> Result<(), JsValue> {
    let weak = Rc::downgrade(state);
    let shown = menu.clone();
    subs.dom(
        container,
        "mouseenter",
        Handler::one(move |_| {
            if let Some(state) = weak.upgrade() {
                if state.widget.borrow_mut().on_pointer_enter() {
                    set_display(&shown, true);
                }
            }
        }),
    )?;

    let weak = Rc::downgrade(state);
    let hidden = menu.clone();
    subs.dom(
        container,
        "mouseleave",
        Handler::one(move |_| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let delay = state.widget.borrow_mut().on_pointer_leave(js_sys::Date::now());
            let weak = Rc::downgrade(&state);
            let hidden = hidden.clone();
            let timer = Timeout::new(delay, move || {
                if let Some(state) = weak.upgrade() {
                    if state.widget.borrow_mut().on_hide_timer(js_sys::Date::now()) {
                        set_display(&hidden, false);
                    }
                }
            });
            *state.hide_timer.borrow_mut() = Some(timer);
        }),
    )?;

    let weak = Rc::downgrade(state);
    subs.dom(
        container,
        "wheel",
        Handler::one(move |event: JsValue| {
            let Ok(event) = event.dyn_into::<WheelEvent>() else {
                return;
            };
            event.prevent_default();
            if let Some(state) = weak.upgrade() {
                let target = state.widget.borrow().on_wheel(state.current_rate(), event.delta_y());
                state.user_set_speed(target);
            }
        }),
    )?;

    for target in reset_targets {
        let weak = Rc::downgrade(state);
        subs.dom(
            target,
            "click",
            Handler::one(move |_| {
                if let Some(state) = weak.upgrade() {
                    let speed = state.widget.borrow().on_reset();
                    state.user_set_speed(speed);
                }
            }),
        )?;
    }

    let weak = Rc::downgrade(state);
    let input = slider.clone();
    subs.dom(
        slider,
        "input",
        Handler::one(move |_| {
            if let Some(state) = weak.upgrade() {
                let speed = state.widget.borrow_mut().on_slider_input(input.value_as_number());
                state.user_set_speed(speed);
            }
        }),
    )?;

    for (event, focused) in [("focus", true), ("blur", false)] {
        let weak = Rc::downgrade(state);
        subs.dom(
            slider,
            event,
            Handler::one(move |_| {
                if let Some(state) = weak.upgrade() {
                    state.widget.borrow_mut().set_slider_focused(focused);
                }
            }),
        )?;
    }

    Ok(())
}

/// Push the video's live rate into the readout and slider.
pub(crate) fn refresh_display(state: &Rc<ContentState>) {
    let Some(container) = state.dom.element_by_id(OVERLAY_ID) else {
        return;
    };
    let update = state.widget.borrow().display(state.current_rate());

    if let Ok(Some(readout)) = container.query_selector(&format!(".{READOUT_CLASS}")) {
        readout.set_text_content(Some(&update.text));
    }
    if let Some(value) = update.slider {
        let slider = container
            .query_selector(&format!(".{SLIDER_CLASS}"))
            .ok()
            .flatten()
            .and_then(|s| s.dyn_into::<HtmlInputElement>().ok());
        if let Some(slider) = slider {
            slider.set_value_as_number(value);
        }
    }
}
