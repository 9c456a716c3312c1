//! [`Dom`] and [`Media`] over the live document.

use std::cell::RefCell;

use aqt_core::dom::{Dom, DomError, Media, Priority, Thumbnail};
use js_sys::{Function, Reflect};
use log::debug;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CssStyleDeclaration, Document, Element, HtmlMediaElement, Window, XPathResult};

use crate::ext::js_error;

const MAIN_VIDEO_SELECTOR: &str = "video.html5-main-video";
const THUMBNAIL_WRAPPER: &str = "ytd-thumbnail";

fn rejected(e: JsValue) -> DomError {
    DomError::Rejected(js_error(&e))
}

pub struct WebDom {
    window: Window,
    document: Document,
    rate_listener: RefCell<Option<Function>>,
}

impl WebDom {
    pub fn new() -> Result<Self, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
        let document = window.document().ok_or_else(|| JsValue::from_str("No document"))?;
        Ok(Self {
            window,
            document,
            rate_listener: RefCell::new(None),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Function installed as the `ratechange` listener on watched videos.
    pub fn set_rate_listener(&self, listener: Option<Function>) {
        *self.rate_listener.borrow_mut() = listener;
    }

    fn style_of(&self, node: &Element) -> Result<CssStyleDeclaration, DomError> {
        if !node.is_connected() {
            return Err(DomError::Detached);
        }
        Reflect::get(node, &"style".into())
            .map_err(rejected)?
            .dyn_into::<CssStyleDeclaration>()
            .map_err(|_| DomError::Rejected("element has no inline style".to_string()))
    }

    fn create(&self, tag: &str) -> Result<Element, DomError> {
        self.document.create_element(tag).map_err(rejected)
    }
}

impl Dom for WebDom {
    type Node = Element;

    fn location(&self) -> String {
        self.window.location().href().unwrap_or_default()
    }

    fn select(&self, xpath: &str) -> Vec<Element> {
        let result = self.document.evaluate_with_opt_callback_and_type(
            xpath,
            &self.document,
            None,
            XPathResult::ORDERED_NODE_SNAPSHOT_TYPE,
        );
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                debug!("XPath '{}' failed: {}", xpath, js_error(&e));
                return Vec::new();
            }
        };

        let len = result.snapshot_length().unwrap_or(0);
        (0..len)
            .filter_map(|i| result.snapshot_item(i).ok().flatten())
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect()
    }

    fn query(&self, css: &str) -> Option<Element> {
        self.document.query_selector(css).ok().flatten()
    }

    fn element_by_id(&self, id: &str) -> Option<Element> {
        self.document.get_element_by_id(id)
    }

    fn set_style(&self, node: &Element, property: &str, value: &str, priority: Priority) -> Result<(), DomError> {
        self.style_of(node)?
            .set_property_with_priority(property, value, priority.as_str())
            .map_err(rejected)
    }

    fn remove_style(&self, node: &Element, property: &str) -> Result<(), DomError> {
        self.style_of(node)?.remove_property(property).map(|_| ()).map_err(rejected)
    }

    fn attribute(&self, node: &Element, name: &str) -> Option<String> {
        node.get_attribute(name)
    }

    fn set_attribute(&self, node: &Element, name: &str, value: &str) -> Result<(), DomError> {
        node.set_attribute(name, value).map_err(rejected)
    }

    fn remove_attribute(&self, node: &Element, name: &str) -> Result<(), DomError> {
        node.remove_attribute(name).map_err(rejected)
    }

    fn set_disabled(&self, node: &Element, disabled: bool) -> Result<(), DomError> {
        Reflect::set(node, &"disabled".into(), &JsValue::from_bool(disabled))
            .map(|_| ())
            .map_err(rejected)
    }

    fn pause_media_within(&self, node: &Element) -> Result<(), DomError> {
        if let Some(media) = node.dyn_ref::<HtmlMediaElement>() {
            media.pause().map_err(rejected)?;
        }
        let videos = node.query_selector_all("video").map_err(rejected)?;
        for i in 0..videos.length() {
            if let Some(media) = videos.item(i).and_then(|n| n.dyn_into::<HtmlMediaElement>().ok()) {
                media.pause().map_err(rejected)?;
            }
        }
        Ok(())
    }

    fn prepend_thumbnail(&self, container: &Element, thumb: &Thumbnail) -> Result<(), DomError> {
        let wrapper = self.create(THUMBNAIL_WRAPPER)?;
        let link = self.create("a")?;
        let image = self.create("img")?;

        link.set_attribute("href", &thumb.href).map_err(rejected)?;
        link.set_attribute("target", "_blank").map_err(rejected)?;
        image.set_id(&thumb.id);
        image.set_attribute("src", &thumb.src).map_err(rejected)?;
        image.set_attribute("style", "width: 100%; border-radius: 12px;").map_err(rejected)?;

        link.append_child(&image).map_err(rejected)?;
        wrapper.append_child(&link).map_err(rejected)?;
        container.prepend_with_node_1(&wrapper).map_err(rejected)
    }

    fn remove_thumbnail(&self, id: &str) -> Result<(), DomError> {
        let Some(image) = self.document.get_element_by_id(id) else {
            return Ok(());
        };
        match image.closest(THUMBNAIL_WRAPPER).map_err(rejected)? {
            Some(wrapper) => wrapper.remove(),
            None => image.remove(),
        }
        Ok(())
    }

    fn replace_location(&self, url: &str) -> Result<(), DomError> {
        self.window
            .location()
            .replace(url)
            .map_err(|e| DomError::Navigation(js_error(&e)))
    }
}

impl Media for WebDom {
    fn main_video(&self) -> Option<Element> {
        self.query(MAIN_VIDEO_SELECTOR).or_else(|| self.query("video"))
    }

    fn playback_rate(&self, video: &Element) -> Option<f64> {
        video.dyn_ref::<HtmlMediaElement>().map(|v| v.playback_rate())
    }

    fn set_playback_rate(&self, video: &Element, rate: f64) -> Result<(), DomError> {
        let media = video
            .dyn_ref::<HtmlMediaElement>()
            .ok_or_else(|| DomError::Rejected("not a media element".to_string()))?;
        media.set_playback_rate(rate);
        Ok(())
    }

    fn watch_rate_changes(&self, video: &Element) -> Result<(), DomError> {
        match self.rate_listener.borrow().as_ref() {
            Some(listener) => video
                .add_event_listener_with_callback("ratechange", listener)
                .map_err(rejected),
            None => Ok(()),
        }
    }
}
