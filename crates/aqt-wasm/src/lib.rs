//! WebAssembly bindings for AQT
//!
//! The same module is loaded by the video-site content script
//! (`ContentApp`), the all-pages block overlay script (`BlockOverlayApp`) and
//! the background service worker (`BackgroundApp`).

mod background;
mod block;
mod content;
mod ext;
mod overlay_ui;
mod web_dom;

use aqt_core::page::get_page_type;
use aqt_core::{get_domain_from_url, matches_domain};
use wasm_bindgen::prelude::*;

pub use background::BackgroundApp;
pub use block::BlockOverlayApp;
pub use content::ContentApp;

#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::new(log::Level::Info));
}

/// Canonical domain of a URL, for the settings UI.
#[wasm_bindgen]
pub fn domain_from_url(url: &str) -> Option<String> {
    get_domain_from_url(url)
}

#[wasm_bindgen]
pub fn domain_matches(visited: &str, limit: &str) -> bool {
    matches_domain(visited, limit)
}

/// Page type tag of a URL, or `undefined` when unknown.
#[wasm_bindgen]
pub fn page_type(url: &str) -> Option<String> {
    get_page_type(url).map(|p| p.as_str().to_string())
}
