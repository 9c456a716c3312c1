//! Page surface traits
//!
//! The content-side components never touch a browser API directly. They are
//! written against [`Dom`] (element lookup, inline styles, markers) and
//! [`Media`] (the page's video element), implemented over `web-sys` in the
//! wasm crate and by [`memory::MemoryDom`] everywhere else.
//!
//! Lookups never fail: an absent element or an invalid selector yields an
//! empty result, to be retried on the next pass. Mutations return
//! [`DomError`] so callers can isolate a failing node.

pub mod memory;

/// Error type for page mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("Page rejected the operation: {0}")]
    Rejected(String),
    #[error("Node is no longer attached")]
    Detached,
    #[error("Navigation failed: {0}")]
    Navigation(String),
}

/// Priority of an inline style declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Important,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Normal => "",
            Priority::Important => "important",
        }
    }
}

/// A synthesized thumbnail link injected into the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// Fixed DOM id of the injected image
    pub id: String,
    /// Image source
    pub src: String,
    /// Link target, opened in a new tab
    pub href: String,
}

/// Element lookup and mutation on the current page.
pub trait Dom {
    type Node: Clone + PartialEq;

    /// Full URL of the current page.
    fn location(&self) -> String;

    /// Nodes matching an XPath expression.
    fn select(&self, xpath: &str) -> Vec<Self::Node>;

    /// First node matching a CSS selector.
    fn query(&self, css: &str) -> Option<Self::Node>;

    fn element_by_id(&self, id: &str) -> Option<Self::Node>;

    fn set_style(&self, node: &Self::Node, property: &str, value: &str, priority: Priority) -> Result<(), DomError>;

    fn remove_style(&self, node: &Self::Node, property: &str) -> Result<(), DomError>;

    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    fn set_attribute(&self, node: &Self::Node, name: &str, value: &str) -> Result<(), DomError>;

    fn remove_attribute(&self, node: &Self::Node, name: &str) -> Result<(), DomError>;

    /// Set the `disabled` property of a form-like element.
    fn set_disabled(&self, node: &Self::Node, disabled: bool) -> Result<(), DomError>;

    /// Pause every video inside `node`.
    fn pause_media_within(&self, node: &Self::Node) -> Result<(), DomError>;

    /// Insert `thumb` as the first child of `container`.
    fn prepend_thumbnail(&self, container: &Self::Node, thumb: &Thumbnail) -> Result<(), DomError>;

    /// Remove a previously injected thumbnail and its wrapper.
    fn remove_thumbnail(&self, id: &str) -> Result<(), DomError>;

    /// Navigate without adding a history entry.
    fn replace_location(&self, url: &str) -> Result<(), DomError>;
}

/// Access to the page's video element.
pub trait Media: Dom {
    /// The main player video, falling back to the first video on the page.
    fn main_video(&self) -> Option<Self::Node>;

    fn playback_rate(&self, video: &Self::Node) -> Option<f64>;

    fn set_playback_rate(&self, video: &Self::Node, rate: f64) -> Result<(), DomError>;

    /// Install the platform's rate-change listener on `video`. The listener
    /// routes back to [`crate::playback::SpeedEnforcer::on_rate_change`].
    fn watch_rate_changes(&self, video: &Self::Node) -> Result<(), DomError>;
}
