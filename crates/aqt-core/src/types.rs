//! Core type definitions for AQT
//!
//! These types map directly to the values persisted in extension storage and
//! to the messages exchanged between the background and page contexts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Storage Keys
// =============================================================================

/// Persisted element rule list (only `id` and `checked` are meaningful).
pub const ELEMENTS_KEY: &str = "youtube_elements";
/// Persisted time-limit list.
pub const TIME_LIMITS_KEY: &str = "time_limits";
/// Persisted minutes-per-domain map for the current day.
pub const DAILY_USAGE_KEY: &str = "daily_usage";
/// Local calendar date of the last usage reset.
pub const LAST_RESET_DATE_KEY: &str = "last_reset_date";
/// Global playback speed.
pub const PLAYBACK_SPEED_KEY: &str = "youtube_playback_speed";

// =============================================================================
// Page Types
// =============================================================================

/// Coarse classification of a page on the video site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Home,
    Video,
    Subscriptions,
    Search,
    Trending,
    Downloads,
    Channel,
}

impl PageType {
    pub const ALL: [PageType; 7] = [
        PageType::Home,
        PageType::Video,
        PageType::Subscriptions,
        PageType::Search,
        PageType::Trending,
        PageType::Downloads,
        PageType::Channel,
    ];

    /// Single-bit mask for this page type.
    pub fn mask(self) -> PageMask {
        match self {
            PageType::Home => PageMask::HOME,
            PageType::Video => PageMask::VIDEO,
            PageType::Subscriptions => PageMask::SUBSCRIPTIONS,
            PageType::Search => PageMask::SEARCH,
            PageType::Trending => PageMask::TRENDING,
            PageType::Downloads => PageMask::DOWNLOADS,
            PageType::Channel => PageMask::CHANNEL,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageType::Home => "home",
            PageType::Video => "video",
            PageType::Subscriptions => "subscriptions",
            PageType::Search => "search",
            PageType::Trending => "trending",
            PageType::Downloads => "downloads",
            PageType::Channel => "channel",
        }
    }

    /// Parse from the lowercase tag used in storage.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == tag)
    }
}

bitflags::bitflags! {
    /// Set of page types a rule applies on. Empty means global.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageMask: u8 {
        const HOME = 1 << 0;
        const VIDEO = 1 << 1;
        const SUBSCRIPTIONS = 1 << 2;
        const SEARCH = 1 << 3;
        const TRENDING = 1 << 4;
        const DOWNLOADS = 1 << 5;
        const CHANNEL = 1 << 6;
    }
}

impl PageMask {
    pub fn from_page_types(types: &[PageType]) -> Self {
        types.iter().fold(PageMask::empty(), |mask, p| mask | p.mask())
    }
}

// =============================================================================
// Element Rules
// =============================================================================

/// UI grouping of element rules, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
pub enum RuleCategory {
    Home,
    Shorts,
    #[serde(rename = "Video Player")]
    VideoPlayer,
    Header,
    Sidebar,
    General,
    #[default]
    Other,
}

impl RuleCategory {
    pub const ORDER: [RuleCategory; 7] = [
        RuleCategory::Home,
        RuleCategory::Shorts,
        RuleCategory::VideoPlayer,
        RuleCategory::Header,
        RuleCategory::Sidebar,
        RuleCategory::General,
        RuleCategory::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RuleCategory::Home => "Home",
            RuleCategory::Shorts => "Shorts",
            RuleCategory::VideoPlayer => "Video Player",
            RuleCategory::Header => "Header",
            RuleCategory::Sidebar => "Sidebar",
            RuleCategory::General => "General",
            RuleCategory::Other => "Other",
        }
    }
}

fn default_property() -> String {
    "display".to_string()
}

fn default_style() -> String {
    "none".to_string()
}

/// A configuration entry describing which elements to affect and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct ElementRule {
    /// Unique identifier, also the special-handler key
    pub id: String,
    /// Display label for the settings UI
    #[serde(default)]
    pub label: String,
    /// XPath selector for the affected nodes
    pub selector: String,
    /// CSS property written while active
    #[serde(default = "default_property")]
    pub property: String,
    /// CSS value written while active
    #[serde(default = "default_style")]
    pub style: String,
    /// Page types the rule applies on (empty = global)
    #[serde(default)]
    pub page_types: Vec<PageType>,
    #[serde(default)]
    pub category: RuleCategory,
    /// User toggle
    #[serde(default)]
    pub checked: bool,
}

impl ElementRule {
    pub fn page_mask(&self) -> PageMask {
        PageMask::from_page_types(&self.page_types)
    }

    pub fn is_global(&self) -> bool {
        self.page_types.is_empty()
    }
}

// =============================================================================
// Time Limits
// =============================================================================

/// Daily minute budget for a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
pub struct TimeLimit {
    pub id: String,
    /// Normalized domain (lowercase, no `www.`)
    pub domain: String,
    pub minutes: u32,
}

/// Accumulated minutes per canonical domain for the current day.
pub type DailyUsage = BTreeMap<String, f64>;

// =============================================================================
// Cross-Context Messages
// =============================================================================

/// Signal sent from the background tracker to a tab's page context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[serde(tag = "type")]
pub enum BlockSignal {
    #[serde(rename = "SHOW_BLOCK_OVERLAY")]
    Show,
    #[serde(rename = "HIDE_BLOCK_OVERLAY")]
    Hide,
}

impl BlockSignal {
    pub fn from_exceeded(exceeded: bool) -> Self {
        if exceeded {
            BlockSignal::Show
        } else {
            BlockSignal::Hide
        }
    }

    pub fn type_tag(self) -> &'static str {
        match self {
            BlockSignal::Show => "SHOW_BLOCK_OVERLAY",
            BlockSignal::Hide => "HIDE_BLOCK_OVERLAY",
        }
    }

    pub fn from_type_tag(tag: &str) -> Option<Self> {
        match tag {
            "SHOW_BLOCK_OVERLAY" => Some(BlockSignal::Show),
            "HIDE_BLOCK_OVERLAY" => Some(BlockSignal::Hide),
            _ => None,
        }
    }
}
