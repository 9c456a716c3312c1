//! Built-in default element rules.
//!
//! Every default starts unchecked; user toggles are merged on top by
//! [`crate::storage::merge_with_defaults`].

use crate::types::{ElementRule, PageType, RuleCategory};

use PageType::{Channel, Home, Search, Subscriptions, Video};

fn rule(id: &str, label: &str, selector: &str, category: RuleCategory, pages: &[PageType]) -> ElementRule {
    ElementRule {
        id: id.to_string(),
        label: label.to_string(),
        selector: selector.to_string(),
        property: "display".to_string(),
        style: "none".to_string(),
        page_types: pages.to_vec(),
        category,
        checked: false,
    }
}

fn styled(mut base: ElementRule, property: &str, style: &str) -> ElementRule {
    base.property = property.to_string();
    base.style = style.to_string();
    base
}

/// The default rule set shipped with the extension.
pub fn default_rules() -> Vec<ElementRule> {
    use RuleCategory as C;

    vec![
        // Home
        rule("home-feed", "Recommended videos", "//ytd-browse[@page-subtype='home']//ytd-rich-grid-renderer", C::Home, &[Home]),
        rule("home-chips", "Topic chips", "//ytd-feed-filter-chip-bar-renderer", C::Home, &[Home]),
        rule("home-posts", "Community posts", "//ytd-rich-section-renderer[.//ytd-post-renderer]", C::Home, &[Home]),
        rule("home-ads", "Promoted content", "//ytd-ad-slot-renderer/ancestor::ytd-rich-item-renderer", C::Home, &[Home]),
        // Shorts
        rule("home-shorts", "Shorts shelf", "//ytd-rich-shelf-renderer[@is-shorts]", C::Shorts, &[Home, Subscriptions]),
        rule("search-shorts", "Shorts in search results", "//ytd-reel-shelf-renderer", C::Shorts, &[Search]),
        rule("video-shorts-description", "Shorts in description", "//ytd-reel-shelf-renderer[ancestor::ytd-watch-metadata]", C::Shorts, &[Video]),
        rule("redirect-shorts", "Open Shorts in the regular player", "//ytd-shorts", C::Shorts, &[]),
        // Video Player
        rule("video-sidebar", "Up next recommendations", "//div[@id='secondary']//ytd-watch-next-secondary-results-renderer//ytd-item-section-renderer", C::VideoPlayer, &[Video]),
        styled(
            rule("video-thumbnail", "Show full-size thumbnail", "//img[@id='video-thumbnail-aqt']", C::VideoPlayer, &[Video]),
            "display",
            "block",
        ),
        rule("video-comments", "Comments", "//ytd-comments[@id='comments']", C::VideoPlayer, &[Video]),
        rule("video-views", "View count", "//ytd-watch-info-text//span[contains(@class,'bold')][1]", C::VideoPlayer, &[Video]),
        rule("video-likes", "Like and dislike buttons", "//segmented-like-dislike-button-view-model", C::VideoPlayer, &[Video]),
        rule("video-endscreen", "End screen cards", "//div[contains(@class,'ytp-ce-element')]", C::VideoPlayer, &[Video]),
        rule("video-autoplay", "Autoplay toggle", "//button[@data-tooltip-target-id='ytp-autonav-toggle-button']", C::VideoPlayer, &[Video]),
        rule("channel-trailer", "Channel trailer", "//ytd-channel-video-player-renderer", C::VideoPlayer, &[Channel]),
        // Header
        rule("tabs", "Feed filter tabs", "//div[@id='chips-wrapper']", C::Header, &[Home]),
        rule("header-notifications", "Notifications bell", "//ytd-notification-topbar-button-renderer", C::Header, &[]),
        rule("header-create", "Create button", "//ytd-masthead//ytd-button-renderer[.//*[@aria-label='Create']]", C::Header, &[]),
        rule("header-voice-search", "Voice search", "//div[@id='voice-search-button']", C::Header, &[]),
        // Sidebar
        rule("sidebar", "Navigation sidebar", "//tp-yt-app-drawer[@id='guide'] | //ytd-mini-guide-renderer", C::Sidebar, &[]),
        rule("you", "\"You\" section", "//ytd-guide-collapsible-section-entry-renderer", C::Sidebar, &[]),
        rule("my-clips", "My clips entry", "//ytd-guide-entry-renderer[.//yt-formatted-string[text()='Your clips']]", C::Sidebar, &[]),
        rule("sidebar-explore", "Explore section", "//ytd-guide-section-renderer[.//yt-formatted-string[text()='Explore']]", C::Sidebar, &[]),
        rule("sidebar-more", "More from the site", "//ytd-guide-section-renderer[.//yt-formatted-string[starts-with(text(),'More from')]]", C::Sidebar, &[]),
        // General
        rule("search-recommendations", "Suggested videos in search", "//ytd-shelf-renderer[ancestor::ytd-search]", C::General, &[Search]),
        rule("subscriptions-shorts", "Shorts in subscriptions", "//ytd-rich-section-renderer[.//ytd-rich-shelf-renderer[@is-shorts]]", C::General, &[Subscriptions]),
        styled(
            rule("grayscale", "Grayscale thumbnails", "//ytd-thumbnail//img", C::General, &[]),
            "filter",
            "grayscale(1)",
        ),
    ]
}

/// Look up a default rule by id.
pub fn find_default(id: &str) -> Option<ElementRule> {
    default_rules().into_iter().find(|r| r.id == id)
}
