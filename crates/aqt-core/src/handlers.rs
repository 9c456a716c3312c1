//! Rule-specific side effects beyond the generic CSS toggle.
//!
//! Every handler is idempotent: invoking it again with the same `active`
//! value changes nothing further.

use crate::dom::{Dom, DomError, Priority, Thumbnail};
use crate::domain::{extract_path, query_param};
use crate::types::ElementRule;

/// Fixed DOM id of the injected full-size thumbnail.
pub const THUMBNAIL_ID: &str = "video-thumbnail-aqt";

const PAGE_MANAGER_SELECTOR: &str = "ytd-app[guide-persistent-and-visible] ytd-page-manager.ytd-app";
const WATCH_NEXT_ITEMS_SELECTOR: &str = "ytd-watch-next-secondary-results-renderer div#items";
const GUIDE_COLLAPSIBLE_SELECTOR: &str = "ytd-guide-collapsible-section-entry-renderer";
const GUIDE_SECTION_SELECTOR: &str = "ytd-guide-section-renderer";
const FROSTED_GLASS_ID: &str = "frosted-glass";
const GUIDE_DIVIDER: &str = "1px solid var(--yt-spec-10-percent-layer)";

/// Input to a handler invocation.
pub struct HandlerContext<'a, D: Dom> {
    pub rule: &'a ElementRule,
    /// Nodes matched by the rule's selector
    pub nodes: &'a [D::Node],
    /// Whether the rule is enabled and applicable on the current page
    pub active: bool,
}

/// Handler kinds, looked up by rule id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialHandler {
    /// Reclaim the page margin left by the hidden navigation sidebar
    Sidebar,
    /// Inject a link to the current video's full-size thumbnail
    VideoThumbnail,
    /// Toggle `disabled` on the matched nodes
    DisabledProp,
    /// Shrink the frosted header background when the tabs are hidden
    Tabs,
    /// Drop the divider above the "You" guide entry
    YouSection,
    /// Drop the divider below the first guide section
    MyClips,
    /// Pause the channel trailer
    ChannelTrailer,
    /// Open `/shorts/<id>` in the regular watch page
    RedirectShorts,
}

impl SpecialHandler {
    /// Every rule id with a registered handler.
    pub const RULE_IDS: [&'static str; 10] = [
        "sidebar",
        "video-thumbnail",
        "home-posts",
        "video-shorts-description",
        "video-views",
        "tabs",
        "you",
        "my-clips",
        "channel-trailer",
        "redirect-shorts",
    ];

    /// Registry lookup.
    pub fn for_rule(id: &str) -> Option<Self> {
        match id {
            "sidebar" => Some(Self::Sidebar),
            "video-thumbnail" => Some(Self::VideoThumbnail),
            "home-posts" | "video-shorts-description" | "video-views" => Some(Self::DisabledProp),
            "tabs" => Some(Self::Tabs),
            "you" => Some(Self::YouSection),
            "my-clips" => Some(Self::MyClips),
            "channel-trailer" => Some(Self::ChannelTrailer),
            "redirect-shorts" => Some(Self::RedirectShorts),
            _ => None,
        }
    }

    pub fn run<D: Dom>(self, dom: &D, ctx: &HandlerContext<'_, D>) -> Result<(), DomError> {
        match self {
            Self::Sidebar => sidebar(dom, ctx.active),
            Self::VideoThumbnail => video_thumbnail(dom, ctx.active),
            Self::DisabledProp => {
                for node in ctx.nodes {
                    dom.set_disabled(node, ctx.active)?;
                }
                Ok(())
            }
            Self::Tabs => match dom.element_by_id(FROSTED_GLASS_ID) {
                Some(frosted) => {
                    let height = if ctx.active { "56px" } else { "112px" };
                    dom.set_style(&frosted, "height", height, Priority::Normal)
                }
                None => Ok(()),
            },
            Self::YouSection => guide_border(dom, GUIDE_COLLAPSIBLE_SELECTOR, "border-top", ctx.active),
            Self::MyClips => guide_border(dom, GUIDE_SECTION_SELECTOR, "border-bottom", ctx.active),
            Self::ChannelTrailer => {
                if ctx.active {
                    for node in ctx.nodes {
                        dom.pause_media_within(node)?;
                    }
                }
                Ok(())
            }
            Self::RedirectShorts => redirect_shorts(dom, ctx.active),
        }
    }
}

fn sidebar<D: Dom>(dom: &D, active: bool) -> Result<(), DomError> {
    let Some(container) = dom.query(PAGE_MANAGER_SELECTOR) else {
        return Ok(());
    };
    if active {
        dom.set_style(&container, "margin-left", "0", Priority::Normal)
    } else {
        dom.remove_style(&container, "margin-left")
    }
}

fn video_thumbnail<D: Dom>(dom: &D, active: bool) -> Result<(), DomError> {
    let existing = dom.element_by_id(THUMBNAIL_ID);

    if active && existing.is_none() {
        let location = dom.location();
        let video_id = query_param(&location, "v").filter(|v| !v.is_empty());
        let items = dom.query(WATCH_NEXT_ITEMS_SELECTOR);

        if let (Some(items), Some(video_id)) = (items, video_id) {
            let thumb = Thumbnail {
                id: THUMBNAIL_ID.to_string(),
                src: format!("https://img.youtube.com/vi/{video_id}/mqdefault.jpg"),
                href: format!("https://img.youtube.com/vi/{video_id}/maxresdefault.jpg"),
            };
            dom.prepend_thumbnail(&items, &thumb)?;
        }
    } else if !active && existing.is_some() {
        dom.remove_thumbnail(THUMBNAIL_ID)?;
    }

    Ok(())
}

fn guide_border<D: Dom>(dom: &D, selector: &str, property: &str, active: bool) -> Result<(), DomError> {
    match dom.query(selector) {
        Some(node) => {
            let value = if active { "none" } else { GUIDE_DIVIDER };
            dom.set_style(&node, property, value, Priority::Normal)
        }
        None => Ok(()),
    }
}

/// Watch-page URL for a `/shorts/<id>` path.
pub fn shorts_redirect_target(path: &str) -> Option<String> {
    let video_id = path.strip_prefix("/shorts/")?.split('/').next()?;
    if video_id.is_empty() {
        None
    } else {
        Some(format!("/watch?v={video_id}"))
    }
}

fn redirect_shorts<D: Dom>(dom: &D, active: bool) -> Result<(), DomError> {
    if !active {
        return Ok(());
    }
    let location = dom.location();
    match shorts_redirect_target(extract_path(&location)) {
        Some(target) => {
            log::info!("Redirecting Shorts page to {}", target);
            dom.replace_location(&target)
        }
        None => Ok(()),
    }
}
