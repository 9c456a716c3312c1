//! Page-type classification from the current URL.

use crate::types::PageType;

const SITE_ROOTS: &[&str] = &["https://www.youtube.com/", "https://m.youtube.com/"];

/// Classify a URL on the video site. `None` means the page type is unknown.
pub fn get_page_type(url: &str) -> Option<PageType> {
    for root in SITE_ROOTS {
        if let Some(rest) = url.strip_prefix(root) {
            if rest.is_empty() || rest.starts_with('?') {
                return Some(PageType::Home);
            }
        }
    }

    if url.contains("/watch") {
        Some(PageType::Video)
    } else if url.contains("/feed/subscriptions") {
        Some(PageType::Subscriptions)
    } else if url.contains("/results?search_query") {
        Some(PageType::Search)
    } else if url.contains("/feed/trending") {
        Some(PageType::Trending)
    } else if url.contains("/feed/downloads") {
        Some(PageType::Downloads)
    } else if url.contains("/@") {
        Some(PageType::Channel)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home() {
        assert_eq!(get_page_type("https://www.youtube.com/"), Some(PageType::Home));
        assert_eq!(get_page_type("https://www.youtube.com/?bp=abc"), Some(PageType::Home));
        assert_eq!(get_page_type("https://m.youtube.com/"), Some(PageType::Home));
    }

    #[test]
    fn test_sections() {
        assert_eq!(get_page_type("https://www.youtube.com/watch?v=abc"), Some(PageType::Video));
        assert_eq!(
            get_page_type("https://www.youtube.com/feed/subscriptions"),
            Some(PageType::Subscriptions)
        );
        assert_eq!(
            get_page_type("https://www.youtube.com/results?search_query=rust"),
            Some(PageType::Search)
        );
        assert_eq!(get_page_type("https://www.youtube.com/feed/trending"), Some(PageType::Trending));
        assert_eq!(get_page_type("https://www.youtube.com/feed/downloads"), Some(PageType::Downloads));
        assert_eq!(get_page_type("https://www.youtube.com/@somechannel/videos"), Some(PageType::Channel));
    }

    #[test]
    fn test_unknown() {
        assert_eq!(get_page_type("https://www.youtube.com/shorts/abc"), None);
        assert_eq!(get_page_type("https://www.youtube.com/feed/history"), None);
        assert_eq!(get_page_type("https://www.youtube.com/playlist?list=x"), None);
    }
}
