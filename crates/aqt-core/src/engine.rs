//! Element Reconciliation Engine
//!
//! Applies the enabled, page-relevant element rules to the page as inline
//! styles and removes them again when a rule is switched off or stops
//! applying. Each pass is idempotent: the last value written per node and
//! rule is recorded on the node itself, so repeated passes triggered by DOM
//! mutations write nothing new.

use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use crate::config::ContentConfig;
use crate::dom::{Dom, DomError, Priority};
use crate::handlers::{HandlerContext, SpecialHandler};
use crate::page::get_page_type;
use crate::storage::merge_with_defaults;
use crate::types::{ElementRule, PageMask, PageType};

/// Attribute prefix of the per-node applied-style record, one per rule id.
pub const APPLIED_ATTR_PREFIX: &str = "data-aqt-applied-";

/// Whether a rule with `mask` applies on `page`.
///
/// Global rules (empty mask) apply everywhere. On a page of unknown type
/// every rule applies.
#[inline]
pub fn is_applicable(mask: PageMask, page: Option<PageType>) -> bool {
    match page {
        _ if mask.is_empty() => true,
        None => true,
        Some(page) => mask.contains(page.mask()),
    }
}

/// Rules that are global or tagged with `page`.
pub fn relevant_rules(rules: &[ElementRule], page: Option<PageType>) -> Vec<&ElementRule> {
    rules.iter().filter(|r| is_applicable(r.page_mask(), page)).collect()
}

/// Counters from a single reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Rules whose selector was evaluated
    pub evaluated: usize,
    /// Style declarations written
    pub applied: usize,
    /// Style declarations removed
    pub removed: usize,
    /// Node or handler operations that failed
    pub failures: usize,
}

struct CompiledRule {
    rule: ElementRule,
    mask: PageMask,
    handler: Option<SpecialHandler>,
    marker: String,
    record: String,
}

impl CompiledRule {
    fn new(rule: ElementRule) -> Self {
        Self {
            mask: rule.page_mask(),
            handler: SpecialHandler::for_rule(&rule.id),
            marker: format!("{}{}", APPLIED_ATTR_PREFIX, rule.id),
            record: format!("{}:{}", rule.property, rule.style),
            rule,
        }
    }
}

/// The reconciliation engine for one page context.
pub struct ElementManager {
    defaults: Vec<ElementRule>,
    rules: Vec<CompiledRule>,
    page_type: Option<PageType>,
    config: ContentConfig,
}

impl ElementManager {
    pub fn new(defaults: Vec<ElementRule>, config: ContentConfig) -> Self {
        Self {
            defaults,
            rules: Vec::new(),
            page_type: None,
            config,
        }
    }

    /// Merge stored toggles with the defaults, classify the page and run
    /// the first pass. The caller then subscribes the engine to the page's
    /// debounced change feed.
    pub fn initialize<D: Dom>(&mut self, dom: &D, stored: Option<&Value>) -> PassStats {
        self.set_rules(merge_with_defaults(&self.defaults, stored));
        self.update_page_type(dom);
        info!(
            "Element manager initialized with {} rules ({} enabled)",
            self.rules.len(),
            self.rules.iter().filter(|r| r.rule.checked).count()
        );
        self.apply_all_elements(dom, true)
    }

    /// Replace the rule set from a new stored value and run a full pass,
    /// stripping rules that are no longer active.
    pub fn update_elements<D: Dom>(&mut self, dom: &D, stored: Option<&Value>) -> PassStats {
        debug!("Updating element rules");
        self.set_rules(merge_with_defaults(&self.defaults, stored));
        self.apply_all_elements(dom, true)
    }

    /// Recompute the page type from the current URL.
    pub fn update_page_type<D: Dom>(&mut self, dom: &D) -> Option<PageType> {
        self.page_type = get_page_type(&dom.location());
        self.page_type
    }

    /// Navigation happened: reclassify and clean up rules that stopped
    /// applying.
    pub fn on_navigation<D: Dom>(&mut self, dom: &D) -> PassStats {
        let page = self.update_page_type(dom);
        debug!("Navigated, page type {:?}", page);
        self.apply_all_elements(dom, true)
    }

    /// Debounced DOM-change signal.
    pub fn on_dom_changed<D: Dom>(&self, dom: &D) -> PassStats {
        self.apply_all_elements(dom, false)
    }

    /// Reconcile every rule against the page.
    ///
    /// With `clean_inactive` false, inactive rules are skipped entirely and
    /// their selectors are not evaluated. Removals run before writes, and a
    /// property still claimed by an active rule on the same node is left in
    /// place, so the outcome does not depend on rule order.
    pub fn apply_all_elements<D: Dom>(&self, dom: &D, clean_inactive: bool) -> PassStats {
        let mut stats = PassStats::default();
        let mut active_rules = Vec::new();
        let mut inactive_rules = Vec::new();

        for compiled in &self.rules {
            let active = compiled.rule.checked && is_applicable(compiled.mask, self.page_type);
            if !active && !clean_inactive {
                continue;
            }
            let nodes = self.select_and_handle(dom, compiled, active, &mut stats);
            if active {
                active_rules.push((compiled, nodes));
            } else {
                inactive_rules.push((compiled, nodes));
            }
        }

        let claimed = |node: &D::Node, property: &str| {
            active_rules
                .iter()
                .any(|(c, nodes)| c.rule.property == property && nodes.contains(node))
        };

        for (compiled, nodes) in &inactive_rules {
            for node in nodes {
                let keep_style = claimed(node, &compiled.rule.property);
                match remove_style(dom, node, compiled, keep_style) {
                    Ok(removed) => stats.removed += usize::from(removed),
                    Err(e) => {
                        debug!("Style removal for '{}' failed: {}", compiled.rule.id, e);
                        stats.failures += 1;
                    }
                }
            }
        }

        for (compiled, nodes) in &active_rules {
            for node in nodes {
                match apply_style(dom, node, compiled) {
                    Ok(written) => stats.applied += usize::from(written),
                    Err(e) => {
                        debug!("Style write for '{}' failed: {}", compiled.rule.id, e);
                        stats.failures += 1;
                    }
                }
            }
        }

        if stats.applied > 0 || stats.removed > 0 || stats.failures > 0 {
            debug!(
                "Reconciled {} rules: {} applied, {} removed, {} failed",
                stats.evaluated, stats.applied, stats.removed, stats.failures
            );
        }
        stats
    }

    /// Evaluate the selector and run the rule's special handler, if any.
    fn select_and_handle<D: Dom>(
        &self,
        dom: &D,
        compiled: &CompiledRule,
        active: bool,
        stats: &mut PassStats,
    ) -> Vec<D::Node> {
        let rule = &compiled.rule;
        let nodes = dom.select(&rule.selector);
        stats.evaluated += 1;

        if let Some(handler) = compiled.handler {
            let ctx = HandlerContext::<D> {
                rule,
                nodes: &nodes,
                active,
            };
            if let Err(e) = handler.run(dom, &ctx) {
                warn!("Handler for '{}' failed: {}", rule.id, e);
                stats.failures += 1;
            }
        }
        nodes
    }

    fn set_rules(&mut self, rules: Vec<ElementRule>) {
        self.rules = rules.into_iter().map(CompiledRule::new).collect();
    }

    pub fn rules(&self) -> impl Iterator<Item = &ElementRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    pub fn page_type(&self) -> Option<PageType> {
        self.page_type
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.mutation_debounce_ms))
    }

    /// Drop the rule set. Effects already on the page stay.
    pub fn destroy(&mut self) {
        self.rules.clear();
        self.page_type = None;
    }
}

/// Write the rule's declaration unless the node's record shows it is
/// already applied. Returns whether a write happened.
fn apply_style<D: Dom>(dom: &D, node: &D::Node, compiled: &CompiledRule) -> Result<bool, DomError> {
    if dom.attribute(node, &compiled.marker).as_deref() == Some(compiled.record.as_str()) {
        return Ok(false);
    }
    dom.set_style(node, &compiled.rule.property, &compiled.rule.style, Priority::Important)?;
    dom.set_attribute(node, &compiled.marker, &compiled.record)?;
    Ok(true)
}

/// Drop the rule's record if this engine applied it, and its declaration
/// unless `keep_style` says another active rule still owns the property.
/// Returns whether a declaration was removed.
fn remove_style<D: Dom>(dom: &D, node: &D::Node, compiled: &CompiledRule, keep_style: bool) -> Result<bool, DomError> {
    if dom.attribute(node, &compiled.marker).is_none() {
        return Ok(false);
    }
    if !keep_style {
        dom.remove_style(node, &compiled.rule.property)?;
    }
    dom.remove_attribute(node, &compiled.marker)?;
    Ok(!keep_style)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::catalog::default_rules;
    use crate::dom::memory::{MemoryDom, NodeId};
    use crate::types::RuleCategory;

    fn rule(id: &str, selector: &str, pages: &[PageType], checked: bool) -> ElementRule {
        ElementRule {
            id: id.to_string(),
            label: id.to_string(),
            selector: selector.to_string(),
            property: "display".to_string(),
            style: "none".to_string(),
            page_types: pages.to_vec(),
            category: RuleCategory::Other,
            checked,
        }
    }

    fn defaults() -> Vec<ElementRule> {
        vec![
            rule("feed", "//feed", &[PageType::Home], false),
            rule("comments", "//comments", &[PageType::Video], false),
            rule("bell", "//bell", &[], false),
        ]
    }

    fn page() -> (MemoryDom, NodeId, NodeId, NodeId) {
        let dom = MemoryDom::new("https://www.youtube.com/");
        let feed = dom.add_node("feed");
        let comments = dom.add_node("comments");
        let bell = dom.add_node("bell");
        dom.bind("//feed", feed);
        dom.bind("//comments", comments);
        dom.bind("//bell", bell);
        (dom, feed, comments, bell)
    }

    fn enabled(ids: &[&str]) -> Value {
        Value::Array(ids.iter().map(|id| json!({ "id": id, "checked": true })).collect())
    }

    #[test]
    fn test_relevant_rules() {
        fn ids(rules: &[ElementRule], page: Option<PageType>) -> Vec<String> {
            relevant_rules(rules, page).iter().map(|r| r.id.clone()).collect()
        }

        let rules = defaults();
        assert_eq!(ids(&rules, Some(PageType::Home)), vec!["feed", "bell"]);
        assert_eq!(ids(&rules, Some(PageType::Video)), vec!["comments", "bell"]);
        assert_eq!(ids(&rules, Some(PageType::Search)), vec!["bell"]);
        assert_eq!(ids(&rules, None), vec!["feed", "comments", "bell"]);
    }

    #[test]
    fn test_initialize_applies_relevant_enabled_rules() {
        let (dom, feed, comments, bell) = page();
        let mut manager = ElementManager::new(defaults(), ContentConfig::default());
        let stored = enabled(&["feed", "comments", "bell"]);
        manager.initialize(&dom, Some(&stored));

        assert_eq!(manager.page_type(), Some(PageType::Home));
        assert_eq!(dom.style(feed, "display").as_deref(), Some("none"));
        assert_eq!(dom.style_priority(feed, "display"), Some(Priority::Important));
        assert_eq!(dom.style(bell, "display").as_deref(), Some("none"));
        assert_eq!(dom.style(comments, "display"), None);
    }

    #[test]
    fn test_second_pass_writes_nothing() {
        let (dom, feed, _, _) = page();
        let mut manager = ElementManager::new(defaults(), ContentConfig::default());
        manager.initialize(&dom, Some(&enabled(&["feed"])));
        assert_eq!(dom.style_writes(), 1);

        let stats = manager.on_dom_changed(&dom);
        assert_eq!(stats.applied, 0);
        assert_eq!(dom.style_writes(), 1);
        assert_eq!(dom.attribute(&feed, "data-aqt-applied-feed").as_deref(), Some("display:none"));
    }

    #[test]
    fn test_new_nodes_picked_up_on_mutation() {
        let (dom, _, _, _) = page();
        let mut manager = ElementManager::new(defaults(), ContentConfig::default());
        manager.initialize(&dom, Some(&enabled(&["feed"])));

        let late = dom.add_node("feed");
        dom.bind("//feed", late);
        let stats = manager.on_dom_changed(&dom);
        assert_eq!(stats.applied, 1);
        assert_eq!(dom.style(late, "display").as_deref(), Some("none"));
    }

    #[test]
    fn test_disabling_removes_only_own_styles() {
        let (dom, feed, _, bell) = page();
        dom.set_style(&bell, "display", "flex", Priority::Normal).unwrap();

        let mut manager = ElementManager::new(defaults(), ContentConfig::default());
        manager.initialize(&dom, Some(&enabled(&["feed"])));
        let stats = manager.update_elements(&dom, Some(&json!([])));

        assert_eq!(stats.removed, 1);
        assert_eq!(dom.style(feed, "display"), None);
        assert_eq!(dom.style(bell, "display").as_deref(), Some("flex"));
        assert_eq!(dom.attribute(&feed, "data-aqt-applied-feed"), None);
    }

    #[test]
    fn test_mutation_pass_skips_inactive_rules() {
        let (dom, _, _, _) = page();
        let mut manager = ElementManager::new(defaults(), ContentConfig::default());
        manager.initialize(&dom, Some(&enabled(&["bell"])));

        let stats = manager.apply_all_elements(&dom, false);
        assert_eq!(stats.evaluated, 1);
        let stats = manager.apply_all_elements(&dom, true);
        assert_eq!(stats.evaluated, 3);
    }

    #[test]
    fn test_navigation_strips_rules_that_stop_applying() {
        let (dom, feed, comments, _) = page();
        let mut manager = ElementManager::new(defaults(), ContentConfig::default());
        manager.initialize(&dom, Some(&enabled(&["feed", "comments"])));
        assert_eq!(dom.style(feed, "display").as_deref(), Some("none"));

        dom.set_location("https://www.youtube.com/watch?v=abc");
        manager.on_navigation(&dom);
        assert_eq!(manager.page_type(), Some(PageType::Video));
        assert_eq!(dom.style(feed, "display"), None);
        assert_eq!(dom.style(comments, "display").as_deref(), Some("none"));
    }

    #[test]
    fn test_failing_node_does_not_abort_pass() {
        let dom = MemoryDom::new("https://www.youtube.com/");
        let bad = dom.add_node("bell");
        let good = dom.add_node("bell");
        dom.bind("//bell", bad);
        dom.bind("//bell", good);
        dom.reject_styles(bad);

        let mut manager = ElementManager::new(defaults(), ContentConfig::default());
        let stats = manager.initialize(&dom, Some(&enabled(&["bell"])));
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(dom.style(good, "display").as_deref(), Some("none"));
        assert_eq!(dom.attribute(&bad, "data-aqt-applied-bell"), None);
    }

    #[test]
    fn test_missing_nodes_are_a_no_op() {
        let dom = MemoryDom::new("https://www.youtube.com/");
        let mut manager = ElementManager::new(defaults(), ContentConfig::default());
        let stats = manager.initialize(&dom, Some(&enabled(&["feed", "bell"])));
        assert_eq!(stats, PassStats { evaluated: 3, ..PassStats::default() });
    }

    #[test]
    fn test_order_independent() {
        let all = default_rules();
        let checked: Vec<ElementRule> = all.into_iter().map(|r| ElementRule { checked: true, ..r }).collect();
        let mut reversed = checked.clone();
        reversed.reverse();

        let snapshot = |rules: Vec<ElementRule>| {
            let dom = MemoryDom::new("https://www.youtube.com/watch?v=abc");
            let nodes: Vec<NodeId> = rules
                .iter()
                .map(|r| {
                    let n = dom.add_node("div");
                    dom.bind(&r.selector, n);
                    n
                })
                .collect();
            let stored = Value::Array(rules.iter().map(|r| json!({ "id": r.id, "checked": true })).collect());
            let mut manager = ElementManager::new(rules.clone(), ContentConfig::default());
            manager.initialize(&dom, Some(&stored));
            let mut applied: Vec<(String, Option<String>)> = rules
                .iter()
                .zip(&nodes)
                .map(|(r, n)| (r.id.clone(), dom.style(*n, &r.property)))
                .collect();
            applied.sort();
            applied
        };

        assert_eq!(snapshot(checked), snapshot(reversed));
    }

    #[test]
    fn test_shared_node_order_independent() {
        let on_search = rule("search-only", "//search-shelf", &[PageType::Search], true);
        let on_video = rule("video-only", "//video-shelf", &[PageType::Video], true);

        let outcome = |rules: Vec<ElementRule>| {
            let dom = MemoryDom::new("https://www.youtube.com/results?search_query=rust");
            let shelf = dom.add_node("ytd-reel-shelf-renderer");
            dom.bind("//search-shelf", shelf);
            dom.bind("//video-shelf", shelf);

            let mut manager = ElementManager::new(rules, ContentConfig::default());
            manager.initialize(&dom, None);
            assert_eq!(dom.style(shelf, "display").as_deref(), Some("none"));

            dom.set_location("https://www.youtube.com/watch?v=abc");
            manager.on_navigation(&dom);
            let after_nav = dom.style(shelf, "display");
            let writes = dom.style_writes();
            let again = manager.on_navigation(&dom);
            (after_nav, again, dom.style_writes() - writes)
        };

        let forward = outcome(vec![on_search.clone(), on_video.clone()]);
        let backward = outcome(vec![on_video, on_search]);
        assert_eq!(forward.0.as_deref(), Some("none"));
        assert_eq!(forward, backward);
        // A settled page is left alone by later clean passes.
        assert_eq!(forward.1.applied, 0);
        assert_eq!(forward.1.removed, 0);
        assert_eq!(forward.2, 0);
    }

    #[test]
    fn test_shared_node_released_when_last_rule_stops() {
        let dom = MemoryDom::new("https://www.youtube.com/watch?v=abc");
        let shelf = dom.add_node("ytd-reel-shelf-renderer");
        dom.bind("//a", shelf);
        dom.bind("//b", shelf);
        let rules = vec![rule("a", "//a", &[], false), rule("b", "//b", &[], false)];

        let mut manager = ElementManager::new(rules, ContentConfig::default());
        manager.initialize(&dom, Some(&enabled(&["a", "b"])));
        manager.update_elements(&dom, Some(&enabled(&["b"])));
        assert_eq!(dom.style(shelf, "display").as_deref(), Some("none"));
        assert_eq!(dom.attribute(&shelf, "data-aqt-applied-a"), None);

        let stats = manager.update_elements(&dom, Some(&json!([])));
        assert_eq!(stats.removed, 1);
        assert_eq!(dom.style(shelf, "display"), None);
    }

    #[test]
    fn test_handler_runs_with_generic_toggle() {
        let dom = MemoryDom::new("https://www.youtube.com/");
        let posts = dom.add_node("ytd-rich-section-renderer");
        let rules = default_rules();
        let selector = rules.iter().find(|r| r.id == "home-posts").unwrap().selector.clone();
        dom.bind(&selector, posts);

        let mut manager = ElementManager::new(rules, ContentConfig::default());
        manager.initialize(&dom, Some(&enabled(&["home-posts"])));
        assert!(dom.is_disabled(posts));
        assert_eq!(dom.style(posts, "display").as_deref(), Some("none"));

        manager.update_elements(&dom, None);
        assert!(!dom.is_disabled(posts));
        assert_eq!(dom.style(posts, "display"), None);
    }
}
