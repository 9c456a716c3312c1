//! In-memory page model.
//!
//! Selectors are not evaluated: tests bind a selector string to the nodes it
//! should return. Every style write is counted so idempotence is observable.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use super::{Dom, DomError, Media, Priority, Thumbnail};

/// Handle to a node in a [`MemoryDom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Default)]
struct MemNode {
    tag: String,
    attributes: BTreeMap<String, String>,
    styles: BTreeMap<String, (String, Priority)>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    detached: bool,
    rejects_styles: bool,
    rejects_watchers: bool,
    disabled: bool,
    paused: bool,
    playback_rate: Option<f64>,
    rate_watchers: usize,
}

#[derive(Debug, Default)]
pub struct MemoryDom {
    nodes: RefCell<Vec<MemNode>>,
    bindings: RefCell<HashMap<String, Vec<NodeId>>>,
    location: RefCell<String>,
    navigations: RefCell<Vec<String>>,
    style_writes: Cell<usize>,
    rate_writes: Cell<usize>,
}

impl MemoryDom {
    pub fn new(location: &str) -> Self {
        Self {
            location: RefCell::new(location.to_string()),
            ..Self::default()
        }
    }

    pub fn add_node(&self, tag: &str) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(MemNode {
            tag: tag.to_string(),
            ..MemNode::default()
        });
        NodeId(nodes.len() - 1)
    }

    /// Add a `video` element with the given playback rate.
    pub fn add_video(&self, rate: f64) -> NodeId {
        let id = self.add_node("video");
        self.nodes.borrow_mut()[id.0].playback_rate = Some(rate);
        id
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        nodes[parent.0].children.push(child);
        nodes[child.0].parent = Some(parent);
    }

    /// Make `selector` resolve to `node` (for both XPath and CSS lookups).
    pub fn bind(&self, selector: &str, node: NodeId) {
        self.bindings.borrow_mut().entry(selector.to_string()).or_default().push(node);
    }

    pub fn set_location(&self, url: &str) {
        *self.location.borrow_mut() = url.to_string();
    }

    /// Remove a node (and its subtree) from the page.
    pub fn detach(&self, node: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            nodes[id.0].detached = true;
            stack.extend(nodes[id.0].children.iter().copied());
        }
    }

    /// Make style writes on `node` fail.
    pub fn reject_styles(&self, node: NodeId) {
        self.nodes.borrow_mut()[node.0].rejects_styles = true;
    }

    /// Make listener installation on `video` fail until cleared.
    pub fn reject_watchers(&self, video: NodeId, rejected: bool) {
        self.nodes.borrow_mut()[video.0].rejects_watchers = rejected;
    }

    /// Simulate the host page changing a video's rate behind our back.
    pub fn host_set_rate(&self, video: NodeId, rate: f64) {
        self.nodes.borrow_mut()[video.0].playback_rate = Some(rate);
    }

    pub fn style(&self, node: NodeId, property: &str) -> Option<String> {
        self.nodes.borrow()[node.0].styles.get(property).map(|(v, _)| v.clone())
    }

    pub fn style_priority(&self, node: NodeId, property: &str) -> Option<Priority> {
        self.nodes.borrow()[node.0].styles.get(property).map(|(_, p)| *p)
    }

    pub fn is_disabled(&self, node: NodeId) -> bool {
        self.nodes.borrow()[node.0].disabled
    }

    pub fn is_paused(&self, node: NodeId) -> bool {
        self.nodes.borrow()[node.0].paused
    }

    pub fn rate(&self, video: NodeId) -> Option<f64> {
        self.nodes.borrow()[video.0].playback_rate
    }

    pub fn rate_watchers(&self, video: NodeId) -> usize {
        self.nodes.borrow()[video.0].rate_watchers
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let nodes = self.nodes.borrow();
        nodes[node.0].children.iter().copied().filter(|c| !nodes[c.0].detached).collect()
    }

    pub fn tag(&self, node: NodeId) -> String {
        self.nodes.borrow()[node.0].tag.clone()
    }

    pub fn style_writes(&self) -> usize {
        self.style_writes.get()
    }

    pub fn rate_writes(&self) -> usize {
        self.rate_writes.get()
    }

    /// URLs passed to `replace_location`, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.borrow().clone()
    }

    fn bound(&self, selector: &str) -> Vec<NodeId> {
        let nodes = self.nodes.borrow();
        self.bindings
            .borrow()
            .get(selector)
            .map(|ids| ids.iter().copied().filter(|id| !nodes[id.0].detached).collect())
            .unwrap_or_default()
    }

    fn live(&self, node: NodeId) -> Result<(), DomError> {
        if self.nodes.borrow()[node.0].detached {
            Err(DomError::Detached)
        } else {
            Ok(())
        }
    }
}

impl Dom for MemoryDom {
    type Node = NodeId;

    fn location(&self) -> String {
        self.location.borrow().clone()
    }

    fn select(&self, xpath: &str) -> Vec<NodeId> {
        self.bound(xpath)
    }

    fn query(&self, css: &str) -> Option<NodeId> {
        self.bound(css).into_iter().next()
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        let nodes = self.nodes.borrow();
        nodes
            .iter()
            .position(|n| !n.detached && n.attributes.get("id").is_some_and(|v| v == id))
            .map(NodeId)
    }

    fn set_style(&self, node: &NodeId, property: &str, value: &str, priority: Priority) -> Result<(), DomError> {
        self.live(*node)?;
        let mut nodes = self.nodes.borrow_mut();
        if nodes[node.0].rejects_styles {
            return Err(DomError::Rejected(format!("cannot set {property}")));
        }
        nodes[node.0].styles.insert(property.to_string(), (value.to_string(), priority));
        self.style_writes.set(self.style_writes.get() + 1);
        Ok(())
    }

    fn remove_style(&self, node: &NodeId, property: &str) -> Result<(), DomError> {
        self.live(*node)?;
        let mut nodes = self.nodes.borrow_mut();
        if nodes[node.0].rejects_styles {
            return Err(DomError::Rejected(format!("cannot remove {property}")));
        }
        nodes[node.0].styles.remove(property);
        self.style_writes.set(self.style_writes.get() + 1);
        Ok(())
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        self.nodes.borrow()[node.0].attributes.get(name).cloned()
    }

    fn set_attribute(&self, node: &NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.live(*node)?;
        self.nodes.borrow_mut()[node.0].attributes.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove_attribute(&self, node: &NodeId, name: &str) -> Result<(), DomError> {
        self.live(*node)?;
        self.nodes.borrow_mut()[node.0].attributes.remove(name);
        Ok(())
    }

    fn set_disabled(&self, node: &NodeId, disabled: bool) -> Result<(), DomError> {
        self.live(*node)?;
        self.nodes.borrow_mut()[node.0].disabled = disabled;
        Ok(())
    }

    fn pause_media_within(&self, node: &NodeId) -> Result<(), DomError> {
        self.live(*node)?;
        let mut nodes = self.nodes.borrow_mut();
        let mut stack = vec![*node];
        while let Some(id) = stack.pop() {
            if nodes[id.0].tag == "video" {
                nodes[id.0].paused = true;
            }
            stack.extend(nodes[id.0].children.iter().copied());
        }
        Ok(())
    }

    fn prepend_thumbnail(&self, container: &NodeId, thumb: &Thumbnail) -> Result<(), DomError> {
        self.live(*container)?;
        let wrapper = self.add_node("ytd-thumbnail");
        let link = self.add_node("a");
        let image = self.add_node("img");
        {
            let mut nodes = self.nodes.borrow_mut();
            nodes[link.0].attributes.insert("href".to_string(), thumb.href.clone());
            nodes[link.0].attributes.insert("target".to_string(), "_blank".to_string());
            nodes[image.0].attributes.insert("id".to_string(), thumb.id.clone());
            nodes[image.0].attributes.insert("src".to_string(), thumb.src.clone());
        }
        self.append_child(link, image);
        self.append_child(wrapper, link);

        let mut nodes = self.nodes.borrow_mut();
        nodes[wrapper.0].parent = Some(*container);
        nodes[container.0].children.insert(0, wrapper);
        Ok(())
    }

    fn remove_thumbnail(&self, id: &str) -> Result<(), DomError> {
        let Some(image) = self.element_by_id(id) else {
            return Ok(());
        };
        let wrapper = {
            let nodes = self.nodes.borrow();
            let mut current = nodes[image.0].parent;
            while let Some(c) = current {
                if nodes[c.0].tag == "ytd-thumbnail" {
                    break;
                }
                current = nodes[c.0].parent;
            }
            current.unwrap_or(image)
        };
        self.detach(wrapper);
        Ok(())
    }

    fn replace_location(&self, url: &str) -> Result<(), DomError> {
        self.navigations.borrow_mut().push(url.to_string());
        Ok(())
    }
}

impl Media for MemoryDom {
    fn main_video(&self) -> Option<NodeId> {
        self.query("video.html5-main-video").or_else(|| {
            let nodes = self.nodes.borrow();
            nodes.iter().position(|n| !n.detached && n.tag == "video").map(NodeId)
        })
    }

    fn playback_rate(&self, video: &NodeId) -> Option<f64> {
        self.nodes.borrow()[video.0].playback_rate
    }

    fn set_playback_rate(&self, video: &NodeId, rate: f64) -> Result<(), DomError> {
        self.live(*video)?;
        self.nodes.borrow_mut()[video.0].playback_rate = Some(rate);
        self.rate_writes.set(self.rate_writes.get() + 1);
        Ok(())
    }

    fn watch_rate_changes(&self, video: &NodeId) -> Result<(), DomError> {
        self.live(*video)?;
        if self.nodes.borrow()[video.0].rejects_watchers {
            return Err(DomError::Rejected("listener refused".to_string()));
        }
        self.nodes.borrow_mut()[video.0].rate_watchers += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_selectors_skip_detached() {
        let dom = MemoryDom::new("https://www.youtube.com/");
        let a = dom.add_node("div");
        let b = dom.add_node("div");
        dom.bind("//div", a);
        dom.bind("//div", b);
        dom.detach(a);
        assert_eq!(dom.select("//div"), vec![b]);
        assert!(dom.select("//missing").is_empty());
    }

    #[test]
    fn test_thumbnail_insert_and_remove() {
        let dom = MemoryDom::new("https://www.youtube.com/watch?v=x");
        let items = dom.add_node("div");
        let existing = dom.add_node("ytd-compact-video-renderer");
        dom.append_child(items, existing);

        let thumb = Thumbnail {
            id: "thumb".to_string(),
            src: "s".to_string(),
            href: "h".to_string(),
        };
        dom.prepend_thumbnail(&items, &thumb).unwrap();
        let children = dom.children(items);
        assert_eq!(children.len(), 2);
        assert_eq!(dom.tag(children[0]), "ytd-thumbnail");
        assert!(dom.element_by_id("thumb").is_some());

        dom.remove_thumbnail("thumb").unwrap();
        assert!(dom.element_by_id("thumb").is_none());
        assert_eq!(dom.children(items), vec![existing]);
    }
}
