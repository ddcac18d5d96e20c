//! Host page abstraction
//!
//! The render surfaces only touch the host page through [`HostPage`]:
//! element lookup/creation, styling, attaching a live track to a video
//! element, and posting messages to the hosted page's scripts.
//! [`VirtualPage`] is a retained in-memory element tree implementing it.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

/// Identity-stable handle to a page element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Element-tree and messaging surface of the hosted page
pub trait HostPage: Send + Sync {
    /// Look up an element by id
    fn find_element(&self, id: &str) -> Option<ElementHandle>;

    /// Create a detached element
    fn create_element(&self, tag: &str, id: &str) -> ElementHandle;

    /// Append `child` to `parent`, or to the body when `parent` is `None`
    fn append_child(&self, parent: Option<ElementHandle>, child: ElementHandle);

    /// Remove an element (and its subtree) from the page
    fn remove_element(&self, element: ElementHandle);

    /// Remove every child of `element`
    fn clear_children(&self, element: ElementHandle);

    fn set_style(&self, element: ElementHandle, property: &str, value: &str);

    /// Set an attribute, on the body when `element` is `None`
    fn set_attribute(&self, element: Option<ElementHandle>, name: &str, value: &str);

    /// Bind a live track to a video element (`None` unbinds)
    fn set_video_source(&self, video: ElementHandle, track_id: Option<&str>);

    /// Start playback of a video element
    fn play(&self, video: ElementHandle);

    /// Deliver a message to the hosted page's scripts
    fn post_message(&self, message: Value);

    /// Stop accepting messages from the hosted page
    fn detach_listener(&self);
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    id: String,
    parent: Option<ElementHandle>,
    attached: bool,
    styles: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
    video_source: Option<String>,
    playing: bool,
}

/// Posted messages a [`VirtualPage`] retains by default
pub const DEFAULT_MESSAGE_HISTORY: usize = 256;

#[derive(Debug, Default)]
struct PageState {
    next_handle: u64,
    nodes: BTreeMap<ElementHandle, Node>,
    body_attributes: BTreeMap<String, String>,
    messages: VecDeque<Value>,
    message_history: usize,
    listener_attached: bool,
    created: u64,
}

impl PageState {
    fn descendants(&self, root: ElementHandle) -> Vec<ElementHandle> {
        let mut found = vec![root];
        let mut cursor = 0;
        while cursor < found.len() {
            let current = found[cursor];
            found.extend(
                self.nodes
                    .iter()
                    .filter(|(_, node)| node.parent == Some(current))
                    .map(|(handle, _)| *handle),
            );
            cursor += 1;
        }
        found
    }
}

/// In-memory page used for headless agents and tests
#[derive(Debug)]
pub struct VirtualPage {
    state: Mutex<PageState>,
}

impl VirtualPage {
    pub fn new() -> Self {
        Self::with_message_history(DEFAULT_MESSAGE_HISTORY)
    }

    /// Page keeping only the latest `capacity` posted messages
    pub fn with_message_history(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PageState {
                listener_attached: true,
                message_history: capacity,
                ..PageState::default()
            }),
        }
    }

    /// Add an element the page itself authored, attached to the body
    pub fn insert_existing(&self, tag: &str, id: &str) -> ElementHandle {
        let handle = self.create_element(tag, id);
        self.append_child(None, handle);
        handle
    }

    /// Whether the element is currently part of the page
    pub fn contains(&self, element: ElementHandle) -> bool {
        self.state
            .lock()
            .nodes
            .get(&element)
            .map(|node| node.attached)
            .unwrap_or(false)
    }

    /// Attached children of `element`
    pub fn children(&self, element: ElementHandle) -> Vec<ElementHandle> {
        self.state
            .lock()
            .nodes
            .iter()
            .filter(|(_, node)| node.parent == Some(element) && node.attached)
            .map(|(handle, _)| *handle)
            .collect()
    }

    pub fn style(&self, element: ElementHandle, property: &str) -> Option<String> {
        self.state
            .lock()
            .nodes
            .get(&element)
            .and_then(|node| node.styles.get(property).cloned())
    }

    pub fn tag(&self, element: ElementHandle) -> Option<String> {
        self.state.lock().nodes.get(&element).map(|node| node.tag.clone())
    }

    pub fn video_source(&self, element: ElementHandle) -> Option<String> {
        self.state
            .lock()
            .nodes
            .get(&element)
            .and_then(|node| node.video_source.clone())
    }

    pub fn is_playing(&self, element: ElementHandle) -> bool {
        self.state
            .lock()
            .nodes
            .get(&element)
            .map(|node| node.playing)
            .unwrap_or(false)
    }

    pub fn attribute(&self, element: ElementHandle, name: &str) -> Option<String> {
        self.state
            .lock()
            .nodes
            .get(&element)
            .and_then(|node| node.attributes.get(name).cloned())
    }

    pub fn body_attribute(&self, name: &str) -> Option<String> {
        self.state.lock().body_attributes.get(name).cloned()
    }

    /// Latest messages posted to the page, oldest first
    pub fn messages(&self) -> Vec<Value> {
        self.state.lock().messages.iter().cloned().collect()
    }

    pub fn listener_attached(&self) -> bool {
        self.state.lock().listener_attached
    }

    /// Total number of elements ever created
    pub fn created_count(&self) -> u64 {
        self.state.lock().created
    }

    /// Number of attached elements
    pub fn attached_count(&self) -> usize {
        self.state.lock().nodes.values().filter(|node| node.attached).count()
    }
}

impl Default for VirtualPage {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPage for VirtualPage {
    fn find_element(&self, id: &str) -> Option<ElementHandle> {
        self.state
            .lock()
            .nodes
            .iter()
            .find(|(_, node)| node.attached && node.id == id)
            .map(|(handle, _)| *handle)
    }

    fn create_element(&self, tag: &str, id: &str) -> ElementHandle {
        let mut state = self.state.lock();
        state.next_handle += 1;
        state.created += 1;
        let handle = ElementHandle(state.next_handle);
        state.nodes.insert(
            handle,
            Node {
                tag: tag.to_string(),
                id: id.to_string(),
                parent: None,
                attached: false,
                styles: BTreeMap::new(),
                attributes: BTreeMap::new(),
                video_source: None,
                playing: false,
            },
        );
        handle
    }

    fn append_child(&self, parent: Option<ElementHandle>, child: ElementHandle) {
        let mut state = self.state.lock();
        let attached = match parent {
            None => true,
            Some(p) => state.nodes.get(&p).map(|node| node.attached).unwrap_or(false),
        };
        let subtree = state.descendants(child);
        if let Some(node) = state.nodes.get_mut(&child) {
            node.parent = parent;
        }
        for handle in subtree {
            if let Some(node) = state.nodes.get_mut(&handle) {
                node.attached = attached;
            }
        }
    }

    fn remove_element(&self, element: ElementHandle) {
        let mut state = self.state.lock();
        for handle in state.descendants(element) {
            state.nodes.remove(&handle);
        }
    }

    fn clear_children(&self, element: ElementHandle) {
        let mut state = self.state.lock();
        let subtree = state.descendants(element);
        for handle in subtree.into_iter().skip(1) {
            state.nodes.remove(&handle);
        }
    }

    fn set_style(&self, element: ElementHandle, property: &str, value: &str) {
        if let Some(node) = self.state.lock().nodes.get_mut(&element) {
            node.styles.insert(property.to_string(), value.to_string());
        }
    }

    fn set_attribute(&self, element: Option<ElementHandle>, name: &str, value: &str) {
        let mut state = self.state.lock();
        match element {
            None => {
                state.body_attributes.insert(name.to_string(), value.to_string());
            }
            Some(handle) => {
                if let Some(node) = state.nodes.get_mut(&handle) {
                    node.attributes.insert(name.to_string(), value.to_string());
                }
            }
        }
    }

    fn set_video_source(&self, video: ElementHandle, track_id: Option<&str>) {
        if let Some(node) = self.state.lock().nodes.get_mut(&video) {
            node.video_source = track_id.map(str::to_string);
            if track_id.is_none() {
                node.playing = false;
            }
        }
    }

    fn play(&self, video: ElementHandle) {
        if let Some(node) = self.state.lock().nodes.get_mut(&video) {
            node.playing = node.video_source.is_some();
        }
    }

    fn post_message(&self, message: Value) {
        tracing::debug!(payload = %message, "Posting message to page");
        let mut state = self.state.lock();
        if state.message_history == 0 {
            return;
        }
        while state.messages.len() >= state.message_history {
            state.messages.pop_front();
        }
        state.messages.push_back(message);
    }

    fn detach_listener(&self) {
        self.state.lock().listener_attached = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_drops_subtree() {
        let page = VirtualPage::new();
        let slot = page.insert_existing("div", "slot");
        let inner = page.create_element("div", "inner");
        page.append_child(Some(slot), inner);
        let video = page.create_element("video", "video");
        page.append_child(Some(inner), video);

        assert!(page.contains(video));
        page.remove_element(inner);
        assert!(!page.contains(video));
        assert!(page.contains(slot));
        assert!(page.children(slot).is_empty());
    }

    #[test]
    fn test_message_history_is_bounded() {
        let page = VirtualPage::with_message_history(3);
        for n in 0..10 {
            page.post_message(serde_json::json!({ "n": n }));
        }
        let kept: Vec<_> = page.messages().iter().map(|m| m["n"].clone()).collect();
        assert_eq!(kept, vec![7, 8, 9]);

        let silent = VirtualPage::with_message_history(0);
        silent.post_message(serde_json::json!({ "n": 1 }));
        assert!(silent.messages().is_empty());
    }

    #[test]
    fn test_detached_elements_are_not_found() {
        let page = VirtualPage::new();
        let element = page.create_element("div", "floating");
        assert_eq!(page.find_element("floating"), None);
        page.append_child(None, element);
        assert_eq!(page.find_element("floating"), Some(element));
    }
}
