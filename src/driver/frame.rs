//! Per-tab frame tree
//!
//! Tracks the rooted hierarchy of frames (main frame + nested iframes)
//! from subscribed Page events, plus the "current frame" pointer that
//! scopes element and evaluate calls. Mutation happens only from the
//! tab's event pump; callers read snapshots.

use crate::cdp::types::{ExecutionContextDescription, FrameInfo, FrameTreeNode};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Ways to pick the frame subsequent commands are scoped to
#[derive(Debug, Clone)]
pub enum FrameTarget {
    /// Back to the main frame
    Root,
    /// A frame identifier from the tree
    Id(String),
    /// CSS selector resolving to an iframe in the current frame
    Selector(String),
    /// An element handle known to be an iframe
    Element(Arc<super::element::Element>),
}

/// One frame in a tab's frame tree
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: String,
    /// None for the root
    pub parent_id: Option<String>,
    pub url: String,
    pub name: Option<String>,
    /// Own session for cross-origin frames, cached on first attach
    pub session_id: Option<String>,
    /// Main-world execution context, once announced
    pub execution_context_id: Option<i64>,
    /// Ordered children
    pub child_ids: Vec<String>,
    /// Bumped every time this frame navigates; element handles capture
    /// it to detect that their document is gone
    pub nav_count: u64,
}

impl Frame {
    fn new(frame_id: &str, parent_id: Option<&str>) -> Self {
        Self {
            frame_id: frame_id.to_string(),
            parent_id: parent_id.map(String::from),
            url: String::new(),
            name: None,
            session_id: None,
            execution_context_id: None,
            child_ids: Vec::new(),
            nav_count: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Default)]
struct FrameTreeInner {
    frames: HashMap<String, Frame>,
    root_id: Option<String>,
    current_id: Option<String>,
}

impl FrameTreeInner {
    /// Collect a frame and all its descendants
    fn subtree_ids(&self, frame_id: &str) -> Vec<String> {
        let mut ids = vec![frame_id.to_string()];
        let mut i = 0;
        while i < ids.len() {
            if let Some(frame) = self.frames.get(&ids[i]) {
                ids.extend(frame.child_ids.iter().cloned());
            }
            i += 1;
        }
        ids
    }

    fn remove_subtree(&mut self, frame_id: &str, keep_self: bool) {
        let ids = self.subtree_ids(frame_id);
        for id in &ids {
            if keep_self && id == frame_id {
                continue;
            }
            self.frames.remove(id);
            if self.current_id.as_deref() == Some(id.as_str()) {
                // The active frame vanished; fall back to the root.
                self.current_id = None;
            }
        }
        if keep_self {
            if let Some(frame) = self.frames.get_mut(frame_id) {
                frame.child_ids.clear();
            }
        }
    }

    fn preorder(&self, frame_id: &str, out: &mut Vec<Frame>) {
        if let Some(frame) = self.frames.get(frame_id) {
            out.push(frame.clone());
            for child_id in &frame.child_ids {
                self.preorder(child_id, out);
            }
        }
    }
}

/// Frame tree for one tab
#[derive(Debug, Default)]
pub struct FrameTree {
    inner: RwLock<FrameTreeInner>,
}

impl FrameTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole tree from a Page.getFrameTree snapshot
    pub fn seed(&self, tree: &FrameTreeNode) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;

        inner.frames.clear();
        inner.root_id = Some(tree.frame.id.clone());
        inner.current_id = None;
        Self::seed_node(&mut inner, tree, None);
        Ok(())
    }

    fn seed_node(inner: &mut FrameTreeInner, node: &FrameTreeNode, parent_id: Option<&str>) {
        let mut frame = Frame::new(&node.frame.id, parent_id);
        frame.url = node.frame.url.clone();
        frame.name = node.frame.name.clone();

        if let Some(children) = &node.child_frames {
            for child in children {
                frame.child_ids.push(child.frame.id.clone());
            }
        }
        inner.frames.insert(frame.frame_id.clone(), frame);

        if let Some(children) = &node.child_frames {
            for child in children {
                Self::seed_node(inner, child, Some(&node.frame.id));
            }
        }
    }

    /// Page.frameAttached: a new frame appeared under a parent
    pub fn on_frame_attached(&self, frame_id: &str, parent_frame_id: &str) {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(e) => {
                warn!("Lock error in frame tree: {}", e);
                return;
            }
        };

        if inner.frames.contains_key(frame_id) {
            return;
        }

        inner
            .frames
            .insert(frame_id.to_string(), Frame::new(frame_id, Some(parent_frame_id)));

        match inner.frames.get_mut(parent_frame_id) {
            Some(parent) => parent.child_ids.push(frame_id.to_string()),
            None => warn!(
                "Frame {} attached under unknown parent {}",
                frame_id, parent_frame_id
            ),
        }
    }

    /// Page.frameNavigated: the frame got a new document
    ///
    /// The old document's subframes are gone with it; they re-attach
    /// under the new document if the new page has any.
    pub fn on_frame_navigated(&self, info: &FrameInfo) {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(e) => {
                warn!("Lock error in frame tree: {}", e);
                return;
            }
        };

        if !inner.frames.contains_key(&info.id) {
            let mut frame = Frame::new(&info.id, info.parent_id.as_deref());
            frame.url = info.url.clone();
            frame.name = info.name.clone();
            frame.nav_count = 1;
            if frame.is_root() {
                inner.root_id = Some(info.id.clone());
            }
            inner.frames.insert(info.id.clone(), frame);
            return;
        }

        inner.remove_subtree(&info.id, true);
        if let Some(frame) = inner.frames.get_mut(&info.id) {
            frame.url = info.url.clone();
            frame.name = info.name.clone();
            frame.execution_context_id = None;
            frame.nav_count += 1;
            debug!("Frame {} navigated to {}", info.id, info.url);
        }
    }

    /// Page.frameDetached: the frame and its subtree are gone
    pub fn on_frame_detached(&self, frame_id: &str) {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(e) => {
                warn!("Lock error in frame tree: {}", e);
                return;
            }
        };

        let parent_id = inner
            .frames
            .get(frame_id)
            .and_then(|frame| frame.parent_id.clone());

        inner.remove_subtree(frame_id, false);

        if let Some(parent_id) = parent_id {
            if let Some(parent) = inner.frames.get_mut(&parent_id) {
                parent.child_ids.retain(|id| id != frame_id);
            }
        }
    }

    /// Runtime.executionContextCreated: remember the frame's main world
    pub fn on_context_created(&self, context: &ExecutionContextDescription) {
        if !context.is_default() {
            return;
        }
        let frame_id = match context.frame_id() {
            Some(frame_id) => frame_id.to_string(),
            None => return,
        };

        if let Ok(mut inner) = self.inner.write() {
            if let Some(frame) = inner.frames.get_mut(&frame_id) {
                frame.execution_context_id = Some(context.id);
            }
        }
    }

    /// Runtime.executionContextDestroyed
    pub fn on_context_destroyed(&self, execution_context_id: i64) {
        if let Ok(mut inner) = self.inner.write() {
            for frame in inner.frames.values_mut() {
                if frame.execution_context_id == Some(execution_context_id) {
                    frame.execution_context_id = None;
                }
            }
        }
    }

    /// Runtime.executionContextsCleared: forget every context id
    pub fn on_contexts_cleared(&self) {
        if let Ok(mut inner) = self.inner.write() {
            for frame in inner.frames.values_mut() {
                frame.execution_context_id = None;
            }
        }
    }

    /// Cache the dedicated session of a cross-origin frame
    pub fn set_frame_session(&self, frame_id: &str, session_id: &str) {
        if let Ok(mut inner) = self.inner.write() {
            if let Some(frame) = inner.frames.get_mut(frame_id) {
                frame.session_id = Some(session_id.to_string());
            }
        }
    }

    /// Snapshot of all frames, pre-order from the root
    pub fn frames(&self) -> Result<Vec<Frame>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;

        let mut out = Vec::new();
        if let Some(root_id) = &inner.root_id {
            inner.preorder(root_id, &mut out);
        }
        Ok(out)
    }

    /// Look up one frame
    pub fn get(&self, frame_id: &str) -> Result<Frame> {
        self.inner
            .read()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .frames
            .get(frame_id)
            .cloned()
            .ok_or_else(|| Error::frame_not_found(frame_id))
    }

    /// The root frame
    pub fn root(&self) -> Result<Frame> {
        let inner = self
            .inner
            .read()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;

        let root_id = inner
            .root_id
            .as_ref()
            .ok_or_else(|| Error::frame_not_found("no root frame known yet"))?;
        inner
            .frames
            .get(root_id)
            .cloned()
            .ok_or_else(|| Error::frame_not_found(root_id.as_str()))
    }

    /// The frame commands are currently scoped to (root by default)
    pub fn current(&self) -> Result<Frame> {
        {
            let inner = self
                .inner
                .read()
                .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;
            if let Some(current_id) = &inner.current_id {
                if let Some(frame) = inner.frames.get(current_id) {
                    return Ok(frame.clone());
                }
            }
        }
        self.root()
    }

    /// Point subsequent commands at a frame from the tree
    pub fn switch_to_id(&self, frame_id: &str) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;

        if !inner.frames.contains_key(frame_id) {
            return Err(Error::frame_not_found(frame_id));
        }
        inner.current_id = Some(frame_id.to_string());
        Ok(())
    }

    /// Point subsequent commands back at the root
    pub fn switch_to_root(&self) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?;
        inner.current_id = None;
        Ok(())
    }

    /// The i-th frame in pre-order at this moment
    ///
    /// Not a stable handle: the set of frames can change between
    /// enumeration and use.
    pub fn frame_at_index(&self, index: usize) -> Result<Frame> {
        let frames = self.frames()?;
        frames
            .get(index)
            .cloned()
            .ok_or_else(|| Error::frame_not_found(format!("no frame at index {}", index)))
    }

    /// Navigation counter for staleness checks, if the frame exists
    pub fn nav_count(&self, frame_id: &str) -> Option<u64> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.frames.get(frame_id).map(|frame| frame.nav_count))
    }

    pub fn frame_count(&self) -> usize {
        self.inner.read().map(|inner| inner.frames.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_tree() -> FrameTree {
        let tree = FrameTree::new();
        let node: FrameTreeNode = serde_json::from_value(serde_json::json!({
            "frame": { "id": "ROOT", "url": "https://example.com/" },
            "childFrames": [
                { "frame": { "id": "A", "parentId": "ROOT", "url": "https://example.com/a" } },
                {
                    "frame": { "id": "B", "parentId": "ROOT", "url": "https://example.com/b" },
                    "childFrames": [
                        { "frame": { "id": "B1", "parentId": "B", "url": "https://example.com/b1" } }
                    ]
                }
            ]
        }))
        .unwrap();
        tree.seed(&node).unwrap();
        tree
    }

    #[test]
    fn test_seed_and_preorder() {
        let tree = seeded_tree();
        let frames = tree.frames().unwrap();
        let ids: Vec<&str> = frames.iter().map(|f| f.frame_id.as_str()).collect();
        assert_eq!(ids, vec!["ROOT", "A", "B", "B1"]);
        assert!(frames[0].is_root());
        assert_eq!(frames[3].parent_id.as_deref(), Some("B"));
    }

    #[test]
    fn test_current_defaults_to_root() {
        let tree = seeded_tree();
        assert_eq!(tree.current().unwrap().frame_id, "ROOT");

        tree.switch_to_id("B1").unwrap();
        assert_eq!(tree.current().unwrap().frame_id, "B1");

        tree.switch_to_root().unwrap();
        assert_eq!(tree.current().unwrap().frame_id, "ROOT");
    }

    #[test]
    fn test_switch_to_unknown_frame() {
        let tree = seeded_tree();
        assert!(matches!(
            tree.switch_to_id("nope"),
            Err(Error::FrameNotFound(_))
        ));
    }

    #[test]
    fn test_frame_attach_and_detach() {
        let tree = seeded_tree();
        tree.on_frame_attached("A1", "A");
        assert_eq!(tree.get("A1").unwrap().parent_id.as_deref(), Some("A"));

        let ids: Vec<String> = tree
            .frames()
            .unwrap()
            .iter()
            .map(|f| f.frame_id.clone())
            .collect();
        assert_eq!(ids, vec!["ROOT", "A", "A1", "B", "B1"]);

        tree.on_frame_detached("A");
        assert!(tree.get("A").is_err());
        assert!(tree.get("A1").is_err());
        assert_eq!(tree.frame_count(), 3);
    }

    #[test]
    fn test_detaching_current_frame_resets_to_root() {
        let tree = seeded_tree();
        tree.switch_to_id("B1").unwrap();
        tree.on_frame_detached("B");
        assert_eq!(tree.current().unwrap().frame_id, "ROOT");
    }

    #[test]
    fn test_navigation_bumps_counter_and_drops_children() {
        let tree = seeded_tree();
        assert_eq!(tree.nav_count("B"), Some(0));

        let info: FrameInfo = serde_json::from_value(serde_json::json!({
            "id": "B",
            "parentId": "ROOT",
            "url": "https://example.com/b2",
        }))
        .unwrap();
        tree.on_frame_navigated(&info);

        assert_eq!(tree.nav_count("B"), Some(1));
        assert_eq!(tree.get("B").unwrap().url, "https://example.com/b2");
        assert!(tree.get("B1").is_err());
    }

    #[test]
    fn test_context_tracking() {
        let tree = seeded_tree();
        let context: ExecutionContextDescription = serde_json::from_value(serde_json::json!({
            "id": 5,
            "origin": "https://example.com",
            "name": "",
            "auxData": { "frameId": "A", "isDefault": true },
        }))
        .unwrap();
        tree.on_context_created(&context);
        assert_eq!(tree.get("A").unwrap().execution_context_id, Some(5));

        tree.on_context_destroyed(5);
        assert_eq!(tree.get("A").unwrap().execution_context_id, None);
    }

    #[test]
    fn test_frame_at_index() {
        let tree = seeded_tree();
        assert_eq!(tree.frame_at_index(2).unwrap().frame_id, "B");
        assert!(matches!(
            tree.frame_at_index(9),
            Err(Error::FrameNotFound(_))
        ));
    }
}
