//! UI tree capture.
//!
//! Walks the live tree exposed by a [`UiSource`] once, depth-first and
//! pre-order, and materialises an immutable [`UiNode`] tree whose indices are
//! the visiting order. The live handle of every visited element is kept next to
//! the tree so commands can act on exactly the element a given index named.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::{TapClawError, TapClawResult};
use crate::perception::traits::{NodeHandle, UiSource};
use crate::perception::types::UiNode;

/// Depth at which the walk stops descending. Guards against platform trees
/// that report an ancestor as a child.
const MAX_DEPTH: usize = 256;

/// Upper bound on captured nodes per snapshot.
const MAX_NODES: usize = 5000;

/// One immutable capture of the UI tree.
#[derive(Debug, Clone)]
pub struct Snapshot {
    id: uuid::Uuid,
    root: UiNode,
    handles: Vec<NodeHandle>,
    captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn root(&self) -> &UiNode {
        &self.root
    }

    /// Live handle of the element that was assigned `index`.
    pub fn handle(&self, index: usize) -> Option<&NodeHandle> {
        self.handles.get(index)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn into_root(self) -> UiNode {
        self.root
    }
}

pub struct TreeSnapshotBuilder {
    source: Arc<dyn UiSource>,
}

impl TreeSnapshotBuilder {
    pub fn new(source: Arc<dyn UiSource>) -> Self {
        Self { source }
    }

    /// Capture the active UI tree. `Ok(None)` means no UI root is available.
    pub async fn capture(&self) -> TapClawResult<Option<Snapshot>> {
        let Some(root) = self.source.current_root().await? else {
            tracing::warn!("no active UI root; nothing to capture");
            return Ok(None);
        };

        // Platform accessibility calls are blocking.
        let snapshot = tokio::task::spawn_blocking(move || Self::build_from(root))
            .await
            .map_err(|e| TapClawError::Perception(format!("join: {e}")))?;

        tracing::debug!(
            snapshot = %snapshot.id,
            nodes = snapshot.len(),
            "UI tree captured"
        );
        Ok(Some(snapshot))
    }

    /// Capture and keep only the node tree.
    pub async fn capture_tree(&self) -> TapClawResult<Option<UiNode>> {
        Ok(self.capture().await?.map(Snapshot::into_root))
    }

    /// Synchronous walk from a known root handle.
    pub fn build_from(root: NodeHandle) -> Snapshot {
        let mut handles = Vec::new();
        let (root_node, next) = walk(&root, 0, 0, &mut handles);
        debug_assert_eq!(next, handles.len());
        Snapshot {
            id: uuid::Uuid::new_v4(),
            root: root_node,
            handles,
            captured_at: Utc::now(),
        }
    }
}

/// Visit `handle` and its subtree. `next` is the index to assign on entry;
/// returns the built node and the next free index.
fn walk(
    handle: &NodeHandle,
    next: usize,
    depth: usize,
    handles: &mut Vec<NodeHandle>,
) -> (UiNode, usize) {
    let index = next;
    let mut next = next + 1;
    handles.push(handle.clone());

    let live = handle.node();
    let attrs = live.attributes();

    let mut children = Vec::new();
    if depth >= MAX_DEPTH {
        tracing::warn!(index, depth, "UI tree too deep; children dropped");
    } else {
        for i in 0..live.child_count() {
            if handles.len() >= MAX_NODES {
                tracing::warn!(limit = MAX_NODES, "UI tree node limit reached; truncating");
                break;
            }
            let Some(child) = live.child(i) else {
                tracing::debug!(parent = index, child = i, "child unavailable; skipped");
                continue;
            };
            let (node, after) = walk(&child, next, depth + 1, handles);
            next = after;
            children.push(node);
        }
    }

    let node = UiNode {
        index,
        class_name: short_class_name(attrs.class_name.as_deref()),
        text: attrs.text,
        accessibility_label: attrs.accessibility_label,
        resource_id: attrs
            .resource_id
            .map(|id| id.rsplit('/').next().unwrap_or_default().to_string()),
        clickable: attrs.clickable,
        scrollable: attrs.scrollable,
        editable: attrs.editable,
        checkable: attrs.checkable,
        checked: attrs.checked,
        bounds: attrs.bounds,
        children,
    };
    (node, next)
}

fn short_class_name(class_name: Option<&str>) -> String {
    class_name
        .and_then(|c| c.rsplit('.').next())
        .filter(|c| !c.is_empty())
        .unwrap_or("View")
        .to_string()
}
