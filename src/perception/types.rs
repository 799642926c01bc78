use serde::{Deserialize, Serialize};

/// Screen rectangle in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// One element of a captured UI tree.
///
/// `index` is the pre-order position inside the snapshot that produced the node.
/// It is only meaningful against that same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    pub index: usize,
    pub class_name: String,
    pub text: Option<String>,
    pub accessibility_label: Option<String>,
    pub resource_id: Option<String>,
    pub clickable: bool,
    pub scrollable: bool,
    pub editable: bool,
    pub checkable: bool,
    pub checked: bool,
    pub bounds: Bounds,
    pub children: Vec<UiNode>,
}

impl UiNode {
    /// All nodes of the subtree in pre-order. For a snapshot root, position == index.
    pub fn flatten(&self) -> Vec<&UiNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(UiNode::subtree_len).sum::<usize>()
    }

    /// Short human-readable description used in logs ("Button \"Login\" #3").
    pub fn describe(&self) -> String {
        match self.label() {
            Some(label) => format!("{} \"{}\" #{}", self.class_name, label, self.index),
            None => format!("{} #{}", self.class_name, self.index),
        }
    }

    /// Non-blank text and accessibility label joined with " / ". A blank part
    /// is dropped rather than rendered as an empty side of the separator.
    pub fn label(&self) -> Option<String> {
        let parts: Vec<&str> = [self.text.as_deref(), self.accessibility_label.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" / "))
        }
    }
}

/// An installed application as reported by the app registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Launchable identifier (package name / bundle id).
    pub id: String,
    pub label: String,
}
