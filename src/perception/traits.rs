use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::TapClawResult;
use crate::perception::types::Bounds;

/// Attributes read from one live platform element at capture time.
#[derive(Debug, Clone, Default)]
pub struct NodeAttributes {
    /// Fully-qualified platform class, e.g. `android.widget.Button`.
    pub class_name: Option<String>,
    pub text: Option<String>,
    pub accessibility_label: Option<String>,
    /// Platform view id, e.g. `com.example:id/login`.
    pub resource_id: Option<String>,
    pub clickable: bool,
    pub scrollable: bool,
    pub editable: bool,
    pub checkable: bool,
    pub checked: bool,
    pub bounds: Bounds,
}

/// An element of the live, platform-owned UI tree.
///
/// Implementations are synchronous because platform accessibility APIs are;
/// the snapshot builder runs the walk on a blocking thread.
pub trait LiveNode: Send + Sync {
    fn attributes(&self) -> NodeAttributes;

    fn child_count(&self) -> usize;

    /// `None` when the child went away between enumeration and access.
    fn child(&self, index: usize) -> Option<NodeHandle>;

    /// Lets a platform `ActionPort` recover its concrete node type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared reference to a live element.
#[derive(Clone)]
pub struct NodeHandle(Arc<dyn LiveNode>);

impl NodeHandle {
    pub fn new(node: Arc<dyn LiveNode>) -> Self {
        Self(node)
    }

    pub fn node(&self) -> &dyn LiveNode {
        self.0.as_ref()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attrs = self.0.attributes();
        f.debug_struct("NodeHandle")
            .field("class_name", &attrs.class_name)
            .field("children", &self.0.child_count())
            .finish()
    }
}

/// Source of the currently active UI tree.
#[async_trait]
pub trait UiSource: Send + Sync {
    /// Root of the active window, or `None` when no UI is available.
    async fn current_root(&self) -> TapClawResult<Option<NodeHandle>>;
}
