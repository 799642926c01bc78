//! JSON-described device used by the CLI and by tests.
//!
//! A fixture file names a starting screen, the installed apps, and optional
//! extra screens reached by launching an app or clicking a node with `opens`.
//! Every gesture is recorded so callers can assert on what was performed.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::{TapClawError, TapClawResult};
use crate::executor::ports::{ActionPort, AppRegistry, ScrollVerb};
use crate::perception::traits::{LiveNode, NodeAttributes, NodeHandle, UiSource};
use crate::perception::types::{AppInfo, Bounds};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub root: Option<FixtureNodeSpec>,
    pub apps: Vec<AppInfo>,
    /// Screens keyed by app id (shown on launch) or by an `opens` name.
    pub screens: HashMap<String, FixtureNodeSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FixtureNodeSpec {
    /// Name used in recorded actions. Defaults to `n{pre-order position}`.
    pub id: Option<String>,
    pub class: Option<String>,
    pub text: Option<String>,
    #[serde(alias = "desc", alias = "content_description")]
    pub label: Option<String>,
    pub resource_id: Option<String>,
    pub clickable: bool,
    pub scrollable: bool,
    pub editable: bool,
    pub checkable: bool,
    pub checked: bool,
    pub bounds: Bounds,
    /// Child disappears between enumeration and access.
    pub unavailable: bool,
    /// Every gesture on this node is declined.
    pub reject: bool,
    /// Gestures on this node never complete.
    pub hang: bool,
    /// Screen shown after a successful click.
    pub opens: Option<String>,
    pub children: Vec<FixtureNodeSpec>,
}

/// A gesture recorded by [`FixtureDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Click(String),
    Scroll(String, ScrollVerb),
    Focus(String),
    SetText(String, String),
    Back,
    Launch(String),
}

struct FixtureNode {
    name: String,
    spec: FixtureNodeSpec,
    text: Mutex<Option<String>>,
    children: Vec<Arc<FixtureNode>>,
}

impl FixtureNode {
    fn build(spec: &FixtureNodeSpec, counter: &mut usize) -> Arc<Self> {
        let name = spec.id.clone().unwrap_or_else(|| format!("n{counter}"));
        *counter += 1;
        let children = spec
            .children
            .iter()
            .map(|c| FixtureNode::build(c, counter))
            .collect();
        Arc::new(Self {
            name,
            spec: FixtureNodeSpec {
                children: Vec::new(),
                ..spec.clone()
            },
            text: Mutex::new(spec.text.clone()),
            children,
        })
    }
}

impl LiveNode for FixtureNode {
    fn attributes(&self) -> NodeAttributes {
        NodeAttributes {
            class_name: self.spec.class.clone(),
            text: lock(&self.text).clone(),
            accessibility_label: self.spec.label.clone(),
            resource_id: self.spec.resource_id.clone(),
            clickable: self.spec.clickable,
            scrollable: self.spec.scrollable,
            editable: self.spec.editable,
            checkable: self.spec.checkable,
            checked: self.spec.checked,
            bounds: self.spec.bounds,
        }
    }

    fn child_count(&self) -> usize {
        self.children.len()
    }

    fn child(&self, index: usize) -> Option<NodeHandle> {
        let child = self.children.get(index)?;
        if child.spec.unavailable {
            return None;
        }
        Some(NodeHandle::new(child.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct FixtureDevice {
    root: Mutex<Option<Arc<FixtureNode>>>,
    back_stack: Mutex<Vec<Option<Arc<FixtureNode>>>>,
    screens: HashMap<String, FixtureNodeSpec>,
    apps: Vec<AppInfo>,
    recorded: Mutex<Vec<DeviceAction>>,
}

impl FixtureDevice {
    pub fn from_fixture(fixture: Fixture) -> Arc<Self> {
        Arc::new(Self {
            root: Mutex::new(fixture.root.as_ref().map(|r| FixtureNode::build(r, &mut 0))),
            back_stack: Mutex::new(Vec::new()),
            screens: fixture.screens,
            apps: fixture.apps,
            recorded: Mutex::new(Vec::new()),
        })
    }

    pub fn from_spec(root: Option<FixtureNodeSpec>) -> Arc<Self> {
        Self::from_fixture(Fixture {
            root,
            ..Default::default()
        })
    }

    pub fn load(path: &Path) -> TapClawResult<Arc<Self>> {
        let raw = std::fs::read_to_string(path)?;
        let fixture: Fixture = serde_json::from_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            apps = fixture.apps.len(),
            screens = fixture.screens.len(),
            "fixture device loaded"
        );
        Ok(Self::from_fixture(fixture))
    }

    pub fn root_handle(&self) -> Option<NodeHandle> {
        lock(&self.root).clone().map(|r| NodeHandle::new(r))
    }

    /// Gestures performed so far, oldest first.
    pub fn actions(&self) -> Vec<DeviceAction> {
        lock(&self.recorded).clone()
    }

    fn record(&self, action: DeviceAction) {
        tracing::debug!(?action, "fixture gesture");
        lock(&self.recorded).push(action);
    }

    fn show(&self, screen: &str) -> bool {
        let Some(spec) = self.screens.get(screen) else {
            return false;
        };
        let next = FixtureNode::build(spec, &mut 0);
        let previous = std::mem::replace(&mut *lock(&self.root), Some(next));
        lock(&self.back_stack).push(previous);
        true
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fixture_node(handle: &NodeHandle) -> TapClawResult<&FixtureNode> {
    handle
        .downcast_ref::<FixtureNode>()
        .ok_or_else(|| TapClawError::Executor("node handle does not belong to the fixture device".into()))
}

async fn stall_if(node: &FixtureNode) {
    if node.spec.hang {
        std::future::pending::<()>().await;
    }
}

#[async_trait]
impl UiSource for FixtureDevice {
    async fn current_root(&self) -> TapClawResult<Option<NodeHandle>> {
        Ok(self.root_handle())
    }
}

#[async_trait]
impl ActionPort for FixtureDevice {
    async fn perform_click(&self, node: &NodeHandle) -> TapClawResult<bool> {
        let node = fixture_node(node)?;
        self.record(DeviceAction::Click(node.name.clone()));
        stall_if(node).await;
        if node.spec.reject {
            return Ok(false);
        }
        if let Some(screen) = &node.spec.opens {
            if !self.show(screen) {
                tracing::warn!(screen = %screen, "click opens unknown fixture screen");
            }
        }
        Ok(true)
    }

    async fn perform_scroll(&self, node: &NodeHandle, verb: ScrollVerb) -> TapClawResult<bool> {
        let node = fixture_node(node)?;
        self.record(DeviceAction::Scroll(node.name.clone(), verb));
        stall_if(node).await;
        Ok(!node.spec.reject)
    }

    async fn focus(&self, node: &NodeHandle) -> TapClawResult<bool> {
        let node = fixture_node(node)?;
        self.record(DeviceAction::Focus(node.name.clone()));
        stall_if(node).await;
        Ok(!node.spec.reject)
    }

    async fn set_text(&self, node: &NodeHandle, text: &str) -> TapClawResult<bool> {
        let node = fixture_node(node)?;
        self.record(DeviceAction::SetText(node.name.clone(), text.to_string()));
        stall_if(node).await;
        if node.spec.reject || !node.spec.editable {
            return Ok(false);
        }
        *lock(&node.text) = Some(text.to_string());
        Ok(true)
    }

    async fn navigate_back(&self) -> TapClawResult<bool> {
        self.record(DeviceAction::Back);
        if let Some(previous) = lock(&self.back_stack).pop() {
            *lock(&self.root) = previous;
        }
        Ok(true)
    }
}

#[async_trait]
impl AppRegistry for FixtureDevice {
    async fn list_apps(&self) -> TapClawResult<Vec<AppInfo>> {
        Ok(self.apps.clone())
    }

    async fn launch(&self, app_id: &str) -> TapClawResult<bool> {
        self.record(DeviceAction::Launch(app_id.to_string()));
        if !self.apps.iter().any(|a| a.id == app_id) {
            tracing::warn!(app_id, "app not installed on fixture device");
            return Ok(false);
        }
        self.show(app_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "root": {
            "class": "android.widget.FrameLayout",
            "children": [
                { "id": "search", "class": "android.widget.EditText", "editable": true, "desc": "Search" },
                { "id": "settings", "class": "android.widget.Button", "text": "Settings",
                  "clickable": true, "opens": "settings_screen" }
            ]
        },
        "apps": [ { "id": "com.android.chrome", "label": "Chrome" } ],
        "screens": {
            "settings_screen": { "class": "android.widget.ScrollView", "scrollable": true },
            "com.android.chrome": { "id": "chrome_root", "class": "android.webkit.WebView" }
        }
    }"#;

    fn device() -> Arc<FixtureDevice> {
        FixtureDevice::from_fixture(serde_json::from_str(FIXTURE).unwrap())
    }

    fn root_class(device: &FixtureDevice) -> Option<String> {
        device
            .root_handle()
            .and_then(|h| h.node().attributes().class_name)
    }

    #[test]
    fn nodes_without_id_get_preorder_names() {
        let device = device();
        let root = device.root_handle().unwrap();
        assert_eq!(root.downcast_ref::<FixtureNode>().unwrap().name, "n0");
        let search = root.node().child(0).unwrap();
        assert_eq!(search.downcast_ref::<FixtureNode>().unwrap().name, "search");
        assert_eq!(search.node().attributes().accessibility_label.as_deref(), Some("Search"));
    }

    #[tokio::test]
    async fn set_text_updates_the_live_node() {
        let device = device();
        let search = device.root_handle().unwrap().node().child(0).unwrap();
        assert!(device.set_text(&search, "weather").await.unwrap());
        assert_eq!(search.node().attributes().text.as_deref(), Some("weather"));
    }

    #[tokio::test]
    async fn click_and_launch_switch_screens_and_back_restores() {
        let device = device();
        let settings = device.root_handle().unwrap().node().child(1).unwrap();
        assert!(device.perform_click(&settings).await.unwrap());
        assert_eq!(root_class(&device).as_deref(), Some("android.widget.ScrollView"));

        assert!(device.launch("com.android.chrome").await.unwrap());
        assert_eq!(root_class(&device).as_deref(), Some("android.webkit.WebView"));

        device.navigate_back().await.unwrap();
        device.navigate_back().await.unwrap();
        assert_eq!(root_class(&device).as_deref(), Some("android.widget.FrameLayout"));
    }

    #[tokio::test]
    async fn launching_unknown_app_is_declined() {
        let device = device();
        assert!(!device.launch("com.example.none").await.unwrap());
        assert_eq!(device.actions(), vec![DeviceAction::Launch("com.example.none".into())]);
    }
}
