use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::TapClawResult;
use crate::perception::traits::NodeHandle;
use crate::perception::types::AppInfo;

/// Platform scroll action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollVerb {
    Forward,
    Backward,
}

/// Gestures against live elements and global navigation.
///
/// `Ok(false)` means the platform declined the action; `Err` is a fault of
/// the port itself. The executor reports both as a failed command.
#[async_trait]
pub trait ActionPort: Send + Sync {
    async fn perform_click(&self, node: &NodeHandle) -> TapClawResult<bool>;
    async fn perform_scroll(&self, node: &NodeHandle, verb: ScrollVerb) -> TapClawResult<bool>;
    async fn focus(&self, node: &NodeHandle) -> TapClawResult<bool>;
    async fn set_text(&self, node: &NodeHandle, text: &str) -> TapClawResult<bool>;
    async fn navigate_back(&self) -> TapClawResult<bool>;
}

#[async_trait]
pub trait AppRegistry: Send + Sync {
    async fn list_apps(&self) -> TapClawResult<Vec<AppInfo>>;
    async fn launch(&self, app_id: &str) -> TapClawResult<bool>;
}
