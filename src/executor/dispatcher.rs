//! Command dispatch.
//!
//! Maps each [`Command`] to a node-resolution policy and one call on the
//! device ports. Every outcome, including port faults and timeouts, comes
//! back as a [`CommandReport`]; nothing here returns an error to the caller.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::errors::TapClawResult;
use crate::executor::command::Command;
use crate::executor::coordinator::Device;
use crate::perception::resolver::NodeResolver;
use crate::perception::snapshot::Snapshot;
use crate::perception::traits::NodeHandle;
use crate::perception::types::AppInfo;

const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    NoUiRoot,
    NodeNotFound { index: usize },
    Rejected,
    PortFault(String),
    TimedOut,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandFailure::NoUiRoot => write!(f, "no UI root available"),
            CommandFailure::NodeNotFound { index } => write!(f, "node not found at index {index}"),
            CommandFailure::Rejected => write!(f, "action rejected by target"),
            CommandFailure::PortFault(msg) => write!(f, "device error: {msg}"),
            CommandFailure::TimedOut => write!(f, "device action timed out"),
        }
    }
}

/// Outcome of one executed command.
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub command: Command,
    pub success: bool,
    /// Description of the element the action was actually performed on.
    pub target: Option<String>,
    /// Populated by `ListApps`.
    pub apps: Option<Vec<AppInfo>>,
    pub failure: Option<CommandFailure>,
}

impl CommandReport {
    fn new(command: &Command) -> Self {
        Self {
            command: command.clone(),
            success: false,
            target: None,
            apps: None,
            failure: None,
        }
    }

    fn target(mut self, description: String) -> Self {
        self.target = Some(description);
        self
    }

    fn outcome(mut self, result: Result<(), CommandFailure>) -> Self {
        match result {
            Ok(()) => {
                self.success = true;
                self.failure = None;
            }
            Err(failure) => {
                self.success = false;
                self.failure = Some(failure);
            }
        }
        self
    }
}

pub struct CommandExecutor {
    device: Device,
    action_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Execute against a freshly captured tree.
    pub async fn execute(&self, command: &Command) -> bool {
        self.run(command).await.success
    }

    /// Execute against the snapshot whose indices the command refers to.
    pub async fn execute_on(&self, snapshot: Option<&Snapshot>, command: &Command) -> bool {
        self.run_on(snapshot, command).await.success
    }

    /// Capture and execute under one device lock, so no other command can
    /// change the screen in between.
    pub async fn run(&self, command: &Command) -> CommandReport {
        if command.target_index().is_none() {
            return self.run_on(None, command).await;
        }
        let _guard = self.device.exclusive().await;
        let report = match self.device.snapshot_builder().capture().await {
            Ok(snapshot) => self.dispatch(snapshot.as_ref(), command).await,
            Err(e) => {
                tracing::warn!(error = %e, ?command, "capture before command failed");
                CommandReport::new(command).outcome(Err(CommandFailure::PortFault(e.to_string())))
            }
        };
        trace_report(command, &report);
        report
    }

    pub async fn run_on(&self, snapshot: Option<&Snapshot>, command: &Command) -> CommandReport {
        let _guard = self.device.exclusive().await;
        let report = self.dispatch(snapshot, command).await;
        trace_report(command, &report);
        report
    }

    async fn dispatch(&self, snapshot: Option<&Snapshot>, command: &Command) -> CommandReport {
        let report = CommandReport::new(command);
        let actions = self.device.actions();

        match command {
            Command::Click { index } => {
                let resolved = match resolve(snapshot, *index, Reach::NearestClickable) {
                    Ok(found) => found,
                    Err(failure) => return report.outcome(Err(failure)),
                };
                let result = self
                    .port_call("click", actions.perform_click(&resolved.handle))
                    .await;
                report.target(resolved.description).outcome(result)
            }

            Command::Scroll { index, direction } => {
                let resolved = match resolve(snapshot, *index, Reach::NearestScrollable) {
                    Ok(found) => found,
                    Err(failure) => return report.outcome(Err(failure)),
                };
                let verb = direction.verb();
                tracing::debug!(index, %direction, ?verb, "scrolling");
                let result = self
                    .port_call("scroll", actions.perform_scroll(&resolved.handle, verb))
                    .await;
                report.target(resolved.description).outcome(result)
            }

            Command::Type { index, text } => {
                let resolved = match resolve(snapshot, *index, Reach::Exact) {
                    Ok(found) => found,
                    Err(failure) => return report.outcome(Err(failure)),
                };
                let report = report.target(resolved.description);
                if let Err(failure) = self.port_call("focus", actions.focus(&resolved.handle)).await {
                    return report.outcome(Err(failure));
                }
                let result = self
                    .port_call("set_text", actions.set_text(&resolved.handle, text))
                    .await;
                report.outcome(result)
            }

            Command::GoBack => {
                let result = self.port_call("back", actions.navigate_back()).await;
                report.outcome(result)
            }

            Command::LaunchApp { app_id } => {
                let result = self
                    .port_call("launch", self.device.apps().launch(app_id))
                    .await;
                let mut report = report.outcome(result);
                report.target = Some(app_id.clone());
                report
            }

            Command::ListApps => {
                match tokio::time::timeout(self.action_timeout, self.device.apps().list_apps()).await {
                    Ok(Ok(apps)) => {
                        tracing::debug!(count = apps.len(), "installed apps listed");
                        let mut report = report.outcome(Ok(()));
                        report.apps = Some(apps);
                        report
                    }
                    Ok(Err(e)) => report.outcome(Err(CommandFailure::PortFault(e.to_string()))),
                    Err(_) => report.outcome(Err(CommandFailure::TimedOut)),
                }
            }
        }
    }

    /// Run one port call under the action timeout and fold its result.
    async fn port_call<F>(&self, action: &'static str, call: F) -> Result<(), CommandFailure>
    where
        F: Future<Output = TapClawResult<bool>>,
    {
        match tokio::time::timeout(self.action_timeout, call).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => {
                tracing::debug!(action, "platform declined action");
                Err(CommandFailure::Rejected)
            }
            Ok(Err(e)) => {
                tracing::warn!(action, error = %e, "device port error");
                Err(CommandFailure::PortFault(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(action, timeout = ?self.action_timeout, "device action timed out");
                Err(CommandFailure::TimedOut)
            }
        }
    }
}

/// Which element a node command acts on once its index has resolved.
#[derive(Debug, Clone, Copy)]
enum Reach {
    Exact,
    NearestClickable,
    NearestScrollable,
}

struct Resolved {
    description: String,
    handle: NodeHandle,
}

/// Resolve `index` in the snapshot and pick the element to act on. Ancestor
/// searches fall back to the resolved node when nothing matches.
fn trace_report(command: &Command, report: &CommandReport) {
    match &report.failure {
        None => tracing::info!(?command, target = ?report.target, "command succeeded"),
        Some(failure) => {
            tracing::warn!(?command, target = ?report.target, %failure, "command failed")
        }
    }
}

fn resolve(snapshot: Option<&Snapshot>, index: usize, reach: Reach) -> Result<Resolved, CommandFailure> {
    let snapshot = snapshot.ok_or(CommandFailure::NoUiRoot)?;
    let resolver = NodeResolver::new(snapshot.root());
    let Some(node) = resolver.find_by_index(index) else {
        tracing::warn!(index, nodes = resolver.len(), "node not found at index");
        return Err(CommandFailure::NodeNotFound { index });
    };
    let target = match reach {
        Reach::Exact => None,
        Reach::NearestClickable => resolver.nearest_clickable(index),
        Reach::NearestScrollable => resolver.nearest_scrollable(index),
    }
    .unwrap_or(node);
    if target.index != index {
        tracing::debug!(index, target = target.index, ?reach, "acting on ancestor");
    }
    let handle = snapshot
        .handle(target.index)
        .cloned()
        .ok_or(CommandFailure::NodeNotFound { index: target.index })?;
    Ok(Resolved {
        description: target.describe(),
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fixture::{DeviceAction, Fixture, FixtureDevice, FixtureNodeSpec};
    use crate::executor::command::ScrollDirection;
    use crate::executor::ports::ScrollVerb;
    use std::sync::Arc;

    fn spec(id: &str, children: Vec<FixtureNodeSpec>) -> FixtureNodeSpec {
        FixtureNodeSpec {
            id: Some(id.into()),
            class: Some("android.view.ViewGroup".into()),
            children,
            ..Default::default()
        }
    }

    fn clickable(mut s: FixtureNodeSpec) -> FixtureNodeSpec {
        s.clickable = true;
        s
    }

    fn scrollable(mut s: FixtureNodeSpec) -> FixtureNodeSpec {
        s.scrollable = true;
        s
    }

    /// 0 root
    ///   1 header
    ///     2 title
    ///   3 card [clickable]
    ///     4 row
    ///       5 label
    ///   6 list
    ///     7 item
    fn screen() -> FixtureNodeSpec {
        spec(
            "root",
            vec![
                spec("header", vec![spec("title", vec![])]),
                clickable(spec("card", vec![spec("row", vec![spec("label", vec![])])])),
                spec("list", vec![spec("item", vec![])]),
            ],
        )
    }

    async fn executor_for(root: FixtureNodeSpec) -> (Arc<FixtureDevice>, CommandExecutor, Snapshot) {
        let device = FixtureDevice::from_spec(Some(root));
        let executor = CommandExecutor::new(Device::from_backend(device.clone()));
        let snapshot = executor.device().capture().await.unwrap().unwrap();
        (device, executor, snapshot)
    }

    #[tokio::test]
    async fn click_on_plain_node_goes_to_clickable_ancestor() {
        let (device, executor, snapshot) = executor_for(screen()).await;
        let report = executor.run_on(Some(&snapshot), &Command::Click { index: 5 }).await;
        assert!(report.success);
        assert_eq!(device.actions(), vec![DeviceAction::Click("card".into())]);
        assert!(report.target.unwrap().ends_with("#3"));
    }

    #[tokio::test]
    async fn click_without_clickable_ancestor_hits_the_node_itself() {
        let (device, executor, snapshot) = executor_for(screen()).await;
        assert!(executor.execute_on(Some(&snapshot), &Command::Click { index: 2 }).await);
        assert_eq!(device.actions(), vec![DeviceAction::Click("title".into())]);
    }

    #[tokio::test]
    async fn scroll_without_scrollable_ancestor_falls_back_to_node() {
        let (device, executor, snapshot) = executor_for(screen()).await;
        let command = Command::Scroll { index: 7, direction: ScrollDirection::Down };
        assert!(executor.execute_on(Some(&snapshot), &command).await);
        assert_eq!(
            device.actions(),
            vec![DeviceAction::Scroll("item".into(), ScrollVerb::Forward)]
        );
    }

    #[tokio::test]
    async fn scroll_uses_nearest_scrollable_container() {
        let root = spec(
            "root",
            vec![scrollable(spec("list", vec![spec("item", vec![])]))],
        );
        let (device, executor, snapshot) = executor_for(root).await;
        let command = Command::Scroll { index: 2, direction: ScrollDirection::Left };
        assert!(executor.execute_on(Some(&snapshot), &command).await);
        assert_eq!(
            device.actions(),
            vec![DeviceAction::Scroll("list".into(), ScrollVerb::Backward)]
        );
    }

    #[tokio::test]
    async fn type_focuses_then_sets_text() {
        let mut field = spec("email", vec![]);
        field.editable = true;
        let (device, executor, snapshot) = executor_for(spec("root", vec![field])).await;
        let command = Command::Type { index: 1, text: "me@example.com".into() };
        assert!(executor.execute_on(Some(&snapshot), &command).await);
        assert_eq!(
            device.actions(),
            vec![
                DeviceAction::Focus("email".into()),
                DeviceAction::SetText("email".into(), "me@example.com".into()),
            ]
        );
    }

    #[tokio::test]
    async fn type_fails_when_focus_is_declined() {
        let mut field = spec("email", vec![]);
        field.editable = true;
        field.reject = true;
        let (device, executor, snapshot) = executor_for(spec("root", vec![field])).await;
        let report = executor
            .run_on(Some(&snapshot), &Command::Type { index: 1, text: "x".into() })
            .await;
        assert!(!report.success);
        assert_eq!(report.failure, Some(CommandFailure::Rejected));
        assert_eq!(device.actions(), vec![DeviceAction::Focus("email".into())]);
    }

    #[tokio::test]
    async fn type_fails_when_set_text_is_declined() {
        // not editable: focus succeeds, set_text is refused
        let (device, executor, snapshot) = executor_for(spec("root", vec![spec("label", vec![])])).await;
        let report = executor
            .run_on(Some(&snapshot), &Command::Type { index: 1, text: "x".into() })
            .await;
        assert!(!report.success);
        assert_eq!(device.actions().len(), 2);
    }

    #[tokio::test]
    async fn stale_index_is_a_plain_failure() {
        let (device, executor, snapshot) = executor_for(screen()).await;
        let report = executor.run_on(Some(&snapshot), &Command::Click { index: 42 }).await;
        assert!(!report.success);
        assert_eq!(report.failure, Some(CommandFailure::NodeNotFound { index: 42 }));
        assert!(device.actions().is_empty());
    }

    #[tokio::test]
    async fn node_command_without_ui_root_fails() {
        let device = FixtureDevice::from_spec(None);
        let executor = CommandExecutor::new(Device::from_backend(device.clone()));
        let report = executor.run(&Command::Click { index: 0 }).await;
        assert_eq!(report.failure, Some(CommandFailure::NoUiRoot));
        // global actions still work without a tree
        assert!(executor.execute(&Command::GoBack).await);
        assert_eq!(device.actions(), vec![DeviceAction::Back]);
    }

    #[tokio::test]
    async fn rejected_click_is_reported_not_raised() {
        let mut root = screen();
        root.children[1].reject = true;
        let (_device, executor, snapshot) = executor_for(root).await;
        let report = executor.run_on(Some(&snapshot), &Command::Click { index: 4 }).await;
        assert!(!report.success);
        assert_eq!(report.failure, Some(CommandFailure::Rejected));
    }

    #[tokio::test]
    async fn app_registry_commands_delegate() {
        let device = FixtureDevice::from_fixture(Fixture {
            apps: vec![AppInfo {
                id: "com.google.android.keep".into(),
                label: "Keep Notes".into(),
            }],
            ..Default::default()
        });
        let executor = CommandExecutor::new(Device::from_backend(device.clone()));

        let listed = executor.run(&Command::ListApps).await;
        assert!(listed.success);
        assert_eq!(listed.apps.unwrap().len(), 1);

        let launched = executor
            .run(&Command::LaunchApp { app_id: "com.google.android.keep".into() })
            .await;
        assert!(launched.success);
        let missing = executor
            .run(&Command::LaunchApp { app_id: "com.example.missing".into() })
            .await;
        assert_eq!(missing.failure, Some(CommandFailure::Rejected));
        assert_eq!(
            device.actions(),
            vec![
                DeviceAction::Launch("com.google.android.keep".into()),
                DeviceAction::Launch("com.example.missing".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_port_call_times_out() {
        let mut root = screen();
        root.children[1].hang = true;
        let (_device, executor, snapshot) = executor_for(root).await;
        let executor = executor.with_action_timeout(Duration::from_millis(50));
        let report = executor.run_on(Some(&snapshot), &Command::Click { index: 3 }).await;
        assert_eq!(report.failure, Some(CommandFailure::TimedOut));
    }

    /// Signals every time the tree is read.
    struct Announcing {
        inner: Arc<FixtureDevice>,
        read: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl crate::perception::traits::UiSource for Announcing {
        async fn current_root(&self) -> TapClawResult<Option<NodeHandle>> {
            self.read.notify_one();
            Ok(self.inner.root_handle())
        }
    }

    #[tokio::test]
    async fn fresh_capture_and_command_share_one_lock() {
        let backend = FixtureDevice::from_spec(Some(screen()));
        let read = Arc::new(tokio::sync::Notify::new());
        let source = Arc::new(Announcing { inner: backend.clone(), read: read.clone() });
        let executor = CommandExecutor::new(Device::new(source, backend.clone(), backend.clone()));

        let (click, back) = tokio::join!(executor.run(&Command::Click { index: 5 }), async {
            read.notified().await;
            executor.run_on(None, &Command::GoBack).await
        });

        assert!(click.success);
        assert!(back.success);
        // the back press queued during the capture must not land before the click
        assert_eq!(
            backend.actions(),
            vec![DeviceAction::Click("card".into()), DeviceAction::Back]
        );
    }
}
