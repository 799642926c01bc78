use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::errors::TapClawResult;
use crate::executor::ports::{ActionPort, AppRegistry};
use crate::perception::snapshot::{Snapshot, TreeSnapshotBuilder};
use crate::perception::traits::UiSource;

/// The device collaborators of one host, shared by every session on it.
///
/// Captures and commands go through one async mutex so a snapshot is never
/// read while another command is changing the screen.
#[derive(Clone)]
pub struct Device {
    source: Arc<dyn UiSource>,
    actions: Arc<dyn ActionPort>,
    apps: Arc<dyn AppRegistry>,
    in_flight: Arc<Mutex<()>>,
}

impl Device {
    pub fn new(
        source: Arc<dyn UiSource>,
        actions: Arc<dyn ActionPort>,
        apps: Arc<dyn AppRegistry>,
    ) -> Self {
        Self {
            source,
            actions,
            apps,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Build from one object that implements all three ports.
    pub fn from_backend<T>(backend: Arc<T>) -> Self
    where
        T: UiSource + ActionPort + AppRegistry + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend)
    }

    pub fn actions(&self) -> &Arc<dyn ActionPort> {
        &self.actions
    }

    pub fn apps(&self) -> &Arc<dyn AppRegistry> {
        &self.apps
    }

    pub fn snapshot_builder(&self) -> TreeSnapshotBuilder {
        TreeSnapshotBuilder::new(self.source.clone())
    }

    /// Wait until no other capture or command is running on this device.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.in_flight.lock().await
    }

    pub async fn capture(&self) -> TapClawResult<Option<Snapshot>> {
        let _guard = self.exclusive().await;
        self.snapshot_builder().capture().await
    }
}
