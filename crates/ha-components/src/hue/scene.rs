//! Scene activation dispatch
//!
//! A scene name is only meaningful to the bridge that stores it, so the
//! command goes to every registered bridge at once. If no bridge accepts it
//! on the first pass, a second pass asks every bridge to reload its groups
//! and scenes first. There is never a third pass.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::bridge::{HueBridge, SceneActivation, SceneCommand};
use super::data::HueData;

/// Dispatcher tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Upper bound on a single bridge call; a timeout counts as a failure
    pub call_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Which attempt a bridge call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenePass {
    /// Use the bridge's cached groups and scenes, warnings suppressed
    Refreshed,
    /// Reload groups and scenes first, warnings shown
    Reloaded,
}

impl ScenePass {
    pub fn force_refresh(self) -> bool {
        matches!(self, ScenePass::Reloaded)
    }

    pub fn hide_warnings(self) -> bool {
        matches!(self, ScenePass::Refreshed)
    }
}

/// Result of one scene dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// At least one bridge activated the scene during this pass
    Activated(ScenePass),
    /// Both passes ran and no bridge activated the scene
    NotActivated,
    /// The dispatcher was shut down mid-dispatch
    Cancelled,
}

/// Broadcasts scene activations to every registered bridge
pub struct SceneDispatcher {
    data: Arc<HueData>,
    options: DispatchOptions,
    cancel: CancellationToken,
}

impl SceneDispatcher {
    pub fn new(data: Arc<HueData>, options: DispatchOptions, cancel: CancellationToken) -> Self {
        Self {
            data,
            options,
            cancel,
        }
    }

    pub fn options(&self) -> DispatchOptions {
        self.options
    }

    /// Activate a scene on whichever bridge knows it
    pub async fn dispatch(&self, command: &SceneCommand) -> DispatchOutcome {
        for pass in [ScenePass::Refreshed, ScenePass::Reloaded] {
            let results = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(
                        "Scene activation of {} in group {} cancelled",
                        command.scene_name, command.group_name
                    );
                    return DispatchOutcome::Cancelled;
                }
                results = self.run_pass(command, pass) => results,
            };

            if results.iter().any(SceneActivation::is_activated) {
                debug!(
                    "Activated scene {} in group {} ({:?} pass)",
                    command.scene_name, command.group_name, pass
                );
                return DispatchOutcome::Activated(pass);
            }
        }

        warn!(
            "No bridge was able to activate scene {} in group {}",
            command.scene_name, command.group_name
        );
        DispatchOutcome::NotActivated
    }

    /// Call every bridge concurrently and wait for all of them
    async fn run_pass(&self, command: &SceneCommand, pass: ScenePass) -> Vec<SceneActivation> {
        let bridges = self.data.bridges();
        debug!("Running {:?} scene pass on {} bridges", pass, bridges.len());

        join_all(
            bridges
                .iter()
                .map(|bridge| self.activate_on(bridge.as_ref(), command, pass)),
        )
        .await
    }

    async fn activate_on(
        &self,
        bridge: &dyn HueBridge,
        command: &SceneCommand,
        pass: ScenePass,
    ) -> SceneActivation {
        let call = AssertUnwindSafe(bridge.activate_scene(
            command,
            pass.force_refresh(),
            pass.hide_warnings(),
        ))
        .catch_unwind();

        match tokio::time::timeout(self.options.call_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                warn!(host = %bridge.host(), "Hue bridge panicked while activating a scene");
                SceneActivation::failed("bridge call panicked")
            }
            Err(_) => {
                let reason = format!("timed out after {:?}", self.options.call_timeout);
                if pass.hide_warnings() {
                    debug!(host = %bridge.host(), "Scene activation {}", reason);
                } else {
                    warn!(host = %bridge.host(), "Scene activation {}", reason);
                }
                SceneActivation::Failed(reason)
            }
        }
    }
}
