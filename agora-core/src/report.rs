//! End-of-run report.

use crate::conversation::GlobalHistory;
use crate::gateway::Gateway;
use crate::profile::PlayerProfile;
use crate::prompts;

/// Writes the interpretive synthesis shown when a run ends.
#[derive(Clone)]
pub struct RunReporter {
    gateway: Gateway,
}

impl RunReporter {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// One generation call over the whole history. `None` when there is
    /// nothing to report or the service is unavailable.
    pub async fn report(&self, history: &GlobalHistory, profile: &PlayerProfile) -> Option<String> {
        if history.is_empty() {
            return None;
        }

        let prompt = prompts::run_report(history, profile);
        let report = self.gateway.oneshot(&prompt).await.into_text();
        if report.is_none() {
            tracing::warn!(events = history.len(), "run report unavailable");
        }
        report
    }
}
