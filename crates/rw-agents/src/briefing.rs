use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rw_core::store::Repository;
use rw_core::text::truncate_utf8;
use rw_core::types::{Agent, BriefingDepth, RunStatus};

/// How many completed runs a deep briefing summarizes.
const DEEP_HISTORY: usize = 5;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("briefing failed: {0}")]
pub struct BriefingError(pub String);

/// Context-loading step run between launch and `Ready`.
#[async_trait]
pub trait BriefingLoader: Send + Sync {
    /// Assemble the context the agent's runs will be primed with.
    async fn load(&self, agent: &Agent) -> Result<String, BriefingError>;
}

/// Builds the briefing from the agent's own configuration and run history
/// after a fixed delay.
pub struct StaticBriefingLoader {
    store: Arc<dyn Repository>,
    delay: Duration,
}

impl StaticBriefingLoader {
    pub fn new(store: Arc<dyn Repository>, delay: Duration) -> Self {
        Self { store, delay }
    }

    fn config_summary(agent: &Agent) -> String {
        let c = &agent.config;
        let mut out = format!(
            "Model: {}/{}. Temperature {:.2}, up to {} output tokens.",
            agent.provider, agent.model, c.temperature, c.max_output_tokens
        );
        if c.budget_limit > 0.0 {
            out.push_str(&format!(" Budget ${:.2} per window.", c.budget_limit));
        }
        out
    }

    async fn history(&self, agent: &Agent) -> Result<String, BriefingError> {
        let runs = self
            .store
            .list_runs_for_agent(agent.tenant_id, agent.id)
            .await
            .map_err(|e| BriefingError(e.to_string()))?;

        let lines: Vec<String> = runs
            .iter()
            .filter(|r| r.status == RunStatus::Completed)
            .take(DEEP_HISTORY)
            .map(|r| {
                format!(
                    "- {} => {}",
                    truncate_utf8(&r.prompt, 80),
                    truncate_utf8(r.output.as_deref().unwrap_or(""), 160)
                )
            })
            .collect();

        if lines.is_empty() {
            Ok("No previous runs.".into())
        } else {
            Ok(format!("Recent runs:\n{}", lines.join("\n")))
        }
    }
}

#[async_trait]
impl BriefingLoader for StaticBriefingLoader {
    async fn load(&self, agent: &Agent) -> Result<String, BriefingError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut sections = Vec::new();
        if !agent.instructions.trim().is_empty() {
            sections.push(agent.instructions.trim().to_string());
        }
        match agent.config.briefing_depth {
            BriefingDepth::Minimal => {}
            BriefingDepth::Standard => sections.push(Self::config_summary(agent)),
            BriefingDepth::Deep => {
                sections.push(Self::config_summary(agent));
                sections.push(self.history(agent).await?);
            }
        }
        Ok(sections.join("\n\n"))
    }
}
