use chrono::{Duration, Utc};
use rw_core::config::BudgetMode;
use rw_core::store::CostLedger;
use rw_core::types::Agent;
use tracing::warn;

use crate::error::OrchestratorError;

/// Outcome of a passing budget check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetCheck {
    /// The agent has no limit.
    Unlimited,
    Within { spent: f64, limit: f64 },
    /// Ledger lookup failed in advisory mode; the run proceeds.
    Unknown,
}

/// Trailing-window spend cap per agent.
pub struct BudgetGuard {
    mode: BudgetMode,
    window: Duration,
}

impl BudgetGuard {
    pub fn new(mode: BudgetMode, window_days: u32) -> Self {
        Self {
            mode,
            window: Duration::days(i64::from(window_days.max(1))),
        }
    }

    pub fn mode(&self) -> BudgetMode {
        self.mode
    }

    /// Reject when the agent's spend over the window is at or above its
    /// non-zero `budget_limit`.
    pub async fn check<L>(&self, ledger: &L, agent: &Agent) -> Result<BudgetCheck, OrchestratorError>
    where
        L: CostLedger + ?Sized,
    {
        let limit = agent.config.budget_limit;
        if limit <= 0.0 {
            return Ok(BudgetCheck::Unlimited);
        }

        let since = Utc::now() - self.window;
        match ledger.sum_costs_since(agent.tenant_id, agent.id, since).await {
            Ok(spent) if spent >= limit => Err(OrchestratorError::BudgetExceeded { spent, limit }),
            Ok(spent) => Ok(BudgetCheck::Within { spent, limit }),
            Err(e) => match self.mode {
                BudgetMode::Advisory => {
                    warn!(agent_id = %agent.id, error = %e, "budget lookup failed, proceeding");
                    Ok(BudgetCheck::Unknown)
                }
                BudgetMode::Strict => Err(OrchestratorError::BudgetUnavailable(e.to_string())),
            },
        }
    }
}
