//! Agent status transitions as pure functions of (current, requested).

use rw_core::types::AgentStatus;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// A status change outside the transition table. The agent's stored status
/// is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: cannot move agent from {from} to {to}")]
pub struct TransitionError {
    pub from: AgentStatus,
    pub to: AgentStatus,
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Targets reachable from `from` in normal flow.
///
/// - Configured -> Briefing
/// - Briefing   -> Ready | Error
/// - Ready      -> Executing | Paused
/// - Executing  -> Ready | Error | Paused
/// - Paused     -> Ready
/// - Error      -> Ready | Configured
/// - Terminated -> (none; see [`launch`])
pub fn allowed_targets(from: AgentStatus) -> &'static [AgentStatus] {
    use AgentStatus::*;
    match from {
        Configured => &[Briefing],
        Briefing => &[Ready, Error],
        Ready => &[Executing, Paused],
        Executing => &[Ready, Error, Paused],
        Paused => &[Ready],
        Error => &[Ready, Configured],
        Terminated => &[],
    }
}

pub fn can_transition(from: AgentStatus, to: AgentStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Validate `from -> to` against the table.
pub fn transition(from: AgentStatus, to: AgentStatus) -> Result<AgentStatus, TransitionError> {
    if can_transition(from, to) {
        Ok(to)
    } else {
        Err(TransitionError { from, to })
    }
}

// ---------------------------------------------------------------------------
// Operations outside the table
// ---------------------------------------------------------------------------

/// Launch enters `Briefing` from `Configured`, `Paused`, or `Terminated`
/// (relaunch).
pub fn launch(from: AgentStatus) -> Result<AgentStatus, TransitionError> {
    match from {
        AgentStatus::Configured | AgentStatus::Paused | AgentStatus::Terminated => {
            Ok(AgentStatus::Briefing)
        }
        _ => Err(TransitionError {
            from,
            to: AgentStatus::Briefing,
        }),
    }
}

/// Terminate is allowed from anywhere. `None` means the agent is already
/// terminated and nothing changes.
pub fn terminate(from: AgentStatus) -> Option<AgentStatus> {
    (from != AgentStatus::Terminated).then_some(AgentStatus::Terminated)
}
