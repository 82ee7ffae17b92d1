//! Hook scripts executed on session state entry.

use super::{Session, SessionState};
use crate::provision::HookRunner;
use tracing::{info, warn};

/// A registered hook script, run when the session enters its target
/// state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookScript {
    /// State whose entry triggers this hook.
    pub state: SessionState,
    /// File name, for logging.
    pub name: String,
    /// Script body, handed verbatim to the hook collaborator.
    pub body: String,
}

impl Session {
    /// Register a hook script for a target state.
    pub fn add_hook(&mut self, state: SessionState, name: &str, body: &str) {
        self.hooks.push(HookScript {
            state,
            name: name.to_string(),
            body: body.to_string(),
        });
    }

    /// Run every hook registered for a state. Exit codes are logged;
    /// a failing hook never blocks the transition.
    pub fn run_hooks(&self, state: SessionState, runner: &dyn HookRunner) {
        for hook in self.hooks.iter().filter(|h| h.state == state) {
            let status = runner.run(&hook.body, state);
            if status == 0 {
                info!(session = self.id(), hook = %hook.name, %state, "Hook completed");
            } else {
                warn!(
                    session = self.id(),
                    hook = %hook.name,
                    %state,
                    status,
                    "Hook exited nonzero"
                );
            }
        }
    }
}
