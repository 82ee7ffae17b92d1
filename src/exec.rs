//! Execution/Callback Dispatcher
//!
//! Correlates asynchronous command-execution results with the requests
//! that triggered them. Each pending request is keyed by a
//! session-global execution number; numbers are monotonic and never
//! reused within a session's lifetime, so a stale completion arriving
//! after a purpose's handler set has changed cannot be misattributed.

use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Why a command execution was requested. Completion lookup scans the
/// purposes in this declaration order; the first bucket holding the
/// execution number wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecPurpose {
    /// Interactive shell spawned on a node.
    Shell,
    /// Periodically polled observer widget.
    Widget,
    /// One-shot command with a captured result.
    OneShot,
}

const PURPOSE_ORDER: [ExecPurpose; 3] = [ExecPurpose::Shell, ExecPurpose::Widget, ExecPurpose::OneShot];

impl fmt::Display for ExecPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecPurpose::Shell => "shell",
            ExecPurpose::Widget => "widget",
            ExecPurpose::OneShot => "one-shot",
        };
        write!(f, "{}", name)
    }
}

/// A registered request awaiting its result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingExec {
    pub purpose: ExecPurpose,
    pub node: u32,
    pub command: String,
}

/// Per-session pending-request registry.
#[derive(Debug, Default)]
pub struct ExecDispatcher {
    next: u32,
    pending: HashMap<ExecPurpose, HashMap<u32, PendingExec>>,
}

impl ExecDispatcher {
    /// Create an empty dispatcher. Execution numbers start at 1.
    pub fn new() -> Self {
        Self {
            next: 1,
            pending: HashMap::new(),
        }
    }

    /// Register a pending request and return its execution number.
    pub fn submit(&mut self, purpose: ExecPurpose, node: u32, command: String) -> u32 {
        let exec_num = self.next;
        self.next += 1;
        self.pending.entry(purpose).or_default().insert(
            exec_num,
            PendingExec {
                purpose,
                node,
                command,
            },
        );
        debug!(exec_num, %purpose, node, "Registered pending execution");
        exec_num
    }

    /// Look up and remove the pending request for a completed
    /// execution. Buckets are checked in fixed purpose order; the first
    /// match wins. An unknown number is logged and discarded.
    pub fn complete(&mut self, exec_num: u32) -> Option<PendingExec> {
        for purpose in PURPOSE_ORDER {
            if let Some(bucket) = self.pending.get_mut(&purpose) {
                if let Some(pending) = bucket.remove(&exec_num) {
                    return Some(pending);
                }
            }
        }
        warn!(exec_num, "Completion for unknown execution number discarded");
        None
    }

    /// Number of requests still pending.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|b| b.len()).sum()
    }

    /// Drop all pending requests (session teardown). Execution numbers
    /// keep advancing so late completions stay unambiguous.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_monotonic_and_unique() {
        let mut d = ExecDispatcher::new();
        let a = d.submit(ExecPurpose::Shell, 1, "ls".into());
        let b = d.submit(ExecPurpose::Widget, 1, "uptime".into());
        let c = d.submit(ExecPurpose::OneShot, 2, "ip addr".into());
        assert!(a < b && b < c);
    }

    #[test]
    fn test_complete_removes_exactly_once() {
        let mut d = ExecDispatcher::new();
        let num = d.submit(ExecPurpose::OneShot, 3, "hostname".into());

        let pending = d.complete(num).unwrap();
        assert_eq!(pending.purpose, ExecPurpose::OneShot);
        assert_eq!(pending.node, 3);
        assert_eq!(pending.command, "hostname");

        // Second completion with the same number finds nothing.
        assert!(d.complete(num).is_none());
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn test_unknown_number_discarded() {
        let mut d = ExecDispatcher::new();
        assert!(d.complete(999).is_none());
    }

    #[test]
    fn test_numbers_not_reused_after_clear() {
        let mut d = ExecDispatcher::new();
        let first = d.submit(ExecPurpose::Shell, 1, "a".into());
        d.clear();
        let second = d.submit(ExecPurpose::Shell, 1, "b".into());
        assert!(second > first);
        // The cleared request is gone.
        assert!(d.complete(first).is_none());
        assert!(d.complete(second).is_some());
    }

    #[test]
    fn test_purpose_buckets_independent() {
        let mut d = ExecDispatcher::new();
        let shell = d.submit(ExecPurpose::Shell, 1, "sh".into());
        let widget = d.submit(ExecPurpose::Widget, 1, "w".into());

        assert_eq!(d.complete(widget).unwrap().purpose, ExecPurpose::Widget);
        assert_eq!(d.complete(shell).unwrap().purpose, ExecPurpose::Shell);
    }
}
