//! Lifecycle of a node.
//!
//! ```text
//!            join accepted
//! Joining ──────────────────► Babbling ◄──────────┐
//!    │                          │  │              │ snapshot restored
//!    │                          │  └──► CatchingUp┘
//!    │                          │ leave
//!    │                          ▼
//!    └──────────────────────► Leaving ──► Shutdown
//! ```
//!
//! Any state moves to `Shutdown` when the node is stopped or hits a fatal
//! error. `Shutdown` is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Asking a validator to be added to the peer set.
    Joining,
    /// Gossiping and creating events.
    Babbling,
    /// Too far behind; fetching a snapshot instead of replaying events.
    CatchingUp,
    /// Waiting for our removal from the peer set to commit.
    Leaving,
    Shutdown,
}

impl NodeState {
    /// States in which the node gossips.
    pub fn is_gossiping(self) -> bool {
        matches!(self, NodeState::Babbling | NodeState::Leaving)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Joining => "Joining",
            NodeState::Babbling => "Babbling",
            NodeState::CatchingUp => "CatchingUp",
            NodeState::Leaving => "Leaving",
            NodeState::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!(NodeState::CatchingUp.to_string(), "CatchingUp");
        assert_eq!(NodeState::Shutdown.to_string(), "Shutdown");
    }

    #[test]
    fn only_babbling_and_leaving_gossip() {
        assert!(NodeState::Babbling.is_gossiping());
        assert!(NodeState::Leaving.is_gossiping());
        assert!(!NodeState::Joining.is_gossiping());
        assert!(!NodeState::CatchingUp.is_gossiping());
        assert!(!NodeState::Shutdown.is_gossiping());
    }
}
