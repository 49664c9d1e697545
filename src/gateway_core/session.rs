// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Session lifecycle states.
//!
//! ```text
//! Uninitialized -> Initializing -> Active <-> Idle -> Terminating -> Terminated
//! ```
//! Any non-terminal state may also jump straight to `Terminated` when the
//! backend fails.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Active,
    Idle,
    Terminating,
    Terminated,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        self == SessionState::Terminated
    }

    /// Still accepting traffic.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Idle)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Uninitialized, Initializing)
            | (Initializing, Active)
            | (Active, Idle)
            | (Idle, Active)
            | (Initializing, Terminating)
            | (Active, Terminating)
            | (Idle, Terminating)
            | (Uninitialized, Terminating) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::Idle => "idle",
            SessionState::Terminating => "terminating",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Uninitialized.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(Active));
        assert!(Active.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Active));
        assert!(Idle.can_transition_to(Terminating));
        assert!(Terminating.can_transition_to(Terminated));
    }

    #[test]
    fn test_backend_failure_shortcut() {
        for s in [Uninitialized, Initializing, Active, Idle, Terminating] {
            assert!(s.can_transition_to(Terminated), "{s} -> terminated");
        }
    }

    #[test]
    fn test_terminated_is_final() {
        for s in [Uninitialized, Initializing, Active, Idle, Terminating, Terminated] {
            assert!(!Terminated.can_transition_to(s));
        }
    }

    #[test]
    fn test_rejected_edges() {
        assert!(!Uninitialized.can_transition_to(Active));
        assert!(!Active.can_transition_to(Initializing));
        assert!(!Terminating.can_transition_to(Active));
    }
}
