//! Bundle lifecycle state machine.
//!
//! ```text
//! Installed ──resolve──▶ Resolved ──start──▶ Starting ──ok──▶ Active
//!     │                    ▲   │                 │              │
//!     │                    │   │               error          stop
//!     │                    │   │                 ▼              ▼
//!     │                    └───┼──────ok───── Stopping ◀────────┘
//!     │                        │                 │
//!     │                        │               error
//!     ▼                        ▼                 ▼
//! Uninstalled ◀─────────────────────────────── Failed ──start──▶ Starting
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    /// `start` or `stop` returned an error; only an explicit start or uninstall leaves it.
    Failed,
    Uninstalled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition { from: BundleState, to: BundleState },
}

impl BundleState {
    /// Whether the table allows going from `self` to `to`.
    #[must_use]
    pub const fn can_transition_to(self, to: BundleState) -> bool {
        use BundleState::{Active, Failed, Installed, Resolved, Starting, Stopping, Uninstalled};
        matches!(
            (self, to),
            (Installed, Resolved | Uninstalled)
                | (Resolved, Starting | Uninstalled)
                | (Starting, Active | Failed)
                | (Active, Stopping)
                | (Stopping, Resolved | Failed)
                | (Failed, Starting | Uninstalled)
        )
    }

    /// Validate a transition and return the new state.
    ///
    /// # Errors
    /// Returns `LifecycleError::InvalidTransition` when the table does not allow it.
    pub fn transition(self, to: BundleState) -> Result<BundleState, LifecycleError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(LifecycleError::InvalidTransition { from: self, to })
        }
    }

    /// `Starting`, `Active` and `Stopping` are the states where the bundle may touch the registry.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Stopping)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Resolved => "resolved",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
            Self::Uninstalled => "uninstalled",
        }
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::BundleState::*;
    use super::*;

    const ALL: [BundleState; 7] = [
        Installed,
        Resolved,
        Starting,
        Active,
        Stopping,
        Failed,
        Uninstalled,
    ];

    #[test]
    fn transition_table_is_exact() {
        let allowed = [
            (Installed, Resolved),
            (Installed, Uninstalled),
            (Resolved, Starting),
            (Resolved, Uninstalled),
            (Starting, Active),
            (Starting, Failed),
            (Active, Stopping),
            (Stopping, Resolved),
            (Stopping, Failed),
            (Failed, Starting),
            (Failed, Uninstalled),
        ];
        for from in ALL {
            for to in ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to} should be {}",
                    if expected { "allowed" } else { "rejected" }
                );
            }
        }
    }

    #[test]
    fn uninstalled_is_terminal() {
        for to in ALL {
            assert!(Uninstalled.transition(to).is_err());
        }
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let err = Active.transition(Uninstalled).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                from: Active,
                to: Uninstalled
            }
        );
        assert_eq!(
            err.to_string(),
            "invalid lifecycle transition active -> uninstalled"
        );
    }

    #[test]
    fn running_states() {
        let running: Vec<_> = ALL.into_iter().filter(|s| s.is_running()).collect();
        assert_eq!(running, vec![Starting, Active, Stopping]);
    }
}
