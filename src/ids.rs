//! Short prefixed identifiers for long-lived entities.
//!
//! All entity ids are opaque `prefix-<8hex>` strings backed by a `Uuid`; the
//! prefix disambiguates entity kind in logs and error messages, the hex
//! fragment is the low 32 bits of a fresh v4 uuid. Sequence numbers (`#42`
//! style) are a separate, per-project counter kept on the task row itself,
//! not part of the id.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! prefixed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let hex = self.0.simple().to_string();
                write!(f, "{}-{}", $prefix, &hex[..8])
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Accept either the full uuid or our own display form by
                // stripping a known prefix; unknown prefixes are rejected
                // by the caller's lookup (not found), not here.
                let rest = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Uuid::parse_str(rest).map(Self)
            }
        }
    };
}

prefixed_id!(SessionId, "sess");
prefixed_id!(TaskId, "task");
prefixed_id!(WorkflowInstanceId, "wfi");
prefixed_id!(AgentRunId, "run");
prefixed_id!(WorktreeId, "wt");
prefixed_id!(MessageId, "msg");
prefixed_id!(PartyId, "party");
prefixed_id!(ProjectId, "proj");
prefixed_id!(PipelineRunId, "pipe");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable_prefix_plus_8_hex() {
        let id = TaskId::new();
        let s = id.to_string();
        assert!(s.starts_with("task-"));
        assert_eq!(s.len(), "task-".len() + 8);
    }

    #[test]
    fn distinct_ids_differ() {
        assert_ne!(TaskId::new(), TaskId::new());
    }
}
