//! Opaque entity identifiers (spec §3: "Identifiers are opaque strings").
//!
//! Each id is a UUID newtype, following the teacher's `TokenId`/`ProjectId`
//! pattern: `Display`/`FromStr` round-trip through the UUID's string form,
//! `generate()` mints a fresh v4, and the wrapper is `Copy` so repos and
//! services can pass ids around without cloning ceremony.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn nil() -> Self {
                Self(Uuid::nil())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_id!(OrgId);
uuid_id!(UserId);
uuid_id!(WorkspaceId);
uuid_id!(PlanId);
uuid_id!(ProjectId);
uuid_id!(GroupId);
uuid_id!(RoleId);
uuid_id!(RoleAssignmentId);
uuid_id!(TaskId);
uuid_id!(TokenId);
uuid_id!(TokenFamilyId);
uuid_id!(AlertId);
uuid_id!(FunctionId);
uuid_id!(FunctionVersionId);
uuid_id!(FunctionTriggerId);
uuid_id!(ApplicationId);
uuid_id!(AuditEventId);
uuid_id!(InvocationId);

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = WorkspaceId::generate();
        let parsed: WorkspaceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn distinct_ids_are_not_accidentally_equal_by_type_erasure() {
        let ws = WorkspaceId::generate();
        let proj = ProjectId(ws.0);
        // Same underlying uuid, different newtypes: this compiles only
        // because the macro doesn't implement cross-type equality, which is
        // the point (illegal states unrepresentable, spec §9).
        assert_eq!(ws.0, proj.0);
    }
}
