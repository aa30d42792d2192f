//! Capability bitmask and role bundles
//!
//! Every authorization decision in the service goes through [`Permission::has`]
//! or [`can_act_on`]. Creating a randomly named link is a baseline action and
//! is not governed by any bit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Set of capability flags held by a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const CREATE_PREFIX: Permission = Permission(1 << 0);
    pub const CREATE_ANY: Permission = Permission(1 << 1);
    pub const DELETE_OWN: Permission = Permission(1 << 2);
    pub const DELETE_ANY: Permission = Permission(1 << 3);
    pub const VIEW_OWN_STATS: Permission = Permission(1 << 4);
    pub const VIEW_ANY_STATS: Permission = Permission(1 << 5);
    pub const MANAGE_USERS: Permission = Permission(1 << 6);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True iff every bit of `required` is present.
    ///
    /// Checking for [`Permission::NONE`] is always false so that an
    /// accidentally empty requirement never grants access.
    pub const fn has(self, required: Permission) -> bool {
        if required.0 == 0 {
            return false;
        }
        self.0 & required.0 == required.0
    }

    pub const fn add(self, perm: Permission) -> Self {
        Self(self.0 | perm.0)
    }

    pub const fn remove(self, perm: Permission) -> Self {
        Self(self.0 & !perm.0)
    }
}

impl From<Permission> for i64 {
    fn from(perm: Permission) -> Self {
        i64::from(perm.0)
    }
}

impl TryFrom<i64> for Permission {
    type Error = std::num::TryFromIntError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u32::try_from(value).map(Permission)
    }
}

/// Pre-defined permission bundles, each a superset of the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Regular,
    Privileged,
    Editor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Guest,
        Role::Regular,
        Role::Privileged,
        Role::Editor,
        Role::Admin,
    ];

    pub const fn permissions(self) -> Permission {
        match self {
            Role::Guest => ROLE_GUEST,
            Role::Regular => ROLE_REGULAR,
            Role::Privileged => ROLE_PRIVILEGED,
            Role::Editor => ROLE_EDITOR,
            Role::Admin => ROLE_ADMIN,
        }
    }

    /// The role whose bundle equals `perm` exactly, if any
    pub fn from_permissions(perm: Permission) -> Option<Role> {
        Self::ALL.into_iter().find(|role| role.permissions() == perm)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Regular => "regular",
            Role::Privileged => "privileged",
            Role::Editor => "editor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidRole(s.to_string()))
    }
}

pub const ROLE_GUEST: Permission = Permission::NONE;
pub const ROLE_REGULAR: Permission = Permission::CREATE_PREFIX
    .add(Permission::DELETE_OWN)
    .add(Permission::VIEW_OWN_STATS);
pub const ROLE_PRIVILEGED: Permission = ROLE_REGULAR.add(Permission::CREATE_ANY);
pub const ROLE_EDITOR: Permission = ROLE_PRIVILEGED
    .add(Permission::DELETE_ANY)
    .add(Permission::VIEW_ANY_STATS);
pub const ROLE_ADMIN: Permission = ROLE_EDITOR.add(Permission::MANAGE_USERS);

/// Shared ownership check used by delete and stats access.
///
/// Allowed when the holder has `any`, or owns the resource and has `own`.
pub fn can_act_on(
    held: Permission,
    actor_id: i64,
    owner_id: i64,
    any: Permission,
    own: Permission,
) -> bool {
    held.has(any) || (actor_id == owner_id && held.has(own))
}
