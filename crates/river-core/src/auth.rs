//! On-chain entitlement descriptions
//!
//! The rule engines never call the chain. They return a [`ChainAuthArgs`]
//! describing the check an external collaborator must pass before the
//! mutation is accepted.

use crate::identifiers::StreamId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission names understood by the entitlement contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    /// Join and read
    Read,
    /// Post messages
    Write,
    /// Invite other users
    Invite,
    /// Redact other users' messages
    Redact,
    /// Ban members
    Ban,
    /// Pin messages
    PinMessage,
    /// Create, update and delete channels
    AddRemoveChannels,
    /// Change space-wide settings such as the space image
    ModifySpaceSettings,
    /// Full control, implies every other permission
    Owner,
}

impl Permission {
    /// Contract-level permission name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "Read",
            Permission::Write => "Write",
            Permission::Invite => "Invite",
            Permission::Redact => "Redact",
            Permission::Ban => "Ban",
            Permission::PinMessage => "PinMessage",
            Permission::AddRemoveChannels => "AddRemoveChannels",
            Permission::ModifySpaceSettings => "ModifySpaceSettings",
            Permission::Owner => "Owner",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope of an entitlement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainAuthKind {
    /// Checked against the space entitlements
    Space,
    /// Checked against a channel's entitlements within its space
    Channel,
}

/// Description of an entitlement check to be evaluated on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAuthArgs {
    /// Space or channel scope
    pub kind: ChainAuthKind,
    /// Space the entitlement lives in
    pub space_id: StreamId,
    /// Channel, for channel-scoped checks
    pub channel_id: Option<StreamId>,
    /// User id whose entitlement is checked
    pub principal: String,
    /// Permission required
    pub permission: Permission,
}

impl ChainAuthArgs {
    /// Space-scoped check.
    pub fn for_space(
        space_id: StreamId,
        principal: impl Into<String>,
        permission: Permission,
    ) -> Self {
        Self {
            kind: ChainAuthKind::Space,
            space_id,
            channel_id: None,
            principal: principal.into(),
            permission,
        }
    }

    /// Channel-scoped check within `space_id`.
    pub fn for_channel(
        space_id: StreamId,
        channel_id: StreamId,
        principal: impl Into<String>,
        permission: Permission,
    ) -> Self {
        Self {
            kind: ChainAuthKind::Channel,
            space_id,
            channel_id: Some(channel_id),
            principal: principal.into(),
            permission,
        }
    }
}

impl fmt::Display for ChainAuthArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.channel_id) {
            (ChainAuthKind::Channel, Some(channel_id)) => write!(
                f,
                "{} on channel {} in space {} for {}",
                self.permission, channel_id, self.space_id, self.principal
            ),
            _ => write!(
                f,
                "{} on space {} for {}",
                self.permission, self.space_id, self.principal
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_args_carry_both_scopes() {
        let args = ChainAuthArgs::for_channel(
            StreamId::new("10-space"),
            StreamId::new("20-chan"),
            "0xabc",
            Permission::Write,
        );
        assert_eq!(args.kind, ChainAuthKind::Channel);
        assert_eq!(args.channel_id, Some(StreamId::new("20-chan")));
        assert_eq!(
            args.to_string(),
            "Write on channel 20-chan in space 10-space for 0xabc"
        );
    }

    #[test]
    fn test_space_args_have_no_channel() {
        let args = ChainAuthArgs::for_space(StreamId::new("10-space"), "0xabc", Permission::Owner);
        assert_eq!(args.channel_id, None);
        assert_eq!(args.to_string(), "Owner on space 10-space for 0xabc");
    }
}
