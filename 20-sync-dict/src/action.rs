//! Records that flow from the store to the dispatcher, and the JSON shapes
//! subscribers receive for them.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;

use crate::{registry::SubscriberId, version::Version};

/// Full contents of the store. `BTreeMap` keeps serialized snapshots stable.
pub type Snapshot = BTreeMap<String, Value>;

/// One published change or resync request.
///
/// Payloads are owned copies taken while the store lock was held, so later
/// mutations can never rewrite an action that is already queued.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Set {
        current: Version,
        next: Version,
        key: String,
        value: Value,
    },
    Delete {
        current: Version,
        next: Version,
        key: String,
    },
    Load {
        current: Version,
        next: Version,
        data: Snapshot,
    },
    /// Replay of the whole store for one subscriber. `next` is the store's
    /// version at request time; no version is consumed.
    Resync {
        next: Version,
        target: SubscriberId,
        data: Snapshot,
    },
}

impl Action {
    pub fn code(&self) -> ActionCode {
        match self {
            Action::Set { .. } => ActionCode::Set,
            Action::Delete { .. } => ActionCode::Delete,
            Action::Load { .. } => ActionCode::Load,
            Action::Resync { .. } => ActionCode::Sync,
        }
    }

    /// Version the store moved to (or stayed at, for a resync).
    pub fn next(&self) -> Version {
        match self {
            Action::Set { next, .. }
            | Action::Delete { next, .. }
            | Action::Load { next, .. }
            | Action::Resync { next, .. } => *next,
        }
    }
}

/// Integer codes used in the `action` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActionCode {
    Set = 0,
    Delete = 1,
    Sync = 2,
    Load = 3,
}

impl ActionCode {
    pub fn name(&self) -> &'static str {
        match self {
            ActionCode::Set => "SET",
            ActionCode::Delete => "DEL",
            ActionCode::Sync => "SYNC",
            ActionCode::Load => "LOAD",
        }
    }
}

impl TryFrom<u8> for ActionCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ActionCode::Set),
            1 => Ok(ActionCode::Delete),
            2 => Ok(ActionCode::Sync),
            3 => Ok(ActionCode::Load),
            other => Err(other),
        }
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ActionCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for ActionCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        ActionCode::try_from(code)
            .map_err(|code| de::Error::custom(format!("unknown action code {code}")))
    }
}

/// Message delivered to a subscriber, one JSON object per action.
///
/// Variant order matters for decoding: each later shape lacks a field the
/// earlier ones require.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Set {
        action: ActionCode,
        current: Version,
        next: Version,
        key: String,
        value: Value,
    },
    Delete {
        action: ActionCode,
        current: Version,
        next: Version,
        key: String,
    },
    Load {
        action: ActionCode,
        current: Version,
        next: Version,
        data: Snapshot,
    },
    Sync {
        action: ActionCode,
        next: Version,
        flag: String,
        data: Snapshot,
    },
}

impl Outbound {
    /// Wire form of a broadcast action. Returns `None` for a resync, which
    /// needs the target's identity; see [`Outbound::sync`].
    pub fn broadcast(action: &Action) -> Option<Self> {
        match action {
            Action::Set {
                current,
                next,
                key,
                value,
            } => Some(Outbound::Set {
                action: ActionCode::Set,
                current: *current,
                next: *next,
                key: key.clone(),
                value: value.clone(),
            }),
            Action::Delete { current, next, key } => Some(Outbound::Delete {
                action: ActionCode::Delete,
                current: *current,
                next: *next,
                key: key.clone(),
            }),
            Action::Load {
                current,
                next,
                data,
            } => Some(Outbound::Load {
                action: ActionCode::Load,
                current: *current,
                next: *next,
                data: data.clone(),
            }),
            Action::Resync { .. } => None,
        }
    }

    pub fn sync(next: Version, flag: impl Into<String>, data: Snapshot) -> Self {
        Outbound::Sync {
            action: ActionCode::Sync,
            next,
            flag: flag.into(),
            data,
        }
    }

    pub fn code(&self) -> ActionCode {
        match self {
            Outbound::Set { action, .. }
            | Outbound::Delete { action, .. }
            | Outbound::Load { action, .. }
            | Outbound::Sync { action, .. } => *action,
        }
    }

    /// `current` version, absent for resync replies.
    pub fn current(&self) -> Option<Version> {
        match self {
            Outbound::Set { current, .. }
            | Outbound::Delete { current, .. }
            | Outbound::Load { current, .. } => Some(*current),
            Outbound::Sync { .. } => None,
        }
    }

    pub fn next(&self) -> Version {
        match self {
            Outbound::Set { next, .. }
            | Outbound::Delete { next, .. }
            | Outbound::Load { next, .. }
            | Outbound::Sync { next, .. } => *next,
        }
    }
}
