//! The persistent configuration document: groups, rooms, members, and the
//! engine-maintained tracking section. See spec §3.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A namespaced identifier, e.g. `group/owner`. Modeled as a two-field
/// composite rather than a bare string so namespace/name identity survives
/// serialization round-trips; the canonical wire form is `"namespace/name"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    namespace: String,
    name: String,
}

impl GroupKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner() -> Self {
        Self::new("group", "owner")
    }

    pub fn bot() -> Self {
        Self::new("group", "bot")
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid namespaced key '{0}': expected 'namespace/name'")]
pub struct GroupKeyParseError(String);

impl FromStr for GroupKey {
    type Err = GroupKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                Ok(GroupKey::new(ns, name))
            }
            _ => Err(GroupKeyParseError(s.to_string())),
        }
    }
}

impl Serialize for GroupKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GroupKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        GroupKey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

macro_rules! ascii_id_newtype {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn parse(s: impl Into<String>) -> Result<Self, InvalidIdentifier> {
                let s = s.into();
                if is_valid_ascii_id(&s) {
                    Ok(Self(s))
                } else {
                    Err(InvalidIdentifier {
                        label: $label,
                        value: s,
                    })
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidIdentifier;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

ascii_id_newtype!(RoomId, "room-id");
ascii_id_newtype!(UserId, "user-id");

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {label} '{value}': must be lowercase ASCII letters, digits, or hyphens, with no leading/trailing hyphen")]
pub struct InvalidIdentifier {
    label: &'static str,
    value: String,
}

/// Lowercase ASCII letters/digits/hyphens, no leading or trailing hyphen.
/// Shared by `room-id` and `user-id`.
fn is_valid_ascii_id(s: &str) -> bool {
    if s.is_empty() || s.starts_with('-') || s.ends_with('-') {
        return false;
    }
    s.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Derive a candidate room-id from a display name via kebab-case
/// normalization (spec §4.5 phase 6). Non-alphanumeric runs collapse to a
/// single hyphen; leading/trailing hyphens are trimmed.
pub fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true; // suppress a leading hyphen
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Room {
    pub name: String,
    #[serde(rename = "room-id", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    pub members: BTreeSet<GroupKey>,
    pub admins: BTreeSet<GroupKey>,
    #[serde(rename = "only-admins-can-speak?", default)]
    pub only_admins_can_speak: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Member {
    pub name: String,
    #[serde(rename = "user-id")]
    pub user_id: UserId,
    pub groups: BTreeSet<GroupKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoNotEditState {
    #[serde(default)]
    pub managed_members: BTreeSet<UserId>,
    #[serde(default)]
    pub managed_rooms: BTreeSet<RoomId>,
    #[serde(default)]
    pub managed_groups: BTreeSet<GroupKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_credentials: Option<AdminCredentials>,
}

/// The configuration document. `groups` is a map from namespaced identifier
/// to human-readable label; `rooms` and `members` are ordered sequences
/// (insertion order is significant to operators, per spec §3/§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    pub groups: std::collections::BTreeMap<GroupKey, String>,
    pub rooms: Vec<Room>,
    pub members: Vec<Member>,
    #[serde(rename = "do-not-edit-state", default)]
    pub do_not_edit_state: DoNotEditState,

    /// SHA-256 of the bytes this document was read from. Attached only by
    /// `ConfigStore::read`, stripped before validation/write — the reserved
    /// `_file-sha256` attribute of spec §4.1/§4.2. Never part of the
    /// document as persisted on disk.
    #[serde(skip)]
    pub file_sha256: Option<String>,
}

impl Document {
    /// The user-id reserved for the virtual admin-bot member (spec §3).
    pub const BOT_USER_ID: &'static str = "admin";

    /// Insert the ghost admin-bot member at the front of `members` for the
    /// duration of one sync (spec §4.5 phase 1). The caller is responsible
    /// for calling [`Self::ghost_remove_bot`] before persisting.
    pub fn ghost_include_bot(&mut self) {
        let bot_id =
            UserId::parse(Self::BOT_USER_ID).expect("BOT_USER_ID is a valid user-id literal");
        if self.members.iter().any(|m| m.user_id == bot_id) {
            return;
        }
        let mut groups = BTreeSet::new();
        groups.insert(GroupKey::bot());
        self.members.insert(
            0,
            Member {
                name: "Admin Bot".to_string(),
                user_id: bot_id,
                groups,
            },
        );
    }

    /// Remove the ghost admin-bot member before persisting (spec §4.5 phase 10).
    pub fn ghost_remove_bot(&mut self) {
        self.members.retain(|m| m.user_id.as_str() != Self::BOT_USER_ID);
    }

    /// The default document seeded when `userdb.edn` is missing (spec §4.2).
    /// Contains only the two mandatory groups and no rooms or members.
    pub fn default_seed() -> Self {
        let mut groups = std::collections::BTreeMap::new();
        groups.insert(GroupKey::owner(), "Owner".to_string());
        groups.insert(GroupKey::bot(), "Bot".to_string());
        Document {
            groups,
            rooms: Vec::new(),
            members: Vec::new(),
            do_not_edit_state: DoNotEditState::default(),
            file_sha256: None,
        }
    }
}
