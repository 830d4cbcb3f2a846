//! Pure function mapping group membership to a MUC affiliation (spec §4.4).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::GroupKey;

/// A user's persistent role in a MUC room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affiliation {
    Owner,
    Admin,
    Member,
    Outcast,
    None,
}

impl fmt::Display for Affiliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Affiliation::Owner => "owner",
            Affiliation::Admin => "admin",
            Affiliation::Member => "member",
            Affiliation::Outcast => "outcast",
            Affiliation::None => "none",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Affiliation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Affiliation::Owner),
            "admin" => Ok(Affiliation::Admin),
            "member" => Ok(Affiliation::Member),
            "outcast" => Ok(Affiliation::Outcast),
            "none" => Ok(Affiliation::None),
            other => Err(format!("unrecognized affiliation '{other}'")),
        }
    }
}

/// `affiliation(userGroups, roomAdmins, roomMembers)` from spec §4.4.
///
/// Admin precedence is total: an admin-granting group overrides any
/// member-granting group, so this never returns `Member` when the
/// intersection with `room_admins` is non-empty.
pub fn affiliation(
    user_groups: &BTreeSet<GroupKey>,
    room_admins: &BTreeSet<GroupKey>,
    room_members: &BTreeSet<GroupKey>,
) -> Affiliation {
    if user_groups.intersection(room_admins).next().is_some() {
        Affiliation::Admin
    } else if user_groups.intersection(room_members).next().is_some() {
        Affiliation::Member
    } else {
        Affiliation::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> BTreeSet<GroupKey> {
        keys.iter().map(|k| k.parse().unwrap()).collect()
    }

    #[test]
    fn admin_precedence_is_total() {
        let user = set(&["group/owner", "group/member"]);
        let admins = set(&["group/owner"]);
        let members = set(&["group/member"]);
        assert_eq!(affiliation(&user, &admins, &members), Affiliation::Admin);
    }

    #[test]
    fn member_when_only_member_group_matches() {
        let user = set(&["group/member"]);
        let admins = set(&["group/owner"]);
        let members = set(&["group/member"]);
        assert_eq!(affiliation(&user, &admins, &members), Affiliation::Member);
    }

    #[test]
    fn none_when_no_group_matches() {
        let user = set(&["group/guest"]);
        let admins = set(&["group/owner"]);
        let members = set(&["group/member"]);
        assert_eq!(affiliation(&user, &admins, &members), Affiliation::None);
    }
}
