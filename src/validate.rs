//! Structural + semantic validation of the configuration document (spec §4.1).
//!
//! Validation proceeds top-down: groups first, short-circuiting the rest on
//! failure since rooms and members are cross-referenced against the
//! resolved group-key set.

use std::collections::BTreeSet;

use strsim::levenshtein;
use thiserror::Error;

use crate::document::{Document, GroupKey};

/// A single validation failure, keyed by document path (e.g. `"rooms[2].admins"`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// All validation failures for one document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("document failed validation with {} error(s)", .0.len())]
pub struct ValidationErrors(pub Vec<ValidationError>);

/// Validate a document per spec §4.1. Returns `Ok(())` if the document is
/// acceptable, otherwise the full list of structured errors.
pub fn validate(document: &Document) -> Result<(), ValidationErrors> {
    let group_errors = validate_groups(document);
    if !group_errors.is_empty() {
        return Err(ValidationErrors(group_errors));
    }

    let group_keys: BTreeSet<GroupKey> = document.groups.keys().cloned().collect();

    let mut errors = Vec::new();
    errors.extend(validate_rooms(document, &group_keys));
    errors.extend(validate_members(document, &group_keys));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

fn validate_groups(document: &Document) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !document.groups.contains_key(&GroupKey::owner()) {
        errors.push(ValidationError::new(
            "groups",
            "missing mandatory key 'group/owner'",
        ));
    }
    if !document.groups.contains_key(&GroupKey::bot()) {
        errors.push(ValidationError::new(
            "groups",
            "missing mandatory key 'group/bot'",
        ));
    }

    let mut seen_labels: Vec<&str> = Vec::new();
    for (key, label) in &document.groups {
        if label.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("groups[{key}]"),
                "label must not be blank",
            ));
            continue;
        }
        if seen_labels.contains(&label.as_str()) {
            errors.push(ValidationError::new(
                format!("groups[{key}]"),
                format!("label '{label}' must be unique"),
            ));
        } else {
            seen_labels.push(label.as_str());
        }
    }

    errors
}

fn validate_rooms(document: &Document, group_keys: &BTreeSet<GroupKey>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen_names: Vec<&str> = Vec::new();

    for (i, room) in document.rooms.iter().enumerate() {
        let path = format!("rooms[{i}]");

        if room.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{path}.name"), "must not be blank"));
        } else if seen_names.contains(&room.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{path}.name"),
                format!("room name '{}' must be unique", room.name),
            ));
        } else {
            seen_names.push(room.name.as_str());
        }

        if room.members.is_empty() {
            errors.push(ValidationError::new(format!("{path}.members"), "must not be empty"));
        }
        if room.admins.is_empty() {
            errors.push(ValidationError::new(format!("{path}.admins"), "must not be empty"));
        }

        check_group_refs(&room.members, group_keys, &format!("{path}.members"), &mut errors);
        check_group_refs(&room.admins, group_keys, &format!("{path}.admins"), &mut errors);
    }

    errors
}

fn validate_members(document: &Document, group_keys: &BTreeSet<GroupKey>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen_names: Vec<&str> = Vec::new();
    let mut seen_ids: Vec<&str> = Vec::new();

    for (i, member) in document.members.iter().enumerate() {
        let path = format!("members[{i}]");

        if member.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{path}.name"), "must not be blank"));
        } else if seen_names.contains(&member.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{path}.name"),
                format!("display name '{}' must be unique", member.name),
            ));
        } else {
            seen_names.push(member.name.as_str());
        }

        let id = member.user_id.as_str();
        if seen_ids.contains(&id) {
            errors.push(ValidationError::new(
                format!("{path}.user-id"),
                format!("user-id '{id}' must be unique"),
            ));
        } else {
            seen_ids.push(id);
        }

        if member.groups.is_empty() {
            errors.push(ValidationError::new(format!("{path}.groups"), "must not be empty"));
        }
        check_group_refs(&member.groups, group_keys, &format!("{path}.groups"), &mut errors);
    }

    errors
}

fn check_group_refs(
    refs: &BTreeSet<GroupKey>,
    defined: &BTreeSet<GroupKey>,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    for key in refs {
        if !defined.contains(key) {
            let message = match closest_key(key, defined) {
                Some(suggestion) => {
                    format!("undefined group '{key}' — did you mean '{suggestion}'?")
                }
                None => format!("undefined group '{key}'"),
            };
            errors.push(ValidationError::new(path, message));
        }
    }
}

/// Suggest the closest legal group key by Levenshtein distance, capped so we
/// don't suggest wildly unrelated keys for a genuinely new identifier.
fn closest_key(unknown: &GroupKey, defined: &BTreeSet<GroupKey>) -> Option<GroupKey> {
    let unknown_str = unknown.to_string();
    defined
        .iter()
        .map(|k| (k, levenshtein(&unknown_str, &k.to_string())))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(k, _)| k.clone())
}

/// The legal key sets of the document's three closed records (spec §4.1):
/// the document itself, each room, each member. `_file-sha256` is the
/// reserved attribute the config store attaches in memory (spec §4.1/§4.2);
/// it never appears in a file on disk but is accepted here too so
/// validating an already-read document never flags it.
const TOP_LEVEL_KEYS: &[&str] = &["groups", "rooms", "members", "do-not-edit-state", "_file-sha256"];
const ROOM_KEYS: &[&str] = &["name", "room-id", "members", "admins", "only-admins-can-speak?"];
const MEMBER_KEYS: &[&str] = &["name", "user-id", "groups"];

/// Scan a document's raw JSON shape for misspelled or unknown keys in its
/// closed records, ahead of a typed `Deserialize` — which would otherwise
/// either silently drop an unrecognized nested field or fail with a raw,
/// unhumanized `serde_json::Error` that never suggests the key the operator
/// meant (spec §4.1). Only objects are inspected; a value of the wrong
/// *shape* entirely (e.g. `"rooms"` not being an array) is left for the
/// typed deserialize to report.
pub fn validate_raw_shape(value: &serde_json::Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let Some(obj) = value.as_object() else {
        return errors;
    };

    check_closed_record(obj, TOP_LEVEL_KEYS, "", &mut errors);

    if let Some(rooms) = obj.get("rooms").and_then(|v| v.as_array()) {
        for (i, room) in rooms.iter().enumerate() {
            if let Some(room_obj) = room.as_object() {
                check_closed_record(room_obj, ROOM_KEYS, &format!("rooms[{i}]"), &mut errors);
            }
        }
    }
    if let Some(members) = obj.get("members").and_then(|v| v.as_array()) {
        for (i, member) in members.iter().enumerate() {
            if let Some(member_obj) = member.as_object() {
                check_closed_record(member_obj, MEMBER_KEYS, &format!("members[{i}]"), &mut errors);
            }
        }
    }

    errors
}

fn check_closed_record(
    obj: &serde_json::Map<String, serde_json::Value>,
    allowed: &[&str],
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    for key in obj.keys() {
        if allowed.contains(&key.as_str()) {
            continue;
        }
        let full_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
        let message = match closest_str_key(key, allowed) {
            Some(suggestion) => format!("unknown key '{key}' — did you mean '{suggestion}'?"),
            None => format!("unknown key '{key}'"),
        };
        errors.push(ValidationError::new(full_path, message));
    }
}

/// Suggest the closest legal key among `allowed` by Levenshtein distance,
/// the same cap [`closest_key`] uses for group-key suggestions.
fn closest_str_key(unknown: &str, allowed: &[&str]) -> Option<String> {
    allowed
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(k, _)| k.to_string())
}
