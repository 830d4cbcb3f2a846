//! The reconciliation engine: diffs the desired document against ejabberd's
//! live state and drives it towards convergence in a fixed phase order
//! (spec §4.5).
//!
//! Phases run sequentially; within a phase, each entity is handled
//! independently — one room or user failing to reconcile is logged and the
//! phase continues. Failure to even *list* remote state is phase
//! infrastructure, not a per-entity failure, and aborts the whole sync.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use base64::Engine as _;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::warn;

use crate::affiliation::{Affiliation, affiliation};
use crate::bot::AdminBotHandle;
use crate::document::{Document, GroupKey, RoomId, UserId, kebab_case};
use crate::remote_api::{Bookmark, RemoteApiClient, TransportError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not list registered users: {0}")]
    ListUsers(TransportError),
    #[error("could not list online rooms: {0}")]
    ListRooms(TransportError),
}

/// The deployment environment the engine is running against. Only
/// `register_users` (spec §4.5 phase 5) reads this: production users get a
/// fresh, high-entropy throwaway password; dev/test users get a fixed
/// configured password so fixtures and manual testing don't need a secrets
/// dance. Selectable on `serve` via `--env` (default `prod`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Env {
    Dev,
    Test,
    #[default]
    Prod,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub env: Env,
    pub default_test_password: String,
    /// Default MUC creation options merged under the moderation flags
    /// `create_new_rooms` derives from `only-admins-can-speak?` (spec §4.5
    /// phase 6, spec §6 `managedMucOptions`). A room's own computed flags
    /// take precedence over a same-named default.
    pub managed_muc_options: Vec<(String, String)>,
    /// How long a lock is held before it's considered abandoned (spec §4.7:
    /// "a configured timeout (`syncTimeoutS * 1000`)").
    pub sync_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            env: Env::default(),
            default_test_password: "test-password".to_string(),
            managed_muc_options: default_muc_options(),
            sync_timeout: Duration::from_secs(120),
        }
    }
}

/// The MUC options every managed room gets unless overridden — persistent,
/// invite-only, not publicly listed. `moderated`/`members_by_default` are
/// never set here; `room_creation_opts` always derives those from the
/// room's own `only-admins-can-speak?` flag.
pub(crate) fn default_muc_options() -> Vec<(String, String)> {
    vec![
        ("persistent".to_string(), "true".to_string()),
        ("public".to_string(), "false".to_string()),
        ("members_only".to_string(), "true".to_string()),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Created,
    Updated,
    Deleted,
    Unchanged,
    Failed,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncAction::Created => "created",
            SyncAction::Updated => "updated",
            SyncAction::Deleted => "deleted",
            SyncAction::Unchanged => "unchanged",
            SyncAction::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub subject: String,
    pub action: SyncAction,
    pub detail: Option<String>,
}

/// The full record of one sync pass, in phase order. A converged document
/// synced a second time must produce only [`SyncAction::Unchanged`] entries.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub entries: Vec<ReportEntry>,
}

impl SyncOutcome {
    fn record(&mut self, subject: impl Into<String>, action: SyncAction, detail: Option<String>) {
        self.entries.push(ReportEntry {
            subject: subject.into(),
            action,
            detail,
        });
    }

    fn ok(&mut self, subject: impl Into<String>, action: SyncAction) {
        self.record(subject, action, None);
    }

    fn failed(&mut self, subject: impl Into<String>, error: impl std::fmt::Display) {
        let detail = error.to_string();
        let subject = subject.into();
        warn!(subject = %subject, error = %detail, "entity reconciliation failed, continuing");
        self.record(subject, SyncAction::Failed, Some(detail));
    }

    pub fn has_changes(&self) -> bool {
        self.entries
            .iter()
            .any(|e| !matches!(e.action, SyncAction::Unchanged))
    }
}

pub struct SyncEngine<'a> {
    api: &'a RemoteApiClient,
    bot: Option<AdminBotHandle>,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(api: &'a RemoteApiClient) -> Self {
        Self {
            api,
            bot: None,
            options: SyncOptions::default(),
        }
    }

    /// Wire in the admin bot so the engine can ask it to join freshly
    /// created rooms (phase 6) and deliver affiliation-change DMs (phase 8).
    /// Without a bot handle, those two steps are skipped — useful for tests
    /// that only want to exercise reconciliation against the fake remote.
    pub fn with_bot(mut self, bot: AdminBotHandle) -> Self {
        self.bot = Some(bot);
        self
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Reconcile `document` against the live ejabberd deployment, mutating
    /// it in place (room-id assignment, tracking state) so the caller can
    /// persist the effective document afterwards.
    pub async fn sync(&self, document: &mut Document) -> Result<SyncOutcome, SyncError> {
        let mut outcome = SyncOutcome::default();

        document.ghost_include_bot();
        self.assign_room_ids(document);

        let registered = self
            .api
            .registered_users()
            .await
            .map_err(SyncError::ListUsers)?
            .into_iter()
            .collect::<BTreeSet<_>>();
        let online_rooms = self
            .api
            .muc_online_rooms()
            .await
            .map_err(SyncError::ListRooms)?
            .into_iter()
            .collect::<BTreeSet<_>>();

        let desired_users: BTreeSet<String> = document
            .members
            .iter()
            .map(|m| m.user_id.as_str().to_string())
            .collect();
        let desired_rooms: BTreeSet<String> = document
            .rooms
            .iter()
            .filter_map(|r| r.room_id.as_ref().map(|id| id.as_str().to_string()))
            .collect();

        self.delete_stale_users(&mut outcome, document, &desired_users).await;
        self.delete_stale_rooms(&mut outcome, document, &online_rooms, &desired_rooms)
            .await;
        self.register_new_users(&mut outcome, document, &registered).await;
        self.create_new_rooms(&mut outcome, document, &online_rooms).await;
        self.sync_rosters(&mut outcome, document).await;
        self.sync_affiliations_and_bookmarks(&mut outcome, document).await;
        self.update_tracking(document, &desired_users, &desired_rooms);

        document.ghost_remove_bot();
        Ok(outcome)
    }

    /// Give every room without an assigned room-id a kebab-case identity
    /// derived from its display name, deduplicated against sibling rooms.
    /// Once assigned, a room-id never changes even if the display name
    /// does — it is tracked in `do-not-edit-state.managed-rooms`.
    fn assign_room_ids(&self, document: &mut Document) {
        let mut taken: BTreeSet<String> = document
            .rooms
            .iter()
            .filter_map(|r| r.room_id.as_ref().map(|id| id.as_str().to_string()))
            .collect();

        for room in &mut document.rooms {
            if room.room_id.is_some() {
                continue;
            }
            let base = kebab_case(&room.name);
            let mut candidate = base.clone();
            let mut suffix = 2;
            while taken.contains(&candidate) {
                candidate = format!("{base}-{suffix}");
                suffix += 1;
            }
            taken.insert(candidate.clone());
            room.room_id = RoomId::parse(candidate).ok();
        }
    }

    /// Delete users dropped from the document: pull them off every other
    /// managed member's roster, clear their affiliation in every tracked
    /// room, then unregister the account (spec §4.5 phase 3).
    ///
    /// `usersToDelete = trackedMembers − currentMembers` (spec §4.5 phase
    /// 2), computed from the document's own tracking state rather than
    /// whatever `registeredUsers` happens to return — a user already
    /// deregistered out-of-band (or otherwise drifted from the remote's
    /// registered list) must still get its roster/affiliation cleanup, or
    /// a crash between that drift and the next sync would leave it behind
    /// forever (spec §7/§8 idempotent-convergence guarantee).
    async fn delete_stale_users(&self, outcome: &mut SyncOutcome, document: &Document, desired: &BTreeSet<String>) {
        let domain = self.api.xmpp_domain();
        let to_delete: Vec<String> = document
            .do_not_edit_state
            .managed_members
            .iter()
            .map(|m| m.as_str().to_string())
            .filter(|user| !desired.contains(user))
            .collect();

        for user in to_delete {
            let subject = format!("user/{user}");

            for peer in &document.members {
                if peer.user_id.as_str() == user {
                    continue;
                }
                if let Err(e) = self
                    .api
                    .delete_roster_item(peer.user_id.as_str(), domain, &user, domain)
                    .await
                {
                    warn!(peer = %peer.user_id, user = %user, error = %e, "could not remove stale roster entry, continuing");
                }
            }
            for tracked_room in &document.do_not_edit_state.managed_rooms {
                if let Err(e) = self
                    .api
                    .set_room_affiliation(tracked_room.as_str(), &user, domain, Affiliation::None)
                    .await
                {
                    warn!(room = %tracked_room, user = %user, error = %e, "could not clear stale affiliation, continuing");
                }
            }

            match self.api.unregister(&user).await {
                Ok(()) => outcome.ok(subject, SyncAction::Deleted),
                Err(e) => outcome.failed(subject, e),
            }
        }
    }

    /// Delete rooms dropped from the document: clear every tracked member's
    /// affiliation in the room, then destroy it (spec §4.5 phase 4).
    async fn delete_stale_rooms(
        &self,
        outcome: &mut SyncOutcome,
        document: &Document,
        online: &BTreeSet<String>,
        desired: &BTreeSet<String>,
    ) {
        let domain = self.api.xmpp_domain();
        for room in online {
            if desired.contains(room) {
                continue;
            }
            if !document.do_not_edit_state.managed_rooms.iter().any(|r| r.as_str() == room) {
                continue;
            }
            let subject = format!("room/{room}");

            for tracked_user in &document.do_not_edit_state.managed_members {
                if let Err(e) = self
                    .api
                    .set_room_affiliation(room, tracked_user.as_str(), domain, Affiliation::None)
                    .await
                {
                    warn!(room = %room, user = %tracked_user, error = %e, "could not clear affiliation before destroying room, continuing");
                }
            }

            match self.api.destroy_room(room).await {
                Ok(()) => outcome.ok(subject, SyncAction::Deleted),
                Err(e) => outcome.failed(subject, e),
            }
        }
    }

    /// Register every user the document names that ejabberd doesn't know
    /// about yet (spec §4.5 phase 5). Real user passwords are set later by
    /// an out-of-band signup flow — the password chosen here is a
    /// throwaway the operator never needs.
    async fn register_new_users(
        &self,
        outcome: &mut SyncOutcome,
        document: &Document,
        registered: &BTreeSet<String>,
    ) {
        for member in &document.members {
            let id = member.user_id.as_str();
            let subject = format!("user/{id}");
            if registered.contains(id) {
                outcome.ok(subject, SyncAction::Unchanged);
                continue;
            }
            let password = self.registration_password();
            match self.api.register(id, &password).await {
                Ok(()) => outcome.ok(subject, SyncAction::Created),
                Err(e) => outcome.failed(subject, e),
            }
        }
    }

    fn registration_password(&self) -> String {
        match self.options.env {
            Env::Prod => generate_password(),
            Env::Dev | Env::Test => self.options.default_test_password.clone(),
        }
    }

    /// Create every room the document names that doesn't have a room-id yet,
    /// merging the moderation options derived from `only-admins-can-speak?`
    /// into the configured defaults (spec §4.5 phase 6), then ask the admin
    /// bot to join it so it's present from the room's first moment.
    async fn create_new_rooms(
        &self,
        outcome: &mut SyncOutcome,
        document: &Document,
        online: &BTreeSet<String>,
    ) {
        for room in &document.rooms {
            let Some(room_id) = &room.room_id else { continue };
            let subject = format!("room/{room_id}");
            if online.contains(room_id.as_str()) {
                outcome.ok(subject, SyncAction::Unchanged);
                continue;
            }
            let opts = room_creation_opts(&self.options.managed_muc_options, room.only_admins_can_speak);
            match self.api.create_room_with_opts(room_id.as_str(), &opts).await {
                Ok(()) => {
                    outcome.ok(subject, SyncAction::Created);
                    if let Some(bot) = &self.bot {
                        bot.join_room(room_id.clone());
                    }
                }
                Err(e) => outcome.failed(subject, e),
            }
        }
    }

    /// Ensure every ordered pair of managed members can see each other on
    /// their rosters (spec §4.5 phase 7), fetching each member's current
    /// roster once and writing only the entries that are missing or whose
    /// nick/groups differ from the target — the remote emits a presence
    /// notification on every roster write, so minimizing writes is a hard
    /// requirement, not an optimization.
    async fn sync_rosters(&self, outcome: &mut SyncOutcome, document: &Document) {
        let domain = self.api.xmpp_domain().to_string();
        let group_labels: HashMap<&GroupKey, &str> = document
            .groups
            .iter()
            .map(|(key, label)| (key, label.as_str()))
            .collect();

        for a in &document.members {
            let a_id = a.user_id.as_str();
            let current = match self.api.get_roster(a_id).await {
                Ok(items) => items,
                Err(e) => {
                    outcome.failed(format!("roster/{a_id}"), e);
                    continue;
                }
            };

            for b in &document.members {
                if a.user_id == b.user_id {
                    continue;
                }
                let b_id = b.user_id.as_str();
                let subject = format!("roster/{a_id}/{b_id}");

                let mut desired_groups: Vec<String> = b
                    .groups
                    .iter()
                    .filter_map(|key| group_labels.get(key).map(|l| l.to_string()))
                    .collect();
                desired_groups.sort();

                let b_jid = format!("{b_id}@{domain}");
                let existing = current.iter().find(|item| item.jid == b_jid);
                let needs_write = match existing {
                    None => true,
                    Some(item) => {
                        let mut existing_groups = item.group.clone();
                        existing_groups.sort();
                        item.nick != b.name || existing_groups != desired_groups
                    }
                };

                if !needs_write {
                    outcome.ok(subject, SyncAction::Unchanged);
                    continue;
                }
                match self
                    .api
                    .add_roster_item(a_id, &domain, b_id, &domain, &b.name, &desired_groups, "both")
                    .await
                {
                    Ok(()) => outcome.ok(subject, SyncAction::Updated),
                    Err(e) => outcome.failed(subject, e),
                }
            }
        }
    }

    /// Resolve each member's affiliation in each room from their groups and
    /// push it to ejabberd, announcing transitions by DM, plus the matching
    /// autojoin bookmark set (spec §4.5 phase 8).
    async fn sync_affiliations_and_bookmarks(&self, outcome: &mut SyncOutcome, document: &Document) {
        let domain = self.api.xmpp_domain().to_string();
        let muc_service = self.api.muc_service().to_string();

        for room in &document.rooms {
            let Some(room_id) = &room.room_id else { continue };
            let existing = match self.api.get_room_affiliations(room_id.as_str()).await {
                Ok(records) => records,
                Err(e) => {
                    outcome.failed(format!("room/{room_id}/affiliations"), e);
                    continue;
                }
            };

            for member in &document.members {
                let desired = affiliation(&member.groups, &room.admins, &room.members);
                if desired == Affiliation::None {
                    continue;
                }
                let subject = format!("room/{room_id}/affiliation/{}", member.user_id);
                let current = existing
                    .iter()
                    .find(|r| r.jid.starts_with(&format!("{}@", member.user_id)))
                    .map(|r| r.affiliation);
                if current == Some(desired) {
                    outcome.ok(subject, SyncAction::Unchanged);
                    continue;
                }
                match self
                    .api
                    .set_room_affiliation(room_id.as_str(), member.user_id.as_str(), &domain, desired)
                    .await
                {
                    Ok(()) => {
                        outcome.ok(subject, SyncAction::Updated);
                        self.notify_affiliation_change(member.user_id.as_str(), &room.name, room_id.as_str(), &muc_service, desired);
                    }
                    Err(e) => outcome.failed(subject, e),
                }
            }
        }

        for member in &document.members {
            let subject = format!("bookmarks/{}", member.user_id);
            let desired_bookmarks: Vec<Bookmark> = document
                .rooms
                .iter()
                .filter_map(|room| {
                    let room_id = room.room_id.as_ref()?;
                    let has_affiliation =
                        affiliation(&member.groups, &room.admins, &room.members) != Affiliation::None;
                    has_affiliation.then(|| Bookmark {
                        jid: format!("{room_id}@{muc_service}"),
                        name: room.name.clone(),
                        autojoin: true,
                        nick: Some(member.user_id.as_str().to_string()),
                    })
                })
                .collect();

            let current = match self.api.get_user_bookmarks(member.user_id.as_str()).await {
                Ok(b) => b,
                Err(e) => {
                    outcome.failed(subject, e);
                    continue;
                }
            };
            if bookmarks_equivalent(&current, &desired_bookmarks) {
                outcome.ok(subject, SyncAction::Unchanged);
                continue;
            }
            match self
                .api
                .set_user_bookmarks(member.user_id.as_str(), &desired_bookmarks)
                .await
            {
                Ok(()) => outcome.ok(subject, SyncAction::Updated),
                Err(e) => outcome.failed(subject, e),
            }
        }
    }

    /// Tell the bot to DM a member about a just-applied affiliation change
    /// (spec §4.5 phase 8: "a join URL for member/admin/owner, a notice for
    /// none"). The bot drops messages addressed to its own account, so the
    /// ghost-included bot member never notifies itself.
    fn notify_affiliation_change(
        &self,
        user_id: &str,
        room_name: &str,
        room_id: &str,
        muc_service: &str,
        desired: Affiliation,
    ) {
        let Some(bot) = &self.bot else { return };
        let text = match desired {
            Affiliation::None => format!("you no longer have access to '{room_name}'"),
            _ => format!("you are now {desired} of '{room_name}' — join at {room_id}@{muc_service}"),
        };
        bot.send_direct(user_id, text);
    }

    fn update_tracking(&self, document: &mut Document, desired_users: &BTreeSet<String>, desired_rooms: &BTreeSet<String>) {
        document.do_not_edit_state.managed_members = desired_users
            .iter()
            .filter_map(|id| UserId::parse(id.clone()).ok())
            .collect();
        document.do_not_edit_state.managed_rooms = desired_rooms
            .iter()
            .filter_map(|id| RoomId::parse(id.clone()).ok())
            .collect();
        document.do_not_edit_state.managed_groups = document.groups.keys().cloned().collect::<BTreeSet<GroupKey>>();
    }
}

/// Merge the configured default MUC options with the flags derived from
/// `only-admins-can-speak?` (spec §4.5 phase 6). The derived flags always
/// win over a same-named default, since they encode the operator's explicit
/// per-room choice.
fn room_creation_opts(defaults: &[(String, String)], only_admins_can_speak: bool) -> Vec<(String, String)> {
    let mut opts: Vec<(String, String)> = defaults
        .iter()
        .filter(|(k, _)| k != "moderated" && k != "members_by_default")
        .cloned()
        .collect();
    opts.push(("moderated".to_string(), only_admins_can_speak.to_string()));
    if only_admins_can_speak {
        opts.push(("members_by_default".to_string(), "false".to_string()));
    }
    opts
}

/// Whether the current and desired bookmark sets are the same after
/// normalizing (sort by jid, coerce autojoin to boolean — spec §4.5 phase
/// 8). Compares every field the document controls, including `name`, so a
/// room rename (which keeps its `room-id`, spec §9 Open Questions) still
/// propagates to the operator's bookmark label.
fn bookmarks_equivalent(a: &[Bookmark], b: &[Bookmark]) -> bool {
    let mut a_sorted: Vec<&Bookmark> = a.iter().collect();
    let mut b_sorted: Vec<&Bookmark> = b.iter().collect();
    a_sorted.sort_by(|x, y| x.jid.cmp(&y.jid));
    b_sorted.sort_by(|x, y| x.jid.cmp(&y.jid));
    a_sorted.len() == b_sorted.len()
        && a_sorted
            .iter()
            .zip(b_sorted.iter())
            .all(|(x, y)| x.jid == y.jid && x.autojoin == y.autojoin && x.name == y.name && x.nick == y.nick)
}

/// A cryptographically strong throwaway registration password: 24 random
/// bytes from the OS CSPRNG, base64-encoded (spec §4.5 phase 5). Never
/// persisted or surfaced to an operator — real users get their password
/// through the out-of-band signup flow.
fn generate_password() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Room;

    fn room(name: &str, room_id: Option<&str>) -> Room {
        Room {
            name: name.to_string(),
            room_id: room_id.map(|id| RoomId::parse(id).unwrap()),
            members: BTreeSet::new(),
            admins: BTreeSet::new(),
            only_admins_can_speak: false,
        }
    }

    #[test]
    fn assign_room_ids_dedupes_kebab_collisions() {
        let api = RemoteApiClient::new("http://localhost", "example.org", "conference.example.org");
        let engine = SyncEngine::new(&api);
        let mut doc = Document::default_seed();
        doc.rooms.push(room("Officers", None));
        doc.rooms.push(room("Officers!", None));

        engine.assign_room_ids(&mut doc);

        let ids: Vec<String> = doc
            .rooms
            .iter()
            .map(|r| r.room_id.as_ref().unwrap().as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["officers", "officers-2"]);
    }

    #[test]
    fn assign_room_ids_leaves_existing_ids_untouched() {
        let api = RemoteApiClient::new("http://localhost", "example.org", "conference.example.org");
        let engine = SyncEngine::new(&api);
        let mut doc = Document::default_seed();
        doc.rooms.push(room("Renamed Room", Some("original-id")));

        engine.assign_room_ids(&mut doc);

        assert_eq!(doc.rooms[0].room_id.as_ref().unwrap().as_str(), "original-id");
    }

    #[test]
    fn bookmarks_equivalent_ignores_order() {
        let a = vec![
            Bookmark { jid: "a@conf".into(), name: "A".into(), autojoin: true, nick: None },
            Bookmark { jid: "b@conf".into(), name: "B".into(), autojoin: false, nick: None },
        ];
        let b = vec![
            Bookmark { jid: "b@conf".into(), name: "B".into(), autojoin: false, nick: None },
            Bookmark { jid: "a@conf".into(), name: "A".into(), autojoin: true, nick: None },
        ];
        assert!(bookmarks_equivalent(&a, &b));
    }

    #[test]
    fn bookmarks_differ_on_renamed_room() {
        // A room rename keeps its room-id (and therefore its bookmark jid)
        // but must still be treated as a change so the new label reaches
        // the member's bookmark (spec §9 Open Questions, test scenario 2).
        let a = vec![Bookmark { jid: "officers@conf".into(), name: "Officers".into(), autojoin: true, nick: None }];
        let b = vec![Bookmark { jid: "officers@conf".into(), name: "Senior Officers".into(), autojoin: true, nick: None }];
        assert!(!bookmarks_equivalent(&a, &b));
    }

    #[test]
    fn room_creation_opts_merge_moderation_flags() {
        let defaults = default_muc_options();
        let moderated = room_creation_opts(&defaults, true);
        assert!(moderated.contains(&("moderated".to_string(), "true".to_string())));
        assert!(moderated.contains(&("members_by_default".to_string(), "false".to_string())));
        assert!(moderated.contains(&("persistent".to_string(), "true".to_string())));

        let open = room_creation_opts(&defaults, false);
        assert!(open.contains(&("moderated".to_string(), "false".to_string())));
        assert!(!open.iter().any(|(k, _)| k == "members_by_default"));
    }

    #[test]
    fn room_creation_opts_lets_derived_flags_override_configured_defaults() {
        // An operator-configured default that happens to collide with a
        // derived flag must not win over the room's own moderation choice.
        let defaults = vec![("moderated".to_string(), "false".to_string())];
        let opts = room_creation_opts(&defaults, true);
        assert_eq!(opts.iter().filter(|(k, _)| k == "moderated").count(), 1);
        assert!(opts.contains(&("moderated".to_string(), "true".to_string())));
    }

    #[test]
    fn registration_password_is_fixed_in_dev_and_random_in_prod() {
        let api = RemoteApiClient::new("http://localhost", "example.org", "conference.example.org");
        let dev_engine = SyncEngine::new(&api).with_options(SyncOptions {
            env: Env::Dev,
            default_test_password: "fixed-pw".to_string(),
            ..SyncOptions::default()
        });
        assert_eq!(dev_engine.registration_password(), "fixed-pw");
        assert_eq!(dev_engine.registration_password(), "fixed-pw");

        let prod_engine = SyncEngine::new(&api);
        assert_ne!(prod_engine.registration_password(), prod_engine.registration_password());
    }
}
