//! The admin bot: a long-lived XMPP client session that answers a small
//! command grammar sent by owners in a one-to-one chat (spec §4.6).
//!
//! Ownership follows an actor shape: one task owns the `tokio-xmpp` client
//! and all mutable state; everything else talks to it through
//! [`AdminBotHandle`] over an mpsc channel. Nothing outside this module
//! touches the XMPP connection directly.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jid::{BareJid, Jid};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_xmpp::{AsyncClient, Event};
use xmpp_parsers::message::{Body, Message, MessageType};

use crate::config_store::ConfigStore;
use crate::document::{AdminCredentials, Document, GroupKey};
use crate::mutator::{swap_state, swap_state_with_bot};
use crate::remote_api::RemoteApiClient;
use crate::sync_engine::SyncOptions;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Failure to encrypt a direct message for a recipient (spec §4.6
/// "Encryption (optional)"). Never fatal — the caller falls back to
/// plaintext and logs at `warn`.
#[derive(Debug, thiserror::Error)]
#[error("could not encrypt message for {recipient}: {reason}")]
pub struct EncryptError {
    pub recipient: String,
    pub reason: String,
}

/// An optional end-to-end encryption backend for the bot's direct messages.
/// Spec §4.6/§9 marks OMEMO strictly optional and orthogonal to the
/// correctness of reconciliation, so this crate ships the seam — a trait
/// object plugged in at [`spawn_with_encryptor`] — and the plaintext
/// fallback path, but no concrete OMEMO implementation; a conforming
/// minimal build runs with no encryptor at all (spec §9).
pub trait Encryptor: Send + Sync {
    /// Encrypt `plaintext` for `recipient`, returning the ciphertext body
    /// to send in its place. Returns an error if no OMEMO session exists
    /// for the recipient or the encryption step itself fails.
    fn encrypt(&self, recipient: &BareJid, plaintext: &str) -> Result<String, EncryptError>;
}

/// A request delivered to the bot's owning task from the rest of the
/// process: broadcast a result to owners, join a room the sync engine just
/// created (spec §4.5 phase 6), send a single member a DM about an
/// affiliation change (spec §4.5 phase 8), or shut down.
pub enum BotCommand {
    Broadcast(String),
    JoinRoom(crate::document::RoomId),
    SendDirect { user_id: String, text: String },
    Shutdown,
}

/// The admin bot is wired explicitly into whatever needs it (the sync
/// engine, the CLI) via this handle rather than through any global/static
/// instance (spec §9 Design Notes).
#[derive(Clone)]
pub struct AdminBotHandle {
    tx: mpsc::UnboundedSender<BotCommand>,
}

impl AdminBotHandle {
    pub fn broadcast(&self, message: impl Into<String>) {
        let _ = self.tx.send(BotCommand::Broadcast(message.into()));
    }

    /// Ask the bot to join a room it has not joined yet — called once a
    /// room is freshly created on the remote (spec §4.5 phase 6).
    pub fn join_room(&self, room_id: crate::document::RoomId) {
        let _ = self.tx.send(BotCommand::JoinRoom(room_id));
    }

    /// Send a single member a direct message, e.g. an affiliation-change
    /// notice (spec §4.5 phase 8). Dropped silently by the bot if
    /// `user_id` is the bot's own account (spec §4.6 send path).
    pub fn send_direct(&self, user_id: impl Into<String>, text: impl Into<String>) {
        let _ = self.tx.send(BotCommand::SendDirect {
            user_id: user_id.into(),
            text: text.into(),
        });
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(BotCommand::Shutdown);
    }
}

struct CommandGrammar {
    status: Regex,
    create_meet: Regex,
    login_user: Regex,
    login_ej_admin: Regex,
}

impl CommandGrammar {
    fn compile() -> Self {
        Self {
            status: Regex::new(r"(?i)^bot\s+status\s*$").expect("valid regex"),
            create_meet: Regex::new(r"(?i)^bot\s+create\s+meet\s+(.+)$").expect("valid regex"),
            login_user: Regex::new(r"(?i)^bot\s+login\s+user\s+(\S+)\s*$").expect("valid regex"),
            login_ej_admin: Regex::new(r"(?i)^bot\s+login\s+ej\s+admin\s*$").expect("valid regex"),
        }
    }
}

/// Spawn the bot's owning task. Returns a handle for the rest of the
/// process and the task's join handle, which only resolves on shutdown.
pub fn spawn(
    store: Arc<ConfigStore>,
    api: Arc<RemoteApiClient>,
    jid: BareJid,
    options: SyncOptions,
) -> (AdminBotHandle, JoinHandle<()>) {
    spawn_with_encryptor(store, api, jid, options, None)
}

/// Like [`spawn`], but with an OMEMO-style [`Encryptor`] plugged in for
/// direct messages (spec §4.6 "Encryption (optional)"). Pass `None` for a
/// conforming minimal build that never attempts encryption.
pub fn spawn_with_encryptor(
    store: Arc<ConfigStore>,
    api: Arc<RemoteApiClient>,
    jid: BareJid,
    options: SyncOptions,
    encryptor: Option<Arc<dyn Encryptor>>,
) -> (AdminBotHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = AdminBotHandle { tx: tx.clone() };
    // The task keeps a clone of its own sender so a bot command (e.g.
    // `create meet`) can route its mutation through `swap_state_with_bot`
    // with a real bot handle, the same way the watcher and `serve` do.
    let self_handle = AdminBotHandle { tx };
    let join = tokio::spawn(run(store, api, jid, rx, self_handle, options, encryptor));
    (handle, join)
}

/// How a disconnect that happened before the session ever reached `Online`
/// should be treated (spec §4.6 bootstrap / §7 `AuthFailure`/`StreamError`).
/// Classified by keyword match on the disconnect reason's rendered text,
/// since this is the only signal `tokio-xmpp` surfaces across transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisconnectKind {
    /// SASL rejected the credentials — worth one password-reset-and-retry.
    SaslFailure,
    /// A stream-level policy violation (rate-limit, IP ban) — retrying
    /// immediately would make it worse; don't.
    PolicyViolation,
    /// Anything else — a transient network blip, handled by the ordinary
    /// backoff-and-reconnect path.
    Other,
}

fn classify_disconnect(reason: &impl std::fmt::Debug) -> DisconnectKind {
    let text = format!("{reason:?}").to_ascii_lowercase();
    if text.contains("policy-violation") || text.contains("conflict") || text.contains("rate-limit") {
        DisconnectKind::PolicyViolation
    } else if text.contains("sasl") || text.contains("not-authorized") || text.contains("auth") {
        DisconnectKind::SaslFailure
    } else {
        DisconnectKind::Other
    }
}

async fn run(
    store: Arc<ConfigStore>,
    api: Arc<RemoteApiClient>,
    jid: BareJid,
    mut commands: mpsc::UnboundedReceiver<BotCommand>,
    self_handle: AdminBotHandle,
    options: SyncOptions,
    encryptor: Option<Arc<dyn Encryptor>>,
) {
    let grammar = CommandGrammar::compile();
    let mut joined_rooms: std::collections::HashSet<String> = std::collections::HashSet::new();

    // Whether this connection cycle has already spent its one SASL-failure
    // password-reset retry (spec §4.6: "retry once"). Cleared every time the
    // bot reaches `Online`, so a later, unrelated credential staleness can
    // still self-heal once more.
    let mut sasl_reset_used = false;

    'reconnect: loop {
        let password = match bootstrap_credentials(&store, &api, &jid).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "could not bootstrap admin bot credentials, retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };

        let mut client = AsyncClient::new(jid.to_string(), password);
        tracing::info!(%jid, "admin bot connecting");
        let mut ever_online = false;

        loop {
            tokio::select! {
                event = client.next() => {
                    match event {
                        Some(Event::Online { resumed, .. }) => {
                            tracing::info!(resumed, "admin bot online");
                            ever_online = true;
                            sasl_reset_used = false;
                            // On a fresh connect, join every configured room; on a
                            // resumed session, only rejoin what isn't already
                            // tracked as joined (spec §4.6 room join tracking).
                            if !resumed {
                                joined_rooms.clear();
                            }
                            join_rooms(&store, &api, &mut client, &jid, &mut joined_rooms).await;
                        }
                        Some(Event::Disconnected(reason)) => {
                            // A disconnect before the session ever came online is an
                            // authentication failure, not a network blip — classify
                            // and react per spec §4.6/§7. Once online, any disconnect
                            // is ordinary and falls through to backoff-and-reconnect.
                            if !ever_online {
                                match classify_disconnect(&reason) {
                                    DisconnectKind::SaslFailure if !sasl_reset_used => {
                                        sasl_reset_used = true;
                                        tracing::warn!(?reason, "admin bot SASL auth failed, resetting password and retrying once");
                                        if let Err(e) = reset_admin_password(&store, &api, &jid).await {
                                            tracing::error!(error = %e, "could not reset admin bot password after SASL failure");
                                        }
                                        break; // retry immediately with the new password
                                    }
                                    DisconnectKind::PolicyViolation => {
                                        tracing::error!(
                                            ?reason,
                                            "admin bot hit a stream policy violation (rate-limit or IP ban); \
                                             staying in a degraded state and will not reconnect automatically"
                                        );
                                        // Surface the diagnostic and stop reconnecting, but keep the
                                        // task alive so it can still be shut down cleanly (spec §7:
                                        // "does not abort process startup").
                                        degraded_wait(&mut commands).await;
                                        return;
                                    }
                                    _ => {
                                        tracing::warn!(?reason, "admin bot disconnected before coming online, will reconnect");
                                    }
                                }
                            } else {
                                tracing::warn!(?reason, "admin bot disconnected, will reconnect");
                            }
                            break;
                        }
                        Some(Event::Stanza(stanza)) => {
                            if let Ok(message) = Message::try_from(stanza) {
                                handle_incoming(&store, &api, &jid, &grammar, &mut client, message, &self_handle, &options, encryptor.as_ref()).await;
                            }
                        }
                        None => {
                            tracing::warn!("admin bot stream ended, reconnecting");
                            break;
                        }
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(BotCommand::Broadcast(text)) => broadcast_to_owners(&store, &mut client, &jid, &text, encryptor.as_ref()).await,
                        Some(BotCommand::JoinRoom(room_id)) => {
                            join_one_room(&api, &mut client, &jid, room_id.as_str(), &mut joined_rooms).await;
                        }
                        Some(BotCommand::SendDirect { user_id, text }) => {
                            if user_id == jid.node().map(|n| n.to_string()).unwrap_or_default() {
                                continue; // never message ourselves (spec §4.6 send path)
                            }
                            if let Ok(to) = format!("{user_id}@{}", jid.domain()).parse::<BareJid>() {
                                send_to(&mut client, &jid, &to, &text, encryptor.as_ref()).await;
                            }
                        }
                        Some(BotCommand::Shutdown) | None => {
                            tracing::info!("admin bot shutting down");
                            return;
                        }
                    }
                }
            }
        }

        tokio::time::sleep(RECONNECT_BACKOFF).await;
        continue 'reconnect;
    }
}

/// Wait out a degraded state: the bot has given up reconnecting after a
/// stream policy violation, but the owning task stays alive so a shutdown
/// request still gets acknowledged instead of the task silently vanishing.
async fn degraded_wait(commands: &mut mpsc::UnboundedReceiver<BotCommand>) {
    while let Some(command) = commands.recv().await {
        if matches!(command, BotCommand::Shutdown) {
            return;
        }
        tracing::warn!("admin bot is degraded (stream policy violation); ignoring command");
    }
}

/// Generate a fresh password, push it to ejabberd, and record it in the
/// tracking section — the SASL-failure self-heal path (spec §4.6/§7, test
/// scenario 6). Distinct from [`bootstrap_credentials`], which only fires
/// when no credentials are on record at all.
async fn reset_admin_password(
    store: &ConfigStore,
    api: &RemoteApiClient,
    jid: &BareJid,
) -> Result<(), crate::mutator::MutationError> {
    let password = generate_password();
    let username = jid.node().map(|n| n.to_string()).unwrap_or_default();
    api.change_password(&username, &password)
        .await
        .map_err(|e| crate::mutator::MutationError::Rejected(e.to_string()))?;

    swap_state(store, api, "admin bot SASL self-heal", |document: &mut Document| {
        document.do_not_edit_state.admin_credentials = Some(AdminCredentials {
            username: Document::BOT_USER_ID.to_string(),
            password: password.clone(),
        });
        Ok(())
    })
    .await?;

    Ok(())
}

/// Ensure the bot's own ejabberd account exists and its credentials are on
/// record in the document, generating and persisting them on first run.
async fn bootstrap_credentials(
    store: &ConfigStore,
    api: &RemoteApiClient,
    jid: &BareJid,
) -> Result<String, crate::mutator::MutationError> {
    let document = store.read().await?;
    if let Some(creds) = &document.do_not_edit_state.admin_credentials {
        return Ok(creds.password.clone());
    }

    let password = generate_password();
    api.register(&jid.node().map(|n| n.to_string()).unwrap_or_default(), &password)
        .await
        .map_err(|e| crate::mutator::MutationError::Rejected(e.to_string()))?;

    swap_state(store, api, "admin bot bootstrap", |document: &mut Document| {
        document.do_not_edit_state.admin_credentials = Some(AdminCredentials {
            username: Document::BOT_USER_ID.to_string(),
            password: password.clone(),
        });
        Ok(())
    })
    .await?;

    Ok(password)
}

/// Join every configured room not already tracked as joined (spec §4.6 room
/// join tracking). Called on every connect; on a resumed session the caller
/// has left `joined_rooms` populated from before the disconnect, so this
/// only rejoins what's missing.
async fn join_rooms(
    store: &ConfigStore,
    api: &RemoteApiClient,
    client: &mut AsyncClient,
    bot_jid: &BareJid,
    joined_rooms: &mut std::collections::HashSet<String>,
) {
    let Ok(document) = store.read().await else { return };
    for room in &document.rooms {
        let Some(room_id) = &room.room_id else { continue };
        if joined_rooms.contains(room_id.as_str()) {
            continue;
        }
        join_one_room(api, client, bot_jid, room_id.as_str(), joined_rooms).await;
    }
}

/// Send presence into a single MUC room so it joins the bot under its
/// user-id nick, and remember it in `joined_rooms` so a later reconnect
/// doesn't redundantly rejoin it. A room's JID is `room-id@mucService`
/// (spec GLOSSARY), not the bot's own XMPP domain.
async fn join_one_room(
    api: &RemoteApiClient,
    client: &mut AsyncClient,
    bot_jid: &BareJid,
    room_id: &str,
    joined_rooms: &mut std::collections::HashSet<String>,
) {
    let Some(nick) = bot_jid.node().map(|n| n.to_string()) else { return };
    let Ok(room_jid) = format!("{room_id}@{}/{nick}", api.muc_service()).parse::<Jid>() else {
        return;
    };
    let presence = xmpp_parsers::presence::Presence::new(xmpp_parsers::presence::Type::None)
        .with_to(room_jid)
        .with_from(Jid::from(bot_jid.clone()));
    if client.send(presence.into()).await.is_ok() {
        joined_rooms.insert(room_id.to_string());
    }
}

async fn handle_incoming(
    store: &ConfigStore,
    api: &RemoteApiClient,
    bot_jid: &BareJid,
    grammar: &CommandGrammar,
    client: &mut AsyncClient,
    message: Message,
    self_handle: &AdminBotHandle,
    options: &SyncOptions,
    encryptor: Option<&Arc<dyn Encryptor>>,
) {
    let Some(from) = &message.from else { return };
    let from_bare = from.clone().into_bare();
    if &from_bare == bot_jid {
        return; // never act on our own reflected messages
    }

    let Some(body) = message.bodies.get("") else { return };
    let text = body.0.trim();

    let sender_id = from_bare.node().map(|n| n.to_string()).unwrap_or_default();
    let reply = if grammar.status.is_match(text) {
        status_reply(store).await
    } else if let Some(captures) = grammar.create_meet.captures(text) {
        create_meet_reply(store, api, self_handle, options, &captures[1]).await
    } else if grammar.login_user.is_match(text) {
        if !sender_is_owner(store, &sender_id).await {
            Some("only members of group/owner may use 'bot login user'".to_string())
        } else {
            let captures = grammar.login_user.captures(text).expect("matched above");
            login_user_reply(store, api, &captures[1]).await
        }
    } else if grammar.login_ej_admin.is_match(text) {
        if !sender_is_owner(store, &sender_id).await {
            Some("only members of group/owner may use 'bot login ej admin'".to_string())
        } else {
            login_ej_admin_reply(store).await
        }
    } else if grammar_matches_bare_bot(text) {
        Some(HELP_TEXT.to_string())
    } else {
        None
    };

    if let Some(reply) = reply {
        send_to(client, bot_jid, &from_bare, &reply, encryptor).await;
    }
}

const HELP_TEXT: &str = "known commands: bot status | bot create meet [name] | bot login user <id> | bot login ej admin";

fn grammar_matches_bare_bot(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower == "bot" || lower.starts_with("bot ")
}

/// Whether the member whose user-id is `sender_id` belongs to `group/owner`
/// (spec §4.6: `login user`/`login ej admin` are gated to this group). Reads
/// the document fresh — commands are rare compared to syncs, so there's no
/// need to cache membership.
async fn sender_is_owner(store: &ConfigStore, sender_id: &str) -> bool {
    let Ok(document) = store.read().await else { return false };
    document
        .members
        .iter()
        .any(|m| m.user_id.as_str() == sender_id && m.groups.contains(&GroupKey::owner()))
}

async fn status_reply(store: &ConfigStore) -> Option<String> {
    let document = store.read().await.ok()?;
    Some(format!(
        "{} room(s), {} member(s), {} group(s)",
        document.rooms.len(),
        document.members.len(),
        document.groups.len()
    ))
}

async fn create_meet_reply(
    store: &ConfigStore,
    api: &RemoteApiClient,
    self_handle: &AdminBotHandle,
    options: &SyncOptions,
    name: &str,
) -> Option<String> {
    let name = name.trim().to_string();
    let result = swap_state_with_bot(
        store,
        api,
        Some(self_handle.clone()),
        options.clone(),
        "bot command: create meet",
        move |document: &mut Document| {
            if document.rooms.iter().any(|r| r.name == name) {
                return Err(format!("a room named '{name}' already exists"));
            }
            document.rooms.push(crate::document::Room {
                name: name.clone(),
                room_id: None,
                members: [GroupKey::owner()].into_iter().collect(),
                admins: [GroupKey::owner()].into_iter().collect(),
                only_admins_can_speak: false,
            });
            Ok(())
        },
    )
    .await;

    Some(match result {
        Ok(_) => "room created".to_string(),
        Err(e) => format!("could not create room: {e}"),
    })
}

/// Reset a managed member's ejabberd password via `mutator::update_password`,
/// which verifies `user_id` names a managed member before touching the
/// remote (spec §4.7) — a chat-originated reset must not be able to reach
/// an arbitrary, unmanaged account.
async fn login_user_reply(store: &ConfigStore, api: &RemoteApiClient, user_id: &str) -> Option<String> {
    let password = generate_password();
    match crate::mutator::update_password(store, api, user_id, &password).await {
        Ok(()) => Some(format!("new password for {user_id}: {password}")),
        Err(e) => Some(format!("could not reset password: {e}")),
    }
}

async fn login_ej_admin_reply(store: &ConfigStore) -> Option<String> {
    let document = store.read().await.ok()?;
    match &document.do_not_edit_state.admin_credentials {
        Some(creds) => Some(format!("ejabberd admin login: {} / {}", creds.username, creds.password)),
        None => Some("no ejabberd admin credentials on record yet".to_string()),
    }
}

async fn broadcast_to_owners(
    store: &ConfigStore,
    client: &mut AsyncClient,
    bot_jid: &BareJid,
    text: &str,
    encryptor: Option<&Arc<dyn Encryptor>>,
) {
    let Ok(document) = store.read().await else { return };
    let Some(owner_label) = document.groups.get(&GroupKey::owner()) else { return };
    let _ = owner_label;
    for member in document.members.iter().filter(|m| m.groups.contains(&GroupKey::owner())) {
        let Ok(to) = format!("{}@{}", member.user_id, bot_jid.domain()).parse::<BareJid>() else { continue };
        send_to(client, bot_jid, &to, text, encryptor).await;
    }
}

async fn send_to(
    client: &mut AsyncClient,
    from: &BareJid,
    to: &BareJid,
    text: &str,
    encryptor: Option<&Arc<dyn Encryptor>>,
) {
    let body = match encryptor {
        Some(encryptor) => match encryptor.encrypt(to, text) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                tracing::warn!(error = %e, %to, "OMEMO encryption failed, falling back to plaintext");
                text.to_string()
            }
        },
        None => text.to_string(),
    };

    let mut message = Message::new(Some(Jid::from(to.clone())));
    message.type_ = MessageType::Chat;
    message.from = Some(Jid::from(from.clone()));
    message.bodies.insert(String::new(), Body(body));
    let _ = client.send(message.into()).await;
}

fn generate_password() -> String {
    use rand::Rng;
    use rand::distributions::Alphanumeric;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
