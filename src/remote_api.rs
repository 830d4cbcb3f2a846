//! Thin typed facade over ejabberd's HTTP admin API (spec §4.3).
//!
//! Every operation POSTs a JSON payload to `{admin_api_url}/<endpoint>`; a
//! 200 response is success, anything else raises [`ApiError`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::affiliation::Affiliation;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
#[error("ejabberd admin API call to '{endpoint}' failed: HTTP {status}: {body}")]
pub struct ApiError {
    pub endpoint: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to '{endpoint}' could not be sent: {source}")]
    Send {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A room affiliation record returned by `getRoomAffiliations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliationRecord {
    pub jid: String,
    pub affiliation: Affiliation,
}

/// A single roster entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterItem {
    pub jid: String,
    pub nick: String,
    #[serde(default)]
    pub group: Vec<String>,
    pub subscription: String,
}

/// A MUC bookmark entry (XEP-0048).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub jid: String,
    pub name: String,
    pub autojoin: bool,
    pub nick: Option<String>,
}

#[derive(Serialize)]
struct KeyValue<'a> {
    name: &'a str,
    value: &'a str,
}

/// Stateless client against the JSON-over-HTTP admin endpoint.
pub struct RemoteApiClient {
    http: reqwest::Client,
    admin_api_url: String,
    xmpp_domain: String,
    muc_service: String,
}

impl RemoteApiClient {
    pub fn new(admin_api_url: impl Into<String>, xmpp_domain: impl Into<String>, muc_service: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            admin_api_url: admin_api_url.into(),
            xmpp_domain: xmpp_domain.into(),
            muc_service: muc_service.into(),
        }
    }

    pub fn xmpp_domain(&self) -> &str {
        &self.xmpp_domain
    }

    pub fn muc_service(&self) -> &str {
        &self.muc_service
    }

    async fn post_json(&self, endpoint: &str, payload: serde_json::Value) -> Result<serde_json::Value, TransportError> {
        let url = format!("{}/{endpoint}", self.admin_api_url);
        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|source| TransportError::Send {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        resp.json::<serde_json::Value>()
            .await
            .or_else(|_| Ok(serde_json::Value::Null))
    }

    // --- Users ---

    pub async fn register(&self, user: &str, password: &str) -> Result<(), TransportError> {
        self.post_json(
            "register",
            serde_json::json!({ "user": user, "host": self.xmpp_domain, "password": password }),
        )
        .await?;
        Ok(())
    }

    pub async fn change_password(&self, user: &str, new_password: &str) -> Result<(), TransportError> {
        self.post_json(
            "change_password",
            serde_json::json!({ "user": user, "host": self.xmpp_domain, "newpass": new_password }),
        )
        .await?;
        Ok(())
    }

    pub async fn unregister(&self, user: &str) -> Result<(), TransportError> {
        self.post_json(
            "unregister",
            serde_json::json!({ "user": user, "host": self.xmpp_domain }),
        )
        .await?;
        Ok(())
    }

    pub async fn registered_users(&self) -> Result<Vec<String>, TransportError> {
        let value = self
            .post_json("registered_users", serde_json::json!({ "host": self.xmpp_domain }))
            .await?;
        Ok(parse_string_list(&value))
    }

    // --- Rooms ---

    pub async fn create_room(&self, name: &str) -> Result<(), TransportError> {
        self.post_json(
            "create_room",
            serde_json::json!({ "name": name, "host": self.muc_service, "service": self.muc_service }),
        )
        .await?;
        Ok(())
    }

    pub async fn create_room_with_opts(
        &self,
        name: &str,
        opts: &[(String, String)],
    ) -> Result<(), TransportError> {
        let options: Vec<KeyValue> = opts
            .iter()
            .map(|(name, value)| KeyValue { name, value })
            .collect();
        self.post_json(
            "create_room_with_opts",
            serde_json::json!({
                "name": name,
                "host": self.muc_service,
                "service": self.muc_service,
                "options": options,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn destroy_room(&self, name: &str) -> Result<(), TransportError> {
        self.post_json(
            "destroy_room",
            serde_json::json!({ "name": name, "service": self.muc_service }),
        )
        .await?;
        Ok(())
    }

    pub async fn muc_online_rooms(&self) -> Result<Vec<String>, TransportError> {
        let value = self
            .post_json("muc_online_rooms", serde_json::json!({ "service": self.muc_service }))
            .await?;
        Ok(parse_string_list(&value))
    }

    pub async fn get_room_options(&self, name: &str) -> Result<Vec<(String, String)>, TransportError> {
        let value = self
            .post_json(
                "get_room_options",
                serde_json::json!({ "name": name, "service": self.muc_service }),
            )
            .await?;
        let pairs: Vec<KeyValueOwned> = serde_json::from_value(value).unwrap_or_default();
        Ok(pairs.into_iter().map(|p| (p.name, p.value)).collect())
    }

    pub async fn get_room_affiliations(&self, name: &str) -> Result<Vec<AffiliationRecord>, TransportError> {
        let value = self
            .post_json(
                "get_room_affiliations",
                serde_json::json!({ "name": name, "service": self.muc_service }),
            )
            .await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    pub async fn set_room_affiliation(
        &self,
        room: &str,
        user: &str,
        host: &str,
        affiliation: Affiliation,
    ) -> Result<(), TransportError> {
        self.post_json(
            "set_room_affiliation",
            serde_json::json!({
                "name": room,
                "service": self.muc_service,
                "jid": format!("{user}@{host}"),
                "affiliation": affiliation.to_string(),
            }),
        )
        .await?;
        Ok(())
    }

    // --- Roster ---

    pub async fn get_roster(&self, user: &str) -> Result<Vec<RosterItem>, TransportError> {
        let value = self
            .post_json("get_roster", serde_json::json!({ "user": user, "host": self.xmpp_domain }))
            .await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    pub async fn add_roster_item(
        &self,
        local_user: &str,
        local_host: &str,
        user: &str,
        host: &str,
        nick: &str,
        groups: &[String],
        subscription: &str,
    ) -> Result<(), TransportError> {
        self.post_json(
            "add_rosteritem",
            serde_json::json!({
                "localuser": local_user,
                "localserver": local_host,
                "user": user,
                "server": host,
                "nick": nick,
                "group": groups.join("; "),
                "subs": subscription,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_roster_item(
        &self,
        local_user: &str,
        local_host: &str,
        user: &str,
        host: &str,
    ) -> Result<(), TransportError> {
        self.post_json(
            "delete_rosteritem",
            serde_json::json!({
                "localuser": local_user,
                "localserver": local_host,
                "user": user,
                "server": host,
            }),
        )
        .await?;
        Ok(())
    }

    // --- Bookmarks ---

    pub async fn get_user_bookmarks(&self, user: &str) -> Result<Vec<Bookmark>, TransportError> {
        let value = self
            .post_json(
                "get_user_bookmarks",
                serde_json::json!({ "user": user, "host": self.xmpp_domain }),
            )
            .await?;
        let xml = value.as_str().unwrap_or_default();
        Ok(parse_bookmarks_xml(xml))
    }

    pub async fn set_user_bookmarks(&self, user: &str, bookmarks: &[Bookmark]) -> Result<(), TransportError> {
        let xml = render_bookmarks_xml(bookmarks);
        self.post_json(
            "set_user_bookmarks",
            serde_json::json!({ "user": user, "host": self.xmpp_domain, "storage": xml }),
        )
        .await?;
        Ok(())
    }
}

#[derive(Deserialize, Default)]
struct KeyValueOwned {
    name: String,
    value: String,
}

fn parse_string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Escape XML attribute values: `&`, `<`, `>`, `"` (spec §4.3/§6).
fn escape_xml_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render a XEP-0048 `<storage xmlns="storage:bookmarks">` payload.
fn render_bookmarks_xml(bookmarks: &[Bookmark]) -> String {
    let mut xml = String::from(r#"<storage xmlns="storage:bookmarks">"#);
    for b in bookmarks {
        xml.push_str(&format!(
            r#"<conference jid="{}" autojoin="{}" name="{}">"#,
            escape_xml_attr(&b.jid),
            b.autojoin,
            escape_xml_attr(&b.name),
        ));
        if let Some(nick) = &b.nick {
            xml.push_str(&format!("<nick>{}</nick>", escape_xml_attr(nick)));
        }
        xml.push_str("</conference>");
    }
    xml.push_str("</storage>");
    xml
}

/// Parse a XEP-0048 bookmarks payload back into structured records.
///
/// This is a narrow reader for our own fixed shape, not a general XML
/// parser: `minidom` is used (same crate the admin bot uses for stanza
/// bodies) rather than hand-rolled string scanning.
fn parse_bookmarks_xml(xml: &str) -> Vec<Bookmark> {
    let Ok(root): Result<minidom::Element, _> = xml.parse() else {
        return Vec::new();
    };
    root.children()
        .filter(|el| el.name() == "conference")
        .map(|el| Bookmark {
            jid: el.attr("jid").unwrap_or_default().to_string(),
            name: el.attr("name").unwrap_or_default().to_string(),
            autojoin: el.attr("autojoin") == Some("true"),
            nick: el.get_child("nick", el.ns().as_str()).map(|n| n.text()),
        })
        .collect()
}
