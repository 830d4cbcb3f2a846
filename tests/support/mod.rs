//! A minimal in-process stand-in for ejabberd's HTTP admin API, used so the
//! sync engine's scenario tests exercise real HTTP round-trips without a
//! live ejabberd deployment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Shared, mutable view of "remote" state the fake server answers from.
#[derive(Default)]
pub struct FakeState {
    pub registered_users: Vec<String>,
    pub online_rooms: Vec<String>,
    pub room_affiliations: HashMap<String, Vec<serde_json::Value>>,
    pub user_bookmarks: HashMap<String, String>,
    pub rosters: HashMap<String, Vec<serde_json::Value>>,
}

pub struct FakeServer {
    pub base_url: String,
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake server");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(FakeState::default()));
        let server_state = state.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let state = server_state.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 65536];
                    let Ok(n) = socket.read(&mut buf).await else { return };
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let (request_line, rest) = request.split_once("\r\n").unwrap_or((&request, ""));
                    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
                    let body = rest.rsplit_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");

                    let response_body = handle(&state, path, body);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        response_body.len(),
                        response_body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }
}

fn handle(state: &Arc<Mutex<FakeState>>, path: &str, body: &str) -> String {
    let payload: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    let mut state = state.lock().expect("fake server state poisoned");

    match path {
        "/registered_users" => serde_json::to_string(&state.registered_users).unwrap(),
        "/register" => {
            if let Some(user) = payload.get("user").and_then(|v| v.as_str()) {
                state.registered_users.push(user.to_string());
            }
            "null".to_string()
        }
        "/unregister" => {
            if let Some(user) = payload.get("user").and_then(|v| v.as_str()) {
                state.registered_users.retain(|u| u != user);
            }
            "null".to_string()
        }
        "/change_password" => "null".to_string(),
        "/muc_online_rooms" => serde_json::to_string(&state.online_rooms).unwrap(),
        "/create_room_with_opts" | "/create_room" => {
            if let Some(name) = payload.get("name").and_then(|v| v.as_str()) {
                state.online_rooms.push(name.to_string());
            }
            "null".to_string()
        }
        "/destroy_room" => {
            if let Some(name) = payload.get("name").and_then(|v| v.as_str()) {
                state.online_rooms.retain(|r| r != name);
            }
            "null".to_string()
        }
        "/get_room_options" => "[]".to_string(),
        "/get_room_affiliations" => {
            let name = payload.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            serde_json::to_string(state.room_affiliations.get(name).cloned().unwrap_or_default().as_slice()).unwrap()
        }
        "/set_room_affiliation" => {
            let name = payload.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let jid = payload.get("jid").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let affiliation = payload.get("affiliation").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let entry = state.room_affiliations.entry(name).or_default();
            entry.retain(|r| r.get("jid").and_then(|v| v.as_str()) != Some(jid.as_str()));
            entry.push(serde_json::json!({ "jid": jid, "affiliation": affiliation }));
            "null".to_string()
        }
        "/get_roster" => {
            let user = payload.get("user").and_then(|v| v.as_str()).unwrap_or_default();
            serde_json::to_string(state.rosters.get(user).cloned().unwrap_or_default().as_slice()).unwrap()
        }
        "/add_rosteritem" => {
            let local_user = payload.get("localuser").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let local_host = payload.get("localserver").and_then(|v| v.as_str()).unwrap_or_default();
            let user = payload.get("user").and_then(|v| v.as_str()).unwrap_or_default();
            let jid = format!("{user}@{local_host}");
            let nick = payload.get("nick").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let group: Vec<String> = payload
                .get("group")
                .and_then(|v| v.as_str())
                .map(|s| s.split("; ").filter(|g| !g.is_empty()).map(ToString::to_string).collect())
                .unwrap_or_default();
            let subscription = payload.get("subs").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let entry = state.rosters.entry(local_user).or_default();
            entry.retain(|item| item.get("jid").and_then(|v| v.as_str()) != Some(jid.as_str()));
            entry.push(serde_json::json!({ "jid": jid, "nick": nick, "group": group, "subscription": subscription }));
            "null".to_string()
        }
        "/delete_rosteritem" => {
            let local_user = payload.get("localuser").and_then(|v| v.as_str()).unwrap_or_default();
            let local_host = payload.get("localserver").and_then(|v| v.as_str()).unwrap_or_default();
            let user = payload.get("user").and_then(|v| v.as_str()).unwrap_or_default();
            let jid = format!("{user}@{local_host}");
            if let Some(entry) = state.rosters.get_mut(local_user) {
                entry.retain(|item| item.get("jid").and_then(|v| v.as_str()) != Some(jid.as_str()));
            }
            "null".to_string()
        }
        "/get_user_bookmarks" => {
            let user = payload.get("user").and_then(|v| v.as_str()).unwrap_or_default();
            let xml = state.user_bookmarks.get(user).cloned().unwrap_or_default();
            serde_json::to_string(&xml).unwrap()
        }
        "/set_user_bookmarks" => {
            let user = payload.get("user").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let storage = payload.get("storage").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            state.user_bookmarks.insert(user, storage);
            "null".to_string()
        }
        _ => "null".to_string(),
    }
}
