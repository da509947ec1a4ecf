//! Matrix client-server API transport over plain HTTP.
//!
//! Login (password or access token), a long-polling `/sync` loop, single
//! event fetches for thread walks, replies and typing notifications.

use crate::config::MatrixConfig;
use crate::error::{Result, TransportError};
use crate::messaging::{InboundStream, Transport};
use crate::{Event, EventContent, EventId};
use pulldown_cmark::{Event as MarkdownEvent, Options, Parser, html};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SYNC_TIMEOUT_MS: u64 = 30_000;
const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);
const TYPING_TIMEOUT_MS: u64 = 30_000;
const INBOUND_BUFFER: usize = 256;
const SESSION_FILE: &str = "session.json";

/// Event types handed to the responder. Everything else (state, reactions,
/// redactions, receipts) is dropped at the sync layer.
const DELIVERED_EVENT_TYPES: &[&str] = &["m.room.message", "m.room.encrypted", "m.sticker"];

/// Credentials of a logged-in device, cached in the store directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Session {
    user_id: String,
    access_token: String,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    user_id: String,
    access_token: String,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhoAmIResponse {
    user_id: String,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    event_id: String,
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: Rooms,
}

#[derive(Debug, Default, Deserialize)]
struct Rooms {
    #[serde(default)]
    join: HashMap<String, JoinedRoom>,
}

#[derive(Debug, Default, Deserialize)]
struct JoinedRoom {
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
struct Timeline {
    #[serde(default)]
    events: Vec<RawEvent>,
}

/// A room event as the homeserver serializes it.
#[derive(Debug, Clone, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    event_id: String,
    sender: String,
    #[serde(default)]
    origin_server_ts: i64,
    #[serde(default)]
    content: Value,
}

impl RawEvent {
    fn is_delivered(&self) -> bool {
        DELIVERED_EVENT_TYPES.contains(&self.event_type.as_str()) && !self.is_edit()
    }

    /// Edits arrive as new events carrying an `m.replace` relation.
    fn is_edit(&self) -> bool {
        self.content
            .pointer("/m.relates_to/rel_type")
            .and_then(Value::as_str)
            == Some("m.replace")
    }

    fn into_event(self, room_id: &str) -> Event {
        let in_reply_to = self
            .content
            .pointer("/m.relates_to/m.in_reply_to/event_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mentioned_user_ids = self
            .content
            .pointer("/m.mentions/user_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let msgtype = self.content.get("msgtype").and_then(Value::as_str);
        let body = self.content.get("body").and_then(Value::as_str);
        let content = match (self.event_type.as_str(), msgtype, body) {
            ("m.room.message", Some("m.text" | "m.notice"), Some(body)) => {
                let body = if in_reply_to.is_some() {
                    strip_reply_fallback(body)
                } else {
                    body
                };
                EventContent::Text(body.to_string())
            }
            ("m.room.message", Some(msgtype), _) => EventContent::NonText {
                kind: msgtype.to_string(),
            },
            (event_type, _, _) => EventContent::NonText {
                kind: event_type.to_string(),
            },
        };

        Event {
            id: self.event_id,
            room_id: room_id.to_string(),
            sender: self.sender,
            content,
            in_reply_to,
            mentioned_user_ids,
            timestamp: chrono::DateTime::from_timestamp_millis(self.origin_server_ts)
                .unwrap_or_else(chrono::Utc::now),
        }
    }
}

/// Remove the quoted `> ` block clients prepend to reply bodies.
fn strip_reply_fallback(body: &str) -> &str {
    if !body.starts_with('>') {
        return body;
    }
    let mut rest = body;
    while rest.starts_with('>') {
        match rest.split_once('\n') {
            Some((_, tail)) => rest = tail,
            None => return body,
        }
    }
    rest.strip_prefix('\n').unwrap_or(rest)
}

/// Minimal HTML escaping for `formatted_body`.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Render reply markdown to `formatted_body` HTML.
///
/// Raw HTML in the reply is escaped rather than passed through, and single
/// newlines stay line breaks as they read in the plain body.
fn render_markdown(text: &str) -> String {
    let events = Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES).map(
        |event| match event {
            MarkdownEvent::SoftBreak => MarkdownEvent::HardBreak,
            MarkdownEvent::Html(raw) | MarkdownEvent::InlineHtml(raw) => MarkdownEvent::Text(raw),
            other => other,
        },
    );
    let mut rendered = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut rendered, events);
    rendered.truncate(rendered.trim_end().len());
    rendered
}

fn message_content(text: &str, in_reply_to: Option<&str>) -> Value {
    let mut formatted = render_markdown(text);
    if formatted.is_empty() {
        formatted = escape_html(text).replace('\n', "<br>");
    }
    let mut content = json!({
        "msgtype": "m.text",
        "body": text,
        "format": "org.matrix.custom.html",
        "formatted_body": formatted,
    });
    if let Some(parent) = in_reply_to {
        content["m.relates_to"] = json!({ "m.in_reply_to": { "event_id": parent } });
    }
    content
}

fn request_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Request(error.to_string())
    }
}

/// Shared connection state, owned by the transport and the sync task.
struct Connection {
    http: reqwest::Client,
    homeserver: String,
    session: RwLock<Option<Session>>,
}

impl Connection {
    fn url(&self, path: &str) -> String {
        format!("{}/_matrix/client/v3{path}", self.homeserver)
    }

    fn access_token(&self) -> std::result::Result<String, TransportError> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.access_token.clone())
            .ok_or_else(|| TransportError::Login("not logged in".into()))
    }

    fn user_id(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.user_id.clone())
    }

    /// Send an authenticated request and decode a JSON success body.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<T, TransportError> {
        let response = request
            .bearer_auth(self.access_token()?)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: message.chars().take(300).collect(),
            });
        }
        response
            .json()
            .await
            .map_err(|error| TransportError::InvalidResponse(error.to_string()))
    }

    async fn sync(
        &self,
        since: Option<&str>,
        timeout_ms: u64,
    ) -> std::result::Result<SyncResponse, TransportError> {
        let timeout = timeout_ms.to_string();
        let mut query = vec![("timeout", timeout.as_str())];
        if let Some(since) = since {
            query.push(("since", since));
        }
        let request = self
            .http
            .get(self.url("/sync"))
            .query(&query)
            .timeout(Duration::from_millis(timeout_ms) + Duration::from_secs(30));
        self.call(request).await
    }
}

/// Matrix homeserver connection.
pub struct MatrixTransport {
    config: MatrixConfig,
    connection: Arc<Connection>,
    cancel: CancellationToken,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl MatrixTransport {
    pub fn new(config: MatrixConfig, request_timeout: Duration) -> Result<Self> {
        // `/sync` long-polls and overrides this per request.
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(request_error)?;
        let homeserver = config.homeserver_url.trim_end_matches('/').to_string();
        Ok(Self {
            config,
            connection: Arc::new(Connection {
                http,
                homeserver,
                session: RwLock::new(None),
            }),
            cancel: CancellationToken::new(),
            sync_task: Mutex::new(None),
        })
    }

    fn session_path(&self) -> PathBuf {
        self.config.store_path.join(SESSION_FILE)
    }

    fn set_session(&self, session: Session) {
        *self
            .connection
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Restore a cached session, fall back to the configured token, then to
    /// password login.
    async fn login(&self) -> std::result::Result<(), TransportError> {
        if let Some(session) = self.load_session().await {
            self.set_session(session);
            match self.whoami().await {
                Ok(identity) => {
                    tracing::info!(user_id = %identity.user_id, "restored matrix session");
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!(%error, "cached matrix session rejected, logging in again");
                }
            }
        }

        if let Some(token) = &self.config.access_token {
            self.set_session(Session {
                user_id: self.config.user_id.clone(),
                access_token: token.clone(),
                device_id: None,
            });
            let identity = self
                .whoami()
                .await
                .map_err(|error| TransportError::Login(format!("access token rejected: {error}")))?;
            self.set_session(Session {
                user_id: identity.user_id.clone(),
                access_token: token.clone(),
                device_id: identity.device_id,
            });
            tracing::info!(user_id = %identity.user_id, "logged in with access token");
            return Ok(());
        }

        let Some(password) = &self.config.password else {
            return Err(TransportError::Login(
                "neither a cached session, an access token nor a password is available".into(),
            ));
        };
        let response = self
            .connection
            .http
            .post(self.connection.url("/login"))
            .json(&json!({
                "type": "m.login.password",
                "identifier": { "type": "m.id.user", "user": self.config.user_id },
                "password": password,
                "initial_device_display_name": self.config.device_name,
            }))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Login(format!("homeserver returned {status}: {message}")));
        }
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|error| TransportError::InvalidResponse(error.to_string()))?;

        let session = Session {
            user_id: login.user_id,
            access_token: login.access_token,
            device_id: login.device_id,
        };
        tracing::info!(user_id = %session.user_id, device_id = ?session.device_id, "logged in with password");
        self.save_session(&session).await;
        self.set_session(session);
        Ok(())
    }

    async fn whoami(&self) -> std::result::Result<WhoAmIResponse, TransportError> {
        let request = self.connection.http.get(self.connection.url("/account/whoami"));
        self.connection.call(request).await
    }

    async fn load_session(&self) -> Option<Session> {
        let path = self.session_path();
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "ignoring unreadable session file");
                None
            }
        }
    }

    async fn save_session(&self, session: &Session) {
        let path = self.session_path();
        let write = async {
            tokio::fs::create_dir_all(&self.config.store_path).await?;
            let serialized = serde_json::to_vec_pretty(session).map_err(std::io::Error::other)?;
            tokio::fs::write(&path, serialized).await
        };
        if let Err(error) = write.await {
            tracing::warn!(path = %path.display(), %error, "failed to persist matrix session");
        }
    }
}

/// Long-poll `/sync` and forward deliverable events until cancelled.
async fn sync_loop(
    connection: Arc<Connection>,
    mut since: String,
    sender: mpsc::Sender<Event>,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connection.sync(Some(&since), SYNC_TIMEOUT_MS) => result,
        };

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "matrix sync failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(SYNC_RETRY_DELAY) => continue,
                }
            }
        };

        since = response.next_batch;
        for (room_id, room) in response.rooms.join {
            for raw in room.timeline.events {
                if !raw.is_delivered() {
                    continue;
                }
                if sender.send(raw.into_event(&room_id)).await.is_err() {
                    tracing::debug!("inbound receiver dropped, stopping sync");
                    return;
                }
            }
        }
    }
    tracing::info!("matrix sync stopped");
}

impl Transport for MatrixTransport {
    fn name(&self) -> &str {
        "matrix"
    }

    async fn start(&self) -> Result<InboundStream> {
        self.login().await?;

        // Only events after this point are delivered.
        let initial = self.connection.sync(None, 0).await?;
        tracing::info!(since = %initial.next_batch, "initial matrix sync complete, backlog skipped");

        let (sender, receiver) = mpsc::channel(INBOUND_BUFFER);
        let handle = tokio::spawn(sync_loop(
            Arc::clone(&self.connection),
            initial.next_batch,
            sender,
            self.cancel.clone(),
        ));
        *self.sync_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(receiver)))
    }

    async fn fetch_event(&self, room_id: &str, event_id: &str) -> std::result::Result<Event, TransportError> {
        let path = format!(
            "/rooms/{}/event/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(event_id)
        );
        let request = self.connection.http.get(self.connection.url(&path));
        match self.connection.call::<RawEvent>(request).await {
            Ok(raw) => Ok(raw.into_event(room_id)),
            Err(TransportError::Status { status: 404, .. }) => Err(TransportError::NotFound {
                event_id: event_id.to_string(),
            }),
            Err(error) => Err(error),
        }
    }

    async fn send(
        &self,
        room_id: &str,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> std::result::Result<EventId, TransportError> {
        let txn_id = uuid::Uuid::new_v4();
        let path = format!(
            "/rooms/{}/send/m.room.message/{txn_id}",
            urlencoding::encode(room_id)
        );
        let request = self
            .connection
            .http
            .put(self.connection.url(&path))
            .json(&message_content(text, in_reply_to));
        let response: SendResponse = self.connection.call(request).await?;
        Ok(response.event_id)
    }

    async fn set_typing(&self, room_id: &str, typing: bool) -> std::result::Result<(), TransportError> {
        let user_id = self
            .connection
            .user_id()
            .ok_or_else(|| TransportError::Login("not logged in".into()))?;
        let path = format!(
            "/rooms/{}/typing/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(&user_id)
        );
        let body = if typing {
            json!({ "typing": true, "timeout": TYPING_TIMEOUT_MS })
        } else {
            json!({ "typing": false })
        };
        let request = self.connection.http.put(self.connection.url(&path)).json(&body);
        self.connection.call::<Value>(request).await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let handle = self
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(error) = handle.await
        {
            tracing::warn!(%error, "matrix sync task ended abnormally");
        }
        Ok(())
    }
}
