use super::*;

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering::SeqCst},
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Multipart, Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde_json::json;
use storage::{Storage, TOKEN_KEY};
use tokio::{net::TcpListener, sync::mpsc};

#[derive(Clone, Default)]
struct Backend {
    channels: Arc<Mutex<Vec<String>>>,
    stored_messages: Arc<Mutex<Vec<Value>>>,
    channel_hits: Arc<AtomicUsize>,
    message_hits: Arc<AtomicUsize>,
    user_hits: Arc<AtomicUsize>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    uploads: Arc<Mutex<Vec<(String, String, usize)>>>,
    voice_only: Arc<Mutex<Vec<Value>>>,
    socket_texts: Arc<Mutex<Vec<String>>>,
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn ping() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn login(Json(body): Json<Value>) -> Json<Value> {
    let username = body["username"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();
    let code = body["twoFactorToken"].as_str();
    Json(match (username, password, code) {
        ("alice", "secret123", _) => json!({"success": true, "token": "abc"}),
        ("carol", "secret123", None) => {
            json!({"success": false, "requires2FA": true, "sessionId": "s-1"})
        }
        ("carol", "secret123", Some("123456")) => json!({"success": true, "token": "carol-token"}),
        _ => json!({"success": false, "error": "Invalid credentials"}),
    })
}

async fn verify_login(Json(body): Json<Value>) -> Json<Value> {
    if body["sessionId"] == "s-1" && body["twoFactorToken"] == "123456" {
        Json(json!({"success": true, "token": "carol-token"}))
    } else {
        Json(json!({"success": false, "error": "Invalid code"}))
    }
}

async fn register() -> Json<Value> {
    Json(json!({"success": true, "token": "fresh-token"}))
}

async fn list_channels(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    let auth = bearer(&headers);
    backend.auth_headers.lock().await.push(auth.clone());
    match auth.as_deref() {
        Some("Bearer expired") => {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Invalid token"})))
                .into_response()
        }
        Some("Bearer shape") => {
            return Json(json!({"general": {"name": "general"}})).into_response();
        }
        _ => {}
    }
    backend.channel_hits.fetch_add(1, SeqCst);
    let channels: Vec<Value> = backend
        .channels
        .lock()
        .await
        .iter()
        .map(|name| json!({"name": name, "memberCount": 1}))
        .collect();
    if auth.as_deref() == Some("Bearer slow") {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Json(json!({"success": true, "channels": channels})).into_response()
}

async fn create_channel(State(backend): State<Backend>, Json(body): Json<Value>) -> Json<Value> {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    if name == "taken" {
        return Json(json!({"success": false, "message": "Channel already exists"}));
    }
    backend.channels.lock().await.push(name);
    Json(json!({"success": true}))
}

async fn join_channel(Json(body): Json<Value>) -> Json<Value> {
    if body["channel"] == "locked" {
        return Json(json!({"success": false}));
    }
    Json(json!({"success": true}))
}

async fn search_channels(State(backend): State<Backend>, Json(body): Json<Value>) -> Json<Value> {
    let query = body["query"].as_str().unwrap_or_default().to_string();
    let found: Vec<Value> = backend
        .channels
        .lock()
        .await
        .iter()
        .filter(|name| name.contains(&query))
        .map(|name| json!({"name": name}))
        .collect();
    Json(json!({"channels": found}))
}

async fn list_messages(
    State(backend): State<Backend>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    backend.message_hits.fetch_add(1, SeqCst);
    let channel = params.get("channel").cloned().unwrap_or_default();
    let messages: Vec<Value> = match channel.as_str() {
        "busy" => (1..=50)
            .map(|id| json!({"id": id, "from": "bob", "text": format!("message {id}")}))
            .collect(),
        "empty" => Vec::new(),
        _ => {
            let mut history = vec![json!({"id": 1, "from": "bob", "text": "welcome"})];
            history.extend(
                backend
                    .stored_messages
                    .lock()
                    .await
                    .iter()
                    .filter(|message| message["channel"] == channel.as_str())
                    .cloned(),
            );
            history
        }
    };
    Json(json!({"messages": messages}))
}

async fn post_message(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let text = body["text"].as_str().unwrap_or_default().to_string();
    if text == "refused" {
        return Json(json!({"success": false})).into_response();
    }
    if text == "fail" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "boom"})),
        )
            .into_response();
    }

    let mut stored = backend.stored_messages.lock().await;
    let stored_message = json!({
        "id": 100 + stored.len(),
        "from": "alice",
        "text": text,
        "channel": body["channel"],
        "clientId": body["clientId"],
    });
    stored.push(stored_message.clone());
    if text == "quiet" {
        return Json(json!({"success": true})).into_response();
    }
    Json(json!({"success": true, "message": stored_message})).into_response()
}

async fn voice_ticket() -> Json<Value> {
    Json(json!({"success": true, "voiceId": "v-1"}))
}

async fn record_upload(backend: &Backend, target: String, mut multipart: Multipart) {
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let size = field.bytes().await.map(|bytes| bytes.len()).unwrap_or_default();
        backend.uploads.lock().await.push((target.clone(), name, size));
    }
}

async fn upload_voice(
    State(backend): State<Backend>,
    Path(voice_id): Path<String>,
    multipart: Multipart,
) -> Json<Value> {
    record_upload(&backend, voice_id, multipart).await;
    Json(json!({"success": true}))
}

async fn upload_avatar(State(backend): State<Backend>, multipart: Multipart) -> Json<Value> {
    record_upload(&backend, "avatar".to_string(), multipart).await;
    Json(json!({"success": true, "avatar": "/avatars/alice.png"}))
}

async fn voice_only(State(backend): State<Backend>, Json(body): Json<Value>) -> Json<Value> {
    backend.voice_only.lock().await.push(body);
    Json(json!({"success": true}))
}

async fn user_info(State(backend): State<Backend>, Path(username): Path<String>) -> Json<Value> {
    backend.user_hits.fetch_add(1, SeqCst);
    Json(json!({"user": {"username": username, "twoFactorEnabled": false}}))
}

async fn two_factor_status() -> Json<Value> {
    Json(json!({"enabled": true}))
}

async fn socket(State(backend): State<Backend>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let push = json!({
            "type": "message",
            "action": "new",
            "channel": "general",
            "from": "bob",
            "text": "hi",
        });
        let _ = socket.send(WsMessage::Text(push.to_string())).await;
        while let Some(Ok(msg)) = socket.recv().await {
            if let WsMessage::Text(text) = msg {
                backend.socket_texts.lock().await.push(text);
            }
        }
    })
}

async fn spawn_backend() -> (String, Backend) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let backend = Backend::default();
    let app = Router::new()
        .route("/api/ping", get(ping))
        .route("/api/login", post(login))
        .route("/api/2fa/verify-login", post(verify_login))
        .route("/api/2fa/status", get(two_factor_status))
        .route("/api/register", post(register))
        .route("/api/channels", get(list_channels))
        .route("/api/channels/create", post(create_channel))
        .route("/api/channels/join", post(join_channel))
        .route("/api/channels/search", post(search_channels))
        .route("/api/messages", get(list_messages))
        .route("/api/message", post(post_message))
        .route("/api/message/voice-only", post(voice_only))
        .route("/api/voice/upload", post(voice_ticket))
        .route("/api/upload/voice/:voice_id", post(upload_voice))
        .route("/api/upload/avatar", post(upload_avatar))
        .route("/api/user/:username", get(user_info))
        .route("/ws", get(socket))
        .with_state(backend.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), backend)
}

fn test_settings() -> ClientSettings {
    ClientSettings {
        request_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_millis(50),
        ..ClientSettings::default()
    }
}

fn client_with_store(base: &str, store: Arc<dyn SessionStore>) -> ChatClient {
    ChatClient::new_with_dependencies(base, test_settings(), store, Arc::new(TungsteniteConnector))
        .expect("client")
}

fn anonymous_client(base: &str) -> ChatClient {
    client_with_store(base, Arc::new(MemorySessionStore::new()))
}

fn client_with_token(base: &str, token: &str) -> (ChatClient, Arc<MemorySessionStore>) {
    let session = Session::new(base, token, "alice");
    let store = Arc::new(MemorySessionStore::with_session(session.clone()));
    let client = ChatClient::from_session(
        session,
        test_settings(),
        store.clone(),
        Arc::new(TungsteniteConnector),
    )
    .expect("client");
    (client, store)
}

async fn logged_in(base: &str) -> ChatClient {
    let client = anonymous_client(base);
    let outcome = client.login("alice", "secret123", None).await.expect("login");
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
    client
}

#[tokio::test]
async fn login_persists_session_and_authorizes_later_requests() {
    let (base, backend) = spawn_backend().await;
    let storage = Storage::new("sqlite::memory:").await.expect("storage");
    let client = client_with_store(&base, Arc::new(storage.clone()));
    let mut events = client.subscribe_events();

    match client.login("alice", "secret123", None).await.expect("login") {
        LoginOutcome::Authenticated(session) => {
            assert_eq!(session.username, "alice");
            assert_eq!(session.token, "abc");
            assert_eq!(session.server_url, base);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(client.token().await.as_deref(), Some("abc"));
    assert!(matches!(
        events.try_recv(),
        Ok(ClientEvent::SessionStarted { username }) if username == "alice"
    ));

    let persisted = storage.load_session().await.expect("load").expect("saved");
    assert_eq!(persisted.token, "abc");

    client.get_channels(false).await.expect("channels");
    assert_eq!(
        backend.auth_headers.lock().await.as_slice(),
        &[Some("Bearer abc".to_string())]
    );
}

#[tokio::test]
async fn logout_twice_leaves_no_stored_token() {
    let (base, _backend) = spawn_backend().await;
    let storage = Storage::new("sqlite::memory:").await.expect("storage");
    let client = client_with_store(&base, Arc::new(storage.clone()));
    client.login("alice", "secret123", None).await.expect("login");

    client.logout().await.expect("first logout");
    client.logout().await.expect("second logout");

    assert!(client.session().await.is_none());
    assert!(storage.load_session().await.expect("load").is_none());
    assert_eq!(storage.get_setting(TOKEN_KEY).await.expect("setting"), None);
}

#[tokio::test]
async fn rejected_login_carries_server_message() {
    let (base, _backend) = spawn_backend().await;
    let client = anonymous_client(&base);

    let outcome = client.login("alice", "wrong", None).await.expect("login");
    assert_eq!(
        outcome,
        LoginOutcome::Rejected {
            message: "Invalid credentials".to_string()
        }
    );
    assert!(client.session().await.is_none());
}

#[tokio::test]
async fn second_factor_login_completes_with_verification() {
    let (base, _backend) = spawn_backend().await;
    let client = anonymous_client(&base);

    let outcome = client.login("carol", "secret123", Some("  ")).await.expect("login");
    assert_eq!(
        outcome,
        LoginOutcome::SecondFactorRequired {
            session_id: Some("s-1".to_string())
        }
    );
    assert!(client.session().await.is_none());

    let wrong = client
        .verify_2fa_login("carol", "s-1", "000000")
        .await
        .expect("verify");
    assert!(matches!(wrong, LoginOutcome::Rejected { .. }));

    let verified = client
        .verify_2fa_login("carol", "s-1", " 123456 ")
        .await
        .expect("verify");
    assert!(matches!(verified, LoginOutcome::Authenticated(_)));
    assert_eq!(client.token().await.as_deref(), Some("carol-token"));

    let direct = anonymous_client(&base)
        .login("carol", "secret123", Some("123456"))
        .await
        .expect("login with code");
    assert!(matches!(direct, LoginOutcome::Authenticated(_)));
}

#[tokio::test]
async fn registration_starts_a_session() {
    let (base, _backend) = spawn_backend().await;
    let client = anonymous_client(&base);
    let outcome = client.register("dave", "hunter22").await.expect("register");
    assert!(matches!(outcome, LoginOutcome::Authenticated(session) if session.username == "dave"));
    assert_eq!(client.token().await.as_deref(), Some("fresh-token"));
}

#[tokio::test]
async fn channels_are_served_from_cache_within_ttl() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;

    client.get_channels(false).await.expect("first");
    client.get_channels(false).await.expect("second");
    assert_eq!(backend.channel_hits.load(SeqCst), 1);

    client.get_channels(true).await.expect("forced");
    assert_eq!(backend.channel_hits.load(SeqCst), 2);
}

#[tokio::test]
async fn stale_cache_entries_are_refetched() {
    let (base, backend) = spawn_backend().await;
    let settings = ClientSettings {
        cache_ttl: Duration::from_millis(50),
        ..test_settings()
    };
    let client = ChatClient::new_with_dependencies(
        &base,
        settings,
        Arc::new(MemorySessionStore::new()),
        Arc::new(TungsteniteConnector),
    )
    .expect("client");

    client.get_channels(false).await.expect("first");
    tokio::time::sleep(Duration::from_millis(120)).await;
    client.get_channels(false).await.expect("second");
    assert_eq!(backend.channel_hits.load(SeqCst), 2);
}

#[tokio::test]
async fn created_channel_shows_up_in_next_listing() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;

    assert!(client.get_channels(false).await.expect("initial").is_empty());
    let ack = client.create_channel("  general ").await.expect("create");
    assert_eq!(ack.success, Some(true));

    let channels = client.get_channels(false).await.expect("after create");
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "general");
    assert_eq!(channels[0].member_count, 1);
    assert_eq!(backend.channel_hits.load(SeqCst), 2);

    let found = client.search_channels("gen").await.expect("search");
    assert_eq!(found.len(), 1);
    client.join_channel("general").await.expect("join");
    client.get_channels(false).await.expect("after join");
    assert_eq!(backend.channel_hits.load(SeqCst), 3);
}

#[tokio::test]
async fn listing_started_before_a_create_is_not_cached() {
    let (base, backend) = spawn_backend().await;
    let (client, _store) = client_with_token(&base, "slow");

    let (listed, created) = tokio::join!(client.get_channels(false), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.create_channel("general").await
    });
    assert!(listed.expect("slow listing").is_empty());
    created.expect("create");

    let channels = client.get_channels(false).await.expect("after create");
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "general");
    assert_eq!(backend.channel_hits.load(SeqCst), 2);
}

#[tokio::test]
async fn success_false_bodies_fail_the_write() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;

    match client.create_channel("taken").await {
        Err(ClientError::Rejected(message)) => assert_eq!(message, "Channel already exists"),
        other => panic!("expected rejection, got {other:?}"),
    }
    match client.join_channel("locked").await {
        Err(ClientError::Rejected(message)) => assert_eq!(message, "request failed"),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(backend.channels.lock().await.is_empty());
}

#[tokio::test]
async fn sending_drops_every_cached_page_of_that_channel() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;

    client.get_messages("general", 50, false).await.expect("general 50");
    client.get_messages("general", 100, false).await.expect("general 100");
    client.get_messages("random", 50, false).await.expect("random 50");
    assert_eq!(backend.message_hits.load(SeqCst), 3);

    client
        .send_message(OutgoingMessage::text("general", "hello"))
        .await
        .expect("send");

    client.get_messages("general", 50, false).await.expect("general 50");
    client.get_messages("general", 100, false).await.expect("general 100");
    assert_eq!(backend.message_hits.load(SeqCst), 5);
    client.get_messages("random", 50, false).await.expect("random 50");
    assert_eq!(backend.message_hits.load(SeqCst), 5);
}

#[tokio::test]
async fn message_pages_decode_full_and_empty() {
    let (base, _backend) = spawn_backend().await;
    let client = logged_in(&base).await;

    let busy = client.get_messages("busy", 50, false).await.expect("busy");
    assert_eq!(busy.len(), 50);
    assert_eq!(busy[49].text, "message 50");

    let empty = client.get_messages("empty", 50, false).await.expect("empty");
    assert!(empty.is_empty());
}

#[tokio::test]
async fn empty_inputs_are_rejected_locally() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;

    assert!(matches!(
        client.create_channel("   ").await,
        Err(ClientError::InvalidInput(_))
    ));
    assert!(matches!(
        client.send_message(OutgoingMessage::text("general", " \n ")).await,
        Err(ClientError::InvalidInput(_))
    ));
    assert!(backend.channels.lock().await.is_empty());
    assert!(backend.stored_messages.lock().await.is_empty());
}

#[tokio::test]
async fn slow_responses_time_out_distinctly_from_http_errors() {
    let (base, _backend) = spawn_backend().await;
    let session = Session::new(&base, "slow", "alice");
    let settings = ClientSettings {
        request_timeout: Duration::from_millis(100),
        ..test_settings()
    };
    let client = ChatClient::from_session(
        session,
        settings,
        Arc::new(MemorySessionStore::new()),
        Arc::new(TungsteniteConnector),
    )
    .expect("client");

    let err = client.get_channels(true).await.err().expect("must time out");
    assert!(err.is_timeout(), "unexpected error: {err}");
    assert_eq!(err.status(), None);

    let (expired, _store) = client_with_token(&base, "expired");
    let err = expired.get_channels(true).await.err().expect("must fail");
    assert!(!err.is_timeout());
    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("Invalid token"));
}

#[tokio::test]
async fn keyed_object_instead_of_list_is_a_shape_error() {
    let (base, _backend) = spawn_backend().await;
    let (client, _store) = client_with_token(&base, "shape");
    let err = client.get_channels(true).await.err().expect("must fail");
    assert!(matches!(err, ClientError::UnexpectedShape { .. }), "{err}");
}

#[tokio::test]
async fn validate_session_clears_rejected_token() {
    let (base, _backend) = spawn_backend().await;

    let (valid, valid_store) = client_with_token(&base, "abc");
    assert!(valid.validate_session().await.expect("validate"));
    assert!(valid_store.load_session().await.expect("load").is_some());

    let (expired, expired_store) = client_with_token(&base, "expired");
    assert!(!expired.validate_session().await.expect("validate"));
    assert!(expired.session().await.is_none());
    assert!(expired_store.load_session().await.expect("load").is_none());

    assert!(!anonymous_client(&base).validate_session().await.expect("validate"));
}

#[tokio::test]
async fn restore_uses_the_persisted_session() {
    let (base, _backend) = spawn_backend().await;
    let connector: Arc<dyn SocketConnector> = Arc::new(TungsteniteConnector);

    let empty = ChatClient::restore(
        test_settings(),
        Arc::new(MemorySessionStore::new()),
        Arc::clone(&connector),
    )
    .await
    .expect("restore");
    assert!(empty.is_none());

    let store = Arc::new(MemorySessionStore::with_session(Session::new(
        format!("{base}/"),
        "abc",
        "alice",
    )));
    let client = ChatClient::restore(test_settings(), store, connector)
        .await
        .expect("restore")
        .expect("client");
    assert_eq!(client.base_url(), base);
    assert_eq!(client.token().await.as_deref(), Some("abc"));
}

#[tokio::test]
async fn account_operations_require_a_session() {
    let (base, _backend) = spawn_backend().await;
    let client = anonymous_client(&base);

    assert!(matches!(
        client.get_2fa_status().await,
        Err(ClientError::NotAuthenticated)
    ));
    assert!(matches!(
        client.setup_2fa().await,
        Err(ClientError::NotAuthenticated)
    ));
    assert!(matches!(
        client
            .upload_avatar(FileUpload::new("me.png", vec![1, 2, 3]))
            .await,
        Err(ClientError::NotAuthenticated)
    ));
    assert!(matches!(
        client.register_push_token("device", "android").await,
        Err(ClientError::NotAuthenticated)
    ));

    let client = logged_in(&base).await;
    assert!(client.get_2fa_status().await.expect("status"));
}

#[tokio::test]
async fn recorded_voice_goes_through_ticket_upload_and_post() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;

    let audio = FileUpload::new("clip.webm", vec![7; 64]).with_mime_type("audio/webm");
    let ack = client
        .send_recorded_voice("general", audio, 3)
        .await
        .expect("voice");
    assert_eq!(ack.success, Some(true));

    assert_eq!(
        backend.uploads.lock().await.as_slice(),
        &[("v-1".to_string(), "voice".to_string(), 64)]
    );
    assert_eq!(
        backend.voice_only.lock().await.as_slice(),
        &[json!({"channel": "general", "voiceMessage": "v-1"})]
    );
}

#[tokio::test]
async fn avatar_upload_refreshes_cached_profile() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;

    let user = client.get_user_info("alice", false).await.expect("user");
    assert_eq!(user.username, "alice");
    assert_eq!(user.two_factor_enabled, Some(false));
    client.get_user_info("alice", false).await.expect("cached user");
    assert_eq!(backend.user_hits.load(SeqCst), 1);
    client.get_user_info("alice", true).await.expect("forced user");
    assert_eq!(backend.user_hits.load(SeqCst), 2);

    let ack = client
        .upload_avatar(FileUpload::new("me.png", vec![1, 2, 3]).with_mime_type("image/png"))
        .await
        .expect("avatar");
    assert_eq!(ack.extra.get("avatar"), Some(&json!("/avatars/alice.png")));
    assert_eq!(
        backend.uploads.lock().await.as_slice(),
        &[("avatar".to_string(), "avatar".to_string(), 3)]
    );

    client.get_user_info("alice", false).await.expect("refetched user");
    assert_eq!(backend.user_hits.load(SeqCst), 3);
}

#[tokio::test]
async fn server_status_reports_online_and_offline() {
    let (base, _backend) = spawn_backend().await;
    assert!(matches!(
        check_server_status(&base, &test_settings()).await,
        ServerStatus::Online { .. }
    ));
    assert!(matches!(
        anonymous_client(&base).check_server_status().await,
        ServerStatus::Online { .. }
    ));

    let unused = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = unused.local_addr().expect("addr");
    drop(unused);
    assert_eq!(
        check_server_status(&format!("http://{addr}"), &test_settings()).await,
        ServerStatus::Offline
    );
    assert_eq!(
        check_server_status("not a url", &test_settings()).await,
        ServerStatus::Offline
    );
}

#[test]
fn vapid_keys_decode_with_or_without_padding() {
    assert_eq!(decode_vapid_key("AQID").expect("unpadded"), vec![1, 2, 3]);
    assert_eq!(decode_vapid_key(" AQI= ").expect("padded"), vec![1, 2]);
    assert!(matches!(
        decode_vapid_key("!!not base64!!"),
        Err(ClientError::InvalidInput(_))
    ));
}

#[test]
fn success_false_with_error_text_is_a_rejection() {
    let rejected: Ack = serde_json::from_value(json!({"success": false, "error": "Channel exists"}))
        .expect("ack");
    assert!(matches!(ensure_ack(rejected), Err(ClientError::Rejected(message)) if message == "Channel exists"));

    let bare: Ack = serde_json::from_value(json!({})).expect("ack");
    assert!(ensure_ack(bare).is_ok());
}

#[test]
fn default_connector_has_no_native_socket() {
    let client = ChatClient::new("http://127.0.0.1:9").expect("client");
    assert!(!client.capabilities().supports_native_socket);
    assert!(matches!(
        ChatClient::new("ftp://example.com"),
        Err(ClientError::InvalidUrl { .. })
    ));
}

#[tokio::test]
async fn live_push_reaches_timeline_and_drops_stale_pages() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;
    let mut events = client.subscribe_events();

    let mut timeline = ChannelTimeline::new("general");
    timeline.replace_history(client.get_messages("general", 50, false).await.expect("history"));
    assert_eq!(backend.message_hits.load(SeqCst), 1);

    let channel = client.realtime_channel().await.expect("channel");
    let (tx, mut rx) = mpsc::unbounded_channel();
    channel
        .add_handler(move |event: &RealtimeEvent| -> anyhow::Result<()> {
            let _ = tx.send(event.clone());
            Ok(())
        })
        .await;
    channel.start().await.expect("start");

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("push in time")
        .expect("handler alive");
    assert!(timeline.apply_event(&event));
    assert_eq!(timeline.messages().last().map(|m| m.text.as_str()), Some("hi"));

    let rebroadcast = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("event");
    assert!(matches!(rebroadcast, ClientEvent::Realtime(RealtimeEvent::NewMessage { .. })));

    client.get_messages("general", 50, false).await.expect("refetch");
    assert_eq!(backend.message_hits.load(SeqCst), 2);

    channel.close().await;
}

#[tokio::test]
async fn single_connect_authenticates_with_a_frame() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;

    let mut link = client.create_websocket_channel().await.expect("socket");
    let first = tokio::time::timeout(Duration::from_secs(5), link.stream.next())
        .await
        .expect("frame in time")
        .expect("stream open")
        .expect("frame");
    match first {
        SocketFrame::Text(text) => assert!(text.contains("\"hi\"")),
        other => panic!("unexpected frame: {other:?}"),
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while backend.socket_texts.lock().await.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "auth frame never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let auth: Value =
        serde_json::from_str(&backend.socket_texts.lock().await[0]).expect("auth json");
    assert_eq!(auth, json!({"type": "auth", "token": "abc"}));
}

#[tokio::test]
async fn send_through_confirms_with_echo() {
    let (base, _backend) = spawn_backend().await;
    let client = logged_in(&base).await;
    let mut timeline = ChannelTimeline::new("general");

    let client_id = send_through(&client, &mut timeline, "alice", "  hello  ", None)
        .await
        .expect("sent");
    assert!(timeline.pending().is_empty());
    let last = timeline.messages().last().expect("echo");
    assert_eq!(last.text, "hello");
    assert_eq!(last.client_id.as_ref(), Some(&client_id));
}

#[tokio::test]
async fn send_through_without_echo_reloads_history() {
    let (base, backend) = spawn_backend().await;
    let client = logged_in(&base).await;
    let mut timeline = ChannelTimeline::new("general");

    send_through(&client, &mut timeline, "alice", "quiet", None)
        .await
        .expect("sent");
    assert_eq!(backend.message_hits.load(SeqCst), 1);
    assert!(timeline.pending().is_empty());
    let texts: Vec<&str> = timeline.messages().iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["welcome", "quiet"]);
}

#[tokio::test]
async fn failed_send_hands_back_the_draft() {
    let (base, _backend) = spawn_backend().await;
    let client = logged_in(&base).await;
    let mut timeline = ChannelTimeline::new("general");

    let failure = send_through(&client, &mut timeline, "alice", "fail", None)
        .await
        .err()
        .expect("must fail");
    assert_eq!(failure.text, "fail");
    assert_eq!(failure.error.status(), Some(500));
    assert!(failure.error.to_string().contains("boom"));
    assert!(timeline.is_empty());
}

#[tokio::test]
async fn refused_send_hands_back_the_draft() {
    let (base, _backend) = spawn_backend().await;
    let client = logged_in(&base).await;
    let mut timeline = ChannelTimeline::new("general");

    let failure = send_through(&client, &mut timeline, "alice", "refused", None)
        .await
        .err()
        .expect("must fail");
    assert_eq!(failure.text, "refused");
    assert!(matches!(failure.error, ClientError::Rejected(_)));
    assert!(timeline.pending().is_empty());
    assert!(timeline.is_empty());
}
