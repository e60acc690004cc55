use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path as AxumPath, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use warelay_core::{
    phone, Config, Error, MessageContent, MessageType, Paths, StandardMessage,
};
use warelay_notify::ChangeNotifier;
use warelay_provider::{status as provider_status, InfobipGateway, WhatsAppApi};
use warelay_routing::RoutingEngine;
use warelay_storage::{AgentKind, DirectoryStore, MediaStore, MessageStore};

#[derive(Clone)]
struct GatewayState {
    engine: Arc<RoutingEngine>,
    notifier: ChangeNotifier,
    config: Config,
}

fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    user: Option<String>,
    pass: Option<String>,
}

/// Callback basic auth carried in the query string, as configured on the
/// provider side. Credentials left empty in config means open callbacks.
fn callback_auth_ok(config: &Config, query: &CallbackQuery) -> bool {
    let expected_user = &config.provider.callback_user;
    if expected_user.is_empty() {
        return true;
    }

    let user_ok = query
        .user
        .as_deref()
        .map(|u| secure_eq(u, expected_user))
        .unwrap_or(false);

    let pass = query.pass.as_deref().unwrap_or("");
    let pass_ok = if !config.provider.callback_pass_hash.is_empty() {
        let digest = format!("{:x}", Sha256::digest(pass.as_bytes()));
        secure_eq(&digest, &config.provider.callback_pass_hash)
    } else {
        secure_eq(pass, &config.provider.callback_pass)
    };

    user_ok && pass_ok
}

fn error_response(e: Error) -> Response {
    let status = match &e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::LimitReached(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

// ---------------------------------------------------------------------------
// Provider callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StatusReport {
    #[serde(default)]
    results: Vec<StatusResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResult {
    message_id: String,
    status: StatusInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusInfo {
    group_name: String,
    name: String,
}

/// POST /api/waapi/callbacks/message_status_update
///
/// Processing failures still answer 200 so the provider does not keep
/// retrying a report we cannot use.
async fn handle_status_update(
    State(state): State<GatewayState>,
    Query(query): Query<CallbackQuery>,
    Json(report): Json<StatusReport>,
) -> Response {
    if !callback_auth_ok(&state.config, &query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    for result in report.results {
        match provider_status::normalize(&result.status.group_name, &result.status.name) {
            Some(status) => {
                if let Err(e) = state.engine.handle_status(&result.message_id, status).await {
                    error!(error = %e, sid = %result.message_id, "Status update failed");
                }
            }
            None => {
                warn!(
                    group = %result.status.group_name,
                    name = %result.status.name,
                    "Unknown provider status, dropped"
                );
            }
        }
    }

    Json(json!({ "ok": true })).into_response()
}

#[derive(Debug, Deserialize)]
struct InboundReport {
    #[serde(default)]
    results: Vec<InboundResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundResult {
    message_id: String,
    from: String,
    message: InboundPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundPayload {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    url: Option<String>,
    caption: Option<String>,
    longitude: Option<f64>,
    latitude: Option<f64>,
    name: Option<String>,
    address: Option<String>,
}

fn parse_inbound(result: InboundResult) -> Option<StandardMessage> {
    let msg_type = MessageType::from_str(&result.message.kind)?;

    let content = match msg_type {
        MessageType::Text => MessageContent::text(result.message.text.unwrap_or_default()),
        MessageType::Location => MessageContent::Location {
            longitude: result.message.longitude?,
            latitude: result.message.latitude?,
            name: result.message.name,
            address: result.message.address,
        },
        // Contact cards cannot be rendered; keep a placeholder body.
        MessageType::Contact => MessageContent::text("Contact card"),
        _ => MessageContent::media(result.message.url?, result.message.caption),
    };

    Some(StandardMessage {
        message_id: Some(result.message_id),
        msg_type,
        content,
        from_number: Some(result.from),
        to_number: None,
        status: None,
    })
}

/// POST /api/waapi/callbacks/message_receive
async fn handle_message_receive(
    State(state): State<GatewayState>,
    Query(query): Query<CallbackQuery>,
    Json(report): Json<InboundReport>,
) -> Response {
    if !callback_auth_ok(&state.config, &query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    for result in report.results {
        let sid = result.message_id.clone();
        let Some(msg) = parse_inbound(result) else {
            warn!(sid = %sid, "Unparseable inbound message, dropped");
            continue;
        };
        if let Err(e) = state.engine.handle_inbound(msg).await {
            error!(error = %e, sid = %sid, "Inbound handling failed");
        }
    }

    Json(json!({ "ok": true })).into_response()
}

/// GET|POST /api/waapi/callbacks/fake_200_callback
///
/// Sink for status reports we deliberately do not track (canned notices).
/// Auth is still enforced; the body is discarded unread.
async fn handle_fake_200(
    State(state): State<GatewayState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if !callback_auth_ok(&state.config, &query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    "OK".into_response()
}

// ---------------------------------------------------------------------------
// Console API
// ---------------------------------------------------------------------------

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn handle_customers_list(State(state): State<GatewayState>) -> Response {
    match state.engine.store().list_customers() {
        Ok(customers) => Json(customers).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_customer_messages(
    State(state): State<GatewayState>,
    AxumPath(number): AxumPath<String>,
) -> Response {
    match state.engine.store().messages_for_number(&number) {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_customer_read(
    State(state): State<GatewayState>,
    AxumPath(number): AxumPath<String>,
) -> Response {
    match state.engine.mark_read(&number) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendBody {
    #[serde(rename = "type")]
    msg_type: Option<String>,
    text: Option<String>,
    media_url: Option<String>,
    caption: Option<String>,
}

async fn handle_customer_send(
    State(state): State<GatewayState>,
    AxumPath(number): AxumPath<String>,
    Json(body): Json<SendBody>,
) -> Response {
    let (msg_type, content) = match (&body.media_url, &body.text) {
        (Some(url), _) => {
            let msg_type = body
                .msg_type
                .as_deref()
                .and_then(MessageType::from_str)
                .unwrap_or_else(|| {
                    url.rsplit_once('.')
                        .map(|(_, ext)| MessageType::from_extension(ext))
                        .unwrap_or(MessageType::Document)
                });

            // Types without caption support get the text as a preceding
            // standalone message instead.
            let caption = body.caption.or(body.text.clone());
            if let Some(text) = caption.as_ref().filter(|_| !msg_type.supports_caption()) {
                if let Err(e) = state
                    .engine
                    .send_to_number(&number, MessageType::Text, MessageContent::text(text.clone()))
                    .await
                {
                    return error_response(e);
                }
            }
            let caption = caption.filter(|_| msg_type.supports_caption());
            (msg_type, MessageContent::media(url.clone(), caption))
        }
        (None, Some(text)) => (MessageType::Text, MessageContent::text(text.clone())),
        (None, None) => {
            return error_response(Error::Validation(
                "Request needs either text or mediaUrl".into(),
            ))
        }
    };

    match state.engine.send_to_number(&number, msg_type, content).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisplayNameBody {
    display_name: String,
}

async fn handle_customer_rename(
    State(state): State<GatewayState>,
    AxumPath(customer_id): AxumPath<String>,
    Json(body): Json<DisplayNameBody>,
) -> Response {
    match state
        .engine
        .store()
        .rename_customer(&customer_id, &body.display_name)
    {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_agents_list(State(state): State<GatewayState>) -> Response {
    match state.engine.directory().list_agents() {
        Ok(agents) => Json(agents).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentBody {
    name: String,
    phone_number: Option<String>,
}

async fn handle_agents_create(
    State(state): State<GatewayState>,
    Json(body): Json<AgentBody>,
) -> Response {
    if let Some(number) = body.phone_number.as_deref() {
        if !phone::validate_e164(number) {
            return error_response(Error::Validation(format!(
                "{} is not an E.164 phone number",
                number
            )));
        }
    }
    let kind = if body.phone_number.is_some() {
        AgentKind::Phone
    } else {
        AgentKind::WebUser
    };
    match state
        .engine
        .directory()
        .add_agent(&body.name, kind, body.phone_number.as_deref())
    {
        Ok(agent) => Json(agent).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_agents_delete(
    State(state): State<GatewayState>,
    AxumPath(id): AxumPath<i64>,
) -> Response {
    match state.engine.directory().remove_agent(id) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_rules_list(State(state): State<GatewayState>) -> Response {
    match state.engine.directory().list_rules() {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleBody {
    client_number: String,
    agent_id: i64,
}

async fn handle_rules_create(
    State(state): State<GatewayState>,
    Json(body): Json<RuleBody>,
) -> Response {
    if !phone::validate_e164(&body.client_number) {
        return error_response(Error::Validation(format!(
            "{} is not an E.164 phone number",
            body.client_number
        )));
    }
    match state
        .engine
        .resolver()
        .create_rule(&body.client_number, body.agent_id)
    {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_rules_delete(
    State(state): State<GatewayState>,
    Json(body): Json<RuleBody>,
) -> Response {
    match state
        .engine
        .resolver()
        .delete_rule(&body.client_number, body.agent_id)
    {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_announcements(State(state): State<GatewayState>) -> Response {
    match state.engine.store().active_announcements() {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_unread(State(state): State<GatewayState>) -> Response {
    match state.engine.store().total_unread() {
        Ok(total) => Json(json!({ "unreadMsgs": total })).into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// WebSockets
// ---------------------------------------------------------------------------

async fn handle_live_ws(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| forward_broadcast(socket, state.notifier.subscribe_live(), None))
}

/// Fleet sessions get the current unread total as their first frame.
async fn handle_fleet_ws(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    let initial = state
        .engine
        .store()
        .total_unread()
        .ok()
        .map(|total| json!({ "type": "unread_msgs_update", "unread_msgs": total }).to_string());
    ws.on_upgrade(move |socket| {
        forward_broadcast(socket, state.notifier.subscribe_fleet(), initial)
    })
}

async fn forward_broadcast(
    socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<String>,
    initial: Option<String>,
) {
    use futures::{SinkExt, StreamExt};

    info!("WebSocket client connected");
    let (mut sender, mut receiver) = socket.split();

    if let Some(frame) = initial {
        if sender.send(WsMessage::Text(frame)).await.is_err() {
            return;
        }
    }

    let send_task = tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            if sender.send(WsMessage::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Drain the client side until it closes; events only flow outward.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(WsMessage::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    info!("WebSocket client disconnected");
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;

    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);

    let store = MessageStore::open(&paths.messages_db())?;
    let directory = DirectoryStore::open(&paths.directory_db())?;
    let media = MediaStore::new(&paths.media_dir())?;
    let api: Arc<dyn WhatsAppApi> = Arc::new(InfobipGateway::new(config.clone()));
    let notifier = ChangeNotifier::new();

    let engine = Arc::new(RoutingEngine::new(
        store,
        directory,
        media,
        api,
        notifier.clone(),
        &config,
    ));

    if config.provider.callback_user.is_empty() {
        warn!("Callback credentials not configured; provider callbacks are unauthenticated");
    }

    let state = GatewayState {
        engine,
        notifier,
        config: config.clone(),
    };

    let cors = if config.gateway.allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .gateway
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    };

    let app = Router::new()
        // Provider callbacks (query-string basic auth)
        .route(
            "/api/waapi/callbacks/message_status_update",
            post(handle_status_update),
        )
        .route(
            "/api/waapi/callbacks/message_receive",
            post(handle_message_receive),
        )
        .route(
            "/api/waapi/callbacks/fake_200_callback",
            get(handle_fake_200).post(handle_fake_200),
        )
        // Console API
        .route("/v1/health", get(handle_health))
        .route("/v1/customers", get(handle_customers_list))
        .route("/v1/customers/:number/messages", get(handle_customer_messages))
        .route("/v1/customers/:number/read", post(handle_customer_read))
        .route("/v1/customers/:number/send", post(handle_customer_send))
        .route(
            "/v1/customers/:customer_id/display-name",
            put(handle_customer_rename),
        )
        .route("/v1/agents", get(handle_agents_list).post(handle_agents_create))
        .route("/v1/agents/:id", delete(handle_agents_delete))
        .route(
            "/v1/rules",
            get(handle_rules_list)
                .post(handle_rules_create)
                .delete(handle_rules_delete),
        )
        .route("/v1/announcements", get(handle_announcements))
        .route("/v1/unread", get(handle_unread))
        .route("/v1/ws", get(handle_live_ws))
        .route("/v1/ws/fleet", get(handle_fleet_ws))
        // Rehosted inbound media
        .nest_service("/media", ServeDir::new(paths.media_dir()))
        .layer(cors)
        .with_state(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, public_url = %config.public_url(), "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
