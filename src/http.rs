use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::{
    orchestrator::{ChatOrchestrator, TurnError},
    session::{ConversationSummary, SessionError, SessionManager},
    types::{ChatMessage, Mode, Persona, TurnReply},
};

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    /// Held for the whole turn, so turns serialize.
    pub sessions: Arc<Mutex<SessionManager>>,
}

impl AppState {
    pub fn new(orchestrator: ChatOrchestrator, sessions: SessionManager) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            sessions: Arc::new(Mutex::new(sessions)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<Mode>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: Mode,
}

#[derive(Debug, Deserialize)]
pub struct PersonaRequest {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(flatten)]
    pub persona: Persona,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub message_index: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UnpinQuery {
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    #[serde(default)]
    pub conversation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    #[serde(default)]
    pub conversation: Option<String>,
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct NameResponse {
    name: String,
}

#[derive(Debug, Serialize)]
struct ActiveResponse {
    active: String,
}

#[derive(Debug, Serialize)]
struct CanonResponse {
    canon: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/conversations/{name}", delete(delete_conversation))
        .route("/conversations/{name}/rename", post(rename_conversation))
        .route("/conversations/{name}/activate", post(activate_conversation))
        .route("/conversations/{name}/messages", get(list_messages))
        .route("/conversations/{name}/persona", put(set_persona))
        .route("/conversations/{name}/mode", put(set_mode))
        .route(
            "/conversations/{name}/canon",
            post(pin_canon).delete(unpin_canon),
        )
        .route("/chat", post(chat))
        .route("/chat/regenerate", post(regenerate))
        .route("/chat/edit", post(edit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn list_conversations(State(state): State<AppState>) -> Json<Vec<ConversationSummary>> {
    Json(state.sessions.lock().await.list())
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<NameResponse>), ApiError> {
    let name = state
        .sessions
        .lock()
        .await
        .create(request.name.as_deref(), request.mode)
        .map_err(session_error)?;
    Ok((StatusCode::CREATED, Json(NameResponse { name })))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ActiveResponse>, ApiError> {
    let active = state
        .sessions
        .lock()
        .await
        .delete(&name)
        .map_err(session_error)?;
    Ok(Json(ActiveResponse { active }))
}

async fn rename_conversation(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<NameResponse>, ApiError> {
    state
        .sessions
        .lock()
        .await
        .rename(&name, &request.to)
        .map_err(session_error)?;
    Ok(Json(NameResponse {
        name: request.to.trim().to_owned(),
    }))
}

async fn activate_conversation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ActiveResponse>, ApiError> {
    state
        .sessions
        .lock()
        .await
        .switch(&name)
        .map_err(session_error)?;
    Ok(Json(ActiveResponse { active: name }))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let sessions = state.sessions.lock().await;
    let conversation = sessions.conversation(&name).map_err(session_error)?;
    Ok(Json(conversation.messages.clone()))
}

async fn set_persona(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<PersonaRequest>,
) -> Result<Json<Persona>, ApiError> {
    let mut sessions = state.sessions.lock().await;
    let persona = match request.preset {
        Some(preset) => sessions.apply_preset(&name, &preset),
        None => sessions
            .set_persona(&name, request.persona.clone())
            .map(|_| request.persona),
    }
    .map_err(session_error)?;
    Ok(Json(persona))
}

async fn set_mode(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ModeRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .lock()
        .await
        .set_mode(&name, request.mode)
        .map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pin_canon(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<PinRequest>,
) -> Result<Json<CanonResponse>, ApiError> {
    let mut sessions = state.sessions.lock().await;
    let pinned = match (request.text, request.message_index) {
        (Some(text), _) => sessions.pin(&name, &text),
        (None, Some(index)) => sessions.pin_message(&name, index),
        (None, None) => Err(SessionError::EmptyCanon),
    };
    pinned.map_err(session_error)?;
    canon_of(&sessions, &name)
}

async fn unpin_canon(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<UnpinQuery>,
) -> Result<Json<CanonResponse>, ApiError> {
    let mut sessions = state.sessions.lock().await;
    sessions.unpin(&name, query.index).map_err(session_error)?;
    canon_of(&sessions, &name)
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    let mut sessions = state.sessions.lock().await;
    activate(&mut sessions, request.conversation.as_deref())?;
    let reply = state
        .orchestrator
        .submit(&mut sessions, &request.message)
        .await
        .map_err(turn_error)?;
    Ok(Json(reply))
}

async fn regenerate(
    State(state): State<AppState>,
    Json(request): Json<RegenerateRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    let mut sessions = state.sessions.lock().await;
    activate(&mut sessions, request.conversation.as_deref())?;
    let reply = state
        .orchestrator
        .regenerate(&mut sessions)
        .await
        .map_err(turn_error)?;
    Ok(Json(reply))
}

async fn edit(
    State(state): State<AppState>,
    Json(request): Json<EditRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    let mut sessions = state.sessions.lock().await;
    activate(&mut sessions, request.conversation.as_deref())?;
    let reply = state
        .orchestrator
        .edit_and_resend(&mut sessions, request.index, &request.message)
        .await
        .map_err(turn_error)?;
    Ok(Json(reply))
}

fn activate(sessions: &mut SessionManager, name: Option<&str>) -> Result<(), ApiError> {
    match name {
        Some(name) => sessions.switch(name).map_err(session_error),
        None => Ok(()),
    }
}

fn canon_of(sessions: &SessionManager, name: &str) -> Result<Json<CanonResponse>, ApiError> {
    let conversation = sessions.conversation(name).map_err(session_error)?;
    Ok(Json(CanonResponse {
        canon: conversation.canon.clone(),
    }))
}

fn session_error(error: SessionError) -> ApiError {
    let status = match &error {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::AlreadyExists(_) | SessionError::NothingToRegenerate => StatusCode::CONFLICT,
        SessionError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, error.to_string())
}

fn turn_error(error: TurnError) -> ApiError {
    match error {
        TurnError::EmptyInput => (StatusCode::BAD_REQUEST, error.to_string()),
        TurnError::Session(error) => session_error(error),
        TurnError::Completion(error) => (StatusCode::BAD_GATEWAY, error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::{
        heuristics::Heuristics,
        markup::MarkupOptions,
        model::MockModelProvider,
        orchestrator::{ChatOrchestrator, TurnSettings},
        session::SessionManager,
        types::Mode,
    };

    use super::{AppState, router};

    fn app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().expect("temp dir");
        let sessions =
            SessionManager::open(dir.path().join("sessions.json"), Mode::Story).expect("open");
        let orchestrator = ChatOrchestrator::new(
            Arc::new(MockModelProvider),
            Heuristics::default(),
            TurnSettings::default(),
            MarkupOptions::default(),
        );
        (dir, router(AppState::new(orchestrator, sessions)))
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    fn empty_request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request builds")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.expect("router responds");
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        (status, body.to_vec())
    }

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).expect("json body")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_dir, app) = app();
        let (status, body) = send(&app, empty_request(Method::GET, "/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn create_then_list_conversations() {
        let (_dir, app) = app();
        let (status, body) = send(
            &app,
            json_request(Method::POST, "/conversations", json!({"name": "Harbour", "mode": "chat"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body_json(&body)["name"], "Harbour");

        let (status, _) = send(
            &app,
            json_request(Method::POST, "/conversations", json!({"name": "Harbour"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&app, empty_request(Method::GET, "/conversations")).await;
        let list = body_json(&body);
        assert_eq!(list.as_array().map(Vec::len), Some(2));
        let harbour = list
            .as_array()
            .and_then(|items| items.iter().find(|item| item["name"] == "Harbour"))
            .expect("harbour listed");
        assert_eq!(harbour["active"], true);
        assert_eq!(harbour["mode"], "chat");
    }

    #[tokio::test]
    async fn chat_appends_user_and_reply() {
        let (_dir, app) = app();
        let (status, body) = send(
            &app,
            json_request(Method::POST, "/chat", json!({"message": "hello there [smile]"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let reply = body_json(&body);
        assert!(reply["text"].as_str().unwrap_or_default().contains("You said: hello there"));
        assert_eq!(reply["directives"], json!(["smile"]));

        let (status, body) =
            send(&app, empty_request(Method::GET, "/conversations/Chat%201/messages")).await;
        assert_eq!(status, StatusCode::OK);
        let messages = body_json(&body);
        assert_eq!(messages.as_array().map(Vec::len), Some(3));
        assert_eq!(messages[1]["raw"], "hello there [smile]");
    }

    #[tokio::test]
    async fn respond_by_saying_over_http() {
        let (_dir, app) = app();
        let (status, body) = send(
            &app,
            json_request(Method::POST, "/chat", json!({"message": "[respond by saying: Aye.]"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let reply = body_json(&body);
        assert_eq!(reply["text"], "Aye.");
        assert_eq!(reply["short_circuited"], true);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let (_dir, app) = app();
        let (status, body) =
            send(&app, empty_request(Method::POST, "/conversations/Nowhere/activate")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(String::from_utf8_lossy(&body).contains("Nowhere"));

        let (status, _) = send(
            &app,
            json_request(Method::POST, "/chat", json!({"conversation": "Nowhere", "message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn regenerate_without_turns_conflicts() {
        let (_dir, app) = app();
        let (status, _) =
            send(&app, json_request(Method::POST, "/chat/regenerate", json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn canon_pin_and_unpin() {
        let (_dir, app) = app();
        let (status, body) = send(
            &app,
            json_request(
                Method::POST,
                "/conversations/Chat%201/canon",
                json!({"text": "The bridge is out"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(&body)["canon"], json!(["The bridge is out"]));

        let (status, body) = send(
            &app,
            empty_request(Method::DELETE, "/conversations/Chat%201/canon?index=0"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(&body)["canon"], json!([]));
    }

    #[tokio::test]
    async fn persona_preset_and_mode() {
        let (_dir, app) = app();
        let (status, body) = send(
            &app,
            json_request(
                Method::PUT,
                "/conversations/Chat%201/persona",
                json!({"preset": "noir"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body_json(&body)["who"].as_str().unwrap_or_default().is_empty());

        let (status, _) = send(
            &app,
            json_request(Method::PUT, "/conversations/Chat%201/mode", json!({"mode": "chat"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn deleting_last_conversation_returns_fresh_active() {
        let (_dir, app) = app();
        let (status, body) =
            send(&app, empty_request(Method::DELETE, "/conversations/Chat%201")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(&body)["active"], "Chat 1");
    }
}
