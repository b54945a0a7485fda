//! Assistant widget routes for the portal front end.
//!
//! - `POST   /widget/sessions`              : open a widget, returns the seeded transcript
//! - `GET    /widget/sessions/{id}`         : transcript snapshot and busy flag
//! - `POST   /widget/sessions/{id}/turns`   : submit one utterance
//! - `DELETE /widget/sessions/{id}`         : close the widget and drop its transcript
//!
//! Sessions nobody touches for the configured idle timeout are swept away, so
//! a reloaded or closed browser tab does not pin its transcript forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use knatty_agent::llm::GenerationBackends;
use knatty_agent::runtime::{AssistantSession, TurnOutcome};
use knatty_core::{ApplicationError, InterfaceError, Message};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

struct SessionEntry {
    session: Arc<AssistantSession>,
    last_active: Instant,
}

#[derive(Clone)]
pub struct WidgetState {
    backends: GenerationBackends,
    idle_timeout: Duration,
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl WidgetState {
    pub fn new(backends: GenerationBackends, idle_timeout: Duration) -> Self {
        Self { backends, idle_timeout, sessions: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Looks a session up and marks it active.
    async fn session(&self, session_id: Uuid) -> Result<Arc<AssistantSession>, ApiError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&session_id).ok_or_else(|| session_not_found(session_id))?;
        entry.last_active = Instant::now();
        Ok(Arc::clone(&entry.session))
    }

    /// Closes and forgets every session idle for at least the idle timeout.
    /// Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        let expired = {
            let mut sessions = self.sessions.write().await;
            let now = Instant::now();
            let expired_ids = sessions
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.last_active) >= self.idle_timeout)
                .map(|(session_id, _)| *session_id)
                .collect::<Vec<_>>();
            expired_ids
                .into_iter()
                .filter_map(|session_id| {
                    sessions.remove(&session_id).map(|entry| (session_id, entry.session))
                })
                .collect::<Vec<_>>()
        };

        for (session_id, session) in &expired {
            session.close_widget().await;
            info!(
                event_name = "widget.session.evicted",
                session_id = %session_id,
                idle_timeout_secs = self.idle_timeout.as_secs(),
                "idle widget session evicted"
            );
        }

        expired.len()
    }
}

fn session_not_found(session_id: Uuid) -> ApiError {
    ApiError::from(ApplicationError::SessionNotFound(session_id.to_string()))
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub utterance: String,
    /// Mirrors the portal's client-side login state.
    #[serde(default)]
    pub authenticated: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub busy: bool,
    pub transcript: Vec<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<Message>,
    pub busy: bool,
    pub transcript: Vec<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        Self(error.into_interface(Uuid::new_v4().to_string()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::from(ApplicationError::InvalidRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Builds the widget routes and starts the idle-session sweeper.
pub fn router(backends: GenerationBackends, idle_timeout: Duration) -> Router {
    let state = WidgetState::new(backends, idle_timeout);
    spawn_idle_sweeper(state.clone());
    routes(state)
}

fn routes(state: WidgetState) -> Router {
    Router::new()
        .route("/widget/sessions", post(open_session))
        .route("/widget/sessions/{id}", get(get_session).delete(close_session))
        .route("/widget/sessions/{id}/turns", post(submit_turn))
        .with_state(state)
}

fn spawn_idle_sweeper(state: WidgetState) {
    let period = (state.idle_timeout / 4).max(MIN_SWEEP_PERIOD);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let evicted = state.evict_idle().await;
            if evicted > 0 {
                debug!(event_name = "widget.session.sweep", evicted, "idle sweep finished");
            }
        }
    });
}

async fn open_session(State(state): State<WidgetState>) -> (StatusCode, Json<SessionResponse>) {
    let session_id = Uuid::new_v4();
    let session = Arc::new(AssistantSession::new(state.backends.clone()));
    session.open_widget().await;

    let entry = SessionEntry { session: Arc::clone(&session), last_active: Instant::now() };
    state.sessions.write().await.insert(session_id, entry);
    info!(event_name = "widget.session.opened", session_id = %session_id, "widget session opened");

    let transcript = session.snapshot().await;
    (StatusCode::CREATED, Json(SessionResponse { session_id, busy: false, transcript }))
}

async fn get_session(
    State(state): State<WidgetState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.session(session_id).await?;
    Ok(Json(SessionResponse {
        session_id,
        busy: session.is_busy().await,
        transcript: session.snapshot().await,
    }))
}

async fn submit_turn(
    State(state): State<WidgetState>,
    Path(session_id): Path<Uuid>,
    payload: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Json<TurnResponse>, ApiError> {
    let Json(request) = payload?;
    let session = state.session(session_id).await?;
    let outcome = session.submit(&request.utterance, request.authenticated).await;

    let (status, reason, intent, reply) = match outcome {
        TurnOutcome::Ignored(reason) => ("ignored", Some(reason.as_str()), None, None),
        TurnOutcome::Completed { intent, reply } => {
            ("completed", None, Some(intent.as_str()), Some(reply))
        }
        TurnOutcome::Discarded { intent } => {
            warn!(
                event_name = "widget.turn.discarded",
                session_id = %session_id,
                "turn finished after its widget was reset"
            );
            ("discarded", None, Some(intent.as_str()), None)
        }
    };

    Ok(Json(TurnResponse {
        status,
        reason,
        intent,
        reply,
        busy: session.is_busy().await,
        transcript: session.snapshot().await,
    }))
}

async fn close_session(
    State(state): State<WidgetState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let entry = state
        .sessions
        .write()
        .await
        .remove(&session_id)
        .ok_or_else(|| session_not_found(session_id))?;
    entry.session.close_widget().await;

    info!(event_name = "widget.session.closed", session_id = %session_id, "widget session closed");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use knatty_agent::llm::{BackendError, ContentPart, GenerationBackends, GenerativeService};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, routes, WidgetState};

    struct EchoService;

    #[async_trait]
    impl GenerativeService for EchoService {
        async fn generate_text(&self, prompt: &str) -> Result<String, BackendError> {
            Ok(format!("echo: {prompt}"))
        }

        async fn generate_image(&self, _prompt: &str) -> Result<Vec<ContentPart>, BackendError> {
            Ok(vec![ContentPart::text("sunset"), ContentPart::image("image/png", "iVBORw0KGgo=")])
        }
    }

    fn backends() -> GenerationBackends {
        GenerationBackends::new(Arc::new(EchoService))
    }

    fn app() -> Router {
        router(backends(), Duration::from_secs(60))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request should build");

        let response = app.clone().oneshot(request).await.expect("router should respond");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body should be JSON")
        };
        (status, value)
    }

    async fn open(app: &Router) -> String {
        let (status, payload) = send(app, Method::POST, "/widget/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        payload["sessionId"].as_str().expect("session id").to_string()
    }

    #[tokio::test]
    async fn opening_a_session_returns_the_greeting() {
        let app = app();
        let (status, payload) = send(&app, Method::POST, "/widget/sessions", None).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payload["busy"], false);
        assert_eq!(payload["transcript"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload["transcript"][0]["origin"], "assistant");
    }

    #[tokio::test]
    async fn generic_turn_appends_user_and_assistant_messages() {
        let app = app();
        let session_id = open(&app).await;

        let (status, payload) = send(
            &app,
            Method::POST,
            &format!("/widget/sessions/{session_id}/turns"),
            Some(json!({ "utterance": "hello" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "completed");
        assert_eq!(payload["intent"], "generic");
        assert_eq!(payload["reply"]["text"], "echo: hello");
        assert_eq!(payload["transcript"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn unauthenticated_image_turn_carries_login_prompt() {
        let app = app();
        let session_id = open(&app).await;

        let (_, payload) = send(
            &app,
            Method::POST,
            &format!("/widget/sessions/{session_id}/turns"),
            Some(json!({ "utterance": "draw me a sunset", "authenticated": false })),
        )
        .await;

        assert_eq!(payload["reply"]["loginPrompt"], true);
        assert!(payload["reply"].get("imageUrl").is_none());
    }

    #[tokio::test]
    async fn authenticated_image_turn_carries_image_url() {
        let app = app();
        let session_id = open(&app).await;

        let (_, payload) = send(
            &app,
            Method::POST,
            &format!("/widget/sessions/{session_id}/turns"),
            Some(json!({ "utterance": "draw me a sunset", "authenticated": true })),
        )
        .await;

        assert_eq!(payload["intent"], "image_request");
        assert_eq!(payload["reply"]["imageUrl"], "data:image/png;base64,iVBORw0KGgo=");
    }

    #[tokio::test]
    async fn blank_turn_is_reported_as_ignored() {
        let app = app();
        let session_id = open(&app).await;

        let (_, payload) = send(
            &app,
            Method::POST,
            &format!("/widget/sessions/{session_id}/turns"),
            Some(json!({ "utterance": "   " })),
        )
        .await;

        assert_eq!(payload["status"], "ignored");
        assert_eq!(payload["reason"], "empty_utterance");
        assert_eq!(payload["transcript"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn closed_session_is_forgotten() {
        let app = app();
        let session_id = open(&app).await;
        let uri = format!("/widget/sessions/{session_id}");

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, payload) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(payload["correlationId"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn malformed_turn_body_gets_correlated_bad_request() {
        let app = app();
        let session_id = open(&app).await;

        let (status, payload) = send(
            &app,
            Method::POST,
            &format!("/widget/sessions/{session_id}/turns"),
            Some(json!({ "authenticated": true })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            payload["error"],
            "The request could not be processed. Check inputs and try again."
        );
        assert!(payload["detail"].as_str().is_some_and(|detail| detail.contains("utterance")));
        assert!(payload["correlationId"].as_str().is_some_and(|id| !id.is_empty()));

        let (_, session) =
            send(&app, Method::GET, &format!("/widget/sessions/{session_id}"), None).await;
        assert_eq!(session["transcript"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let state = WidgetState::new(backends(), Duration::ZERO);
        let app = routes(state.clone());
        let session_id = open(&app).await;

        assert_eq!(state.evict_idle().await, 1);

        let (status, _) =
            send(&app, Method::GET, &format!("/widget/sessions/{session_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(state.evict_idle().await, 0);
    }

    #[tokio::test]
    async fn active_sessions_survive_the_sweep() {
        let state = WidgetState::new(backends(), Duration::from_secs(60));
        let app = routes(state.clone());
        let session_id = open(&app).await;

        assert_eq!(state.evict_idle().await, 0);

        let (status, payload) =
            send(&app, Method::GET, &format!("/widget/sessions/{session_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["busy"], false);
    }
}
