use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ifc_rag_core::{ChatError, ChatReply, ChatRequest, ServiceState};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_ready(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "not_ready",
        message: message.into(),
    }
}

fn upstream(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream",
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(error: ChatError) -> Self {
        match error {
            ChatError::EmptyQuestion => bad_request(error.to_string()),
            ChatError::Retrieval(_) | ChatError::Answer(_) => {
                warn!(%error, "chat request failed");
                upstream(error.to_string())
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    version: &'static str,
}

async fn handle_health(State(state): State<ServiceState>) -> Response {
    let (status, body) = match &state {
        ServiceState::Ready(_) => (
            StatusCode::OK,
            HealthResponse {
                status: "ready",
                reason: None,
                version: env!("CARGO_PKG_VERSION"),
            },
        ),
        ServiceState::Degraded { reason } => (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthResponse {
                status: "degraded",
                reason: Some(reason.clone()),
                version: env!("CARGO_PKG_VERSION"),
            },
        ),
    };
    (status, Json(body)).into_response()
}

// ============ POST /chat ============

async fn handle_chat(
    State(state): State<ServiceState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, AppError> {
    let service = match &state {
        ServiceState::Ready(service) => service.clone(),
        ServiceState::Degraded { reason } => {
            return Err(not_ready(format!("service not initialized: {reason}")))
        }
    };
    let Json(request) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;

    Ok(Json(service.ask(request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ifc_rag_core::{
        AnswerModel, AnswerRequest, ChatService, ChunkMetadata, Retriever, ScoredChunk,
        SearchError, SessionStore, TripleChunk,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct OneHit;

    #[async_trait]
    impl Retriever for OneHit {
        async fn retrieve(&self, _query: &str, _k: usize) -> Result<Vec<ScoredChunk>, SearchError> {
            Ok(vec![ScoredChunk {
                chunk: TripleChunk {
                    chunk_id: "c-1".to_string(),
                    chunk_index: 0,
                    content: "Wall-1 HASMATERIAL Concrete.".to_string(),
                    metadata: ChunkMetadata {
                        file: "house.ifc".to_string(),
                    },
                },
                score: 0.75,
            }])
        }
    }

    struct CannedModel(Result<&'static str, &'static str>);

    #[async_trait]
    impl AnswerModel for CannedModel {
        async fn answer(&self, _request: &AnswerRequest<'_>) -> Result<String, SearchError> {
            self.0
                .map(str::to_string)
                .map_err(|message| SearchError::Request(message.to_string()))
        }
    }

    fn ready(model: CannedModel) -> ServiceState {
        ServiceState::Ready(Arc::new(ChatService::new(
            Arc::new(OneHit),
            Arc::new(model),
            SessionStore::new(10, 10),
            12,
        )))
    }

    async fn call(state: ServiceState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn chat(body: Value) -> Request<Body> {
        Request::post("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn chat_returns_answer_and_sources() {
        let (status, body) = call(
            ready(CannedModel(Ok("Wall-1 is made of Concrete."))),
            chat(json!({ "question": "What is Wall-1 made of?", "session_id": "s-1" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "Wall-1 is made of Concrete.");
        assert_eq!(body["session_id"], "s-1");
        assert_eq!(body["sources"][0]["file"], "house.ifc");
        assert_eq!(body["sources"][0]["chunk_id"], "c-1");
    }

    #[tokio::test]
    async fn empty_question_is_a_bad_request() {
        let (status, body) = call(
            ready(CannedModel(Ok("unused"))),
            chat(json!({ "question": "" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let request = Request::post("/chat")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = call(ready(CannedModel(Ok("unused"))), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn model_failure_is_an_upstream_error() {
        let (status, body) = call(
            ready(CannedModel(Err("quota exceeded"))),
            chat(json!({ "question": "Where is Door-2?" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "upstream");
    }

    #[tokio::test]
    async fn degraded_service_fails_every_request_the_same_way() {
        let state = ServiceState::Degraded {
            reason: "secret unavailable".to_string(),
        };

        let (first_status, first) =
            call(state.clone(), chat(json!({ "question": "a?" }))).await;
        let (second_status, second) = call(state.clone(), chat(json!({ "question": "b?" }))).await;
        assert_eq!(first_status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(first, second);
        assert_eq!(second_status, first_status);
        assert_eq!(first["error"]["code"], "not_ready");

        let health = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = call(state, health).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["reason"], "secret unavailable");
    }

    #[tokio::test]
    async fn health_reports_ready() {
        let health = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = call(ready(CannedModel(Ok("x"))), health).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }
}
