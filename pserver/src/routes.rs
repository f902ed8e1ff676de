//! Route table and request handling for the AI proxy surface.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use pprovider::{CompletionRequest, ProviderError, ProviderErrorKind, ProviderId, ProviderRegistry};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
}

/// One route per provider; anything else under `/api/ai/` falls through to
/// the router's 404.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(health));
    for provider in ProviderId::ALL {
        router = router.route(
            &format!("/api/ai/{provider}"),
            post(
                move |State(state): State<AppState>, Json(body): Json<CompletionBody>| async move {
                    complete(provider, state, body).await
                },
            ),
        );
    }
    router.layer(CorsLayer::permissive()).with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CompletionBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

async fn health() -> &'static str {
    "OK"
}

async fn complete(provider: ProviderId, state: AppState, body: CompletionBody) -> Response {
    let mut request = CompletionRequest::new(body.message.unwrap_or_default());
    if let Some(model) = body.model {
        request = request.with_model(model);
    }
    if let Err(error) = request.validate() {
        return error_response(&error);
    }

    let Some(adapter) = state.registry.get(provider) else {
        return error_response(&ProviderError::other(format!(
            "No adapter registered for {provider}"
        )));
    };

    match adapter.complete(request).await {
        Ok(reply) => {
            tracing::info!(provider = %provider, model = %reply.model, "completion served");
            Json(json!({ "text": reply.text })).into_response()
        }
        Err(error) => {
            tracing::warn!(
                provider = %provider,
                kind = ?error.kind,
                error = %error.message,
                "completion failed"
            );
            error_response(&error)
        }
    }
}

fn error_response(error: &ProviderError) -> Response {
    let status = status_for(error.kind);
    (status, Json(json!({ "error": error.message }))).into_response()
}

fn status_for(kind: ProviderErrorKind) -> StatusCode {
    match kind {
        ProviderErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ProviderErrorKind::Authentication => StatusCode::INTERNAL_SERVER_ERROR,
        ProviderErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ProviderErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ProviderErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ProviderErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ProviderErrorKind::Other => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
