use crate::catalog::Catalog;
use crate::config_store::ConfigStore;
use crate::consumer::ConsumerEngine;
use crate::entity::{self, Entity};
use crate::env::AuthMode;
use crate::error::GatewayError;
use crate::producer::ProducerEngine;
use crate::registry;
use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{StreamExt, stream};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;

/// Origins allowed through CORS when the authorization middleware is not running in `noop`
/// mode. Fixed, as the rest of the HTTP surface is.
const ALLOWED_ORIGINS: [&str; 2] = ["https://studio.example.com", "https://data.example.com"];

const CAPABILITY_READ: &str = "datahub:r";
const CAPABILITY_WRITE: &str = "datahub:w";

/// Shared state reachable from every handler.
#[derive(Clone)]
pub struct AppState {
    pub config_store: Arc<ConfigStore>,
    pub consumer_engine: Arc<ConsumerEngine>,
    pub producer_engine: Arc<ProducerEngine>,
    pub auth_mode: AuthMode,
}

/// Builds the full axum [`Router`] for the gateway.
pub fn router(state: AppState) -> Router {
    let auth_mode = state.auth_mode;

    let protected = Router::new()
        .route("/datasets", get(list_datasets))
        .route("/datasets/{name}/entities", get(get_entities).post(post_entities))
        .route("/datasets/{name}/changes", get(get_entities))
        .route_layer(middleware::from_fn_with_state(auth_mode, authorize));

    let cors = if auth_mode == AuthMode::Noop {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_origin(
                ALLOWED_ORIGINS
                    .iter()
                    .map(|o| o.parse().expect("valid CORS origin"))
                    .collect::<Vec<_>>(),
            )
    };

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "UP"
}

async fn authorize(auth_mode: State<AuthMode>, headers: HeaderMap, request: axum::extract::Request, next: Next) -> Response {
    if *auth_mode == AuthMode::Noop {
        return next.run(request).await;
    }

    let required = if request.method() == Method::POST {
        CAPABILITY_WRITE
    } else {
        CAPABILITY_READ
    };

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.split(',').any(|cap| cap.trim() == required));

    if authorized {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, "missing required capability").into_response()
    }
}

async fn list_datasets(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.config_store.current().await;
    axum::Json(registry::list(&catalog))
}

#[derive(Deserialize)]
struct EntitiesQuery {
    #[serde(default)]
    since: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    -1
}

async fn get_entities(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<EntitiesQuery>,
) -> Result<Response, GatewayError> {
    let catalog = state.config_store.current().await;
    let config = catalog
        .consumer(&name)
        .cloned()
        .ok_or_else(|| GatewayError::NotFound(format!("no consumer dataset named {name}")))?;

    let (tx, rx) = mpsc::channel::<Entity>(64);

    tokio::spawn(async move {
        if let Err(e) = state
            .consumer_engine
            .change_set(config, query.since, query.limit, tx)
            .await
        {
            tracing::error!("change set for dataset {name} failed: {:#}", e);
        }
    });

    Ok(streaming_response(ReceiverStream::new(rx).map(|e| e.to_json())))
}

async fn post_entities(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let catalog = state.config_store.current().await;
    let config = catalog
        .producer(&name)
        .cloned()
        .ok_or_else(|| GatewayError::NotFound(format!("no producer dataset named {name}")))?;

    let mut entities: Vec<Entity> = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::BadRequest(format!("invalid entity batch: {e}")))?;

    // The leading element is the `@context` namespace declaration, not a producible entity —
    // the egdm parser consumes it the same way rather than yielding it as data (spec §6).
    if entities.first().is_some_and(|e| e.id == entity::CONTEXT_ID) {
        entities.remove(0);
    }

    state
        .producer_engine
        .produce_entities(&config, &entities)
        .await
        .map_err(GatewayError::Internal)?;

    let namespace_uri = format!("{}/", name);
    let echoed = std::iter::once(Entity::context(&namespace_uri).to_json())
        .chain(entities.into_iter().map(|e| e.to_json()));

    Ok(streaming_response(stream::iter(echoed)))
}

/// Wraps an entity-value stream in the response framing: `[`, comma-separated elements, `]`,
/// flushed per chunk.
fn streaming_response(values: impl futures::Stream<Item = serde_json::Value> + Send + 'static) -> Response {
    let framed = values
        .enumerate()
        .map(|(i, v)| {
            let mut chunk = if i == 0 { b"[".to_vec() } else { b",".to_vec() };
            chunk.extend(serde_json::to_vec(&v).expect("entity value serializes"));
            Ok::<_, std::convert::Infallible>(Bytes::from(chunk))
        })
        .chain(stream::once(async { Ok(Bytes::from_static(b"]")) }));

    let mut response = Response::new(Body::from_stream(framed));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
    response
}
