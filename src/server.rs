use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::header,
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use futures::StreamExt;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::events::EventChannel;
use crate::models::ChatRequest;
use crate::orchestrator::{Orchestrator, reject};

/// Events buffered between a request task and its response body.
const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// `static_dir` must be a dedicated assets directory: every file under it is public.
pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let static_dir = Path::new(&server.static_dir);
    let router = Router::new()
        .route("/stream", post(stream_handler))
        .route("/health", get(|| async { "ok" }))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .fallback_service(ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(server.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if server.cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Opens the event stream right away; the body is parsed afterwards so a bad
/// payload is reported inside the stream like every other failure.
async fn stream_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let request_id = Uuid::new_v4();
    let span = info_span!("stream", %request_id);
    let (channel, rx) = EventChannel::new(EVENT_BUFFER);

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(
        async move {
            match serde_json::from_slice::<ChatRequest>(&body) {
                Ok(request) => {
                    info!(turns = request.history.len(), "Stream request received");
                    orchestrator.handle(request.history, channel).await;
                }
                Err(e) => reject(&channel, format!("Invalid request body: {e}")).await,
            }
        }
        .instrument(span),
    );

    let events = ReceiverStream::new(rx)
        .map(|event| Ok::<Event, Infallible>(Event::default().data(event.payload())));

    (
        [
            (header::CONNECTION, "keep-alive"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Sse::new(events),
    )
}
