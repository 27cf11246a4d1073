use crate::config::ServerSettings;
use crate::models::chat::ConversationRequest;
use crate::proxy::{ ChatProxy, ProxyError };
use super::encoding::stream_response;
use super::error::ApiError;
use std::net::{ IpAddr, Ipv4Addr, SocketAddr };
use std::num::NonZeroU32;
use std::sync::{ Arc, Weak };
use std::time::{ Duration, Instant };
use axum::{
    body::Bytes,
    extract::{ ConnectInfo, Request, State },
    http::HeaderValue,
    middleware::{ self, Next },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use chrono::Utc;
use governor::{ clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter };
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{ AllowOrigin, Any, CorsLayer };
use uuid::Uuid;
use log::{ debug, info, warn };
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    proxy: Arc<ChatProxy>,
    settings: ServerSettings,
    limiter: Option<Arc<KeyedLimiter>>,
}

impl AppState {
    pub fn new(proxy: Arc<ChatProxy>, settings: ServerSettings) -> Self {
        let limiter = build_limiter(&settings);
        Self { proxy, settings, limiter }
    }

    /// Starts the periodic sweep that forgets clients whose quota has fully
    /// replenished. Returns `None` when rate limiting is disabled. The task
    /// ends once every clone of this state has been dropped.
    pub fn spawn_limiter_maintenance(&self) -> Option<JoinHandle<()>> {
        let limiter = self.limiter.as_ref()?;
        Some(spawn_limiter_sweep(Arc::downgrade(limiter), self.settings.rate_limit_window))
    }
}

fn build_limiter(settings: &ServerSettings) -> Option<Arc<KeyedLimiter>> {
    let burst = NonZeroU32::new(settings.rate_limit_requests)?;
    let quota = Quota::with_period(settings.rate_limit_window / burst.get())?.allow_burst(burst);
    Some(Arc::new(RateLimiter::keyed(quota)))
}

fn spawn_limiter_sweep(limiter: Weak<KeyedLimiter>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(limiter) = limiter.upgrade() else {
                break;
            };
            limiter.retain_recent();
            limiter.shrink_to_fit();
            debug!("Rate limiter tracking {} client(s)", limiter.len());
        }
    })
}

#[derive(Serialize)]
struct ServiceStatus {
    status: &'static str,
    #[serde(rename = "type")]
    service_type: String,
}

#[derive(Serialize)]
struct Services {
    ai_service: ServiceStatus,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: f64,
    response_time_ms: f64,
    services: Services,
    version: &'static str,
}

#[derive(Serialize)]
struct AiHealthResponse {
    status: &'static str,
    timestamp: f64,
    service: String,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.allowed_origins);

    let chat = Router::new()
        .route("/api/chat", post(chat_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .merge(chat)
        .route("/health", get(health_handler))
        .route("/health/ai", get(ai_health_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(limiter) = &state.limiter {
        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        if limiter.check_key(&client_ip).is_err() {
            warn!("Rate limit exceeded for {}", client_ip);
            return ApiError::RateLimited.into_response();
        }
    }
    next.run(request).await
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let conversation = match serde_json::from_slice::<ConversationRequest>(&body) {
        Ok(req) => req.messages,
        Err(e) => {
            warn!("[{}] rejected chat request: {}", request_id, e);
            return ApiError::BadRequest(format!("Invalid chat request: {}", e)).into_response();
        }
    };
    info!("[{}] chat request with {} message(s)", request_id, conversation.len());

    let started = Instant::now();
    let cancel = CancellationToken::new();
    let pending = PendingStream::new(&request_id, cancel.clone());

    if let Some(limit) = state.settings.max_duration {
        arm_deadline(&request_id, cancel.clone(), limit);
    }

    let opened = state.proxy.open_stream(&request_id, conversation, cancel).await;
    pending.disarm();

    let relay = match opened {
        Ok(relay) => relay,
        Err(ProxyError::Upstream(e)) => {
            warn!("[{}] chat request failed: {}", request_id, e);
            return ApiError::Internal.into_response();
        }
        Err(ProxyError::Cancelled) => {
            warn!(
                "[{}] chat cancelled before the first chunk after {} ms (max duration {:?})",
                request_id,
                started.elapsed().as_millis(),
                state.settings.max_duration.unwrap_or_default()
            );
            return ApiError::Internal.into_response();
        }
    };

    let id = request_id.clone();
    let relay = relay.on_finish(move |outcome| {
        debug!("[{}] chat {} in {} ms", id, outcome, started.elapsed().as_millis());
    });
    stream_response(relay, state.settings.stream_format, &request_id)
}

/// Held while the handler waits for the first chunk. If the client goes away
/// in that window the handler future is dropped with this still armed, which
/// logs the abort and cancels the upstream call.
struct PendingStream {
    request_id: String,
    cancel: CancellationToken,
    armed: bool,
}

impl PendingStream {
    fn new(request_id: &str, cancel: CancellationToken) -> Self {
        Self { request_id: request_id.to_string(), cancel, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingStream {
    fn drop(&mut self) {
        if self.armed {
            info!("[{}] chat aborted before the first chunk", self.request_id);
            self.cancel.cancel();
        }
    }
}

fn arm_deadline(request_id: &str, cancel: CancellationToken, limit: Duration) {
    let request_id = request_id.to_string();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                warn!("[{}] chat exceeded {:?}, cancelling", request_id, limit);
                cancel.cancel();
            }
        }
    });
}

async fn check_ai(state: &AppState) -> bool {
    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, state.proxy.client().health_check()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("AI service health check failed: {}", e);
            false
        }
        Err(_) => {
            warn!("AI service health check timed out");
            false
        }
    }
}

fn unix_timestamp() -> f64 {
    (Utc::now().timestamp_millis() as f64) / 1000.0
}

fn status_label(healthy: bool) -> &'static str {
    if healthy { "healthy" } else { "unhealthy" }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let started = Instant::now();
    let ai_healthy = check_ai(&state).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    Json(HealthResponse {
        status: if ai_healthy { "healthy" } else { "degraded" },
        timestamp: unix_timestamp(),
        response_time_ms: (elapsed_ms * 100.0).round() / 100.0,
        services: Services {
            ai_service: ServiceStatus {
                status: status_label(ai_healthy),
                service_type: state.proxy.client().provider().to_string(),
            },
        },
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ai_health_handler(State(state): State<AppState>) -> Json<AiHealthResponse> {
    let healthy = check_ai(&state).await;
    Json(AiHealthResponse {
        status: status_label(healthy),
        timestamp: unix_timestamp(),
        service: state.proxy.client().provider().to_string(),
    })
}
