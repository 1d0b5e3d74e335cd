use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::warn;
use warp::http::StatusCode;
use warp::Filter;

use crate::clients::calendar::AuthSession;
use crate::clients::speech::{SpeechToText, TextToSpeech, VoiceConfig};
use crate::events::queue::{EventBus, TurnEvent};
use crate::service::dialogue_flow::{Coordinator, TurnReply};
use crate::service::snapshot_cache::SnapshotCache;

const SPEECH_TIMEOUT_SECONDS: u64 = 10;

/// Everything the HTTP layer needs, cloned into each filter.
#[derive(Clone)]
pub struct ApiContext {
    pub coordinator: Arc<Coordinator>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub auth: Arc<dyn AuthSession>,
    pub cache: Arc<SnapshotCache>,
    pub bus: EventBus,
    pub voice: VoiceConfig,
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Base64 audio, used when `text` is absent.
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_encoding() -> String {
    "wav".to_string()
}

#[derive(Debug, Serialize)]
pub struct ConflictingEventPayload {
    pub title: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub assistant_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_audio: Option<String>,
    pub event_committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_events: Option<Vec<ConflictingEventPayload>>,
    pub requires_login: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn routes(
    ctx: ApiContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let turn = warp::path!("api" / "turn")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx(ctx.clone()))
        .and_then(handle_turn);
    let login = warp::path!("api" / "login")
        .and(warp::post())
        .and(with_ctx(ctx.clone()))
        .and_then(handle_login);
    let health = warp::path!("api" / "health")
        .and(warp::get())
        .and(with_ctx(ctx))
        .and_then(handle_health);
    turn.or(login).or(health)
}

fn with_ctx(
    ctx: ApiContext,
) -> impl Filter<Extract = (ApiContext,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

type JsonReply = warp::reply::WithStatus<warp::reply::Json>;

fn error_reply(status: StatusCode, message: impl Into<String>) -> JsonReply {
    warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            error: message.into(),
        }),
        status,
    )
}

async fn handle_turn(request: TurnRequest, ctx: ApiContext) -> Result<JsonReply, warp::Rejection> {
    let text = match (&request.text, &request.audio) {
        (Some(text), _) => text.clone(),
        (None, Some(audio)) => {
            let bytes = match BASE64.decode(audio) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(error_reply(
                        StatusCode::BAD_REQUEST,
                        format!("audio is not valid base64: {e}"),
                    ));
                }
            };
            let recognized = timeout(
                Duration::from_secs(SPEECH_TIMEOUT_SECONDS),
                ctx.stt.recognize(&bytes, &request.encoding),
            )
            .await;
            match recognized {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    // Recognition failures are conversational, not HTTP
                    // errors: the user just gets asked to repeat.
                    warn!(error = %e, "speech recognition failed");
                    let prompt = "I couldn't make out what you said. Could you repeat that?";
                    let assistant_audio = synthesize_reply(&ctx, prompt).await;
                    return Ok(warp::reply::with_status(
                        warp::reply::json(&TurnResponse {
                            assistant_text: prompt.to_string(),
                            assistant_audio,
                            event_committed: false,
                            conflicting_events: None,
                            requires_login: false,
                        }),
                        StatusCode::OK,
                    ));
                }
                Err(_) => {
                    // The turn never reached the coordinator; leave the
                    // session usable for the retry.
                    ctx.coordinator
                        .sessions()
                        .abandon_turn(&request.session_id)
                        .await;
                    return Ok(error_reply(
                        StatusCode::GATEWAY_TIMEOUT,
                        "speech recognition timed out",
                    ));
                }
            }
        }
        (None, None) => {
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                "either text or audio is required",
            ));
        }
    };

    let reply = ctx.coordinator.run_turn(&request.session_id, &text).await;
    let assistant_audio = synthesize_reply(&ctx, &reply.assistant_text).await;
    Ok(warp::reply::with_status(
        warp::reply::json(&to_response(reply, assistant_audio)),
        StatusCode::OK,
    ))
}

/// Synthesis is best effort: a slow or broken synthesizer degrades the
/// response to text-only rather than failing the turn.
async fn synthesize_reply(ctx: &ApiContext, text: &str) -> Option<String> {
    let synthesized = timeout(
        Duration::from_secs(SPEECH_TIMEOUT_SECONDS),
        ctx.tts.synthesize(text, &ctx.voice),
    )
    .await;
    match synthesized {
        Ok(Ok(audio)) => Some(BASE64.encode(audio)),
        Ok(Err(e)) => {
            warn!(error = %e, "speech synthesis failed");
            None
        }
        Err(_) => {
            warn!("speech synthesis timed out");
            None
        }
    }
}

fn to_response(reply: TurnReply, assistant_audio: Option<String>) -> TurnResponse {
    let conflicting_events = if reply.conflicting_events.is_empty() {
        None
    } else {
        Some(
            reply
                .conflicting_events
                .iter()
                .map(|event| ConflictingEventPayload {
                    title: event.title.clone(),
                    start: event.interval.start().to_rfc3339(),
                    end: event.interval.end().to_rfc3339(),
                })
                .collect(),
        )
    };
    TurnResponse {
        assistant_text: reply.assistant_text,
        assistant_audio,
        event_committed: reply.event_committed,
        conflicting_events,
        requires_login: reply.requires_login,
    }
}

async fn handle_login(ctx: ApiContext) -> Result<JsonReply, warp::Rejection> {
    match ctx.auth.begin_interactive_login().await {
        Ok(()) => {
            ctx.bus.emit(TurnEvent::LoginCompleted).await;
            Ok(warp::reply::with_status(
                warp::reply::json(&serde_json::json!({ "logged_in": true })),
                StatusCode::OK,
            ))
        }
        Err(e) => Ok(error_reply(StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

async fn handle_health(ctx: ApiContext) -> Result<JsonReply, warp::Rejection> {
    let snapshot = ctx.cache.load().await;
    let age_seconds = (Utc::now() - snapshot.captured_at()).num_seconds();
    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "status": "ok",
            "snapshot_age_seconds": age_seconds,
            "events_cached": snapshot.events().len(),
        })),
        StatusCode::OK,
    ))
}
