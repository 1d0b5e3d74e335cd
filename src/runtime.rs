use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::clients::calendar::{AuthSession, CalendarClient, LocalCalendarClient};
use crate::clients::speech::{SimulatedVoice, VoiceConfig};
use crate::config::AppConfig;
use crate::events::queue::EventBus;
use crate::events::worker;
use crate::handlers::api::{self, ApiContext};
use crate::service::dialogue_flow::Coordinator;
use crate::service::extractor::EventExtractor;
use crate::service::resolver::LocaleGrammar;
use crate::service::session_store::SessionStore;
use crate::service::snapshot_cache::SnapshotCache;
use crate::tasks::refresh_loop;

const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";
const DEFAULT_STATE_DIR: &str = "./auth";
const DEFAULT_PORT: u16 = 5000;
const EVENT_BUS_BUFFER: usize = 16;

/// Wired-up application: the coordinator plus the seams the front ends talk
/// through. Building it also spawns the snapshot refresh worker and the
/// periodic refresh loop.
pub struct AppRuntime {
    pub coordinator: Arc<Coordinator>,
    pub auth: Arc<dyn AuthSession>,
    pub cache: Arc<SnapshotCache>,
    pub bus: EventBus,
}

impl AppRuntime {
    pub async fn build(config: &AppConfig) -> Self {
        let timezone_name = config.get_or("TIMEZONE", DEFAULT_TIMEZONE);
        let timezone: Tz = timezone_name.parse().unwrap_or_else(|_| {
            warn!(%timezone_name, "unknown timezone, falling back to {DEFAULT_TIMEZONE}");
            chrono_tz::Asia::Shanghai
        });

        let state_dir = PathBuf::from(config.get_or("STATE_DIR", DEFAULT_STATE_DIR));
        let client = Arc::new(LocalCalendarClient::new(&state_dir, timezone));
        let calendar: Arc<dyn CalendarClient> = client.clone();
        let auth: Arc<dyn AuthSession> = client;

        let cache = Arc::new(SnapshotCache::empty());
        if let Err(e) = cache.refresh(calendar.as_ref()).await {
            warn!(error = %e, "initial calendar fetch failed, starting with an empty snapshot");
        }

        let (bus, rx) = EventBus::new(EVENT_BUS_BUFFER);
        tokio::spawn(worker::run_refresh_worker(
            rx,
            cache.clone(),
            calendar.clone(),
        ));
        tokio::spawn(refresh_loop::run_refresh_loop(
            cache.clone(),
            calendar.clone(),
        ));

        let grammar = LocaleGrammar::new(
            config.get_u32_or("DEFAULT_DURATION_MINUTES", 60) as i64,
            config.get_u32_or("DEFAULT_START_HOUR", 10),
            8,
            19,
        );
        let coordinator = Arc::new(Coordinator::new(
            EventExtractor::new(grammar),
            cache.clone(),
            calendar,
            auth.clone(),
            Arc::new(SessionStore::new()),
            bus.clone(),
            timezone,
        ));

        Self {
            coordinator,
            auth,
            cache,
            bus,
        }
    }
}

pub async fn run_api(config: &AppConfig) {
    let runtime = AppRuntime::build(config).await;
    let voice = Arc::new(SimulatedVoice::new());
    let ctx = ApiContext {
        coordinator: runtime.coordinator,
        stt: voice.clone(),
        tts: voice,
        auth: runtime.auth,
        cache: runtime.cache,
        bus: runtime.bus,
        voice: VoiceConfig::default(),
    };

    let port = config.get_u16_or("PORT", DEFAULT_PORT);
    info!(%port, "voice calendar API listening");
    warp::serve(api::routes(ctx)).run(([0, 0, 0, 0], port)).await;
}
