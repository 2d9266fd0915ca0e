//! funnel-api library
//!
//! HTTP surface of the acquisition funnel: landing page tracking, dashboard
//! CRUD and analytics, the email CRM proxy and the voice relay socket.

use axum::Router;
use funnel_common::analytics::Analytics;
use funnel_common::config::{TomlConfig, VoiceConfig};
use funnel_common::crm::CrmClient;
use funnel_common::dashboard::Dashboard;
use funnel_common::db::FunnelStore;
use funnel_common::events::EventBus;
use funnel_common::tracking::{PixelDispatcher, Tracker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

pub mod api;
pub mod error;
pub mod relay;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub analytics: Arc<Analytics>,
    pub dashboard: Arc<Dashboard>,
    pub crm: Arc<CrmClient>,
    pub event_bus: EventBus,
    pub voice: Arc<VoiceConfig>,
    /// Pre-built landing pages served for any unmatched path
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    /// Wire every service onto `store` using the resolved configuration
    pub fn new(store: Arc<dyn FunnelStore>, config: &TomlConfig) -> funnel_common::Result<Self> {
        let event_bus = EventBus::new(config.server.event_capacity);
        let pixels = PixelDispatcher::from_config(&config.pixels)?;
        let tracker = Tracker::new(
            Arc::clone(&store),
            pixels,
            event_bus.clone(),
            config.tracking.hash_salt.clone(),
        );
        let dashboard = Dashboard::new(
            Arc::clone(&store),
            event_bus.clone(),
            Duration::from_secs(config.server.cache_ttl_secs),
        );
        let crm = CrmClient::new(config.crm.clone())?;

        Ok(Self {
            tracker: Arc::new(tracker),
            analytics: Arc::new(Analytics::new(store)),
            dashboard: Arc::new(dashboard),
            crm: Arc::new(crm),
            event_bus,
            voice: Arc::new(config.voice.clone()),
            static_dir: config.server.static_dir.clone(),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, patch, post, put};
    use crate::api::{analytics, crm, dashboard, track};

    let tracking = Router::new()
        .route("/api/track/pageview", post(track::track_pageview))
        .route("/api/track/lead", post(track::track_lead))
        .route("/api/track/click", post(track::track_click))
        .route("/api/track/event", post(track::track_event));

    let reports = Router::new()
        .route("/api/analytics/conversion", get(analytics::conversion))
        .route("/api/analytics/funnel", get(analytics::funnel))
        .route("/api/analytics/traffic-sources", get(analytics::traffic_sources))
        .route("/api/analytics/traffic-over-time", get(analytics::traffic_over_time))
        .route("/api/analytics/conversion-over-time", get(analytics::conversion_over_time))
        .route("/api/analytics/dm-campaigns", get(analytics::dm_campaigns))
        .route("/api/analytics/performance", get(analytics::performance))
        .route("/api/analytics/email-summary", get(analytics::email_summary))
        .route("/api/analytics/recent-activity", get(analytics::recent_activity));

    let crud = Router::new()
        .route(
            "/api/scheduled-posts",
            get(dashboard::list_scheduled_posts).post(dashboard::create_scheduled_post),
        )
        .route(
            "/api/scheduled-posts/:id",
            patch(dashboard::update_scheduled_post).delete(dashboard::delete_scheduled_post),
        )
        .route(
            "/api/scheduled-posts/:id/status",
            put(dashboard::set_scheduled_post_status),
        )
        .route(
            "/api/redgifs",
            get(dashboard::list_redgifs).post(dashboard::create_redgifs),
        )
        .route(
            "/api/redgifs/:id",
            patch(dashboard::update_redgifs).delete(dashboard::delete_redgifs),
        )
        .route(
            "/api/dm-campaigns",
            get(dashboard::list_dm_campaigns).post(dashboard::create_dm_campaign),
        )
        .route(
            "/api/dm-campaigns/:id",
            patch(dashboard::update_dm_campaign).delete(dashboard::delete_dm_campaign),
        )
        .route(
            "/api/conversions",
            get(dashboard::list_conversions).post(dashboard::create_conversion),
        )
        .route(
            "/api/conversions/:id",
            patch(dashboard::update_conversion).delete(dashboard::delete_conversion),
        );

    let public = Router::new()
        .route("/api/subscribe", post(crm::subscribe))
        .route("/api/update-status", post(crm::update_status))
        .route("/api/events", get(api::event_stream))
        .route("/api/buildinfo", get(api::get_build_info))
        .route("/voice", get(api::voice_socket))
        .merge(api::health_routes());

    let static_dir = state.static_dir.clone();

    let router = Router::new()
        .merge(tracking)
        .merge(reports)
        .merge(crud)
        .merge(public)
        .with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
