//! Event ingestion
//!
//! A [`TrackingSession`] stands for one page load: it owns the visitor's
//! session token and the UTM tags of the landing URL, records exactly one
//! pageview, and then records leads and outbound clicks against the same
//! session. Every recorded event is written to the hosted backend and also
//! fired at the configured ad pixels. Pixel calls are fire-and-forget: their
//! failures are logged and never reach the caller.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::PixelConfig;
use crate::db::{
    insert_row, EmailSignup, EmailSignupInsert, FunnelStore, OutboundClick, OutboundClickInsert,
    Pageview, PageviewInsert, Utm,
};
use crate::events::{EventBus, FunnelEvent};
use crate::{time, uuid_utils, Error, Result};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern"));

/// Basic shape check: something@domain.tld, no whitespace
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// `ab***@domain` form used in logs and the activity feed
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let prefix: String = local.chars().take(2).collect();
            format!("{}***@{}", prefix, domain)
        }
        None => "***".to_string(),
    }
}

/// Extract UTM tags from a full URL, a path with a query, or a bare query
pub fn parse_utm(page_url: &str) -> Utm {
    let parsed = Url::parse(page_url).or_else(|_| {
        if page_url.starts_with('?') || page_url.starts_with('/') {
            Url::parse(&format!("http://localhost{}", page_url))
        } else {
            Url::parse(&format!("http://localhost/?{}", page_url))
        }
    });

    let mut utm = Utm::default();
    let Ok(url) = parsed else {
        return utm;
    };
    for (key, value) in url.query_pairs() {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            "utm_source" => utm.utm_source = Some(value.to_string()),
            "utm_medium" => utm.utm_medium = Some(value.to_string()),
            "utm_campaign" => utm.utm_campaign = Some(value.to_string()),
            _ => {}
        }
    }
    utm
}

/// Path component of a page URL (`/` when it cannot be determined)
pub fn page_path(page_url: &str) -> String {
    if let Ok(url) = Url::parse(page_url) {
        return url.path().to_string();
    }
    let path = page_url.split(['?', '#']).next().unwrap_or_default();
    if path.starts_with('/') {
        path.to_string()
    } else {
        "/".to_string()
    }
}

/// Salted visitor fingerprint
///
/// Mixes the session token in, so the hash identifies a visitor within one
/// session only and resets with every new session.
pub fn visitor_hash(
    salt: &str,
    session_id: &str,
    user_agent: &str,
    screen: Option<(u32, u32)>,
) -> String {
    let (width, height) = screen.unwrap_or((0, 0));
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(session_id.as_bytes());
    hasher.update(user_agent.as_bytes());
    hasher.update(width.to_string().as_bytes());
    hasher.update(height.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

// ========================================
// Pixels
// ========================================

/// Conversion event reported to ad pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelEvent {
    PageView,
    Lead,
    OutboundClick,
    Custom(String),
}

impl PixelEvent {
    /// Event name in Meta's vocabulary
    pub fn meta_name(&self) -> &str {
        match self {
            PixelEvent::PageView => "PageView",
            PixelEvent::Lead => "Lead",
            PixelEvent::OutboundClick => "InitiateCheckout",
            PixelEvent::Custom(name) => name,
        }
    }

    /// Event name in TrafficJunky's vocabulary
    pub fn trafficjunky_name(&self) -> &str {
        match self {
            PixelEvent::PageView => "PageView",
            PixelEvent::Lead => "Lead",
            PixelEvent::OutboundClick => "Click",
            PixelEvent::Custom(name) => name,
        }
    }
}

/// Destination for pixel beacons
#[async_trait]
pub trait PixelSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fire(&self, event: &PixelEvent, params: &Value) -> Result<()>;
}

/// Meta pixel via the server-side Conversions API
pub struct MetaPixel {
    http_client: Client,
    endpoint: String,
    access_token: String,
}

impl MetaPixel {
    pub fn new(http_client: Client, pixel_id: &str, access_token: &str, api_version: &str) -> Self {
        Self {
            http_client,
            endpoint: format!("https://graph.facebook.com/{}/{}/events", api_version, pixel_id),
            access_token: access_token.to_string(),
        }
    }
}

#[async_trait]
impl PixelSink for MetaPixel {
    fn name(&self) -> &'static str {
        "meta"
    }

    async fn fire(&self, event: &PixelEvent, params: &Value) -> Result<()> {
        let body = json!({
            "data": [{
                "event_name": event.meta_name(),
                "event_time": time::now().timestamp(),
                "action_source": "website",
                "custom_data": params,
            }]
        });
        self.http_client
            .post(&self.endpoint)
            .query(&[("access_token", &self.access_token)])
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// TrafficJunky image beacon
pub struct TrafficJunkyPixel {
    http_client: Client,
    pixel_id: String,
}

impl TrafficJunkyPixel {
    const BEACON_URL: &'static str = "https://ads.trafficjunky.net/tj_ads_track";

    pub fn new(http_client: Client, pixel_id: &str) -> Self {
        Self {
            http_client,
            pixel_id: pixel_id.to_string(),
        }
    }
}

#[async_trait]
impl PixelSink for TrafficJunkyPixel {
    fn name(&self) -> &'static str {
        "trafficjunky"
    }

    async fn fire(&self, event: &PixelEvent, _params: &Value) -> Result<()> {
        let t = time::now().timestamp_millis().to_string();
        self.http_client
            .get(Self::BEACON_URL)
            .query(&[
                ("pid", self.pixel_id.as_str()),
                ("event", event.trafficjunky_name()),
                ("t", t.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Fans pixel events out to every configured sink
#[derive(Clone, Default)]
pub struct PixelDispatcher {
    sinks: Vec<Arc<dyn PixelSink>>,
}

impl PixelDispatcher {
    pub fn new(sinks: Vec<Arc<dyn PixelSink>>) -> Self {
        Self { sinks }
    }

    /// Sinks for every pixel that has an id configured
    pub fn from_config(config: &PixelConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        let mut sinks: Vec<Arc<dyn PixelSink>> = Vec::new();
        if let (Some(id), Some(token)) = (&config.meta_pixel_id, &config.meta_access_token) {
            sinks.push(Arc::new(MetaPixel::new(
                http_client.clone(),
                id,
                token,
                &config.meta_api_version,
            )));
        }
        if let Some(id) = &config.trafficjunky_id {
            sinks.push(Arc::new(TrafficJunkyPixel::new(http_client, id)));
        }
        info!("Pixel sinks enabled: {}", sinks.len());
        Ok(Self { sinks })
    }

    /// Fire on background tasks; never waits and never fails
    pub fn fire_and_forget(&self, event: PixelEvent, params: Value) {
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let event = event.clone();
            let params = params.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.fire(&event, &params).await {
                    debug!(sink = sink.name(), event = event.meta_name(), "pixel call failed: {}", e);
                }
            });
        }
    }
}

// ========================================
// Ingestion
// ========================================

/// One landing page load as seen by the tracker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Visit {
    pub session_id: String,
    pub page_path: String,
    pub utm: Utm,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub screen: Option<(u32, u32)>,
}

impl Visit {
    /// Visit for `page_url`, reusing `session_id` or minting a new one
    pub fn from_url(session_id: Option<String>, page_url: &str) -> Self {
        Self {
            session_id: session_id
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(uuid_utils::new_session_id),
            page_path: page_path(page_url),
            utm: parse_utm(page_url),
            ..Self::default()
        }
    }
}

/// Writes funnel events to the backend and mirrors them to pixels
pub struct Tracker {
    store: Arc<dyn FunnelStore>,
    pixels: PixelDispatcher,
    events: EventBus,
    hash_salt: String,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn FunnelStore>,
        pixels: PixelDispatcher,
        events: EventBus,
        hash_salt: impl Into<String>,
    ) -> Self {
        Self {
            store,
            pixels,
            events,
            hash_salt: hash_salt.into(),
        }
    }

    pub async fn record_pageview(&self, visit: &Visit) -> Result<Pageview> {
        self.pixels.fire_and_forget(PixelEvent::PageView, Value::Null);

        let hash = visitor_hash(
            &self.hash_salt,
            &visit.session_id,
            visit.user_agent.as_deref().unwrap_or_default(),
            visit.screen,
        );
        let row = PageviewInsert {
            session_id: visit.session_id.clone(),
            visitor_hash: Some(hash),
            page_path: visit.page_path.clone(),
            utm: visit.utm.clone(),
            referrer: visit.referrer.clone().filter(|r| !r.is_empty()),
            user_agent: visit.user_agent.clone(),
        };
        let stored: Pageview = insert_row(self.store.as_ref(), &row).await?;
        debug!(session = %visit.session_id, path = %visit.page_path, "pageview recorded");
        Ok(stored)
    }

    /// Record an email signup with exactly the caller's `source`
    pub async fn record_lead(&self, visit: &Visit, email: &str, source: &str) -> Result<EmailSignup> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(Error::InvalidInput("Please enter a valid email address".to_string()));
        }

        self.pixels.fire_and_forget(
            PixelEvent::Lead,
            json!({"content_name": "Brand Bridge", "content_category": "Email Signup"}),
        );

        let row = EmailSignupInsert {
            email: email.to_string(),
            source: source.to_string(),
            utm: visit.utm.clone(),
            session_id: Some(visit.session_id.clone()),
        };
        let stored: EmailSignup = insert_row(self.store.as_ref(), &row).await?;
        info!(email = %mask_email(email), source, "lead recorded");
        self.events.emit_lossy(FunnelEvent::LeadRecorded {
            session_id: visit.session_id.clone(),
            source: source.to_string(),
            timestamp: time::now(),
        });
        Ok(stored)
    }

    pub async fn record_click(&self, visit: &Visit) -> Result<OutboundClick> {
        self.pixels.fire_and_forget(
            PixelEvent::OutboundClick,
            json!({"content_name": "Outbound CTA", "content_category": "Outbound Click"}),
        );

        let row = OutboundClickInsert {
            session_id: visit.session_id.clone(),
            page_path: visit.page_path.clone(),
            utm: visit.utm.clone(),
        };
        let stored: OutboundClick = insert_row(self.store.as_ref(), &row).await?;
        self.events.emit_lossy(FunnelEvent::ClickRecorded {
            session_id: visit.session_id.clone(),
            utm_source: visit.utm.utm_source.clone(),
            timestamp: time::now(),
        });
        Ok(stored)
    }

    /// Pixel-only event; nothing is persisted
    pub fn track_custom(&self, name: &str, params: Value) {
        self.pixels
            .fire_and_forget(PixelEvent::Custom(name.to_string()), params);
    }
}

/// One page load: a session token plus a one-shot pageview guard
pub struct TrackingSession {
    tracker: Arc<Tracker>,
    visit: Visit,
    tracked: AtomicBool,
}

impl TrackingSession {
    pub fn new(tracker: Arc<Tracker>, visit: Visit) -> Self {
        Self {
            tracker,
            visit,
            tracked: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.visit.session_id
    }

    pub fn visit(&self) -> &Visit {
        &self.visit
    }

    /// Record the pageview; later calls on the same page load do nothing
    pub async fn start(&self) -> Result<Option<Pageview>> {
        if self.tracked.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        self.tracker.record_pageview(&self.visit).await.map(Some)
    }

    pub async fn lead(&self, email: &str, source: &str) -> Result<EmailSignup> {
        self.tracker.record_lead(&self.visit, email, source).await
    }

    pub async fn click(&self) -> Result<OutboundClick> {
        self.tracker.record_click(&self.visit).await
    }

    pub fn custom(&self, name: &str, params: Value) {
        self.tracker.track_custom(name, params);
    }
}
