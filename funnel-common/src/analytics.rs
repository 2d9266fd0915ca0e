//! Funnel aggregation
//!
//! Every query re-reads its full filtered range from the backend and folds
//! it in memory. Nothing is cached or computed incrementally. The folding
//! itself lives in plain functions over row slices so it can be checked
//! without a store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::db::models::null_as_default;
use crate::db::{fetch, fetch_records, DmCampaign, FunnelStore, Select, Table};
use crate::time::{self, day_label, TimeRange};
use crate::tracking::mask_email;
use crate::Result;

/// Source bucket for visits without attribution
pub const DIRECT: &str = "direct";

/// Platforms always present in the DM campaign summary
pub const DM_PLATFORMS: [&str; 4] = ["reddit", "instagram", "twitter", "tiktok"];

const RECENT_ACTIVITY_LIMIT: usize = 10;

/// `numerator / denominator`, 0 for an empty denominator, clamped to `[0, 1]`
pub fn rate(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        (numerator / denominator).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Attribution value with missing or empty mapped to `direct`
pub fn source_or_direct(source: Option<&str>) -> String {
    match source.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => DIRECT.to_string(),
    }
}

// ========================================
// Results
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionAnalytics {
    pub bridge_visits: u64,
    pub of_clicks: u64,
    /// Sum of `new_subs` over conversion batches in range
    pub conversions: i64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStage {
    pub stage: String,
    pub count: i64,
    /// Share of the previous stage that reached this one
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSourceRow {
    pub source: String,
    pub visits: u64,
    pub conversions: i64,
    pub conversion_rate: f64,
}

/// Pageviews per day, split by the charted sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficDayRow {
    pub day: NaiveDate,
    /// Chart label, e.g. `Oct 18`
    pub date: String,
    pub reddit: u64,
    pub redgifs: u64,
    pub instagram: u64,
    pub twitter: u64,
    pub tiktok: u64,
    pub tubesites: u64,
    pub direct: u64,
}

impl TrafficDayRow {
    fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            date: day_label(day),
            reddit: 0,
            redgifs: 0,
            instagram: 0,
            twitter: 0,
            tiktok: 0,
            tubesites: 0,
            direct: 0,
        }
    }

    /// Count one visit; uncharted sources land in `direct`
    fn add(&mut self, source: &str) {
        let slot = match source.to_lowercase().as_str() {
            "reddit" => &mut self.reddit,
            "redgifs" => &mut self.redgifs,
            "instagram" => &mut self.instagram,
            "twitter" => &mut self.twitter,
            "tiktok" => &mut self.tiktok,
            "tubesites" => &mut self.tubesites,
            _ => &mut self.direct,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u64 {
        self.reddit
            + self.redgifs
            + self.instagram
            + self.twitter
            + self.tiktok
            + self.tubesites
            + self.direct
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionDayRow {
    pub day: NaiveDate,
    pub date: String,
    pub visitors: u64,
    pub leads: u64,
    pub clicks: u64,
    pub subs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmCampaignSummary {
    pub platform: String,
    pub total_sent: i64,
    pub total_responses: i64,
    pub response_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSignupSummary {
    pub total_signups: u64,
    pub signups_this_week: u64,
    pub open_rate: f64,
    pub click_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub bridge_visits: u64,
    pub email_signups: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Lead,
    Click,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentActivityItem {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub detail: String,
    pub time: DateTime<Utc>,
    pub source: String,
}

// ========================================
// Row projections
// ========================================

#[derive(Debug, Deserialize)]
struct Stamp {
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SourcedStamp {
    created_at: DateTime<Utc>,
    #[serde(default)]
    utm_source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversionSlice {
    created_at: DateTime<Utc>,
    #[serde(default)]
    attributed_source: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    new_subs: i64,
}

#[derive(Debug, Deserialize)]
struct Engagement {
    #[serde(default, deserialize_with = "null_as_default")]
    opened: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    clicked: bool,
}

#[derive(Debug, Deserialize)]
struct SignupSlice {
    created_at: DateTime<Utc>,
    email: String,
    #[serde(default)]
    source: Option<String>,
}

// ========================================
// Folds
// ========================================

/// Four fixed stages: visits, leads, clicks, subscriptions
pub fn build_funnel(visits: u64, leads: u64, clicks: u64, subs: i64) -> Vec<FunnelStage> {
    let counts = [
        ("visits", visits as i64),
        ("leads", leads as i64),
        ("clicks", clicks as i64),
        ("subscriptions", subs),
    ];
    let mut previous: Option<i64> = None;
    counts
        .into_iter()
        .map(|(stage, count)| {
            let base = previous.unwrap_or(count);
            previous = Some(count);
            FunnelStage {
                stage: stage.to_string(),
                count,
                rate: rate(count as f64, base as f64),
            }
        })
        .collect()
}

/// Visits and conversions per source, busiest first
///
/// `pageview_sources` holds each pageview's `utm_source`; `conversions`
/// holds `(attributed_source, new_subs)` per batch.
pub fn summarize_traffic_sources(
    pageview_sources: &[Option<String>],
    conversions: &[(Option<String>, i64)],
) -> Vec<TrafficSourceRow> {
    let mut buckets: BTreeMap<String, (u64, i64)> = BTreeMap::new();
    for source in pageview_sources {
        buckets.entry(source_or_direct(source.as_deref())).or_default().0 += 1;
    }
    for (source, subs) in conversions {
        buckets.entry(source_or_direct(source.as_deref())).or_default().1 += subs;
    }

    let mut rows: Vec<TrafficSourceRow> = buckets
        .into_iter()
        .map(|(source, (visits, conversions))| TrafficSourceRow {
            source,
            visits,
            conversions,
            conversion_rate: rate(conversions as f64, visits as f64),
        })
        .collect();
    rows.sort_by(|a, b| b.visits.cmp(&a.visits));
    rows
}

/// One zero-filled row per day, then count each pageview into its day
///
/// Pageviews outside `days` are ignored.
pub fn bucket_traffic(
    days: &[NaiveDate],
    pageviews: &[(DateTime<Utc>, Option<String>)],
) -> Vec<TrafficDayRow> {
    let mut rows: Vec<TrafficDayRow> = days.iter().copied().map(TrafficDayRow::empty).collect();
    let index: HashMap<NaiveDate, usize> = days.iter().enumerate().map(|(i, d)| (*d, i)).collect();

    for (created_at, source) in pageviews {
        if let Some(&i) = index.get(&created_at.date_naive()) {
            rows[i].add(&source_or_direct(source.as_deref()));
        }
    }
    rows
}

/// Daily visitors, leads, clicks and new subscriptions
pub fn bucket_conversions(
    days: &[NaiveDate],
    pageviews: &[DateTime<Utc>],
    signups: &[DateTime<Utc>],
    clicks: &[DateTime<Utc>],
    conversions: &[(DateTime<Utc>, i64)],
) -> Vec<ConversionDayRow> {
    let mut rows: Vec<ConversionDayRow> = days
        .iter()
        .map(|&day| ConversionDayRow {
            day,
            date: day_label(day),
            visitors: 0,
            leads: 0,
            clicks: 0,
            subs: 0,
        })
        .collect();
    let index: HashMap<NaiveDate, usize> = days.iter().enumerate().map(|(i, d)| (*d, i)).collect();
    let slot = |ts: &DateTime<Utc>| index.get(&ts.date_naive()).copied();

    for ts in pageviews {
        if let Some(i) = slot(ts) {
            rows[i].visitors += 1;
        }
    }
    for ts in signups {
        if let Some(i) = slot(ts) {
            rows[i].leads += 1;
        }
    }
    for ts in clicks {
        if let Some(i) = slot(ts) {
            rows[i].clicks += 1;
        }
    }
    for (ts, subs) in conversions {
        if let Some(i) = slot(ts) {
            rows[i].subs += subs;
        }
    }
    rows
}

/// Totals for each fixed DM platform; other platforms are left out
pub fn summarize_dm_campaigns(campaigns: &[DmCampaign]) -> Vec<DmCampaignSummary> {
    let mut totals: HashMap<&str, (i64, i64)> = HashMap::new();
    for campaign in campaigns {
        let entry = totals.entry(campaign.platform.as_str()).or_default();
        entry.0 += campaign.dms_sent;
        entry.1 += campaign.responses;
    }

    DM_PLATFORMS
        .iter()
        .map(|&platform| {
            let (sent, responses) = totals.get(platform).copied().unwrap_or_default();
            DmCampaignSummary {
                platform: platform.to_string(),
                total_sent: sent,
                total_responses: responses,
                response_rate: rate(responses as f64, sent as f64),
            }
        })
        .collect()
}

/// Newest leads and clicks interleaved, newest first, at most ten
pub fn merge_recent_activity(
    leads: Vec<RecentActivityItem>,
    clicks: Vec<RecentActivityItem>,
) -> Vec<RecentActivityItem> {
    let mut items: Vec<RecentActivityItem> = leads.into_iter().chain(clicks).collect();
    items.sort_by(|a, b| b.time.cmp(&a.time));
    items.truncate(RECENT_ACTIVITY_LIMIT);
    items
}

// ========================================
// Queries
// ========================================

pub struct Analytics {
    store: Arc<dyn FunnelStore>,
}

impl Analytics {
    pub fn new(store: Arc<dyn FunnelStore>) -> Self {
        Self { store }
    }

    fn store(&self) -> &dyn FunnelStore {
        self.store.as_ref()
    }

    async fn count_since(&self, table: Table, range: TimeRange, now: DateTime<Utc>) -> Result<u64> {
        self.store()
            .count(&Select::from(table).since(range.cutoff(now)))
            .await
    }

    async fn conversions_since(&self, range: TimeRange, now: DateTime<Utc>) -> Result<Vec<ConversionSlice>> {
        fetch(
            self.store(),
            &Select::from(Table::Conversions)
                .columns(&["created_at", "attributed_source", "new_subs"])
                .since(range.cutoff(now)),
        )
        .await
    }

    async fn stamps_since(&self, table: Table, range: TimeRange, now: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let rows: Vec<Stamp> = fetch(
            self.store(),
            &Select::from(table)
                .columns(&["created_at"])
                .since(range.cutoff(now)),
        )
        .await?;
        Ok(rows.into_iter().map(|r| r.created_at).collect())
    }

    pub async fn conversion_analytics(&self, range: TimeRange) -> Result<ConversionAnalytics> {
        let now = time::now();
        let (bridge_visits, of_clicks, batches) = tokio::try_join!(
            self.count_since(Table::Pageviews, range, now),
            self.count_since(Table::OutboundClicks, range, now),
            self.conversions_since(range, now),
        )?;
        let conversions: i64 = batches.iter().map(|b| b.new_subs).sum();

        debug!(range = %range, bridge_visits, of_clicks, conversions, "conversion analytics");
        Ok(ConversionAnalytics {
            bridge_visits,
            of_clicks,
            conversions,
            conversion_rate: rate(conversions as f64, bridge_visits as f64),
        })
    }

    pub async fn conversion_funnel(&self, range: TimeRange) -> Result<Vec<FunnelStage>> {
        let now = time::now();
        let (visits, leads, clicks, batches) = tokio::try_join!(
            self.count_since(Table::Pageviews, range, now),
            self.count_since(Table::EmailSignups, range, now),
            self.count_since(Table::OutboundClicks, range, now),
            self.conversions_since(range, now),
        )?;
        let subs = batches.iter().map(|b| b.new_subs).sum();
        Ok(build_funnel(visits, leads, clicks, subs))
    }

    pub async fn traffic_sources(&self, range: TimeRange) -> Result<Vec<TrafficSourceRow>> {
        let now = time::now();
        let pageview_query = Select::from(Table::Pageviews)
            .columns(&["created_at", "utm_source"])
            .since(range.cutoff(now));
        let (pageviews, batches) = tokio::try_join!(
            fetch::<SourcedStamp>(self.store(), &pageview_query),
            self.conversions_since(range, now),
        )?;

        let sources: Vec<Option<String>> = pageviews.into_iter().map(|p| p.utm_source).collect();
        let conversions: Vec<(Option<String>, i64)> = batches
            .into_iter()
            .map(|b| (b.attributed_source, b.new_subs))
            .collect();
        Ok(summarize_traffic_sources(&sources, &conversions))
    }

    pub async fn traffic_over_time(&self, range: TimeRange) -> Result<Vec<TrafficDayRow>> {
        let now = time::now();
        let pageviews: Vec<SourcedStamp> = fetch(
            self.store(),
            &Select::from(Table::Pageviews)
                .columns(&["created_at", "utm_source"])
                .since(range.cutoff(now))
                .order("created_at", true),
        )
        .await?;

        let pairs: Vec<(DateTime<Utc>, Option<String>)> = pageviews
            .into_iter()
            .map(|p| (p.created_at, p.utm_source))
            .collect();
        Ok(bucket_traffic(&range.calendar_days(now), &pairs))
    }

    pub async fn conversion_over_time(&self, range: TimeRange) -> Result<Vec<ConversionDayRow>> {
        let now = time::now();
        let (pageviews, signups, clicks, batches) = tokio::try_join!(
            self.stamps_since(Table::Pageviews, range, now),
            self.stamps_since(Table::EmailSignups, range, now),
            self.stamps_since(Table::OutboundClicks, range, now),
            self.conversions_since(range, now),
        )?;

        let conversions: Vec<(DateTime<Utc>, i64)> =
            batches.into_iter().map(|b| (b.created_at, b.new_subs)).collect();
        Ok(bucket_conversions(
            &range.calendar_days(now),
            &pageviews,
            &signups,
            &clicks,
            &conversions,
        ))
    }

    pub async fn dm_campaign_summary(&self, range: TimeRange) -> Result<Vec<DmCampaignSummary>> {
        let campaigns: Vec<DmCampaign> = fetch_records(
            self.store(),
            &Select::from(Table::DmCampaigns).since(range.cutoff(time::now())),
        )
        .await?;
        Ok(summarize_dm_campaigns(&campaigns))
    }

    /// All-time signup totals plus the last seven days
    pub async fn email_signup_summary(&self) -> Result<EmailSignupSummary> {
        let now = time::now();
        let all_signups = Select::from(Table::EmailSignups);
        let flag_query = Select::from(Table::EmailSignups).columns(&["opened", "clicked"]);
        let (total_signups, signups_this_week, flags) = tokio::try_join!(
            self.store().count(&all_signups),
            self.count_since(Table::EmailSignups, TimeRange::Week, now),
            fetch::<Engagement>(self.store(), &flag_query),
        )?;

        let opens = flags.iter().filter(|f| f.opened).count();
        let clicks = flags.iter().filter(|f| f.clicked).count();
        Ok(EmailSignupSummary {
            total_signups,
            signups_this_week,
            open_rate: rate(opens as f64, total_signups as f64),
            click_rate: rate(clicks as f64, total_signups as f64),
        })
    }

    pub async fn performance_summary(&self, range: TimeRange) -> Result<PerformanceSummary> {
        let now = time::now();
        let (bridge_visits, email_signups) = tokio::try_join!(
            self.count_since(Table::Pageviews, range, now),
            self.count_since(Table::EmailSignups, range, now),
        )?;
        Ok(PerformanceSummary {
            bridge_visits,
            email_signups,
            conversion_rate: rate(email_signups as f64, bridge_visits as f64),
        })
    }

    pub async fn recent_activity(&self) -> Result<Vec<RecentActivityItem>> {
        let signup_query = Select::from(Table::EmailSignups)
            .columns(&["created_at", "email", "source"])
            .order("created_at", false)
            .limit(RECENT_ACTIVITY_LIMIT);
        let click_query = Select::from(Table::OutboundClicks)
            .columns(&["created_at", "utm_source"])
            .order("created_at", false)
            .limit(RECENT_ACTIVITY_LIMIT);
        let (signups, clicks) = tokio::try_join!(
            fetch::<SignupSlice>(self.store(), &signup_query),
            fetch::<SourcedStamp>(self.store(), &click_query),
        )?;

        let leads = signups
            .into_iter()
            .map(|s| RecentActivityItem {
                kind: ActivityKind::Lead,
                detail: mask_email(&s.email),
                time: s.created_at,
                source: source_or_direct(s.source.as_deref()),
            })
            .collect();
        let clicks = clicks
            .into_iter()
            .map(|c| RecentActivityItem {
                kind: ActivityKind::Click,
                detail: "Outbound click".to_string(),
                time: c.created_at,
                source: source_or_direct(c.utm_source.as_deref()),
            })
            .collect();
        Ok(merge_recent_activity(leads, clicks))
    }
}
