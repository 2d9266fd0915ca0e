//! Operator-entered dashboard data
//!
//! Lists are read through a [`QueryCache`]. Every successful mutation drops
//! the cache entries of the scopes it affects and announces the scope on the
//! [`EventBus`] so connected dashboards refetch. A failed mutation leaves the
//! cache alone. Concurrent edits are last-write-wins.

pub mod cache;

pub use cache::QueryCache;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::db::{
    fetch_records, insert_row, update_row, Conversion, ConversionInsert, ConversionPatch,
    DmCampaign, DmCampaignInsert, DmCampaignPatch, FunnelStore, PostStatus, Record,
    RedgifsAsset, RedgifsAssetInsert, RedgifsAssetPatch, ScheduledPost, ScheduledPostInsert,
    ScheduledPostPatch, Select, Table,
};
use crate::events::{EventBus, FunnelEvent};
use crate::time::{self, TimeRange};
use crate::{Error, Result};

/// Query scopes shared by the cache and invalidation events
pub mod scope {
    pub const SCHEDULED_POSTS: &str = "scheduled-posts";
    pub const REDGIFS: &str = "redgifs";
    pub const DM_CAMPAIGNS: &str = "dm-campaigns";
    pub const CONVERSIONS: &str = "conversions";
    pub const CONVERSION_ANALYTICS: &str = "conversion-analytics";
    pub const TRAFFIC_SOURCES: &str = "traffic-sources";
}

const POST_SCOPES: &[&str] = &[scope::SCHEDULED_POSTS];
const REDGIFS_SCOPES: &[&str] = &[scope::REDGIFS];
const DM_SCOPES: &[&str] = &[scope::DM_CAMPAIGNS];
const CONVERSION_SCOPES: &[&str] = &[
    scope::CONVERSIONS,
    scope::CONVERSION_ANALYTICS,
    scope::TRAFFIC_SOURCES,
];

/// Default window for the conversion batch list
pub const DEFAULT_CONVERSION_RANGE: TimeRange = TimeRange::Month;

fn ensure_non_negative(field: &str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(Error::InvalidInput(format!("{} must not be negative", field)));
    }
    Ok(())
}

fn ensure_present(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}

pub struct Dashboard {
    store: Arc<dyn FunnelStore>,
    cache: QueryCache,
    events: EventBus,
}

impl Dashboard {
    pub fn new(store: Arc<dyn FunnelStore>, events: EventBus, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache: QueryCache::new(cache_ttl),
            events,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn store(&self) -> &dyn FunnelStore {
        self.store.as_ref()
    }

    async fn invalidate(&self, scopes: &[&str]) {
        for &scope in scopes {
            let dropped = self.cache.invalidate(scope).await;
            info!(scope, dropped, "query invalidated");
            self.events.emit_lossy(FunnelEvent::QueryInvalidated {
                scope: scope.to_string(),
                timestamp: time::now(),
            });
        }
    }

    async fn list<R>(&self, scope: &str, params: &str, query: Select) -> Result<Vec<R>>
    where
        R: Record + Serialize,
    {
        self.cache
            .get_or_load(scope, params, || async {
                fetch_records::<R>(self.store(), &query).await
            })
            .await
    }

    async fn remove(&self, table: Table, id: i64, scopes: &[&str]) -> Result<()> {
        let removed = self.store().delete(table, id).await?;
        if removed == 0 {
            return Err(Error::NotFound(format!("{} row {}", table, id)));
        }
        self.invalidate(scopes).await;
        Ok(())
    }

    // ========================================
    // Scheduled posts
    // ========================================

    /// All posts, soonest first
    pub async fn scheduled_posts(&self) -> Result<Vec<ScheduledPost>> {
        self.list(
            scope::SCHEDULED_POSTS,
            "",
            Select::from(Table::ScheduledPosts).order("scheduled_at", true),
        )
        .await
    }

    pub async fn add_scheduled_post(&self, post: ScheduledPostInsert) -> Result<ScheduledPost> {
        ensure_present("platform", &post.platform)?;
        ensure_present("title", &post.title)?;
        let stored: ScheduledPost = insert_row(self.store(), &post.normalized()).await?;
        self.invalidate(POST_SCOPES).await;
        Ok(stored)
    }

    pub async fn update_scheduled_post(&self, id: i64, patch: ScheduledPostPatch) -> Result<ScheduledPost> {
        let stored: ScheduledPost = update_row(self.store(), id, &patch).await?;
        self.invalidate(POST_SCOPES).await;
        Ok(stored)
    }

    /// Record the outcome of a manual publication
    pub async fn set_post_status(
        &self,
        id: i64,
        status: PostStatus,
        posted_url: Option<String>,
    ) -> Result<ScheduledPost> {
        let patch = ScheduledPostPatch {
            status: Some(status),
            posted_url: posted_url.map(Some),
            ..ScheduledPostPatch::default()
        };
        self.update_scheduled_post(id, patch).await
    }

    pub async fn delete_scheduled_post(&self, id: i64) -> Result<()> {
        self.remove(Table::ScheduledPosts, id, POST_SCOPES).await
    }

    // ========================================
    // RedGifs gallery
    // ========================================

    /// All assets, newest first
    pub async fn redgifs_assets(&self) -> Result<Vec<RedgifsAsset>> {
        self.list(
            scope::REDGIFS,
            "",
            Select::from(Table::Redgifs).order("created_at", false),
        )
        .await
    }

    pub async fn add_redgifs_asset(&self, asset: RedgifsAssetInsert) -> Result<RedgifsAsset> {
        ensure_present("title", &asset.title)?;
        ensure_non_negative("views", asset.views)?;
        ensure_non_negative("likes", asset.likes)?;
        let stored: RedgifsAsset = insert_row(self.store(), &asset).await?;
        self.invalidate(REDGIFS_SCOPES).await;
        Ok(stored)
    }

    pub async fn update_redgifs_asset(&self, id: i64, patch: RedgifsAssetPatch) -> Result<RedgifsAsset> {
        if let Some(views) = patch.views {
            ensure_non_negative("views", views)?;
        }
        if let Some(likes) = patch.likes {
            ensure_non_negative("likes", likes)?;
        }
        let stored: RedgifsAsset = update_row(self.store(), id, &patch).await?;
        self.invalidate(REDGIFS_SCOPES).await;
        Ok(stored)
    }

    pub async fn delete_redgifs_asset(&self, id: i64) -> Result<()> {
        self.remove(Table::Redgifs, id, REDGIFS_SCOPES).await
    }

    // ========================================
    // DM campaigns
    // ========================================

    /// Raw campaign entries, newest first
    pub async fn dm_campaigns(&self) -> Result<Vec<DmCampaign>> {
        self.list(
            scope::DM_CAMPAIGNS,
            "",
            Select::from(Table::DmCampaigns).order("created_at", false),
        )
        .await
    }

    pub async fn add_dm_campaign(&self, campaign: DmCampaignInsert) -> Result<DmCampaign> {
        ensure_present("platform", &campaign.platform)?;
        ensure_non_negative("dms_sent", campaign.dms_sent)?;
        ensure_non_negative("responses", campaign.responses)?;
        let stored: DmCampaign = insert_row(self.store(), &campaign).await?;
        self.invalidate(DM_SCOPES).await;
        Ok(stored)
    }

    pub async fn update_dm_campaign(&self, id: i64, patch: DmCampaignPatch) -> Result<DmCampaign> {
        if let Some(sent) = patch.dms_sent {
            ensure_non_negative("dms_sent", sent)?;
        }
        if let Some(responses) = patch.responses {
            ensure_non_negative("responses", responses)?;
        }
        let stored: DmCampaign = update_row(self.store(), id, &patch).await?;
        self.invalidate(DM_SCOPES).await;
        Ok(stored)
    }

    pub async fn delete_dm_campaign(&self, id: i64) -> Result<()> {
        self.remove(Table::DmCampaigns, id, DM_SCOPES).await
    }

    // ========================================
    // Conversion batches
    // ========================================

    /// Batches created within `range`, newest first
    pub async fn conversions(&self, range: TimeRange) -> Result<Vec<Conversion>> {
        self.list(
            scope::CONVERSIONS,
            range.token(),
            Select::from(Table::Conversions)
                .since(range.cutoff(time::now()))
                .order("created_at", false),
        )
        .await
    }

    pub async fn add_conversion(&self, batch: ConversionInsert) -> Result<Conversion> {
        ensure_non_negative("new_subs", batch.new_subs)?;
        let stored: Conversion = insert_row(self.store(), &batch).await?;
        info!(new_subs = stored.new_subs, source = ?stored.attributed_source, "conversion batch recorded");
        self.invalidate(CONVERSION_SCOPES).await;
        Ok(stored)
    }

    pub async fn update_conversion(&self, id: i64, patch: ConversionPatch) -> Result<Conversion> {
        if let Some(subs) = patch.new_subs {
            ensure_non_negative("new_subs", subs)?;
        }
        let stored: Conversion = update_row(self.store(), id, &patch).await?;
        self.invalidate(CONVERSION_SCOPES).await;
        Ok(stored)
    }

    pub async fn delete_conversion(&self, id: i64) -> Result<()> {
        self.remove(Table::Conversions, id, CONVERSION_SCOPES).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::Value;
    use tokio::sync::broadcast::Receiver;

    fn dashboard() -> (Dashboard, Arc<MemoryStore>, Receiver<FunnelEvent>) {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new(32);
        let rx = events.subscribe();
        let dashboard = Dashboard::new(store.clone(), events, Duration::from_secs(30));
        (dashboard, store, rx)
    }

    fn post(platform: &str, hours_ahead: i64) -> ScheduledPostInsert {
        ScheduledPostInsert {
            scheduled_at: Utc::now() + ChronoDuration::hours(hours_ahead),
            platform: platform.to_string(),
            title: format!("{} teaser", platform),
            body: None,
            post_type: "image".to_string(),
            subreddit: Some("example".to_string()),
            status: PostStatus::Scheduled,
            posted_url: None,
        }
    }

    fn drain_scopes(rx: &mut Receiver<FunnelEvent>) -> Vec<String> {
        let mut scopes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let FunnelEvent::QueryInvalidated { scope, .. } = event {
                scopes.push(scope);
            }
        }
        scopes
    }

    #[tokio::test]
    async fn test_posts_listed_soonest_first() {
        let (dashboard, _, _) = dashboard();
        dashboard.add_scheduled_post(post("twitter", 5)).await.unwrap();
        dashboard.add_scheduled_post(post("reddit", 1)).await.unwrap();

        let posts = dashboard.scheduled_posts().await.unwrap();
        assert_eq!(posts[0].platform, "reddit");
        assert_eq!(posts[0].subreddit.as_deref(), Some("example"));
        assert!(posts[1].subreddit.is_none());
    }

    #[tokio::test]
    async fn test_delete_post_removes_one_row_and_invalidates_its_scope() {
        let (dashboard, store, mut rx) = dashboard();
        let first = dashboard.add_scheduled_post(post("reddit", 1)).await.unwrap();
        dashboard.add_scheduled_post(post("tiktok", 2)).await.unwrap();
        dashboard.redgifs_assets().await.unwrap();
        dashboard.scheduled_posts().await.unwrap();
        drain_scopes(&mut rx);

        dashboard.delete_scheduled_post(first.id).await.unwrap();

        assert_eq!(store.row_count(Table::ScheduledPosts).await, 1);
        assert_eq!(drain_scopes(&mut rx), vec!["scheduled-posts".to_string()]);
        assert!(!dashboard.cache().contains(scope::SCHEDULED_POSTS, "").await);
        assert!(dashboard.cache().contains(scope::REDGIFS, "").await);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_not_found_and_invalidates_nothing() {
        let (dashboard, _, mut rx) = dashboard();
        let err = dashboard.delete_scheduled_post(404).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(drain_scopes(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_set_post_status() {
        let (dashboard, _, _) = dashboard();
        let stored = dashboard.add_scheduled_post(post("reddit", 1)).await.unwrap();

        let updated = dashboard
            .set_post_status(stored.id, PostStatus::Posted, Some("https://reddit.com/r/x/1".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.status, PostStatus::Posted);
        assert_eq!(updated.title, stored.title);
        assert_eq!(updated.posted_url.as_deref(), Some("https://reddit.com/r/x/1"));
    }

    #[tokio::test]
    async fn test_list_is_cached_until_mutation() {
        let (dashboard, store, _) = dashboard();
        assert!(dashboard.redgifs_assets().await.unwrap().is_empty());

        // Written behind the dashboard's back: the cached list stays stale
        store
            .insert(Table::Redgifs, serde_json::json!({"title": "side door"}))
            .await
            .unwrap();
        assert!(dashboard.redgifs_assets().await.unwrap().is_empty());

        let asset: RedgifsAssetInsert = serde_json::from_value(serde_json::json!({"title": "clip"})).unwrap();
        dashboard.add_redgifs_asset(asset).await.unwrap();
        let assets = dashboard.redgifs_assets().await.unwrap();
        assert_eq!(assets.len(), 2);
        assert!(assets.iter().any(|a| a.title == "clip"));
        assert!(assets.iter().all(|a| a.category == "Preview" && a.status == "processing"));
    }

    /// Store whose first select parks after reading its rows until released
    struct ParkedSelectStore {
        inner: MemoryStore,
        park: std::sync::Mutex<Option<(tokio::sync::oneshot::Sender<()>, tokio::sync::oneshot::Receiver<()>)>>,
    }

    #[async_trait::async_trait]
    impl FunnelStore for ParkedSelectStore {
        async fn select(&self, query: &Select) -> Result<Vec<Value>> {
            let rows = self.inner.select(query).await?;
            let park = self.park.lock().unwrap().take();
            if let Some((started, gate)) = park {
                let _ = started.send(());
                let _ = gate.await;
            }
            Ok(rows)
        }

        async fn count(&self, query: &Select) -> Result<u64> {
            self.inner.count(query).await
        }

        async fn insert(&self, table: Table, row: Value) -> Result<Value> {
            self.inner.insert(table, row).await
        }

        async fn update(&self, table: Table, id: i64, patch: Value) -> Result<Value> {
            self.inner.update(table, id, patch).await
        }

        async fn delete(&self, table: Table, id: i64) -> Result<u64> {
            self.inner.delete(table, id).await
        }
    }

    #[tokio::test]
    async fn test_add_during_slow_list_read_is_visible_afterwards() {
        let (started, list_running) = tokio::sync::oneshot::channel();
        let (release, gate) = tokio::sync::oneshot::channel();
        let store = Arc::new(ParkedSelectStore {
            inner: MemoryStore::new(),
            park: std::sync::Mutex::new(Some((started, gate))),
        });
        let dashboard = Dashboard::new(store, EventBus::new(8), Duration::from_secs(30));

        let slow_list = dashboard.redgifs_assets();
        let add = async {
            let _ = list_running.await;
            let asset: RedgifsAssetInsert =
                serde_json::from_value(serde_json::json!({"title": "clip"})).unwrap();
            dashboard.add_redgifs_asset(asset).await.unwrap();
            let _ = release.send(());
        };
        let (before_add, ()) = tokio::join!(slow_list, add);
        assert!(before_add.unwrap().is_empty());

        let listed = dashboard.redgifs_assets().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "clip");
    }

    #[tokio::test]
    async fn test_conversion_mutations_invalidate_analytics_scopes() {
        let (dashboard, _, mut rx) = dashboard();
        let batch = dashboard
            .add_conversion(ConversionInsert {
                new_subs: 3,
                attributed_source: Some("reddit".to_string()),
                ..ConversionInsert::default()
            })
            .await
            .unwrap();
        assert_eq!(
            drain_scopes(&mut rx),
            vec!["conversions", "conversion-analytics", "traffic-sources"]
        );

        let listed = dashboard.conversions(DEFAULT_CONVERSION_RANGE).await.unwrap();
        assert_eq!(listed.len(), 1);

        dashboard.delete_conversion(batch.id).await.unwrap();
        assert!(dashboard.conversions(TimeRange::Week).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_in_patch_clears_only_that_column() {
        let (dashboard, _, _) = dashboard();
        let batch = dashboard
            .add_conversion(ConversionInsert {
                new_subs: 2,
                attributed_source: Some("reddit".to_string()),
                notes: Some("typo".to_string()),
                ..ConversionInsert::default()
            })
            .await
            .unwrap();

        let patch: ConversionPatch = serde_json::from_value(serde_json::json!({ "notes": null })).unwrap();
        let updated = dashboard.update_conversion(batch.id, patch).await.unwrap();
        assert!(updated.notes.is_none());
        assert_eq!(updated.attributed_source.as_deref(), Some("reddit"));
        assert_eq!(updated.new_subs, 2);
    }

    #[tokio::test]
    async fn test_rejected_mutation_changes_nothing() {
        let (dashboard, store, mut rx) = dashboard();
        let err = dashboard
            .add_dm_campaign(DmCampaignInsert {
                platform: "reddit".to_string(),
                dms_sent: -1,
                responses: 0,
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(store.row_count(Table::DmCampaigns).await, 0);
        assert!(drain_scopes(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_campaign_is_not_found() {
        let (dashboard, _, _) = dashboard();
        let patch = DmCampaignPatch {
            responses: Some(4),
            ..DmCampaignPatch::default()
        };
        assert!(matches!(
            dashboard.update_dm_campaign(9, patch).await,
            Err(Error::NotFound(_))
        ));
    }
}
