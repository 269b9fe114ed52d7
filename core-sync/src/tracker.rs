//! # Sync Tracker
//!
//! Durable record of the sync watermark and of every asset's terminal upload
//! status.
//!
//! ## Layout
//!
//! In the shared [`SettingsStore`]:
//! - `enabled_timestamp`: RFC 3339 watermark, absent when sync is disabled
//! - `uploaded_assets`: named set of asset ids
//! - `failed_assets`: named set of asset ids
//!
//! An asset's status is derived from set membership and never stored.
//! Every mutation is a single-member insert or removal performed atomically
//! by the store, so a foreground run and a background cycle writing the same
//! store at once never lose each other's marks.

use crate::{Result, SyncError};
use bridge_traits::{library::AssetRef, storage::SettingsStore, time::Clock};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const ENABLED_TIMESTAMP_KEY: &str = "enabled_timestamp";
pub const UPLOADED_ASSETS_KEY: &str = "uploaded_assets";
pub const FAILED_ASSETS_KEY: &str = "failed_assets";

/// Derived per-asset status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Uploaded,
    Failed,
}

/// Point-in-time copy of the tracker state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub enabled_at: Option<DateTime<Utc>>,
    pub uploaded: HashSet<String>,
    pub failed: HashSet<String>,
}

impl SyncSnapshot {
    pub fn status(&self, asset_id: &str) -> AssetStatus {
        if self.uploaded.contains(asset_id) {
            AssetStatus::Uploaded
        } else if self.failed.contains(asset_id) {
            AssetStatus::Failed
        } else {
            AssetStatus::Pending
        }
    }

    pub fn is_tracked(&self, asset_id: &str) -> bool {
        self.uploaded.contains(asset_id) || self.failed.contains(asset_id)
    }

    /// Whether an asset falls after the watermark
    pub fn in_scope(&self, asset: &AssetRef) -> bool {
        self.enabled_at
            .is_some_and(|enabled_at| asset.created_at > enabled_at)
    }

    /// Aggregate the status of the given in-scope assets.
    pub fn counts<'a>(&self, assets: impl IntoIterator<Item = &'a AssetRef>) -> SyncCounts {
        let mut counts = SyncCounts::default();
        for asset in assets {
            match self.status(&asset.id) {
                AssetStatus::Pending => counts.pending += 1,
                AssetStatus::Uploaded => counts.uploaded += 1,
                AssetStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Display aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub pending: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Result of a prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub uploaded_removed: usize,
    pub failed_removed: usize,
}

pub struct SyncTracker {
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
}

impl SyncTracker {
    pub fn new(settings: Arc<dyn SettingsStore>, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    /// Record a fresh watermark and clear all history.
    ///
    /// Returns the stored watermark, truncated to millisecond precision.
    #[instrument(skip(self))]
    pub async fn enable_tracking(&self) -> Result<DateTime<Utc>> {
        let stamp = self
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let enabled_at = parse_timestamp(&stamp)?;

        self.settings.clear_set(UPLOADED_ASSETS_KEY).await?;
        self.settings.clear_set(FAILED_ASSETS_KEY).await?;
        self.settings
            .set_string(ENABLED_TIMESTAMP_KEY, &stamp)
            .await?;

        info!(enabled_at = %stamp, "Sync tracking enabled");
        Ok(enabled_at)
    }

    /// Clear the watermark. Uploaded and failed history is kept.
    #[instrument(skip(self))]
    pub async fn disable_tracking(&self) -> Result<()> {
        self.settings.delete(ENABLED_TIMESTAMP_KEY).await?;
        info!("Sync tracking disabled");
        Ok(())
    }

    pub async fn enabled_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.settings
            .get_string(ENABLED_TIMESTAMP_KEY)
            .await?
            .map(|raw| parse_timestamp(&raw))
            .transpose()
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        Ok(self.enabled_at().await?.is_some())
    }

    /// Record a successful upload. Clears any earlier failure for the asset.
    ///
    /// The insert lands before the failure is cleared, so a reader never
    /// sees the asset as pending in between.
    pub async fn mark_uploaded(&self, asset_id: &str) -> Result<()> {
        self.settings
            .add_to_set(UPLOADED_ASSETS_KEY, asset_id)
            .await?;
        self.settings
            .remove_from_set(FAILED_ASSETS_KEY, asset_id)
            .await?;

        debug!(asset_id = asset_id, "Marked uploaded");
        Ok(())
    }

    /// Record a failed upload. Uploaded assets are never demoted.
    pub async fn mark_failed(&self, asset_id: &str) -> Result<()> {
        if self
            .settings
            .set_contains(UPLOADED_ASSETS_KEY, asset_id)
            .await?
        {
            debug!(asset_id = asset_id, "Ignoring failure for uploaded asset");
            return Ok(());
        }

        // A concurrent upload mark may still land in between; uploaded wins
        // when status is derived.
        self.settings.add_to_set(FAILED_ASSETS_KEY, asset_id).await?;

        debug!(asset_id = asset_id, "Marked failed");
        Ok(())
    }

    pub async fn status(&self, asset_id: &str) -> Result<AssetStatus> {
        if self
            .settings
            .set_contains(UPLOADED_ASSETS_KEY, asset_id)
            .await?
        {
            Ok(AssetStatus::Uploaded)
        } else if self.settings.set_contains(FAILED_ASSETS_KEY, asset_id).await? {
            Ok(AssetStatus::Failed)
        } else {
            Ok(AssetStatus::Pending)
        }
    }

    pub async fn snapshot(&self) -> Result<SyncSnapshot> {
        let enabled_at = self.enabled_at().await?;
        let uploaded: HashSet<String> = self
            .settings
            .set_members(UPLOADED_ASSETS_KEY)
            .await?
            .into_iter()
            .collect();
        let failed = self
            .settings
            .set_members(FAILED_ASSETS_KEY)
            .await?
            .into_iter()
            .filter(|id| !uploaded.contains(id))
            .collect();

        Ok(SyncSnapshot {
            enabled_at,
            uploaded,
            failed,
        })
    }

    pub async fn counts(&self, in_scope: &[AssetRef]) -> Result<SyncCounts> {
        Ok(self.snapshot().await?.counts(in_scope))
    }

    /// Clear every failure, returning the ids that became eligible again.
    ///
    /// Failures recorded while this runs are left in place.
    #[instrument(skip(self))]
    pub async fn retry_all(&self) -> Result<Vec<String>> {
        let mut cleared = Vec::new();
        for id in self.settings.set_members(FAILED_ASSETS_KEY).await? {
            if self.settings.remove_from_set(FAILED_ASSETS_KEY, &id).await? {
                cleared.push(id);
            }
        }

        info!(count = cleared.len(), "Cleared failed assets for retry");
        Ok(cleared)
    }

    /// Clear one failure. Returns whether the asset was marked failed.
    pub async fn retry_one(&self, asset_id: &str) -> Result<bool> {
        let removed = self
            .settings
            .remove_from_set(FAILED_ASSETS_KEY, asset_id)
            .await?;

        debug!(asset_id = asset_id, removed = removed, "Retry requested");
        Ok(removed)
    }

    /// Drop tracked ids whose asset no longer exists.
    ///
    /// Removal is per id, so marks made by another context while this runs
    /// are never rolled back.
    #[instrument(skip(self, existing_ids), fields(existing = existing_ids.len()))]
    pub async fn prune_deleted(&self, existing_ids: &HashSet<String>) -> Result<PruneStats> {
        let stats = PruneStats {
            uploaded_removed: self.remove_stale(UPLOADED_ASSETS_KEY, existing_ids).await?,
            failed_removed: self.remove_stale(FAILED_ASSETS_KEY, existing_ids).await?,
        };

        if stats != PruneStats::default() {
            info!(
                uploaded_removed = stats.uploaded_removed,
                failed_removed = stats.failed_removed,
                "Pruned deleted assets"
            );
        }
        Ok(stats)
    }

    async fn remove_stale(&self, set: &str, existing_ids: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        for id in self.settings.set_members(set).await? {
            if !existing_ids.contains(&id) && self.settings.remove_from_set(set, &id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SyncError::State(format!("Invalid watermark '{}': {}", raw, e)))
}
