//! Candidate discovery shared by the manual driver and the background cycle

use crate::tracker::SyncSnapshot;
use crate::Result;
use bridge_traits::library::{AssetRef, MediaLibrary};
use std::collections::HashSet;
use tracing::debug;

/// Assets created after the watermark that are neither uploaded, failed, nor
/// listed in `exclude`.
///
/// Returns nothing while tracking is disabled. Results are ordered by
/// creation time, oldest first.
pub async fn candidates(
    library: &dyn MediaLibrary,
    snapshot: &SyncSnapshot,
    exclude: &HashSet<String>,
) -> Result<Vec<AssetRef>> {
    let Some(enabled_at) = snapshot.enabled_at else {
        debug!("Tracking disabled, no candidates");
        return Ok(Vec::new());
    };

    let mut seen = HashSet::new();
    let mut assets: Vec<AssetRef> = library
        .assets_created_after(enabled_at)
        .await?
        .into_iter()
        .filter(|asset| snapshot.in_scope(asset))
        .filter(|asset| !snapshot.is_tracked(&asset.id) && !exclude.contains(&asset.id))
        .filter(|asset| seen.insert(asset.id.clone()))
        .collect();

    assets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    debug!(count = assets.len(), "Computed candidates");
    Ok(assets)
}
