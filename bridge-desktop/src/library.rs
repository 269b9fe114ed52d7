//! Media Library backed by a directory tree

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    library::{AssetPayload, AssetRef, MediaLibrary, ResourceType},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "heif", "gif", "webp", "tif", "tiff", "bmp", "dng",
];
const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4", "m4v", "avi", "mkv", "3gp", "webm"];

/// How a walk treats a subdirectory it cannot read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    /// Log and skip. Used for discovery, where a missed asset is picked up
    /// by a later cycle.
    Lenient,
    /// Fail the whole walk. Used for pruning, where a partial listing would
    /// read as deleted assets.
    Strict,
}

/// Treats every media file below a root directory as a library asset.
///
/// Asset ids are paths relative to the root with `/` separators, so they stay
/// stable across runs as long as files are not moved.
pub struct DirectoryMediaLibrary {
    root: PathBuf,
}

impl DirectoryMediaLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The user's Pictures directory, when the platform has one
    pub fn pictures() -> Option<Self> {
        dirs::picture_dir().map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resource_type_for(path: &Path) -> Option<ResourceType> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(ResourceType::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(ResourceType::Video)
        } else {
            None
        }
    }

    fn asset_id(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }

    fn to_utc(time: SystemTime) -> DateTime<Utc> {
        DateTime::<Utc>::from(time)
    }

    /// Walk the tree and collect every media file
    async fn scan(&self, mode: ScanMode) -> Result<Vec<AssetRef>> {
        self.walk(vec![self.root.clone()], mode).await
    }

    async fn walk(&self, mut pending: Vec<PathBuf>, mode: ScanMode) -> Result<Vec<AssetRef>> {
        let mut assets = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == self.root || mode == ScanMode::Strict => {
                    return Err(BridgeError::Io(e));
                }
                Err(e) => {
                    warn!(path = ?dir, error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            while let Some(entry) = entries.next_entry().await.map_err(BridgeError::Io)? {
                let path = entry.path();
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if hidden {
                    continue;
                }

                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) if mode == ScanMode::Strict => return Err(BridgeError::Io(e)),
                    Err(e) => {
                        warn!(path = ?path, error = %e, "Skipping file without metadata");
                        continue;
                    }
                };

                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Some(resource_type) = Self::resource_type_for(&path) else {
                    continue;
                };
                let Some(id) = self.asset_id(&path) else {
                    continue;
                };

                let modified = metadata.modified().ok().map(Self::to_utc);
                let created = metadata
                    .created()
                    .ok()
                    .map(Self::to_utc)
                    .or(modified)
                    .unwrap_or_else(Utc::now);
                let filename = entry.file_name().to_string_lossy().into_owned();

                let mut asset = AssetRef::new(id, created)
                    .with_resource_type(resource_type)
                    .with_filename(filename);
                asset.modified_at = modified;
                assets.push(asset);
            }
        }

        debug!(root = ?self.root, count = assets.len(), "Scanned media directory");
        Ok(assets)
    }
}

#[async_trait]
impl MediaLibrary for DirectoryMediaLibrary {
    async fn assets_created_after(&self, since: DateTime<Utc>) -> Result<Vec<AssetRef>> {
        Ok(self
            .scan(ScanMode::Lenient)
            .await?
            .into_iter()
            .filter(|asset| asset.created_at > since)
            .collect())
    }

    async fn existing_ids(&self) -> Result<HashSet<String>> {
        Ok(self
            .scan(ScanMode::Strict)
            .await?
            .into_iter()
            .map(|asset| asset.id)
            .collect())
    }

    async fn load_payload(&self, asset: &AssetRef) -> Result<AssetPayload> {
        let path = asset
            .id
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part));

        let data = fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                BridgeError::NotFound(format!("Asset file missing: {}", asset.id))
            }
            _ => BridgeError::Io(e),
        })?;

        debug!(asset_id = %asset.id, size = data.len(), "Loaded asset payload");
        Ok(AssetPayload {
            data: Bytes::from(data),
            mime_type: asset.mime_type.clone(),
        })
    }
}
