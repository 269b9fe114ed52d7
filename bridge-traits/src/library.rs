//! Media Library Abstraction
//!
//! The device's photo/video catalog as seen by the sync engine. Hosts wrap
//! their platform library (Photos framework, MediaStore, a folder on disk)
//! behind [`MediaLibrary`].

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::Result;

/// Kind of resource backing an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Video,
    Other,
}

/// Reference to a single library item.
///
/// The id is stable for the lifetime of the asset in the library and is the
/// key used for all tracking state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Library-local identifier
    pub id: String,
    /// When the asset was created on device
    pub created_at: DateTime<Utc>,
    /// Last modification, if the library records one
    pub modified_at: Option<DateTime<Utc>>,
    /// Primary resource type
    pub resource_type: ResourceType,
    /// Original file name of the primary resource
    pub filename: String,
    /// Type identifier declared by the library, e.g. `image/heic`
    pub mime_type: Option<String>,
}

impl AssetRef {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            modified_at: None,
            resource_type: ResourceType::Image,
            filename: String::new(),
            mime_type: None,
        }
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Bytes of an asset's primary resource
#[derive(Debug, Clone)]
pub struct AssetPayload {
    pub data: Bytes,
    /// Type identifier reported at load time, if any
    pub mime_type: Option<String>,
}

/// Device media library trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::library::MediaLibrary;
///
/// async fn newest(library: &dyn MediaLibrary, since: DateTime<Utc>) -> Result<usize> {
///     Ok(library.assets_created_after(since).await?.len())
/// }
/// ```
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// All assets created strictly after `since`, in any order
    async fn assets_created_after(&self, since: DateTime<Utc>) -> Result<Vec<AssetRef>>;

    /// Ids of every asset currently in the library
    ///
    /// Must return an error rather than a partial set: callers treat a
    /// missing id as a deleted asset.
    async fn existing_ids(&self) -> Result<HashSet<String>>;

    /// Load the primary resource bytes
    ///
    /// This is the only suspension point of an upload before the network call;
    /// any failure here means the asset cannot be uploaded right now.
    async fn load_payload(&self, asset: &AssetRef) -> Result<AssetPayload>;
}
