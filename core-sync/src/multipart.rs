//! # Multipart Encoder
//!
//! Builds the `multipart/form-data` body the asset-ingest endpoint expects.
//!
//! The server accepts a fixed set of fields in a fixed order:
//!
//! 1. `deviceAssetId`
//! 2. `deviceId`
//! 3. `fileCreatedAt`
//! 4. `fileModifiedAt`
//! 5. `assetData` (binary, with filename and content type)
//!
//! Every request gets a fresh UUID boundary.

use crate::{Result, SyncError};
use bridge_traits::library::{AssetPayload, AssetRef, ResourceType};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Field names in wire order
pub const REQUIRED_FIELDS: [&str; 5] = [
    "deviceAssetId",
    "deviceId",
    "fileCreatedAt",
    "fileModifiedAt",
    "assetData",
];

const EXTENSION_MIME_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("webp", "image/webp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("bmp", "image/bmp"),
    ("dng", "image/x-adobe-dng"),
    ("mov", "video/quicktime"),
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("3gp", "video/3gpp"),
    ("webm", "video/webm"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
];

/// Encoded request body with its boundary
#[derive(Debug, Clone)]
pub struct MultipartBody {
    pub boundary: String,
    pub body: Bytes,
}

impl MultipartBody {
    /// Value for the `Content-Type` request header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

enum PartValue<'a> {
    Text(String),
    File {
        filename: &'a str,
        content_type: String,
        data: &'a Bytes,
    },
}

struct Part<'a> {
    name: &'static str,
    value: PartValue<'a>,
}

#[derive(Debug, Clone)]
pub struct MultipartEncoder {
    device_id: String,
}

impl MultipartEncoder {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn encode(&self, asset: &AssetRef, payload: &AssetPayload) -> Result<MultipartBody> {
        self.encode_with_boundary(asset, payload, Uuid::new_v4().to_string())
    }

    pub(crate) fn encode_with_boundary(
        &self,
        asset: &AssetRef,
        payload: &AssetPayload,
        boundary: String,
    ) -> Result<MultipartBody> {
        let parts = self.parts(asset, payload)?;
        check_layout(&parts)?;

        let mut body = BytesMut::with_capacity(payload.data.len() + 1024);
        for part in &parts {
            body.put_slice(format!("--{}\r\n", boundary).as_bytes());
            match &part.value {
                PartValue::Text(value) => {
                    body.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            part.name
                        )
                        .as_bytes(),
                    );
                    body.put_slice(value.as_bytes());
                }
                PartValue::File {
                    filename,
                    content_type,
                    data,
                } => {
                    body.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            part.name,
                            escape_quotes(filename)
                        )
                        .as_bytes(),
                    );
                    body.put_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
                    body.put_slice(data);
                }
            }
            body.put_slice(b"\r\n");
        }
        body.put_slice(format!("--{}--\r\n", boundary).as_bytes());

        Ok(MultipartBody {
            boundary,
            body: body.freeze(),
        })
    }

    fn parts<'a>(&self, asset: &'a AssetRef, payload: &'a AssetPayload) -> Result<Vec<Part<'a>>> {
        if asset.id.trim().is_empty() {
            return Err(SyncError::Encoding("asset id is empty".to_string()));
        }
        if self.device_id.trim().is_empty() {
            return Err(SyncError::Encoding("device id is empty".to_string()));
        }

        let filename = if asset.filename.is_empty() {
            asset.id.rsplit('/').next().unwrap_or(&asset.id)
        } else {
            asset.filename.as_str()
        };

        Ok(vec![
            Part {
                name: "deviceAssetId",
                value: PartValue::Text(asset.id.clone()),
            },
            Part {
                name: "deviceId",
                value: PartValue::Text(self.device_id.clone()),
            },
            Part {
                name: "fileCreatedAt",
                value: PartValue::Text(iso8601(asset.created_at)),
            },
            Part {
                name: "fileModifiedAt",
                value: PartValue::Text(iso8601(asset.modified_at.unwrap_or(asset.created_at))),
            },
            Part {
                name: "assetData",
                value: PartValue::File {
                    filename,
                    content_type: resolve_mime_type(asset, payload),
                    data: &payload.data,
                },
            },
        ])
    }
}

fn check_layout(parts: &[Part<'_>]) -> Result<()> {
    let names: Vec<&str> = parts.iter().map(|part| part.name).collect();
    if names != REQUIRED_FIELDS {
        return Err(SyncError::Encoding(format!(
            "multipart fields {:?} do not match required layout {:?}",
            names, REQUIRED_FIELDS
        )));
    }
    Ok(())
}

fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "%22")
}

/// Pick the content type for the payload part.
///
/// A declared type wins when it looks like a MIME type. Otherwise the
/// filename extension decides, then the resource kind.
pub fn resolve_mime_type(asset: &AssetRef, payload: &AssetPayload) -> String {
    let declared = payload
        .mime_type
        .as_deref()
        .or(asset.mime_type.as_deref())
        .filter(|mime| mime.contains('/'));
    if let Some(mime) = declared {
        return mime.to_string();
    }

    let name = if asset.filename.is_empty() {
        asset.id.as_str()
    } else {
        asset.filename.as_str()
    };
    let by_extension = name.rsplit_once('.').and_then(|(_, ext)| {
        let ext = ext.to_ascii_lowercase();
        EXTENSION_MIME_TYPES
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, mime)| *mime)
    });
    if let Some(mime) = by_extension {
        return mime.to_string();
    }

    match asset.resource_type {
        ResourceType::Image => "image/jpeg",
        ResourceType::Video => "video/mp4",
        ResourceType::Other => "application/octet-stream",
    }
    .to_string()
}
