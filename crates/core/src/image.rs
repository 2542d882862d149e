//! Image identifiers, metadata snapshots and payload validation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_SIGNATURE: &[u8] = b"\xff\xd8\xff";

/// Unique identifier of a stored image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ImageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ImageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidImageId(format!("{s}: {e}")))
    }
}

/// Image formats accepted for upload, detected from magic bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Detect the format from the leading bytes of the payload.
    ///
    /// The declared Content-Type of a request is never consulted.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(PNG_SIGNATURE) {
            Some(Self::Png)
        } else if data.starts_with(JPEG_SIGNATURE) {
            Some(Self::Jpeg)
        } else {
            None
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    /// Read pixel dimensions from the header, if the header is intact.
    pub fn dimensions(self, data: &[u8]) -> Option<(u32, u32)> {
        match self {
            Self::Png => png_dimensions(data),
            Self::Jpeg => jpeg_dimensions(data),
        }
    }
}

fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    // signature(8) | length(4) | "IHDR"(4) | width(4) | height(4)
    if data.len() < 24 || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(data[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(data[20..24].try_into().ok()?);
    Some((width, height))
}

fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xff {
            return None;
        }
        let marker = data[pos + 1];
        pos += 2;
        match marker {
            // Fill byte, TEM and RSTn carry no length.
            0xff => pos -= 1,
            0x01 | 0xd0..=0xd7 => {}
            0xd9 | 0xda => return None,
            _ => {
                let len = usize::from(u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]));
                let is_sof = matches!(marker, 0xc0..=0xcf) && !matches!(marker, 0xc4 | 0xc8 | 0xcc);
                if is_sof {
                    // length(2) | precision(1) | height(2) | width(2)
                    let height = u16::from_be_bytes([*data.get(pos + 3)?, *data.get(pos + 4)?]);
                    let width = u16::from_be_bytes([*data.get(pos + 5)?, *data.get(pos + 6)?]);
                    return Some((u32::from(width), u32::from(height)));
                }
                if len < 2 {
                    return None;
                }
                pos += len;
            }
        }
    }
    None
}

/// Validate an uploaded payload and return its detected format.
///
/// Checks run in order: size, emptiness, detectable format, allowed format.
pub fn validate_payload(
    data: &[u8],
    max_size: u64,
    allowed_types: &[String],
) -> Result<ImageFormat> {
    let size = data.len() as u64;
    if size > max_size {
        return Err(Error::PayloadTooLarge {
            size,
            max: max_size,
        });
    }
    if data.is_empty() {
        return Err(Error::EmptyPayload);
    }
    let format = ImageFormat::detect(data).ok_or(Error::UnknownFormat)?;
    if !allowed_types.iter().any(|t| t == format.mime_type()) {
        return Err(Error::DisallowedFormat {
            detected: format.mime_type().to_string(),
            allowed: allowed_types.join(", "),
        });
    }
    Ok(format)
}

/// Metadata snapshot for an image. This is what the read path caches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub id: ImageId,
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A catalog row: the public metadata plus fields that never leave the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRecord {
    pub metadata: ImageMetadata,
    /// Client address that performed the upload.
    pub upload_ip: String,
    /// SHA-256 hex of the delete token handed to the uploader.
    pub delete_token_hash: String,
}

/// Hash a delete token for storage and comparison.
pub fn hash_delete_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
