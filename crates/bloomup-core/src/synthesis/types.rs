//! Data exchanged with the remote synthesis and supplier services.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// MIME type assumed for images that carry no `data:` header.
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// An image as a string: either a `data:<mime>;base64,<payload>` URL or a
/// bare base64 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedImage(String);

impl EncodedImage {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Encode raw bytes as a data URL.
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self(format!("data:{mime_type};base64,{}", STANDARD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.base64_payload().trim().is_empty()
    }

    /// The MIME type named in the data URL header, or [`DEFAULT_IMAGE_MIME`].
    pub fn mime_type(&self) -> &str {
        self.0
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(';'))
            .map(|(mime, _)| mime)
            .filter(|mime| !mime.is_empty())
            .unwrap_or(DEFAULT_IMAGE_MIME)
    }

    /// The base64 payload with any data URL header stripped.
    pub fn base64_payload(&self) -> &str {
        match self.0.split_once(',') {
            Some((_, payload)) if self.0.starts_with("data:") => payload,
            _ => &self.0,
        }
    }

    /// Decode the payload to raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.base64_payload().trim())
    }
}

impl fmt::Display for EncodedImage {
    /// Prints the MIME type and payload size, never the payload itself.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} base64 chars)",
            self.mime_type(),
            self.base64_payload().len()
        )
    }
}

/// A product recommended for the redesign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplyItem {
    pub item: String,
    pub description: String,
    #[serde(alias = "priceRange")]
    pub price_range: String,
}

/// One phase of the implementation guide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Phase {
    /// Short phase label, e.g. "Clearing".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub title: String,
    pub actions: Vec<String>,
}

/// The structured result of plan generation.
///
/// Missing arrays deserialize as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenancePlan {
    pub inventory: Vec<SupplyItem>,
    pub guide: Vec<Phase>,
    #[serde(alias = "maintenanceChecklist")]
    pub maintenance_checklist: Vec<String>,
}

impl MaintenancePlan {
    pub fn is_empty(&self) -> bool {
        self.inventory.is_empty() && self.guide.is_empty() && self.maintenance_checklist.is_empty()
    }
}

/// A geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// A supplier returned by grounded search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierResult {
    pub title: String,
    pub uri: String,
}
