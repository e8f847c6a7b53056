//! Request bodies and response shaping.
//!
//! Fields are snake_case; the camelCase names used by existing clients are
//! accepted as aliases. Missing fields default to empty so that the domain
//! reports them as validation errors (400) instead of extractor rejections.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use clearpath_infra::projections::{ActorReadModel, ProductReadModel};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterActorRequest {
    pub name: String,
    #[serde(alias = "phoneNumber")]
    pub phone_number: String,
    pub organization: String,
    pub role: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RequestOtpRequest {
    #[serde(alias = "actorId")]
    pub actor_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VerifyKycRequest {
    #[serde(alias = "actorId")]
    pub actor_id: String,
    #[serde(alias = "aadhaarNumber")]
    pub aadhaar_number: String,
    pub otp: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeactivateActorRequest {
    pub reason: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct OnboardProductRequest {
    pub name: String,
    #[serde(alias = "batchNumber")]
    pub batch_number: String,
    #[serde(alias = "manufacturerId")]
    pub manufacturer_id: String,
    #[serde(alias = "manufacturedAt")]
    pub manufactured_at: Option<String>,
    #[serde(alias = "expiryDate")]
    pub expiry_date: Option<String>,
    pub location: Option<String>,
    /// Hex Ed25519 seed; used once to sign and never stored.
    #[serde(alias = "privateKey")]
    pub private_key: Option<String>,
    /// Precomputed hex signature over the product fingerprint.
    pub signature: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateStatusRequest {
    #[serde(alias = "productId")]
    pub product_id: String,
    #[serde(alias = "actorId")]
    pub actor_id: String,
    pub location: String,
    #[serde(alias = "statusUpdate")]
    pub status: String,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct LogEventRequest {
    #[serde(alias = "productId")]
    pub product_id: String,
    #[serde(alias = "eventType")]
    pub event_type: String,
    #[serde(alias = "actorId")]
    pub actor_id: String,
    pub location: Option<String>,
    pub data: JsonValue,
    #[serde(alias = "privateKey")]
    pub private_key: Option<String>,
    pub signature: Option<String>,
}

// Private keys stay out of Debug output.

impl core::fmt::Debug for OnboardProductRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OnboardProductRequest")
            .field("name", &self.name)
            .field("batch_number", &self.batch_number)
            .field("manufacturer_id", &self.manufacturer_id)
            .field("manufactured_at", &self.manufactured_at)
            .field("expiry_date", &self.expiry_date)
            .field("location", &self.location)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("signature", &self.signature)
            .finish()
    }
}

impl core::fmt::Debug for LogEventRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LogEventRequest")
            .field("product_id", &self.product_id)
            .field("event_type", &self.event_type)
            .field("actor_id", &self.actor_id)
            .field("location", &self.location)
            .field("data", &self.data)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("signature", &self.signature)
            .finish()
    }
}

// -------------------------
// Responses
// -------------------------

/// Manufacturer summary embedded in product details.
#[derive(Debug, Clone, Serialize)]
pub struct ManufacturerSummary {
    pub name: String,
    pub organization: String,
}

impl From<&ActorReadModel> for ManufacturerSummary {
    fn from(actor: &ActorReadModel) -> Self {
        Self {
            name: actor.name.clone(),
            organization: actor.organization.clone(),
        }
    }
}

/// Product with its manufacturer resolved and its history inlined.
#[derive(Debug, Clone, Serialize)]
pub struct ProductDetails {
    #[serde(flatten)]
    pub product: ProductReadModel,
    pub manufacturer: Option<ManufacturerSummary>,
}

/// Product list entry: the dashboard fields without the history.
pub fn product_summary_json(rm: &ProductReadModel) -> JsonValue {
    serde_json::json!({
        "product_id": rm.product_id,
        "name": rm.name,
        "batch_number": rm.batch_number,
        "manufacturer_id": rm.manufacturer_id,
        "current_location": rm.current_location,
        "status": rm.status,
        "product_hash": rm.product_hash,
        "history_length": rm.history.len(),
        "updated_at": rm.updated_at,
    })
}

/// Accept RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("{field} must be an RFC 3339 timestamp or YYYY-MM-DD date"))
}
