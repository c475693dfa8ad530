//! Wire objects of the Amplitude HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Context, Traits};

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_i64(value: &i64) -> bool {
    *value == 0
}

/// One event sent to the HTTP API, shared by identify, track, page and
/// screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    /// Event name.
    #[serde(rename = "event_type")]
    pub event: String,
    /// Deduplication token.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub insert_id: String,
    /// User identifier.
    pub user_id: String,
    /// Device identifier.
    pub device_id: String,
    /// Unix timestamp of the event.
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub time: i64,
    /// User traits.
    #[serde(rename = "user_properties")]
    pub traits: Traits,
    /// Request context, applied at load time.
    #[serde(rename = "event_properties")]
    pub context: Option<Context>,
    /// Application version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_version: String,
    /// Platform.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub platform: String,
    /// Operating system name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os_name: String,
    /// Operating system version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    /// Device brand.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_brand: String,
    /// Device manufacturer.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_manufacturer: String,
    /// Device model.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_model: String,
    /// Network carrier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub carrier: String,
    /// Country.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub country: String,
    /// Region.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// City.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub city: String,
    /// Latitude.
    #[serde(rename = "location_lat", skip_serializing_if = "is_zero")]
    pub latitude: f64,
    /// Longitude.
    #[serde(rename = "location_lng", skip_serializing_if = "is_zero")]
    pub longitude: f64,
    /// Designated market area.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dma: String,
    /// Language.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub language: String,
    /// Paying status.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub paying: String,
    /// First application version used.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub start_version: String,
    /// Client IP address.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,
    /// Product identifier, for revenue events.
    #[serde(rename = "productId", skip_serializing_if = "String::is_empty")]
    pub product_id: String,
    /// Quantity, for revenue events.
    #[serde(skip_serializing_if = "is_zero")]
    pub quantity: f64,
    /// Unit price, for revenue events.
    #[serde(skip_serializing_if = "is_zero")]
    pub price: f64,
    /// Revenue.
    #[serde(skip_serializing_if = "is_zero")]
    pub revenue: f64,
}

impl Event {
    /// Creates an event for a user.
    #[must_use]
    pub fn new(event: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Builds an event whose device, location, network and application
    /// fields are copied from the request context.
    #[must_use]
    pub fn from_context(
        event: impl Into<String>,
        user_id: impl Into<String>,
        context: &Context,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: event.into(),
            user_id: user_id.into(),
            device_id: context.device.id.clone(),
            time: received_at.timestamp(),
            context: Some(context.clone()),
            app_version: context.app.version.clone(),
            os_name: context.os.name.clone(),
            os_version: context.os.version.clone(),
            device_brand: context.device.name.clone(),
            device_manufacturer: context.device.manufacturer.clone(),
            device_model: context.device.model.clone(),
            carrier: context.network.carrier.clone(),
            country: context.location.country.clone(),
            region: context.location.region.clone(),
            city: context.location.city.clone(),
            latitude: context.location.latitude,
            longitude: context.location.longitude,
            ip: context.ip.clone(),
            ..Self::default()
        }
    }
}

/// Puts a user in a group, for the group-identify API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identification {
    /// User identifier.
    pub user_id: String,
    /// Group type, e.g. the industry.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group_type: String,
    /// Group identifier.
    pub group_value: String,
    /// Group traits.
    pub group_properties: Traits,
}

/// Maps a user to a global identity, for the user-map API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserMap {
    /// The identity being merged.
    pub user_id: String,
    /// The identity it merges into.
    pub global_user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_omits_empty_fields() {
        let value = serde_json::to_value(Event::new("Signed up", "u1")).unwrap();
        assert_eq!(
            value,
            json!({
                "event_type": "Signed up",
                "user_id": "u1",
                "device_id": "",
                "user_properties": {},
                "event_properties": null
            })
        );
    }

    #[test]
    fn test_revenue_fields_renamed() {
        let mut event = Event::new("Order completed", "u1");
        event.product_id = "sku-1".to_string();
        event.quantity = 2.0;
        event.latitude = 48.85;
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["productId"], "sku-1");
        assert_eq!(value["quantity"], 2.0);
        assert_eq!(value["location_lat"], 48.85);
    }
}
