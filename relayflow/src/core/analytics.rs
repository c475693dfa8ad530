//! Analytics messages and the request context they carry.
//!
//! These are the source-side business objects flows transform into
//! destination actions. Field names follow the wire format of the common
//! tracking libraries (camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Application metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    /// Application name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Application version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Build identifier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub build: String,
    /// Bundle or package namespace.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Device metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    /// Device identifier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Manufacturer.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,
    /// Model.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    /// Marketing name, used as the brand by some destinations.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Device type.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Firmware version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Geographic location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationInfo {
    /// City.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub city: String,
    /// Country.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub country: String,
    /// Region or state.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
    /// Speed.
    pub speed: f64,
}

/// Network metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInfo {
    /// Bluetooth enabled.
    pub bluetooth: bool,
    /// Cellular enabled.
    pub cellular: bool,
    /// Wi-Fi enabled.
    pub wifi: bool,
    /// Mobile carrier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub carrier: String,
}

/// Operating system metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsInfo {
    /// OS name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// OS version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Web page metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageInfo {
    /// URL path.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Referrer URL.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub referrer: String,
    /// Query string.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub search: String,
    /// Page title.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Full URL.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// Request context attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Context {
    /// Application.
    pub app: AppInfo,
    /// Device.
    pub device: DeviceInfo,
    /// Location.
    pub location: LocationInfo,
    /// Network.
    pub network: NetworkInfo,
    /// Operating system.
    pub os: OsInfo,
    /// Web page.
    pub page: PageInfo,
    /// Client IP address.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,
    /// Locale.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub locale: String,
    /// Timezone.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timezone: String,
    /// User agent.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
}

/// A loosely-typed property map with typed accessors.
///
/// Lookups return a documented default when the key is absent or holds a
/// value of another type: `""` for strings and `0.0` for numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(pub Map<String, Value>);

/// User or group traits.
pub type Traits = Properties;

impl Properties {
    /// Creates an empty property map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns a string property, or `""`.
    #[must_use]
    pub fn string(&self, key: &str) -> String {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Returns a numeric property, or `0.0`.
    #[must_use]
    pub fn number(&self, key: &str) -> f64 {
        self.0.get(key).and_then(Value::as_f64).unwrap_or_default()
    }

    /// Returns true if no property is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-destination delivery switches carried by a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Integrations(pub Map<String, Value>);

impl Integrations {
    /// Disables or enables a destination.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.0.insert(name.into(), Value::Bool(enabled));
        self
    }

    /// Returns true if the destination is enabled: the key is absent or
    /// holds the literal `true`.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        match self.0.get(name) {
            None => true,
            Some(value) => *value == Value::Bool(true),
        }
    }

    /// Returns true if no switch is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fields shared by every analytics message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Common {
    /// Message identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    /// Anonymous identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub anonymous_id: String,
    /// User identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    /// When the message happened.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Request context.
    #[serde(default)]
    pub context: Context,
    /// Per-destination switches.
    #[serde(default, skip_serializing_if = "Integrations::is_empty")]
    pub integrations: Integrations,
}

impl Default for Common {
    fn default() -> Self {
        Self {
            message_id: String::new(),
            anonymous_id: String::new(),
            user_id: String::new(),
            timestamp: Utc::now(),
            context: Context::default(),
            integrations: Integrations::default(),
        }
    }
}

impl Common {
    /// Creates common fields for a user.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Sets the context.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the integrations switches.
    #[must_use]
    pub fn with_integrations(mut self, integrations: Integrations) -> Self {
        self.integrations = integrations;
        self
    }
}

/// Ties a user to their traits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identify {
    /// Shared fields.
    #[serde(flatten)]
    pub common: Common,
    /// User traits.
    #[serde(default)]
    pub traits: Traits,
}

/// Records an action performed by a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Shared fields.
    #[serde(flatten)]
    pub common: Common,
    /// Event name.
    pub event: String,
    /// Event properties.
    #[serde(default)]
    pub properties: Properties,
}

/// Records a web page view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Shared fields.
    #[serde(flatten)]
    pub common: Common,
    /// Page name.
    #[serde(default)]
    pub name: String,
    /// Page properties.
    #[serde(default)]
    pub properties: Properties,
}

/// Records a mobile screen view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    /// Shared fields.
    #[serde(flatten)]
    pub common: Common,
    /// Screen name.
    #[serde(default)]
    pub name: String,
    /// Screen properties.
    #[serde(default)]
    pub properties: Properties,
}

/// Associates a user with a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Shared fields.
    #[serde(flatten)]
    pub common: Common,
    /// Group identifier.
    pub group_id: String,
    /// Group traits.
    #[serde(default)]
    pub traits: Traits,
}

/// Merges two user identities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alias {
    /// Shared fields; `user_id` is the new identity.
    #[serde(flatten)]
    pub common: Common,
    /// The previous identity.
    pub previous_id: String,
}
