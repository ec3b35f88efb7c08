use config::{ConfigError, Resolver};

/// A logical telemetry record produced by a game client, after
/// validation and sanitization.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub event_version: String,
    pub app_name: String,
    pub client_id: String,
    pub event_id: String,
    pub event_type: String,
    /// Client-reported event time, unix millis. Non-negative after
    /// sanitization.
    pub event_timestamp: i64,

    pub app_version: Option<String>,
    pub level_id: Option<String>,
    pub position_x: Option<f64>,
    pub position_y: Option<f64>,

    // Attached by the stream transport rather than the client.
    pub shard_id: String,
    pub sequence_number: String,
    pub partition_key: String,
    /// Server arrival time, unix millis. Injected into the outgoing
    /// JSON under the `server_timestamp` key.
    pub server_timestamp: i64,

    pub required_sanitization: bool,
    pub sanitized_fields: Vec<String>,
}

/// Transport metadata attached to a record by the stream client.
#[derive(Debug, Clone)]
pub struct TransportMeta {
    pub shard_id: String,
    pub partition_key: String,
    pub sequence_number: String,
    /// Arrival time at the server, unix millis.
    pub server_timestamp: i64,
}

/// Per-field maximum lengths for string fields. Overlong values are
/// truncated (a sanitization, not a failure).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLimits {
    pub event_version: usize,
    pub app_name: usize,
    pub app_version: usize,
    pub event_id: usize,
    pub event_type: usize,
    pub client_id: usize,
    pub level_id: usize,
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            event_version: 64,
            app_name: 64,
            app_version: 64,
            event_id: 36,
            event_type: 256,
            client_id: 36,
            level_id: 64,
        }
    }
}

impl FieldLimits {
    /// Resolve limits from `event.<field>_max_length` keys, falling back
    /// to the compiled-in defaults.
    pub fn from_config(cfg: &Resolver) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            event_version: cfg.get_usize_or(None, "event.event_version_max_length", defaults.event_version)?,
            app_name: cfg.get_usize_or(None, "event.app_name_max_length", defaults.app_name)?,
            app_version: cfg.get_usize_or(None, "event.app_version_max_length", defaults.app_version)?,
            event_id: cfg.get_usize_or(None, "event.event_id_max_length", defaults.event_id)?,
            event_type: cfg.get_usize_or(None, "event.event_type_max_length", defaults.event_type)?,
            client_id: cfg.get_usize_or(None, "event.client_id_max_length", defaults.client_id)?,
            level_id: cfg.get_usize_or(None, "event.level_id_max_length", defaults.level_id)?,
        })
    }
}
