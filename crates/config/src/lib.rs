//! Layered configuration lookup shared by every pipeline component.
//!
//! Keys are resolved through a fallback chain, most-specific first:
//!
//!   1. Process environment overrides (flat namespace).
//!   2. `test.<project>.<connector>.<key>`   (local mode only)
//!   3. `test.common.<connector>.<key>`      (local mode only)
//!   4. `<project>.<connector>.<key>`
//!   5. `common.<connector>.<key>`
//!   6. `<project>.<key>`
//!   7. `common.<key>`
//!
//! The first hit wins. Typed accessors parse the resolved string; a parse
//! failure always surfaces as an error, while defaulting accessors apply
//! their default only when the key is absent everywhere.

use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required configuration key '{key}' is not set")]
    Missing { key: String },

    #[error("configuration key '{key}' has value '{value}' which does not parse as {expected}")]
    Parse {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("configuration document is not a JSON object")]
    NotAnObject,

    #[error("configuration key '{key}' holds a nested value, but only flat scalars are allowed")]
    NotFlat { key: String },

    #[error("failed to read configuration document: {0}")]
    Json(#[from] serde_json::Error),
}

/// A process-wide configuration store. Constructed once at startup and
/// passed to components as an `Arc` capability; immutable afterwards
/// except for the test-only [`Resolver::clear`].
#[derive(Debug, Clone)]
pub struct Resolver {
    project: String,
    local_mode: bool,
    props: BTreeMap<String, String>,
    overrides: BTreeMap<String, String>,
}

impl Resolver {
    /// Build a resolver over the given flat properties. Environment
    /// variables are snapshotted at construction and take precedence
    /// over every property layer.
    pub fn new(project: impl Into<String>, local_mode: bool, props: BTreeMap<String, String>) -> Self {
        Self {
            project: project.into(),
            local_mode,
            props,
            overrides: std::env::vars().collect(),
        }
    }

    /// Like [`Resolver::new`], but with an explicit override layer in
    /// place of the process environment. Used by tests.
    pub fn with_overrides(
        project: impl Into<String>,
        local_mode: bool,
        props: BTreeMap<String, String>,
        overrides: BTreeMap<String, String>,
    ) -> Self {
        Self {
            project: project.into(),
            local_mode,
            props,
            overrides,
        }
    }

    /// Build a resolver from a flat JSON object document, such as
    /// `{"common.s3.buffer_byte_size_limit": "1048576"}`. Scalar values
    /// other than strings are stringified; nested values are an error.
    pub fn from_json_slice(
        project: impl Into<String>,
        local_mode: bool,
        doc: &[u8],
    ) -> Result<Self, ConfigError> {
        let parsed: serde_json::Value = serde_json::from_slice(doc)?;
        let serde_json::Value::Object(fields) = parsed else {
            return Err(ConfigError::NotAnObject);
        };

        let mut props = BTreeMap::new();
        for (key, value) in fields {
            let flat = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => continue,
                _ => return Err(ConfigError::NotFlat { key }),
            };
            props.insert(key, flat);
        }
        tracing::debug!(keys = props.len(), "loaded configuration document");
        Ok(Self::new(project, local_mode, props))
    }

    /// Test-only reset hook. Production code never mutates a resolver
    /// after construction.
    pub fn clear(&mut self) {
        self.props.clear();
        self.overrides.clear();
    }

    /// Resolve `key` through the fallback chain, optionally scoped to a
    /// connector such as "s3" or "redshift". Returns the first hit.
    pub fn lookup(&self, connector: Option<&str>, key: &str) -> Option<&str> {
        if let Some(hit) = self.overrides.get(key) {
            return Some(hit);
        }

        let project = &self.project;
        let mut candidates = Vec::with_capacity(6);
        if let Some(connector) = connector {
            if self.local_mode {
                candidates.push(format!("test.{project}.{connector}.{key}"));
                candidates.push(format!("test.common.{connector}.{key}"));
            }
            candidates.push(format!("{project}.{connector}.{key}"));
            candidates.push(format!("common.{connector}.{key}"));
        }
        candidates.push(format!("{project}.{key}"));
        candidates.push(format!("common.{key}"));

        candidates
            .iter()
            .find_map(|candidate| self.props.get(candidate))
            .map(String::as_str)
    }

    pub fn get_string(&self, connector: Option<&str>, key: &str) -> Result<String, ConfigError> {
        match self.lookup(connector, key) {
            Some(value) => Ok(value.to_string()),
            None => Err(ConfigError::Missing { key: key.to_string() }),
        }
    }

    pub fn get_string_or(
        &self,
        connector: Option<&str>,
        key: &str,
        default: &str,
    ) -> String {
        self.lookup(connector, key)
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_i32(&self, connector: Option<&str>, key: &str) -> Result<i32, ConfigError> {
        self.parse_required(connector, key, "a 32-bit integer")
    }

    pub fn get_i32_or(
        &self,
        connector: Option<&str>,
        key: &str,
        default: i32,
    ) -> Result<i32, ConfigError> {
        self.parse_defaulted(connector, key, "a 32-bit integer", default)
    }

    pub fn get_i64(&self, connector: Option<&str>, key: &str) -> Result<i64, ConfigError> {
        self.parse_required(connector, key, "a 64-bit integer")
    }

    pub fn get_i64_or(
        &self,
        connector: Option<&str>,
        key: &str,
        default: i64,
    ) -> Result<i64, ConfigError> {
        self.parse_defaulted(connector, key, "a 64-bit integer", default)
    }

    pub fn get_u32_or(
        &self,
        connector: Option<&str>,
        key: &str,
        default: u32,
    ) -> Result<u32, ConfigError> {
        self.parse_defaulted(connector, key, "an unsigned 32-bit integer", default)
    }

    pub fn get_usize_or(
        &self,
        connector: Option<&str>,
        key: &str,
        default: usize,
    ) -> Result<usize, ConfigError> {
        self.parse_defaulted(connector, key, "an unsigned integer", default)
    }

    pub fn get_u64_or(
        &self,
        connector: Option<&str>,
        key: &str,
        default: u64,
    ) -> Result<u64, ConfigError> {
        self.parse_defaulted(connector, key, "an unsigned 64-bit integer", default)
    }

    pub fn get_f32(&self, connector: Option<&str>, key: &str) -> Result<f32, ConfigError> {
        self.parse_required(connector, key, "a 32-bit float")
    }

    pub fn get_f64(&self, connector: Option<&str>, key: &str) -> Result<f64, ConfigError> {
        self.parse_required(connector, key, "a 64-bit float")
    }

    pub fn get_f64_or(
        &self,
        connector: Option<&str>,
        key: &str,
        default: f64,
    ) -> Result<f64, ConfigError> {
        self.parse_defaulted(connector, key, "a 64-bit float", default)
    }

    pub fn get_bool(&self, connector: Option<&str>, key: &str) -> Result<bool, ConfigError> {
        match self.lookup(connector, key) {
            Some(value) => parse_bool(key, value),
            None => Err(ConfigError::Missing { key: key.to_string() }),
        }
    }

    pub fn get_bool_or(
        &self,
        connector: Option<&str>,
        key: &str,
        default: bool,
    ) -> Result<bool, ConfigError> {
        match self.lookup(connector, key) {
            Some(value) => parse_bool(key, value),
            None => Ok(default),
        }
    }

    /// Comma-separated list accessor. Entries are trimmed; empty entries
    /// are dropped.
    pub fn get_list(&self, connector: Option<&str>, key: &str) -> Result<Vec<String>, ConfigError> {
        let value = self.get_string(connector, key)?;
        Ok(split_list(&value))
    }

    pub fn get_list_or(
        &self,
        connector: Option<&str>,
        key: &str,
        default: &[&str],
    ) -> Vec<String> {
        match self.lookup(connector, key) {
            Some(value) => split_list(value),
            None => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn parse_required<T: std::str::FromStr>(
        &self,
        connector: Option<&str>,
        key: &str,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.lookup(connector, key) {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Parse {
                key: key.to_string(),
                value: value.to_string(),
                expected,
            }),
            None => Err(ConfigError::Missing { key: key.to_string() }),
        }
    }

    // The default applies only when the key is absent. A present value
    // which fails to parse is always an error.
    fn parse_defaulted<T: std::str::FromStr>(
        &self,
        connector: Option<&str>,
        key: &str,
        expected: &'static str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.lookup(connector, key) {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Parse {
                key: key.to_string(),
                value: value.to_string(),
                expected,
            }),
            None => Ok(default),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ConfigError::Parse {
            key: key.to_string(),
            value: value.to_string(),
            expected: "a boolean",
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver(local_mode: bool, pairs: &[(&str, &str)]) -> Resolver {
        let props = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Resolver::with_overrides("analytics", local_mode, props, BTreeMap::new())
    }

    #[test]
    fn precedence_walks_from_most_specific_to_least() {
        let r = resolver(
            true,
            &[
                ("common.bucket", "g"),
                ("analytics.bucket", "f"),
                ("common.s3.bucket", "e"),
                ("analytics.s3.bucket", "d"),
                ("test.common.s3.bucket", "c"),
                ("test.analytics.s3.bucket", "b"),
            ],
        );
        assert_eq!(r.lookup(Some("s3"), "bucket"), Some("b"));

        let r = resolver(
            false,
            &[
                ("common.bucket", "g"),
                ("analytics.bucket", "f"),
                ("common.s3.bucket", "e"),
                ("test.analytics.s3.bucket", "b"),
            ],
        );
        // test.* layers are ignored outside of local mode.
        assert_eq!(r.lookup(Some("s3"), "bucket"), Some("e"));

        let r = resolver(false, &[("common.bucket", "g"), ("analytics.bucket", "f")]);
        assert_eq!(r.lookup(Some("s3"), "bucket"), Some("f"));
        assert_eq!(r.lookup(None, "bucket"), Some("f"));

        let r = resolver(false, &[("common.bucket", "g")]);
        assert_eq!(r.lookup(Some("s3"), "bucket"), Some("g"));
    }

    #[test]
    fn environment_overrides_win() {
        let props = [("common.bucket".to_string(), "from-props".to_string())]
            .into_iter()
            .collect();
        let overrides = [("bucket".to_string(), "from-env".to_string())]
            .into_iter()
            .collect();
        let r = Resolver::with_overrides("analytics", false, props, overrides);
        assert_eq!(r.lookup(Some("s3"), "bucket"), Some("from-env"));
    }

    #[test]
    fn typed_accessors_parse_and_default() {
        let r = resolver(
            false,
            &[
                ("common.limit", "1024"),
                ("common.ratio", "0.5"),
                ("common.enabled", "TRUE"),
                ("common.garbage", "not-a-number"),
                ("common.streams", "alpha, beta ,,gamma"),
            ],
        );

        assert_eq!(r.get_i64(None, "limit").unwrap(), 1024);
        assert_eq!(r.get_f64(None, "ratio").unwrap(), 0.5);
        assert!(r.get_bool(None, "enabled").unwrap());
        assert_eq!(
            r.get_list(None, "streams").unwrap(),
            vec!["alpha", "beta", "gamma"]
        );

        // Defaults apply only on absence.
        assert_eq!(r.get_i64_or(None, "missing", 7).unwrap(), 7);
        assert!(matches!(
            r.get_i64_or(None, "garbage", 7),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            r.get_i64(None, "missing"),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn flat_json_documents_load() {
        let doc = br#"{
            "common.s3.bucket": "telemetry",
            "common.buffer_record_count_limit": 1000,
            "common.emit_shard_level_metrics": true,
            "common.unset": null
        }"#;
        let r = Resolver::from_json_slice("analytics", false, doc).unwrap();
        assert_eq!(r.lookup(Some("s3"), "bucket"), Some("telemetry"));
        assert_eq!(r.get_i64(None, "buffer_record_count_limit").unwrap(), 1000);
        assert!(r.get_bool(None, "emit_shard_level_metrics").unwrap());
        assert_eq!(r.lookup(None, "unset"), None);

        let nested = br#"{"common.s3": {"bucket": "telemetry"}}"#;
        assert!(matches!(
            Resolver::from_json_slice("analytics", false, nested),
            Err(ConfigError::NotFlat { .. })
        ));
    }

    #[test]
    fn clear_resets_every_layer() {
        let mut r = resolver(false, &[("common.bucket", "g")]);
        r.clear();
        assert_eq!(r.lookup(Some("s3"), "bucket"), None);
    }
}
