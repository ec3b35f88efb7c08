use config::{ConfigError, Resolver};
use std::time::Duration;

/// Where a freshly started worker begins reading a shard it has no
/// checkpoint for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPosition {
    TrimHorizon,
    Latest,
}

impl std::str::FromStr for StreamPosition {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRIM_HORIZON" => Ok(StreamPosition::TrimHorizon),
            "LATEST" => Ok(StreamPosition::Latest),
            _ => Err(()),
        }
    }
}

/// Stream-transport settings resolved and validated here, consumed by
/// the worker wiring that owns the concrete stream client.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub input_stream: String,
    pub file_stream: String,
    pub region: String,
    pub max_records_per_get: usize,
    pub initial_position: StreamPosition,
    pub idle_time_between_reads: Duration,
}

impl StreamSettings {
    pub fn from_config(cfg: &Resolver, connector: Option<&str>) -> Result<Self, ConfigError> {
        let position_key = "kinesis_initial_stream_position";
        let position_value = cfg.get_string_or(connector, position_key, "TRIM_HORIZON");
        let initial_position = position_value.parse().map_err(|()| ConfigError::Parse {
            key: position_key.to_string(),
            value: position_value,
            expected: "TRIM_HORIZON or LATEST",
        })?;

        Ok(Self {
            input_stream: cfg.get_string(connector, "kinesis_input_stream")?,
            file_stream: cfg.get_string(connector, "kinesis_file_stream")?,
            region: cfg.get_string_or(connector, "aws_region_name", "us-east-1"),
            max_records_per_get: cfg.get_usize_or(connector, "kinesis_max_records_per_get", 1000)?,
            initial_position,
            idle_time_between_reads: Duration::from_millis(cfg.get_u64_or(
                connector,
                "kinesis_idle_time_between_reads_millis",
                1000,
            )?),
        })
    }
}
