use chrono::{DateTime, Utc};
use config::{ConfigError, Resolver};
use std::time::{Duration, Instant};

/// Flush thresholds for a [`Buffer`]. A buffer is due for flushing once
/// any one of them is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    pub byte_limit: usize,
    pub record_limit: usize,
    pub age_limit: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            byte_limit: 1024 * 1024,
            record_limit: 1000,
            age_limit: Duration::from_secs(60),
        }
    }
}

impl BufferConfig {
    pub fn from_config(cfg: &Resolver, connector: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            byte_limit: cfg.get_usize_or(connector, "buffer_byte_size_limit", defaults.byte_limit)?,
            record_limit: cfg.get_usize_or(
                connector,
                "buffer_record_count_limit",
                defaults.record_limit,
            )?,
            age_limit: Duration::from_millis(cfg.get_u64_or(
                connector,
                "buffer_milliseconds_limit",
                defaults.age_limit.as_millis() as u64,
            )?),
        })
    }
}

/// A time-and-size-bounded accumulation of records awaiting emission.
/// Single-threaded; owned by exactly one shard processor.
#[derive(Debug)]
pub struct Buffer<T> {
    cfg: BufferConfig,
    records: Vec<T>,
    byte_count: usize,
    first_sequence_number: Option<String>,
    last_sequence_number: Option<String>,
    /// Arrival time of the first buffered record, which also names the
    /// time partition of the archival object written for this batch.
    first_timestamp: Option<DateTime<Utc>>,
    first_event_timestamp: Option<i64>,
    last_flush: Instant,
}

/// A borrowed view of the buffer handed to emitters. Emit retries take
/// a fresh snapshot of the same unchanged buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferSnapshot<'a, T> {
    pub records: &'a [T],
    pub first_sequence_number: Option<&'a str>,
    pub last_sequence_number: Option<&'a str>,
    pub first_timestamp: Option<DateTime<Utc>>,
}

impl<T> Buffer<T> {
    pub fn new(cfg: BufferConfig) -> Self {
        Self {
            cfg,
            records: Vec::new(),
            byte_count: 0,
            first_sequence_number: None,
            last_sequence_number: None,
            first_timestamp: None,
            first_event_timestamp: None,
            last_flush: Instant::now(),
        }
    }

    pub fn append(
        &mut self,
        record: T,
        byte_len: usize,
        sequence_number: &str,
        event_timestamp: i64,
        arrival: DateTime<Utc>,
    ) {
        if self.records.is_empty() {
            self.first_sequence_number = Some(sequence_number.to_string());
            self.first_timestamp = Some(arrival);
            self.first_event_timestamp = Some(event_timestamp);
        }
        self.last_sequence_number = Some(sequence_number.to_string());
        self.byte_count += byte_len;
        self.records.push(record);
    }

    /// True iff the buffer is non-empty and any flush threshold is met.
    /// Age is measured on the monotonic clock since the last clear.
    pub fn should_flush(&self) -> bool {
        !self.records.is_empty()
            && (self.records.len() >= self.cfg.record_limit
                || self.byte_count >= self.cfg.byte_limit
                || self.last_flush.elapsed() >= self.cfg.age_limit)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn first_sequence_number(&self) -> Option<&str> {
        self.first_sequence_number.as_deref()
    }

    pub fn last_sequence_number(&self) -> Option<&str> {
        self.last_sequence_number.as_deref()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.first_timestamp
    }

    pub fn first_event_timestamp(&self) -> Option<i64> {
        self.first_event_timestamp
    }

    pub fn snapshot(&self) -> BufferSnapshot<'_, T> {
        BufferSnapshot {
            records: &self.records,
            first_sequence_number: self.first_sequence_number.as_deref(),
            last_sequence_number: self.last_sequence_number.as_deref(),
            first_timestamp: self.first_timestamp,
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.byte_count = 0;
        self.first_sequence_number = None;
        self.last_sequence_number = None;
        self.first_timestamp = None;
        self.first_event_timestamp = None;
        self.last_flush = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn arrival() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1508872164000).unwrap()
    }

    fn unbounded() -> BufferConfig {
        BufferConfig {
            byte_limit: usize::MAX,
            record_limit: usize::MAX,
            age_limit: Duration::from_secs(3600),
        }
    }

    #[test]
    fn flushes_by_record_count() {
        let cfg = BufferConfig {
            record_limit: 3,
            ..unbounded()
        };
        let mut buffer = Buffer::new(cfg);

        for (i, seq) in ["s-1", "s-2", "s-3"].iter().enumerate() {
            assert!(!buffer.should_flush());
            buffer.append(vec![0u8; 10], 10, seq, i as i64, arrival());
        }
        assert!(buffer.should_flush());
        assert_eq!(buffer.first_sequence_number(), Some("s-1"));
        assert_eq!(buffer.last_sequence_number(), Some("s-3"));
        assert_eq!(buffer.byte_count(), 30);

        buffer.clear();
        assert!(!buffer.should_flush());
    }

    #[test]
    fn flushes_by_bytes() {
        let cfg = BufferConfig {
            byte_limit: 25,
            ..unbounded()
        };
        let mut buffer = Buffer::new(cfg);
        buffer.append((), 10, "s-1", 0, arrival());
        assert!(!buffer.should_flush());
        buffer.append((), 20, "s-2", 0, arrival());
        assert!(buffer.should_flush());
    }

    #[test]
    fn flushes_by_age() {
        let cfg = BufferConfig {
            age_limit: Duration::from_millis(0),
            ..unbounded()
        };
        let mut buffer = Buffer::new(cfg);
        assert!(!buffer.should_flush(), "an empty buffer never flushes");
        buffer.append((), 1, "s-1", 0, arrival());
        assert!(buffer.should_flush());
    }

    #[test]
    fn clear_resets_every_statistic() {
        let mut buffer = Buffer::new(unbounded());
        buffer.append((), 10, "s-1", 7, arrival());
        buffer.append((), 10, "s-2", 8, arrival());
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.byte_count(), 0);
        assert_eq!(buffer.first_sequence_number(), None);
        assert_eq!(buffer.last_sequence_number(), None);
        assert_eq!(buffer.first_timestamp(), None);
        assert_eq!(buffer.first_event_timestamp(), None);
    }

    #[test]
    fn single_small_record_does_not_flush() {
        let cfg = BufferConfig {
            byte_limit: 100,
            record_limit: 10,
            age_limit: Duration::from_secs(3600),
        };
        let mut buffer = Buffer::new(cfg);
        buffer.append((), 10, "s-1", 0, arrival());
        assert!(!buffer.should_flush());
    }
}
