use chrono::{DateTime, Datelike, Utc};

/// One calendar month, the partitioning unit of the time-series event
/// tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    /// 1-based month.
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month));
        Self { year, month }
    }

    pub fn now_utc() -> Self {
        Self::of(Utc::now())
    }

    pub fn of(ts: DateTime<Utc>) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    pub fn plus_months(self, delta: i32) -> Self {
        let total = self.year * 12 + (self.month as i32 - 1) + delta;
        Self {
            year: total.div_euclid(12),
            month: (total.rem_euclid(12) + 1) as u32,
        }
    }

    /// The table name for this month under a dataset prefix:
    /// `<prefix>_YYYY_MM`, zero-padded.
    pub fn table_name(&self, prefix: &str) -> String {
        format!("{prefix}_{:04}_{:02}", self.year, self.month)
    }

    /// All months from `oldest` through `newest`, inclusive, in order.
    pub fn range_inclusive(oldest: Self, newest: Self) -> Vec<Self> {
        let mut months = Vec::new();
        let mut current = oldest;
        while current <= newest {
            months.push(current);
            current = current.plus_months(1);
        }
        months
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_wraps_across_year_boundaries() {
        let jan = YearMonth::new(2018, 1);
        assert_eq!(jan.plus_months(-1), YearMonth::new(2017, 12));
        assert_eq!(jan.plus_months(-13), YearMonth::new(2016, 12));
        assert_eq!(jan.plus_months(11), YearMonth::new(2018, 12));
        assert_eq!(jan.plus_months(12), YearMonth::new(2019, 1));
    }

    #[test]
    fn table_names_are_zero_padded() {
        assert_eq!(YearMonth::new(2017, 6).table_name("events"), "events_2017_06");
        assert_eq!(YearMonth::new(987, 12).table_name("events"), "events_0987_12");
    }

    #[test]
    fn ranges_are_inclusive_and_ordered() {
        let months = YearMonth::range_inclusive(YearMonth::new(2017, 11), YearMonth::new(2018, 2));
        assert_eq!(
            months,
            vec![
                YearMonth::new(2017, 11),
                YearMonth::new(2017, 12),
                YearMonth::new(2018, 1),
                YearMonth::new(2018, 2),
            ]
        );
    }

    #[test]
    fn ordering_is_chronological() {
        assert!(YearMonth::new(2017, 12) < YearMonth::new(2018, 1));
        assert!(YearMonth::new(2017, 6) < YearMonth::new(2017, 9));
    }
}
