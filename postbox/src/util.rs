use chrono::{DateTime, TimeZone, Utc};

/// Timestamps are persisted as nano-seconds since the Unix epoch. Dates
/// outside of the representable range (roughly 1677 - 2262) saturate.
pub fn to_nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(if time.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Inverse of [to_nanos].
pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_nanos() {
        let now = Utc::now();
        assert_eq!(from_nanos(to_nanos(now)), now);
        assert_eq!(to_nanos(from_nanos(0)), 0);
    }

    #[test]
    fn test_nanos_saturate() {
        let far_future = Utc::now() + Duration::days(365 * 1000);
        assert_eq!(to_nanos(far_future), i64::MAX);
        let far_past = Utc::now() - Duration::days(365 * 1000);
        assert_eq!(to_nanos(far_past), i64::MIN);
    }
}
