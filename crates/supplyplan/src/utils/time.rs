use time::{OffsetDateTime, UtcOffset};

const NANOS_PER_MILLI: i128 = 1_000_000;

/// A wall-clock instant captured once and rendered in the forms the store needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    inner: OffsetDateTime,
}

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        Self {
            inner: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn from_unix_ms(timestamp_unix_ms: u64) -> Self {
        let nanos = i128::from(timestamp_unix_ms).saturating_mul(NANOS_PER_MILLI);
        let inner = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
            .to_offset(UtcOffset::UTC);
        Self { inner }
    }

    #[must_use]
    pub fn unix_ms(self) -> u64 {
        let millis = self.inner.unix_timestamp_nanos() / NANOS_PER_MILLI;
        u64::try_from(millis).unwrap_or(0)
    }

    /// `2026-02-25T00:00:00.000Z`
    #[must_use]
    pub fn utc_millis(self) -> String {
        let dt = self.inner;
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
            dt.year(),
            u8::from(dt.month()),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.millisecond()
        )
    }

    /// `20260225T000000.000000000Z`; lexically sortable and safe inside identifiers.
    #[must_use]
    pub fn compact_nanos(self) -> String {
        let dt = self.inner;
        format!(
            "{:04}{:02}{:02}T{:02}{:02}{:02}.{:09}Z",
            dt.year(),
            u8::from(dt.month()),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.nanosecond()
        )
    }
}

#[must_use]
pub fn format_unix_ms(timestamp_unix_ms: u64) -> String {
    Timestamp::from_unix_ms(timestamp_unix_ms).utc_millis()
}

#[cfg(test)]
mod tests {
    use super::{Timestamp, format_unix_ms};

    #[test]
    fn formats_unix_ms_as_utc_millis() {
        assert_eq!(format_unix_ms(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_unix_ms(1_771_977_600_123), "2026-02-25T00:00:00.123Z");
    }

    #[test]
    fn compact_stamp_orders_lexically_with_time() {
        let earlier = Timestamp::from_unix_ms(1_771_977_600_000).compact_nanos();
        let later = Timestamp::from_unix_ms(1_771_977_600_001).compact_nanos();
        assert_eq!(earlier, "20260225T000000.000000000Z");
        assert!(earlier < later);
    }

    #[test]
    fn unix_ms_round_trips_through_timestamp() {
        assert_eq!(Timestamp::from_unix_ms(1_771_977_600_123).unix_ms(), 1_771_977_600_123);
    }
}
