//! Entry timestamps with nanosecond precision.
//!
//! Archive entries carry Unix-style times: whole seconds since the epoch,
//! which may be negative, plus a nanosecond part. [`Timestamp`] keeps both
//! and normalizes out-of-range nanoseconds on construction.
//!
//! # Example
//!
//! ```rust
//! use arcstream::Timestamp;
//! use std::time::{Duration, SystemTime};
//!
//! let ts = Timestamp::new(1, 2_500_000_000);
//! assert_eq!(ts.secs(), 3);
//! assert_eq!(ts.nanos(), 500_000_000);
//! assert_eq!(
//!     ts.as_system_time(),
//!     SystemTime::UNIX_EPOCH + Duration::from_millis(3500)
//! );
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A point in time as seconds and nanoseconds since the Unix epoch.
///
/// The nanosecond part is always in `0..1_000_000_000`; times before the
/// epoch have negative seconds and a positive nanosecond part, so
/// `-0.25s` is stored as `secs = -1, nanos = 750_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// Creates a timestamp, carrying whole seconds out of `nanos`.
    pub fn new(secs: i64, nanos: i64) -> Self {
        let carry = nanos.div_euclid(NANOS_PER_SECOND);
        let nanos = nanos.rem_euclid(NANOS_PER_SECOND) as u32;
        Self {
            secs: secs.saturating_add(carry),
            nanos,
        }
    }

    /// Creates a timestamp at a whole second.
    pub const fn from_unix_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// Converts a [`SystemTime`], including times before the epoch.
    ///
    /// Returns `None` if the time is outside the range of `i64` seconds.
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => {
                let secs = i64::try_from(after.as_secs()).ok()?;
                Some(Self::new(secs, i64::from(after.subsec_nanos())))
            }
            Err(before) => {
                let before = before.duration();
                let secs = i64::try_from(before.as_secs()).ok()?;
                Some(Self::new(-secs, -i64::from(before.subsec_nanos())))
            }
        }
    }

    /// Converts a [`filetime::FileTime`] as reported by file metadata.
    pub fn from_filetime(time: filetime::FileTime) -> Self {
        Self::new(time.unix_seconds(), i64::from(time.nanoseconds()))
    }

    /// Converts to a [`filetime::FileTime`].
    pub fn as_filetime(&self) -> filetime::FileTime {
        filetime::FileTime::from_unix_time(self.secs, self.nanos)
    }

    /// Whole seconds since the epoch.
    pub const fn secs(&self) -> i64 {
        self.secs
    }

    /// Nanoseconds past [`secs`](Self::secs).
    pub const fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Converts to [`SystemTime`].
    pub fn as_system_time(&self) -> SystemTime {
        let nanos = Duration::from_nanos(u64::from(self.nanos));
        if self.secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.secs as u64) + nanos
        } else {
            UNIX_EPOCH - Duration::from_secs(self.secs.unsigned_abs()) + nanos
        }
    }

    /// Returns true if this time is before 1970-01-01.
    pub fn is_before_unix_epoch(&self) -> bool {
        self.secs < 0
    }
}

impl Default for Timestamp {
    /// Returns the Unix epoch.
    fn default() -> Self {
        Self::from_unix_secs(0)
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> SystemTime {
        ts.as_system_time()
    }
}

impl From<filetime::FileTime> for Timestamp {
    fn from(time: filetime::FileTime) -> Self {
        Self::from_filetime(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch() {
        let ts = Timestamp::default();
        assert_eq!(ts.secs(), 0);
        assert_eq!(ts.nanos(), 0);
        assert_eq!(ts.as_system_time(), UNIX_EPOCH);
    }

    #[test]
    fn test_normalizes_nanos() {
        assert_eq!(Timestamp::new(10, 1_000_000_001), Timestamp::new(11, 1));
        let ts = Timestamp::new(0, -250_000_000);
        assert_eq!((ts.secs(), ts.nanos()), (-1, 750_000_000));
        assert!(ts.is_before_unix_epoch());
    }

    #[test]
    fn test_roundtrip_system_time() {
        let original = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let ts = Timestamp::from_system_time(original).unwrap();
        assert_eq!(ts.as_system_time(), original);
    }

    #[test]
    fn test_before_unix_epoch_system_time() {
        let original = UNIX_EPOCH - Duration::new(86_400, 500_000_000);
        let ts = Timestamp::from_system_time(original).unwrap();
        assert_eq!((ts.secs(), ts.nanos()), (-86_401, 500_000_000));
        assert_eq!(ts.as_system_time(), original);
    }

    #[test]
    fn test_filetime_conversions() {
        let ft = filetime::FileTime::from_unix_time(1_234, 5_678);
        let ts = Timestamp::from(ft);
        assert_eq!((ts.secs(), ts.nanos()), (1_234, 5_678));
        assert_eq!(ts.as_filetime(), ft);
    }

    #[test]
    fn test_ordering() {
        assert!(Timestamp::new(-1, 999_999_999) < Timestamp::from_unix_secs(0));
        assert!(Timestamp::new(5, 1) > Timestamp::new(5, 0));
    }
}
