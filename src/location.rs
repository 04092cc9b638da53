//! GPS fix decoding
//!
//! Location packets carry ASCII text `latitude,longitude,timestamp`. Only the
//! first two commas delimit fields; anything after the second comma, commas
//! included, is the timestamp.
//!
//! The fix is forwarded verbatim as an HTTP header value, so payloads that are
//! not UTF-8 or that contain control bytes (CR and LF in particular) are
//! rejected rather than repaired.

use crate::error::{RelayError, Result};
use tracing::{info, warn};

/// Most recent GPS reading, kept as the sender's text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFix {
    pub latitude: String,
    pub longitude: String,
    pub timestamp: String,
}

impl LocationFix {
    /// Decode a location payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let malformed = || RelayError::MalformedLocation {
            payload: String::from_utf8_lossy(payload).into_owned(),
        };

        let text = std::str::from_utf8(payload).map_err(|_| malformed())?;
        if text.chars().any(char::is_control) {
            return Err(malformed());
        }

        let mut fields = text.splitn(3, ',');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(latitude), Some(longitude), Some(timestamp)) => Ok(Self {
                latitude: latitude.to_string(),
                longitude: longitude.to_string(),
                timestamp: timestamp.to_string(),
            }),
            _ => Err(malformed()),
        }
    }

    /// Text form forwarded in the `gps-data` request header
    pub fn raw(&self) -> String {
        format!("{},{},{}", self.latitude, self.longitude, self.timestamp)
    }
}

/// Parse `payload` and replace `current` only on success
///
/// On failure the previous fix (or the absence of one) is left untouched.
pub fn update_fix(current: &mut Option<LocationFix>, payload: &[u8]) -> Result<()> {
    match LocationFix::parse(payload) {
        Ok(fix) => {
            info!(
                latitude = %fix.latitude,
                longitude = %fix.longitude,
                timestamp = %fix.timestamp,
                "Location fix received"
            );
            *current = Some(fix);
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Invalid GPS data received");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_splits_at_first_two_commas() {
        let fix = LocationFix::parse(b"12.34,56.78,2024-01-01T00:00:00,extra").unwrap();
        assert_eq!(fix.latitude, "12.34");
        assert_eq!(fix.longitude, "56.78");
        assert_eq!(fix.timestamp, "2024-01-01T00:00:00,extra");
        assert_eq!(fix.raw(), "12.34,56.78,2024-01-01T00:00:00,extra");
    }

    #[test]
    fn test_empty_fields_are_accepted() {
        let fix = LocationFix::parse(b",,").unwrap();
        assert_eq!(fix.latitude, "");
        assert_eq!(fix.longitude, "");
        assert_eq!(fix.timestamp, "");
    }

    #[test]
    fn test_rejects_fewer_than_two_commas() {
        assert!(matches!(
            LocationFix::parse(b"12.34,56.78"),
            Err(RelayError::MalformedLocation { .. })
        ));
        assert!(LocationFix::parse(b"").is_err());
        assert!(LocationFix::parse(b"garbage").is_err());
    }

    #[test]
    fn test_rejects_bytes_unfit_for_a_header_line() {
        for payload in [
            &b"1.0,2.0,t\r\n\r\nX"[..],
            b"1.0,2.0,12:00\n",
            b"1.0\t,2.0,t",
            b"1.0,2.0,\x00",
            b"1.0,2.0,\x7f",
        ] {
            assert!(
                matches!(LocationFix::parse(payload), Err(RelayError::MalformedLocation { .. })),
                "accepted {:?}",
                payload
            );
        }
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let err = LocationFix::parse(b"1.0,2.0,\xff\xfe").unwrap_err();
        assert!(matches!(err, RelayError::MalformedLocation { .. }));
        assert!(LocationFix::parse("1.0,2.0,12h00 \u{b0}C".as_bytes()).is_ok());
    }

    #[test]
    fn test_failed_update_keeps_previous_fix() {
        let mut current = None;
        assert!(update_fix(&mut current, b"1.0").is_err());
        assert_eq!(current, None);

        update_fix(&mut current, b"-33.86,151.20,120000").unwrap();
        let stored = current.clone();
        assert!(update_fix(&mut current, b"-33.87;151.21").is_err());
        assert_eq!(current, stored);
        assert!(update_fix(&mut current, b"-33.87,151.21,t\r\nHost: x").is_err());
        assert_eq!(current, stored);
    }

    proptest! {
        #[test]
        fn prop_fields_round_trip(
            lat in "[-0-9.]{0,12}",
            lon in "[-0-9.]{0,12}",
            ts in "[0-9A-Za-z:,-]{0,30}"
        ) {
            let payload = format!("{},{},{}", lat, lon, ts);
            let fix = LocationFix::parse(payload.as_bytes()).unwrap();
            prop_assert_eq!(&fix.latitude, &lat);
            prop_assert_eq!(&fix.longitude, &lon);
            prop_assert_eq!(&fix.timestamp, &ts);
            prop_assert_eq!(fix.raw(), payload);
        }

        #[test]
        fn prop_fewer_than_two_commas_never_updates(text in "[^,]{0,20}(,[^,]{0,20})?") {
            let mut current = None;
            prop_assert!(update_fix(&mut current, text.as_bytes()).is_err());
            prop_assert!(current.is_none());
        }
    }
}
