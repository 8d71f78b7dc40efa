use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An opaque keyset-pagination cursor over `(sort_key, scan_id)` (spec §4.7).
///
/// Encoded as base64 of `"<rfc3339 sort_key>|<scan_id>"` so listings stay on the
/// `finished_at`/`queued_at` indexes instead of falling back to `OFFSET`, which would
/// defeat the partial index spec §4.1 requires at volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub sort_key: DateTime<Utc>,
    pub scan_id: Uuid,
}

impl Cursor {
    pub fn encode(self) -> String {
        let raw = format!("{}|{}", self.sort_key.to_rfc3339(), self.scan_id);
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> Option<Self> {
        let raw = URL_SAFE_NO_PAD.decode(token).ok()?;
        let raw = String::from_utf8(raw).ok()?;
        let (sort_key, scan_id) = raw.split_once('|')?;
        Some(Cursor {
            sort_key: DateTime::parse_from_rfc3339(sort_key).ok()?.with_timezone(&Utc),
            scan_id: scan_id.parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let c = Cursor {
            sort_key: Utc::now(),
            scan_id: Uuid::new_v4(),
        };
        let encoded = c.encode();
        let decoded = Cursor::decode(&encoded).expect("decode");
        assert_eq!(decoded.scan_id, c.scan_id);
        assert_eq!(decoded.sort_key.timestamp_millis(), c.sort_key.timestamp_millis());
    }

    #[test]
    fn garbage_cursor_is_rejected() {
        assert!(Cursor::decode("not-a-cursor").is_none());
    }
}
