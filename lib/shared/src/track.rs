use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A track as seen by either the remote catalog or the local file scanner.
///
/// Two records are the same track when their `uri` matches, whatever the
/// rest of the metadata says.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrackRecord {
    pub id: String,
    pub uri: String,
    pub title: String,
    pub artists: String,
    #[serde(default)]
    pub album: String,
    /// Milliseconds. Absent and zero both mean "unknown".
    #[serde(default, alias = "duration")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
}

impl TrackRecord {
    /// Duration usable for comparisons, `None` when unknown.
    pub fn known_duration(&self) -> Option<u64> {
        self.duration_ms.filter(|ms| *ms > 0)
    }

    /// Formats the duration as MM:SS, or "Unknown".
    pub fn duration_display(&self) -> String {
        match self.known_duration() {
            Some(ms) => {
                let total_seconds = ms / 1000;
                format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
            }
            None => "Unknown".to_string(),
        }
    }

    pub fn has_uri(&self) -> bool {
        !self.uri.trim().is_empty()
    }

    /// Checks that the record can take part in a download or a cleanup.
    pub fn validate_actionable(&self) -> Result<(), String> {
        if self.has_uri() {
            Ok(())
        } else {
            Err(format!(
                "track '{}' by '{}' has no uri",
                self.title, self.artists
            ))
        }
    }
}

impl PartialEq for TrackRecord {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for TrackRecord {}

impl Hash for TrackRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}

/// A playlist a track belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PlaylistRef {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(uri: &str, duration_ms: Option<u64>) -> TrackRecord {
        TrackRecord {
            id: uri.to_string(),
            uri: uri.to_string(),
            title: "Title".to_string(),
            artists: "Artist".to_string(),
            duration_ms,
            ..Default::default()
        }
    }

    #[test]
    fn equality_is_by_uri() {
        let mut a = track("spotify:track:1", Some(1000));
        let b = track("spotify:track:1", Some(2000));
        assert_eq!(a, b);
        a.uri = "spotify:track:2".to_string();
        assert_ne!(a, b);
    }

    #[test]
    fn zero_duration_is_unknown() {
        assert_eq!(track("u", Some(0)).known_duration(), None);
        assert_eq!(track("u", None).duration_display(), "Unknown");
        assert_eq!(track("u", Some(185_000)).duration_display(), "03:05");
    }

    #[test]
    fn blank_uri_is_not_actionable() {
        assert!(track("  ", None).validate_actionable().is_err());
        assert!(track("spotify:track:1", None).validate_actionable().is_ok());
    }

    #[test]
    fn accepts_legacy_duration_field() {
        let json = r#"{"id":"1","uri":"u","title":"t","artists":"a","duration":1234}"#;
        let parsed: TrackRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.duration_ms, Some(1234));
        assert!(!parsed.is_local);
    }
}
