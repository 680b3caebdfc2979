use std::fmt;
use std::str::FromStr;

use anyhow::Result;

/// A track as the streaming endpoint knows it.
///
/// The server streams by display name, so `name` is the session key. The
/// numeric id is only carried along for the now-playing record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackRequest {
    pub name: String,
    pub id: Option<u64>,
}

impl TrackRequest {
    pub fn new<S: Into<String>>(name: S, id: Option<u64>) -> Self {
        TrackRequest {
            name: name.into(),
            id,
        }
    }

    pub fn named<S: Into<String>>(name: S) -> Self {
        Self::new(name, None)
    }

    /// Two requests refer to the same stream when their names match and
    /// their ids, where both are known, agree.
    pub fn same_stream(&self, other: &TrackRequest) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) if a != b => false,
            _ => self.name == other.name,
        }
    }
}

impl FromStr for TrackRequest {
    type Err = anyhow::Error;

    /// Accepts `Song name` or `42:Song name`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Track name cannot be empty"));
        }

        if let Some((id, name)) = s.split_once(':') {
            if let Ok(id) = id.trim().parse::<u64>() {
                let name = name.trim();
                if name.is_empty() {
                    return Err(anyhow::anyhow!("Invalid track `{s}`: missing name after id"));
                }
                return Ok(TrackRequest::new(name, Some(id)));
            }
        }

        Ok(TrackRequest::named(s))
    }
}

impl fmt::Display for TrackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} (#{})", self.name, id),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_name() {
        let track: TrackRequest = "Song A".parse().unwrap();
        assert_eq!(track, TrackRequest::named("Song A"));
    }

    #[test]
    fn parses_id_prefix() {
        let track: TrackRequest = "42:Song A".parse().unwrap();
        assert_eq!(track, TrackRequest::new("Song A", Some(42)));
    }

    #[test]
    fn keeps_colons_that_are_not_ids() {
        let track: TrackRequest = "Intro: Reprise".parse().unwrap();
        assert_eq!(track.name, "Intro: Reprise");
        assert_eq!(track.id, None);
    }

    #[test]
    fn rejects_empty_names() {
        assert!("".parse::<TrackRequest>().is_err());
        assert!("7:".parse::<TrackRequest>().is_err());
    }

    #[test]
    fn same_stream_matches_names_when_an_id_is_missing() {
        let a = TrackRequest::new("Song A", Some(1));
        let b = TrackRequest::named("Song A");
        assert!(a.same_stream(&b));
        assert!(b.same_stream(&a));
        assert!(!a.same_stream(&TrackRequest::named("Song B")));
    }

    #[test]
    fn same_stream_rejects_conflicting_ids() {
        let a = TrackRequest::new("Song A", Some(7));
        assert!(a.same_stream(&TrackRequest::new("Song A", Some(7))));
        assert!(!a.same_stream(&TrackRequest::new("Song A", Some(9))));
    }
}
