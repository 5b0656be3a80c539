//! Playback duration totals and their display.
//!
//! All arithmetic is integer floor division on milliseconds: a collection
//! of 59.9 seconds shows as `0min 59sec`, never rounded up.

use crate::protocol::catalog::Track;

const MS_PER_SECOND: u64 = 1_000;
const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;

/// Sum of the tracks' durations in milliseconds.
#[must_use]
pub fn total_duration_ms(tracks: &[Track]) -> u64 {
    tracks
        .iter()
        .fold(0_u64, |total, track| total.saturating_add(track.duration_ms))
}

/// Formats a collection's total duration as `1h 2min` from one hour
/// onwards, and as `2min 5sec` below that.
#[must_use]
pub fn format_collection_duration(ms: u64) -> String {
    let seconds = ms / MS_PER_SECOND;
    let hours = seconds / SECONDS_PER_HOUR;
    let minutes = seconds % SECONDS_PER_HOUR / SECONDS_PER_MINUTE;

    if hours > 0 {
        format!("{hours}h {minutes}min")
    } else {
        format!("{minutes}min {}sec", seconds % SECONDS_PER_MINUTE)
    }
}

/// Formats a single track's duration as `m:ss`.
#[must_use]
pub fn format_track_duration(ms: u64) -> String {
    let seconds = ms / MS_PER_SECOND;
    format!(
        "{}:{:02}",
        seconds / SECONDS_PER_MINUTE,
        seconds % SECONDS_PER_MINUTE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::catalog::AlbumRef;

    fn track(duration_ms: u64) -> Track {
        Track {
            id: None,
            name: "Track".to_owned(),
            artists: Vec::new(),
            album: AlbumRef::default(),
            duration_ms,
        }
    }

    #[test]
    fn collection_durations() {
        assert_eq!(format_collection_duration(3_725_000), "1h 2min");
        assert_eq!(format_collection_duration(125_000), "2min 5sec");
        assert_eq!(format_collection_duration(3_600_000), "1h 0min");
        assert_eq!(format_collection_duration(0), "0min 0sec");
    }

    #[test]
    fn floors_instead_of_rounding() {
        assert_eq!(format_collection_duration(59_999), "0min 59sec");
        assert_eq!(format_collection_duration(3_599_999), "59min 59sec");
        assert_eq!(format_track_duration(61_999), "1:01");
    }

    #[test]
    fn track_durations() {
        assert_eq!(format_track_duration(5_000), "0:05");
        assert_eq!(format_track_duration(754_000), "12:34");
    }

    #[test]
    fn sums_tracks() {
        let tracks = [track(1_000_000), track(2_725_000), track(0)];
        assert_eq!(total_duration_ms(&tracks), 3_725_000);
        assert_eq!(
            format_collection_duration(total_duration_ms(&tracks)),
            "1h 2min"
        );
        assert_eq!(total_duration_ms(&[]), 0);
    }
}
