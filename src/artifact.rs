// Finalization output: HLS playlists, JSON sidecars, and the thumbnail
// midpoint calculation. Grounded on `write_m3u8`/`write_meta`/`create_thumbnail`
// in `examples/original_source/pruletynvr/nvr.py`.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding metadata as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed detection timestamp {0:?}")]
    BadTimestamp(String),
}

fn write_file(path: &Path, contents: &str) -> Result<(), Error> {
    std::fs::write(path, contents).map_err(|source| Error::Io {
        path: path.to_owned(),
        source,
    })
}

/// One segment as it will appear in a playlist: its destination path (already
/// copied into the output tree) and its probed duration in seconds.
pub struct PlaylistEntry {
    pub path: PathBuf,
    pub duration_seconds: f64,
}

/// Writes a VOD HLS playlist referencing `entries` by path relative to the
/// playlist's own directory, as `ts/<device_id>/<stream_type>/<file name>`.
/// Every playlist is self-contained: `EXT-X-ENDLIST` is always emitted, and a
/// discontinuity marker separates consecutive segments so that a player never
/// assumes continuous timestamps across a ring-buffer gap.
pub fn write_playlist(
    path: &Path,
    entries: &[PlaylistEntry],
    device_id: &str,
    stream_type: &str,
) -> Result<(), Error> {
    let max_duration = entries
        .iter()
        .map(|e| e.duration_seconds)
        .fold(f64::MIN, f64::max);
    let target_duration = if entries.is_empty() {
        1
    } else {
        max_duration as u64 + 1
    };

    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\n"));
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str("#EXT-X-DISCONTINUITY\n");
        }
        let file_name = entry
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");
        out.push_str(&format!("#EXTINF:{:.3},\n", entry.duration_seconds));
        out.push_str(&format!("ts/{device_id}/{stream_type}/{file_name}\n"));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    write_file(path, &out)
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub did: String,
    pub stream_type: String,
    pub datetime: String,
    pub timestamp: i64,
    pub date: String,
    pub time: String,
}

/// Parses a `YYYYMMDD_HHMMSS` detection timestamp (always UTC; see spec §4.4)
/// into the sidecar metadata for one recorder's output.
pub fn metadata_for_detection(
    device_id: &str,
    stream_type: &str,
    detection_ts: &str,
) -> Result<Metadata, Error> {
    let (date_part, time_part) = detection_ts
        .split_once('_')
        .filter(|(d, t)| d.len() == 8 && t.len() == 6)
        .ok_or_else(|| Error::BadTimestamp(detection_ts.to_owned()))?;
    let bad = || Error::BadTimestamp(detection_ts.to_owned());
    let year: i16 = date_part[0..4].parse().map_err(|_| bad())?;
    let month: i8 = date_part[4..6].parse().map_err(|_| bad())?;
    let day: i8 = date_part[6..8].parse().map_err(|_| bad())?;
    let hour: i8 = time_part[0..2].parse().map_err(|_| bad())?;
    let minute: i8 = time_part[2..4].parse().map_err(|_| bad())?;
    let second: i8 = time_part[4..6].parse().map_err(|_| bad())?;

    let date = jiff::civil::date(year, month, day);
    let datetime = date.at(hour, minute, second, 0);
    let zoned = datetime
        .to_zoned(jiff::tz::TimeZone::UTC)
        .map_err(|_| bad())?;

    Ok(Metadata {
        did: device_id.to_owned(),
        stream_type: stream_type.to_owned(),
        datetime: format!(
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}+00:00"
        ),
        timestamp: zoned.timestamp().as_second(),
        date: format!("{year:04}-{month:02}-{day:02}"),
        time: format!("{hour:02}:{minute:02}:{second:02}"),
    })
}

pub fn write_metadata(path: &Path, meta: &Metadata) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(meta)?;
    write_file(path, &json)
}

/// Picks the segment and in-segment offset nearest the temporal midpoint of
/// a recording, for thumbnail extraction. Returns `None` if `durations` is
/// empty.
pub fn midpoint_offset(durations: &[f64]) -> Option<(usize, f64)> {
    if durations.is_empty() {
        return None;
    }
    let total: f64 = durations.iter().sum();
    let target = total / 2.0;
    let mut acc = 0.0;
    for (i, &dur) in durations.iter().enumerate() {
        if acc + dur >= target {
            return Some((i, target - acc));
        }
        acc += dur;
    }
    Some((durations.len() - 1, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_has_endlist_and_discontinuity_markers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detection_cam1_indoor_20260801_120000.m3u8");
        let entries = vec![
            PlaylistEntry {
                path: PathBuf::from("buffer_20260801_120000.ts"),
                duration_seconds: 3.003,
            },
            PlaylistEntry {
                path: PathBuf::from("buffer_20260801_120003.ts"),
                duration_seconds: 2.5,
            },
        ];
        write_playlist(&path, &entries, "cam1", "indoor").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("#EXTM3U\n"));
        assert!(contents.contains("#EXT-X-TARGETDURATION:4\n"));
        assert!(contents.contains("#EXT-X-DISCONTINUITY\n"));
        assert!(contents.contains("ts/cam1/indoor/buffer_20260801_120000.ts\n"));
        assert!(contents.trim_end().ends_with("#EXT-X-ENDLIST"));
    }

    #[test]
    fn metadata_parses_detection_timestamp_as_utc() {
        let meta = metadata_for_detection("cam1", "indoor", "20260801_143000").unwrap();
        assert_eq!(meta.did, "cam1");
        assert_eq!(meta.date, "2026-08-01");
        assert_eq!(meta.time, "14:30:00");
        assert_eq!(meta.datetime, "2026-08-01T14:30:00+00:00");
    }

    #[test]
    fn metadata_rejects_malformed_timestamp() {
        assert!(metadata_for_detection("cam1", "indoor", "not-a-timestamp").is_err());
    }

    #[test]
    fn midpoint_offset_picks_segment_containing_center() {
        let durations = [3.0, 3.0, 3.0, 3.0];
        assert_eq!(midpoint_offset(&durations), Some((1, 3.0)));
    }

    #[test]
    fn midpoint_offset_empty_is_none() {
        assert_eq!(midpoint_offset(&[]), None);
    }
}
