// The finalization pipeline (spec.md §4.4): waits for the watcher to signal
// post-roll expiry, lets the buffer settle, then builds the HLS playlist,
// MP4, thumbnail, and metadata sidecars. Grounded on
// `CameraRecorder._finalizer`/`_finalize` in
// `examples/original_source/pruletynvr/nvr.py`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use jiff::tz::TimeZone;
use jiff::Timestamp;
use tracing::{debug, error, info, warn};

use base::clock::Clocks;
use base::shutdown;

use super::event::Event;
use super::state::SharedState;
use crate::artifact::{self, PlaylistEntry};
use crate::mediatool;
use crate::segment;

const FINALIZE_WAIT: Duration = Duration::from_secs(2);

pub struct Paths {
    /// Where the segmenter writes live segments: `<ram_base>/<did>/<stream_type>`.
    pub ram_dir: PathBuf,
    /// Where finalized segments are copied for HLS serving:
    /// `<output_base>/m3u8/ts/<did>/<stream_type>`.
    pub out_ts: PathBuf,
    /// Where playlists, their sidecars, and thumbnails land: `<output_base>/m3u8`.
    pub out_m3u8: PathBuf,
    /// Where MP4s and their sidecars land: `<output_base>`.
    pub out_mp4: PathBuf,
}

fn detection_ts_string(last_detection: Timestamp) -> String {
    let zoned = last_detection.to_zoned(TimeZone::UTC);
    let date = zoned.date();
    let time = zoned.time();
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        date.year(),
        date.month(),
        date.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

#[allow(clippy::too_many_arguments)]
pub fn run<C: Clocks>(
    name: &str,
    device_id: &str,
    stream_type: &str,
    ffmpeg_bin: &str,
    ffprobe_bin: &str,
    paths: &Paths,
    segment_duration_seconds: u64,
    state: &SharedState,
    finalize_event: &Event,
    shutdown_rx: &shutdown::Receiver,
    clocks: &C,
) {
    loop {
        if !finalize_event.wait_timeout(FINALIZE_WAIT) {
            if shutdown_rx.check().is_err() {
                return;
            }
            continue;
        }
        if shutdown_rx.check().is_err() {
            return;
        }

        let (current_state, _) = state.snapshot();
        if current_state != super::state::State::Finalizing {
            continue;
        }

        // Let the segmenter finish writing the segment in flight before we
        // snapshot the directory; a fresh detection arriving in this window
        // resumes RECORDING and this pass is abandoned below.
        let quiescence = Duration::from_secs(segment_duration_seconds) + Duration::from_millis(500);
        if shutdown_rx.wait_for(quiescence).is_err() {
            return;
        }

        let (current_state, last_detection) = state.snapshot();
        if current_state != super::state::State::Finalizing {
            continue;
        }
        let Some(last_detection) = last_detection else {
            state.end_finalizing();
            continue;
        };

        let detection_ts = detection_ts_string(last_detection);
        if let Err(e) = finalize_one(
            name,
            device_id,
            stream_type,
            ffmpeg_bin,
            ffprobe_bin,
            paths,
            segment_duration_seconds,
            &detection_ts,
            clocks,
        ) {
            error!(recorder = name, error = %e, "finalization failed");
        }
        state.end_finalizing();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no segments to finalize")]
    NoSegments,
    #[error("listing ram directory: {0}")]
    ListSegments(#[source] std::io::Error),
    #[error("creating output directories: {0}")]
    CreateDirs(#[source] std::io::Error),
}

#[allow(clippy::too_many_arguments)]
fn finalize_one<C: Clocks>(
    name: &str,
    device_id: &str,
    stream_type: &str,
    ffmpeg_bin: &str,
    ffprobe_bin: &str,
    paths: &Paths,
    segment_duration_seconds: u64,
    detection_ts: &str,
    clocks: &C,
) -> Result<(), Error> {
    let segments = segment::list_sorted(&paths.ram_dir).map_err(Error::ListSegments)?;
    if segments.is_empty() {
        warn!(recorder = name, "finalize triggered with no segments");
        return Err(Error::NoSegments);
    }
    info!(recorder = name, count = segments.len(), %detection_ts, "finalizing");

    std::fs::create_dir_all(&paths.out_ts).map_err(Error::CreateDirs)?;
    std::fs::create_dir_all(&paths.out_m3u8).map_err(Error::CreateDirs)?;
    std::fs::create_dir_all(&paths.out_mp4).map_err(Error::CreateDirs)?;

    let prefix = format!("{device_id}_{stream_type}_{detection_ts}");

    let mut copied = Vec::with_capacity(segments.len());
    for seg in &segments {
        let dest = paths.out_ts.join(seg.file_name());
        let _t = base::clock::TimerGuard::new(clocks, || format!("copying {}", seg.file_name()));
        match std::fs::copy(&seg.path, &dest) {
            Ok(_) => copied.push(dest),
            Err(e) => error!(recorder = name, segment = seg.file_name(), error = %e, "copying segment"),
        }
    }
    if copied.is_empty() {
        return Err(Error::NoSegments);
    }

    let durations: Vec<f64> = copied
        .iter()
        .map(|p| {
            mediatool::probe_duration(ffprobe_bin, p).unwrap_or(segment_duration_seconds as f64)
        })
        .collect();
    let total: f64 = durations.iter().sum();
    info!(recorder = name, total_seconds = total, segments = copied.len(), "building playlist");

    let playlist_entries: Vec<PlaylistEntry> = copied
        .iter()
        .zip(durations.iter())
        .map(|(path, &duration_seconds)| PlaylistEntry {
            path: path.clone(),
            duration_seconds,
        })
        .collect();
    let m3u8_path = paths.out_m3u8.join(format!("detection_{prefix}.m3u8"));
    if let Err(e) = artifact::write_playlist(&m3u8_path, &playlist_entries, device_id, stream_type)
    {
        error!(recorder = name, error = %e, "writing playlist");
    } else {
        info!(recorder = name, path = %m3u8_path.display(), "wrote playlist");
    }

    match artifact::metadata_for_detection(device_id, stream_type, detection_ts) {
        Ok(meta) => {
            let meta_path = paths.out_m3u8.join(format!("detection_{prefix}.m3u8.meta"));
            if let Err(e) = artifact::write_metadata(&meta_path, &meta) {
                error!(recorder = name, error = %e, "writing playlist metadata");
            }
        }
        Err(e) => error!(recorder = name, error = %e, "computing metadata"),
    }

    if let Some((seg_index, offset)) = artifact::midpoint_offset(&durations) {
        let thumb_path = paths.out_m3u8.join(format!("detection_{prefix}.m3u8.jpg"));
        if let Err(e) = mediatool::extract_thumbnail(ffmpeg_bin, &copied[seg_index], offset, &thumb_path)
        {
            error!(recorder = name, error = %e, "extracting thumbnail");
        } else {
            debug!(recorder = name, path = %thumb_path.display(), "wrote thumbnail");
        }
    }

    let mp4_path = paths.out_mp4.join(format!("detection_{prefix}.mp4"));
    if let Err(e) = mediatool::concat_mp4(ffmpeg_bin, &copied, &mp4_path) {
        error!(recorder = name, error = %e, "concatenating mp4");
    } else {
        info!(recorder = name, path = %mp4_path.display(), "wrote mp4");
    }

    match artifact::metadata_for_detection(device_id, stream_type, detection_ts) {
        Ok(meta) => {
            let meta_path = paths.out_mp4.join(format!("detection_{prefix}.mp4.meta"));
            if let Err(e) = artifact::write_metadata(&meta_path, &meta) {
                error!(recorder = name, error = %e, "writing mp4 metadata");
            }
        }
        Err(e) => error!(recorder = name, error = %e, "computing metadata"),
    }

    for seg in &segments {
        if let Err(e) = std::fs::remove_file(&seg.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(recorder = name, segment = seg.file_name(), error = %e, "cleaning up ram segment");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_ts_formats_as_utc_compact_timestamp() {
        let ts = Timestamp::from_second(1_700_000_000).unwrap();
        let s = detection_ts_string(ts);
        assert_eq!(s.len(), "YYYYMMDD_HHMMSS".len());
        assert!(s.contains('_'));
    }

    #[test]
    fn finalize_one_with_no_segments_errors() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            ram_dir: dir.path().join("ram"),
            out_ts: dir.path().join("ts"),
            out_m3u8: dir.path().join("m3u8"),
            out_mp4: dir.path().join("mp4"),
        };
        let clocks = base::clock::RealClocks;
        let err = finalize_one(
            "test",
            "cam1",
            "indoor",
            "ffmpeg",
            "ffprobe",
            &paths,
            3,
            "20260801_120000",
            &clocks,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSegments));
    }

    #[test]
    fn finalize_one_copies_and_emits_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let ram_dir = dir.path().join("ram");
        std::fs::create_dir_all(&ram_dir).unwrap();
        std::fs::write(ram_dir.join("buffer_20260801_120000.ts"), b"fake-ts-data").unwrap();

        let paths = Paths {
            ram_dir,
            out_ts: dir.path().join("ts"),
            out_m3u8: dir.path().join("m3u8"),
            out_mp4: dir.path().join("mp4"),
        };
        let clocks = base::clock::RealClocks;
        // ffmpeg/ffprobe aren't present in the test environment; every probe
        // and media-tool call falls back or fails gracefully, but the
        // playlist/metadata/cleanup steps (pure Rust) must still happen.
        let result = finalize_one(
            "test",
            "cam1",
            "indoor",
            "nvr-test-nonexistent-ffmpeg",
            "nvr-test-nonexistent-ffprobe",
            &paths,
            3,
            "20260801_120000",
            &clocks,
        );
        assert!(result.is_ok());
        assert!(paths.out_ts.join("buffer_20260801_120000.ts").exists());
        assert!(paths
            .out_m3u8
            .join("detection_cam1_indoor_20260801_120000.m3u8")
            .exists());
        assert!(paths
            .out_m3u8
            .join("detection_cam1_indoor_20260801_120000.m3u8.meta")
            .exists());
        assert!(!paths.ram_dir.join("buffer_20260801_120000.ts").exists());
    }
}
