// The segment watcher loop (spec.md §4.2/§4.3): notices new segments
// settling into the RAM directory, prunes the ring buffer while idle, and
// detects post-roll expiry. Grounded on `CameraRecorder._segment_watcher`
// and `_prune_buffer` in
// `examples/original_source/pruletynvr/nvr.py`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use base::clock::Clocks;
use base::shutdown;

use super::event::Event;
use super::state::SharedState;
use crate::segment;

const SETTLE_DELAY: Duration = Duration::from_millis(300);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Removes the oldest segments in `ram_dir` until the buffered duration is
/// at or below `pre_roll`, always keeping at least one segment so a detection
/// arriving this instant still has something to work with.
pub fn prune_buffer(name: &str, ffprobe_bin: &str, ram_dir: &Path, pre_roll: Duration, fallback_duration: f64) {
    let Ok(segments) = segment::list_sorted(ram_dir) else {
        return;
    };
    let mut durations: Vec<f64> = segments
        .iter()
        .map(|s| {
            crate::mediatool::probe_duration(ffprobe_bin, &s.path).unwrap_or(fallback_duration)
        })
        .collect();
    let mut segments = segments;
    let pre_roll_secs = pre_roll.as_secs_f64();
    let mut total: f64 = durations.iter().sum();
    while total > pre_roll_secs && segments.len() > 1 {
        let oldest = segments.remove(0);
        total -= durations.remove(0);
        match std::fs::remove_file(&oldest.path) {
            Ok(()) => debug!(
                recorder = name,
                segment = oldest.file_name(),
                buffered_seconds = total,
                "pruned ring buffer segment"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(recorder = name, error = %e, "pruning segment"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run<C: Clocks>(
    name: &str,
    ffmpeg_bin: &str,
    ram_dir: &Path,
    pre_roll: Duration,
    post_roll: Duration,
    segment_duration_seconds: u64,
    state: &SharedState,
    finalize_event: &Event,
    shutdown_rx: &shutdown::Receiver,
    clocks: &C,
) {
    let mut known: HashSet<String> = HashSet::new();
    loop {
        if shutdown_rx.check().is_err() {
            return;
        }

        let current: HashSet<String> = match segment::list_sorted(ram_dir) {
            Ok(segments) => segments.iter().map(|s| s.file_name().to_owned()).collect(),
            Err(_) => HashSet::new(),
        };
        let mut new_files: Vec<&String> = current.difference(&known).collect();
        if !new_files.is_empty() {
            if shutdown_rx.wait_for(SETTLE_DELAY).is_err() {
                return;
            }
            new_files.sort();
            for file_name in &new_files {
                debug!(recorder = name, segment = file_name.as_str(), "new segment");
            }
            known = current;
            if state.is_idle() {
                prune_buffer(
                    name,
                    ffmpeg_bin,
                    ram_dir,
                    pre_roll,
                    segment_duration_seconds as f64,
                );
            }
        }

        if state.try_begin_finalizing(clocks.realtime(), post_roll) {
            finalize_event.set();
        }

        if shutdown_rx.wait_for(POLL_INTERVAL).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_buffer_keeps_at_least_one_segment() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "buffer_20260801_120000.ts",
            "buffer_20260801_120003.ts",
            "buffer_20260801_120006.ts",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        // ffprobe doesn't exist in the test environment, so every duration
        // falls back to `fallback_duration` (3s); pruning should reduce the
        // 9s buffer down to a single segment, since 5s pre-roll can't even
        // hold two, and at least one always survives.
        prune_buffer(
            "test",
            "nvr-test-nonexistent-ffprobe",
            dir.path(),
            Duration::from_secs(5),
            3.0,
        );
        let remaining = segment::list_sorted(dir.path()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].file_name(), "buffer_20260801_120006.ts");
    }

    #[test]
    fn prune_buffer_on_empty_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        prune_buffer("test", "ffprobe", dir.path(), Duration::from_secs(5), 3.0);
    }
}
