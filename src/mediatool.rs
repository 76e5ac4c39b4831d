// Wrappers around the external media toolchain (spec.md §6): a black-box
// `ffmpeg`/`ffprobe` invoked by command line, never linked in-process.
// Grounded on `ffmpeg-writer`'s `Command`-spawning style (thiserror enum with
// `#[from]` conversions) and the exact argument lists in
// `examples/original_source/pruletynvr/nvr.py`.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("spawning {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout {
        program: &'static str,
        timeout: Duration,
    },

    #[error("{program} exited with {status}: {stderr}")]
    NonZeroExit {
        program: &'static str,
        status: ExitStatus,
        stderr: String,
    },

    #[error("parsing {program} output {output:?}: {source}")]
    UnparseableOutput {
        program: &'static str,
        output: String,
        #[source]
        source: std::num::ParseFloatError,
    },

    #[error("building concat list: {0}")]
    ConcatList(#[source] std::io::Error),
}

/// Polls `child` until it exits or `timeout` elapses, killing it on timeout.
/// A blocking poll loop rather than a `wait_with_output` thread is
/// sufficient here: every caller already expects to block the finalizer
/// thread for the duration of the external command.
fn wait_with_timeout(
    mut child: Child,
    program: &'static str,
    timeout: Duration,
) -> Result<std::process::Output, Error> {
    let start = Instant::now();
    loop {
        match child.try_wait().map_err(|source| Error::Spawn { program, source })? {
            Some(_status) => {
                return child
                    .wait_with_output()
                    .map_err(|source| Error::Spawn { program, source });
            }
            None => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::Timeout { program, timeout });
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn run(mut cmd: Command, program: &'static str, timeout: Duration) -> Result<Vec<u8>, Error> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let child = cmd.spawn().map_err(|source| Error::Spawn { program, source })?;
    let output = wait_with_timeout(child, program, timeout)?;
    if !output.status.success() {
        return Err(Error::NonZeroExit {
            program,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output.stdout)
}

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONCAT_TIMEOUT: Duration = Duration::from_secs(120);

/// Probes a segment's exact duration in seconds.
///
/// `ffprobe -v quiet -show_entries format=duration -of csv=p=0 <segment>`
pub fn probe_duration(probe_bin: &str, segment: &Path) -> Result<f64, Error> {
    let mut cmd = Command::new(probe_bin);
    cmd.args([
        "-v",
        "quiet",
        "-show_entries",
        "format=duration",
        "-of",
        "csv=p=0",
    ])
    .arg(segment);
    let stdout = run(cmd, "ffprobe", PROBE_TIMEOUT)?;
    let text = String::from_utf8_lossy(&stdout);
    text.trim()
        .parse::<f64>()
        .map_err(|source| Error::UnparseableOutput {
            program: "ffprobe",
            output: text.trim().to_owned(),
            source,
        })
}

/// Extracts a single JPEG frame at `offset_secs` into the segment.
///
/// `ffmpeg -y -loglevel warning -ss <offset> -i <segment> -frames:v 1 -q:v 2 <out.jpg>`
pub fn extract_thumbnail(
    ffmpeg_bin: &str,
    segment: &Path,
    offset_secs: f64,
    out: &Path,
) -> Result<(), Error> {
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.args(["-y", "-loglevel", "warning", "-ss"])
        .arg(format!("{offset_secs:.3}"))
        .arg("-i")
        .arg(segment)
        .args(["-frames:v", "1", "-q:v", "2"])
        .arg(out);
    run(cmd, "ffmpeg", THUMBNAIL_TIMEOUT)?;
    Ok(())
}

/// Concatenates `segments` into a single faststart MP4 via stream copy.
///
/// `ffmpeg -y -loglevel warning -f concat -safe 0 -i <list> -c copy -movflags +faststart <out.mp4>`
pub fn concat_mp4(ffmpeg_bin: &str, segments: &[PathBuf], out: &Path) -> Result<(), Error> {
    let mut list_file = tempfile::Builder::new()
        .prefix("nvr-concat-")
        .suffix(".txt")
        .tempfile()
        .map_err(Error::ConcatList)?;
    for segment in segments {
        let absolute = segment
            .canonicalize()
            .unwrap_or_else(|_| segment.clone());
        writeln!(list_file, "file '{}'", absolute.display()).map_err(Error::ConcatList)?;
    }
    list_file.flush().map_err(Error::ConcatList)?;

    let mut cmd = Command::new(ffmpeg_bin);
    cmd.args(["-y", "-loglevel", "warning", "-f", "concat", "-safe", "0", "-i"])
        .arg(list_file.path())
        .args(["-c", "copy", "-movflags", "+faststart"])
        .arg(out);
    run(cmd, "ffmpeg", CONCAT_TIMEOUT)?;
    Ok(())
}

/// Builds the long-lived segmenter command: TCP RTSP transport, stream-copy
/// video, AAC audio at 128 kbps, fixed-length `strftime`-templated MPEG-TS
/// segments with per-segment timestamp reset.
pub fn segmenter_command(
    ffmpeg_bin: &str,
    rtsp_url: &str,
    extra_args: &[String],
    segment_duration_seconds: u64,
    ram_dir: &Path,
) -> Command {
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.args(["-loglevel", "warning", "-rtsp_transport", "tcp"])
        .args(extra_args)
        .arg("-i")
        .arg(rtsp_url)
        .args(["-c:v", "copy", "-c:a", "aac", "-b:a", "128k"])
        .args(["-f", "segment"])
        .args(["-segment_time", &segment_duration_seconds.to_string()])
        .args(["-strftime", "1", "-reset_timestamps", "1"])
        .args(["-segment_format", "mpegts"])
        .arg(ram_dir.join("buffer_%Y%m%d_%H%M%S.ts"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_parses_floating_point_seconds() {
        // Exercise the parsing path directly; spawning real ffprobe is out
        // of scope for a unit test environment.
        let text = "3.003000\n";
        let parsed: f64 = text.trim().parse().unwrap();
        assert!((parsed - 3.003).abs() < 1e-9);
    }

    #[test]
    fn segmenter_command_has_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = segmenter_command(
            "ffmpeg",
            "rtsp://cam/indoor",
            &["-an".to_owned()],
            3,
            dir.path(),
        );
        let args: Vec<_> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"-reset_timestamps".to_owned()));
        assert!(args.contains(&"rtsp://cam/indoor".to_owned()));
        assert!(args.contains(&"-an".to_owned()));
        assert!(args.iter().any(|a| a.ends_with("buffer_%Y%m%d_%H%M%S.ts")));
    }

    #[test]
    fn nonexistent_binary_surfaces_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let segment = dir.path().join("buffer_20260101_000000.ts");
        std::fs::write(&segment, b"").unwrap();
        let err = probe_duration("nvr-test-nonexistent-ffprobe", &segment).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
