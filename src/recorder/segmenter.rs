// Long-lived `ffmpeg` segmenter supervision (spec.md §4.5): restart with
// exponential backoff, stderr drained to debug logs, interruptible by
// shutdown. Grounded on `CameraRecorder._run_segmenter` in
// `examples/original_source/pruletynvr/nvr.py`, with the kill-on-shutdown
// structure adapted from `base::shutdown`'s sync/async dual API.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use base::shutdown;

use crate::mediatool;

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[allow(clippy::too_many_arguments)]
pub fn run(
    name: &str,
    ffmpeg_bin: &str,
    rtsp_url: &str,
    extra_args: &[String],
    segment_duration_seconds: u64,
    ram_dir: &Path,
    shutdown_rx: &shutdown::Receiver,
) {
    let mut retry_delay = INITIAL_RETRY_DELAY;
    loop {
        if shutdown_rx.check().is_err() {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(ram_dir) {
            error!(recorder = name, error = %e, "creating ram directory");
            if shutdown_rx.wait_for(retry_delay).is_err() {
                return;
            }
            retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
            continue;
        }

        info!(recorder = name, %rtsp_url, "starting segmenter");
        let mut cmd = mediatool::segmenter_command(
            ffmpeg_bin,
            rtsp_url,
            extra_args,
            segment_duration_seconds,
            ram_dir,
        );
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(recorder = name, error = %e, "spawning segmenter");
                if shutdown_rx.wait_for(retry_delay).is_err() {
                    return;
                }
                retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                continue;
            }
        };
        let stderr = child.stderr.take();

        let done = Arc::new(AtomicBool::new(false));
        let child = Arc::new(Mutex::new(child));
        let killer = {
            let done = done.clone();
            let child = child.clone();
            let shutdown_rx = shutdown_rx.clone();
            std::thread::spawn(move || loop {
                if done.load(Ordering::SeqCst) {
                    return;
                }
                match shutdown_rx.wait_for(KILL_POLL_INTERVAL) {
                    Ok(()) => continue,
                    Err(_) => {
                        if let Ok(mut c) = child.lock() {
                            let _ = c.kill();
                        }
                        return;
                    }
                }
            })
        };

        if let Some(stderr) = stderr {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                let line = line.trim();
                if !line.is_empty() {
                    debug!(recorder = name, ffmpeg = line, "segmenter stderr");
                }
            }
        }

        done.store(true, Ordering::SeqCst);
        let status = child.lock().unwrap().wait();
        let _ = killer.join();

        if shutdown_rx.check().is_err() {
            return;
        }
        warn!(
            recorder = name,
            ?status,
            retry_in = ?retry_delay,
            "segmenter exited, restarting"
        );
        if shutdown_rx.wait_for(retry_delay).is_err() {
            return;
        }
        retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
    }
}
