// One recorder: a single RTSP stream (one camera's `indoor`/`outdoor`/...
// stream) with its own RAM ring buffer, state machine, and finalization
// pipeline. Grounded on `CameraRecorder` in
// `examples/original_source/pruletynvr/nvr.py`; thread ownership and naming
// follow `CameraRecorder.start()` there and `std::thread::Builder` usage in
// the teacher's `cmds::run`.

pub mod event;
pub mod finalizer;
pub mod segmenter;
pub mod state;
pub mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use base::clock::Clocks;
use base::shutdown;

use event::Event;
use state::{SharedState, Transition};

struct Inner {
    device_id: String,
    stream_type: String,
    rtsp_url: String,
    extra_args: Vec<String>,
    state: SharedState,
    finalize_event: Event,
}

/// A cheaply-cloneable handle to one recorder. Every clone refers to the same
/// underlying state; cloning is how the MQTT dispatcher and the recorder's
/// own worker threads share it.
#[derive(Clone)]
pub struct Recorder(Arc<Inner>);

impl Recorder {
    pub fn new(
        device_id: impl Into<String>,
        stream_type: impl Into<String>,
        rtsp_url: impl Into<String>,
        extra_args: Vec<String>,
    ) -> Self {
        Recorder(Arc::new(Inner {
            device_id: device_id.into(),
            stream_type: stream_type.into(),
            rtsp_url: rtsp_url.into(),
            extra_args,
            state: SharedState::new(),
            finalize_event: Event::new(),
        }))
    }

    pub fn device_id(&self) -> &str {
        &self.0.device_id
    }

    pub fn stream_type(&self) -> &str {
        &self.0.stream_type
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.0.device_id, self.0.stream_type)
    }

    /// Records a detection event, logging the resulting transition the way
    /// the original program distinguishes start/extend/resume.
    pub fn trigger_detection<C: Clocks>(&self, clocks: &C) {
        let name = self.name();
        match self.0.state.trigger_detection(clocks.realtime()) {
            Transition::StartedRecording => info!(recorder = name, "recording started"),
            Transition::ExtendedPostWindow => {
                info!(recorder = name, "post-window extended")
            }
            Transition::ResumedDuringFinalize => {
                info!(recorder = name, "new detection during finalize, resuming")
            }
        }
    }

    #[cfg(test)]
    pub fn snapshot_state_for_test(&self) -> state::State {
        self.0.state.snapshot().0
    }

    fn ram_dir(&self, ram_base: &Path) -> PathBuf {
        ram_base.join(&self.0.device_id).join(&self.0.stream_type)
    }

    fn finalizer_paths(&self, ram_dir: PathBuf, output_base: &Path) -> finalizer::Paths {
        finalizer::Paths {
            ram_dir,
            out_ts: output_base
                .join("m3u8")
                .join("ts")
                .join(&self.0.device_id)
                .join(&self.0.stream_type),
            out_m3u8: output_base.join("m3u8"),
            out_mp4: output_base.to_path_buf(),
        }
    }

    /// Spawns this recorder's watcher, finalizer, and segmenter threads.
    /// Returns their join handles so the caller can wait on clean shutdown.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<C>(
        &self,
        ffmpeg_bin: &str,
        ffprobe_bin: &str,
        ram_base: &Path,
        output_base: &Path,
        pre_roll: Duration,
        post_roll: Duration,
        segment_duration_seconds: u64,
        shutdown_rx: shutdown::Receiver,
        clocks: C,
    ) -> Vec<std::thread::JoinHandle<()>>
    where
        C: Clocks + Clone + 'static,
    {
        let ram_dir = self.ram_dir(ram_base);
        let paths = self.finalizer_paths(ram_dir.clone(), output_base);

        let name = self.name();
        let mut handles = Vec::with_capacity(3);

        {
            let recorder = self.clone();
            let ram_dir = ram_dir.clone();
            let shutdown_rx = shutdown_rx.clone();
            let clocks = clocks.clone();
            let ffmpeg_bin = ffmpeg_bin.to_owned();
            let name = name.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("watcher-{name}"))
                    .spawn(move || {
                        watcher::run(
                            &name,
                            &ffmpeg_bin,
                            &ram_dir,
                            pre_roll,
                            post_roll,
                            segment_duration_seconds,
                            &recorder.0.state,
                            &recorder.0.finalize_event,
                            &shutdown_rx,
                            &clocks,
                        );
                    })
                    .expect("spawning watcher thread"),
            );
        }

        {
            let recorder = self.clone();
            let shutdown_rx = shutdown_rx.clone();
            let clocks = clocks.clone();
            let ffmpeg_bin = ffmpeg_bin.to_owned();
            let ffprobe_bin = ffprobe_bin.to_owned();
            let name = name.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("finalizer-{name}"))
                    .spawn(move || {
                        finalizer::run(
                            &name,
                            &recorder.0.device_id,
                            &recorder.0.stream_type,
                            &ffmpeg_bin,
                            &ffprobe_bin,
                            &paths,
                            segment_duration_seconds,
                            &recorder.0.state,
                            &recorder.0.finalize_event,
                            &shutdown_rx,
                            &clocks,
                        );
                    })
                    .expect("spawning finalizer thread"),
            );
        }

        {
            let rtsp_url = self.0.rtsp_url.clone();
            let extra_args = self.0.extra_args.clone();
            let ffmpeg_bin = ffmpeg_bin.to_owned();
            let name = name.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("ffmpeg-{name}"))
                    .spawn(move || {
                        segmenter::run(
                            &name,
                            &ffmpeg_bin,
                            &rtsp_url,
                            &extra_args,
                            segment_duration_seconds,
                            &ram_dir,
                            &shutdown_rx,
                        );
                    })
                    .expect("spawning segmenter thread"),
            );
        }

        info!(recorder = name, rtsp_url = %self.0.rtsp_url, "recorder started");
        handles
    }
}
