// Builds the topic -> recorders mapping used to route MQTT detection
// messages (spec.md §4.6). Grounded on `build_topic_map` in
// `examples/original_source/pruletynvr/nvr.py`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use base::clock::Clocks;
use base::shutdown;

use crate::config::Config;
use crate::recorder::Recorder;

/// Owns every recorder and the topic each one listens on. One recorder
/// exists per (device, stream) pair; several recorders can share a topic
/// when a camera exposes multiple streams under one detector.
pub struct Dispatcher {
    by_topic: HashMap<String, Vec<Recorder>>,
}

impl Dispatcher {
    /// Builds recorders for every configured camera stream, grouped by the
    /// camera's MQTT topic.
    pub fn build(config: &Config) -> Self {
        let mut by_topic: HashMap<String, Vec<Recorder>> = HashMap::new();
        for (device_id, camera) in &config.cameras {
            let recorders: Vec<Recorder> = camera
                .streams
                .iter()
                .map(|(stream_type, stream)| {
                    Recorder::new(
                        device_id.clone(),
                        stream_type.clone(),
                        stream.url().to_owned(),
                        stream.extra_args().to_vec(),
                    )
                })
                .collect();
            by_topic
                .entry(camera.topic.clone())
                .or_default()
                .extend(recorders);
        }
        Dispatcher { by_topic }
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.by_topic.keys().map(String::as_str)
    }

    pub fn recorders_for(&self, topic: &str) -> &[Recorder] {
        self.by_topic.get(topic).map_or(&[], Vec::as_slice)
    }

    pub fn all_recorders(&self) -> impl Iterator<Item = &Recorder> {
        self.by_topic.values().flatten()
    }

    /// Spawns every recorder's worker threads.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_all<C>(
        &self,
        ffmpeg_bin: &str,
        ffprobe_bin: &str,
        ram_base: &Path,
        output_base: &Path,
        pre_roll: Duration,
        post_roll: Duration,
        segment_duration_seconds: u64,
        shutdown_rx: &shutdown::Receiver,
        clocks: &C,
    ) -> Vec<std::thread::JoinHandle<()>>
    where
        C: Clocks + Clone + 'static,
    {
        self.all_recorders()
            .flat_map(|recorder| {
                recorder.spawn(
                    ffmpeg_bin,
                    ffprobe_bin,
                    ram_base,
                    output_base,
                    pre_roll,
                    post_roll,
                    segment_duration_seconds,
                    shutdown_rx.clone(),
                    clocks.clone(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn groups_recorders_by_topic_and_creates_one_per_stream() {
        let yaml = r#"
cameras:
  front_door:
    topic: "birds/front_door"
    streams:
      indoor: "rtsp://cam1/indoor"
      outdoor: "rtsp://cam1/outdoor"
  backyard:
    topic: "birds/backyard"
    streams:
      indoor: "rtsp://cam2/indoor"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let dispatcher = Dispatcher::build(&config);
        assert_eq!(dispatcher.recorders_for("birds/front_door").len(), 2);
        assert_eq!(dispatcher.recorders_for("birds/backyard").len(), 1);
        assert!(dispatcher.recorders_for("unknown/topic").is_empty());
        assert_eq!(dispatcher.all_recorders().count(), 3);
    }
}
