// MQTT detection bus: subscribes to every configured camera topic and
// routes incoming messages to the dispatcher. Grounded on `start_mqtt` in
// `examples/original_source/pruletynvr/nvr.py`, translated onto `rumqttc`
// (see SPEC_FULL.md §A for why `rumqttc` over the original's `paho-mqtt`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use tracing::{debug, info, warn};

use base::clock::Clocks;
use base::shutdown;

use crate::config::MqttConfig;
use crate::dispatcher::Dispatcher;

const KILL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs the MQTT client loop until shutdown. Intended to be the body of its
/// own dedicated thread; blocks on the network connection.
pub fn run<C: Clocks>(
    config: &MqttConfig,
    dispatcher: &Dispatcher,
    shutdown_rx: shutdown::Receiver,
    clocks: C,
) {
    let mut mqttoptions = MqttOptions::new("nvr", config.host.as_str(), config.port);
    mqttoptions.set_keep_alive(Duration::from_secs(config.keepalive_secs));
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        mqttoptions.set_credentials(username.clone(), password.clone());
    }

    let (client, mut connection) = Client::new(mqttoptions, 64);
    for topic in dispatcher.topics() {
        match client.subscribe(topic, QoS::AtMostOnce) {
            Ok(()) => info!(topic, "subscribed"),
            Err(e) => warn!(topic, error = %e, "subscribing"),
        }
    }

    let done = Arc::new(AtomicBool::new(false));
    let disconnector = {
        let done = done.clone();
        let shutdown_rx = shutdown_rx.clone();
        let client = client.clone();
        std::thread::spawn(move || loop {
            if done.load(Ordering::SeqCst) {
                return;
            }
            match shutdown_rx.wait_for(KILL_POLL_INTERVAL) {
                Ok(()) => continue,
                Err(_) => {
                    let _ = client.disconnect();
                    return;
                }
            }
        })
    };

    for notification in connection.iter() {
        if shutdown_rx.check().is_err() {
            break;
        }
        match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_publish(&publish.topic, &publish.payload, dispatcher, &clocks);
            }
            Ok(_) => {}
            Err(e) => {
                // `rumqttc`'s event loop paces its own reconnect attempts;
                // we just log and keep iterating.
                warn!(error = %e, "mqtt connection error");
            }
        }
    }

    done.store(true, Ordering::SeqCst);
    let _ = disconnector.join();
}

fn handle_publish<C: Clocks>(topic: &str, payload: &[u8], dispatcher: &Dispatcher, clocks: &C) {
    let recorders = dispatcher.recorders_for(topic);
    if recorders.is_empty() {
        debug!(topic, "no recorder for topic");
        return;
    }
    let parsed: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(topic, error = %e, "unparseable mqtt payload");
            return;
        }
    };
    // Accept either `{timestamp: ...}` or `{payload: {timestamp: ...}}`.
    let inner = parsed.get("payload").unwrap_or(&parsed);
    let timestamp = inner.get("timestamp");
    info!(topic, ?timestamp, "detection received");
    for recorder in recorders {
        recorder.trigger_detection(clocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn handle_publish_ignores_topics_with_no_recorder() {
        let yaml = "cameras:\n  cam1:\n    topic: \"birds/cam1\"\n    streams:\n      indoor: \"rtsp://x\"\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let dispatcher = Dispatcher::build(&config);
        let clocks = base::clock::RealClocks;
        // Should not panic for an unrecognized topic or malformed payload.
        handle_publish("unknown/topic", b"{}", &dispatcher, &clocks);
        handle_publish("birds/cam1", b"not json", &dispatcher, &clocks);
    }

    #[test]
    fn handle_publish_triggers_recorder_on_bare_payload() {
        let yaml = "cameras:\n  cam1:\n    topic: \"birds/cam1\"\n    streams:\n      indoor: \"rtsp://x\"\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let dispatcher = Dispatcher::build(&config);
        let clocks = base::clock::RealClocks;
        handle_publish(
            "birds/cam1",
            br#"{"timestamp": 1700000000}"#,
            &dispatcher,
            &clocks,
        );
        let recorder = &dispatcher.recorders_for("birds/cam1")[0];
        assert_eq!(recorder.snapshot_state_for_test(), crate::recorder::state::State::Recording);
    }

    #[test]
    fn handle_publish_triggers_recorder_on_wrapped_payload() {
        let yaml = "cameras:\n  cam1:\n    topic: \"birds/cam1\"\n    streams:\n      indoor: \"rtsp://x\"\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let dispatcher = Dispatcher::build(&config);
        let clocks = base::clock::RealClocks;
        handle_publish(
            "birds/cam1",
            br#"{"payload": {"timestamp": 1700000000}}"#,
            &dispatcher,
            &clocks,
        );
        let recorder = &dispatcher.recorders_for("birds/cam1")[0];
        assert_eq!(recorder.snapshot_state_for_test(), crate::recorder::state::State::Recording);
    }
}
