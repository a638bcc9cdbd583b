use indicatif::ProgressDrawTarget;
use stepsync::config::Settings;
use stepsync::midi::MockBackend;
use stepsync::state::TrackId;
use stepsync::sync::LocalPeerSession;
use stepsync::ui::{describe_surfaces, describe_transport, track_line, StatusDisplay};
use stepsync::Engine;
use std::sync::Arc;

fn engine() -> Arc<Engine> {
    let backend = MockBackend::with_devices(&["Synth"], &["Keys"]);
    let settings = Settings {
        midi_output: Some("Synth".to_string()),
        track_count: 2,
        ..Settings::default()
    };
    Arc::new(
        Engine::new(
            &settings,
            Arc::new(backend),
            Arc::new(LocalPeerSession::new()),
        )
        .unwrap(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_transport() {
        let engine = engine();
        assert_eq!(
            describe_transport(&engine.status()),
            "Stopped at 120 BPM, 16 steps, clock idle"
        );

        engine.transport().set_bpm(98.5).unwrap();
        engine.transport().set_playing(true).unwrap();
        assert_eq!(
            describe_transport(&engine.status()),
            "Playing at 98.5 BPM, 16 steps, clock running"
        );
        engine.shutdown();
    }

    #[test]
    fn test_describe_surfaces() {
        let engine = engine();
        assert_eq!(
            describe_surfaces(&engine.status()),
            "MIDI out: Synth, inputs: 1, OSC: disconnected, sync: off"
        );
        engine.sync().enable(true).unwrap();
        assert!(describe_surfaces(&engine.status()).ends_with("sync: 0 peers at 120.0 BPM"));
    }

    #[test]
    fn test_track_line() {
        let engine = engine();
        let transport = engine.transport();
        transport.set_step_count(8).unwrap();
        transport.toggle_step(TrackId(1), 0).unwrap();
        transport.toggle_step(TrackId(1), 4).unwrap();
        transport.set_current_step(TrackId(1), 2).unwrap();
        transport.set_track_volume(TrackId(1), -12.0).unwrap();

        let track = transport.track(TrackId(1)).unwrap();
        assert_eq!(track_line(&track), "[1] x.|.x... -12.0 dB");
    }

    #[test]
    fn test_status_display_refresh() {
        let engine = engine();
        let display = StatusDisplay::with_draw_target(Arc::clone(&engine), ProgressDrawTarget::hidden());
        engine.transport().set_current_step(TrackId(0), 3).unwrap();
        display.refresh();

        let (stop, stopped) = crossbeam::channel::bounded::<()>(0);
        drop(stop);
        display.run(stopped);
    }
}
