use stepsync::state::{cc_to_db, StepCount, TrackId, TransportState};
use stepsync::transport::{Subscriber, Transport, TransportEvent};
use stepsync::EngineError;
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<TransportEvent>>,
}

impl Recorder {
    fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Subscriber for Recorder {
    fn on_transport_event(&self, event: &TransportEvent, _state: &TransportState) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Reads the transport back from inside the fan-out.
struct SnapshotReader {
    transport: Weak<Transport>,
    reads: Mutex<usize>,
}

impl Subscriber for SnapshotReader {
    fn on_transport_event(&self, _event: &TransportEvent, state: &TransportState) {
        if let Some(transport) = self.transport.upgrade() {
            assert!(transport.snapshot().transport.bpm >= 20.0);
            assert!(state.bpm >= 20.0);
            *self.reads.lock().unwrap() += 1;
        }
    }
}

fn recorded() -> (Transport, Arc<Recorder>) {
    let transport = Transport::new();
    let recorder = Arc::new(Recorder::default());
    transport.subscribe(recorder.clone());
    (transport, recorder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let transport = Transport::new();
        let state = transport.state();
        assert!(!state.is_playing);
        assert_eq!(state.bpm, 120.0);
        assert_eq!(state.step_count, StepCount::Sixteen);
        assert_eq!(transport.track_count(), 0);
    }

    #[test]
    fn test_bpm_domain() {
        let (transport, recorder) = recorded();

        for bpm in [20.0, 75.5, 120.0, 330.0] {
            transport.set_bpm(bpm).unwrap();
            assert_eq!(transport.bpm(), bpm);
        }

        for bpm in [19.99, 330.01, -1.0, f64::NAN, f64::INFINITY] {
            let err = transport.set_bpm(bpm).unwrap_err();
            assert!(err.is_out_of_range(), "{} should be out of range", bpm);
            assert_eq!(transport.bpm(), 330.0);
        }

        // 120 -> 20 -> 75.5 -> (120 again) -> 330
        assert_eq!(recorder.events().len(), 4);
    }

    #[test]
    fn test_same_value_does_not_notify() {
        let (transport, recorder) = recorded();
        transport.set_bpm(120.0).unwrap();
        transport.set_playing(false).unwrap();
        transport.set_step_count(16).unwrap();
        assert!(recorder.events().is_empty());

        transport.set_playing(true).unwrap();
        assert_eq!(
            recorder.events(),
            vec![TransportEvent::PlayStateChanged(true)]
        );
    }

    #[test]
    fn test_step_count_resize_preserves_prefix() {
        let transport = Transport::new();
        let track = transport.add_track();

        transport.set_step_count(8).unwrap();
        transport.toggle_step(track, 0).unwrap();
        transport.toggle_step(track, 5).unwrap();
        let before = transport.track(track).unwrap().active_steps;
        assert_eq!(before.len(), 8);

        transport.set_step_count(32).unwrap();
        let after = transport.track(track).unwrap().active_steps;
        assert_eq!(after.len(), 32);
        assert_eq!(&after[..8], &before[..]);
        assert!(after[8..].iter().all(|active| !active));
    }

    #[test]
    fn test_invalid_step_count_is_rejected() {
        let transport = Transport::new();
        for steps in [0, 7, 12, 128] {
            assert!(transport.set_step_count(steps).unwrap_err().is_out_of_range());
        }
        assert_eq!(transport.step_count(), StepCount::Sixteen);
    }

    #[test]
    fn test_track_ids_are_never_reused() {
        let transport = Transport::new();
        let a = transport.add_track();
        let b = transport.add_track();
        transport.remove_track(a).unwrap();
        let c = transport.add_track();

        assert_eq!(a, TrackId(0));
        assert_eq!(b, TrackId(1));
        assert_eq!(c, TrackId(2));
        assert_eq!(transport.track_id_at(0), Some(b));
        assert_eq!(transport.track_id_at(1), Some(c));
        assert!(transport.remove_track(a).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_track_volume() {
        let (transport, recorder) = recorded();
        let track = transport.add_track();

        transport.set_track_volume(track, -15.0).unwrap();
        assert_eq!(transport.track(track).unwrap().volume_db, -15.0);

        assert!(transport
            .set_track_volume(track, 0.5)
            .unwrap_err()
            .is_out_of_range());
        assert!(transport
            .set_track_volume(TrackId(9), -3.0)
            .unwrap_err()
            .is_out_of_range());
        assert_eq!(transport.track(track).unwrap().volume_db, -15.0);

        assert_eq!(
            transport.set_track_volume_at(0, cc_to_db(127)).unwrap(),
            track
        );
        assert_eq!(transport.track(track).unwrap().volume_db, 0.0);
        assert!(transport.set_track_volume_at(1, -3.0).is_err());

        let volume_events = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, TransportEvent::TrackVolumeChanged { .. }))
            .count();
        assert_eq!(volume_events, 2);
    }

    #[test]
    fn test_toggle_step_bounds() {
        let transport = Transport::new();
        let track = transport.add_track();
        assert!(transport.toggle_step(track, 15).unwrap());
        assert!(!transport.toggle_step(track, 15).unwrap());
        assert!(matches!(
            transport.toggle_step(track, 16),
            Err(EngineError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_trigger_by_index() {
        let (transport, recorder) = recorded();
        transport.add_track();
        let second = transport.add_track();

        assert_eq!(transport.trigger_track_at(1).unwrap(), second);
        assert!(transport.trigger_track_at(2).unwrap_err().is_out_of_range());
        assert!(recorder
            .events()
            .contains(&TransportEvent::TrackTriggered(second)));
    }

    #[test]
    fn test_current_step() {
        let transport = Transport::new();
        let track = transport.add_track();
        transport.set_current_step(track, 3).unwrap();
        assert_eq!(transport.track(track).unwrap().current_step_index, Some(3));
        assert!(transport.set_current_step(track, 16).is_err());

        // Shrinking past the current step clears it.
        transport.set_step_count(32).unwrap();
        transport.set_current_step(track, 20).unwrap();
        transport.set_step_count(8).unwrap();
        assert_eq!(transport.track(track).unwrap().current_step_index, None);
    }

    #[test]
    fn test_subscribers_see_committed_state() {
        struct Checker {
            seen: Mutex<Vec<f64>>,
        }
        impl Subscriber for Checker {
            fn on_transport_event(&self, event: &TransportEvent, state: &TransportState) {
                if let TransportEvent::TempoChanged(bpm) = event {
                    assert_eq!(*bpm, state.bpm);
                    self.seen.lock().unwrap().push(state.bpm);
                }
            }
        }

        let transport = Transport::new();
        let checker = Arc::new(Checker {
            seen: Mutex::new(Vec::new()),
        });
        transport.subscribe(checker.clone());
        transport.set_bpm(90.0).unwrap();
        transport.set_bpm(91.0).unwrap();
        assert_eq!(*checker.seen.lock().unwrap(), vec![90.0, 91.0]);
    }

    #[test]
    fn test_concurrent_writers_notify_in_mutation_order() {
        let transport = Arc::new(Transport::new());
        let recorder = Arc::new(Recorder::default());
        transport.subscribe(recorder.clone());
        let track = transport.add_track();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let transport = Arc::clone(&transport);
                thread::spawn(move || {
                    for n in 0..50 {
                        let bpm = 100.0 + f64::from(i * 50 + n);
                        transport.set_bpm(bpm).unwrap();
                        transport.set_track_volume(track, -f64::from(n % 30)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let last_tempo = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::TempoChanged(bpm) => Some(bpm),
                _ => None,
            })
            .last();
        assert_eq!(last_tempo, Some(transport.bpm()));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let transport = Transport::new();
        let track = transport.add_track();
        let snapshot = transport.snapshot();
        transport.toggle_step(track, 0).unwrap();
        assert!(!snapshot.tracks[0].active_steps[0]);
        assert!(transport.snapshot().tracks[0].active_steps[0]);
    }

    #[test]
    fn test_subscriber_reads_while_writers_race() {
        let transport = Arc::new(Transport::new());
        let track = transport.add_track();
        let reader = Arc::new(SnapshotReader {
            transport: Arc::downgrade(&transport),
            reads: Mutex::new(0),
        });
        transport.subscribe(reader.clone());

        let (done_tx, done_rx) = mpsc::channel();
        for writer in 0..2 {
            let transport = Arc::clone(&transport);
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                for n in 0..5_000u32 {
                    if writer == 0 {
                        transport.set_bpm(100.0 + f64::from(n % 50)).unwrap();
                    } else {
                        transport.set_track_volume(track, -f64::from(n % 30)).unwrap();
                    }
                }
                let _ = done_tx.send(writer);
            });
        }

        for _ in 0..2 {
            done_rx
                .recv_timeout(Duration::from_secs(10))
                .expect("writers stalled");
        }
        assert!(*reader.reads.lock().unwrap() > 0);
    }
}
