use stepsync::midi::{MidiBinding, MidiRouter, MockBackend, OutputSlot};
use stepsync::state::{TrackId, TransportState};
use stepsync::transport::{Subscriber, Transport, TransportEvent};
use stepsync::EngineError;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const OUT: &str = "Synth";
const IN: &str = "Keys";

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<TransportEvent>>,
}

impl Subscriber for Recorder {
    fn on_transport_event(&self, event: &TransportEvent, _state: &TransportState) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct Rig {
    backend: MockBackend,
    transport: Arc<Transport>,
    router: MidiRouter,
    recorder: Arc<Recorder>,
}

fn rig(tracks: usize) -> Rig {
    let backend = MockBackend::with_devices(&[OUT], &[IN]);
    let transport = Arc::new(Transport::new());
    for _ in 0..tracks {
        transport.add_track();
    }
    let router = MidiRouter::new(
        Arc::new(backend.clone()),
        Arc::clone(&transport),
        OutputSlot::new(),
    );
    let recorder = Arc::new(Recorder::default());
    transport.subscribe(recorder.clone());
    transport.subscribe(Arc::new(router.clone()));
    router.refresh_devices().unwrap();
    Rig {
        backend,
        transport,
        router,
        recorder,
    }
}

fn triggered(rig: &Rig) -> Vec<TrackId> {
    rig.recorder
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            TransportEvent::TrackTriggered(id) => Some(*id),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_are_attached_on_refresh() {
        let rig = rig(4);
        assert!(rig.backend.is_listening(IN));
        assert!(rig.router.binding().input_listeners.contains(IN));
        assert_eq!(rig.router.binding().selected_output, None);
    }

    #[test]
    fn test_note_on_triggers_track_by_index() {
        let rig = rig(4);
        assert!(rig.backend.inject(IN, &[0x90, 0x3C, 0x64]));
        assert!(rig.backend.inject(IN, &[0x90, 65, 100]));
        assert!(rig.backend.inject(IN, &[0x90, 63, 100]));
        assert_eq!(triggered(&rig), vec![TrackId(0), TrackId(3)]);
        assert_eq!(rig.router.held_notes(), vec![60, 63]);

        rig.backend.inject(IN, &[0x80, 60, 0]);
        rig.backend.inject(IN, &[0x90, 63, 0]);
        assert!(rig.router.held_notes().is_empty());
    }

    #[test]
    fn test_note_index_follows_track_order() {
        let rig = rig(3);
        rig.transport.remove_track(TrackId(0)).unwrap();
        rig.backend.inject(IN, &[0x90, 60, 100]);
        assert_eq!(triggered(&rig), vec![TrackId(1)]);
    }

    #[test]
    fn test_volume_cc() {
        let rig = rig(4);
        rig.backend.inject(IN, &[0xB0, 7, 127]);
        rig.backend.inject(IN, &[0xB3, 7, 0]);
        // channel 5 is not mapped
        rig.backend.inject(IN, &[0xB4, 7, 64]);

        assert_eq!(rig.transport.track(TrackId(0)).unwrap().volume_db, 0.0);
        assert_eq!(rig.transport.track(TrackId(3)).unwrap().volume_db, -30.0);
        let volumes = rig
            .recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, TransportEvent::TrackVolumeChanged { .. }))
            .count();
        assert_eq!(volumes, 2);
    }

    #[test]
    fn test_sysex_capture_keeps_last_three() {
        let rig = rig(1);
        for i in 0..5u8 {
            rig.backend.inject(IN, &[0xF0, 0x41, i, 0xF7]);
        }
        let captured = rig.router.received_sysex();
        assert_eq!(captured.len(), 3);
        assert_eq!(captured[0].bytes, vec![0xF0, 0x41, 4, 0xF7]);
        assert_eq!(captured[2].bytes, vec![0xF0, 0x41, 2, 0xF7]);
        assert_eq!(captured[0].hex(), "F0 41 04 F7");
    }

    #[test]
    fn test_note_on_and_single_note_off() {
        let rig = rig(4);
        rig.router.select_output(Some(OUT)).unwrap();
        rig.router.send_note_on(TrackId(2)).unwrap();

        assert_eq!(rig.backend.sent(OUT), vec![vec![0x90, 62, 100]]);
        assert_eq!(rig.router.pending_note_offs(), 1);
        rig.backend.clear_sent(OUT);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(rig.backend.sent(OUT), vec![vec![0x80, 62, 0]]);
        assert_eq!(rig.router.pending_note_offs(), 0);
    }

    #[test]
    fn test_removing_track_flushes_its_note_off() {
        let rig = rig(4);
        rig.router.select_output(Some(OUT)).unwrap();
        rig.router.send_note_on(TrackId(1)).unwrap();
        rig.router.send_note_on(TrackId(2)).unwrap();

        rig.transport.remove_track(TrackId(1)).unwrap();
        let sent = rig.backend.sent(OUT);
        assert_eq!(sent.last(), Some(&vec![0x80, 61, 0]));
        assert_eq!(rig.router.pending_note_offs(), 1);

        thread::sleep(Duration::from_millis(300));
        let note_offs_61 = rig
            .backend
            .sent(OUT)
            .iter()
            .filter(|b| b.as_slice() == [0x80, 61, 0])
            .count();
        assert_eq!(note_offs_61, 1);
    }

    #[test]
    fn test_switching_output_flushes_to_previous_device() {
        let rig = rig(4);
        rig.backend.add_output("Drum Machine");
        rig.router.select_output(Some(OUT)).unwrap();
        rig.router.send_note_on(TrackId(0)).unwrap();

        rig.router.select_output(Some("Drum")).unwrap();
        assert_eq!(
            rig.router.binding().selected_output.as_deref(),
            Some("Drum Machine")
        );
        assert_eq!(rig.backend.sent(OUT).last(), Some(&vec![0x80, 60, 0]));

        thread::sleep(Duration::from_millis(250));
        assert!(rig.backend.sent("Drum Machine").is_empty());
    }

    #[test]
    fn test_unknown_output_keeps_binding() {
        let rig = rig(1);
        rig.router.select_output(Some(OUT)).unwrap();
        assert!(matches!(
            rig.router.select_output(Some("Nowhere")),
            Err(EngineError::DeviceUnavailable(_))
        ));
        assert_eq!(rig.router.binding().selected_output.as_deref(), Some(OUT));

        rig.router.select_output(None).unwrap();
        assert!(!rig.router.output().is_bound());
    }

    #[test]
    fn test_send_without_output() {
        let rig = rig(1);
        assert!(matches!(
            rig.router.send_note_on(TrackId(0)),
            Err(EngineError::DeviceUnavailable(_))
        ));
        assert!(matches!(
            rig.router.send_program_change(5),
            Err(EngineError::DeviceUnavailable(_))
        ));
        // validation happens before the device check
        assert!(matches!(
            rig.router.send_program_change(128),
            Err(EngineError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_sysex_and_program_change() {
        let rig = rig(1);
        rig.router.select_output(Some(OUT)).unwrap();

        rig.router
            .send_sysex(vec![0xF0, 0x41, 0x10, 0x00, 0x00, 0x7F, 0xF7])
            .unwrap();
        assert!(matches!(
            rig.router.send_sysex(vec![0x41, 0x10, 0xF7]),
            Err(EngineError::InvalidMessage(_))
        ));
        assert!(matches!(
            rig.router.send_sysex_hex("F0 41 100 F7"),
            Err(EngineError::InvalidMessage(_))
        ));
        rig.router.send_sysex_hex("f0 7e 7f f7").unwrap();
        rig.router.send_program_change(127).unwrap();

        assert_eq!(
            rig.backend.sent(OUT),
            vec![
                vec![0xF0, 0x41, 0x10, 0x00, 0x00, 0x7F, 0xF7],
                vec![0xF0, 0x7E, 0x7F, 0xF7],
                vec![0xC0, 127],
            ]
        );
    }

    #[test]
    fn test_note_beyond_midi_range() {
        let rig = rig(1);
        rig.router.select_output(Some(OUT)).unwrap();
        assert!(matches!(
            rig.router.send_note_on(TrackId(68)),
            Err(EngineError::InvalidMessage(_))
        ));
        assert!(rig.backend.sent(OUT).is_empty());
    }

    #[test]
    fn test_hot_plug() {
        let rig = rig(2);
        rig.router.select_output(Some(OUT)).unwrap();
        rig.router.send_note_on(TrackId(0)).unwrap();

        rig.backend.remove_output(OUT);
        rig.backend.remove_input(IN);
        rig.backend.add_input("Pads");
        rig.router.refresh_devices().unwrap();

        let binding = rig.router.binding();
        assert_eq!(binding.selected_output, None);
        assert!(!binding.input_listeners.contains(IN));
        assert!(binding.input_listeners.contains("Pads"));
        assert!(!rig.backend.is_listening(IN));
        assert_eq!(rig.router.pending_note_offs(), 0);

        rig.backend.inject("Pads", &[0x90, 61, 90]);
        assert_eq!(triggered(&rig), vec![TrackId(1)]);
    }

    #[test]
    fn test_midi_unavailable_releases_everything() {
        let rig = rig(1);
        rig.router.select_output(Some(OUT)).unwrap();
        rig.backend.set_unavailable(true);

        assert!(matches!(
            rig.router.refresh_devices(),
            Err(EngineError::DeviceUnavailable(_))
        ));
        assert_eq!(rig.router.binding(), MidiBinding::default());

        rig.backend.set_unavailable(false);
        rig.router.refresh_devices().unwrap();
        assert!(rig.router.binding().input_listeners.contains(IN));
    }

    #[test]
    fn test_shutdown_flushes_and_detaches() {
        let rig = rig(1);
        rig.router.select_output(Some(OUT)).unwrap();
        rig.router.send_note_on(TrackId(0)).unwrap();
        rig.router.shutdown();

        assert_eq!(
            rig.backend.sent(OUT),
            vec![vec![0x90, 60, 100], vec![0x80, 60, 0]]
        );
        assert!(!rig.backend.is_listening(IN));
        assert!(!rig.router.output().is_bound());
        assert!(!rig.backend.inject(IN, &[0x90, 60, 100]));
    }
}
