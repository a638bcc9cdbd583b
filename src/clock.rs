// clock.rs

use crate::config::TICKS_PER_BEAT;
use crate::lock;
use crate::midi::{OutputSlot, CLOCK_PULSE};
use crate::state::TransportState;
use crate::transport::{Subscriber, TransportEvent};
use crossbeam::channel::{bounded, select, tick, Sender};
use log::{info, trace};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Milliseconds between clock pulses at `bpm`: `60000 / (bpm * 24)`.
pub fn pulse_interval_ms(bpm: f64) -> f64 {
    60_000.0 / (bpm * f64::from(TICKS_PER_BEAT))
}

pub fn pulse_interval(bpm: f64) -> Duration {
    Duration::from_secs_f64(pulse_interval_ms(bpm) / 1000.0)
}

/// A running pulse thread. Cancelling joins it.
struct PulseTimer {
    interval: Duration,
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl PulseTimer {
    fn start(interval: Duration, output: OutputSlot, pulses: Arc<AtomicU64>) -> Self {
        let (cancel, cancelled) = bounded::<()>(0);
        let handle = thread::spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(cancelled) -> _ => break,
                    recv(ticker) -> _ => match output.send(&[CLOCK_PULSE]) {
                        Ok(()) => {
                            pulses.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => trace!("Clock pulse dropped: {}", e),
                    },
                }
            }
        });
        PulseTimer {
            interval,
            cancel,
            handle,
        }
    }

    fn cancel(self) {
        drop(self.cancel);
        let _ = self.handle.join();
    }
}

struct ClockInner {
    output: OutputSlot,
    view: Mutex<TransportState>,
    timer: Mutex<Option<PulseTimer>>,
    pulses: Arc<AtomicU64>,
    shut_down: AtomicBool,
}

impl ClockInner {
    /// Make the timer match the current play state, tempo and output binding.
    fn reconcile(&self) {
        let mut timer = lock(&self.timer);
        let view = *lock(&self.view);
        let wanted = !self.shut_down.load(Ordering::SeqCst)
            && view.is_playing
            && self.output.is_bound();
        let interval = pulse_interval(view.bpm);

        if wanted && matches!(timer.as_ref(), Some(t) if t.interval == interval) {
            return;
        }

        if let Some(running) = timer.take() {
            running.cancel();
            info!("MIDI clock stopped");
        }

        if wanted {
            info!(
                "MIDI clock running at {} BPM ({:.3} ms per pulse)",
                view.bpm,
                pulse_interval_ms(view.bpm)
            );
            *timer = Some(PulseTimer::start(
                interval,
                self.output.clone(),
                Arc::clone(&self.pulses),
            ));
        }
    }
}

/// Emits 24 clock pulses per quarter note to the bound MIDI output while the
/// transport plays.
///
/// Tempo changes restart the timer at the new interval. Stopping, losing the
/// output or shutting down cancels it; the cancelling call returns only after
/// the pulse thread has exited.
#[derive(Clone)]
pub struct ClockEmitter {
    inner: Arc<ClockInner>,
}

impl ClockEmitter {
    pub fn new(output: OutputSlot, state: TransportState) -> Self {
        let inner = Arc::new(ClockInner {
            output: output.clone(),
            view: Mutex::new(state),
            timer: Mutex::new(None),
            pulses: Arc::new(AtomicU64::new(0)),
            shut_down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        output.watch(Arc::new(move |_bound| {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile();
            }
        }));

        inner.reconcile();
        ClockEmitter { inner }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.timer).is_some()
    }

    /// Interval of the running timer, if any.
    pub fn interval(&self) -> Option<Duration> {
        lock(&self.inner.timer).as_ref().map(|t| t.interval)
    }

    pub fn pulses_emitted(&self) -> u64 {
        self.inner.pulses.load(Ordering::SeqCst)
    }

    /// Stop for good. Later transport changes do not restart the clock.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.reconcile();
    }
}

impl Subscriber for ClockEmitter {
    fn on_transport_event(&self, event: &TransportEvent, state: &TransportState) {
        match event {
            TransportEvent::PlayStateChanged(_) | TransportEvent::TempoChanged(_) => {
                *lock(&self.inner.view) = *state;
                self.inner.reconcile();
            }
            _ => {}
        }
    }
}
