// ui.rs

use crate::engine::{Engine, EngineStatus};
use crate::state::TrackState;
use crossbeam::channel::{select, tick, Receiver};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

const REFRESH: Duration = Duration::from_millis(100);

fn create_step_progress(multi_progress: &MultiProgress, steps: u64) -> ProgressBar {
    let pb = multi_progress.add(ProgressBar::new(steps));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:40.cyan}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("⣀⣤⣦⣶⣷⣿ "),
    );
    pb.set_prefix("Step");
    pb
}

fn create_spinner(multi_progress: &MultiProgress, prefix: &'static str) -> ProgressBar {
    let pb = multi_progress.add(ProgressBar::new_spinner());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix);
    pb
}

/// `Playing at 120 BPM, 16 steps, clock running`
pub fn describe_transport(status: &EngineStatus) -> String {
    let transport = &status.snapshot.transport;
    format!(
        "{} at {} BPM, {} steps, clock {}",
        if transport.is_playing { "Playing" } else { "Stopped" },
        transport.bpm,
        transport.step_count,
        if status.clock_running { "running" } else { "idle" }
    )
}

/// MIDI binding, OSC connection and peer sync on one line.
pub fn describe_surfaces(status: &EngineStatus) -> String {
    let output = status.midi.selected_output.as_deref().unwrap_or("none");
    let sync = if status.sync.enabled {
        format!("{} peers at {:.1} BPM", status.sync.peer_count, status.sync.peer_bpm)
    } else {
        "off".to_string()
    };
    format!(
        "MIDI out: {}, inputs: {}, OSC: {}, sync: {}",
        output,
        status.midi.input_listeners.len(),
        status.osc.state,
        sync
    )
}

/// One track as `[id] x..x....  -6.0 dB`, the current step shown as `|`.
pub fn track_line(track: &TrackState) -> String {
    let pattern: String = track
        .active_steps
        .iter()
        .enumerate()
        .map(|(i, active)| match (track.current_step_index == Some(i), *active) {
            (true, _) => '|',
            (false, true) => 'x',
            (false, false) => '.',
        })
        .collect();
    format!("[{}] {} {:5.1} dB", track.id, pattern, track.volume_db)
}

/// Live terminal view of the engine, redrawn until told to stop.
pub struct StatusDisplay {
    engine: Arc<Engine>,
    multi_progress: MultiProgress,
    step_pb: ProgressBar,
    transport_pb: ProgressBar,
    surfaces_pb: ProgressBar,
}

impl StatusDisplay {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self::with_draw_target(engine, ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(engine: Arc<Engine>, target: ProgressDrawTarget) -> Self {
        let multi_progress = MultiProgress::with_draw_target(target);
        let steps = engine.transport().step_count().len() as u64;
        let step_pb = create_step_progress(&multi_progress, steps);
        let transport_pb = create_spinner(&multi_progress, "Transport");
        let surfaces_pb = create_spinner(&multi_progress, "Surfaces");

        StatusDisplay {
            engine,
            multi_progress,
            step_pb,
            transport_pb,
            surfaces_pb,
        }
    }

    pub fn refresh(&self) {
        let status = self.engine.status();
        let steps = status.snapshot.transport.step_count.len() as u64;
        let current = status
            .snapshot
            .tracks
            .iter()
            .filter_map(|t| t.current_step_index)
            .max()
            .map_or(0, |step| step as u64 + 1);

        self.step_pb.set_length(steps);
        self.step_pb.set_position(current);
        self.transport_pb.set_message(describe_transport(&status));
        self.surfaces_pb.set_message(describe_surfaces(&status));
        self.transport_pb.tick();
        self.surfaces_pb.tick();
    }

    /// Print a line above the status bars.
    pub fn println(&self, line: impl AsRef<str>) {
        if self.multi_progress.println(line.as_ref()).is_err() {
            eprintln!("{}", line.as_ref());
        }
    }

    /// Redraw every 100 ms until `stop` fires or its sender is dropped.
    pub fn run(&self, stop: Receiver<()>) {
        let ticker = tick(REFRESH);
        loop {
            select! {
                recv(stop) -> _ => break,
                recv(ticker) -> _ => self.refresh(),
            }
        }
        self.step_pb.finish_and_clear();
        self.transport_pb.finish_and_clear();
        self.surfaces_pb.finish_and_clear();
    }
}
