use clap::Parser;
use crossbeam::channel::{bounded, unbounded, Sender};
use dialoguer::{theme::ColorfulTheme, Select};
use stepsync::{
    cli::{parse_intent, Args, HELP},
    config::Settings,
    handle_device_list, logging,
    midi::{MidiBackend, MidiDevice, MidirBackend},
    sync::LocalPeerSession,
    ui::{track_line, StatusDisplay},
    Engine, EngineMessage, EventLoop,
};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;

fn main() {
    let args = Args::parse();
    let mut settings = match Settings::load(&args) {
        Ok(settings) => settings,
        Err(e) => exit_with_error(&e.to_string()),
    };
    initialize_logging(&args, &settings);

    let backend: Arc<dyn MidiBackend> = Arc::new(MidirBackend::new());

    if args.device_list {
        list_available_devices(backend.as_ref());
        return;
    }

    if args.select_output {
        settings.midi_output = choose_output(backend.as_ref());
    }

    let engine = match Engine::new(&settings, backend, Arc::new(LocalPeerSession::new())) {
        Ok(engine) => Arc::new(engine),
        Err(e) => exit_with_error(&format!("Error starting engine: {}", e)),
    };
    engine.start_device_monitor(settings.device_poll);

    let (intents, intent_rx) = unbounded();
    let (feedback, feedback_rx) = unbounded();
    install_ctrlc_handler(intents.clone());

    let display = Arc::new(StatusDisplay::new(Arc::clone(&engine)));
    let (stop_display, display_stopped) = bounded::<()>(0);
    let ui_thread = {
        let display = Arc::clone(&display);
        thread::spawn(move || display.run(display_stopped))
    };

    {
        let display = Arc::clone(&display);
        thread::spawn(move || {
            for e in feedback_rx {
                display.println(format!("Error: {}", e));
            }
        });
    }

    {
        let display = Arc::clone(&display);
        let engine = Arc::clone(&engine);
        thread::spawn(move || read_commands(intents, &display, &engine));
    }

    display.println("Type 'help' for commands, Ctrl+C to exit");
    log::info!("Application running");
    EventLoop::new(Arc::clone(&engine), intent_rx, Some(feedback)).run();

    drop(stop_display);
    let _ = ui_thread.join();
    log::info!("Application exiting");
}

fn exit_with_error(message: &str) -> ! {
    log::error!("{}", message);
    eprintln!("{}", message);
    std::process::exit(1);
}

fn initialize_logging(args: &Args, settings: &Settings) {
    let result = if args.log_stderr {
        logging::init_stderr_logger(settings.log_level)
    } else {
        logging::init_logger(settings.log_level)
    };
    match result {
        Ok(()) => log::info!("Application starting"),
        Err(e) => eprintln!("Logging disabled: {}", e),
    }
}

fn print_devices(heading: &str, devices: &[MidiDevice]) {
    println!("{}:", heading);
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        println!("  - {}", device.name);
    }
}

fn list_available_devices(backend: &dyn MidiBackend) {
    match handle_device_list(backend) {
        Ok(devices) => {
            print_devices("MIDI inputs", &devices.inputs);
            print_devices("MIDI outputs", &devices.outputs);
        }
        Err(e) => exit_with_error(&format!("Error listing MIDI devices: {}", e)),
    }
}

fn choose_output(backend: &dyn MidiBackend) -> Option<String> {
    let outputs = match backend.outputs() {
        Ok(outputs) if !outputs.is_empty() => outputs,
        Ok(_) => {
            eprintln!("No MIDI outputs available");
            return None;
        }
        Err(e) => {
            eprintln!("Error listing MIDI outputs: {}", e);
            return None;
        }
    };

    let names: Vec<&str> = outputs.iter().map(|d| d.name.as_str()).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("MIDI output")
        .items(&names)
        .default(0)
        .interact_opt();
    match selection {
        Ok(Some(index)) => outputs.get(index).map(|d| d.id.clone()),
        Ok(None) => None,
        Err(e) => {
            eprintln!("Output selection failed: {}", e);
            None
        }
    }
}

fn install_ctrlc_handler(intents: Sender<EngineMessage>) {
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = intents.send(EngineMessage::Shutdown);
    }) {
        log::warn!("Could not install Ctrl+C handler: {}", e);
    }
}

fn read_commands(intents: Sender<EngineMessage>, display: &StatusDisplay, engine: &Engine) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        match line {
            "" => continue,
            "help" => display.println(HELP),
            "status" => {
                for track in engine.transport().snapshot().tracks {
                    display.println(track_line(&track));
                }
            }
            _ => match parse_intent(line) {
                Ok(message) => {
                    if intents.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => display.println(format!("{} (type 'help')", e)),
            },
        }
    }
}
