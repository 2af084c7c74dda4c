//! Interactive runtime: one logical control thread.
//!
//! User commands (stdin), narration completions, and gap timers all funnel
//! into a single channel; the event loop applies each to the controller and
//! executes the effects it emits. The controller never blocks and never
//! touches the engine directly, so every interleaving of user action and
//! engine callback goes through the same guarded path.

use crate::cache;
use crate::config::AppConfig;
use crate::controller::{Controller, Effect, RepeatMode};
use crate::narrator::{NarrationEvent, NarrationOutcome, Narrator};
use crate::tts::PiperNarrator;
use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A parsed user command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Stop,
    Next,
    Prev,
    Find(String),
    Goto(usize),
    Speed(f32),
    Language(String),
    Count(usize),
    Mode(RepeatMode),
    Status,
    Help,
    Quit,
}

/// Everything the event loop can wake up for.
enum RuntimeEvent {
    Command(Command),
    Narration(NarrationEvent),
    GapOver { request_id: u64 },
    Interrupted,
}

/// Parse one input line. `None` means the line was empty or not a command.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "play" | "p" => Some(Command::Play),
        "stop" | "s" => Some(Command::Stop),
        "next" | "n" => Some(Command::Next),
        "prev" | "b" => Some(Command::Prev),
        "find" | "f" if !rest.is_empty() => Some(Command::Find(rest.to_string())),
        "goto" => rest.parse().ok().filter(|n| *n >= 1).map(Command::Goto),
        "speed" => rest.parse().ok().map(Command::Speed),
        "lang" => (!rest.is_empty()).then(|| Command::Language(rest.to_string())),
        "count" => rest.parse().ok().map(Command::Count),
        "mode" => match rest {
            "repeat" => Some(Command::Mode(RepeatMode::Repeat)),
            "continue" => Some(Command::Mode(RepeatMode::Continue)),
            _ => None,
        },
        "status" => Some(Command::Status),
        "help" | "?" => Some(Command::Help),
        "quit" | "q" => Some(Command::Quit),
        _ => None,
    }
}

const HELP: &str = "\
commands:
  play | stop | next | prev     control the narration session
  find <text>                   seek to the sentence matching a selection
  goto <n>                      move the cursor to sentence n (1-based)
  speed <multiplier>            narration rate, 1.0 = native pace
  lang <tag>                    locale tag, e.g. en-US or zh-HK
  count <n>                     sentences per session before auto-stop
  mode <continue|repeat>        advance or re-read on each completion
  status | help | quit";

pub fn run_app(text: String, mut config: AppConfig, doc_path: PathBuf) -> Result<()> {
    let (tx, rx) = mpsc::channel::<RuntimeEvent>();

    let events_tx = tx.clone();
    let mut narrator = PiperNarrator::new(
        PathBuf::from(&config.tts_model_path),
        PathBuf::from(&config.tts_espeak_path),
        PathBuf::from(&config.tts_voices_dir),
        cache::audio_dir(&doc_path),
        config.tts_volume,
        move |event| {
            let _ = events_tx.send(RuntimeEvent::Narration(event));
        },
    )
    .context("Starting narration engine")?;

    let mut controller = Controller::new(config.narration_settings());
    controller.set_voices(narrator.voices());

    let mut effects = Vec::new();
    controller.load_text(&text, &mut effects);
    effects.clear();
    println!("{} sentences loaded ({})", controller.sentences().len(), controller.position_indicator());

    let interrupt_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(RuntimeEvent::Interrupted);
    })
    .context("Installing Ctrl-C handler")?;

    spawn_stdin_reader(tx.clone());

    while let Ok(event) = rx.recv() {
        let mut effects = Vec::new();
        let keep_running = match event {
            RuntimeEvent::Command(command) => {
                handle_command(&mut controller, command, &mut effects)
            }
            RuntimeEvent::Narration(NarrationEvent {
                request_id,
                outcome,
            }) => {
                match outcome {
                    NarrationOutcome::Finished => {
                        controller.narration_finished(request_id, &mut effects)
                    }
                    NarrationOutcome::Failed(reason) => {
                        controller.narration_failed(request_id, &reason, &mut effects)
                    }
                }
                true
            }
            RuntimeEvent::GapOver { request_id } => {
                controller.gap_elapsed(request_id, &mut effects);
                true
            }
            RuntimeEvent::Interrupted => {
                info!("Interrupted; shutting down");
                controller.stop(&mut effects);
                false
            }
        };
        apply_effects(&controller, &mut narrator, &mut config, &doc_path, &tx, effects);
        if !keep_running {
            break;
        }
    }
    Ok(())
}

/// Apply one command to the controller; returns whether to keep running.
fn handle_command(controller: &mut Controller, command: Command, effects: &mut Vec<Effect>) -> bool {
    match command {
        Command::Play => controller.play(effects),
        Command::Stop => controller.stop(effects),
        Command::Next => {
            controller.next_sentence(effects);
            println!("{}  {}", controller.position_indicator(), controller.current_sentence());
        }
        Command::Prev => {
            controller.prev_sentence(effects);
            println!("{}  {}", controller.position_indicator(), controller.current_sentence());
        }
        Command::Find(selection) => {
            if !controller.play_from_selection(&selection, effects) {
                // No match is not an error; resume from the cursor instead.
                println!("no matching sentence; playing from {}", controller.position_indicator());
                controller.play(effects);
            }
        }
        Command::Goto(n) => {
            controller.seek_to(n - 1, effects);
            println!(
                "cursor at sentence {}: {}",
                controller.current_index() + 1,
                controller.current_sentence()
            );
        }
        Command::Speed(speed) => controller.set_speed(speed, effects),
        Command::Language(language) => controller.set_language(language, effects),
        Command::Count(count) => controller.set_sentence_count(count, effects),
        Command::Mode(mode) => controller.set_repeat_mode(mode, effects),
        Command::Status => {
            let settings = controller.settings();
            println!(
                "{}  playing={}  speed={}  lang={}  count={}  mode={}",
                controller.position_indicator(),
                controller.is_playing(),
                settings.speed,
                settings.language,
                settings.sentence_count,
                settings.repeat_mode,
            );
            println!("{}", controller.current_sentence());
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {
            controller.stop(effects);
            return false;
        }
    }
    true
}

/// Execute controller effects against the engine and the timer/persistence
/// facilities. Engine submit failures are fed back through the event channel
/// as narration failures rather than handled inline, so they take the same
/// guarded path as engine-reported errors.
fn apply_effects<N: Narrator>(
    controller: &Controller,
    narrator: &mut N,
    config: &mut AppConfig,
    doc_path: &Path,
    tx: &Sender<RuntimeEvent>,
    effects: Vec<Effect>,
) {
    for effect in effects {
        match effect {
            Effect::CancelNarration => narrator.cancel_all(),
            Effect::Speak(request) => {
                let request_id = request.request_id;
                if let Err(err) = narrator.speak(request) {
                    warn!(request_id, "Failed to queue utterance: {err:#}");
                    let _ = tx.send(RuntimeEvent::Narration(NarrationEvent {
                        request_id,
                        outcome: NarrationOutcome::Failed(format!("{err:#}")),
                    }));
                }
            }
            Effect::ScheduleGap { request_id, delay } => {
                schedule_gap(tx.clone(), request_id, delay);
            }
            Effect::SaveSettings => {
                config.absorb_narration_settings(controller.settings());
                cache::save_doc_config(doc_path, config);
                debug!("Persisted settings");
            }
        }
    }
}

/// Arm a one-shot timer delivering a `GapOver` event. The controller decides
/// whether the id is still current when it fires.
fn schedule_gap(tx: Sender<RuntimeEvent>, request_id: u64, delay: Duration) {
    thread::spawn(move || {
        thread::sleep(delay);
        let _ = tx.send(RuntimeEvent::GapOver { request_id });
    });
}

fn spawn_stdin_reader(tx: Sender<RuntimeEvent>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            let Some(command) = parse_command(&line) else {
                println!("unrecognized command; try `help`");
                continue;
            };
            let quitting = command == Command::Quit;
            if tx.send(RuntimeEvent::Command(command)).is_err() || quitting {
                break;
            }
        }
        // EOF on stdin ends the session too.
        let _ = tx.send(RuntimeEvent::Interrupted);
    });
}
