//! Spoken narration of objects entering and leaving the scene.
//!
use std::{
    process::{Command, Stdio},
    sync::atomic::{AtomicBool, Ordering},
};

use common::Prediction;

/// Consumer of plain-text utterances.
///
/// Sinks never fail: hosts without speech support degrade to logging.
pub trait SpeechSink: Send {
    fn speak(&self, text: &str);
}

/// Speech sink which only logs utterances.
#[derive(Debug, Default)]
pub struct LogSpeech;

impl SpeechSink for LogSpeech {
    fn speak(&self, text: &str) {
        log::info!("Narration: {text}");
    }
}

/// Speech sink running a text-to-speech program of the host, e.g. `espeak "some text"`.
#[derive(Debug)]
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    unsupported: AtomicBool,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            unsupported: AtomicBool::new(false),
        }
    }

    /// Whether spawning the program already failed once.
    pub fn is_unsupported(&self) -> bool {
        self.unsupported.load(Ordering::Relaxed)
    }
}

impl SpeechSink for CommandSpeech {
    fn speak(&self, text: &str) {
        if self.is_unsupported() {
            log::debug!("Skipping narration: {text}");
            return;
        }

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                // Reap the child once it finished speaking without blocking the frame loop.
                std::thread::spawn(move || child.wait());
            }
            Err(e) => {
                log::warn!(
                    "Text-to-speech not supported on this host ({}: {e}), narration is logged only",
                    &self.program
                );
                log::info!("Narration: {text}");
                self.unsupported.store(true, Ordering::Relaxed);
            }
        }
    }
}

/// Announces classes which appeared or disappeared since the last announcement.
pub struct PresenceNarrator {
    last_spoken: Vec<String>,
    sink: Box<dyn SpeechSink>,
}

impl PresenceNarrator {
    pub fn new(sink: Box<dyn SpeechSink>) -> Self {
        Self {
            last_spoken: Vec::new(),
            sink,
        }
    }

    /// Compare the classes of the current frame with the last announced ones and speak the change.
    ///
    /// Returns the spoken utterance, or `None` if the set of classes did not change.
    pub fn update(&mut self, predictions: &[Prediction]) -> Option<String> {
        let mut current: Vec<String> = Vec::with_capacity(predictions.len());
        for prediction in predictions {
            if !current.contains(&prediction.class) {
                current.push(prediction.class.clone());
            }
        }

        let utterance = describe_change(&self.last_spoken, &current)?;
        self.sink.speak(&utterance);
        self.last_spoken = current;

        Some(utterance)
    }

    /// Classes mentioned by the last announcement.
    pub fn last_spoken(&self) -> &[String] {
        &self.last_spoken
    }
}

fn describe_change(previous: &[String], current: &[String]) -> Option<String> {
    let appeared: Vec<&str> = current
        .iter()
        .filter(|class| !previous.contains(*class))
        .map(String::as_str)
        .collect();
    let vanished: Vec<&str> = previous
        .iter()
        .filter(|class| !current.contains(*class))
        .map(String::as_str)
        .collect();

    let mut parts = Vec::with_capacity(2);
    if !appeared.is_empty() {
        parts.push(format!("Detected: {}.", appeared.join(", ")));
    }
    if !vanished.is_empty() {
        parts.push(format!("No longer visible: {}.", vanished.join(", ")));
    }

    match parts.is_empty() {
        true => None,
        false => Some(parts.join(" ")),
    }
}
