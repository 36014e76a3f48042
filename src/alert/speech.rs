use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::ConfigTts;

#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;
}

/// Speaks through an external synthesizer with an espeak-compatible command line
/// (`-s <words per minute> -a <amplitude 0-200> -- <text>`).
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    program: String,
    rate: u32,
    volume: f32,
    timeout: Duration,
}

impl CommandSpeaker {
    pub fn new(cfg: &ConfigTts) -> Self {
        Self {
            program: cfg.program.clone(),
            rate: cfg.rate,
            volume: cfg.volume,
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    fn args(&self, text: &str) -> Vec<String> {
        let amplitude = (self.volume.clamp(0.0, 1.0) * 200.0).round() as u32;
        vec![
            "-s".into(),
            self.rate.to_string(),
            "-a".into(),
            amplitude.to_string(),
            // Captions are free text and may start with a dash
            "--".into(),
            text.into(),
        ]
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        debug!(program = %self.program, "Speaking alert");
        let output = Command::new(&self.program)
            .args(self.args(text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| SpeechError::Timeout(self.timeout))?
            .map_err(SpeechError::Spawn)?;
        if !output.status.success() {
            return Err(SpeechError::Failed(
                output.status.to_string(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum SpeechError {
        Spawn(error: std::io::Error) {
            display("Unable to start speech synthesizer: {}", error)
            source(error)
        }
        Failed(status: String, stderr: String) {
            display("Speech synthesizer failed ({}): {}", status, stderr)
        }
        Timeout(limit: Duration) {
            display("Speech synthesizer did not finish within {:?}", limit)
        }
    }
}
