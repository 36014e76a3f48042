use std::path::PathBuf;

use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{
    describer, timestamp_label, AlertRecord, CommandSpeaker, Describer, DescriberError,
    EventJournal, JournalError, MailAlert, MailError, Mailer, MotionEvent, RecordCamera,
    RecordDetection, SmtpMailer, SnapshotError, SnapshotStore, Speaker, DEFAULT_DESCRIPTION,
};
use crate::config::Config;

/// Which optional channels run for every event.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct ChannelConfig {
    pub ai_description: bool,
    pub tts: bool,
    pub email: bool,
}

impl From<&Config> for ChannelConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            ai_description: cfg.ai_description,
            tts: cfg.tts.enabled,
            email: cfg.email.enabled,
        }
    }
}

/// Static facts copied into every record.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RecordContext {
    pub instance: String,
    pub camera_id: u32,
    pub resolution: String,
    pub min_area: u32,
    pub threshold: u8,
    pub model: String,
}

impl From<&Config> for RecordContext {
    fn from(cfg: &Config) -> Self {
        Self {
            instance: cfg.general.instance_name.clone(),
            camera_id: cfg.camera.device_id,
            resolution: cfg.camera.resolution(),
            min_area: cfg.motion_detection.min_area,
            threshold: cfg.motion_detection.threshold,
            model: cfg.ai.model.clone(),
        }
    }
}

/// Fans one event out to every alert channel. Only the event log is allowed to fail the alert;
/// every other channel degrades on its own.
pub struct AlertDispatcher {
    channels: ChannelConfig,
    context: RecordContext,
    snapshots: SnapshotStore,
    journal: EventJournal,
    describer: Option<Box<dyn Describer>>,
    speaker: Option<Box<dyn Speaker>>,
    mailer: Option<Box<dyn Mailer>>,
}

impl AlertDispatcher {
    pub fn new(
        channels: ChannelConfig,
        context: RecordContext,
        snapshots: SnapshotStore,
        journal: EventJournal,
    ) -> Self {
        Self {
            channels,
            context,
            snapshots,
            journal,
            describer: None,
            speaker: None,
            mailer: None,
        }
    }

    pub fn with_describer(mut self, describer: Box<dyn Describer>) -> Self {
        self.describer = Some(describer);
        self
    }

    pub fn with_speaker(mut self, speaker: Box<dyn Speaker>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    pub fn with_mailer(mut self, mailer: Box<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Wires the collaborators for every enabled channel. Call from within a tokio runtime when
    /// email is enabled, see `SmtpMailer::new`.
    pub fn from_config(cfg: &Config) -> Result<AlertDispatcher, DispatchError> {
        let channels = ChannelConfig::from(cfg);
        let mut dispatcher = AlertDispatcher::new(
            channels,
            RecordContext::from(cfg),
            SnapshotStore::new(&cfg.general.save_directory),
            EventJournal::new(cfg.general.log_path()),
        );
        if channels.ai_description {
            dispatcher = dispatcher.with_describer(describer::from_config(&cfg.ai)?);
        }
        if channels.tts {
            dispatcher = dispatcher.with_speaker(Box::new(CommandSpeaker::new(&cfg.tts)));
        }
        if channels.email {
            dispatcher = dispatcher.with_mailer(Box::new(SmtpMailer::new(
                &cfg.email,
                &cfg.general.instance_name,
            )?));
        }
        info!(
            ai_description = channels.ai_description,
            tts = channels.tts,
            email = channels.email,
            log = %cfg.general.log_path().display(),
            "Alert channels ready"
        );
        Ok(dispatcher)
    }

    pub async fn dispatch(&self, event: MotionEvent) -> Result<AlertRecord, DispatchError> {
        let span = info_span!("alert", event = %event.id, frame = event.frame_sequence);
        self.dispatch_inner(event).instrument(span).await
    }

    async fn dispatch_inner(&self, event: MotionEvent) -> Result<AlertRecord, DispatchError> {
        let label = timestamp_label(event.timestamp);

        let png = match event.snapshot.encode_png() {
            Ok(png) => Some(png),
            Err(e) => {
                error!("{}", SnapshotError::from(e));
                None
            }
        };
        let image_path = match &png {
            Some(png) => self.save_snapshot(&label, png).await,
            None => None,
        };

        let description = match event.description.clone() {
            Some(description) => description,
            None => self.describe(png.as_deref()).await,
        };

        let record = AlertRecord {
            id: event.id,
            timestamp: event.timestamp,
            instance: self.context.instance.clone(),
            image_path,
            description,
            camera: RecordCamera {
                id: self.context.camera_id,
                resolution: self.context.resolution.clone(),
            },
            motion_detection: RecordDetection {
                min_area: self.context.min_area,
                threshold: self.context.threshold,
                regions: event.regions.len(),
            },
            model: self.model(),
        };
        self.journal
            .append(&record)
            .await
            .map_err(DispatchError::LogWriteFailure)?;
        info!(
            description = %record.description,
            image = ?record.image_path,
            "Motion event recorded"
        );

        if self.channels.tts {
            self.speak(&record.description).await;
        }
        if self.channels.email {
            let filename = record
                .image_path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("capture_{}.png", label));
            let alert = MailAlert {
                timestamp: &label,
                description: &record.description,
                attachment: png.as_deref().map(|bytes| (filename.as_str(), bytes)),
            };
            self.mail(&alert).await;
        }

        Ok(record)
    }

    fn model(&self) -> String {
        match self.describer.as_ref() {
            Some(describer) if self.channels.ai_description => describer.model().to_string(),
            _ => self.context.model.clone(),
        }
    }

    async fn save_snapshot(&self, label: &str, png: &[u8]) -> Option<PathBuf> {
        match self.snapshots.save(label, png).await {
            Ok(path) => {
                debug!(path = %path.display(), "Snapshot saved");
                Some(path)
            }
            Err(e) => {
                error!("Snapshot not saved: {}", e);
                None
            }
        }
    }

    async fn describe(&self, png: Option<&[u8]>) -> String {
        if !self.channels.ai_description {
            return DEFAULT_DESCRIPTION.to_string();
        }
        let (Some(describer), Some(png)) = (self.describer.as_ref(), png) else {
            warn!("AI description enabled but nothing to describe with, using placeholder");
            return DEFAULT_DESCRIPTION.to_string();
        };
        match describer.describe(png).await {
            Ok(text) => text,
            Err(e) => {
                warn!("{}. Using placeholder", e);
                DEFAULT_DESCRIPTION.to_string()
            }
        }
    }

    async fn speak(&self, text: &str) {
        let Some(speaker) = self.speaker.as_ref() else {
            warn!("Speech enabled but no speaker configured");
            return;
        };
        if let Err(e) = speaker.speak(text).await {
            warn!("Spoken alert failed: {}", e);
        }
    }

    async fn mail(&self, alert: &MailAlert<'_>) {
        let Some(mailer) = self.mailer.as_ref() else {
            warn!("Email enabled but no mailer configured");
            return;
        };
        match mailer.send(alert).await {
            Ok(()) => info!("Email alert sent"),
            Err(e) => warn!("Email alert failed: {}", e),
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum DispatchError {
        LogWriteFailure(error: JournalError) {
            display("Event log could not be written: {}", error)
            source(error)
        }
        DescriberSetup(error: DescriberError) {
            display("Unable to set up the describer: {}", error)
            from()
            source(error)
        }
        MailerSetup(error: MailError) {
            display("Unable to set up the mailer: {}", error)
            from()
            source(error)
        }
    }
}
