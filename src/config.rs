use std::path::{Path, PathBuf};

use figment::{providers::Format, Figment};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Ask the configured AI backend to caption every snapshot
    #[serde(default)]
    pub ai_description: bool,
    #[serde(default)]
    pub general: ConfigGeneral,
    #[serde(default)]
    pub system: ConfigSystem,
    #[serde(default)]
    pub camera: ConfigCamera,
    #[serde(default)]
    pub motion_detection: ConfigMotionDetection,
    #[serde(default)]
    pub ai: ConfigAi,
    #[serde(default)]
    pub tts: ConfigTts,
    #[serde(default)]
    pub visualization: ConfigVisualization,
    #[serde(default)]
    pub email: ConfigEmail,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigGeneral {
    pub save_directory: PathBuf,
    pub log_file: String,
    pub instance_name: String,
}

impl ConfigGeneral {
    pub fn log_path(&self) -> PathBuf {
        self.save_directory.join(&self.log_file)
    }
}

impl Default for ConfigGeneral {
    fn default() -> Self {
        Self {
            save_directory: PathBuf::from("captures"),
            log_file: "motion_events.jsonl".into(),
            instance_name: "Motion Detector".into(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigSystem {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ConfigSystem {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigCamera {
    pub device_id: u32,
    /// Overrides the device path derived from `device_id`
    pub device: Option<String>,
    pub input_format: String,
    pub program: String,
    pub width: u32,
    pub height: u32,
    /// Frames thrown away after opening so exposure can settle
    pub warmup_frames: u32,
    pub frame_interval_ms: u64,
}

impl ConfigCamera {
    pub fn device_path(&self) -> String {
        self.device
            .clone()
            .unwrap_or_else(|| format!("/dev/video{}", self.device_id))
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl Default for ConfigCamera {
    fn default() -> Self {
        Self {
            device_id: 0,
            device: None,
            input_format: "v4l2".into(),
            program: "ffmpeg".into(),
            width: 1280,
            height: 720,
            warmup_frames: 2,
            frame_interval_ms: 100,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigMotionDetection {
    pub min_area: u32,
    pub blur_size: (u32, u32),
    pub threshold: u8,
    /// Seconds between two alertable events
    pub cooldown: u64,
    pub dilate_iterations: u32,
}

impl Default for ConfigMotionDetection {
    fn default() -> Self {
        Self {
            min_area: 500,
            blur_size: (21, 21),
            threshold: 25,
            cooldown: 5,
            dilate_iterations: 2,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, strum::Display)]
pub enum DescriberBackend {
    #[serde(rename = "ollama")]
    #[strum(serialize = "ollama")]
    Ollama,
    #[serde(rename = "openai")]
    #[strum(serialize = "openai")]
    OpenAi,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigAi {
    pub api_type: DescriberBackend,
    pub base_url: String,
    pub model: String,
    pub prompt: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ConfigAi {
    fn default() -> Self {
        Self {
            api_type: DescriberBackend::Ollama,
            base_url: "http://localhost:11434".into(),
            model: "moondream".into(),
            prompt: "Describe what is happening in this image in one or two sentences.".into(),
            api_key: None,
            max_tokens: 300,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigTts {
    pub enabled: bool,
    /// Words per minute
    pub rate: u32,
    /// 0.0 - 1.0
    pub volume: f32,
    pub program: String,
    pub timeout_secs: u64,
}

impl Default for ConfigTts {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 150,
            volume: 1.0,
            program: "espeak".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigVisualization {
    pub draw_contours: bool,
    pub contour_color: [i64; 3],
    pub contour_thickness: i64,
    pub draw_timestamp: bool,
    pub timestamp_color: [i64; 3],
}

impl Default for ConfigVisualization {
    fn default() -> Self {
        Self {
            draw_contours: true,
            contour_color: [0, 255, 0],
            contour_thickness: 2,
            draw_timestamp: true,
            timestamp_color: [255, 255, 255],
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigEmail {
    pub enabled: bool,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
    pub to_address: String,
    pub use_tls: bool,
    pub timeout_secs: u64,
}

impl Default for ConfigEmail {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: String::new(),
            smtp_port: 25,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: String::new(),
            to_address: String::new(),
            use_tls: true,
            timeout_secs: 30,
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let cfg: Config = Figment::new()
        .merge(figment::providers::Toml::file(path))
        .merge(figment::providers::Env::prefixed("EYERIS_").split("__"))
        .extract()?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    /// Rejects values the detection loop and the alert channels cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (blur_w, blur_h) = self.motion_detection.blur_size;
        for (field, size) in [
            ("motion_detection.blur_size[0]", blur_w),
            ("motion_detection.blur_size[1]", blur_h),
        ] {
            if size == 0 || size % 2 == 0 {
                return Err(ConfigError::Invalid(
                    field,
                    format!("blur kernel must be a positive odd integer, got {}", size),
                ));
            }
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(
                "camera.width",
                format!("resolution must be non-zero, got {}", self.camera.resolution()),
            ));
        }
        if !(0.0..=1.0).contains(&self.tts.volume) {
            return Err(ConfigError::Invalid(
                "tts.volume",
                format!("expected 0.0 - 1.0, got {}", self.tts.volume),
            ));
        }
        if self.ai_description {
            if self.ai.base_url.is_empty() {
                return Err(ConfigError::Invalid("ai.base_url", "missing".into()));
            }
            if self.ai.model.is_empty() {
                return Err(ConfigError::Invalid("ai.model", "missing".into()));
            }
            if self.ai.api_type == DescriberBackend::OpenAi
                && self.ai.api_key.as_deref().unwrap_or_default().is_empty()
            {
                return Err(ConfigError::Invalid(
                    "ai.api_key",
                    "required by the openai backend".into(),
                ));
            }
        }
        if self.email.enabled {
            for (field, value) in [
                ("email.smtp_server", &self.email.smtp_server),
                ("email.from_address", &self.email.from_address),
                ("email.to_address", &self.email.to_address),
            ] {
                if value.is_empty() {
                    return Err(ConfigError::Invalid(field, "missing".into()));
                }
            }
        }
        Ok(())
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum ConfigError {
        Load(error: figment::Error) {
            display("Unable to load configuration: {}", error)
            from()
            source(error)
        }
        Invalid(field: &'static str, reason: String) {
            display("Invalid configuration value for `{}`: {}", field, reason)
        }
    }
}
