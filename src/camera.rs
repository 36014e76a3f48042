use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStdout, Command},
};
use tracing::{debug, info, warn};

use crate::{config::ConfigCamera, vision::Frame};

/// Anything that produces frames in order. The capture loop owns it for its whole lifetime.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Releases the underlying device. Called once on every exit path of the capture loop.
    async fn close(&mut self);
}

/// Reads raw RGB24 frames from an `ffmpeg` child process attached to the camera device.
pub struct FfmpegCamera {
    config: ConfigCamera,
    child: Child,
    stdout: ChildStdout,
    frame_len: usize,
    sequence: u64,
}

impl FfmpegCamera {
    pub async fn open(config: ConfigCamera) -> Result<FfmpegCamera, CameraError> {
        let args = ffmpeg_args(&config);
        debug!(program = %config.program, ?args, "Spawning camera reader");
        let mut child = Command::new(&config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(CameraError::SpawnFailed)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::OpenFailed("reader has no stdout pipe".into()))?;

        let mut camera = FfmpegCamera {
            frame_len: config.width as usize * config.height as usize * 3,
            config,
            child,
            stdout,
            sequence: 0,
        };
        // Let exposure settle; also proves the device actually delivers frames
        for _ in 0..camera.config.warmup_frames {
            if let Err(e) = camera.next_frame().await {
                camera.close().await;
                return Err(CameraError::OpenFailed(format!(
                    "{} produced no frames: {}",
                    camera.config.device_path(),
                    e
                )));
            }
        }
        info!(
            device = %camera.config.device_path(),
            resolution = %camera.config.resolution(),
            "Camera opened"
        );
        Ok(camera)
    }
}

#[async_trait]
impl FrameSource for FfmpegCamera {
    async fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let mut buf = vec![0u8; self.frame_len];
        self.stdout.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CameraError::StreamEnded
            } else {
                CameraError::ReadFailed(e)
            }
        })?;
        self.sequence += 1;
        Frame::from_rgb24(
            self.sequence,
            Utc::now(),
            self.config.width,
            self.config.height,
            buf,
        )
        .ok_or_else(|| CameraError::OpenFailed("frame buffer size mismatch".into()))
    }

    async fn close(&mut self) {
        match self.child.kill().await {
            Ok(()) => info!(device = %self.config.device_path(), "Camera released"),
            Err(e) => warn!("Camera reader could not be stopped cleanly: {}", e),
        }
    }
}

/// Command line for a reader that writes packed `rgb24` frames of the configured size to stdout.
pub fn ffmpeg_args(config: &ConfigCamera) -> Vec<String> {
    let size = format!("{}x{}", config.width, config.height);
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        config.input_format.clone(),
        "-video_size".into(),
        size,
        "-i".into(),
        config.device_path(),
        "-vf".into(),
        format!("scale={}:{}", config.width, config.height),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-".into(),
    ]
}

quick_error! {
    #[derive(Debug)]
    pub enum CameraError {
        SpawnFailed(error: std::io::Error) {
            display("Unable to start camera reader: {}", error)
            source(error)
        }
        OpenFailed(reason: String) {
            display("Cannot open camera: {}", reason)
        }
        ReadFailed(error: std::io::Error) {
            display("Camera read failed: {}", error)
            source(error)
        }
        StreamEnded {
            display("Camera stream ended")
        }
    }
}
