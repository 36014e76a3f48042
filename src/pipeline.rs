use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use image::GrayImage;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    alert::{timestamp_label, AlertDispatcher, DispatchError, MotionEvent},
    camera::{CameraError, FrameSource},
    config::Config,
    gate::{Clock, EventGate},
    vision::{Annotator, DetectError, DetectionSettings, Frame, MotionDetector, MotionResult},
};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct CaptureStats {
    pub frames: u64,
    pub detections: u64,
    pub events: u64,
}

/// Reads frames one after another, compares each with its predecessor and hands gated events
/// to the dispatch worker.
pub struct CaptureLoop<C: Clock> {
    detector: MotionDetector,
    gate: EventGate,
    annotator: Annotator,
    clock: C,
    frame_interval: Duration,
    stats: CaptureStats,
}

impl<C: Clock> CaptureLoop<C> {
    pub fn new(cfg: &Config, clock: C) -> Self {
        Self {
            detector: MotionDetector::new(DetectionSettings::from(&cfg.motion_detection)),
            gate: EventGate::new(Duration::from_secs(cfg.motion_detection.cooldown)),
            annotator: Annotator::new(&cfg.visualization),
            clock,
            frame_interval: Duration::from_millis(cfg.camera.frame_interval_ms),
            stats: CaptureStats::default(),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Runs until shutdown is signalled, the dispatch worker goes away or the source fails.
    /// A source error is returned as is; closing the source is left to the caller.
    pub async fn run<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        events: mpsc::Sender<MotionEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), CameraError> {
        let span = info_span!("capture");
        self.run_inner(source, events, shutdown)
            .instrument(span)
            .await
    }

    async fn run_inner<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        events: mpsc::Sender<MotionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), CameraError> {
        // Blurred luma of the previous frame
        let mut reference: Option<GrayImage> = None;
        info!("Watching for motion");
        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping capture");
                break;
            }
            let next = tokio::select! {
                next = source.next_frame() => next,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Nobody can signal shutdown anymore; treat like a request
                        break;
                    }
                    continue;
                }
            };
            let frame = next?;
            self.stats.frames += 1;
            let now = self.clock.now();

            let detector = self.detector.clone();
            let previous = reference.take();
            let analysis = tokio::task::spawn_blocking(move || {
                let prepared = detector.prepare(&frame);
                let result = previous.map(|p| detector.compare(&p, &prepared));
                (frame, prepared, result)
            })
            .await;
            let (frame, prepared, result) = match analysis {
                Ok(analysis) => analysis,
                Err(e) => {
                    error!("Frame analysis failed: {}", e);
                    continue;
                }
            };
            // On a size mismatch the current frame becomes the new reference
            reference = Some(prepared);

            if let Some(event) = result.and_then(|r| self.on_result(&frame, r, now)) {
                if events.send(event).await.is_err() {
                    warn!("Dispatch worker is gone, stopping capture");
                    break;
                }
                self.stats.events += 1;
            }

            if !self.frame_interval.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.frame_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        debug!(stats = ?self.stats, "Capture finished");
        Ok(())
    }

    fn on_result(
        &mut self,
        frame: &Frame,
        result: Result<MotionResult, DetectError>,
        now: DateTime<Utc>,
    ) -> Option<MotionEvent> {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                warn!(frame = frame.sequence, "{}", e);
                return None;
            }
        };
        if result.detected {
            self.stats.detections += 1;
        }
        if !self.gate.observe(result.detected, now) {
            return None;
        }
        let label = timestamp_label(now);
        let snapshot = self.annotator.annotate(frame, &result.regions, &label);
        info!(
            frame = frame.sequence,
            regions = result.regions.len(),
            "Motion event"
        );
        Some(MotionEvent::new(now, snapshot, result.regions))
    }
}

/// Dispatches events in arrival order until the queue closes. A fatal dispatch error signals
/// shutdown and is returned; events still queued at that point are dropped.
pub async fn run_dispatcher(
    mut events: mpsc::Receiver<MotionEvent>,
    dispatcher: AlertDispatcher,
    shutdown: Arc<watch::Sender<bool>>,
) -> Result<usize, DispatchError> {
    let mut dispatched = 0;
    while let Some(event) = events.recv().await {
        match dispatcher.dispatch(event).await {
            Ok(_) => dispatched += 1,
            Err(e) => {
                error!("{}", e);
                let _ = shutdown.send(true);
                return Err(e);
            }
        }
    }
    debug!(dispatched, "Dispatch queue closed");
    Ok(dispatched)
}

#[cfg(test)]
mod test {
    use std::{collections::VecDeque, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use image::{Rgb, RgbImage};
    use tokio::sync::{mpsc, watch};

    use super::{run_dispatcher, CaptureLoop, CaptureStats};
    use crate::{
        alert::{AlertDispatcher, DispatchError, DEFAULT_DESCRIPTION},
        camera::{CameraError, FrameSource},
        config::Config,
        gate::test::SteppingClock,
        test_support::{read_records, scratch_dir},
        vision::Frame,
    };

    const WIDTH: u32 = 160;
    const HEIGHT: u32 = 120;

    /// Replays prepared frames, then reports the stream as ended
    struct VecSource {
        frames: VecDeque<Frame>,
        closed: bool,
    }

    impl VecSource {
        fn new(frames: Vec<Frame>) -> Self {
            Self {
                frames: frames.into(),
                closed: false,
            }
        }
    }

    #[async_trait]
    impl FrameSource for VecSource {
        async fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.frames.pop_front().ok_or(CameraError::StreamEnded)
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn blank(sequence: u64) -> Frame {
        Frame::new(
            sequence,
            Utc::now(),
            RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([30, 30, 30])),
        )
    }

    fn with_square(sequence: u64, x: u32, y: u32) -> Frame {
        let mut frame = blank(sequence);
        for yy in y..y + 50 {
            for xx in x..x + 50 {
                frame.image.put_pixel(xx, yy, Rgb([240, 240, 240]));
            }
        }
        frame
    }

    /// Ten frames one second apart. A 50x50 square appears in frame 4, moves through frame 6
    /// and stays parked afterwards.
    fn scenario_frames() -> Vec<Frame> {
        (1..=10)
            .map(|n| match n {
                1..=3 => blank(n),
                4..=6 => with_square(n, 10 + (n as u32 - 4) * 20, 30),
                _ => with_square(n, 50, 30),
            })
            .collect()
    }

    fn scenario_config() -> Config {
        let mut cfg = Config::default();
        cfg.camera.frame_interval_ms = 0;
        cfg.motion_detection.min_area = 500;
        cfg.motion_detection.cooldown = 2;
        cfg
    }

    fn clock() -> SteppingClock {
        SteppingClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_scenario_yields_one_event() {
        let cfg = scenario_config();
        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut capture = CaptureLoop::new(&cfg, clock());
        let mut source = VecSource::new(scenario_frames());

        let result = capture.run(&mut source, tx, shutdown_rx).await;
        assert!(matches!(result, Err(CameraError::StreamEnded)));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.frame_sequence, 4);
        assert!(!event.regions.is_empty());
        // Fourth read of a clock that starts at 09:00:00 and steps one second
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 3).unwrap()
        );
        assert_ne!(event.snapshot.image, scenario_frames()[3].image);
        assert!(rx.recv().await.is_none());

        assert_eq!(
            capture.stats(),
            CaptureStats {
                frames: 10,
                detections: 3,
                events: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_vanishing_square_fires_again_after_cooldown() {
        // Same motion in frames 4-6, but the square is gone from frame 7 on. Its disappearance
        // at t=6s is new motion, 3s after the first event and past the 2s cooldown.
        let frames: Vec<Frame> = scenario_frames()
            .into_iter()
            .map(|f| if f.sequence >= 7 { blank(f.sequence) } else { f })
            .collect();
        let cfg = scenario_config();
        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut capture = CaptureLoop::new(&cfg, clock());
        let mut source = VecSource::new(frames);

        let result = capture.run(&mut source, tx, shutdown_rx).await;
        assert!(matches!(result, Err(CameraError::StreamEnded)));

        let mut fired = Vec::new();
        while let Some(event) = rx.recv().await {
            fired.push(event.frame_sequence);
        }
        assert_eq!(fired, vec![4, 7]);
        assert_eq!(capture.stats().detections, 4);
    }

    #[tokio::test]
    async fn test_scenario_end_to_end() {
        let dir = scratch_dir();
        let mut cfg = scenario_config();
        cfg.general.save_directory = dir.clone();
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let dispatcher = AlertDispatcher::from_config(&cfg).unwrap();
        let worker = tokio::spawn(run_dispatcher(rx, dispatcher, shutdown_tx.clone()));
        let mut capture = CaptureLoop::new(&cfg, clock());
        let mut source = VecSource::new(scenario_frames());
        let result = capture.run(&mut source, tx, shutdown_rx).await;
        assert!(matches!(result, Err(CameraError::StreamEnded)));

        assert_eq!(worker.await.unwrap().unwrap(), 1);
        let records = read_records(&cfg.general.log_path());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description, DEFAULT_DESCRIPTION);
        assert!(records[0].image_path.as_ref().unwrap().exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_capture() {
        let cfg = scenario_config();
        let (tx, _rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        let mut capture = CaptureLoop::new(&cfg, clock());
        let mut source = VecSource::new(scenario_frames());

        capture.run(&mut source, tx, shutdown_rx).await.unwrap();
        assert_eq!(capture.stats().frames, 0);
        assert_eq!(source.frames.len(), 10);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let mut cfg = scenario_config();
        cfg.camera.frame_interval_ms = 60_000;
        let (tx, _rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut capture = CaptureLoop::new(&cfg, clock());
        let mut source = VecSource::new(scenario_frames());

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown_tx.send(true).unwrap();
            shutdown_tx
        });
        tokio::time::timeout(
            Duration::from_secs(5),
            capture.run(&mut source, tx, shutdown_rx),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(capture.stats().frames, 1);
        drop(stopper.await.unwrap());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_resyncs() {
        let cfg = scenario_config();
        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut capture = CaptureLoop::new(&cfg, clock());
        let odd = Frame::new(
            3,
            Utc::now(),
            RgbImage::from_pixel(WIDTH / 2, HEIGHT / 2, Rgb([30, 30, 30])),
        );
        let small_square = {
            let mut f = odd.clone();
            f.sequence = 4;
            for y in 5..45 {
                for x in 5..45 {
                    f.image.put_pixel(x, y, Rgb([240, 240, 240]));
                }
            }
            f
        };
        let mut source = VecSource::new(vec![blank(1), blank(2), odd, small_square]);

        let result = capture.run(&mut source, tx, shutdown_rx).await;
        assert!(matches!(result, Err(CameraError::StreamEnded)));
        assert_eq!(capture.stats().frames, 4);
        // Frame 4 is compared against frame 3, the new reference after the mismatch
        assert_eq!(rx.recv().await.unwrap().frame_sequence, 4);
    }

    #[tokio::test]
    async fn test_fatal_dispatch_error_signals_shutdown() {
        let dir = scratch_dir();
        let mut cfg = scenario_config();
        cfg.general.save_directory = dir.clone();
        cfg.general.log_file = "missing/events.jsonl".into();
        let dispatcher = AlertDispatcher::from_config(&cfg).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut capture = CaptureLoop::new(&cfg, clock());
        let mut source = VecSource::new(scenario_frames());
        let _ = capture.run(&mut source, tx, shutdown_rx.clone()).await;

        let result = run_dispatcher(rx, dispatcher, Arc::new(shutdown_tx)).await;
        assert!(matches!(result, Err(DispatchError::LogWriteFailure(_))));
        assert!(*shutdown_rx.borrow());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
