mod annotate;
mod contour;
mod detector;
mod filters;
mod frame;

pub use annotate::Annotator;
pub use contour::{BoundingBox, MotionRegion, Point};
pub use detector::{DetectError, DetectionSettings, MotionDetector, MotionResult};
pub use frame::Frame;
