mod describer;
mod dispatcher;
mod journal;
mod mailer;
mod snapshot;
mod speech;

use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vision::{Frame, MotionRegion};

pub use describer::{Describer, DescriberError};
pub use dispatcher::{AlertDispatcher, ChannelConfig, DispatchError, RecordContext};
pub use journal::{EventJournal, JournalError};
pub use mailer::{MailAlert, MailError, Mailer, SmtpMailer};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use speech::{CommandSpeaker, Speaker, SpeechError};

/// Description used whenever no caption could be produced
pub const DEFAULT_DESCRIPTION: &str = "Motion detected";

/// Second-granularity local time used for snapshot names, the overlay label and email subjects.
pub fn timestamp_label(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d_%H-%M-%S")
        .to_string()
}

/// A gated motion occurrence worth alerting on. Handed to the dispatcher exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub frame_sequence: u64,
    /// Frame with the motion outlines and label already drawn
    pub snapshot: Frame,
    pub regions: Vec<MotionRegion>,
    /// Caption known up front. Takes precedence over the describer.
    pub description: Option<String>,
}

impl MotionEvent {
    pub fn new(timestamp: DateTime<Utc>, snapshot: Frame, regions: Vec<MotionRegion>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            frame_sequence: snapshot.sequence,
            snapshot,
            regions,
            description: None,
        }
    }
}

/// One line of the event log.
#[derive(Debug, PartialEq, Eq, Deserialize, Serialize, Clone)]
pub struct AlertRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub instance: String,
    /// `None` when the snapshot could not be written
    pub image_path: Option<PathBuf>,
    pub description: String,
    pub camera: RecordCamera,
    pub motion_detection: RecordDetection,
    /// Configured caption model, recorded whether or not description is enabled
    pub model: String,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize, Clone)]
pub struct RecordCamera {
    pub id: u32,
    pub resolution: String,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize, Clone)]
pub struct RecordDetection {
    pub min_area: u32,
    pub threshold: u8,
    pub regions: usize,
}

#[cfg(test)]
mod test {
    use super::{AlertRecord, RecordCamera, RecordDetection};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_record_json_layout() {
        let record = AlertRecord {
            id: uuid::Uuid::nil(),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 7, 30, 5).unwrap(),
            instance: "Porch".into(),
            image_path: Some("captures/capture_2026-10-19_07-30-05.png".into()),
            description: "A cat walks across the porch".into(),
            camera: RecordCamera {
                id: 0,
                resolution: "1280x720".into(),
            },
            motion_detection: RecordDetection {
                min_area: 500,
                threshold: 25,
                regions: 2,
            },
            model: "moondream".into(),
        };
        insta::assert_json_snapshot!(record, @r###"
        {
          "id": "00000000-0000-0000-0000-000000000000",
          "timestamp": "2026-10-19T07:30:05Z",
          "instance": "Porch",
          "image_path": "captures/capture_2026-10-19_07-30-05.png",
          "description": "A cat walks across the porch",
          "camera": {
            "id": 0,
            "resolution": "1280x720"
          },
          "motion_detection": {
            "min_area": 500,
            "threshold": 25,
            "regions": 2
          },
          "model": "moondream"
        }
        "###);
    }
}
