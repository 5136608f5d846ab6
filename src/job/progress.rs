use crate::book::BookId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a server-side pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Translating,
    Synthesizing,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Translating => f.write_str("translating"),
            PipelineStage::Synthesizing => f.write_str("synthesizing"),
        }
    }
}

/// Intermediate progress for both pipeline stages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub stage: PipelineStage,
    pub translated: u32,
    pub synthesized: u32,
    pub total: u32,
    pub message: String,
}

impl ProgressUpdate {
    /// Progress of the active stage as `(current, total)`
    pub fn current(&self) -> (u32, u32) {
        match self.stage {
            PipelineStage::Translating => (self.translated, self.total),
            PipelineStage::Synthesizing => (self.synthesized, self.total),
        }
    }

    pub fn fraction(&self, stage: PipelineStage) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        let done = match stage {
            PipelineStage::Translating => self.translated,
            PipelineStage::Synthesizing => self.synthesized,
        };
        (done as f32 / self.total as f32).clamp(0.0, 1.0)
    }
}

/// Why a job stream ended without a book
#[derive(Debug, Clone, PartialEq)]
pub enum JobFailure {
    /// The backend reported the pipeline failed
    Pipeline { stage: PipelineStage, message: String },
    /// Transport dropped or sent garbage before a terminal event
    Connection(String),
}

/// One element of a job progress stream
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(ProgressUpdate),
    Completed { book_id: BookId },
    Failed(JobFailure),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress(_))
    }
}

/// Event payload as sent on `/api/jobs/{id}/stream`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum WireEvent {
    Progress {
        #[serde(default)]
        translation: u32,
        #[serde(default)]
        audio: u32,
        #[serde(default)]
        total: u32,
        #[serde(default)]
        message: String,
    },
    Completed {
        book_id: String,
    },
    Failed {
        #[serde(default)]
        message: String,
    },
}

/// Turns wire events into [`JobEvent`]s, remembering which stage is active so
/// a failure can be attributed to it.
#[derive(Debug, Default)]
pub(crate) struct StageTracker {
    last: Option<PipelineStage>,
}

impl StageTracker {
    pub fn interpret(&mut self, event: WireEvent) -> JobEvent {
        match event {
            WireEvent::Progress {
                translation,
                audio,
                total,
                message,
            } => {
                let stage = if audio > 0 || (total > 0 && translation >= total) {
                    PipelineStage::Synthesizing
                } else {
                    PipelineStage::Translating
                };
                self.last = Some(stage);
                JobEvent::Progress(ProgressUpdate {
                    stage,
                    translated: translation,
                    synthesized: audio,
                    total,
                    message,
                })
            }
            WireEvent::Completed { book_id } => JobEvent::Completed {
                book_id: BookId::new(book_id),
            },
            WireEvent::Failed { message } => JobEvent::Failed(JobFailure::Pipeline {
                stage: self.last.unwrap_or(PipelineStage::Translating),
                message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(raw: &str) -> WireEvent {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_stage_follows_progress() {
        let mut tracker = StageTracker::default();

        let first = tracker.interpret(wire(
            r#"{"status":"progress","translation":1,"audio":0,"total":2,"message":"Translating 1/2"}"#,
        ));
        match first {
            JobEvent::Progress(update) => {
                assert_eq!(update.stage, PipelineStage::Translating);
                assert_eq!(update.current(), (1, 2));
                assert_eq!(update.fraction(PipelineStage::Translating), 0.5);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let second = tracker.interpret(wire(
            r#"{"status":"progress","translation":2,"audio":1,"total":2}"#,
        ));
        match second {
            JobEvent::Progress(update) => {
                assert_eq!(update.stage, PipelineStage::Synthesizing);
                assert_eq!(update.current(), (1, 2));
                assert!(update.message.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_failure_is_attributed_to_last_stage() {
        let mut tracker = StageTracker::default();
        tracker.interpret(wire(r#"{"status":"progress","translation":3,"audio":0,"total":3}"#));

        let failed = tracker.interpret(wire(r#"{"status":"failed","message":"tts crashed"}"#));
        assert_eq!(
            failed,
            JobEvent::Failed(JobFailure::Pipeline {
                stage: PipelineStage::Synthesizing,
                message: "tts crashed".to_string(),
            })
        );
        assert!(failed.is_terminal());
    }

    #[test]
    fn test_failure_before_any_progress() {
        let mut tracker = StageTracker::default();
        let failed = tracker.interpret(wire(r#"{"status":"failed","message":"bad input"}"#));
        assert!(matches!(
            failed,
            JobEvent::Failed(JobFailure::Pipeline {
                stage: PipelineStage::Translating,
                ..
            })
        ));
    }

    #[test]
    fn test_completed_carries_book_id() {
        let mut tracker = StageTracker::default();
        let done = tracker.interpret(wire(r#"{"status":"completed","book_id":"b1"}"#));
        assert_eq!(
            done,
            JobEvent::Completed {
                book_id: BookId::new("b1")
            }
        );
    }
}
