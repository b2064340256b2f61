//! Transcription records and their status lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::whisper::WhisperModel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TranscriptionStatus {
    pub const ALL: [TranscriptionStatus; 4] = [
        TranscriptionStatus::Pending,
        TranscriptionStatus::Processing,
        TranscriptionStatus::Completed,
        TranscriptionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::Pending => "pending",
            TranscriptionStatus::Processing => "processing",
            TranscriptionStatus::Completed => "completed",
            TranscriptionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TranscriptionStatus::Pending),
            "processing" => Some(TranscriptionStatus::Processing),
            "completed" => Some(TranscriptionStatus::Completed),
            "failed" => Some(TranscriptionStatus::Failed),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TranscriptionStatus::Pending => "Pending",
            TranscriptionStatus::Processing => "Processing",
            TranscriptionStatus::Completed => "Completed",
            TranscriptionStatus::Failed => "Failed",
        }
    }

    /// Allowed moves: pending → processing → completed | failed,
    /// processing | failed → pending when a job is re-queued, and
    /// pending → failed when its job is abandoned before it starts.
    pub fn can_transition_to(&self, next: TranscriptionStatus) -> bool {
        use TranscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Failed, Pending)
        )
    }

    /// Stored status names a record may move to `next` from
    pub fn sources_of(next: TranscriptionStatus) -> Vec<&'static str> {
        Self::ALL
            .iter()
            .filter(|s| s.can_transition_to(next))
            .map(|s| s.as_str())
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TranscriptionStatus::Completed)
    }
}

impl std::fmt::Display for TranscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recognised word with timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub probability: f64,
}

/// A timed span of transcript text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Trim segment text and drop words that carry no text
pub fn clean_segments(segments: Vec<Segment>) -> Vec<Segment> {
    segments
        .into_iter()
        .map(|mut segment| {
            segment.text = segment.text.trim().to_string();
            segment.words.retain(|w| !w.word.trim().is_empty());
            for word in &mut segment.words {
                word.word = word.word.trim().to_string();
            }
            segment
        })
        .collect()
}

/// Whitespace separated token count
pub fn word_count(text: &str) -> i32 {
    i32::try_from(text.split_whitespace().count()).unwrap_or(i32::MAX)
}

/// Audio length as `m:ss`, or `-` when unknown
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "-".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Media duration once a transcript exists: the end of the last segment
pub fn duration_from_segments(segments: &[Segment]) -> Option<f64> {
    segments.last().map(|s| s.end)
}

/// A transcription request and, once processed, its result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub status: TranscriptionStatus,
    pub text: Option<String>,
    pub error_message: Option<String>,
    /// Seconds spent in the engine
    pub processing_time: Option<f64>,
    pub language: String,
    pub language_probability: Option<f64>,
    pub word_count: Option<i32>,
    pub segments: Vec<Segment>,
    pub model_used: WhisperModel,
    pub has_speaker_diarization: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transcription {
    pub fn is_ready(&self) -> bool {
        self.status == TranscriptionStatus::Completed
    }

    /// A completed record without text is treated as a failed run
    pub fn has_missing_text(&self) -> bool {
        self.status == TranscriptionStatus::Completed
            && self.text.as_deref().map(str::trim).unwrap_or("").is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use TranscriptionStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_sources_follow_transitions() {
        use TranscriptionStatus::*;
        assert_eq!(TranscriptionStatus::sources_of(Completed), vec!["processing"]);
        assert_eq!(TranscriptionStatus::sources_of(Processing), vec!["pending"]);
        assert_eq!(
            TranscriptionStatus::sources_of(Pending),
            vec!["processing", "failed"]
        );
        assert_eq!(
            TranscriptionStatus::sources_of(Failed),
            vec!["pending", "processing"]
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "-");
        assert_eq!(format_duration(-3.0), "-");
        assert_eq!(format_duration(f64::NAN), "-");
        assert_eq!(format_duration(5.9), "0:05");
        assert_eq!(format_duration(125.0), "2:05");
        assert_eq!(format_duration(3600.0), "60:00");
    }

    #[test]
    fn test_clean_segments() {
        let raw = vec![Segment {
            start: 0.0,
            end: 1.5,
            text: "  hello world ".to_string(),
            words: vec![
                Word { word: " hello".into(), start: 0.0, end: 0.5, probability: 0.9 },
                Word { word: "  ".into(), start: 0.5, end: 0.6, probability: 0.1 },
                Word { word: "world".into(), start: 0.6, end: 1.5, probability: 0.8 },
            ],
            speaker: None,
        }];
        let cleaned = clean_segments(raw);
        assert_eq!(cleaned[0].text, "hello world");
        assert_eq!(cleaned[0].words.len(), 2);
        assert_eq!(cleaned[0].words[0].word, "hello");
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("  one two\tthree\nfour "), 4);
    }

    #[test]
    fn test_segment_json_shape() {
        let json = r#"{"start":0.0,"end":2.0,"text":"hi"}"#;
        let segment: Segment = serde_json::from_str(json).unwrap();
        assert!(segment.words.is_empty());
        assert!(segment.speaker.is_none());
        let back = serde_json::to_value(&segment).unwrap();
        assert!(back.get("speaker").is_none());
    }
}
