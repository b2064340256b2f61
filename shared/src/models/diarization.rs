//! Speaker diarization results and their merge with transcript segments

use serde::{Deserialize, Serialize};

use super::transcription::Segment;

pub const SPEAKER_COLORS: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

/// A span of audio attributed to one speaker label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizationResult {
    pub speakers: Vec<Speaker>,
    pub segments: Vec<SpeakerTurn>,
    pub audio_duration: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Normalise raw engine turns: round times to 2 decimals, sort by start,
/// and name speakers in sorted label order with cycling colours.
pub fn build_diarization(turns: Vec<SpeakerTurn>, audio_duration: f64) -> DiarizationResult {
    let mut segments: Vec<SpeakerTurn> = turns
        .into_iter()
        .map(|t| SpeakerTurn {
            start: round2(t.start),
            end: round2(t.end),
            speaker: t.speaker,
        })
        .collect();
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut ids: Vec<String> = segments.iter().map(|t| t.speaker.clone()).collect();
    ids.sort();
    ids.dedup();

    let speakers = ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| Speaker {
            id,
            name: format!("Speaker {}", i + 1),
            color: SPEAKER_COLORS[i % SPEAKER_COLORS.len()].to_string(),
        })
        .collect();

    DiarizationResult {
        speakers,
        segments,
        audio_duration,
    }
}

/// Assign each transcript segment the speaker with the most overlapping time.
/// Ties go to the speaker encountered first; no overlap leaves the segment unlabelled.
pub fn merge_with_diarization(segments: Vec<Segment>, turns: &[SpeakerTurn]) -> Vec<Segment> {
    if turns.is_empty() {
        return segments;
    }

    segments
        .into_iter()
        .map(|mut segment| {
            let mut totals: Vec<(&str, f64)> = Vec::new();
            for turn in turns {
                if turn.start < segment.end && turn.end > segment.start {
                    let overlap = (segment.end.min(turn.end) - segment.start.max(turn.start)).max(0.0);
                    match totals.iter_mut().find(|(id, _)| *id == turn.speaker) {
                        Some((_, total)) => *total += overlap,
                        None => totals.push((turn.speaker.as_str(), overlap)),
                    }
                }
            }

            let mut best: Option<(&str, f64)> = None;
            for (id, total) in totals {
                if best.map(|(_, b)| total > b).unwrap_or(true) {
                    best = Some((id, total));
                }
            }
            if let Some((id, _)) = best {
                segment.speaker = Some(id.to_string());
            }
            segment
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(start: f64, end: f64, speaker: &str) -> SpeakerTurn {
        SpeakerTurn {
            start,
            end,
            speaker: speaker.to_string(),
        }
    }

    fn segment(start: f64, end: f64) -> Segment {
        Segment {
            start,
            end,
            text: "x".to_string(),
            words: vec![],
            speaker: None,
        }
    }

    #[test]
    fn test_build_rounds_sorts_and_names() {
        let result = build_diarization(
            vec![
                turn(5.126, 7.0, "SPEAKER_01"),
                turn(0.004, 5.0, "SPEAKER_00"),
            ],
            7.0,
        );
        assert_eq!(result.segments[0].start, 0.0);
        assert_eq!(result.segments[1].start, 5.13);
        assert_eq!(result.speakers.len(), 2);
        assert_eq!(result.speakers[0].id, "SPEAKER_00");
        assert_eq!(result.speakers[0].name, "Speaker 1");
        assert_eq!(result.speakers[1].color, "#ff7f0e");
    }

    #[test]
    fn test_palette_cycles() {
        let turns = (0..12).map(|i| turn(i as f64, i as f64 + 1.0, &format!("S{:02}", i))).collect();
        let result = build_diarization(turns, 12.0);
        assert_eq!(result.speakers[10].color, SPEAKER_COLORS[0]);
    }

    #[test]
    fn test_merge_picks_largest_overlap() {
        let turns = vec![turn(0.0, 1.0, "A"), turn(1.0, 4.0, "B"), turn(4.0, 4.5, "A")];
        let merged = merge_with_diarization(vec![segment(0.5, 4.5)], &turns);
        assert_eq!(merged[0].speaker.as_deref(), Some("B"));
    }

    #[test]
    fn test_merge_tie_goes_to_first_encountered() {
        let turns = vec![turn(0.0, 1.0, "B"), turn(1.0, 2.0, "A")];
        let merged = merge_with_diarization(vec![segment(0.0, 2.0)], &turns);
        assert_eq!(merged[0].speaker.as_deref(), Some("B"));
    }

    #[test]
    fn test_merge_without_overlap_or_turns() {
        let merged = merge_with_diarization(vec![segment(10.0, 11.0)], &[turn(0.0, 1.0, "A")]);
        assert!(merged[0].speaker.is_none());
        let unchanged = merge_with_diarization(vec![segment(0.0, 1.0)], &[]);
        assert_eq!(unchanged, vec![segment(0.0, 1.0)]);
    }
}
