//! Speaker diarization tests
//!
//! Property-based tests for:
//! - Speaker Assignment by Overlap
//! - Speaker Naming and Colours

use proptest::prelude::*;

use shared::models::{build_diarization, merge_with_diarization, Segment, SpeakerTurn, SPEAKER_COLORS};

fn segment(start: f64, end: f64) -> Segment {
    Segment {
        start,
        end,
        text: "hello".to_string(),
        words: vec![],
        speaker: None,
    }
}

fn turn(start: f64, end: f64, speaker: &str) -> SpeakerTurn {
    SpeakerTurn {
        start,
        end,
        speaker: speaker.to_string(),
    }
}

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Non-overlapping turns that tile [0, n * 10)
fn tiled_turns_strategy() -> impl Strategy<Value = Vec<SpeakerTurn>> {
    prop::collection::vec(prop::sample::select(vec!["SPEAKER_00", "SPEAKER_01", "SPEAKER_02"]), 1..12)
        .prop_map(|labels| {
            labels
                .into_iter()
                .enumerate()
                .map(|(i, label)| turn(i as f64 * 10.0, (i + 1) as f64 * 10.0, label))
                .collect()
        })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A segment inside a single turn takes that turn's speaker
    #[test]
    fn contained_segment_takes_turn_speaker(
        turns in tiled_turns_strategy(),
        pick in any::<prop::sample::Index>(),
        offset in 0.5f64..4.5,
    ) {
        let chosen = &turns[pick.index(turns.len())];
        let seg = segment(chosen.start + offset, chosen.start + offset + 5.0);

        let merged = merge_with_diarization(vec![seg], &turns);

        prop_assert_eq!(merged[0].speaker.as_deref(), Some(chosen.speaker.as_str()));
    }

    /// Segments past every turn stay unlabelled
    #[test]
    fn no_overlap_leaves_segment_unlabelled(turns in tiled_turns_strategy()) {
        let end = turns.last().map(|t| t.end).unwrap_or(0.0);
        let merged = merge_with_diarization(vec![segment(end + 1.0, end + 2.0)], &turns);

        prop_assert!(merged[0].speaker.is_none());
    }

    /// Merging never changes timing or text
    #[test]
    fn merge_preserves_segments(
        turns in tiled_turns_strategy(),
        starts in prop::collection::vec(0.0f64..100.0, 0..20),
    ) {
        let segments: Vec<Segment> = starts.iter().map(|s| segment(*s, s + 3.0)).collect();
        let merged = merge_with_diarization(segments.clone(), &turns);

        prop_assert_eq!(merged.len(), segments.len());
        for (before, after) in segments.iter().zip(&merged) {
            prop_assert_eq!(before.start, after.start);
            prop_assert_eq!(before.end, after.end);
            prop_assert_eq!(&before.text, &after.text);
        }
    }

    /// Speakers are numbered in label order with cycling colours
    #[test]
    fn speakers_named_in_label_order(turns in tiled_turns_strategy()) {
        let result = build_diarization(turns.clone(), 120.0);

        let mut labels: Vec<_> = turns.iter().map(|t| t.speaker.clone()).collect();
        labels.sort();
        labels.dedup();

        prop_assert_eq!(result.speakers.len(), labels.len());
        for (i, speaker) in result.speakers.iter().enumerate() {
            prop_assert_eq!(&speaker.id, &labels[i]);
            prop_assert_eq!(speaker.name.clone(), format!("Speaker {}", i + 1));
            prop_assert_eq!(speaker.color.as_str(), SPEAKER_COLORS[i % SPEAKER_COLORS.len()]);
        }
        prop_assert!(result.segments.windows(2).all(|w| w[0].start <= w[1].start));
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[test]
fn test_majority_overlap_wins() {
    let turns = vec![turn(0.0, 4.0, "A"), turn(4.0, 10.0, "B")];
    let merged = merge_with_diarization(vec![segment(2.0, 9.0)], &turns);
    assert_eq!(merged[0].speaker.as_deref(), Some("B"));
}

#[test]
fn test_times_are_rounded_and_sorted() {
    let result = build_diarization(
        vec![turn(5.4567, 8.0, "SPEAKER_01"), turn(0.004, 5.4567, "SPEAKER_00")],
        8.0,
    );
    assert_eq!(result.segments[0].start, 0.0);
    assert_eq!(result.segments[1].start, 5.46);
    assert_eq!(result.audio_duration, 8.0);
}

#[test]
fn test_no_turns_returns_segments_unchanged() {
    let merged = merge_with_diarization(vec![segment(0.0, 1.0)], &[]);
    assert!(merged[0].speaker.is_none());
}
