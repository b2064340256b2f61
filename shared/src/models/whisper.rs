//! Whisper model sizes and their place on the plan ladder

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whisper model size, ordered from fastest to most accurate
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModel {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown whisper model: {0}")]
pub struct UnknownModel(pub String);

impl WhisperModel {
    /// Every model in ladder order
    pub const ALL: [WhisperModel; 5] = [
        WhisperModel::Tiny,
        WhisperModel::Base,
        WhisperModel::Small,
        WhisperModel::Medium,
        WhisperModel::Large,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "tiny",
            WhisperModel::Base => "base",
            WhisperModel::Small => "small",
            WhisperModel::Medium => "medium",
            WhisperModel::Large => "large",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownModel> {
        match s.trim().to_lowercase().as_str() {
            "tiny" => Ok(WhisperModel::Tiny),
            "base" => Ok(WhisperModel::Base),
            "small" => Ok(WhisperModel::Small),
            "medium" => Ok(WhisperModel::Medium),
            "large" => Ok(WhisperModel::Large),
            other => Err(UnknownModel(other.to_string())),
        }
    }

    /// Short label shown next to a finished transcription
    pub fn display_name(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "Tiny (Fastest)",
            WhisperModel::Base => "Base (Fast)",
            WhisperModel::Small => "Small (Balanced)",
            WhisperModel::Medium => "Medium (Better)",
            WhisperModel::Large => "Large (Best)",
        }
    }

    /// Long label used in model pickers
    pub fn description(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "Tiny (Fastest, lowest accuracy)",
            WhisperModel::Base => "Base (Fast, lower accuracy)",
            WhisperModel::Small => "Small (Good balance)",
            WhisperModel::Medium => "Medium (Better accuracy)",
            WhisperModel::Large => "Large (Best accuracy, slowest)",
        }
    }

    /// Slug of the cheapest plan that unlocks this model
    pub fn required_tier(&self) -> &'static str {
        match self {
            WhisperModel::Tiny | WhisperModel::Base => "free",
            WhisperModel::Small => "basic",
            WhisperModel::Medium => "pro",
            WhisperModel::Large => "enterprise",
        }
    }

    /// All models up to and including `max`, in ladder order
    pub fn up_to(max: WhisperModel) -> Vec<WhisperModel> {
        Self::ALL.iter().copied().filter(|m| *m <= max).collect()
    }
}

impl std::fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WhisperModel {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_order() {
        assert!(WhisperModel::Tiny < WhisperModel::Base);
        assert!(WhisperModel::Medium < WhisperModel::Large);
    }

    #[test]
    fn test_up_to() {
        assert_eq!(
            WhisperModel::up_to(WhisperModel::Small),
            vec![WhisperModel::Tiny, WhisperModel::Base, WhisperModel::Small]
        );
        assert_eq!(WhisperModel::up_to(WhisperModel::Tiny), vec![WhisperModel::Tiny]);
        assert_eq!(WhisperModel::up_to(WhisperModel::Large).len(), 5);
    }

    #[test]
    fn test_parse_round_trip_and_unknown() {
        for model in WhisperModel::ALL {
            assert_eq!(WhisperModel::parse(model.as_str()), Ok(model));
        }
        assert_eq!(WhisperModel::parse(" Medium "), Ok(WhisperModel::Medium));
        assert!(WhisperModel::parse("huge").is_err());
    }

    #[test]
    fn test_required_tier() {
        assert_eq!(WhisperModel::Base.required_tier(), "free");
        assert_eq!(WhisperModel::Large.required_tier(), "enterprise");
    }
}
