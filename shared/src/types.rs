//! Common types used across the platform

use serde::{Deserialize, Serialize};

/// Languages offered for transcription
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("ja", "Japanese"),
    ("zh", "Chinese"),
    ("hi", "Hindi"),
];

/// Language code meaning "let the engine detect it"
pub const AUTO_LANGUAGE: &str = "auto";

/// Requested transcription language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LanguageChoice {
    Auto,
    Code(String),
}

impl LanguageChoice {
    /// Parse a user-supplied language code; empty and "auto" mean detection
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim().to_lowercase();
        if code.is_empty() || code == AUTO_LANGUAGE {
            return Some(LanguageChoice::Auto);
        }
        SUPPORTED_LANGUAGES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(c, _)| LanguageChoice::Code((*c).to_string()))
    }

    /// Code sent to the engine, `None` for auto-detection
    pub fn engine_code(&self) -> Option<&str> {
        match self {
            LanguageChoice::Auto => None,
            LanguageChoice::Code(code) => Some(code),
        }
    }

    /// Value persisted on the transcription row
    pub fn as_stored(&self) -> &str {
        match self {
            LanguageChoice::Auto => AUTO_LANGUAGE,
            LanguageChoice::Code(code) => code,
        }
    }
}

/// Full language name for a code, falling back to the code itself
pub fn language_name(code: &str) -> &str {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or(code)
}

/// Normalise an engine-reported language ("en", "English", "english") to a code
pub fn normalize_language(reported: &str) -> String {
    let reported = reported.trim();
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(code, name)| {
            code.eq_ignore_ascii_case(reported) || name.eq_ignore_ascii_case(reported)
        })
        .map(|(code, _)| (*code).to_string())
        .unwrap_or_else(|| reported.to_lowercase())
}

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Pagination {
    pub const MAX_PER_PAGE: u32 = 100;

    /// Clamp to sane bounds and return (limit, offset)
    pub fn limit_offset(&self) -> (i64, i64) {
        let per_page = self.per_page.clamp(1, Self::MAX_PER_PAGE);
        let page = self.page.max(1);
        (per_page as i64, ((page - 1) * per_page) as i64)
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl PaginationMeta {
    pub fn new(pagination: &Pagination, total_items: u64) -> Self {
        let per_page = pagination.per_page.clamp(1, Pagination::MAX_PER_PAGE);
        let total_pages = total_items.div_ceil(per_page as u64) as u32;
        Self {
            page: pagination.page.max(1),
            per_page,
            total_items,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_choice_parsing() {
        assert_eq!(LanguageChoice::parse("auto"), Some(LanguageChoice::Auto));
        assert_eq!(LanguageChoice::parse(""), Some(LanguageChoice::Auto));
        assert_eq!(
            LanguageChoice::parse("FR"),
            Some(LanguageChoice::Code("fr".to_string()))
        );
        assert_eq!(LanguageChoice::parse("xx"), None);
    }

    #[test]
    fn test_language_name_fallback() {
        assert_eq!(language_name("ja"), "Japanese");
        assert_eq!(language_name("nl"), "nl");
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("english"), "en");
        assert_eq!(normalize_language("ZH"), "zh");
        assert_eq!(normalize_language("Dutch"), "dutch");
    }

    #[test]
    fn test_pagination_bounds() {
        let p = Pagination { page: 0, per_page: 500 };
        assert_eq!(p.limit_offset(), (100, 0));

        let p = Pagination { page: 3, per_page: 20 };
        assert_eq!(p.limit_offset(), (20, 40));

        let meta = PaginationMeta::new(&Pagination::default(), 41);
        assert_eq!(meta.total_pages, 3);
    }
}
