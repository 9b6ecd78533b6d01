use serde::{Deserialize, Serialize};

/// Kind of an entry in a formation's ordered content list.
///
/// Sections are structural markers and never count toward progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Lesson,
    Section,
}

impl ContentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Lesson => "lesson",
            ContentKind::Section => "section",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lesson" => Some(ContentKind::Lesson),
            "section" => Some(ContentKind::Section),
            _ => None,
        }
    }

    #[must_use]
    pub fn counts_toward_progress(self) -> bool {
        matches!(self, ContentKind::Lesson)
    }
}
