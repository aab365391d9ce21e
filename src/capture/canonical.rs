use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// The two GraphQL operations ampoose knows how to replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CanonicalOp {
    #[serde(rename = "ProfileCometTimelineFeedRefetchQuery")]
    ProfileTimeline,
    #[serde(rename = "CometSinglePostContentQuery")]
    SinglePost,
}

impl CanonicalOp {
    pub const ALL: [CanonicalOp; 2] = [CanonicalOp::ProfileTimeline, CanonicalOp::SinglePost];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalOp::ProfileTimeline => "ProfileCometTimelineFeedRefetchQuery",
            CanonicalOp::SinglePost => "CometSinglePostContentQuery",
        }
    }

    /// Exact (case-sensitive) lookup by canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl fmt::Display for CanonicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static TIMELINE_FAMILY: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"profilecomet.*timeline.*(feed|refetch)|timeline.*feed.*pagination")
        .case_insensitive(true)
        .build()
        .expect("timeline family pattern is valid")
});

/// Map a raw operation name onto one of the canonical operations.
///
/// Exact names win; otherwise case-insensitive heuristics tuned to each
/// operation family are tried. Unrelated names return `None`.
pub fn canonicalize_op_name(raw: &str) -> Option<CanonicalOp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(op) = CanonicalOp::from_name(raw) {
        return Some(op);
    }

    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeline") && lower.contains("refetch") {
        return Some(CanonicalOp::ProfileTimeline);
    }
    if TIMELINE_FAMILY.is_match(raw) {
        return Some(CanonicalOp::ProfileTimeline);
    }

    if lower.contains("singlepost")
        || lower.contains("focusedstory")
        || (lower.contains("storyview") && lower.contains("ufi"))
    {
        return Some(CanonicalOp::SinglePost);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_names_match() {
        assert_eq!(
            canonicalize_op_name("ProfileCometTimelineFeedRefetchQuery"),
            Some(CanonicalOp::ProfileTimeline)
        );
        assert_eq!(
            canonicalize_op_name("CometSinglePostContentQuery"),
            Some(CanonicalOp::SinglePost)
        );
    }

    #[test]
    fn heuristics_cover_operation_families() {
        assert_eq!(
            canonicalize_op_name("ProfileCometTimelineRefetchQueryV2"),
            Some(CanonicalOp::ProfileTimeline)
        );
        assert_eq!(
            canonicalize_op_name("profilecomettimelinefeedquery"),
            Some(CanonicalOp::ProfileTimeline)
        );
        assert_eq!(
            canonicalize_op_name("CometFocusedStoryViewUFIQuery"),
            Some(CanonicalOp::SinglePost)
        );
        assert_eq!(
            canonicalize_op_name("StoryViewUFIQuery"),
            Some(CanonicalOp::SinglePost)
        );
    }

    #[test]
    fn unrelated_names_are_rejected() {
        assert_eq!(canonicalize_op_name("CometNotificationsDropdownQuery"), None);
        assert_eq!(canonicalize_op_name("StoryViewQuery"), None);
        assert_eq!(canonicalize_op_name("   "), None);
    }
}
