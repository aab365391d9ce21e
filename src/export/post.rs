use serde::{Deserialize, Serialize};

use crate::timeline::RuntimePost;

/// A post as written to export files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPost {
    pub id: String,
    pub content: String,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// Reduce a post to its exportable form. Posts without an id, without text, or
/// carrying attachments are not exported.
pub fn sanitize_for_export(post: &RuntimePost) -> Option<ExportPost> {
    if post.has_attachments {
        return None;
    }
    let id = post.resolved_id()?;
    let content = post.content.trim();
    if content.is_empty() {
        return None;
    }
    Some(ExportPost {
        id: id.trim().to_string(),
        content: content.to_string(),
        created_at: post.created_at,
    })
}
