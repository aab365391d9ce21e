//! Turns timeline responses into pages of posts.
//!
//! A response may arrive as one object or as several streamed fragments; the
//! fragments are merged logically: posts are collected from all of them and the
//! most authoritative page info wins.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::capture::CanonicalOp;
use crate::client::{AbortSignal, AttemptFailure, QueryClient, QueryRequest, ResponseMode};
use crate::error::{AmpooseError, Result};
use crate::path_query::{coerce_i64, first_match, first_string, get_path, scalar_id};

const EDGE_PATHS: &[&str] = &[
    "data.node.timeline_list_feed_units.edges",
    "data.user.timeline_list_feed_units.edges",
    "data.node.timeline_feed_units.edges",
];

const SINGLE_NODE_PATHS: &[&str] = &["data.node", "data.story"];

const PAGE_INFO_PATHS: &[&str] = &[
    "data.node.timeline_list_feed_units.page_info",
    "data.user.timeline_list_feed_units.page_info",
    "data.node.timeline_feed_units.page_info",
    "data.page_info",
];

const MESSAGE_PATHS: &[&str] = &[
    "comet_sections.content.story.message.text",
    "comet_sections.content.story.comet_sections.message.story.message.text",
    "comet_sections.content.story.comet_sections.message_container.story.message.text",
    "message.text",
    "story.message.text",
];

const ACTOR_PATHS: &[&str] = &[
    "comet_sections.context_layout.story.comet_sections.actor_photo.story.actors[0]",
    "comet_sections.content.story.actors[0]",
    "actors[0]",
    "author",
];

const PROFILE_PATHS: &[&str] = &[
    "feedback.owning_profile",
    "comet_sections.feedback.story.feedback_context.feedback_target_with_context.owning_profile",
    "comet_sections.content.story.feedback.owning_profile",
];

const CREATION_TIME_PATHS: &[&str] = &[
    "comet_sections.context_layout.story.comet_sections.metadata[0].story.creation_time",
    "comet_sections.timestamp.story.creation_time",
    "comet_sections.content.story.creation_time",
    "creation_time",
    "created_time",
];

const PERMALINK_PATHS: &[&str] = &[
    "comet_sections.context_layout.story.comet_sections.metadata[0].story.url",
    "comet_sections.content.story.wwwURL",
    "permalink_url",
    "url",
];

const ATTACHMENT_PATHS: &[&str] = &[
    "attachments",
    "comet_sections.content.story.attachments",
    "comet_sections.attached_story",
    "attached_story",
];

/// How deep the page-info search descends into a fragment.
const PAGE_INFO_SEARCH_DEPTH: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Actor {
    fn from_value(value: &Value) -> Option<Self> {
        let actor = Actor {
            id: value.get("id").and_then(scalar_id),
            name: first_string(value, &["name", "short_name"]).map(str::to_string),
            url: first_string(value, &["url", "profile_url"]).map(str::to_string),
        };
        if actor.id.is_none() && actor.name.is_none() {
            None
        } else {
            Some(actor)
        }
    }
}

/// One post as read off the wire; only the resolved id is guaranteed stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimePost {
    pub post_id: Option<String>,
    pub id: Option<String>,
    pub content: String,
    /// Epoch seconds.
    pub created_at: Option<i64>,
    pub author: Option<Actor>,
    pub profile: Option<Actor>,
    pub permalink: Option<String>,
    pub has_attachments: bool,
}

impl RuntimePost {
    pub fn resolved_id(&self) -> Option<&str> {
        self.post_id
            .as_deref()
            .or(self.id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }

    /// Normalize one story node.
    pub fn from_node(node: &Value) -> Self {
        let has_attachments = ATTACHMENT_PATHS.iter().any(|path| match get_path(node, path) {
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            _ => false,
        });
        RuntimePost {
            post_id: node.get("post_id").and_then(scalar_id),
            id: node.get("id").and_then(scalar_id),
            content: first_string(node, MESSAGE_PATHS).unwrap_or_default().to_string(),
            created_at: first_match(node, CREATION_TIME_PATHS).and_then(coerce_i64),
            author: first_match(node, ACTOR_PATHS).and_then(Actor::from_value),
            profile: first_match(node, PROFILE_PATHS).and_then(Actor::from_value),
            permalink: first_string(node, PERMALINK_PATHS).map(str::to_string),
            has_attachments,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl PageInfo {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let has_next_page = obj.get("has_next_page")?.as_bool().unwrap_or(false);
        let end_cursor = obj
            .get("end_cursor")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        Some(PageInfo {
            has_next_page,
            end_cursor,
        })
    }

    fn is_continuable(&self) -> bool {
        self.has_next_page && self.end_cursor.is_some()
    }
}

/// A GraphQL `errors[]` entry that carried a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphqlError {
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelinePage {
    pub posts: Vec<RuntimePost>,
    pub page_info: Option<PageInfo>,
    pub next_cursor: Option<String>,
    pub errors: Vec<GraphqlError>,
}

fn post_nodes(fragment: &Value) -> Vec<&Value> {
    if let Some(edges) = first_match(fragment, EDGE_PATHS).and_then(Value::as_array) {
        return edges.iter().filter_map(|edge| get_path(edge, "node")).collect();
    }
    first_match(fragment, SINGLE_NODE_PATHS)
        .filter(|node| node.get("post_id").is_some() || node.get("id").is_some())
        .into_iter()
        .collect()
}

fn search_page_info<'a>(value: &'a Value, depth: usize, found: &mut Vec<&'a Value>) {
    if depth > PAGE_INFO_SEARCH_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            if map.contains_key("has_next_page") && map.contains_key("end_cursor") {
                found.push(value);
            }
            for child in map.values() {
                search_page_info(child, depth + 1, found);
            }
        }
        Value::Array(items) => {
            for child in items {
                search_page_info(child, depth + 1, found);
            }
        }
        _ => {}
    }
}

fn pick_page_info(fragments: &[Value]) -> Option<PageInfo> {
    let mut candidates: Vec<PageInfo> = fragments
        .iter()
        .filter_map(|f| first_match(f, PAGE_INFO_PATHS))
        .filter_map(PageInfo::from_value)
        .collect();
    if candidates.is_empty() {
        let mut found = Vec::new();
        for fragment in fragments {
            search_page_info(fragment, 0, &mut found);
        }
        candidates = found.into_iter().filter_map(PageInfo::from_value).collect();
    }
    let preferred = candidates.iter().position(PageInfo::is_continuable).unwrap_or(0);
    candidates.into_iter().nth(preferred)
}

fn graphql_errors(fragments: &[Value]) -> Vec<GraphqlError> {
    fragments
        .iter()
        .filter_map(|f| f.get("errors").and_then(Value::as_array))
        .flatten()
        .filter_map(|err| {
            let message = first_string(err, &["message", "summary", "description"])?;
            let code =
                first_match(err, &["code", "extensions.code", "severity"]).and_then(scalar_id);
            Some(GraphqlError {
                code,
                message: message.to_string(),
            })
        })
        .collect()
}

/// Extract posts, the next cursor and any GraphQL errors from a response.
pub fn extract_timeline_page(fragments: &[Value]) -> TimelinePage {
    let mut seen = HashSet::new();
    let mut posts = Vec::new();
    for fragment in fragments {
        for node in post_nodes(fragment) {
            let post = RuntimePost::from_node(node);
            if let Some(id) = post.resolved_id() {
                if !seen.insert(id.to_string()) {
                    continue;
                }
            }
            posts.push(post);
        }
    }

    let page_info = pick_page_info(fragments);
    let next_cursor = page_info
        .as_ref()
        .filter(|info| info.is_continuable())
        .and_then(|info| info.end_cursor.clone());

    TimelinePage {
        posts,
        page_info,
        next_cursor,
        errors: graphql_errors(fragments),
    }
}

fn summarize_errors(errors: &[GraphqlError]) -> String {
    errors
        .iter()
        .take(3)
        .map(|e| match &e.code {
            Some(code) => format!("{code}: {}", e.message),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// One fetched page plus the attempts that failed on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub page: TimelinePage,
    pub failures: Vec<AttemptFailure>,
}

/// Fetch one timeline page starting after `cursor`.
pub fn fetch_timeline_page(
    client: &QueryClient,
    cursor: Option<&str>,
    page_size: u32,
    endpoint: Option<&str>,
    abort: &AbortSignal,
) -> Result<FetchedPage> {
    let mut variables = Map::new();
    variables.insert("count".to_string(), json!(page_size));
    if let Some(cursor) = cursor {
        variables.insert("cursor".to_string(), json!(cursor));
    }
    let request = QueryRequest::new(CanonicalOp::ProfileTimeline)
        .variables(variables)
        .endpoint(endpoint.map(str::to_string))
        .response_mode(ResponseMode::All);
    let response = client.request(&request, abort)?;
    let fragments = response.payload.into_fragments();
    let page = extract_timeline_page(&fragments);

    if page.posts.is_empty() && page.next_cursor.is_none() && !page.errors.is_empty() {
        return Err(AmpooseError::Graphql(summarize_errors(&page.errors)));
    }
    Ok(FetchedPage {
        page,
        failures: response.failures,
    })
}

/// Fetch a single post by id via the single-post operation.
pub fn fetch_single_post(
    client: &QueryClient,
    post_id: &str,
    endpoint: Option<&str>,
    abort: &AbortSignal,
) -> Result<Option<RuntimePost>> {
    let mut variables = Map::new();
    variables.insert("storyID".to_string(), json!(post_id));
    let request = QueryRequest::new(CanonicalOp::SinglePost)
        .variables(variables)
        .endpoint(endpoint.map(str::to_string))
        .response_mode(ResponseMode::All);
    let response = client.request(&request, abort)?;
    let fragments = response.payload.into_fragments();
    let page = extract_timeline_page(&fragments);

    if page.posts.is_empty() && !page.errors.is_empty() {
        return Err(AmpooseError::Graphql(summarize_errors(&page.errors)));
    }
    Ok(page.posts.into_iter().next())
}
