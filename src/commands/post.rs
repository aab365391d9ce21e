use std::path::PathBuf;

use crate::client::AbortSignal;
use crate::config::ResolvedClientConfig;
use crate::error::{AmpooseError, Result};
use crate::timeline::fetch_single_post;

use super::util::{build_client, install_ctrlc, open_store};

pub struct PostOptions {
    pub store_path: PathBuf,
    pub client: ResolvedClientConfig,
}

/// Fetch one post through the single-post operation and print it as JSON.
pub fn run_post(post_id: &str, options: &PostOptions) -> Result<()> {
    let post_id = post_id.trim();
    if post_id.is_empty() {
        return Err(AmpooseError::InvalidArgs("post id must not be empty".to_string()));
    }

    let store = open_store(&options.store_path)?;
    let client = build_client(&options.client, store);
    let abort = AbortSignal::new();
    let abort_handler = abort.clone();
    install_ctrlc(move || abort_handler.abort())?;

    let post = fetch_single_post(&client, post_id, options.client.endpoint.as_deref(), &abort)?
        .ok_or_else(|| AmpooseError::MalformedResponse(format!("no post found for {post_id}")))?;
    println!("{}", serde_json::to_string_pretty(&post)?);
    Ok(())
}
