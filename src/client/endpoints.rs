use std::collections::BTreeMap;

use url::Url;

use crate::error::Result;

const DEFAULT_PATH: &str = "/api/graphql/";
const ALTERNATE_PATH: &str = "/graphql/";

/// Where GraphQL requests may be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// URL of the host page; relative endpoints resolve against it.
    pub page_url: String,
    /// Origin for the origin-qualified variants. Defaults to the page's origin.
    pub origin: Option<String>,
    /// Host on which the cross-origin fallbacks are also tried.
    pub mirror_host: String,
    pub mirror_fallbacks: Vec<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            page_url: "https://www.facebook.com/me".to_string(),
            origin: None,
            mirror_host: "web.facebook.com".to_string(),
            mirror_fallbacks: vec![
                "https://www.facebook.com/api/graphql/".to_string(),
                "https://m.facebook.com/api/graphql/".to_string(),
            ],
        }
    }
}

fn push_unique(out: &mut Vec<String>, url: String) {
    if !out.contains(&url) {
        out.push(url);
    }
}

/// Ordered, de-duplicated endpoint URLs to try. A pinned endpoint replaces the list.
pub fn candidate_endpoints(config: &EndpointConfig, pinned: Option<&str>) -> Result<Vec<String>> {
    let page = Url::parse(&config.page_url)?;

    if let Some(pinned) = pinned.map(str::trim).filter(|p| !p.is_empty()) {
        return Ok(vec![page.join(pinned)?.to_string()]);
    }

    let mut out = Vec::new();
    for path in [DEFAULT_PATH, ALTERNATE_PATH] {
        push_unique(&mut out, page.join(path)?.to_string());
    }

    let origin = match config.origin.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
        Some(origin) => Url::parse(origin)?,
        None => page.clone(),
    };
    let origin = origin.origin().ascii_serialization();
    for path in [DEFAULT_PATH, ALTERNATE_PATH] {
        push_unique(&mut out, format!("{origin}{path}"));
    }

    if page.host_str() == Some(config.mirror_host.as_str()) {
        for fallback in &config.mirror_fallbacks {
            push_unique(&mut out, page.join(fallback)?.to_string());
        }
    }

    Ok(out)
}

/// Parameter sets to try against each endpoint, most specific first:
/// captured merged with ambient (ambient wins), ambient alone, nothing.
pub fn param_variants(
    captured: &BTreeMap<String, String>,
    ambient: &BTreeMap<String, String>,
) -> Vec<BTreeMap<String, String>> {
    let mut merged = captured.clone();
    merged.extend(ambient.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut out: Vec<BTreeMap<String, String>> = Vec::with_capacity(3);
    for variant in [merged, ambient.clone(), BTreeMap::new()] {
        if !out.contains(&variant) {
            out.push(variant);
        }
    }
    out
}
