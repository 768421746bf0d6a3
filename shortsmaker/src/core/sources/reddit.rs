//! Reddit post source
//!
//! Reads Reddit's public JSON endpoints: the subreddit `top` listing for a
//! random unseen post, or `<permalink>.json` for a specific one. Ids already
//! used are remembered in `<cache_dir>/seen_posts.json`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Post, PostSource};
use crate::core::fs::{atomic_write_bytes, atomic_write_json_pretty};
use crate::core::settings::RedditSettings;
use crate::core::{CoreError, CoreResult};

const SEEN_POSTS_FILE: &str = "seen_posts.json";
const REDDIT_BASE: &str = "https://www.reddit.com";

// =============================================================================
// Reddit JSON
// =============================================================================

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct Child {
    kind: String,
    data: PostData,
}

#[derive(Deserialize)]
struct PostData {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    stickied: bool,
}

impl From<PostData> for Post {
    fn from(d: PostData) -> Self {
        Post {
            id: d.id,
            title: d.title,
            body: d.selftext,
            url: format!("{}{}", REDDIT_BASE, d.permalink),
            subreddit: d.subreddit,
            author: d.author,
        }
    }
}

fn parse_error(e: serde_json::Error) -> CoreError {
    CoreError::Collaborator(format!("unexpected Reddit response: {}", e))
}

/// Posts of a listing response, pinned posts excluded
pub fn parse_listing(json: &str) -> CoreResult<Vec<Post>> {
    let listing: Listing = serde_json::from_str(json).map_err(parse_error)?;
    Ok(listing
        .data
        .children
        .into_iter()
        .filter(|c| c.kind == "t3" && !c.data.stickied)
        .map(|c| Post::from(c.data))
        .collect())
}

/// The post of a `<permalink>.json` response (first listing, first child)
pub fn parse_post_page(json: &str) -> CoreResult<Post> {
    let listings: Vec<Listing> = serde_json::from_str(json).map_err(parse_error)?;
    listings
        .into_iter()
        .next()
        .and_then(|l| l.data.children.into_iter().find(|c| c.kind == "t3"))
        .map(|c| Post::from(c.data))
        .ok_or_else(|| CoreError::NotFound("post page contains no post".to_string()))
}

/// `<url>.json` for a Reddit post URL; `None` when the URL is not a post
fn post_json_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    let path = without_query
        .strip_prefix("https://")
        .or_else(|| without_query.strip_prefix("http://"))?;
    let (host, rest) = path.split_once('/')?;
    let host_ok = host == "reddit.com" || host.ends_with(".reddit.com");
    if !host_ok || !rest.contains("comments/") {
        return None;
    }
    Some(format!(
        "{}/{}.json",
        REDDIT_BASE,
        rest.trim_end_matches('/')
    ))
}

// =============================================================================
// Source
// =============================================================================

/// [`PostSource`] backed by Reddit's public JSON API
pub struct RedditPostSource {
    client: reqwest::blocking::Client,
    settings: RedditSettings,
    cache_dir: PathBuf,
    seen: BTreeSet<String>,
    rng: StdRng,
}

impl RedditPostSource {
    pub fn new(settings: RedditSettings, cache_dir: &Path, seed: Option<u64>) -> CoreResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| CoreError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let seen = load_seen(&cache_dir.join(SEEN_POSTS_FILE));
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            client,
            settings,
            cache_dir: cache_dir.to_path_buf(),
            seen,
            rng,
        })
    }

    fn fetch(&self, url: &str) -> CoreResult<String> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| CoreError::Collaborator(format!("Reddit request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound(format!("Reddit returned 404 for {}", url)));
        }
        if !status.is_success() {
            return Err(CoreError::Collaborator(format!("HTTP {}: {}", status, url)));
        }
        response
            .text()
            .map_err(|e| CoreError::Collaborator(format!("Failed to read response: {}", e)))
    }

    fn pick_unseen(&mut self) -> CoreResult<Post> {
        let url = format!(
            "{}/r/{}/top.json?t={}&limit={}",
            REDDIT_BASE, self.settings.subreddit_name, self.settings.time_filter, self.settings.limit
        );
        let candidates: Vec<Post> = parse_listing(&self.fetch(&url)?)?
            .into_iter()
            .filter(|p| !self.seen.contains(&p.id) && !p.title.trim().is_empty())
            .collect();

        candidates.choose(&mut self.rng).cloned().ok_or_else(|| {
            CoreError::NotFound(format!(
                "no unseen posts in r/{} (top of {})",
                self.settings.subreddit_name, self.settings.time_filter
            ))
        })
    }

    fn record(&mut self, post: &Post) -> CoreResult<()> {
        self.seen.insert(post.id.clone());
        atomic_write_json_pretty(&self.cache_dir.join(SEEN_POSTS_FILE), &self.seen)?;
        atomic_write_json_pretty(&self.cache_dir.join(&self.settings.record_file_json), post)?;
        atomic_write_bytes(
            &self.cache_dir.join(&self.settings.record_file_txt),
            post.text().as_bytes(),
        )
    }
}

impl PostSource for RedditPostSource {
    fn get_post(&mut self, url: Option<&str>) -> CoreResult<Post> {
        let post = match url {
            Some(url) => {
                let json_url = post_json_url(url)
                    .ok_or_else(|| CoreError::NotFound(format!("not a Reddit post URL: {}", url)))?;
                parse_post_page(&self.fetch(&json_url)?)?
            }
            None => self.pick_unseen()?,
        };
        info!("Using post {} \"{}\"", post.id, post.title);
        self.record(&post)?;
        Ok(post)
    }
}

fn load_seen(path: &Path) -> BTreeSet<String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LISTING: &str = r#"{
        "kind": "Listing",
        "data": {"children": [
            {"kind": "t3", "data": {"id": "pin", "title": "Rules", "stickied": true}},
            {"kind": "t3", "data": {"id": "a1", "title": "AITA for this", "selftext": "Body",
                                    "permalink": "/r/AmItheAsshole/comments/a1/aita/",
                                    "subreddit": "AmItheAsshole", "author": "someone"}}
        ]}
    }"#;

    #[test]
    fn test_parse_listing_skips_pinned() {
        let posts = parse_listing(LISTING).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "a1");
        assert_eq!(
            posts[0].url,
            "https://www.reddit.com/r/AmItheAsshole/comments/a1/aita/"
        );
    }

    #[test]
    fn test_parse_post_page() {
        let page = format!("[{}, {{\"data\": {{\"children\": []}}}}]", LISTING.replace("\"stickied\": true", "\"stickied\": false"));
        let post = parse_post_page(&page).unwrap();
        assert_eq!(post.id, "pin");
        assert!(matches!(parse_post_page("[]"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_post_json_url() {
        assert_eq!(
            post_json_url("https://www.reddit.com/r/tifu/comments/1j36d7a/i_got_tired/?utm=x").unwrap(),
            "https://www.reddit.com/r/tifu/comments/1j36d7a/i_got_tired.json"
        );
        assert!(post_json_url("https://old.reddit.com/r/a/comments/x/y").is_some());
        assert!(post_json_url("https://example.com/r/a/comments/x").is_none());
        assert!(post_json_url("https://www.reddit.com/r/tifu/").is_none());
        assert!(post_json_url("not a url").is_none());
    }

    #[test]
    fn test_invalid_url_is_not_found_without_network() {
        let temp = TempDir::new().unwrap();
        let mut source =
            RedditPostSource::new(RedditSettings::default(), temp.path(), Some(1)).unwrap();
        let err = source.get_post(Some("https://example.com/post")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_record_writes_files_and_remembers_id() {
        let temp = TempDir::new().unwrap();
        let settings = RedditSettings::default();
        let mut source = RedditPostSource::new(settings.clone(), temp.path(), Some(1)).unwrap();
        let post = parse_listing(LISTING).unwrap().remove(0);
        source.record(&post).unwrap();

        let text = std::fs::read_to_string(temp.path().join(&settings.record_file_txt)).unwrap();
        assert_eq!(text, "AITA for this.\nBody\n");
        let reloaded = load_seen(&temp.path().join(SEEN_POSTS_FILE));
        assert!(reloaded.contains("a1"));
    }
}
