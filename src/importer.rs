use std::sync::{Arc, LazyLock};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const CONCURRENCY: usize = 4;
const USER_AGENT: &str = concat!("recipe_miner/", env!("CARGO_PKG_VERSION"));

/// Structural tags kept by the sanitizer; everything else is unwrapped down to
/// its text.
const ALLOWED_TAGS: &[&str] = &[
    "ol", "ul", "li", "p", "h1", "h2", "h3", "h4", "h5", "h6",
];

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
// Containers whose content is markup or metadata, not page text.
static DROP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<head\b[^>]*>.*?</head>|<!--.*?-->",
    )
    .unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</?([a-z][a-z0-9]*)\b[^>]*>").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// A page ready for tokenization: title pulled from the raw markup, body
/// reduced to the structural-tag allowlist.
pub struct FetchedDocument {
    pub url: String,
    pub title: Option<String>,
    pub html: String,
}

pub struct FetchRow {
    pub url: String,
    pub title: Option<String>,
    pub html: Option<String>,
    pub error: Option<String>,
}

/// Fetch pages concurrently; each result (or its error) comes back as a row.
pub async fn fetch_pages(urls: Vec<String>) -> Result<Vec<FetchRow>> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")?;
    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let total = urls.len();

    let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchRow>(CONCURRENCY * 2);

    for url in urls {
        let client = client.clone();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let row = match fetch_one(&client, &url).await {
                Ok(doc) => FetchRow {
                    url,
                    title: doc.title,
                    html: Some(doc.html),
                    error: None,
                },
                Err(e) => {
                    warn!("Fetch failed for {}: {}", url, e);
                    FetchRow {
                        url,
                        title: None,
                        html: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            let _ = tx.send(row).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec})")?
            .progress_chars("=> "),
    );

    let mut rows = Vec::with_capacity(total);
    while let Some(row) = rx.recv().await {
        rows.push(row);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let errors = rows.iter().filter(|r| r.error.is_some()).count();
    info!("Fetched {} pages ({} ok, {} errors)", total, total - errors, errors);

    Ok(rows)
}

async fn fetch_one(client: &reqwest::Client, url: &str) -> Result<FetchedDocument> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;
    if !response.status().is_success() {
        bail!("{} returned {}", url, response.status());
    }
    let body = response.text().await?;
    Ok(prepare_document(url, &body))
}

/// Title extraction + sanitization for one raw page.
pub fn prepare_document(url: &str, raw_html: &str) -> FetchedDocument {
    FetchedDocument {
        url: url.to_string(),
        title: extract_title(raw_html),
        html: sanitize_html(raw_html),
    }
}

fn extract_title(raw_html: &str) -> Option<String> {
    let title = TITLE_RE.captures(raw_html)?[1].to_string();
    let title = WHITESPACE_RE.replace_all(title.trim(), " ").to_string();
    (!title.is_empty()).then_some(title)
}

/// Reduce markup to the structural allowlist: scripted/metadata containers go
/// entirely, other tags are unwrapped keeping their text, whitespace collapses
/// to single spaces.
pub fn sanitize_html(raw_html: &str) -> String {
    let stripped = DROP_RE.replace_all(raw_html, " ");
    let unwrapped = TAG_RE.replace_all(&stripped, |caps: &regex::Captures| {
        if ALLOWED_TAGS.contains(&caps[1].to_lowercase().as_str()) {
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    WHITESPACE_RE.replace_all(unwrapped.trim(), " ").to_string()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_keeps_structural_tags_only() {
        let html = "<div><h1>Bread</h1><p>Mix <b>well</b> now.</p></div>";
        assert_eq!(
            sanitize_html(html),
            "<h1>Bread</h1><p>Mix well now.</p>"
        );
    }

    #[test]
    fn sanitizer_drops_scripts_styles_and_comments() {
        let html = "<head><title>x</title></head><script>var a = '<p>no</p>';</script>\
                    <style>p { color: red; }</style><!-- note --><p>yes</p>";
        assert_eq!(sanitize_html(html), "<p>yes</p>");
    }

    #[test]
    fn sanitizer_collapses_whitespace() {
        let html = "<p>two\n\n   cups</p>";
        assert_eq!(sanitize_html(html), "<p>two cups</p>");
    }

    #[test]
    fn title_comes_from_raw_markup() {
        let html = "<html><head><title>  Banana\n Bread </title></head><body></body></html>";
        let doc = prepare_document("http://example.com", html);
        assert_eq!(doc.title.as_deref(), Some("Banana Bread"));
    }

    #[test]
    fn missing_title_is_none() {
        assert!(prepare_document("u", "<p>text</p>").title.is_none());
        assert!(prepare_document("u", "<title>   </title>").title.is_none());
    }
}
