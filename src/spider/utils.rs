use crate::spider::error::SpiderError;
use regex::Regex;
use url::Url;

/// Parse and canonicalize the seed URL
///
/// Only absolute http(s) URLs with a host are accepted; anything else is a
/// configuration error since no crawl could start from it.
pub fn normalize_seed(url_str: &str) -> Result<Url, SpiderError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| {
        SpiderError::InvalidUrl(format!("{} ({})", url_str, e))
    })?;

    if !is_http(&url) {
        return Err(SpiderError::InvalidUrl(format!(
            "{} (only http and https are supported)",
            url_str
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(SpiderError::InvalidUrl(format!("No host in URL: {}", url_str)));
    }

    url.set_fragment(None);
    Ok(url)
}

/// Resolve a link found on `base` into its canonical absolute form
///
/// Returns `None` for links that can never be crawled: empty hrefs,
/// fragment-only anchors, and non-http schemes such as `mailto:`,
/// `javascript:` or `tel:`.
pub fn normalize_link(base: &Url, raw_link: &str) -> Option<String> {
    let href = raw_link.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut url = base.join(href).ok()?;
    if !is_http(&url) || url.host_str().is_none() {
        return None;
    }

    url.set_fragment(None);
    Some(url.into())
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Strip a leading `www.` so `www.example.com` and `example.com` compare equal
fn bare_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Identify the site a URL belongs to as `host:port`
///
/// A leading `www.` is ignored and default ports are made explicit, so
/// `http://www.example.com/` and `http://example.com:80/x` share a key
/// while `example.com:8080` and `example.com:9090` do not.
pub fn site_key(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let host = bare_host(url.host_str()?).to_ascii_lowercase();
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

/// Split the raw command-line form `a;b;c` into individual patterns
pub fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .map(str::to_string)
        .collect()
}

/// Exclusion patterns tested against URL paths
///
/// Each pattern is a regular expression searched anywhere in the path, so a
/// plain string such as `/private` behaves as a substring match.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<Regex>,
}

impl ExclusionFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, SpiderError> {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(Regex::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Check if the path of `url` matches any exclusion pattern
    pub fn is_excluded(&self, url: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        match Url::parse(url) {
            Ok(parsed) => self.matches(parsed.path()),
            Err(_) => self.matches(url),
        }
    }

    fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(path))
    }
}
