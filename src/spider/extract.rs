use crate::spider::utils::normalize_link;
use log::debug;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href], area[href]").expect("static selector"));

static BASE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("base[href]").expect("static selector"));

/// Extract the outgoing links of a page, in document order
///
/// The HTML parser recovers from malformed markup, so this never fails; at
/// worst it returns the links it could make sense of. Each URL appears once.
pub fn extract_links(body: &str, page_url: &str) -> Vec<String> {
    let page = match Url::parse(page_url) {
        Ok(url) => url,
        Err(e) => {
            debug!("Cannot resolve links against {}: {}", page_url, e);
            return Vec::new();
        }
    };

    let document = Html::parse_document(body);

    // A <base href> changes what relative links resolve against
    let base = document
        .select(&BASE_SELECTOR)
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| page.join(href.trim()).ok())
        .unwrap_or(page);

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        match normalize_link(&base, href) {
            Some(url) => {
                if seen.insert(url.clone()) {
                    links.push(url);
                }
            }
            None => debug!("Skipping link: {}", href),
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_in_document_order() {
        let html = r#"
            <html><body>
              <a href="/b">B</a>
              <a href="a.html">A</a>
              <a href="https://other.org/c">C</a>
            </body></html>
        "#;

        let links = extract_links(html, "https://example.com/dir/page");
        assert_eq!(
            links,
            vec![
                "https://example.com/b",
                "https://example.com/dir/a.html",
                "https://other.org/c",
            ]
        );
    }

    #[test]
    fn test_extract_skips_uncrawlable_and_duplicates() {
        let html = r##"
            <a href="#top">top</a>
            <a href="mailto:me@example.com">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="/page">one</a>
            <a href="/page#again">two</a>
            <a>no href</a>
        "##;

        let links = extract_links(html, "https://example.com/");
        assert_eq!(links, vec!["https://example.com/page"]);
    }

    #[test]
    fn test_extract_from_malformed_markup() {
        let html = r#"<div><a href="/one">one<p><a href="/two">two</div></span><a href="/three""#;

        let links = extract_links(html, "https://example.com/");
        assert!(links.contains(&"https://example.com/one".to_string()));
        assert!(links.contains(&"https://example.com/two".to_string()));
    }

    #[test]
    fn test_extract_honours_base_href() {
        let html = r#"
            <html><head><base href="https://cdn.example.com/root/"></head>
            <body><a href="asset">asset</a></body></html>
        "#;

        let links = extract_links(html, "https://example.com/page");
        assert_eq!(links, vec!["https://cdn.example.com/root/asset"]);
    }

    #[test]
    fn test_extract_image_map_areas() {
        let html = r#"<map><area href="/region" alt="r"></map>"#;

        let links = extract_links(html, "https://example.com/");
        assert_eq!(links, vec!["https://example.com/region"]);
    }

    #[test]
    fn test_extract_empty_body() {
        assert!(extract_links("", "https://example.com/").is_empty());
        assert!(extract_links("<a href=/x>", "not a url").is_empty());
    }
}
