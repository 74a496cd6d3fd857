use anyhow::{Context, Result};
use env_logger::Env;
use log::{info, warn};
use std::env;
use std::process;
use std::str::FromStr;
use std::time::Instant;

use link_auditor::spider::config::defaults;
use link_auditor::spider::report::{broken_pages, save_report};
use link_auditor::spider::utils::split_patterns;
use link_auditor::spider::{BasicAuth, Spider, SpiderConfig};

fn usage(program: &str) -> String {
    format!(
        "Usage:\n  {} <url> <output> [depth_limit] [fail_tolerance] [max_threads] [basic_auth] [exclusions]\n\
         \x20 - url: the website to check for broken links\n\
         \x20 - output: file the JSON report is written to ('-' for stdout)\n\
         \x20 - depth_limit: how many links away from url to follow (default: {})\n\
         \x20 - fail_tolerance: retries for pages that fail to respond (default: {})\n\
         \x20 - max_threads: number of workers, 0 sizes the pool dynamically (default: {})\n\
         \x20 - basic_auth: credentials as username:password\n\
         \x20 - exclusions: ';'-separated URL path patterns to skip, e.g. '/login.*;/private'",
        program,
        defaults::MAX_DEPTH,
        defaults::FAIL_TOLERANCE,
        defaults::MAX_WORKERS,
    )
}

/// Parse an optional positional number, falling back to the default
fn parse_arg<T: FromStr>(args: &[String], index: usize, name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match args.get(index) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a non-negative integer, got '{}'", name, raw)),
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        println!("{}", usage(&args[0]));
        process::exit(2);
    }

    let url = &args[1];
    let output = &args[2];

    let max_depth = parse_arg(&args, 3, "depth_limit", defaults::MAX_DEPTH)?;
    let fail_tolerance = parse_arg(&args, 4, "fail_tolerance", defaults::FAIL_TOLERANCE)?;
    let max_workers = parse_arg(&args, 5, "max_threads", defaults::MAX_WORKERS)?;

    let mut builder = SpiderConfig::builder()
        .max_depth(max_depth)
        .fail_tolerance(fail_tolerance)
        .max_workers(max_workers);

    if let Some(raw) = args.get(6).filter(|s| !s.is_empty()) {
        let auth: BasicAuth = raw.parse()?;
        builder = builder.basic_auth(auth);
    }

    if let Some(raw) = args.get(7) {
        let patterns = split_patterns(raw);
        let patterns: Vec<&str> = patterns.iter().map(String::as_str).collect();
        builder = builder.exclusion_patterns(&patterns);
    }

    info!("+-------------------------------------------+");
    info!("|               Link Auditor                |");
    info!("+-------------------------------------------+");

    let mut spider = Spider::new(url, builder.build())
        .with_context(|| format!("cannot crawl {}", url))?;

    info!("Starting crawl of {}", spider.seed());
    let start = Instant::now();

    let records = spider.crawl().await?;

    for page in broken_pages(records) {
        warn!(
            "Broken link: {} ({})",
            page.url,
            page.error_detail.as_deref().unwrap_or("unknown error")
        );
    }

    save_report(records, output).with_context(|| format!("cannot write report to {}", output))?;

    let summary = spider.summary();
    info!("Crawl completed in {:?}", start.elapsed());
    info!(
        "Checked {} unique URLs, {} broken",
        summary.pages, summary.broken
    );

    Ok(())
}
