//! Link Auditor - a broken link crawler
//!
//! This library crawls a website from a seed URL, follows links up to a
//! configurable depth and reports every discovered URL as reachable or broken.

pub mod spider;
