//! Sitemap and robots.txt generation.
//!
//! The sitemap lists the home page, the about page (if there is one), and
//! every post:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
//!   <url>
//!     <loc>https://example.com/hello</loc>
//!     <lastmod>2024-01-01T00:00:00+00:00</lastmod>
//!     <changefreq>daily</changefreq>
//!     <priority>0.7</priority>
//!   </url>
//! </urlset>
//! ```

use crate::posts::PostSummary;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::borrow::Cow;
use std::fmt;

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFrequency {
    Daily,
    Monthly,
}

impl fmt::Display for ChangeFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub url: String,
    pub last_modified: NaiveDateTime,
    pub change_frequency: ChangeFrequency,
    pub priority: f32,
}

/// Collect the sitemap entries for a site. `now` stands in as the
/// modification time for the static pages.
pub fn sitemap_entries(
    base_url: &str,
    posts: &[PostSummary],
    has_about: bool,
    now: DateTime<Utc>,
) -> Vec<SitemapEntry> {
    let base_url = base_url.trim_end_matches('/');
    let now = now.naive_utc();

    let mut entries = vec![SitemapEntry {
        url: base_url.to_string(),
        last_modified: now,
        change_frequency: ChangeFrequency::Daily,
        priority: 1.0,
    }];
    if has_about {
        entries.push(SitemapEntry {
            url: format!("{base_url}/about"),
            last_modified: now,
            change_frequency: ChangeFrequency::Monthly,
            priority: 0.8,
        });
    }

    entries.extend(posts.iter().filter_map(|post| {
        Some(SitemapEntry {
            url: format!("{base_url}/{}", post.id),
            last_modified: post.frontmatter.published()?,
            change_frequency: ChangeFrequency::Daily,
            priority: 0.7,
        })
    }));
    entries
}

pub fn sitemap_xml(entries: &[SitemapEntry]) -> String {
    let mut xml = String::with_capacity(256 + entries.len() * 160);

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<urlset xmlns=\"");
    xml.push_str(SITEMAP_NS);
    xml.push_str("\">\n");

    for entry in entries {
        let lastmod = entry
            .last_modified
            .and_utc()
            .to_rfc3339_opts(SecondsFormat::Secs, false);
        xml.push_str("  <url>\n    <loc>");
        xml.push_str(&escape_xml(&entry.url));
        xml.push_str("</loc>\n    <lastmod>");
        xml.push_str(&lastmod);
        xml.push_str("</lastmod>\n    <changefreq>");
        xml.push_str(&entry.change_frequency.to_string());
        xml.push_str("</changefreq>\n    <priority>");
        xml.push_str(&format!("{:.1}", entry.priority));
        xml.push_str("</priority>\n  </url>\n");
    }

    xml.push_str("</urlset>\n");
    xml
}

/// Allow everything, and point at the sitemap.
pub fn robots_txt(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("User-agent: *\nAllow: /\n\nSitemap: {base_url}/sitemap.xml\n")
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }

    Cow::Owned(
        s.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&apos;"),
    )
}
