//! A small generator for a Markdown blog: posts with YAML frontmatter in,
//! styled HTML pages with heading anchors, a table of contents, sized
//! images, a sitemap and robots.txt out.

pub mod assets;
pub mod config;
pub mod markdown;
pub mod parallel;
pub mod posts;
pub mod seo;
pub mod serve;
pub mod site;
pub mod slug;
pub mod toc_tracker;
pub mod watch;
