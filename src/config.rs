use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Site settings from `_config.toml` in the site directory. Every key is
/// optional. Paths are relative to the site directory.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    /// Public base URL, used for the sitemap and robots.txt.
    pub site_url: String,
    pub posts_dir: String,
    /// Served at the site root; relative image paths are measured here.
    pub static_dir: String,
    /// Joined onto relative image paths in posts.
    pub image_prefix: String,
    /// Markdown source for the about page.
    pub about: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "Blog".into(),
            description: None,
            author: None,
            site_url: "http://localhost:3000".into(),
            posts_dir: "posts".into(),
            static_dir: "public".into(),
            image_prefix: "/".into(),
            about: "about.md".into(),
        }
    }
}

impl Config {
    pub fn load(site_dir: &Path) -> Result<Self> {
        let path = site_dir.join("_config.toml");
        match fs::read_to_string(&path) {
            // Silently proceed if the file isn't found, but crash on other errors.
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
            Ok(s) => Self::parse(&s).with_context(|| format!("in {}", path.display())),
        }
    }

    pub fn parse(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// The base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }
}
