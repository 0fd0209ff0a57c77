//! Reading posts from the content directory.
//!
//! Each post is one `.md` or `.mdx` file with a YAML frontmatter block; its
//! file name minus the extension is its public id. Files named like
//! `idea.draft.md` are drafts and are hidden in production.

use crate::markdown::{Heading, extract_headings};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const EXTENSIONS: &[&str] = &["md", "mdx"];
const DRAFT_MARKER: &str = ".draft";

#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("can't read content directory {path}: {source}")]
    MissingDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("can't read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad frontmatter in {path}: {source}")]
    Frontmatter {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("bad date {value:?} in {path}")]
    Date { path: PathBuf, value: String },
}

/// The YAML header of a post. Keys other than the known ones are kept in
/// `extra` so templates can still get at them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    pub title: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Frontmatter {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// The publication date, if `date` is something we understand.
    pub fn published(&self) -> Option<NaiveDateTime> {
        parse_date(&self.date)
    }
}

/// Parse the ISO-8601 forms people actually write in frontmatter: a bare
/// date, a local date-time, or an RFC 3339 timestamp (converted to UTC).
pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// A post as shown in listings: just its id and frontmatter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostSummary {
    pub id: String,
    #[serde(flatten)]
    pub frontmatter: Frontmatter,
}

/// A complete post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub id: String,
    pub frontmatter: Frontmatter,
    pub headings: Vec<Heading>,
    pub content: String,
}

/// Split a source file into its YAML frontmatter (if any) and body.
pub fn split_frontmatter(source: &str) -> (Option<&str>, &str) {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let Some(rest) = strip_line(source, "---") else {
        return (None, source);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }

    // No closing delimiter: this isn't frontmatter after all.
    (None, source)
}

/// If the first line of `s` is exactly `line`, return what follows it.
fn strip_line<'a>(s: &'a str, line: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(line)?;
    let rest = rest.trim_start_matches([' ', '\t']);
    if let Some(r) = rest.strip_prefix("\r\n") {
        Some(r)
    } else {
        rest.strip_prefix('\n')
    }
}

/// If this is a post filename, return its id. Otherwise, return None.
pub fn post_id(name: &str) -> Option<&str> {
    if name.starts_with('.') || name.starts_with('_') {
        return None;
    }
    let (base, ext) = name.rsplit_once('.')?;
    if base.is_empty() || !EXTENSIONS.contains(&ext) {
        return None;
    }
    Some(base)
}

/// Does this post filename carry the draft marker right before its
/// extension?
pub fn is_draft(name: &str) -> bool {
    post_id(name).is_some_and(|id| id.ends_with(DRAFT_MARKER))
}

/// The set of posts in one content directory.
#[derive(Debug)]
pub struct PostRepository {
    dir: PathBuf,
    files: Vec<String>,
}

impl PostRepository {
    /// Enumerate the posts in `dir`. In `production` mode, drafts are left
    /// out. The directory must exist.
    pub fn open(dir: impl Into<PathBuf>, production: bool) -> Result<Self, PostError> {
        let dir = dir.into();
        let missing = |source| PostError::MissingDirectory {
            path: dir.clone(),
            source,
        };

        let mut files = vec![];
        for entry in fs::read_dir(&dir).map_err(missing)? {
            let entry = entry.map_err(missing)?;
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(name = ?entry.file_name(), "skipping non-UTF-8 filename");
                continue;
            };
            if post_id(&name).is_none() || !entry.path().is_file() {
                continue;
            }
            if production && is_draft(&name) {
                tracing::debug!(name = %name, "skipping draft");
                continue;
            }
            files.push(name);
        }

        // Directory order varies by platform, so fix one.
        files.sort();
        tracing::debug!(dir = %dir.display(), count = files.len(), "found posts");
        Ok(Self { dir, files })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop posts whose ids are in `reserved`, e.g. names the site already
    /// uses for its own pages.
    pub fn without_ids(mut self, reserved: &[&str]) -> Self {
        self.files.retain(|name| match post_id(name) {
            Some(id) if reserved.contains(&id) => {
                tracing::warn!(name = %name, "skipping post with a reserved id");
                false
            }
            _ => true,
        });
        self
    }

    /// All the post ids, in filename order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.files.iter().filter_map(|f| post_id(f))
    }

    /// List every post's frontmatter, newest first. Posts that can't be read
    /// or parsed are skipped with a warning.
    pub fn list_posts(&self) -> Vec<PostSummary> {
        let mut posts: Vec<(NaiveDateTime, PostSummary)> = self
            .files
            .iter()
            .filter_map(|name| {
                let id = post_id(name)?;
                match self.read_frontmatter(name) {
                    Ok((frontmatter, date)) => Some((
                        date,
                        PostSummary {
                            id: id.to_string(),
                            frontmatter,
                        },
                    )),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping post");
                        None
                    }
                }
            })
            .collect();

        // A stable sort, so posts on the same date stay in filename order.
        posts.sort_by(|(a, _), (b, _)| b.cmp(a));
        posts.into_iter().map(|(_, p)| p).collect()
    }

    /// Look up one post by its exact id (`hello` matches `hello.md` or
    /// `hello.mdx`). Returns `Ok(None)` if there is no such post.
    pub fn get_post(&self, id: &str) -> Result<Option<Post>, PostError> {
        let Some(name) = self.files.iter().find(|f| post_id(f) == Some(id)) else {
            return Ok(None);
        };

        let path = self.dir.join(name);
        let source = read(&path)?;
        let (yaml, body) = split_frontmatter(&source);
        let frontmatter = parse_frontmatter(&path, yaml.unwrap_or_default())?;
        check_date(&path, &frontmatter)?;

        Ok(Some(Post {
            id: id.to_string(),
            headings: extract_headings(body),
            content: body.to_string(),
            frontmatter,
        }))
    }

    fn read_frontmatter(&self, name: &str) -> Result<(Frontmatter, NaiveDateTime), PostError> {
        let path = self.dir.join(name);
        let source = read(&path)?;
        let (yaml, _) = split_frontmatter(&source);
        let frontmatter = parse_frontmatter(&path, yaml.unwrap_or_default())?;
        let date = check_date(&path, &frontmatter)?;
        Ok((frontmatter, date))
    }
}

fn read(path: &Path) -> Result<String, PostError> {
    fs::read_to_string(path).map_err(|source| PostError::Io {
        path: path.into(),
        source,
    })
}

fn parse_frontmatter(path: &Path, yaml: &str) -> Result<Frontmatter, PostError> {
    Frontmatter::from_yaml(yaml).map_err(|source| PostError::Frontmatter {
        path: path.into(),
        source,
    })
}

fn check_date(path: &Path, frontmatter: &Frontmatter) -> Result<NaiveDateTime, PostError> {
    frontmatter.published().ok_or_else(|| PostError::Date {
        path: path.into(),
        value: frontmatter.date.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn post_source(title: &str, date: &str) -> String {
        format!("---\ntitle: {title}\ndate: {date}\n---\n\n# {title}\n\nBody text.\n")
    }

    fn site(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).unwrap();
        }
        dir
    }

    fn listed_ids(repo: &PostRepository) -> Vec<String> {
        repo.list_posts().into_iter().map(|p| p.id).collect()
    }

    #[test]
    fn split_simple() {
        let (yaml, body) = split_frontmatter("---\ntitle: x\n---\nbody\n");
        assert_eq!(yaml, Some("title: x\n"));
        assert_eq!(body, "body\n");
    }

    #[test]
    fn split_none() {
        assert_eq!(split_frontmatter("# hi\n"), (None, "# hi\n"));
    }

    #[test]
    fn split_unclosed() {
        let source = "---\ntitle: x\nbody";
        assert_eq!(split_frontmatter(source), (None, source));
    }

    #[test]
    fn split_crlf() {
        let (yaml, body) = split_frontmatter("---\r\ntitle: x\r\n---\r\nbody");
        assert_eq!(yaml, Some("title: x\r\n"));
        assert_eq!(body, "body");
    }

    #[test]
    fn split_empty_block() {
        assert_eq!(split_frontmatter("---\n---\nbody"), (Some(""), "body"));
    }

    #[test]
    fn frontmatter_extra_keys() {
        let fm = Frontmatter::from_yaml(
            "title: Hi\ndate: 2024-01-01\nsummary: short\ntags: [a, b]\ncover: x.png\n",
        )
        .unwrap();
        assert_eq!(fm.title, "Hi");
        assert_eq!(fm.date, "2024-01-01");
        assert_eq!(fm.summary.as_deref(), Some("short"));
        assert_eq!(fm.extra.len(), 2);
        assert_eq!(fm.extra["cover"], serde_yaml::Value::from("x.png"));
    }

    #[test]
    fn frontmatter_missing_title() {
        assert!(Frontmatter::from_yaml("date: 2024-01-01").is_err());
    }

    #[test]
    fn dates() {
        let midnight = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_date("2024-03-01"), Some(midnight));
        assert_eq!(parse_date("2024-03-01T00:00:00"), Some(midnight));
        assert_eq!(parse_date("2024-03-01T09:00:00+09:00"), Some(midnight));
        assert_eq!(parse_date("2024-03-01T00:00:00.000Z"), Some(midnight));
        assert_eq!(parse_date("March 1st"), None);
    }

    #[test]
    fn ids() {
        assert_eq!(post_id("hello.md"), Some("hello"));
        assert_eq!(post_id("hello.mdx"), Some("hello"));
        assert_eq!(post_id("a.draft.mdx"), Some("a.draft"));
        assert_eq!(post_id("notes.txt"), None);
        assert_eq!(post_id(".hidden.md"), None);
        assert_eq!(post_id("_partial.md"), None);
        assert_eq!(post_id("md"), None);
    }

    #[test]
    fn drafts() {
        assert!(is_draft("draft-post.draft.mdx"));
        assert!(is_draft("x.draft.md"));
        assert!(!is_draft("draft-post.mdx"));
        assert!(!is_draft("x.drafty.md"));
        assert!(!is_draft("x.draft.txt"));
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = PostRepository::open(dir.path().join("nope"), true).unwrap_err();
        assert!(matches!(err, PostError::MissingDirectory { .. }));
    }

    #[test]
    fn list_newest_first() {
        let dir = site(&[
            ("jan.md", &post_source("Jan", "2024-01-01")),
            ("mar.md", &post_source("Mar", "2024-03-01")),
            ("feb.mdx", &post_source("Feb", "2024-02-01")),
        ]);
        let repo = PostRepository::open(dir.path(), true).unwrap();
        let dates: Vec<_> = repo
            .list_posts()
            .into_iter()
            .map(|p| p.frontmatter.date)
            .collect();
        assert_eq!(dates, ["2024-03-01", "2024-02-01", "2024-01-01"]);
    }

    #[test]
    fn list_ties_in_filename_order() {
        let dir = site(&[
            ("b.md", &post_source("B", "2024-01-01")),
            ("c.md", &post_source("C", "2024-01-01")),
            ("a.md", &post_source("A", "2024-01-01")),
            ("z.md", &post_source("Z", "2023-01-01")),
        ]);
        let repo = PostRepository::open(dir.path(), true).unwrap();
        assert_eq!(listed_ids(&repo), ["a", "b", "c", "z"]);
    }

    #[test]
    fn list_drafts() {
        let dir = site(&[
            ("post.md", &post_source("Post", "2024-01-01")),
            ("draft-post.draft.mdx", &post_source("Draft", "2024-02-01")),
        ]);

        let prod = PostRepository::open(dir.path(), true).unwrap();
        assert_eq!(listed_ids(&prod), ["post"]);
        assert_eq!(prod.get_post("draft-post.draft").unwrap(), None);

        let dev = PostRepository::open(dir.path(), false).unwrap();
        assert_eq!(listed_ids(&dev), ["draft-post.draft", "post"]);
    }

    #[test]
    fn reserved_ids() {
        let dir = site(&[
            ("index.md", &post_source("Index", "2024-01-01")),
            ("other.md", &post_source("Other", "2024-01-02")),
            ("index-card.md", &post_source("Card", "2024-01-03")),
        ]);
        let repo = PostRepository::open(dir.path(), true)
            .unwrap()
            .without_ids(&["index", "404"]);
        assert_eq!(listed_ids(&repo), ["index-card", "other"]);
        assert_eq!(repo.get_post("index").unwrap(), None);
    }

    #[test]
    fn list_skips_bad_posts() {
        let dir = site(&[
            ("good.md", &post_source("Good", "2024-01-01")),
            ("broken.md", "---\ntitle: [oops\n---\n"),
            ("no-title.md", "---\ndate: 2024-01-01\n---\n"),
            ("bad-date.md", &post_source("Bad", "someday")),
            ("plain.md", "# just markdown\n"),
            ("notes.txt", "not a post"),
        ]);
        let repo = PostRepository::open(dir.path(), true).unwrap();
        assert_eq!(listed_ids(&repo), ["good"]);
    }

    #[test]
    fn get_post() {
        let dir = site(&[(
            "hello.mdx",
            "---\ntitle: Hello\ndate: 2024-05-05\nsummary: Hi there\n---\n# One\n## Two\n# One\n",
        )]);
        let repo = PostRepository::open(dir.path(), true).unwrap();
        let post = repo.get_post("hello").unwrap().unwrap();
        assert_eq!(post.id, "hello");
        assert_eq!(post.frontmatter.title, "Hello");
        assert_eq!(post.frontmatter.summary.as_deref(), Some("Hi there"));
        assert_eq!(post.content, "# One\n## Two\n# One\n");
        let ids: Vec<_> = post.headings.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["one", "two", "one-1"]);
    }

    #[test]
    fn get_post_not_found() {
        let dir = site(&[("hello.md", &post_source("Hello", "2024-01-01"))]);
        let repo = PostRepository::open(dir.path(), true).unwrap();
        assert_eq!(repo.get_post("nonexistent").unwrap(), None);
    }

    #[test]
    fn get_post_is_exact() {
        let dir = site(&[
            ("hello-world.md", &post_source("Hello", "2024-01-01")),
            ("notes.md.bak", "x"),
        ]);
        let repo = PostRepository::open(dir.path(), true).unwrap();
        assert_eq!(repo.get_post("hello").unwrap(), None);
        assert_eq!(repo.get_post("world").unwrap(), None);
        assert_eq!(repo.get_post("hello-world.md").unwrap(), None);
        assert_eq!(repo.get_post("notes").unwrap(), None);
        assert!(repo.get_post("hello-world").unwrap().is_some());
    }

    #[test]
    fn get_post_bad_frontmatter() {
        let dir = site(&[("broken.md", "---\ntitle: [oops\n---\n")]);
        let repo = PostRepository::open(dir.path(), true).unwrap();
        assert!(matches!(
            repo.get_post("broken"),
            Err(PostError::Frontmatter { .. })
        ));
    }
}
