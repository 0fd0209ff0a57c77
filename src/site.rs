use crate::config::Config;
use crate::markdown::{self, ImageOptions};
use crate::parallel;
use crate::posts::{PostRepository, PostSummary};
use crate::seo;
use anyhow::{Context as _, Result};
use std::ffi::OsStr;
use std::num::NonZero;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{fs, io};
use walkdir::WalkDir;

crate::assets!(
    TEMPLATES,
    "templates",
    [
        "base.html",
        "index.html",
        "post.html",
        "about.html",
        "not_found.html",
        "style.css",
        "toc.js",
        "theme.js",
        "livereload.js"
    ]
);

/// Assets that are served as-is alongside the rendered pages.
pub const STATIC_ASSETS: &[&str] = &["style.css", "toc.js"];

/// Post ids that would collide with the site's own pages.
const RESERVED_IDS: &[&str] = &["index", "about", "404", "sitemap", "robots"];

fn open_posts(dir: impl Into<PathBuf>, production: bool) -> Result<PostRepository> {
    Ok(PostRepository::open(dir, production)?.without_ids(RESERVED_IDS))
}

pub struct Context {
    pub site_dir: PathBuf,
    pub config: Config,
    pub livereload: bool,
    production: bool,
    posts: PostRepository,
    images: ImageOptions,
    tmpls: minijinja::Environment<'static>,
}

impl Context {
    /// Load the site in `site_dir`. Fails if the configuration is broken or
    /// the posts directory can't be read.
    pub fn new(site_dir: &Path, production: bool, livereload: bool) -> Result<Self> {
        let config = Config::load(site_dir)?;
        let posts = open_posts(site_dir.join(&config.posts_dir), production)?;
        let images = ImageOptions {
            prefix: config.image_prefix.clone(),
            root: Some(site_dir.join(&config.static_dir)),
        };

        let mut ctx = Self {
            site_dir: site_dir.into(),
            config,
            livereload,
            production,
            posts,
            images,
            tmpls: minijinja::Environment::new(),
        };
        ctx.reload_templates()?;
        Ok(ctx)
    }

    /// Re-read all templates. In debug builds this picks up edits on disk.
    pub fn reload_templates(&mut self) -> Result<()> {
        self.tmpls.clear_templates();
        for (name, source) in TEMPLATES.load_all() {
            let source = source.with_context(|| format!("reading template {name}"))?;
            self.tmpls
                .add_template_owned(name, source.into_owned())
                .with_context(|| format!("in template {name}"))?;
        }
        Ok(())
    }

    /// Re-scan the posts directory, e.g. after files were added or removed.
    pub fn reload_posts(&mut self) -> Result<()> {
        self.posts = open_posts(self.posts.dir(), self.production)?;
        Ok(())
    }

    fn about_path(&self) -> PathBuf {
        self.site_dir.join(&self.config.about)
    }

    pub fn has_about(&self) -> bool {
        self.about_path().is_file()
    }

    fn static_dir(&self) -> PathBuf {
        self.site_dir.join(&self.config.static_dir)
    }

    fn site_context(&self) -> minijinja::Value {
        minijinja::context! {
            title => self.config.title,
            description => self.config.description,
            author => self.config.author,
            url => self.config.base_url(),
            has_about => self.has_about(),
            livereload => self.livereload,
        }
    }

    /// Render the home page: every post, newest first.
    pub fn render_index<W: io::Write>(&self, dest: &mut W) -> Result<()> {
        let posts: Vec<_> = self.posts.list_posts().iter().map(post_card).collect();
        let tmpl = self.tmpls.get_template("index.html")?;
        tmpl.render_to_write(
            minijinja::context! {
                site => self.site_context(),
                posts => posts,
            },
            dest,
        )?;
        Ok(())
    }

    /// Render the page for one post. Returns `false` (having written nothing)
    /// if there is no post with this id.
    pub fn render_post<W: io::Write>(&self, id: &str, dest: &mut W) -> Result<bool> {
        let Some(post) = self.posts.get_post(id)? else {
            return Ok(false);
        };
        let rendered = markdown::render(&post.content, &self.images);

        // Indent the table of contents relative to the shallowest heading.
        let min_level = rendered.headings.iter().map(|h| h.level).min().unwrap_or(1);
        let toc: Vec<_> = rendered
            .headings
            .iter()
            .map(|h| {
                minijinja::context! {
                    id => h.id,
                    text => h.text,
                    level => h.level,
                    depth => h.level - min_level,
                }
            })
            .collect();

        let tmpl = self.tmpls.get_template("post.html")?;
        tmpl.render_to_write(
            minijinja::context! {
                site => self.site_context(),
                id => post.id,
                title => post.frontmatter.title,
                date => display_date(&post.frontmatter.date),
                summary => post.frontmatter.summary,
                extra => post.frontmatter.extra,
                body => rendered.html,
                toc => toc,
            },
            dest,
        )?;
        Ok(true)
    }

    /// Render the about page from its Markdown source. Returns `false` if
    /// the site has none.
    pub fn render_about<W: io::Write>(&self, dest: &mut W) -> Result<bool> {
        let path = self.about_path();
        let source = match fs::read_to_string(&path) {
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
            Ok(s) => s,
        };
        let rendered = markdown::render(&source, &self.images);

        let tmpl = self.tmpls.get_template("about.html")?;
        tmpl.render_to_write(
            minijinja::context! {
                site => self.site_context(),
                body => rendered.html,
            },
            dest,
        )?;
        Ok(true)
    }

    pub fn render_not_found<W: io::Write>(&self, dest: &mut W) -> Result<()> {
        let tmpl = self.tmpls.get_template("not_found.html")?;
        tmpl.render_to_write(minijinja::context! { site => self.site_context() }, dest)?;
        Ok(())
    }

    pub fn sitemap(&self) -> String {
        let entries = seo::sitemap_entries(
            self.config.base_url(),
            &self.posts.list_posts(),
            self.has_about(),
            chrono::Utc::now(),
        );
        seo::sitemap_xml(&entries)
    }

    pub fn robots(&self) -> String {
        seo::robots_txt(self.config.base_url())
    }

    /// Render any resource.
    pub fn render_resource<W: io::Write>(&self, rsrc: &Resource, dest: &mut W) -> Result<bool> {
        match rsrc {
            Resource::Index => self.render_index(dest).map(|_| true),
            Resource::Post(id) => self.render_post(id, dest),
            Resource::About => self.render_about(dest),
            Resource::Sitemap => {
                dest.write_all(self.sitemap().as_bytes())?;
                Ok(true)
            }
            Resource::Robots => {
                dest.write_all(self.robots().as_bytes())?;
                Ok(true)
            }
            Resource::Asset(name) => match TEMPLATES.load(name)? {
                Some(contents) => {
                    dest.write_all(contents.as_bytes())?;
                    Ok(true)
                }
                None => Ok(false),
            },
            Resource::Static(path) => {
                let mut file = fs::File::open(path)?;
                io::copy(&mut file, dest)?;
                Ok(true)
            }
        }
    }

    /// Given a URL path, look up the resource it refers to, if one exists.
    pub fn resolve_resource(&self, url_path: &str) -> Option<Resource> {
        let rel_path = sanitize_path(url_path)?;
        let rel = rel_path.to_str()?;

        match rel {
            "" | "index.html" => return Some(Resource::Index),
            "about" | "about.html" if self.has_about() => return Some(Resource::About),
            "sitemap.xml" => return Some(Resource::Sitemap),
            "robots.txt" => return Some(Resource::Robots),
            _ => (),
        }
        if let Some(name) = rel.strip_prefix("_assets/")
            && STATIC_ASSETS.contains(&name)
        {
            return Some(Resource::Asset(name.to_string()));
        }

        // Files in the static directory win over post ids.
        let static_path = self.static_dir().join(&rel_path);
        if static_path.is_file() {
            return Some(Resource::Static(static_path));
        }

        let id = rel.strip_suffix(".html").unwrap_or(rel);
        if self.posts.ids().any(|p| p == id) {
            return Some(Resource::Post(id.to_string()));
        }

        None
    }

    /// Render the whole site into `dest_dir`, replacing whatever is there.
    pub fn render_site(&self, threads: Option<NonZero<usize>>, dest_dir: &Path) -> Result<()> {
        remove_dir_force(dest_dir)?;
        fs::create_dir_all(dest_dir)?;

        self.copy_static(dest_dir)?;

        let assets_dir = dest_dir.join("_assets");
        fs::create_dir_all(&assets_dir)?;
        for name in STATIC_ASSETS {
            let mut out = fs::File::create(assets_dir.join(name))?;
            self.render_resource(&Resource::Asset(name.to_string()), &mut out)?;
        }

        self.render_index(&mut fs::File::create(dest_dir.join("index.html"))?)?;
        if self.has_about() {
            self.render_about(&mut fs::File::create(dest_dir.join("about.html"))?)?;
        }
        self.render_not_found(&mut fs::File::create(dest_dir.join("404.html"))?)?;
        fs::write(dest_dir.join("sitemap.xml"), self.sitemap())?;
        fs::write(dest_dir.join("robots.txt"), self.robots())?;

        // Only the listed posts get pages: anything that fails to parse was
        // already reported while listing.
        let posts = self.posts.list_posts();
        let failures = AtomicUsize::new(0);
        parallel::run_pool(
            threads,
            |id: String| {
                let dest_path = dest_dir.join(format!("{id}.html"));
                if let Err(e) = self.render_post_to_file(&id, &dest_path) {
                    tracing::error!(post = %id, error = %e, "error rendering post");
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            },
            |pool| {
                for post in &posts {
                    pool.send(post.id.clone());
                }
            },
        );

        let failures = failures.into_inner();
        tracing::info!(
            posts = posts.len() - failures,
            failures,
            dest = %dest_dir.display(),
            "site rendered"
        );
        Ok(())
    }

    fn render_post_to_file(&self, id: &str, dest_path: &Path) -> Result<()> {
        let mut buf = vec![];
        if !self.render_post(id, &mut buf)? {
            anyhow::bail!("post disappeared while rendering");
        }
        fs::write(dest_path, buf)?;
        Ok(())
    }

    /// Mirror the static directory into `dest_dir`, if there is one.
    fn copy_static(&self, dest_dir: &Path) -> Result<()> {
        let static_dir = self.static_dir();
        if !static_dir.is_dir() {
            return Ok(());
        }

        let walker = WalkDir::new(&static_dir)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !ignore_filename(e.file_name()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "directory walk error");
                    continue;
                }
            };
            let rel_path = entry
                .path()
                .strip_prefix(&static_dir)
                .expect("walked path is within the static directory");
            let dest_path = dest_dir.join(rel_path);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest_path)?;
            } else if entry.file_type().is_file() {
                hard_link_or_copy(entry.path(), &dest_path)?;
            }
        }
        Ok(())
    }
}

/// Something the site can serve.
#[derive(Debug, PartialEq, Eq)]
pub enum Resource {
    Index,
    Post(String),
    About,
    Sitemap,
    Robots,
    Asset(String),
    Static(PathBuf),
}

/// A post's entry on the home page.
fn post_card(post: &PostSummary) -> minijinja::Value {
    minijinja::context! {
        id => post.id,
        title => post.frontmatter.title,
        date => display_date(&post.frontmatter.date),
        summary => post.frontmatter.summary,
    }
}

/// Format a frontmatter date as `YYYY.MM.DD`, leaving it alone if it doesn't
/// parse.
pub fn display_date(date: &str) -> String {
    match crate::posts::parse_date(date) {
        Some(d) => d.format("%Y.%m.%d").to_string(),
        None => date.to_string(),
    }
}

/// Try to hard-link `from` at `to`, falling back to a copy if the link fails
/// (e.g., the two paths are on different filesystems). This always removes the
/// current file at `to`.
fn hard_link_or_copy(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    match fs::hard_link(from, to) {
        Ok(_) => Ok(()),
        Err(_) => fs::copy(from, to).map(|_| ()),
    }
}

/// Like `std::fs::remove_dir_all`, but silently succeed if the directory already doesn't exist.
fn remove_dir_force(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
        Ok(()) => Ok(()),
    }
}

/// Should we skip a given file? We skip hidden files (prefixed with .) and
/// ones starting with _, which are special.
pub fn ignore_filename(name: &OsStr) -> bool {
    let bytes = name.as_encoded_bytes();
    (bytes != b"." && bytes.starts_with(b".")) || bytes.starts_with(b"_")
}

/// Validate and relative-ize a requested path. If we return a path, it is now
/// safe to `join` with a base directory without "escaping" that directory. May
/// return `None` for any disallowed path.
fn sanitize_path(path: &str) -> Option<PathBuf> {
    let mut path_buf = PathBuf::new();
    for comp in Path::new(path).components() {
        match comp {
            Component::Normal(c) => {
                // `_assets` is ours; other underscore names are private.
                if ignore_filename(c) && c != "_assets" {
                    return None;
                }
                path_buf.push(c);
            }
            Component::ParentDir => return None, // Disallow `..`.
            Component::Prefix(_) => return None, // Disallow `C:`.
            Component::RootDir => (),            // Strip leading `/`.
            Component::CurDir => (),             // Ignore `.`.
        }
    }

    Some(path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageEncoder, codecs::png::PngEncoder};
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let pixels = vec![0u8; (width * height * 3) as usize];
        PngEncoder::new(fs::File::create(path).unwrap())
            .write_image(&pixels, width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
    }

    fn example_site() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "_config.toml",
            "title = \"Test Blog\"\nsite_url = \"https://blog.example.com\"\n",
        );
        write(
            root,
            "posts/first.md",
            "---\ntitle: First\ndate: 2024-01-01\nsummary: The first one\n---\n\
             # Intro\n\n![photo](images/p.png)\n\n## Intro\n",
        );
        write(
            root,
            "posts/second.mdx",
            "---\ntitle: Second & More\ndate: 2024-02-01\n---\nHello.\n",
        );
        write(
            root,
            "posts/wip.draft.md",
            "---\ntitle: WIP\ndate: 2024-03-01\n---\nSoon.\n",
        );
        write(root, "about.md", "# About me\n\nHi.\n");
        write(root, "public/favicon.ico", "icon");
        write_png(&root.join("public/images/p.png"), 6, 4);
        dir
    }

    fn render_to_string(f: impl FnOnce(&mut Vec<u8>) -> Result<bool>) -> Option<String> {
        let mut buf = vec![];
        f(&mut buf).unwrap().then(|| String::from_utf8(buf).unwrap())
    }

    #[test]
    fn absolute() {
        assert_eq!(sanitize_path("/hi.txt"), Some("hi.txt".into()));
    }

    #[test]
    fn with_dir() {
        assert_eq!(sanitize_path("/dir/hi.txt"), Some("dir/hi.txt".into()));
    }

    #[test]
    fn dot_dot() {
        assert_eq!(sanitize_path("/../hi.txt"), None);
    }

    #[test]
    fn hidden_files() {
        assert_eq!(sanitize_path(".env"), None);
        assert_eq!(sanitize_path("foo/_bar/hi.txt"), None);
        assert_eq!(sanitize_path("_assets/toc.js"), Some("_assets/toc.js".into()));
    }

    #[test]
    fn dates() {
        assert_eq!(display_date("2024-03-05"), "2024.03.05");
        assert_eq!(display_date("2024-03-05T23:00:00"), "2024.03.05");
        assert_eq!(display_date("whenever"), "whenever");
    }

    #[test]
    fn resolve() {
        let dir = example_site();
        let ctx = Context::new(dir.path(), true, false).unwrap();
        assert_eq!(ctx.resolve_resource("/"), Some(Resource::Index));
        assert_eq!(ctx.resolve_resource("/about"), Some(Resource::About));
        assert_eq!(ctx.resolve_resource("/sitemap.xml"), Some(Resource::Sitemap));
        assert_eq!(ctx.resolve_resource("/robots.txt"), Some(Resource::Robots));
        assert_eq!(
            ctx.resolve_resource("/first"),
            Some(Resource::Post("first".into()))
        );
        assert_eq!(
            ctx.resolve_resource("/second.html"),
            Some(Resource::Post("second".into()))
        );
        assert_eq!(
            ctx.resolve_resource("/_assets/toc.js"),
            Some(Resource::Asset("toc.js".into()))
        );
        assert_eq!(
            ctx.resolve_resource("/favicon.ico"),
            Some(Resource::Static(dir.path().join("public/favicon.ico")))
        );
        assert_eq!(ctx.resolve_resource("/wip.draft"), None);
        assert_eq!(ctx.resolve_resource("/fir"), None);
        assert_eq!(ctx.resolve_resource("/_config.toml"), None);
    }

    #[test]
    fn post_named_like_a_page() {
        let dir = example_site();
        write(
            dir.path(),
            "posts/index.md",
            "---\ntitle: Sneaky\ndate: 2024-04-01\n---\nHi.\n",
        );
        write(
            dir.path(),
            "posts/about.md",
            "---\ntitle: Also Sneaky\ndate: 2024-04-02\n---\nHi.\n",
        );
        let ctx = Context::new(dir.path(), true, false).unwrap();
        assert_eq!(ctx.resolve_resource("/index.html"), Some(Resource::Index));
        assert_eq!(ctx.resolve_resource("/index"), None);
        assert_eq!(ctx.resolve_resource("/about"), Some(Resource::About));

        let out = tempfile::tempdir().unwrap();
        ctx.render_site(NonZero::new(2), out.path()).unwrap();
        let home = fs::read_to_string(out.path().join("index.html")).unwrap();
        assert!(home.contains("Second &amp; More"));
        assert!(!home.contains("Sneaky"));
        let about = fs::read_to_string(out.path().join("about.html")).unwrap();
        assert!(about.contains("About me"));
    }

    #[test]
    fn toc_script_uses_page_offsets() {
        let script = TEMPLATES.load("toc.js").unwrap().unwrap();
        assert!(script.contains("getBoundingClientRect().top + window.scrollY"));
        assert!(!script.contains("offsetTop"));
    }

    #[test]
    fn missing_posts_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Context::new(dir.path(), true, false).is_err());
    }

    #[test]
    fn index_page() {
        let dir = example_site();
        let ctx = Context::new(dir.path(), true, false).unwrap();
        let html = render_to_string(|b| ctx.render_index(b).map(|_| true)).unwrap();
        let second = html.find("Second &amp; More").unwrap();
        let first = html.find("First").unwrap();
        assert!(second < first, "newest post should come first");
        assert!(html.contains("2024.02.01"));
        assert!(html.contains("The first one"));
        assert!(!html.contains("WIP"));
    }

    #[test]
    fn drafts_outside_production() {
        let dir = example_site();
        let ctx = Context::new(dir.path(), false, false).unwrap();
        let html = render_to_string(|b| ctx.render_index(b).map(|_| true)).unwrap();
        assert!(html.contains("WIP"));
    }

    #[test]
    fn post_page() {
        let dir = example_site();
        let ctx = Context::new(dir.path(), true, false).unwrap();
        let html = render_to_string(|b| ctx.render_post("first", b)).unwrap();
        assert!(html.contains("<h1 id=\"intro\">Intro</h1>"));
        assert!(html.contains("<h2 id=\"intro-1\">Intro</h2>"));
        assert!(html.contains("href=\"#intro-1\""));
        assert!(html.contains(
            "<img src=\"/images/p.png\" alt=\"photo\" width=\"6\" height=\"4\" />"
        ));
        assert!(html.contains("2024.01.01"));
        assert!(html.contains("<meta name=\"description\" content=\"The first one\">"));
    }

    #[test]
    fn description_fallbacks() {
        let dir = example_site();
        let ctx = Context::new(dir.path(), true, false).unwrap();
        let second = render_to_string(|b| ctx.render_post("second", b)).unwrap();
        assert!(!second.contains("name=\"description\""));
        let index = render_to_string(|b| ctx.render_index(b).map(|_| true)).unwrap();
        assert!(!index.contains("name=\"description\""));

        write(
            dir.path(),
            "_config.toml",
            "title = \"Test Blog\"\ndescription = \"Notes on things\"\n",
        );
        let ctx = Context::new(dir.path(), true, false).unwrap();
        let second = render_to_string(|b| ctx.render_post("second", b)).unwrap();
        assert!(second.contains("<meta name=\"description\" content=\"Notes on things\">"));
    }

    #[test]
    fn post_not_found() {
        let dir = example_site();
        let ctx = Context::new(dir.path(), true, false).unwrap();
        assert_eq!(render_to_string(|b| ctx.render_post("nope", b)), None);
    }

    #[test]
    fn about_page() {
        let dir = example_site();
        let ctx = Context::new(dir.path(), true, false).unwrap();
        let html = render_to_string(|b| ctx.render_about(b)).unwrap();
        assert!(html.contains("<h1 id=\"about-me\">About me</h1>"));

        fs::remove_file(dir.path().join("about.md")).unwrap();
        assert!(!ctx.has_about());
        assert_eq!(render_to_string(|b| ctx.render_about(b)), None);
    }

    #[test]
    fn seo_files() {
        let dir = example_site();
        let ctx = Context::new(dir.path(), true, false).unwrap();
        let sitemap = ctx.sitemap();
        assert!(sitemap.contains("<loc>https://blog.example.com/first</loc>"));
        assert!(sitemap.contains("<loc>https://blog.example.com/about</loc>"));
        assert!(!sitemap.contains("wip"));
        assert!(ctx.robots().contains("Sitemap: https://blog.example.com/sitemap.xml"));
    }

    #[test]
    fn whole_site() {
        let dir = example_site();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("site");
        let ctx = Context::new(dir.path(), true, false).unwrap();
        ctx.render_site(NonZero::new(2), &dest).unwrap();

        for file in [
            "index.html",
            "about.html",
            "404.html",
            "first.html",
            "second.html",
            "sitemap.xml",
            "robots.txt",
            "favicon.ico",
            "images/p.png",
            "_assets/style.css",
            "_assets/toc.js",
        ] {
            assert!(dest.join(file).is_file(), "missing {file}");
        }
        assert!(!dest.join("wip.draft.html").exists());
    }
}
