use pulldown_cmark::{Event, Tag, TagEnd};
use std::borrow::Cow;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// How embedded images should be rewritten while rendering.
#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Prefix joined onto every relative image source.
    pub prefix: String,

    /// Directory that relative image sources are resolved against when
    /// measuring their dimensions. No measuring happens without one.
    pub root: Option<PathBuf>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            prefix: "/".into(),
            root: None,
        }
    }
}

/// One image reference in a document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageNode {
    pub src: String,
    pub alt: String,
    pub title: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ImageNode {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Default::default()
        }
    }

    /// Render as an HTML `<img>` element.
    pub fn to_html(&self) -> String {
        let mut html = String::from("<img");
        // Writing to a String can't fail.
        let _ = write!(html, " src=\"{}\"", escape_html(&self.src));
        let _ = write!(html, " alt=\"{}\"", escape_html(&self.alt));
        if !self.title.is_empty() {
            let _ = write!(html, " title=\"{}\"", escape_html(&self.title));
        }
        match (self.width, self.height) {
            (Some(w), Some(h)) => {
                let _ = write!(html, " width=\"{w}\" height=\"{h}\"");
            }
            _ => html.push_str(" loading=\"lazy\""),
        }
        html.push_str(" />");
        html
    }
}

/// Join a relative image source onto `prefix` to get a site-relative path.
/// Absolute URLs are left alone.
pub fn rewrite_image_path(node: &mut ImageNode, prefix: &str) {
    if !is_absolute_url(&node.src) {
        node.src = join_url_path(prefix, &node.src);
    }
}

/// Read a relative image from under `root` and record its pixel dimensions.
/// Failing to find or decode the image is not an error: the node just stays
/// unsized.
pub fn annotate_image_size(node: &mut ImageNode, root: &Path) {
    if is_absolute_url(&node.src) {
        return;
    }
    let path = resolve_image_path(root, &node.src);
    match image::image_dimensions(&path) {
        Ok((width, height)) => {
            node.width = Some(width);
            node.height = Some(height);
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "can't measure image");
        }
    }
}

/// The on-disk location of a relative image source. `..` never climbs above
/// `root`.
fn resolve_image_path(root: &Path, src: &str) -> PathBuf {
    let src = src.split(['?', '#']).next().unwrap_or_default();
    let mut path = root.to_path_buf();
    let mut depth = 0;
    for seg in src.split('/') {
        match seg {
            "" | "." => (),
            ".." if depth > 0 => {
                path.pop();
                depth -= 1;
            }
            ".." => (),
            s => {
                path.push(s);
                depth += 1;
            }
        }
    }
    path
}

/// Join URL path segments, collapsing duplicate slashes and resolving `.`
/// and `..`. The result is absolute if `prefix` is.
pub fn join_url_path(prefix: &str, src: &str) -> String {
    let mut segs: Vec<&str> = vec![];
    for seg in prefix.split('/').chain(src.split('/')) {
        match seg {
            "" | "." => (),
            ".." => {
                segs.pop();
            }
            s => segs.push(s),
        }
    }
    let joined = segs.join("/");
    if prefix.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Check whether a URL is absolute, i.e., starts with a protocol.
pub fn is_absolute_url(url: &str) -> bool {
    if url.starts_with("//") {
        return true;
    }
    match url.find(':') {
        Some(c) => {
            let scheme = &url[..c];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
                && scheme.starts_with(|ch: char| ch.is_ascii_alphabetic())
        }
        None => false,
    }
}

/// Escape text for HTML element content or a double-quoted attribute.
pub(super) fn escape_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(
        s.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;"),
    )
}

/// A pulldown-cmark adapter that rewrites every image: relative sources are
/// measured under `options.root` and then prefixed with `options.prefix`. Each
/// image comes out as a single inline HTML `<img>` event so it can carry
/// `width` and `height`.
pub struct RewriteImages<'a, 'o, I>
where
    I: Iterator<Item = Event<'a>>,
{
    iter: I,
    options: &'o ImageOptions,
}

impl<'a, 'o, I> RewriteImages<'a, 'o, I>
where
    I: Iterator<Item = Event<'a>>,
{
    pub fn new(iter: I, options: &'o ImageOptions) -> Self {
        Self { iter, options }
    }

    /// Assuming we're just inside an image, consume events up to its end and
    /// return the plain text of its description.
    fn consume_alt(&mut self) -> String {
        let mut alt = String::new();
        let mut depth = 0;
        for event in self.iter.by_ref() {
            match event {
                Event::Start(Tag::Image { .. }) => depth += 1,
                Event::End(TagEnd::Image) if depth == 0 => break,
                Event::End(TagEnd::Image) => depth -= 1,
                Event::Text(t) | Event::Code(t) => alt.push_str(&t),
                Event::SoftBreak | Event::HardBreak => alt.push(' '),
                _ => (),
            }
        }
        alt
    }

    fn rewrite(&self, node: &mut ImageNode) {
        // Measure first: the size lookup needs the original relative path.
        if let Some(root) = &self.options.root {
            annotate_image_size(node, root);
        }
        rewrite_image_path(node, &self.options.prefix);
    }
}

impl<'a, 'o, I> Iterator for RewriteImages<'a, 'o, I>
where
    I: Iterator<Item = Event<'a>>,
{
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match self.iter.next()? {
            Event::Start(Tag::Image {
                dest_url, title, ..
            }) => {
                let mut node = ImageNode {
                    src: dest_url.into_string(),
                    title: title.into_string(),
                    ..Default::default()
                };
                node.alt = self.consume_alt();
                self.rewrite(&mut node);
                Event::InlineHtml(node.to_html().into())
            }
            e => e,
        })
    }
}
