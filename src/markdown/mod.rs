mod add_ids;
mod code;
mod headings;
mod images;
mod toc;

pub use headings::extract_headings;
pub use images::{
    ImageNode, ImageOptions, RewriteImages, annotate_image_size, is_absolute_url, join_url_path,
    rewrite_image_path,
};

use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html::push_html};
use serde::Serialize;

/// A heading in a post, with the anchor id it's rendered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heading {
    pub level: u8,
    pub id: String,
    pub text: String,
}

/// The HTML for a Markdown document along with its table of contents.
#[derive(Debug)]
pub struct Rendered {
    pub html: String,
    pub headings: Vec<Heading>,
}

pub fn render(source: &str, image_options: &ImageOptions) -> Rendered {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut html = String::new();
    let mut headings = vec![];
    let explicit_ids = explicit_heading_ids(source, options);

    let iter = Parser::new_ext(source, options);
    let iter = add_ids::AddHeadingIds::new(iter)
        .with_reserved(explicit_ids.iter().map(|id| &**id));
    let iter = toc::TableOfContents::new(iter, &mut headings);
    let iter = images::RewriteImages::new(iter, image_options);
    let iter = code::AnnotateCode::new(iter);

    push_html(&mut html, iter);
    Rendered { html, headings }
}

/// The `{#id}`s written on headings anywhere in the document.
fn explicit_heading_ids(source: &str, options: Options) -> Vec<CowStr<'_>> {
    Parser::new_ext(source, options)
        .filter_map(|event| match event {
            Event::Start(Tag::Heading { id: Some(id), .. }) => Some(id),
            _ => None,
        })
        .collect()
}
