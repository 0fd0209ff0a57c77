use super::images::escape_html;
use pulldown_cmark::{CodeBlockKind, Event, Tag, TagEnd};
use std::fmt::Write;

/// Comment openers that may introduce an annotation line, e.g. `// !mark`.
const COMMENT_MARKERS: &[&str] = &["//", "#", "--", "<!--", "/*", ";", "%"];

/// A directive written as a comment inside a fenced code block. Annotation
/// lines are removed from the displayed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Annotation {
    /// `!line-numbers` or `!line-numbers(10)`: number the lines, starting at
    /// the given value (1 by default).
    LineNumbers(usize),
    /// `!mark` or `!mark(3)`: highlight the next line, or the next N.
    Mark(usize),
}

impl Annotation {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let body = COMMENT_MARKERS.iter().find_map(|m| line.strip_prefix(m))?;
        let body = body.trim_end().trim_end_matches("-->").trim_end_matches("*/");
        let body = body.trim().strip_prefix('!')?;

        let (name, query) = match body.split_once('(') {
            Some((name, rest)) => (name, Some(rest.strip_suffix(')')?.trim())),
            None => (body, None),
        };
        let number = query.and_then(|q| q.parse().ok()).unwrap_or(1);
        match name.trim() {
            "line-numbers" => Some(Self::LineNumbers(number)),
            "mark" => Some(Self::Mark(number)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLine {
    pub text: String,
    pub marked: bool,
}

/// A fenced code block, with its info string split into a language and the
/// free-form meta text that follows it (often a file name).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeBlock {
    pub lang: String,
    pub meta: String,
    pub lines: Vec<CodeLine>,
    /// The number of the first line, if lines are numbered.
    pub first_line: Option<usize>,
}

impl CodeBlock {
    pub fn parse(info: &str, code: &str) -> Self {
        let info = info.trim();
        let (lang, meta) = match info.split_once(char::is_whitespace) {
            Some((lang, meta)) => (lang, meta.trim()),
            None => (info, ""),
        };

        let mut block = Self {
            lang: lang.to_string(),
            meta: meta.to_string(),
            ..Default::default()
        };
        let mut to_mark = 0;
        for line in code.lines() {
            match Annotation::parse(line) {
                Some(Annotation::LineNumbers(start)) => block.first_line = Some(start),
                Some(Annotation::Mark(count)) => to_mark = count,
                None => {
                    block.lines.push(CodeLine {
                        text: line.to_string(),
                        marked: to_mark > 0,
                    });
                    to_mark = to_mark.saturating_sub(1);
                }
            }
        }
        block
    }

    /// Plain blocks render exactly like ordinary `<pre><code>`. Numbered or
    /// marked blocks wrap each line in a `span.line`, and a block with meta
    /// text gets a header above it.
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        // Writing to a String can't fail.
        if !self.meta.is_empty() {
            html.push_str("<div class=\"codeblock\">\n");
            let _ = writeln!(
                html,
                "<div class=\"codeblock-meta\">{}</div>",
                escape_html(&self.meta)
            );
        }

        html.push_str("<pre>");
        if self.lang.is_empty() {
            html.push_str("<code>");
        } else {
            let _ = write!(html, "<code class=\"language-{}\">", escape_html(&self.lang));
        }

        let annotated = self.first_line.is_some() || self.lines.iter().any(|l| l.marked);
        let gutter = self
            .first_line
            .map(|first| (first + self.lines.len()).saturating_sub(1).to_string().len() + 2);
        for (i, line) in self.lines.iter().enumerate() {
            if !annotated {
                html.push_str(&escape_html(&line.text));
                html.push('\n');
                continue;
            }
            html.push_str(if line.marked {
                "<span class=\"line marked\">"
            } else {
                "<span class=\"line\">"
            });
            if let (Some(first), Some(width)) = (self.first_line, gutter) {
                let _ = write!(
                    html,
                    "<span class=\"line-number\" style=\"min-width: {width}ch\">{}</span>",
                    first + i
                );
            }
            html.push_str(&escape_html(&line.text));
            html.push_str("</span>\n");
        }
        html.push_str("</code></pre>\n");

        if !self.meta.is_empty() {
            html.push_str("</div>\n");
        }
        html
    }
}

/// A pulldown-cmark adapter that renders fenced code blocks itself, so they
/// can carry a meta header, line numbers and marked lines. Indented code
/// blocks pass through untouched.
pub struct AnnotateCode<I> {
    iter: I,
}

impl<'a, I> AnnotateCode<I>
where
    I: Iterator<Item = Event<'a>>,
{
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<'a, I> Iterator for AnnotateCode<I>
where
    I: Iterator<Item = Event<'a>>,
{
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match self.iter.next()? {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                let mut code = String::new();
                for event in self.iter.by_ref() {
                    match event {
                        Event::End(TagEnd::CodeBlock) => break,
                        Event::Text(t) => code.push_str(&t),
                        _ => (),
                    }
                }
                Event::Html(CodeBlock::parse(&info, &code).to_html().into())
            }
            e => e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pulldown_cmark::{Parser, html};

    fn render_code(source: &str) -> String {
        let mut buf = String::new();
        html::push_html(&mut buf, AnnotateCode::new(Parser::new(source)));
        buf
    }

    fn plain_render(source: &str) -> String {
        let mut buf = String::new();
        html::push_html(&mut buf, Parser::new(source));
        buf
    }

    #[test]
    fn annotations() {
        assert_eq!(Annotation::parse("// !mark"), Some(Annotation::Mark(1)));
        assert_eq!(Annotation::parse("  # !mark(3)"), Some(Annotation::Mark(3)));
        assert_eq!(
            Annotation::parse("<!-- !line-numbers(10) -->"),
            Some(Annotation::LineNumbers(10))
        );
        assert_eq!(
            Annotation::parse("/* !line-numbers */"),
            Some(Annotation::LineNumbers(1))
        );
        assert_eq!(Annotation::parse("#!/bin/sh"), None);
        assert_eq!(Annotation::parse("// !unknown"), None);
        assert_eq!(Annotation::parse("let x = 1; // !mark"), None);
    }

    #[test]
    fn info_string() {
        let block = CodeBlock::parse("rust  src/main.rs ", "fn main() {}\n");
        assert_eq!(block.lang, "rust");
        assert_eq!(block.meta, "src/main.rs");

        let bare = CodeBlock::parse("", "x\n");
        assert_eq!(bare.lang, "");
        assert_eq!(bare.meta, "");
    }

    #[test]
    fn plain_block_unchanged() {
        let source = "```rust\nfn main() {}\nlet a = b < c;\n```\n";
        assert_eq!(render_code(source), plain_render(source));
        let source = "```\nno language\n```\n";
        assert_eq!(render_code(source), plain_render(source));
    }

    #[test]
    fn indented_block_untouched() {
        let source = "    // !mark\n    indented\n";
        assert_eq!(render_code(source), plain_render(source));
    }

    #[test]
    fn meta_header() {
        assert_eq!(
            render_code("```js hello.js\nhi();\n```\n"),
            "<div class=\"codeblock\">\n\
             <div class=\"codeblock-meta\">hello.js</div>\n\
             <pre><code class=\"language-js\">hi();\n</code></pre>\n\
             </div>\n"
        );
    }

    #[test]
    fn marked_lines() {
        let block = CodeBlock::parse("py", "a = 1\n# !mark(2)\nb = 2\nc = 3\nd = 4\n");
        let marked: Vec<_> = block.lines.iter().map(|l| (l.text.as_str(), l.marked)).collect();
        assert_eq!(
            marked,
            [("a = 1", false), ("b = 2", true), ("c = 3", true), ("d = 4", false)]
        );
        assert_eq!(
            block.to_html(),
            "<pre><code class=\"language-py\">\
             <span class=\"line\">a = 1</span>\n\
             <span class=\"line marked\">b = 2</span>\n\
             <span class=\"line marked\">c = 3</span>\n\
             <span class=\"line\">d = 4</span>\n\
             </code></pre>\n"
        );
    }

    #[test]
    fn line_numbers() {
        let block = CodeBlock::parse("rust", "// !line-numbers(9)\nlet a = 1;\nlet b = 2;\n");
        assert_eq!(block.first_line, Some(9));
        assert_eq!(
            block.to_html(),
            "<pre><code class=\"language-rust\">\
             <span class=\"line\"><span class=\"line-number\" style=\"min-width: 4ch\">9</span>let a = 1;</span>\n\
             <span class=\"line\"><span class=\"line-number\" style=\"min-width: 4ch\">10</span>let b = 2;</span>\n\
             </code></pre>\n"
        );
    }

    #[test]
    fn escapes() {
        let block = CodeBlock::parse("html <b>", "<p>&</p>\n");
        let html = block.to_html();
        assert!(html.contains("<div class=\"codeblock-meta\">&lt;b&gt;</div>"));
        assert!(html.contains("&lt;p&gt;&amp;&lt;/p&gt;\n"));
    }
}
