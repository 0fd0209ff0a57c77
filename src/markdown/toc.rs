use super::Heading;
use pulldown_cmark::{Event, Tag, TagEnd};

/// A pulldown-cmark adapter that extracts a table of contents from a Markdown
/// document, i.e., a list of all the headings. When this iterator runs, it
/// pushes the headings into a vector that you supply.
///
/// Run this after `AddHeadingIds` so every heading has an id. A heading that
/// still has none gets an empty one.
pub struct TableOfContents<'a, 'b, I>
where
    I: Iterator<Item = Event<'a>>,
{
    iter: I,
    pub entries: &'b mut Vec<Heading>,
    in_heading: bool,
}

impl<'a, 'b, I> TableOfContents<'a, 'b, I>
where
    I: Iterator<Item = Event<'a>>,
{
    pub fn new(iter: I, entries: &'b mut Vec<Heading>) -> Self {
        Self {
            iter,
            entries,
            in_heading: false,
        }
    }
}

impl<'a, 'b, I> Iterator for TableOfContents<'a, 'b, I>
where
    I: Iterator<Item = Event<'a>>,
{
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.iter.next()?;
        match &event {
            Event::Start(Tag::Heading { level, id, .. }) => {
                self.entries.push(Heading {
                    level: *level as u8,
                    id: id.as_ref().map(|s| s.to_string()).unwrap_or_default(),
                    text: String::new(),
                });
                self.in_heading = true;
            }
            Event::End(TagEnd::Heading(_)) => {
                self.in_heading = false;
                if let Some(entry) = self.entries.last_mut() {
                    let trimmed = entry.text.trim();
                    if trimmed.len() != entry.text.len() {
                        entry.text = trimmed.to_string();
                    }
                }
            }
            Event::Text(text) | Event::Code(text) if self.in_heading => {
                if let Some(entry) = self.entries.last_mut() {
                    entry.text += text;
                }
            }
            Event::SoftBreak | Event::HardBreak if self.in_heading => {
                if let Some(entry) = self.entries.last_mut() {
                    entry.text.push(' ');
                }
            }
            _ => (),
        }
        Some(event)
    }
}
