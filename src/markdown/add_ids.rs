use crate::slug::SlugRegistry;
use pulldown_cmark::{CowStr, Event, Tag, TagEnd};
use std::collections::VecDeque;

/// A pulldown-cmark adapter that adds IDs to headings that don't already have
/// them by "slugifying" the heading's text. IDs are unique within the
/// document: a repeated heading gets a numeric suffix.
pub struct AddHeadingIds<'a, I>
where
    I: Iterator<Item = Event<'a>>,
{
    iter: I,
    buffer: VecDeque<Event<'a>>,
    slugs: SlugRegistry,
}

impl<'a, I> AddHeadingIds<'a, I>
where
    I: Iterator<Item = Event<'a>>,
{
    pub fn new(iter: I) -> Self {
        Self {
            iter,
            buffer: VecDeque::new(),
            slugs: SlugRegistry::new(),
        }
    }

    /// Treat `ids` as taken before any heading is seen, so a generated slug
    /// never lands on an id the author wrote further down the document.
    pub fn with_reserved<'s>(mut self, ids: impl IntoIterator<Item = &'s str>) -> Self {
        for id in ids {
            self.slugs.reserve(id);
        }
        self
    }

    /// Assuming that `self` is now just after the beginning of a header, buffer
    /// up all the events until the header in `self.buffer`. Return the
    /// header's plain text contents.
    fn consume_heading(&mut self) -> String {
        assert!(self.buffer.is_empty(), "nested headings are not allowed");
        let mut text = String::new();

        // This is crying out for a `take_until` iterator method; `take_while`
        // doesn't quite cut it.
        for future_event in self.iter.by_ref() {
            let is_end = match &future_event {
                Event::End(TagEnd::Heading(_)) => true,
                Event::Text(t) | Event::Code(t) => {
                    text.push_str(t);
                    false
                }
                Event::SoftBreak | Event::HardBreak => {
                    text.push(' ');
                    false
                }
                _ => false,
            };
            self.buffer.push_back(future_event);
            if is_end {
                break;
            }
        }

        text
    }
}

impl<'a, I> Iterator for AddHeadingIds<'a, I>
where
    I: Iterator<Item = Event<'a>>,
{
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        // Unbuffer the next buffered event, if any.
        if let Some(event) = self.buffer.pop_front() {
            return Some(event);
        }

        let event = self.iter.next()?;
        match event {
            Event::Start(Tag::Heading {
                level,
                id: None,
                classes,
                attrs,
            }) => {
                // It's a heading without an ID. We do our thing.
                let text = self.consume_heading();
                let slug = self.slugs.slug(text.trim());
                Some(Event::Start(Tag::Heading {
                    level,
                    id: Some(CowStr::from(slug)),
                    classes,
                    attrs,
                }))
            }
            Event::Start(Tag::Heading { id: Some(ref id), .. }) => {
                self.slugs.reserve(id);
                Some(event)
            }
            _ => Some(event),
        }
    }
}
