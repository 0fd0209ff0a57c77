//! Scroll-position tracking for the table of contents.
//!
//! The browser side of this lives in `templates/toc.js`; this is the same
//! state machine, kept here so the selection rule has one precise definition
//! with tests. Heading offsets are reported in whatever order the page
//! measures them, so every update goes through [`TocTracker::record`], which
//! keeps the list sorted.

/// How far below the top of the viewport a heading counts as "reached".
pub const DEFAULT_LOOKAHEAD: f64 = 400.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TocEntry {
    pub id: String,
    pub top: f64,
}

#[derive(Debug, Clone)]
pub struct TocTracker {
    lookahead: f64,
    entries: Vec<TocEntry>,
    active: Option<String>,
}

impl Default for TocTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKAHEAD)
    }
}

impl TocTracker {
    pub fn new(lookahead: f64) -> Self {
        Self {
            lookahead,
            entries: vec![],
            active: None,
        }
    }

    /// Record (or update) the vertical offset of a heading.
    pub fn record(&mut self, id: &str, top: f64) {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => entry.top = top,
            None => self.entries.push(TocEntry {
                id: id.to_string(),
                top,
            }),
        }
        self.entries.sort_by(|a, b| a.top.total_cmp(&b.top));
    }

    /// Record a batch of measurements, e.g. the initial pass over every
    /// heading on page load.
    pub fn measure_all<'s>(&mut self, offsets: impl IntoIterator<Item = (&'s str, f64)>) {
        for (id, top) in offsets {
            self.record(id, top);
        }
    }

    /// Which heading is active at this scroll position: the last one whose
    /// offset is above `scroll_y + lookahead`.
    pub fn active_for(&self, scroll_y: f64) -> Option<&str> {
        let target = scroll_y + self.lookahead;
        self.entries
            .iter()
            .rev()
            .find(|e| e.top < target)
            .map(|e| e.id.as_str())
    }

    /// Handle a scroll (or layout) event, updating the active heading.
    pub fn on_scroll(&mut self, scroll_y: f64) -> Option<&str> {
        let next = self.active_for(scroll_y).map(str::to_string);
        if next != self.active {
            tracing::trace!(active = ?next, scroll_y, "active heading changed");
            self.active = next;
        }
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }
}
