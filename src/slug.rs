use std::collections::HashMap;

/// Fallback id for text that contains nothing slug-worthy.
const EMPTY_SLUG: &str = "section";

/// Slugify a string and append it to a buffer. Runs of anything that isn't
/// alphanumeric become a single dash.
fn slug_append(buf: &mut String, s: &str) {
    let mut last_is_dash = buf.ends_with('-');
    for c in s.chars() {
        if c.is_alphanumeric() {
            last_is_dash = false;
            buf.extend(c.to_lowercase());
        } else if !last_is_dash {
            last_is_dash = true;
            buf.push('-');
        }
    }
}

/// Turn arbitrary text into a lowercase, URL-safe anchor. Never returns an
/// empty string.
pub fn slugify(text: &str) -> String {
    let mut buf = String::new();
    slug_append(&mut buf, text);
    let trimmed = buf.trim_matches('-');
    if trimmed.is_empty() {
        EMPTY_SLUG.to_string()
    } else if trimmed.len() == buf.len() {
        buf
    } else {
        trimmed.to_string()
    }
}

/// Hands out heading anchors for one document, making sure no two are the
/// same. Repeats of `foo` come back as `foo-1`, `foo-2`, and so on.
#[derive(Debug, Default)]
pub struct SlugRegistry {
    issued: HashMap<String, usize>,
}

impl SlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slugify `text` and return an id that this registry has not issued
    /// before.
    pub fn slug(&mut self, text: &str) -> String {
        let base = slugify(text);
        let Some(&count) = self.issued.get(&base) else {
            self.issued.insert(base.clone(), 0);
            return base;
        };

        // A suffixed candidate may already be taken by a heading that was
        // literally named e.g. `foo-1`, so keep counting until one is free.
        let mut n = count;
        let candidate = loop {
            n += 1;
            let candidate = format!("{base}-{n}");
            if !self.issued.contains_key(&candidate) {
                break candidate;
            }
        };
        self.issued.insert(base, n);
        self.issued.insert(candidate.clone(), 0);
        candidate
    }

    /// Mark an id as taken without slugifying it, e.g. one the author wrote
    /// explicitly with `{#id}`.
    pub fn reserve(&mut self, id: &str) {
        self.issued.entry(id.to_string()).or_insert(0);
    }
}
