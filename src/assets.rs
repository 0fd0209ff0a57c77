use std::borrow::Cow;
use std::fs;
use std::path::Path;

/// A named set of files from one directory in the source tree. In release
/// builds the contents are compiled into the binary; in debug builds they
/// are read from disk every time, so templates can be edited live.
pub struct Assets {
    /// The directory path for this set of assets.
    pub dir: &'static str,

    /// Names and, when embedded, contents.
    files: &'static [(&'static str, Option<&'static str>)],
}

impl Assets {
    pub const fn new(
        dir: &'static str,
        files: &'static [(&'static str, Option<&'static str>)],
    ) -> Self {
        Self { dir, files }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        self.files.iter().map(|(n, _)| *n)
    }

    /// Get an asset's contents, from the binary if embedded or else from
    /// disk. Returns `Ok(None)` for a name that isn't in this set.
    pub fn load(&self, name: &str) -> std::io::Result<Option<Cow<'static, str>>> {
        match self.files.iter().find(|(n, _)| *n == name) {
            None => Ok(None),
            Some((_, Some(embedded))) => Ok(Some(Cow::Borrowed(*embedded))),
            Some((n, None)) => fs::read_to_string(Path::new(self.dir).join(n))
                .map(|s| Some(Cow::Owned(s))),
        }
    }

    /// Load every asset, returning their name and contents.
    pub fn load_all(
        &self,
    ) -> impl Iterator<Item = (&'static str, std::io::Result<Cow<'static, str>>)> + '_ {
        self.names().map(|name| {
            let contents = self
                .load(name)
                .and_then(|c| c.ok_or_else(|| std::io::ErrorKind::NotFound.into()));
            (name, contents)
        })
    }
}

/// Expands to the contents of a file in release builds and to `None` in
/// debug builds.
#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! embed_file {
    ($($path:tt)*) => {
        Some(include_str!($($path)*))
    };
}

#[cfg(debug_assertions)]
#[macro_export]
macro_rules! embed_file {
    ($($path:tt)*) => {
        None
    };
}

/// Declare a set of asset files from a directory next to `Cargo.toml`.
#[macro_export]
macro_rules! assets {
    ($constname:ident, $dirname:literal, [ $($filename:literal),* $(,)? ]) => {
        pub const $constname: $crate::assets::Assets = $crate::assets::Assets::new(
            concat!(env!("CARGO_MANIFEST_DIR"), "/", $dirname),
            &[$(
                (
                    $filename,
                    $crate::embed_file!(concat!(env!("CARGO_MANIFEST_DIR"), "/", $dirname, "/", $filename)),
                ),
            )*],
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::assets!(TEST_TEMPLATES, "templates", ["base.html", "toc.js"]);

    #[test]
    fn names() {
        let names: Vec<_> = TEST_TEMPLATES.names().collect();
        assert_eq!(names, ["base.html", "toc.js"]);
    }

    #[test]
    fn load() {
        let base = TEST_TEMPLATES.load("base.html").unwrap().unwrap();
        assert!(base.contains("<html"));
        assert!(TEST_TEMPLATES.load("nope.js").unwrap().is_none());
    }

    #[test]
    fn load_all() {
        assert!(TEST_TEMPLATES.load_all().all(|(_, c)| c.is_ok()));
    }
}
