use crate::site::ignore_filename;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;

/// Watches the site's files and broadcasts an event whenever they change.
pub struct Watch {
    _watcher: RecommendedWatcher,
    channel: broadcast::Sender<Event>,
}

// An enum for possible future extensibility (only reloading one page instead
// of all of them).
#[derive(Debug, Clone)]
pub enum Event {
    Reload,
}

impl Watch {
    pub fn new(paths: &[&Path]) -> notify::Result<Self> {
        let (tx, _) = broadcast::channel(16);
        let channel = tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) if is_interesting(&event) => {
                    tracing::debug!(paths = ?event.paths, "change detected");
                    // It's OK to silently drop messages when there are no
                    // subscribers.
                    let _ = tx.send(Event::Reload);
                }
                Ok(_) => (),
                Err(e) => tracing::warn!(error = %e, "watch error"),
            },
            Config::default(),
        )?;

        for path in paths {
            watcher.watch(path, RecursiveMode::Recursive)?;
        }

        Ok(Self {
            _watcher: watcher,
            channel,
        })
    }

    /// A stream of change events, starting now.
    pub fn stream(&self) -> impl Stream<Item = Event> + use<> {
        use tokio_stream::StreamExt;
        // A lagging receiver just means we skipped some reloads.
        BroadcastStream::new(self.channel.subscribe()).filter_map(|e| e.ok())
    }
}

/// Does this event touch content we care about? Editors' hidden swap and
/// backup files don't count.
fn is_interesting(event: &notify::Event) -> bool {
    let kind_matters = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    kind_matters
        && event.paths.iter().any(|p| {
            p.file_name()
                .is_some_and(|name| !ignore_filename(name) || name == "_config.toml")
        })
}
