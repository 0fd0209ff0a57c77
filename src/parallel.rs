use crossbeam_channel::{Sender, bounded};
use std::num::NonZero;
use std::thread;

/// The sending end of a running pool: every value sent is handed to one of
/// the worker threads.
pub struct WorkPool<T: Send> {
    tx: Sender<T>,
}

impl<T: Send> WorkPool<T> {
    pub fn send(&self, value: T) {
        // Workers only stop once every sender is gone, so this can't fail
        // while we hold `self.tx`.
        let _ = self.tx.send(value);
    }
}

/// The number of worker threads to use when none is requested.
pub fn default_threads() -> NonZero<usize> {
    thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN)
}

/// Run `body_fn` with a pool of `threads` workers, each of which calls
/// `work_fn` on the values it receives. Returns once `body_fn` has returned
/// and every sent value has been processed.
pub fn run_pool<'scope, T, W, B, R>(threads: Option<NonZero<usize>>, work_fn: W, body_fn: B) -> R
where
    T: Send + 'scope,
    W: Fn(T) + Send + Clone + 'scope,
    B: FnOnce(WorkPool<T>) -> R + 'scope,
{
    let threads = threads.unwrap_or_else(default_threads).get();
    thread::scope(|s| {
        let (tx, rx) = bounded(threads * 4);

        for _ in 0..threads {
            let thread_rx = rx.clone();
            let thread_work = work_fn.clone();
            s.spawn(move || {
                while let Ok(val) = thread_rx.recv() {
                    thread_work(val);
                }
            });
        }

        // Dropping the pool at the end of `body_fn` closes the channel, which
        // lets the workers finish.
        body_fn(WorkPool { tx })
    })
}
