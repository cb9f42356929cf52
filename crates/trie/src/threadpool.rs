use crossbeam::channel::{Sender, unbounded};
use std::thread::{Builder, Scope};

/// A small pool of scoped workers consuming plain jobs from a shared channel.
/// Workers live for the duration of the enclosing [`std::thread::scope`], so
/// jobs may borrow from the caller's stack.
pub struct ThreadPool<'scope> {
    sender: Sender<Box<dyn 'scope + Send + FnOnce()>>,
    worker_count: usize,
}

impl<'scope> ThreadPool<'scope> {
    pub fn new(thread_count: usize, scope: &'scope Scope<'scope, '_>) -> Self {
        let (sender, receiver) = unbounded::<Box<dyn 'scope + Send + FnOnce()>>();

        for i in 0..thread_count {
            let receiver = receiver.clone();
            let _ = Builder::new()
                .name(format!("trie-commit-{i}"))
                .spawn_scoped(scope, move || {
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                });
        }
        ThreadPool {
            sender,
            worker_count: thread_count,
        }
    }

    pub fn execute(&self, task: Box<dyn 'scope + Send + FnOnce()>) {
        // Receivers outlive the pool handle only once it is dropped, so a send
        // can only fail after the scope started unwinding.
        let _ = self.sender.send(task);
    }

    /// Returns the total number of workers in the pool.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}
