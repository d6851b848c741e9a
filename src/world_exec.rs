use crate::host::MarkerWorld;
use log::warn;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// A unit of work confined to the world's processing thread.
pub type WorldTask = Box<dyn FnOnce(&mut dyn MarkerWorld) + Send + 'static>;

enum WorldMessage {
    Run(WorldTask),
    Stop,
}

/// Handle for submitting work to one world's single processing thread.
///
/// Everything that touches live entity state goes through `submit`; the
/// caller never blocks. Index and registry updates that must be visible
/// before the task runs are performed synchronously before submission.
#[derive(Clone)]
pub struct WorldContext {
    sender: mpsc::Sender<WorldMessage>,
}

impl WorldContext {
    /// Enqueues `task` for the world thread. Returns false when the worker
    /// has shut down, in which case the task is dropped.
    pub fn submit(&self, task: impl FnOnce(&mut dyn MarkerWorld) + Send + 'static) -> bool {
        if self
            .sender
            .send(WorldMessage::Run(Box::new(task)))
            .is_err()
        {
            warn!("world context is gone, dropping submitted task");
            return false;
        }
        true
    }

    /// Blocks until every task submitted through this handle so far has run.
    /// For shutdown and tests; ordinary callers fire and forget.
    pub fn fence(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        if self.submit(move |_| {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.recv();
        }
    }
}

/// Owns the world thread: a single consumer draining submitted tasks in
/// order against the host's `MarkerWorld`.
pub struct WorldWorker {
    sender: mpsc::Sender<WorldMessage>,
    handle: Option<JoinHandle<()>>,
}

impl WorldWorker {
    pub fn spawn(mut host: Box<dyn MarkerWorld>) -> Self {
        let (sender, receiver) = mpsc::channel::<WorldMessage>();
        let handle = thread::Builder::new()
            .name("neolocks-world".to_string())
            .spawn(move || loop {
                match receiver.recv() {
                    Ok(WorldMessage::Run(task)) => task(&mut *host),
                    Ok(WorldMessage::Stop) | Err(_) => break,
                }
            })
            .expect("failed to spawn world thread");
        Self {
            sender,
            handle: Some(handle),
        }
    }

    pub fn context(&self) -> WorldContext {
        WorldContext {
            sender: self.sender.clone(),
        }
    }

    /// Drains already-queued tasks, then stops the thread. Contexts cloned
    /// from this worker stop accepting work once it returns.
    pub fn stop(mut self) {
        let _ = self.sender.send(WorldMessage::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("world thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MarkerHandle, MarkerId, MarkerPlacement, SpawnedMarker};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingWorld {
        spawned: Arc<AtomicUsize>,
    }

    impl MarkerWorld for CountingWorld {
        fn spawn_marker(
            &mut self,
            _placement: &MarkerPlacement,
            _text: &str,
        ) -> Option<SpawnedMarker> {
            let n = self.spawned.fetch_add(1, Ordering::SeqCst) as u64;
            Some(SpawnedMarker {
                handle: MarkerHandle(n),
                id: MarkerId(uuid::Uuid::from_u128(n as u128)),
            })
        }

        fn despawn_marker(&mut self, _handle: MarkerHandle) -> bool {
            true
        }

        fn resolve_marker(&mut self, _id: MarkerId) -> Option<MarkerHandle> {
            None
        }
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let worker = WorldWorker::spawn(Box::new(CountingWorld {
            spawned: spawned.clone(),
        }));
        let context = worker.context();

        let placement = MarkerPlacement {
            world: "w".to_string(),
            x: 0.0,
            y: 0.0,
            z: 0.0,
        };
        for _ in 0..3 {
            let placement = placement.clone();
            context.submit(move |world| {
                world.spawn_marker(&placement, "line");
            });
        }
        context.fence();

        assert_eq!(spawned.load(Ordering::SeqCst), 3);
        worker.stop();
    }

    #[test]
    fn submit_after_stop_reports_failure() {
        let worker = WorldWorker::spawn(Box::new(CountingWorld {
            spawned: Arc::new(AtomicUsize::new(0)),
        }));
        let context = worker.context();
        worker.stop();

        assert!(!context.submit(|_| {}));
    }
}
