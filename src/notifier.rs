//! Asynchronous fan-out of evicted transaction hashes.
//!
//! A bounded queue feeds a small pool of worker threads; each dequeued hash
//! is handed to every registered handler. Delivery is best-effort: when the
//! queue is full, the oldest pending hash is dropped in favor of the new one
//! so the mutating caller is never blocked. Handler panics are contained and
//! logged.

use crate::tx::TxHash;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_NUM_WORKERS: u32 = 5;
const QUEUE_CAPACITY: usize = 4096;

pub type EvictionHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

struct NotifierShared {
    handlers: RwLock<Vec<EvictionHandler>>,
    is_running: AtomicBool,
}

pub struct EvictionNotifier {
    shared: Arc<NotifierShared>,
    queue_tx: Sender<TxHash>,
    queue_rx: Receiver<TxHash>,
    workers: Vec<JoinHandle<()>>,
}

impl EvictionNotifier {
    pub fn new() -> Self {
        Self::with_workers(DEFAULT_NUM_WORKERS)
    }

    pub fn with_workers(num_workers: u32) -> Self {
        let (queue_tx, queue_rx) = bounded::<TxHash>(QUEUE_CAPACITY);
        let shared = Arc::new(NotifierShared {
            handlers: RwLock::new(Vec::new()),
            is_running: AtomicBool::new(true),
        });

        let workers = (0..num_workers.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                let queue_rx = queue_rx.clone();
                std::thread::Builder::new()
                    .name(format!("txcache-eviction-worker-{i}"))
                    .spawn(move || worker_loop(shared, queue_rx))
                    .unwrap_or_else(|err| panic!("failed to spawn eviction worker: {err}"))
            })
            .collect();

        Self {
            shared,
            queue_tx,
            queue_rx,
            workers,
        }
    }

    pub fn register_handler(&self, handler: EvictionHandler) {
        let mut handlers = self.shared.handlers.write().unwrap();
        handlers.push(handler);
    }

    pub fn num_handlers(&self) -> usize {
        self.shared.handlers.read().unwrap().len()
    }

    /// Enqueues evicted hashes for delivery. When the queue is full, the
    /// oldest pending entry is discarded to make room.
    pub fn add_evicted_hashes(&self, hashes: Vec<TxHash>) {
        if !self.shared.is_running.load(Ordering::Relaxed) {
            return;
        }

        for hash in hashes {
            let mut pending = hash;
            loop {
                match self.queue_tx.try_send(pending) {
                    Ok(()) => break,
                    Err(TrySendError::Full(rejected)) => {
                        if self.queue_rx.try_recv().is_ok() {
                            debug!("eviction queue full, dropped oldest pending notification");
                        }
                        pending = rejected;
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        }
    }

    /// Stops the workers after the queue drains.
    pub fn shutdown(&mut self) {
        if !self.shared.is_running.swap(false, Ordering::Relaxed) {
            return;
        }

        // Workers exit once the senders are gone and the queue is empty.
        let (replacement_tx, _) = bounded(1);
        let queue_tx = std::mem::replace(&mut self.queue_tx, replacement_tx);
        drop(queue_tx);

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("eviction worker exited abnormally");
            }
        }
        debug!("eviction notifier shut down");
    }
}

impl Default for EvictionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EvictionNotifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<NotifierShared>, queue_rx: Receiver<TxHash>) {
    while let Ok(hash) = queue_rx.recv() {
        let handlers = shared.handlers.read().unwrap();
        for handler in handlers.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&hash)));
            if outcome.is_err() {
                warn!(
                    hash = %hex::encode(&hash),
                    "eviction handler panicked; notification swallowed"
                );
            }
        }
    }
    debug!("eviction worker closing");
}
