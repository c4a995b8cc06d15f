//! Serial job queue running scene recomputations off the caller's thread.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::executor::run_guarded;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

/// Runs submitted jobs one at a time, in submission order.
///
/// Either owns a dedicated thread ([`spawn`](Self::spawn)) or is drained by
/// the owner through [`run_pending`](Self::run_pending) ([`manual`](Self::manual)).
pub struct ManagerExecutor {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    shutdown: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ManagerExecutor {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Message>();
        let worker_receiver = receiver.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(message) = worker_receiver.recv() {
                    match message {
                        Message::Run(job) => run_guarded(job),
                        Message::Stop => break,
                    }
                }
            })?;
        Ok(Self {
            sender,
            receiver,
            shutdown: AtomicBool::new(false),
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn manual() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            shutdown: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    /// Queues a job. Jobs submitted after shutdown are dropped.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if self.is_shutdown() {
            return;
        }
        let _ = self.sender.send(Message::Run(Box::new(job)));
    }

    /// Runs every queued job on the calling thread. Returns how many ran.
    ///
    /// Jobs queued by a running job are picked up in the same call.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                Message::Run(job) => {
                    run_guarded(job);
                    ran += 1;
                }
                Message::Stop => break,
            }
        }
        ran
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting jobs and lets the thread finish the jobs already queued.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = self.sender.send(Message::Stop);
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ManagerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
