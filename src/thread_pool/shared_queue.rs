use super::ThreadPool;
use crate::error::MdErrorKind;
use crate::Result;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::error;

trait FnBox {
    fn call_from_box(self: Box<Self>) -> Result<()>;
}

impl<F: FnOnce()> FnBox for F {
    fn call_from_box(self: Box<Self>) -> Result<()> {
        // catch panics so a worker can keep serving other tasks
        let result = catch_unwind(AssertUnwindSafe(*self));
        if result.is_err() {
            return Err(MdErrorKind::Transport.into());
        }
        Ok(())
    }
}

type Task = Box<dyn FnBox + Send + 'static>;

enum Message {
    NewTask(Task),
    Terminate,
}

struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Message>>>) -> Self {
        let handle = thread::spawn(move || loop {
            let message = receiver.lock().unwrap().recv().unwrap();
            match message {
                Message::NewTask(task) => {
                    if let Err(error) = task.call_from_box() {
                        error!("worker {}: task panicked: {}", id, error);
                    }
                }
                Message::Terminate => break,
            }
        });

        Self {
            id,
            handle: Some(handle),
        }
    }
}

/// Thread pool that maintains a fixed number of workers pulling tasks off a
/// shared mpsc queue.
///
/// Dropping a `SharedQueueThreadPool` waits for every worker to terminate,
/// so callers must avoid handing it a task that never returns.
pub struct SharedQueueThreadPool {
    num_threads: usize,
    workers: Vec<Worker>,
    sender: mpsc::Sender<Message>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(capacity: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(capacity);
        for i in 0..capacity {
            workers.push(Worker::new(i, receiver.clone()));
        }

        Ok(Self {
            num_threads: capacity,
            workers,
            sender,
        })
    }

    fn spawn<F: FnOnce() + Send + 'static>(&self, f: F) {
        let message = Message::NewTask(Box::new(f));
        self.sender.send(message).expect("worker channel closed");
    }
}

impl Drop for SharedQueueThreadPool {
    fn drop(&mut self) {
        for _ in 0..self.num_threads {
            let _ = self.sender.send(Message::Terminate);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
