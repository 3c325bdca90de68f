//! Ordered execution streams
//!
//! A [`Stream`] owns one worker thread that runs submitted jobs strictly in
//! submission order. Submitting never blocks. The first job that fails makes
//! the stream sticky: later jobs are skipped until [`Stream::synchronize`]
//! reports the failure and clears it. A job that panics counts as a failure
//! of that job; the worker survives it.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::error::{DeviceError, Result};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

enum Command {
    Run { label: &'static str, job: Job },
    Fence(Sender<Result<()>>),
}

/// An ordered execution queue.
pub struct Stream {
    id: u64,
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    /// Start a new stream and its worker thread.
    pub fn new() -> Result<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel();

        let worker = thread::Builder::new()
            .name(format!("gridfold-stream-{id}"))
            .spawn(move || run_worker(id, receiver))
            .map_err(|err| DeviceError::unsupported(format!("cannot start stream worker: {err}")))?;

        tracing::trace!(stream = id, "stream_created");

        Ok(Self {
            id,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue `job` behind everything already submitted.
    pub fn submit<F>(&self, label: &'static str, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.send(Command::Run {
            label,
            job: Box::new(job),
        })
    }

    /// Wait for all submitted jobs and return the first failure among them.
    pub fn synchronize(&self) -> Result<()> {
        let (reply, done) = mpsc::channel();
        self.send(Command::Fence(reply))?;
        done.recv().map_err(|_| DeviceError::StreamClosed(self.id))?
    }

    fn send(&self, command: Command) -> Result<()> {
        self.sender
            .as_ref()
            .ok_or(DeviceError::StreamClosed(self.id))?
            .send(command)
            .map_err(|_| DeviceError::StreamClosed(self.id))
    }
}

fn run_worker(id: u64, receiver: Receiver<Command>) {
    let mut sticky: Option<DeviceError> = None;

    for command in receiver {
        match command {
            Command::Run { label, job } => {
                if sticky.is_some() {
                    tracing::debug!(stream = id, job = label, "stream_job_skipped");
                    continue;
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(job))
                    .unwrap_or_else(|payload| Err(DeviceError::panicked(label, panic_message(payload.as_ref()))));
                if let Err(err) = outcome {
                    tracing::warn!(stream = id, job = label, error = %err, "stream_job_failed");
                    sticky = Some(err);
                }
            }
            Command::Fence(reply) => {
                let status = match sticky.take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
                let _ = reply.send(status);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the queue drains.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order() {
        let stream = Stream::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16 {
            let seen = Arc::clone(&seen);
            stream
                .submit("push", move || {
                    if i % 3 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                    seen.lock().push(i);
                    Ok(())
                })
                .unwrap();
        }
        stream.synchronize().unwrap();

        assert_eq!(*seen.lock(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn first_failure_is_sticky_until_synchronize() {
        let stream = Stream::new().unwrap();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&ran);
        stream
            .submit("first", move || Err(DeviceError::kernel_failed("first", 0, "boom")))
            .unwrap();
        stream
            .submit("second", move || {
                log.lock().push("second");
                Ok(())
            })
            .unwrap();

        let err = stream.synchronize().unwrap_err();
        assert_eq!(err, DeviceError::kernel_failed("first", 0, "boom"));
        assert!(ran.lock().is_empty());

        // cleared
        assert!(stream.synchronize().is_ok());
    }

    #[test]
    fn panicking_job_is_reported_once_and_the_stream_recovers() {
        let stream = Stream::new().unwrap();
        let ran = Arc::new(Mutex::new(0));

        stream.submit("panics", || panic!("worker group panicked")).unwrap();
        let skipped = Arc::clone(&ran);
        stream
            .submit("after_panic", move || {
                *skipped.lock() += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(
            stream.synchronize(),
            Err(DeviceError::panicked("panics", "worker group panicked"))
        );
        assert_eq!(*ran.lock(), 0);
        assert!(stream.synchronize().is_ok());

        let counted = Arc::clone(&ran);
        stream
            .submit("recovered", move || {
                *counted.lock() += 1;
                Ok(())
            })
            .unwrap();
        stream.synchronize().unwrap();
        assert_eq!(*ran.lock(), 1);
    }

    #[test]
    fn formatted_panic_messages_are_kept() {
        let stream = Stream::new().unwrap();
        let group = 7;
        stream.submit("formats", move || panic!("group {group} overflowed")).unwrap();
        assert_eq!(
            stream.synchronize(),
            Err(DeviceError::panicked("formats", "group 7 overflowed"))
        );
    }

    #[test]
    fn stream_ids_are_unique() {
        let a = Stream::new().unwrap();
        let b = Stream::new().unwrap();
        assert_ne!(a.id(), b.id());
    }
}
