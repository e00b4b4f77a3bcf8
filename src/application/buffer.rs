use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use tokio::sync::oneshot;

use crate::error::{LcbError, Result};

struct BufferInner<T> {
    data: T,
    status: OnceLock<LcbError>,
    done: Option<oneshot::Sender<Result<()>>>,
    // Keeps the buffer this one was derived from alive.
    parent: Option<Buffer<T>>,
}

impl<T> Drop for BufferInner<T> {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let result = match self.status.take() {
                Some(error) => Err(error),
                None => Ok(()),
            };
            let _ = done.send(result);
        }
    }
}

/// Shared, reference-counted message buffer.
///
/// Every holder owns one reference; a handler signals that it is done with
/// the message by dropping its reference. Once the last reference is gone,
/// the completion returned by [`Buffer::with_completion`] resolves, carrying
/// the first failure reported through [`Buffer::fail`], if any.
pub struct Buffer<T> {
    inner: Arc<BufferInner<T>>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Buffer<T> {
    pub fn new(data: T) -> Self {
        Self::build(data, None, None)
    }

    /// Creates a buffer together with the notification of its release.
    pub fn with_completion(data: T) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        (Self::build(data, Some(tx), None), Completion { rx })
    }

    /// Creates a buffer that keeps `parent` referenced until it is released
    /// itself, so the parent's completion also waits for this one.
    pub fn chained(data: T, parent: &Buffer<T>) -> Self {
        Self::build(data, None, Some(parent.clone()))
    }

    fn build(data: T, done: Option<oneshot::Sender<Result<()>>>, parent: Option<Buffer<T>>) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                data,
                status: OnceLock::new(),
                done,
                parent,
            }),
        }
    }

    pub fn data(&self) -> &T {
        &self.inner.data
    }

    /// Mutable access, only while this is the sole reference.
    pub fn data_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(&mut self.inner).map(|inner| &mut inner.data)
    }

    /// Records a failure to report on completion. The first failure wins.
    ///
    /// Failures are forwarded to the parent of a chained buffer.
    pub fn fail(&self, error: LcbError) {
        match &self.inner.parent {
            Some(parent) => parent.fail(error),
            None => {
                let _ = self.inner.status.set(error);
            }
        }
    }

    /// Number of live references to this buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<T> Deref for Buffer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.data
    }
}

/// Resolves once every reference to a buffer has been dropped.
pub struct Completion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Completion {
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(LcbError::InterfaceClosed))
    }

    /// Non-blocking check; `None` while references are outstanding.
    pub fn try_wait(&mut self) -> Option<Result<()>> {
        self.rx.try_recv().ok()
    }
}
