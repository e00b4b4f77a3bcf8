//! Duplex byte transport with registrable members.
//!
//! A [`Pipe`] fans every write out to all registered members except the one
//! named as the source. Two delivery paths exist:
//!
//! - [`Pipe::write_to_all`] delivers synchronously on the caller's stack.
//! - [`Pipe::allocate`] + [`Pipe::send_buffer`] hand a [`PipeBuffer`] to the
//!   pipe's delivery task. The number of outstanding buffers is bounded, so
//!   `allocate` is where writers feel backpressure. A buffer's send
//!   notification fires once every member finished with it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::error::{LcbError, Result};

/// Identifies one member of a pipe, used for echo suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(u64);

impl MemberId {
    /// Allocates a process-wide unique member id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A listener attached to a pipe.
pub trait PipeMember: Send + Sync {
    /// Synchronous delivery. Must not block.
    fn write(&self, data: &[u8]);

    /// Asynchronous delivery. The returned future completes when the member
    /// is finished with `data`.
    fn write_async<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, ()> {
        self.write(data);
        Box::pin(futures::future::ready(()))
    }
}

/// A buffer granted by [`Pipe::allocate`].
///
/// Holding a buffer occupies one of the pipe's slots until it is delivered
/// or dropped.
pub struct PipeBuffer {
    data: Vec<u8>,
    skip_member: Option<MemberId>,
    done: Option<oneshot::Sender<()>>,
    _permit: OwnedSemaphorePermit,
}

impl PipeBuffer {
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Names the member that must not receive this buffer.
    pub fn set_skip_member(&mut self, member: MemberId) {
        self.skip_member = Some(member);
    }

    /// Returns a receiver that resolves once the buffer has been delivered.
    pub fn notify_on_sent(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.done = Some(tx);
        rx
    }
}

impl Drop for PipeBuffer {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

type MemberList = Arc<Mutex<Vec<(MemberId, Arc<dyn PipeMember>)>>>;

fn snapshot(members: &MemberList) -> Vec<(MemberId, Arc<dyn PipeMember>)> {
    members
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Byte transport shared by any number of members.
pub struct Pipe {
    name: String,
    members: MemberList,
    allocator: Arc<Semaphore>,
    queue: mpsc::UnboundedSender<PipeBuffer>,
}

impl Pipe {
    /// Creates a pipe with `buffer_count` slots for asynchronous sends.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime; the delivery task is
    /// spawned here.
    pub fn new(name: impl Into<String>, buffer_count: usize) -> Arc<Self> {
        let name = name.into();
        let members: MemberList = Arc::new(Mutex::new(Vec::new()));
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(name.clone(), members.clone(), rx));
        Arc::new(Self {
            name,
            members,
            allocator: Arc::new(Semaphore::new(buffer_count)),
            queue,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register_member(&self, id: MemberId, member: Arc<dyn PipeMember>) {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, member));
        debug!(pipe = %self.name, member = ?id, "Member registered");
    }

    /// Removes a member. Returns false if it was not registered.
    pub fn unregister_member(&self, id: MemberId) -> bool {
        let mut members = self.members.lock().unwrap_or_else(PoisonError::into_inner);
        let before = members.len();
        members.retain(|(member, _)| *member != id);
        before != members.len()
    }

    pub fn member_count(&self) -> usize {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Synchronously delivers `data` to every member except `skip`.
    pub fn write_to_all(&self, skip: Option<MemberId>, data: &[u8]) {
        for (id, member) in snapshot(&self.members) {
            if Some(id) != skip {
                member.write(data);
            }
        }
    }

    /// Waits for a free send slot.
    pub async fn allocate(&self) -> Result<PipeBuffer> {
        let permit = self
            .allocator
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LcbError::PipeClosed(self.name.clone()))?;
        Ok(Self::buffer(permit))
    }

    /// Takes a free send slot if one is available right now.
    pub fn try_allocate(&self) -> Option<PipeBuffer> {
        self.allocator
            .clone()
            .try_acquire_owned()
            .ok()
            .map(Self::buffer)
    }

    fn buffer(permit: OwnedSemaphorePermit) -> PipeBuffer {
        PipeBuffer {
            data: Vec::new(),
            skip_member: None,
            done: None,
            _permit: permit,
        }
    }

    /// Number of send slots not currently held by a writer.
    pub fn available_buffers(&self) -> usize {
        self.allocator.available_permits()
    }

    /// Queues a buffer for asynchronous delivery.
    pub fn send_buffer(&self, buffer: PipeBuffer) {
        if self.queue.send(buffer).is_err() {
            debug!(pipe = %self.name, "Delivery task gone, buffer dropped");
        }
    }
}

async fn deliver(name: String, members: MemberList, mut rx: mpsc::UnboundedReceiver<PipeBuffer>) {
    while let Some(buffer) = rx.recv().await {
        for (id, member) in snapshot(&members) {
            if Some(id) == buffer.skip_member {
                continue;
            }
            member.write_async(&buffer.data).await;
        }
        trace!(pipe = %name, len = buffer.data.len(), "Buffer delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::mock::RecordingMember;

    #[tokio::test]
    async fn test_write_to_all_skips_source() {
        let pipe = Pipe::new("test", 1);
        let (a, _a_rx) = RecordingMember::new();
        let (b, _b_rx) = RecordingMember::new();
        let a_id = MemberId::next();
        pipe.register_member(a_id, a.clone());
        pipe.register_member(MemberId::next(), b.clone());

        pipe.write_to_all(Some(a_id), b"hello");

        assert!(a.received().is_empty());
        assert_eq!(b.received(), vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn test_send_buffer_notifies_and_frees_slot() {
        let pipe = Pipe::new("test", 1);
        let (member, mut rx) = RecordingMember::new();
        pipe.register_member(MemberId::next(), member);

        let mut buffer = pipe.allocate().await.unwrap();
        assert_eq!(pipe.available_buffers(), 0);
        assert!(pipe.try_allocate().is_none());

        buffer.set_data(b"abc".to_vec());
        let sent = buffer.notify_on_sent();
        pipe.send_buffer(buffer);
        sent.await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"abc".to_vec());
        assert_eq!(pipe.available_buffers(), 1);
    }

    #[tokio::test]
    async fn test_unregister_member() {
        let pipe = Pipe::new("test", 1);
        let (member, _rx) = RecordingMember::new();
        let id = MemberId::next();
        pipe.register_member(id, member.clone());
        assert_eq!(pipe.member_count(), 1);
        assert!(pipe.unregister_member(id));
        assert!(!pipe.unregister_member(id));

        pipe.write_to_all(None, b"x");
        assert!(member.received().is_empty());
    }
}
