use std::sync::Arc;

use tracing::trace;

use super::buffer::Buffer;

/// Messages that can be routed by a [`DispatchFlow`].
pub trait Dispatchable {
    /// Routing key, compared under each handler's mask.
    fn id(&self) -> u32;
}

/// Receiver of shared message buffers.
///
/// A handler that is done with a message drops its buffer reference.
pub trait MessageHandler<M>: Send + Sync {
    fn send(&self, message: Buffer<M>, priority: u32);
}

struct HandlerEntry<M> {
    id: u32,
    mask: u32,
    handler: Arc<dyn MessageHandler<M>>,
}

/// Fans each message out to every handler registered for its id.
///
/// A handler registered with `(id, mask)` receives a message when
/// `message.id() & mask == id & mask`. Handlers are called in registration
/// order, each with its own reference to the same buffer.
pub struct DispatchFlow<M> {
    handlers: Vec<HandlerEntry<M>>,
    fallback: Option<Arc<dyn MessageHandler<M>>>,
}

impl<M> Default for DispatchFlow<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> DispatchFlow<M> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            fallback: None,
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn MessageHandler<M>>, id: u32, mask: u32) {
        self.handlers.push(HandlerEntry { id, mask, handler });
    }

    /// Removes a registration made with the same handler, id and mask.
    pub fn unregister_handler(&mut self, handler: &Arc<dyn MessageHandler<M>>, id: u32, mask: u32) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|entry| {
            !(Arc::ptr_eq(&entry.handler, handler) && entry.id == id && entry.mask == mask)
        });
        before != self.handlers.len()
    }

    /// Handler receiving messages no registration matched.
    pub fn set_fallback_handler(&mut self, handler: Option<Arc<dyn MessageHandler<M>>>) {
        self.fallback = handler;
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl<M: Dispatchable> DispatchFlow<M> {
    /// Delivers `message` and returns the number of handlers that got it.
    pub fn dispatch(&self, message: Buffer<M>) -> usize {
        let key = message.id();
        let mut delivered = 0;
        for entry in &self.handlers {
            if key & entry.mask == entry.id & entry.mask {
                entry.handler.send(message.clone(), 0);
                delivered += 1;
            }
        }
        if delivered == 0 {
            if let Some(fallback) = &self.fallback {
                fallback.send(message, 0);
                return 1;
            }
            trace!(id = key, "No handler for message");
        }
        delivered
    }
}

impl<M: Dispatchable + Send + Sync> MessageHandler<M> for DispatchFlow<M> {
    fn send(&self, message: Buffer<M>, _priority: u32) {
        self.dispatch(message);
    }
}
