use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use tracing::debug;

use super::dispatcher::{DispatchFlow, MessageHandler};
use super::message::NmranetMessage;
use crate::error::{LcbError, Result};
use crate::types::NodeId;

/// A virtual node hosted on an interface.
pub trait Node: Send + Sync {
    fn node_id(&self) -> NodeId;
}

/// Handler type of the outbound write flows.
pub type MessageWriteFlow = Arc<dyn MessageHandler<NmranetMessage>>;

/// Transport-independent part of an interface: the local node registry,
/// the dispatcher of incoming messages and the outbound write flows.
///
/// All methods taking `&mut self` belong to the interface's own task; the
/// type holds no locks.
pub struct Interface {
    dispatcher: DispatchFlow<NmranetMessage>,
    local_nodes: BTreeMap<NodeId, Weak<dyn Node>>,
    local_nodes_count: usize,
    global_write_flow: MessageWriteFlow,
    addressed_write_flow: MessageWriteFlow,
}

impl Interface {
    /// Creates an interface supporting up to `local_nodes_count` virtual nodes.
    pub fn new(
        local_nodes_count: usize,
        global_write_flow: MessageWriteFlow,
        addressed_write_flow: MessageWriteFlow,
    ) -> Self {
        Self {
            dispatcher: DispatchFlow::new(),
            local_nodes: BTreeMap::new(),
            local_nodes_count,
            global_write_flow,
            addressed_write_flow,
        }
    }

    /// Flow sending unaddressed messages to the bus.
    pub fn global_message_write_flow(&self) -> &MessageWriteFlow {
        &self.global_write_flow
    }

    /// Flow sending addressed messages to the bus.
    pub fn addressed_message_write_flow(&self) -> &MessageWriteFlow {
        &self.addressed_write_flow
    }

    /// Dispatcher of incoming messages.
    pub fn dispatcher(&self) -> &DispatchFlow<NmranetMessage> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut DispatchFlow<NmranetMessage> {
        &mut self.dispatcher
    }

    /// Registers a local node. The registry keeps a weak reference only.
    ///
    /// # Panics
    ///
    /// If a live node with the same id is already registered, or the
    /// registry is full.
    pub fn add_local_node(&mut self, node: &Arc<dyn Node>) {
        let id = node.node_id();
        assert!(
            self.lookup_local_node(id).is_none(),
            "node {id} is already registered"
        );
        self.local_nodes.retain(|_, weak| weak.strong_count() > 0);
        assert!(
            self.local_nodes.len() < self.local_nodes_count,
            "no room for local node {id}"
        );
        self.local_nodes.insert(id, Arc::downgrade(node));
        debug!(node = %id, "Local node registered");
    }

    /// Looks a node id up among the live local nodes.
    pub fn lookup_local_node(&self, id: NodeId) -> Option<Arc<dyn Node>> {
        self.local_nodes.get(&id).and_then(Weak::upgrade)
    }

    /// Removes a local node from the registry.
    ///
    /// Messages that already resolved the node keep their own reference.
    pub fn remove_local_node(&mut self, id: NodeId) -> Result<()> {
        match self.local_nodes.remove(&id) {
            Some(_) => {
                debug!(node = %id, "Local node removed");
                Ok(())
            }
            None => Err(LcbError::NodeNotRegistered(id)),
        }
    }

    /// Ids of all live local nodes, in ascending order.
    pub fn local_node_ids(&self) -> Vec<NodeId> {
        self.local_nodes
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }
}
