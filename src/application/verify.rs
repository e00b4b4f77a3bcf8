use tracing::debug;

use super::interface::Interface;
use super::message::{buffer_to_node_id, node_id_to_buffer, Mti, NmranetMessage};
use crate::types::NodeId;

/// Answers Verify Node ID requests on behalf of the local nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifyNodeIdResponder;

impl VerifyNodeIdResponder {
    pub fn new() -> Self {
        Self
    }

    /// Verified Node ID replies owed for `message`, one per matching local
    /// node. Empty for any other message type.
    pub fn respond(&self, iface: &Interface, message: &NmranetMessage) -> Vec<NmranetMessage> {
        let responders: Vec<NodeId> = match message.mti {
            Mti::VERIFY_NODE_ID_GLOBAL => {
                let target = if message.payload.len() == 6 {
                    buffer_to_node_id(&message.payload).ok()
                } else {
                    None
                };
                iface
                    .local_node_ids()
                    .into_iter()
                    .filter(|id| target.map_or(true, |target| target == *id))
                    .collect()
            }
            Mti::VERIFY_NODE_ID_ADDRESSED => message
                .dst_node
                .iter()
                .map(|node| node.node_id())
                .collect(),
            _ => return Vec::new(),
        };

        if !responders.is_empty() {
            debug!(mti = %message.mti, count = responders.len(), "Answering Verify Node ID");
        }
        responders
            .into_iter()
            .map(|id| NmranetMessage::global(Mti::VERIFIED_NODE_ID, id, node_id_to_buffer(id)))
            .collect()
    }
}
