use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::SendError};
use tracing::{debug, info, trace, warn};

use super::alias_cache::AliasCache;
use crate::application::{
    buffer_to_node_id, node_id_to_buffer, Buffer, DstFlags, Interface, MessageHandler, Mti,
    NmranetMessage, Node, SrcFlags, VerifyNodeIdResponder,
};
use crate::error::{LcbError, Result};
use crate::physical::can::{CanFrame, CAN_FRAME_SIZE};
use crate::physical::pipe::{MemberId, Pipe, PipeMember};
use crate::transport::{parse_addressed, segment_addressed, Reassembler, GLOBAL_MAX_PAYLOAD};
use crate::types::{Config, NodeAlias, NodeHandle, NodeId};

const FRAME_PRIORITY: u32 = 0x1000_0000;
const OPENLCB_MSG: u32 = 0x0800_0000;
const FRAME_TYPE_GLOBAL_ADDRESSED: u32 = 1;

const CONTROL_RID: u32 = 0x0700;
const CONTROL_AMD: u32 = 0x0701;
const CONTROL_AME: u32 = 0x0702;
const CONTROL_AMR: u32 = 0x0703;

/// Header of a global or addressed message frame.
pub fn message_header(mti: Mti, src: NodeAlias) -> u32 {
    FRAME_PRIORITY
        | OPENLCB_MSG
        | (FRAME_TYPE_GLOBAL_ADDRESSED << 24)
        | (((mti.get() & 0xFFF) as u32) << 12)
        | src.get() as u32
}

/// Header of a Check ID frame; `seq` is 7 down to 4.
///
/// # Panics
///
/// In debug builds, if `seq` is outside `4..=7`.
pub fn cid_header(seq: u32, id: NodeId, alias: NodeAlias) -> u32 {
    debug_assert!((4..=7).contains(&seq), "Check ID sequence {seq} out of range");
    let field = (id.get() >> (12 * (seq - 4))) & 0xFFF;
    ((0x10 | seq) << 24) | ((field as u32) << 12) | alias.get() as u32
}

/// Header of a RID/AMD/AME/AMR control frame.
pub fn control_header(code: u32, alias: NodeAlias) -> u32 {
    FRAME_PRIORITY | (code << 12) | alias.get() as u32
}

/// CAN interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanIfConfig {
    /// Maximum number of virtual nodes on this interface.
    pub local_nodes_count: usize,
    /// Aliases reserved by local nodes.
    pub local_alias_cache_size: usize,
    /// Aliases learned from the bus.
    pub remote_alias_cache_size: usize,
    /// Seed of the alias generator.
    pub alias_seed: u64,
    /// Wait between Check ID and Reserve ID frames.
    pub reserve_delay_ms: u64,
    /// Longest addressed message accepted for reassembly.
    pub max_reassembly_len: usize,
}

impl Default for CanIfConfig {
    fn default() -> Self {
        Self {
            local_nodes_count: 10,
            local_alias_cache_size: 10,
            remote_alias_cache_size: 100,
            alias_seed: 0x0501_0101_0000,
            reserve_delay_ms: 200,
            max_reassembly_len: 1024,
        }
    }
}

impl Config for CanIfConfig {
    fn validate(&self) -> Result<()> {
        if self.local_nodes_count == 0
            || self.local_alias_cache_size == 0
            || self.remote_alias_cache_size == 0
            || self.max_reassembly_len == 0
        {
            return Err(LcbError::InvalidParameter(
                "interface sizes must be non-zero".into(),
            ));
        }
        if self.local_alias_cache_size < self.local_nodes_count {
            return Err(LcbError::InvalidParameter(
                "local alias cache smaller than local node count".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Global,
    Addressed,
}

enum Command {
    Frame(CanFrame),
    Write {
        kind: WriteKind,
        message: Buffer<NmranetMessage>,
    },
    Shutdown,
}

/// Outbound write flow handed out by [`Interface`]. Queues onto the
/// interface task.
struct WriteFlow {
    kind: WriteKind,
    tx: mpsc::UnboundedSender<Command>,
}

impl MessageHandler<NmranetMessage> for WriteFlow {
    fn send(&self, message: Buffer<NmranetMessage>, _priority: u32) {
        let command = Command::Write {
            kind: self.kind,
            message,
        };
        if let Err(SendError(Command::Write { message, .. })) = self.tx.send(command) {
            message.fail(LcbError::InterfaceClosed);
        }
    }
}

/// Member of the CAN pipe feeding received frames to the interface task.
struct CanIfMember {
    tx: mpsc::UnboundedSender<Command>,
}

impl PipeMember for CanIfMember {
    fn write(&self, data: &[u8]) {
        for record in data.chunks_exact(CAN_FRAME_SIZE) {
            match CanFrame::from_bytes(record) {
                Ok(frame) => {
                    let _ = self.tx.send(Command::Frame(frame));
                }
                Err(e) => debug!(error = %e, "Dropping invalid binary frame"),
            }
        }
    }
}

/// Cloneable handle for stopping a running interface.
#[derive(Clone)]
pub struct CanIfHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CanIfHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// OpenLCB interface over a binary CAN pipe.
///
/// Owns the local node registry, both alias caches and the segment
/// reassembler. All of these are touched only through `&mut self`, from
/// the task driving [`CanInterface::run`] or [`CanInterface::process_pending`].
/// Frames from the pipe and messages from the write flows reach that task
/// through a command queue.
pub struct CanInterface {
    config: CanIfConfig,
    iface: Interface,
    can_pipe: Arc<Pipe>,
    member_id: MemberId,
    local_aliases: AliasCache,
    remote_aliases: AliasCache,
    reassembler: Reassembler,
    verify: VerifyNodeIdResponder,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CanInterface {
    /// Creates an interface and attaches it to `can_pipe`.
    pub fn new(config: CanIfConfig, can_pipe: Arc<Pipe>) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let global = Arc::new(WriteFlow {
            kind: WriteKind::Global,
            tx: tx.clone(),
        });
        let addressed = Arc::new(WriteFlow {
            kind: WriteKind::Addressed,
            tx: tx.clone(),
        });
        let member_id = MemberId::next();
        can_pipe.register_member(member_id, Arc::new(CanIfMember { tx: tx.clone() }));

        Ok(Self {
            iface: Interface::new(config.local_nodes_count, global, addressed),
            local_aliases: AliasCache::new(config.alias_seed, config.local_alias_cache_size),
            remote_aliases: AliasCache::new(config.alias_seed, config.remote_alias_cache_size),
            reassembler: Reassembler::new(config.max_reassembly_len),
            verify: VerifyNodeIdResponder::new(),
            config,
            can_pipe,
            member_id,
            tx,
            rx,
        })
    }

    pub fn config(&self) -> &CanIfConfig {
        &self.config
    }

    pub fn interface(&self) -> &Interface {
        &self.iface
    }

    pub fn interface_mut(&mut self) -> &mut Interface {
        &mut self.iface
    }

    pub fn handle(&self) -> CanIfHandle {
        CanIfHandle {
            tx: self.tx.clone(),
        }
    }

    /// Aliases reserved by local nodes.
    pub fn local_aliases(&self) -> &AliasCache {
        &self.local_aliases
    }

    /// Aliases learned from the bus.
    pub fn remote_aliases(&self) -> &AliasCache {
        &self.remote_aliases
    }

    /// Registers a local node and reserves an alias for it on the bus.
    ///
    /// Aliases of nodes dropped without [`remove_local_node`] are released
    /// first.
    ///
    /// # Panics
    ///
    /// If the node is already registered or the registry is full.
    ///
    /// [`remove_local_node`]: Self::remove_local_node
    pub async fn add_local_node(&mut self, node: Arc<dyn Node>) -> Result<NodeAlias> {
        let id = node.node_id();
        self.release_dropped_nodes().await?;
        self.iface.add_local_node(&node);

        let alias = loop {
            let candidate = self.local_aliases.generate();
            if self.local_aliases.peek_alias(candidate).is_none()
                && self.remote_aliases.peek_alias(candidate).is_none()
            {
                break candidate;
            }
            trace!(alias = %candidate, "Alias candidate in use");
        };

        if let Err(e) = self.reserve_alias(id, alias).await {
            warn!(node = %id, alias = %alias, error = %e, "Alias reservation failed");
            let _ = self.iface.remove_local_node(id);
            return Err(e);
        }
        self.local_aliases.add(id, alias);
        info!(node = %id, alias = %alias, "Local node initialized");
        Ok(alias)
    }

    async fn reserve_alias(&mut self, id: NodeId, alias: NodeAlias) -> Result<()> {
        for seq in (4..=7).rev() {
            self.send_frame(CanFrame::new_extended(cid_header(seq, id, alias), &[])?)
                .await?;
        }
        if self.config.reserve_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.reserve_delay_ms)).await;
        }
        self.send_frame(CanFrame::new_extended(control_header(CONTROL_RID, alias), &[])?)
            .await?;
        self.send_frame(CanFrame::new_extended(
            control_header(CONTROL_AMD, alias),
            &node_id_to_buffer(id),
        )?)
        .await
    }

    /// Removes a local node and releases its alias.
    ///
    /// Messages that already resolved the node keep their reference to it.
    pub async fn remove_local_node(&mut self, id: NodeId) -> Result<()> {
        self.iface.remove_local_node(id)?;
        match self.local_aliases.peek_id(id) {
            Some(alias) => self.release_alias(id, alias).await,
            None => Ok(()),
        }
    }

    /// Releases the aliases of local nodes whose last `Arc` is gone.
    async fn release_dropped_nodes(&mut self) -> Result<()> {
        let dropped: Vec<(NodeId, NodeAlias)> = self
            .local_aliases
            .iter()
            .filter(|(id, _)| self.iface.lookup_local_node(*id).is_none())
            .collect();
        for (id, alias) in dropped {
            let _ = self.iface.remove_local_node(id);
            debug!(node = %id, "Local node was dropped");
            self.release_alias(id, alias).await?;
        }
        Ok(())
    }

    async fn release_alias(&mut self, id: NodeId, alias: NodeAlias) -> Result<()> {
        self.local_aliases.remove(alias);
        self.reassembler.forget_source(alias);
        info!(node = %id, alias = %alias, "Releasing alias");
        self.send_frame(CanFrame::new_extended(
            control_header(CONTROL_AMR, alias),
            &node_id_to_buffer(id),
        )?)
        .await
    }

    async fn send_frame(&self, frame: CanFrame) -> Result<()> {
        let mut buffer = self.can_pipe.allocate().await?;
        buffer.set_data(frame.to_bytes().to_vec());
        buffer.set_skip_member(self.member_id);
        let sent = buffer.notify_on_sent();
        self.can_pipe.send_buffer(buffer);
        sent.await
            .map_err(|_| LcbError::PipeClosed(self.can_pipe.name().to_string()))
    }

    /// Interprets one frame received from the bus.
    pub async fn process_frame(&mut self, frame: CanFrame) {
        if !frame.is_extended() || frame.is_remote() || frame.is_error() {
            trace!(?frame, "Ignoring non-OpenLCB frame");
            return;
        }
        let header = frame.id();
        let src = NodeAlias::new((header & 0xFFF) as u16);
        let result = if header & OPENLCB_MSG == 0 {
            self.process_control(header, src, frame.data()).await
        } else {
            self.process_message(header, src, frame.data());
            Ok(())
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to answer control frame");
        }
    }

    async fn process_control(&mut self, header: u32, src: NodeAlias, data: &[u8]) -> Result<()> {
        let kind = (header >> 24) & 0x1F;
        let code = (header >> 12) & 0xFFF;
        match kind {
            0x14..=0x17 => {
                if self.local_aliases.peek_alias(src).is_some() {
                    debug!(alias = %src, "Defending alias against Check ID");
                    self.send_frame(CanFrame::new_extended(control_header(CONTROL_RID, src), &[])?)
                        .await?;
                }
            }
            0x10 => match code {
                CONTROL_RID => {
                    if self.local_aliases.peek_alias(src).is_some() {
                        warn!(alias = %src, "Alias conflict: Reserve ID for a local alias");
                        self.send_frame(CanFrame::new_extended(
                            control_header(CONTROL_RID, src),
                            &[],
                        )?)
                        .await?;
                    }
                }
                CONTROL_AMD => self.alias_map_definition(src, data),
                CONTROL_AME => self.answer_alias_map_enquiry(data).await?,
                CONTROL_AMR => {
                    if let Some(id) = self.remote_aliases.remove(src) {
                        debug!(node = %id, alias = %src, "Remote alias released");
                    }
                    self.reassembler.forget_source(src);
                }
                _ => trace!(code, "Ignoring control frame"),
            },
            _ => trace!(kind, "Ignoring control frame"),
        }
        Ok(())
    }

    fn alias_map_definition(&mut self, alias: NodeAlias, data: &[u8]) {
        if self.local_aliases.peek_alias(alias).is_some() {
            warn!(alias = %alias, "Alias conflict: another node defined a local alias");
            return;
        }
        let id = match buffer_to_node_id(data) {
            Ok(id) if !id.is_unknown() => id,
            _ => {
                debug!(alias = %alias, "Alias Map Definition without node id");
                return;
            }
        };
        if self.remote_aliases.peek_alias(alias) == Some(id) {
            return;
        }
        self.remote_aliases.remove(alias);
        if let Some(stale) = self.remote_aliases.peek_id(id) {
            self.remote_aliases.remove(stale);
        }
        self.remote_aliases.add(id, alias);
        debug!(node = %id, alias = %alias, "Remote alias defined");
    }

    async fn answer_alias_map_enquiry(&mut self, data: &[u8]) -> Result<()> {
        let wanted = if data.is_empty() {
            None
        } else {
            Some(buffer_to_node_id(data)?)
        };
        let matching: Vec<(NodeId, NodeAlias)> = self
            .local_aliases
            .iter()
            .filter(|(id, _)| wanted.map_or(true, |wanted| wanted == *id))
            .filter(|(id, _)| self.iface.lookup_local_node(*id).is_some())
            .collect();
        for (id, alias) in matching {
            self.send_frame(CanFrame::new_extended(
                control_header(CONTROL_AMD, alias),
                &node_id_to_buffer(id),
            )?)
            .await?;
        }
        Ok(())
    }

    fn process_message(&mut self, header: u32, src_alias: NodeAlias, data: &[u8]) {
        let frame_type = (header >> 24) & 0x7;
        if frame_type != FRAME_TYPE_GLOBAL_ADDRESSED {
            trace!(frame_type, "Ignoring unsupported OpenLCB frame type");
            return;
        }
        if self.local_aliases.peek_alias(src_alias).is_some() {
            warn!(alias = %src_alias, "Alias conflict: message from a local alias");
            return;
        }
        let mti = Mti::new(((header >> 12) & 0xFFF) as u16);
        let src_id = self
            .remote_aliases
            .lookup_alias(src_alias)
            .unwrap_or(NodeId::UNKNOWN);
        let src = NodeHandle::new(src_id, src_alias);

        if !mti.is_addressed() {
            let mut message = NmranetMessage::global(mti, src_id, data.to_vec());
            message.src = src;
            self.deliver(Buffer::new(message));
            return;
        }

        let Some((framing, dst_alias, segment)) = parse_addressed(data) else {
            debug!(mti = %mti, "Addressed frame without destination");
            return;
        };
        let Some(dst_id) = self.local_aliases.lookup_alias(dst_alias) else {
            return;
        };
        let Some(dst_node) = self.iface.lookup_local_node(dst_id) else {
            return;
        };
        let Some(payload) = self
            .reassembler
            .push(src_alias, dst_alias, mti.get(), framing, segment)
        else {
            return;
        };
        let mut message =
            NmranetMessage::addressed(mti, src_id, NodeHandle::new(dst_id, dst_alias), payload);
        message.src = src;
        message.dst_node = Some(dst_node);
        self.deliver(Buffer::new(message));
    }

    fn deliver(&mut self, message: Buffer<NmranetMessage>) {
        for response in self.verify.respond(&self.iface, &message) {
            let _ = self.tx.send(Command::Write {
                kind: WriteKind::Global,
                message: Buffer::new(response),
            });
        }
        self.iface.dispatcher().dispatch(message);
    }

    async fn write_message(&mut self, kind: WriteKind, message: Buffer<NmranetMessage>) {
        let result = match kind {
            WriteKind::Global => self.write_global(&message).await,
            WriteKind::Addressed => self.write_addressed(&message).await,
        };
        if let Err(e) = result {
            warn!(mti = %message.mti, error = %e, "Message write failed");
            message.fail(e);
        }
    }

    async fn write_global(&mut self, message: &Buffer<NmranetMessage>) -> Result<()> {
        let src_alias = self.source_alias(message.src.id)?;
        if message.payload.len() > GLOBAL_MAX_PAYLOAD {
            return Err(LcbError::PayloadTooLong {
                len: message.payload.len(),
                max: GLOBAL_MAX_PAYLOAD,
            });
        }
        let frame = CanFrame::new_extended(message_header(message.mti, src_alias), &message.payload)?;
        self.send_frame(frame).await?;
        self.loopback(message, src_alias, None);
        Ok(())
    }

    async fn write_addressed(&mut self, message: &Buffer<NmranetMessage>) -> Result<()> {
        let src_alias = self.source_alias(message.src.id)?;
        let dst = message.dst;

        let local_dst = if !dst.id.is_unknown() {
            Some(dst.id)
        } else {
            self.local_aliases.peek_alias(dst.alias)
        };
        if let Some(node) = local_dst.and_then(|id| self.iface.lookup_local_node(id)) {
            self.loopback(message, src_alias, Some(node));
            return Ok(());
        }

        let dst_alias = if !dst.alias.is_unknown() {
            dst.alias
        } else {
            self.remote_aliases
                .lookup_id(dst.id)
                .ok_or(LcbError::UnknownDestination(dst.id))?
        };
        let header = message_header(message.mti, src_alias);
        for data in segment_addressed(dst_alias, &message.payload) {
            self.send_frame(CanFrame::new_extended(header, &data)?).await?;
        }
        Ok(())
    }

    fn source_alias(&mut self, id: NodeId) -> Result<NodeAlias> {
        if self.iface.lookup_local_node(id).is_none() {
            return Err(LcbError::UnknownSource(id));
        }
        self.local_aliases
            .lookup_id(id)
            .ok_or(LcbError::UnknownSource(id))
    }

    /// Hands a locally written message to the local handlers.
    fn loopback(
        &mut self,
        message: &Buffer<NmranetMessage>,
        src_alias: NodeAlias,
        dst_node: Option<Arc<dyn Node>>,
    ) {
        let mut copy = message.data().clone();
        copy.src.alias = src_alias;
        copy.set_flag_src(SrcFlags::LOCAL_LOOPBACK);
        copy.clear_flag_dst(DstFlags::WAIT_FOR_LOCAL_LOOPBACK);
        if let Some(node) = dst_node {
            let id = node.node_id();
            copy.dst = NodeHandle::new(id, self.local_aliases.peek_id(id).unwrap_or_default());
            copy.dst_node = Some(node);
        }
        let buffer = if message.has_flag_dst(DstFlags::WAIT_FOR_LOCAL_LOOPBACK) {
            Buffer::chained(copy, message)
        } else {
            Buffer::new(copy)
        };
        self.deliver(buffer);
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Frame(frame) => self.process_frame(frame).await,
            Command::Write { kind, message } => self.write_message(kind, message).await,
            Command::Shutdown => return false,
        }
        true
    }

    /// Processes every queued frame and message, including the ones queued
    /// while processing. Returns the number of commands handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(command) = self.rx.try_recv() {
            handled += 1;
            if !self.handle_command(command).await {
                break;
            }
        }
        handled
    }

    /// Runs the interface until [`CanIfHandle::shutdown`] is called.
    pub async fn run(mut self) {
        info!(pipe = %self.can_pipe.name(), "Interface running");
        while let Some(command) = self.rx.recv().await {
            if !self.handle_command(command).await {
                break;
            }
        }
        info!(pipe = %self.can_pipe.name(), "Interface stopped");
    }
}

impl Drop for CanInterface {
    fn drop(&mut self) {
        self.can_pipe.unregister_member(self.member_id);
    }
}
