//! Node cache commands, as sent to a hardware P chip.
//!
//! # Format
//!
//! Every command starts with a 1-byte opcode. Multi-byte fields are
//! big-endian; node ids take 24 bits, slots 16 bits.
//!
//! ```text
//! Load:        00 | node_id:3 | node_hash:32 | slot:2 | old_parent_slot:2
//! Verify:      01 | right_slot:2 | left_slot:2 | parent_slot:2
//! Update:      02 | session:2 | count:1 | slot:2 * count | new_leaf_hash:32
//! Certify:     03 | session:2 | nonce:16 | slot:2
//! SetRootHash: 05 | root_hash:32
//! ```
//!
//! A response is a status byte, 0 on success or an errno code, followed on
//! success by the payload: the MAC for `Certify`, a count byte and that many
//! digests for `Update`, nothing otherwise.
use super::node_cache::{NodeCache, SlotId, SoftNodeCache};
use super::session_cache::SessionSlot;
use crate::error::Errno;
use crate::layers::crypto::{Digest, Mac, Nonce};
use crate::layers::merkle::{full_tree_leaf_count, NodeId};
use crate::prelude::*;

/// Largest node id a command can carry.
pub const MAX_NODE_ID: NodeId = (1 << 24) - 1;

/// The first byte of a command.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Load = 0x00,
    Verify = 0x01,
    Update = 0x02,
    Certify = 0x03,
    SetRootHash = 0x05,
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Opcode::Load),
            0x01 => Ok(Opcode::Verify),
            0x02 => Ok(Opcode::Update),
            0x03 => Ok(Opcode::Certify),
            0x05 => Ok(Opcode::SetRootHash),
            _ => Err(Error::with_msg(InvalidArgs, "unknown node cache opcode")),
        }
    }
}

/// One node cache operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// The wire has no absent slot; `old_parent_slot: None` travels as
    /// slot 0, which the cache only looks at when evicting a verified node.
    Load {
        slot: SlotId,
        node_id: NodeId,
        node_hash: Digest,
        old_parent_slot: Option<SlotId>,
    },
    Verify {
        parent_slot: SlotId,
        left_slot: SlotId,
        right_slot: SlotId,
    },
    Update {
        session: SessionSlot,
        update_path: Vec<SlotId>,
        new_leaf_hash: Digest,
    },
    Certify {
        session: SessionSlot,
        nonce: Nonce,
        slot: SlotId,
    },
    SetRootHash {
        root_hash: Digest,
    },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Load { .. } => Opcode::Load,
            Command::Verify { .. } => Opcode::Verify,
            Command::Update { .. } => Opcode::Update,
            Command::Certify { .. } => Opcode::Certify,
            Command::SetRootHash { .. } => Opcode::SetRootHash,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![self.opcode() as u8];
        match self {
            Command::Load {
                slot,
                node_id,
                node_hash,
                old_parent_slot,
            } => {
                put_node_id(&mut buf, *node_id)?;
                buf.extend_from_slice(node_hash);
                put_u16(&mut buf, *slot)?;
                put_u16(&mut buf, old_parent_slot.unwrap_or(0))?;
            }
            Command::Verify {
                parent_slot,
                left_slot,
                right_slot,
            } => {
                put_u16(&mut buf, *right_slot)?;
                put_u16(&mut buf, *left_slot)?;
                put_u16(&mut buf, *parent_slot)?;
            }
            Command::Update {
                session,
                update_path,
                new_leaf_hash,
            } => {
                put_u16(&mut buf, *session)?;
                let count = u8::try_from(update_path.len())
                    .map_err(|_| Error::with_msg(InvalidUpdatePath, "update path too long"))?;
                buf.push(count);
                for slot in update_path {
                    put_u16(&mut buf, *slot)?;
                }
                buf.extend_from_slice(new_leaf_hash);
            }
            Command::Certify {
                session,
                nonce,
                slot,
            } => {
                put_u16(&mut buf, *session)?;
                buf.extend_from_slice(nonce);
                put_u16(&mut buf, *slot)?;
            }
            Command::SetRootHash { root_hash } => {
                buf.extend_from_slice(root_hash);
            }
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let command = match Opcode::try_from(reader.u8()?)? {
            Opcode::Load => {
                let node_id = reader.node_id()?;
                let node_hash = reader.digest()?;
                let slot = reader.u16()?;
                let old_parent_slot = Some(reader.u16()?);
                Command::Load {
                    slot,
                    node_id,
                    node_hash,
                    old_parent_slot,
                }
            }
            Opcode::Verify => {
                let right_slot = reader.u16()?;
                let left_slot = reader.u16()?;
                let parent_slot = reader.u16()?;
                Command::Verify {
                    parent_slot,
                    left_slot,
                    right_slot,
                }
            }
            Opcode::Update => {
                let session = reader.u16()?;
                let count = reader.u8()? as usize;
                let update_path = (0..count)
                    .map(|_| reader.u16())
                    .collect::<Result<Vec<_>>>()?;
                let new_leaf_hash = reader.digest()?;
                Command::Update {
                    session,
                    update_path,
                    new_leaf_hash,
                }
            }
            Opcode::Certify => {
                let session = reader.u16()?;
                let nonce = Nonce::from_slice(reader.take(Nonce::SIZE)?)?;
                let slot = reader.u16()?;
                Command::Certify {
                    session,
                    nonce,
                    slot,
                }
            }
            Opcode::SetRootHash => Command::SetRootHash {
                root_hash: reader.digest()?,
            },
        };
        Ok(command)
    }
}

fn put_u16(buf: &mut Vec<u8>, value: usize) -> Result<()> {
    let value = u16::try_from(value)
        .map_err(|_| Error::with_msg(InvalidSlot, "slot does not fit in 16 bits"))?;
    buf.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn put_node_id(buf: &mut Vec<u8>, node_id: NodeId) -> Result<()> {
    if node_id > MAX_NODE_ID {
        return_errno_with_msg!(InvalidNodeId, "node id does not fit in 24 bits");
    }
    buf.extend_from_slice(&(node_id as u32).to_be_bytes()[1..]);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.bytes.len() {
            return_errno_with_msg!(InvalidArgs, "truncated node cache message");
        }
        let bytes = self.bytes;
        let field = &bytes[self.pos..end];
        self.pos = end;
        Ok(field)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<usize> {
        let field = self.take(2)?;
        Ok(u16::from_be_bytes([field[0], field[1]]) as usize)
    }

    fn node_id(&mut self) -> Result<NodeId> {
        let field = self.take(3)?;
        Ok(u32::from_be_bytes([0, field[0], field[1], field[2]]) as NodeId)
    }

    fn digest(&mut self) -> Result<Digest> {
        Digest::from_slice(self.take(Digest::SIZE)?)
    }
}

/// Encodes the outcome of a command into a response.
pub fn encode_response(result: Result<Vec<u8>>) -> Vec<u8> {
    match result {
        Ok(payload) => {
            let mut response = Vec::with_capacity(1 + payload.len());
            response.push(0);
            response.extend_from_slice(&payload);
            response
        }
        Err(e) => vec![e.errno().code()],
    }
}

/// Decodes a response into its payload, or the error it reports.
pub fn decode_response(response: &[u8]) -> Result<Vec<u8>> {
    match response.split_first() {
        Some((0, payload)) => Ok(payload.to_vec()),
        Some((code, _)) => Err(Error::new(Errno::from_code(*code).unwrap_or(IoFailed))),
        None => Err(Error::with_msg(IoFailed, "empty node cache response")),
    }
}

/// A channel to a hardware node cache.
///
/// Sends one encoded command and waits for its response.
pub trait CommandLink: Send + Sync {
    fn transact(&self, request: &[u8]) -> Result<Vec<u8>>;
}

/// A node cache that lives on the other side of a `CommandLink`.
pub struct HardNodeCache<L> {
    capacity: usize,
    leaf_count: usize,
    link: L,
}

impl<L: CommandLink> HardNodeCache<L> {
    pub fn new(capacity: usize, min_leaf_count: usize, link: L) -> Result<Self> {
        if capacity == 0 || capacity > u16::MAX as usize + 1 {
            return_errno_with_msg!(InvalidArgs, "node cache capacity does not fit the wire");
        }
        let leaf_count = full_tree_leaf_count(min_leaf_count);
        if 2 * leaf_count - 1 > MAX_NODE_ID {
            return_errno_with_msg!(InvalidArgs, "tree too large for 24-bit node ids");
        }
        Ok(Self {
            capacity,
            leaf_count,
            link,
        })
    }

    fn execute(&self, command: Command) -> Result<Vec<u8>> {
        let request = command.encode()?;
        let response = self.link.transact(&request)?;
        decode_response(&response)
    }
}

impl<L: CommandLink> NodeCache for HardNodeCache<L> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    fn load(
        &self,
        slot: SlotId,
        node_id: NodeId,
        node_hash: &Digest,
        old_parent_slot: Option<SlotId>,
    ) -> Result<()> {
        self.execute(Command::Load {
            slot,
            node_id,
            node_hash: *node_hash,
            old_parent_slot,
        })?;
        Ok(())
    }

    fn verify(&self, parent_slot: SlotId, left_slot: SlotId, right_slot: SlotId) -> Result<()> {
        self.execute(Command::Verify {
            parent_slot,
            left_slot,
            right_slot,
        })?;
        Ok(())
    }

    fn certify(&self, session: SessionSlot, nonce: &Nonce, slot: SlotId) -> Result<Mac> {
        let payload = self.execute(Command::Certify {
            session,
            nonce: *nonce,
            slot,
        })?;
        Mac::from_slice(&payload)
    }

    fn update(
        &self,
        session: SessionSlot,
        update_path: &[SlotId],
        new_leaf_hash: &Digest,
    ) -> Result<Vec<Digest>> {
        let payload = self.execute(Command::Update {
            session,
            update_path: update_path.to_vec(),
            new_leaf_hash: *new_leaf_hash,
        })?;
        let mut reader = Reader::new(&payload);
        let count = reader.u8()? as usize;
        (0..count).map(|_| reader.digest()).collect()
    }

    fn set_root_hash(&self, root_hash: &Digest) -> Result<()> {
        self.execute(Command::SetRootHash {
            root_hash: *root_hash,
        })?;
        Ok(())
    }
}

impl<L> Debug for HardNodeCache<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardNodeCache")
            .field("capacity", &self.capacity)
            .field("leaf_count", &self.leaf_count)
            .finish()
    }
}

/// A `CommandLink` that executes commands on a `SoftNodeCache`, standing in
/// for the FPGA.
pub struct LoopbackLink {
    cache: Arc<SoftNodeCache>,
}

impl LoopbackLink {
    pub fn new(cache: Arc<SoftNodeCache>) -> Self {
        Self { cache }
    }

    fn execute(&self, command: Command) -> Result<Vec<u8>> {
        match command {
            Command::Load {
                slot,
                node_id,
                node_hash,
                old_parent_slot,
            } => self
                .cache
                .load(slot, node_id, &node_hash, old_parent_slot)
                .map(|_| Vec::new()),
            Command::Verify {
                parent_slot,
                left_slot,
                right_slot,
            } => self
                .cache
                .verify(parent_slot, left_slot, right_slot)
                .map(|_| Vec::new()),
            Command::Update {
                session,
                update_path,
                new_leaf_hash,
            } => {
                let new_hashes = self.cache.update(session, &update_path, &new_leaf_hash)?;
                let mut payload = vec![new_hashes.len() as u8];
                new_hashes
                    .iter()
                    .for_each(|hash| payload.extend_from_slice(hash));
                Ok(payload)
            }
            Command::Certify {
                session,
                nonce,
                slot,
            } => self
                .cache
                .certify(session, &nonce, slot)
                .map(|mac| mac.to_vec()),
            Command::SetRootHash { root_hash } => self
                .cache
                .set_root_hash(&root_hash)
                .map(|_| Vec::new()),
        }
    }
}

impl CommandLink for LoopbackLink {
    fn transact(&self, request: &[u8]) -> Result<Vec<u8>> {
        let result = Command::decode(request).and_then(|command| {
            trace!("[LoopbackLink] {:?}", command.opcode());
            self.execute(command)
        });
        Ok(encode_response(result))
    }
}
