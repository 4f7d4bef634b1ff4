//! The layer of the untrusted P chip.
//!
//! The P chip holds the bounded node cache that mirrors the trusted part of
//! the hash tree, the session key cache, and the boot logic that binds both
//! to the S chip's root hash. `SoftPChip` runs everything in software;
//! `HardPChip` drives its node cache through the hardware command codec.

mod boot_logic;
mod command;
mod node_cache;
mod p_chip;
mod session_cache;

pub use self::boot_logic::{BootLogic, BootState};
pub use self::command::{
    decode_response, encode_response, Command, CommandLink, HardNodeCache, LoopbackLink, Opcode,
    MAX_NODE_ID,
};
pub use self::node_cache::{NodeCache, SlotId, SoftNodeCache};
pub use self::p_chip::{HardPChip, PChip, SoftPChip};
pub use self::session_cache::{SessionSlot, SoftSessionCache};
