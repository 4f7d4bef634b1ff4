//! Session id allocation and session cache management.
use crate::layers::pchip::{SessionSlot, SoftSessionCache};
use crate::os::HashMap;
use crate::prelude::*;

use lru::LruCache;
use std::collections::VecDeque;

/// Identifies an open session on the server side.
pub type SessionId = usize;

/// Hands out session ids and keeps the P chip's session cache filled with
/// the keys of the sessions in use.
///
/// The session cache only has a few slots, while any number of sessions may
/// be open. The allocator keeps every session's processed key and loads it
/// into a slot on demand, evicting the least recently used session.
pub struct SessionAllocator {
    cache: Arc<SoftSessionCache>,
    /// Sessions currently loaded in the session cache, by recency.
    cached: LruCache<SessionId, SessionSlot>,
    free_slots: Vec<SessionSlot>,
    /// Processed keys of all open sessions.
    session_table: HashMap<SessionId, Vec<u8>>,
    released_ids: VecDeque<SessionId>,
    next_id: SessionId,
}

impl SessionAllocator {
    pub fn new(cache: Arc<SoftSessionCache>) -> Self {
        let capacity = cache.capacity();
        Self {
            cached: LruCache::unbounded(),
            free_slots: (0..capacity).rev().collect(),
            session_table: HashMap::new(),
            released_ids: VecDeque::new(),
            next_id: 0,
            cache,
        }
    }

    /// Opens a session for a client's session key, encrypted under the P
    /// chip's endorsement key.
    ///
    /// Released ids are reused before new ones are drawn.
    pub fn new_id(&mut self, encrypted_session_key: &[u8]) -> Result<SessionId> {
        let processed_key = self.cache.process_key(encrypted_session_key)?;
        let session_id = match self.released_ids.pop_front() {
            Some(session_id) => session_id,
            None => {
                self.next_id += 1;
                self.next_id - 1
            }
        };
        self.session_table.insert(session_id, processed_key);
        debug!("[SessionAllocator] open session {}", session_id);
        Ok(session_id)
    }

    /// Closes a session; its id may be handed out again.
    pub fn release_id(&mut self, session_id: SessionId) -> Result<()> {
        if self.session_table.remove(&session_id).is_none() {
            return_errno_with_msg!(SessionNotFound, "releasing an unknown session");
        }
        if let Some(slot) = self.cached.pop(&session_id) {
            self.cache.unload(slot)?;
            self.free_slots.push(slot);
        }
        self.released_ids.push_back(session_id);
        debug!("[SessionAllocator] close session {}", session_id);
        Ok(())
    }

    /// The session cache slot holding `session_id`'s key, loading the key
    /// first if needed.
    pub fn session_cache_entry(&mut self, session_id: SessionId) -> Result<SessionSlot> {
        if let Some(&slot) = self.cached.get(&session_id) {
            return Ok(slot);
        }
        let Some(processed_key) = self.session_table.get(&session_id) else {
            return_errno_with_msg!(SessionNotFound, "no such session");
        };

        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                let Some((victim, slot)) = self.cached.pop_lru() else {
                    return_errno_with_msg!(InvalidSlot, "session cache has no slots");
                };
                trace!(
                    "[SessionAllocator] session {} leaves slot {}",
                    victim,
                    slot
                );
                slot
            }
        };
        if let Err(e) = self.cache.load(slot, processed_key) {
            self.free_slots.push(slot);
            return Err(e);
        }
        self.cached.put(session_id, slot);
        Ok(slot)
    }

    pub fn session_count(&self) -> usize {
        self.session_table.len()
    }

    pub fn is_open(&self, session_id: SessionId) -> bool {
        self.session_table.contains_key(&session_id)
    }
}

impl Debug for SessionAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAllocator")
            .field("open_sessions", &self.session_table.len())
            .field("cached_sessions", &self.cached.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
