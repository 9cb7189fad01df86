//! In-memory store of users, conversations, messages, interests, access
//! bits, and per-user status.
//!
//! All indices are ordered maps keyed by `Uuid` so enumeration order is
//! deterministic and identical after a journal replay — responses must match
//! byte-for-byte across a restart.
//!
//! Messages form a doubly-linked list per conversation, insertion-ordered:
//! `first == NULL` iff the conversation has never received a message;
//! otherwise `prev(first) == NULL`, `next(last) == NULL`, and walking `next`
//! from `first` enumerates every message in creation order.

use chat_protocol::{Time, Uuid};
use std::collections::{BTreeMap, BTreeSet};

/// Per-`(conversation, user)` access bits.
pub mod access {
    pub const MEMBER: u8 = 0x1;
    pub const OWNER: u8 = 0x2;
    pub const CREATOR: u8 = 0x4;
    pub const REMOVED: u8 = 0x8;

    pub fn is_member(bits: u8) -> bool {
        bits & MEMBER != 0
    }

    pub fn is_owner(bits: u8) -> bool {
        bits & OWNER != 0
    }

    pub fn is_creator(bits: u8) -> bool {
        bits & CREATOR != 0
    }

    pub fn is_removed(bits: u8) -> bool {
        bits & REMOVED != 0
    }
}

/// Created exactly once; never mutated; never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub creation: Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHeader {
    pub id: Uuid,
    pub owner: Uuid,
    pub title: String,
    pub creation: Time,
}

/// The mutable half of a conversation: ids of the first and last message in
/// its linked list.  Both are `NULL` until the first message arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPayload {
    pub id: Uuid,
    pub first_message: Uuid,
    pub last_message: Uuid,
}

impl ConversationPayload {
    pub fn empty(id: Uuid) -> ConversationPayload {
        ConversationPayload {
            id,
            first_message: Uuid::NULL,
            last_message: Uuid::NULL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub author: Uuid,
    pub conversation: Uuid,
    pub content: String,
    pub creation: Time,
    pub prev: Uuid,
    pub next: Uuid,
}

/// Volatile per-user status; not journaled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStatus {
    pub last_update: Time,
    /// Client-supplied absolute unseen counts per conversation.
    pub unseen: BTreeMap<Uuid, i32>,
    /// Last-seen times recorded by the client per conversation of interest.
    pub updated: BTreeMap<Uuid, Time>,
}

/// The authoritative single-writer store.  Reads go through the view
/// methods; writes go through the `Controller`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Model {
    pub(crate) users: BTreeMap<Uuid, User>,
    pub(crate) conversations: BTreeMap<Uuid, ConversationHeader>,
    pub(crate) payloads: BTreeMap<Uuid, ConversationPayload>,
    pub(crate) messages: BTreeMap<Uuid, Message>,
    pub(crate) conversation_interests: BTreeMap<Uuid, BTreeSet<Uuid>>,
    pub(crate) user_interests: BTreeMap<Uuid, BTreeSet<Uuid>>,
    pub(crate) access: BTreeMap<(Uuid, Uuid), u8>,
    pub(crate) status: BTreeMap<Uuid, UserStatus>,
}

impl Model {
    pub fn new() -> Model {
        Model::default()
    }

    /// True when the id names any entity of any kind.  UUIDs are globally
    /// unique within a server, across entity kinds.
    pub fn knows_id(&self, id: Uuid) -> bool {
        self.users.contains_key(&id)
            || self.conversations.contains_key(&id)
            || self.messages.contains_key(&id)
    }
}
