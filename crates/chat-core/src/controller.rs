//! All model mutations.
//!
//! Every live mutation appends exactly one journal record before returning.
//! The `replay_*` entrypoints apply externally supplied ids and times (from
//! the journal or the relay), never journal, and keep the identity counter
//! ahead of any id they record.

use crate::error::CoreError;
use crate::ident::IdentityGen;
use crate::journal::{JournalWriter, Record};
use crate::model::{
    ConversationHeader, ConversationPayload, Message, Model, User, UserStatus, access,
};
use chat_protocol::{Time, Uuid};
use std::collections::{BTreeMap, BTreeSet};

pub struct Controller {
    model: Model,
    ids: IdentityGen,
    journal: JournalWriter,
}

impl Controller {
    pub fn new(generator: u32, journal: JournalWriter) -> Controller {
        Controller {
            model: Model::new(),
            ids: IdentityGen::new(generator),
            journal,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn generator(&self) -> u32 {
        self.ids.generator()
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn new_user(&mut self, name: &str) -> Result<User, CoreError> {
        let id = self.ids.next();
        let creation = Time::now();
        let user = User {
            id,
            name: name.to_owned(),
            creation,
        };
        self.model.users.insert(id, user.clone());
        self.journal.append(&Record::AddUser {
            id,
            name: name.to_owned(),
            time: creation,
        })?;
        Ok(user)
    }

    pub fn replay_user(&mut self, id: Uuid, name: &str, creation: Time) -> Result<(), CoreError> {
        if self.model.knows_id(id) {
            return Err(CoreError::Duplicate(id));
        }
        self.ids.observe(id);
        self.model.users.insert(
            id,
            User {
                id,
                name: name.to_owned(),
                creation,
            },
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Create a conversation owned by `owner`, granting the owner the
    /// creator, owner, and member bits (one journal record each, after the
    /// conversation's own record).  `None` if the owner is unknown.
    pub fn new_conversation(
        &mut self,
        title: &str,
        owner: Uuid,
    ) -> Result<Option<ConversationHeader>, CoreError> {
        if !self.model.users.contains_key(&owner) {
            return Ok(None);
        }
        let id = self.ids.next();
        let creation = Time::now();
        let header = ConversationHeader {
            id,
            owner,
            title: title.to_owned(),
            creation,
        };
        self.model.conversations.insert(id, header.clone());
        self.model.payloads.insert(id, ConversationPayload::empty(id));
        self.journal.append(&Record::AddConversation {
            id,
            owner,
            title: title.to_owned(),
            time: creation,
        })?;
        self.toggle_creator_bit(id, owner, true)?;
        self.toggle_owner_bit(id, owner, true)?;
        self.toggle_member_bit(id, owner, true)?;
        Ok(Some(header))
    }

    pub fn replay_conversation(
        &mut self,
        id: Uuid,
        owner: Uuid,
        title: &str,
        creation: Time,
    ) -> Result<(), CoreError> {
        if self.model.knows_id(id) {
            return Err(CoreError::Duplicate(id));
        }
        if !self.model.users.contains_key(&owner) {
            return Err(CoreError::UnknownEntity(owner));
        }
        self.ids.observe(id);
        self.model.conversations.insert(
            id,
            ConversationHeader {
                id,
                owner,
                title: title.to_owned(),
                creation,
            },
        );
        self.model.payloads.insert(id, ConversationPayload::empty(id));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Append a message to its conversation's linked list.  `None` if the
    /// author or conversation is unknown.
    pub fn new_message(
        &mut self,
        author: Uuid,
        conversation: Uuid,
        content: &str,
    ) -> Result<Option<Message>, CoreError> {
        if !self.model.users.contains_key(&author)
            || !self.model.conversations.contains_key(&conversation)
        {
            return Ok(None);
        }
        let id = self.ids.next();
        let creation = Time::now();
        let message = self.attach_message(Message {
            id,
            author,
            conversation,
            content: content.to_owned(),
            creation,
            prev: Uuid::NULL,
            next: Uuid::NULL,
        });
        self.journal.append(&Record::AddMessage {
            id,
            author,
            conversation,
            content: content.to_owned(),
            time: creation,
        })?;
        Ok(Some(message))
    }

    pub fn replay_message(
        &mut self,
        id: Uuid,
        author: Uuid,
        conversation: Uuid,
        content: &str,
        creation: Time,
    ) -> Result<(), CoreError> {
        if self.model.knows_id(id) {
            return Err(CoreError::Duplicate(id));
        }
        if !self.model.users.contains_key(&author) {
            return Err(CoreError::UnknownEntity(author));
        }
        if !self.model.conversations.contains_key(&conversation) {
            return Err(CoreError::UnknownEntity(conversation));
        }
        self.ids.observe(id);
        self.attach_message(Message {
            id,
            author,
            conversation,
            content: content.to_owned(),
            creation,
            prev: Uuid::NULL,
            next: Uuid::NULL,
        });
        Ok(())
    }

    /// Link a message at the tail of its conversation and index it.  Callers
    /// have already checked that the conversation exists.
    fn attach_message(&mut self, mut message: Message) -> Message {
        let model = &mut self.model;
        if let Some(payload) = model.payloads.get_mut(&message.conversation) {
            if payload.first_message.is_null() {
                payload.first_message = message.id;
            } else if let Some(tail) = model.messages.get_mut(&payload.last_message) {
                tail.next = message.id;
                message.prev = tail.id;
            }
            payload.last_message = message.id;
        }
        model.messages.insert(message.id, message.clone());
        message
    }

    // -----------------------------------------------------------------------
    // Interests
    // -----------------------------------------------------------------------

    pub fn new_user_interest(
        &mut self,
        user: Uuid,
        followed: Uuid,
    ) -> Result<BTreeSet<Uuid>, CoreError> {
        let set = self.apply_user_interest(user, followed, true);
        self.journal
            .append(&Record::AddInterestUser { user, followed })?;
        Ok(set)
    }

    pub fn remove_user_interest(
        &mut self,
        user: Uuid,
        followed: Uuid,
    ) -> Result<BTreeSet<Uuid>, CoreError> {
        let set = self.apply_user_interest(user, followed, false);
        self.journal
            .append(&Record::RemoveInterestUser { user, followed })?;
        Ok(set)
    }

    pub fn new_conversation_interest(
        &mut self,
        user: Uuid,
        conversation: Uuid,
    ) -> Result<BTreeSet<Uuid>, CoreError> {
        let set = self.apply_conversation_interest(user, conversation, true);
        self.journal
            .append(&Record::AddInterestConversation { user, conversation })?;
        Ok(set)
    }

    pub fn remove_conversation_interest(
        &mut self,
        user: Uuid,
        conversation: Uuid,
    ) -> Result<BTreeSet<Uuid>, CoreError> {
        let set = self.apply_conversation_interest(user, conversation, false);
        self.journal
            .append(&Record::RemoveInterestConversation { user, conversation })?;
        Ok(set)
    }

    fn apply_user_interest(&mut self, user: Uuid, followed: Uuid, add: bool) -> BTreeSet<Uuid> {
        let set = self.model.user_interests.entry(user).or_default();
        if add {
            set.insert(followed);
        } else {
            set.remove(&followed);
        }
        set.clone()
    }

    fn apply_conversation_interest(
        &mut self,
        user: Uuid,
        conversation: Uuid,
        add: bool,
    ) -> BTreeSet<Uuid> {
        let set = self.model.conversation_interests.entry(user).or_default();
        if add {
            set.insert(conversation);
        } else {
            set.remove(&conversation);
        }
        set.clone()
    }

    // -----------------------------------------------------------------------
    // Access bits
    // -----------------------------------------------------------------------

    pub fn toggle_member_bit(
        &mut self,
        conversation: Uuid,
        user: Uuid,
        flag: bool,
    ) -> Result<u8, CoreError> {
        let bits = self.apply_access_bit(conversation, user, access::MEMBER, flag);
        let record = if flag {
            Record::AddConvoMember { conversation, user }
        } else {
            Record::RemoveConvoMember { conversation, user }
        };
        self.journal.append(&record)?;
        Ok(bits)
    }

    pub fn toggle_owner_bit(
        &mut self,
        conversation: Uuid,
        user: Uuid,
        flag: bool,
    ) -> Result<u8, CoreError> {
        let bits = self.apply_access_bit(conversation, user, access::OWNER, flag);
        let record = if flag {
            Record::AddConvoOwner { conversation, user }
        } else {
            Record::RemoveConvoOwner { conversation, user }
        };
        self.journal.append(&record)?;
        Ok(bits)
    }

    pub fn toggle_creator_bit(
        &mut self,
        conversation: Uuid,
        user: Uuid,
        flag: bool,
    ) -> Result<u8, CoreError> {
        let bits = self.apply_access_bit(conversation, user, access::CREATOR, flag);
        let record = if flag {
            Record::AddConvoCreator { conversation, user }
        } else {
            Record::RemoveConvoCreator { conversation, user }
        };
        self.journal.append(&record)?;
        Ok(bits)
    }

    /// Flip the sticky removed flag.
    pub fn toggle_removed_bit(&mut self, conversation: Uuid, user: Uuid) -> Result<u8, CoreError> {
        let bits = self.flip_removed_bit(conversation, user);
        self.journal
            .append(&Record::RemoveConvoToggle { conversation, user })?;
        Ok(bits)
    }

    fn apply_access_bit(&mut self, conversation: Uuid, user: Uuid, mask: u8, flag: bool) -> u8 {
        let bits = self.model.access.entry((conversation, user)).or_insert(0);
        if flag {
            *bits |= mask;
        } else {
            *bits &= !mask;
        }
        *bits
    }

    fn flip_removed_bit(&mut self, conversation: Uuid, user: Uuid) -> u8 {
        let bits = self.model.access.entry((conversation, user)).or_insert(0);
        *bits ^= access::REMOVED;
        *bits
    }

    // -----------------------------------------------------------------------
    // Status (volatile, not journaled)
    // -----------------------------------------------------------------------

    /// Record a status-update time; returns the previous value.
    pub fn update_last_status_update(&mut self, user: Uuid, time: Time) -> Time {
        let status = self.status_entry(user);
        std::mem::replace(&mut status.last_update, time)
    }

    /// Store a client-supplied absolute unseen count; returns the new value.
    pub fn update_unseen_count(&mut self, user: Uuid, conversation: Uuid, count: i32) -> i32 {
        self.status_entry(user).unseen.insert(conversation, count);
        count
    }

    /// Record a last-seen time for a conversation of interest; returns the
    /// resulting map.
    pub fn record_updated_conversation(
        &mut self,
        user: Uuid,
        conversation: Uuid,
        time: Time,
    ) -> BTreeMap<Uuid, Time> {
        let status = self.status_entry(user);
        status.updated.insert(conversation, time);
        status.updated.clone()
    }

    fn status_entry(&mut self, user: Uuid) -> &mut UserStatus {
        self.model.status.entry(user).or_default()
    }

    // -----------------------------------------------------------------------
    // Journal replay dispatch
    // -----------------------------------------------------------------------

    /// Apply one journal record without journaling it again.
    pub fn replay(&mut self, record: Record) -> Result<(), CoreError> {
        match record {
            Record::AddUser { id, name, time } => self.replay_user(id, &name, time),
            Record::AddConversation { id, owner, title, time } => {
                self.replay_conversation(id, owner, &title, time)
            }
            Record::AddMessage { id, author, conversation, content, time } => {
                self.replay_message(id, author, conversation, &content, time)
            }
            Record::AddInterestUser { user, followed } => {
                self.apply_user_interest(user, followed, true);
                Ok(())
            }
            Record::RemoveInterestUser { user, followed } => {
                self.apply_user_interest(user, followed, false);
                Ok(())
            }
            Record::AddInterestConversation { user, conversation } => {
                self.apply_conversation_interest(user, conversation, true);
                Ok(())
            }
            Record::RemoveInterestConversation { user, conversation } => {
                self.apply_conversation_interest(user, conversation, false);
                Ok(())
            }
            Record::AddConvoCreator { conversation, user } => {
                self.apply_access_bit(conversation, user, access::CREATOR, true);
                Ok(())
            }
            Record::RemoveConvoCreator { conversation, user } => {
                self.apply_access_bit(conversation, user, access::CREATOR, false);
                Ok(())
            }
            Record::AddConvoOwner { conversation, user } => {
                self.apply_access_bit(conversation, user, access::OWNER, true);
                Ok(())
            }
            Record::RemoveConvoOwner { conversation, user } => {
                self.apply_access_bit(conversation, user, access::OWNER, false);
                Ok(())
            }
            Record::AddConvoMember { conversation, user } => {
                self.apply_access_bit(conversation, user, access::MEMBER, true);
                Ok(())
            }
            Record::RemoveConvoMember { conversation, user } => {
                self.apply_access_bit(conversation, user, access::MEMBER, false);
                Ok(())
            }
            Record::RemoveConvoToggle { conversation, user } => {
                self.flip_removed_bit(conversation, user);
                Ok(())
            }
        }
    }
}
