//! Read-only projections over the model.

use crate::model::{ConversationHeader, ConversationPayload, Message, Model, User};
use chat_protocol::{Time, Uuid};
use std::collections::{BTreeMap, BTreeSet};

impl Model {
    /// All users, in id order.
    pub fn users(&self) -> impl ExactSizeIterator<Item = &User> {
        self.users.values()
    }

    /// All conversation headers, in id order.
    pub fn conversations(&self) -> impl ExactSizeIterator<Item = &ConversationHeader> {
        self.conversations.values()
    }

    /// Payloads for the given ids, in request order; unknown ids are omitted
    /// silently.
    pub fn conversation_payloads(&self, ids: &[Uuid]) -> Vec<&ConversationPayload> {
        ids.iter().filter_map(|id| self.payloads.get(id)).collect()
    }

    /// Messages for the given ids, in request order; unknown ids are omitted
    /// silently.
    pub fn messages(&self, ids: &[Uuid]) -> Vec<&Message> {
        ids.iter().filter_map(|id| self.messages.get(id)).collect()
    }

    pub fn find_user(&self, id: Uuid) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn find_conversation(&self, id: Uuid) -> Option<&ConversationHeader> {
        self.conversations.get(&id)
    }

    pub fn find_message(&self, id: Uuid) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// The user's conversations of interest; empty for an unknown user.
    pub fn conversation_interests(&self, user: Uuid) -> BTreeSet<Uuid> {
        self.conversation_interests
            .get(&user)
            .cloned()
            .unwrap_or_default()
    }

    /// The user's followed users; empty for an unknown user.
    pub fn user_interests(&self, user: Uuid) -> BTreeSet<Uuid> {
        self.user_interests.get(&user).cloned().unwrap_or_default()
    }

    /// Last recorded status-update time, or `Time::ZERO` if never recorded.
    pub fn last_status_update(&self, user: Uuid) -> Time {
        self.status
            .get(&user)
            .map(|s| s.last_update)
            .unwrap_or(Time::ZERO)
    }

    /// Unseen-message count for `(user, conversation)`; 0 if absent.
    pub fn unseen_messages_count(&self, user: Uuid, conversation: Uuid) -> i32 {
        self.status
            .get(&user)
            .and_then(|s| s.unseen.get(&conversation).copied())
            .unwrap_or(0)
    }

    /// Conversations with activity since the user's last status update.
    ///
    /// Covers every conversation in the user's conversation-interest set and
    /// every conversation owned by a followed user.  Each entry maps the
    /// conversation to the creation time of its newest message, provided
    /// that time is strictly after the user's last status update;
    /// conversations with no such message are omitted.
    pub fn updated_conversations(&self, user: Uuid) -> BTreeMap<Uuid, Time> {
        let since = self.last_status_update(user);
        let mut tracked: BTreeSet<Uuid> = self
            .conversation_interests
            .get(&user)
            .cloned()
            .unwrap_or_default();
        if let Some(followed) = self.user_interests.get(&user) {
            for conversation in self.conversations.values() {
                if followed.contains(&conversation.owner) {
                    tracked.insert(conversation.id);
                }
            }
        }

        let mut updated = BTreeMap::new();
        for conversation in tracked {
            // The newest message is the tail of the conversation's list.
            let Some(payload) = self.payloads.get(&conversation) else {
                continue;
            };
            let Some(newest) = self.messages.get(&payload.last_message) else {
                continue;
            };
            if newest.creation > since {
                updated.insert(conversation, newest.creation);
            }
        }
        updated
    }

    /// The access bits for `(conversation, user)`; 0 if absent.
    pub fn user_access_control(&self, conversation: Uuid, user: Uuid) -> u8 {
        self.access
            .get(&(conversation, user))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Controller;
    use crate::journal::JournalWriter;
    use tempfile::NamedTempFile;

    fn test_controller() -> (Controller, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp journal");
        let writer = JournalWriter::open(file.path()).expect("open journal");
        (Controller::new(1, writer), file)
    }

    #[test]
    fn unknown_ids_are_omitted_from_batch_lookups() {
        let (mut hub, _file) = test_controller();
        let alice = hub.new_user("alice").unwrap();
        let conv = hub.new_conversation("general", alice.id).unwrap().unwrap();
        let msg = hub.new_message(alice.id, conv.id, "hi").unwrap().unwrap();

        let model = hub.model();
        let ghost = Uuid::new(9, 9);
        assert_eq!(model.messages(&[ghost, msg.id]).len(), 1);
        assert_eq!(model.conversation_payloads(&[conv.id, ghost]).len(), 1);
    }

    #[test]
    fn interest_sets_are_empty_for_unknown_users() {
        let (hub, _file) = test_controller();
        let stranger = Uuid::new(5, 5);
        assert!(hub.model().conversation_interests(stranger).is_empty());
        assert!(hub.model().user_interests(stranger).is_empty());
    }

    #[test]
    fn status_defaults_are_zero() {
        let (hub, _file) = test_controller();
        let stranger = Uuid::new(5, 5);
        assert_eq!(hub.model().last_status_update(stranger), Time::ZERO);
        assert_eq!(
            hub.model().unseen_messages_count(stranger, Uuid::new(5, 6)),
            0
        );
        assert_eq!(
            hub.model().user_access_control(Uuid::new(5, 6), stranger),
            0
        );
    }

    #[test]
    fn updated_conversations_tracks_interest_set() {
        let (mut hub, _file) = test_controller();
        let alice = hub.new_user("alice").unwrap();
        let bob = hub.new_user("bob").unwrap();
        let conv = hub.new_conversation("general", bob.id).unwrap().unwrap();

        hub.new_conversation_interest(alice.id, conv.id).unwrap();
        assert!(hub.model().updated_conversations(alice.id).is_empty());

        let msg = hub.new_message(bob.id, conv.id, "news").unwrap().unwrap();
        let updated = hub.model().updated_conversations(alice.id);
        assert_eq!(updated.get(&conv.id), Some(&msg.creation));
    }

    #[test]
    fn updated_conversations_tracks_followed_owners() {
        let (mut hub, _file) = test_controller();
        let alice = hub.new_user("alice").unwrap();
        let bob = hub.new_user("bob").unwrap();
        let conv = hub.new_conversation("bobs corner", bob.id).unwrap().unwrap();
        hub.new_user_interest(alice.id, bob.id).unwrap();

        let msg = hub.new_message(bob.id, conv.id, "hello").unwrap().unwrap();
        let updated = hub.model().updated_conversations(alice.id);
        assert_eq!(updated.get(&conv.id), Some(&msg.creation));
    }

    #[test]
    fn updated_conversations_respects_last_status_update() {
        let (mut hub, _file) = test_controller();
        let alice = hub.new_user("alice").unwrap();
        let conv = hub.new_conversation("general", alice.id).unwrap().unwrap();
        hub.new_conversation_interest(alice.id, conv.id).unwrap();
        let msg = hub.new_message(alice.id, conv.id, "old").unwrap().unwrap();

        // Caught up: the newest message is not after the status update.
        hub.update_last_status_update(alice.id, msg.creation);
        assert!(hub.model().updated_conversations(alice.id).is_empty());
    }
}
