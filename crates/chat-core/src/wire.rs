//! Wire encodings for model entities.
//!
//! Field order is frozen and shared with clients; changing it is a protocol
//! break.

use crate::model::{ConversationHeader, ConversationPayload, Message, User};
use chat_protocol::{Time, Uuid, Wire, WireError};
use tokio::io::AsyncRead;

impl Wire for User {
    fn put(&self, buf: &mut Vec<u8>) {
        self.id.put(buf);
        self.name.put(buf);
        self.creation.put(buf);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        Ok(User {
            id: Uuid::read(r).await?,
            name: String::read(r).await?,
            creation: Time::read(r).await?,
        })
    }
}

impl Wire for ConversationHeader {
    fn put(&self, buf: &mut Vec<u8>) {
        self.id.put(buf);
        self.owner.put(buf);
        self.title.put(buf);
        self.creation.put(buf);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        Ok(ConversationHeader {
            id: Uuid::read(r).await?,
            owner: Uuid::read(r).await?,
            title: String::read(r).await?,
            creation: Time::read(r).await?,
        })
    }
}

impl Wire for ConversationPayload {
    fn put(&self, buf: &mut Vec<u8>) {
        self.id.put(buf);
        self.first_message.put(buf);
        self.last_message.put(buf);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        Ok(ConversationPayload {
            id: Uuid::read(r).await?,
            first_message: Uuid::read(r).await?,
            last_message: Uuid::read(r).await?,
        })
    }
}

impl Wire for Message {
    fn put(&self, buf: &mut Vec<u8>) {
        self.id.put(buf);
        self.author.put(buf);
        self.conversation.put(buf);
        self.content.put(buf);
        self.creation.put(buf);
        self.prev.put(buf);
        self.next.put(buf);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        Ok(Message {
            id: Uuid::read(r).await?,
            author: Uuid::read(r).await?,
            conversation: Uuid::read(r).await?,
            content: String::read(r).await?,
            creation: Time::read(r).await?,
            prev: Uuid::read(r).await?,
            next: Uuid::read(r).await?,
        })
    }
}
