//! Relay bundle value types.
//!
//! A bundle describes one remote event as three components — the authoring
//! user, the containing conversation, and the message itself — each carried
//! as a `(id, text, time)` pack.  The receiving server materializes any
//! component whose id it has not seen.

use crate::codec::Wire;
use crate::error::WireError;
use crate::types::{Time, Uuid};
use tokio::io::AsyncRead;

/// One component of a bundle: an identity, its textual payload (user name,
/// conversation title, or message content), and its creation instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pack {
    pub id: Uuid,
    pub text: String,
    pub time: Time,
}

impl Wire for Pack {
    fn put(&self, buf: &mut Vec<u8>) {
        self.id.put(buf);
        self.text.put(buf);
        self.time.put(buf);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        Ok(Pack {
            id: Uuid::read(r).await?,
            text: String::read(r).await?,
            time: Time::read(r).await?,
        })
    }
}

/// A relay-delivered event: the bundle's own id (the read cursor value) plus
/// its user, conversation, and message components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub id: Uuid,
    pub user: Pack,
    pub conversation: Pack,
    pub message: Pack,
}

impl Wire for Bundle {
    fn put(&self, buf: &mut Vec<u8>) {
        self.id.put(buf);
        self.user.put(buf);
        self.conversation.put(buf);
        self.message.put(buf);
    }

    async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        Ok(Bundle {
            id: Uuid::read(r).await?,
            user: Pack::read(r).await?,
            conversation: Pack::read(r).await?,
            message: Pack::read(r).await?,
        })
    }
}
