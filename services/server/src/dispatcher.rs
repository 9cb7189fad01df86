//! Per-connection request dispatch.
//!
//! Every connection carries exactly one request/response pair: read one
//! INTEGER opcode, decode the body per that opcode's schema, perform the
//! controller/view call, write the response opcode and body, close.  An
//! opcode outside the table is answered with a single INTEGER `NO_MESSAGE`.
//!
//! Request kinds are a finite enumeration, so dispatch is one `match` over
//! the opcode constants.  Errors never cross the task boundary: they are
//! logged here and the connection is closed regardless of outcome.

use crate::SharedController;
use crate::relay::OutboundEvent;
use chat_core::{Controller, CoreError};
use chat_protocol::{Pack, Time, Uuid, Wire, WireError, opcodes as op, put_map, put_seq};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
enum ServeError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("response write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Service one connection, then close it no matter what happened.
pub async fn handle_connection<S>(
    controller: SharedController,
    outbound: Option<mpsc::UnboundedSender<OutboundEvent>>,
    mut stream: S,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match serve_request(&controller, outbound.as_ref(), &mut stream).await {
        Ok(()) => {}
        Err(ServeError::Core(error @ CoreError::Journal(_))) => {
            // The model has diverged from durable state.
            error!(%error, "journal append failed, shutting down");
            std::process::exit(1);
        }
        Err(error) => warn!(%error, "connection aborted"),
    }
    let _ = stream.shutdown().await;
}

async fn serve_request<S>(
    controller: &SharedController,
    outbound: Option<&mpsc::UnboundedSender<OutboundEvent>>,
    stream: &mut S,
) -> Result<(), ServeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let opcode = i32::read(stream).await?;
    let response = match opcode {
        op::NEW_MESSAGE_REQUEST => {
            let author = Uuid::read(stream).await?;
            let conversation = Uuid::read(stream).await?;
            let content = String::read(stream).await?;
            let message = controller
                .borrow_mut()
                .new_message(author, conversation, &content)?;
            if let (Some(out), Some(message)) = (outbound, &message) {
                publish_message(&controller.borrow(), out, message);
            }
            let mut buf = reply(op::NEW_MESSAGE_RESPONSE);
            message.put(&mut buf);
            buf
        }
        op::NEW_USER_REQUEST => {
            let name = String::read(stream).await?;
            let user = controller.borrow_mut().new_user(&name)?;
            let mut buf = reply(op::NEW_USER_RESPONSE);
            Some(user).put(&mut buf);
            buf
        }
        op::NEW_CONVERSATION_REQUEST => {
            let title = String::read(stream).await?;
            let owner = Uuid::read(stream).await?;
            let header = controller.borrow_mut().new_conversation(&title, owner)?;
            let mut buf = reply(op::NEW_CONVERSATION_RESPONSE);
            header.put(&mut buf);
            buf
        }
        op::GET_USERS_REQUEST => {
            let mut buf = reply(op::GET_USERS_RESPONSE);
            put_seq(&mut buf, controller.borrow().model().users());
            buf
        }
        op::GET_ALL_CONVERSATIONS_REQUEST => {
            let mut buf = reply(op::GET_ALL_CONVERSATIONS_RESPONSE);
            put_seq(&mut buf, controller.borrow().model().conversations());
            buf
        }
        op::GET_CONVERSATIONS_BY_ID_REQUEST => {
            let ids = Vec::<Uuid>::read(stream).await?;
            let mut buf = reply(op::GET_CONVERSATIONS_BY_ID_RESPONSE);
            let hub = controller.borrow();
            put_seq(&mut buf, hub.model().conversation_payloads(&ids).into_iter());
            drop(hub);
            buf
        }
        op::GET_MESSAGES_BY_ID_REQUEST => {
            let ids = Vec::<Uuid>::read(stream).await?;
            let mut buf = reply(op::GET_MESSAGES_BY_ID_RESPONSE);
            let hub = controller.borrow();
            put_seq(&mut buf, hub.model().messages(&ids).into_iter());
            drop(hub);
            buf
        }
        op::SERVER_INFO_REQUEST => {
            let mut buf = reply(op::SERVER_INFO_RESPONSE);
            crate::SERVER_VERSION.put(&mut buf);
            buf
        }
        op::GET_CONVERSATION_INTERESTS_REQUEST => {
            let user = Uuid::read(stream).await?;
            let interests = controller.borrow().model().conversation_interests(user);
            let mut buf = reply(op::GET_CONVERSATION_INTERESTS_RESPONSE);
            put_seq(&mut buf, interests.iter());
            buf
        }
        op::NEW_CONVERSATION_INTEREST_REQUEST => {
            let user = Uuid::read(stream).await?;
            let conversation = Uuid::read(stream).await?;
            let interests = controller
                .borrow_mut()
                .new_conversation_interest(user, conversation)?;
            let mut buf = reply(op::NEW_CONVERSATION_INTEREST_RESPONSE);
            put_seq(&mut buf, interests.iter());
            buf
        }
        op::REMOVE_CONVERSATION_INTEREST_REQUEST => {
            let user = Uuid::read(stream).await?;
            let conversation = Uuid::read(stream).await?;
            let interests = controller
                .borrow_mut()
                .remove_conversation_interest(user, conversation)?;
            let mut buf = reply(op::REMOVE_CONVERSATION_INTEREST_RESPONSE);
            put_seq(&mut buf, interests.iter());
            buf
        }
        op::GET_USER_INTERESTS_REQUEST => {
            let user = Uuid::read(stream).await?;
            let interests = controller.borrow().model().user_interests(user);
            let mut buf = reply(op::GET_USER_INTERESTS_RESPONSE);
            put_seq(&mut buf, interests.iter());
            buf
        }
        op::NEW_USER_INTEREST_REQUEST => {
            let user = Uuid::read(stream).await?;
            let followed = Uuid::read(stream).await?;
            let interests = controller.borrow_mut().new_user_interest(user, followed)?;
            let mut buf = reply(op::NEW_USER_INTEREST_RESPONSE);
            put_seq(&mut buf, interests.iter());
            buf
        }
        op::REMOVE_USER_INTEREST_REQUEST => {
            let user = Uuid::read(stream).await?;
            let followed = Uuid::read(stream).await?;
            let interests = controller
                .borrow_mut()
                .remove_user_interest(user, followed)?;
            let mut buf = reply(op::REMOVE_USER_INTEREST_RESPONSE);
            put_seq(&mut buf, interests.iter());
            buf
        }
        op::NEW_UPDATED_CONVERSATION_REQUEST => {
            let user = Uuid::read(stream).await?;
            let conversation = Uuid::read(stream).await?;
            let time = Time::read(stream).await?;
            let updated = controller
                .borrow_mut()
                .record_updated_conversation(user, conversation, time);
            let mut buf = reply(op::NEW_UPDATED_CONVERSATION_RESPONSE);
            put_map(&mut buf, updated.iter());
            buf
        }
        op::GET_UPDATED_CONVERSATIONS_REQUEST => {
            let user = Uuid::read(stream).await?;
            let updated = controller.borrow().model().updated_conversations(user);
            let mut buf = reply(op::GET_UPDATED_CONVERSATIONS_RESPONSE);
            put_map(&mut buf, updated.iter());
            buf
        }
        op::UPDATE_USER_LAST_STATUS_UPDATE_REQUEST => {
            let user = Uuid::read(stream).await?;
            let time = Time::read(stream).await?;
            let previous = controller.borrow_mut().update_last_status_update(user, time);
            let mut buf = reply(op::UPDATE_USER_LAST_STATUS_UPDATE_RESPONSE);
            previous.put(&mut buf);
            buf
        }
        op::GET_USER_LAST_STATUS_UPDATE_REQUEST => {
            let user = Uuid::read(stream).await?;
            let time = controller.borrow().model().last_status_update(user);
            let mut buf = reply(op::GET_USER_LAST_STATUS_UPDATE_RESPONSE);
            time.put(&mut buf);
            buf
        }
        op::GET_USER_MESSAGE_COUNT_REQUEST => {
            let user = Uuid::read(stream).await?;
            let conversation = Uuid::read(stream).await?;
            let count = controller
                .borrow()
                .model()
                .unseen_messages_count(user, conversation);
            let mut buf = reply(op::GET_USER_MESSAGE_COUNT_RESPONSE);
            count.put(&mut buf);
            buf
        }
        op::UPDATE_USER_MESSAGE_COUNT_REQUEST => {
            let user = Uuid::read(stream).await?;
            let conversation = Uuid::read(stream).await?;
            let count = i32::read(stream).await?;
            let stored = controller
                .borrow_mut()
                .update_unseen_count(user, conversation, count);
            let mut buf = reply(op::UPDATE_USER_MESSAGE_COUNT_RESPONSE);
            stored.put(&mut buf);
            buf
        }
        op::TOGGLE_MEMBER_BIT_REQUEST => {
            let conversation = Uuid::read(stream).await?;
            let user = Uuid::read(stream).await?;
            let flag = bool::read(stream).await?;
            let bits = controller
                .borrow_mut()
                .toggle_member_bit(conversation, user, flag)?;
            bits_reply(op::TOGGLE_MEMBER_BIT_RESPONSE, bits)
        }
        op::TOGGLE_OWNER_BIT_REQUEST => {
            let conversation = Uuid::read(stream).await?;
            let user = Uuid::read(stream).await?;
            let flag = bool::read(stream).await?;
            let bits = controller
                .borrow_mut()
                .toggle_owner_bit(conversation, user, flag)?;
            bits_reply(op::TOGGLE_OWNER_BIT_RESPONSE, bits)
        }
        op::TOGGLE_CREATOR_BIT_REQUEST => {
            let conversation = Uuid::read(stream).await?;
            let user = Uuid::read(stream).await?;
            let flag = bool::read(stream).await?;
            let bits = controller
                .borrow_mut()
                .toggle_creator_bit(conversation, user, flag)?;
            bits_reply(op::TOGGLE_CREATOR_BIT_RESPONSE, bits)
        }
        op::TOGGLE_REMOVED_BIT_REQUEST => {
            let conversation = Uuid::read(stream).await?;
            let user = Uuid::read(stream).await?;
            let bits = controller.borrow_mut().toggle_removed_bit(conversation, user)?;
            bits_reply(op::TOGGLE_REMOVED_BIT_RESPONSE, bits)
        }
        op::GET_USER_ACCESS_CONTROL_REQUEST => {
            let conversation = Uuid::read(stream).await?;
            let user = Uuid::read(stream).await?;
            let bits = controller
                .borrow()
                .model()
                .user_access_control(conversation, user);
            bits_reply(op::GET_USER_ACCESS_CONTROL_RESPONSE, bits)
        }
        unknown => {
            warn!(opcode = unknown, "unknown opcode");
            reply(op::NO_MESSAGE)
        }
    };

    stream.write_all(&response).await?;
    Ok(())
}

fn reply(opcode: i32) -> Vec<u8> {
    let mut buf = Vec::new();
    opcode.put(&mut buf);
    buf
}

fn bits_reply(opcode: i32, bits: u8) -> Vec<u8> {
    let mut buf = reply(opcode);
    i32::from(bits).put(&mut buf);
    buf
}

/// Queue a locally created message for the relay.  Best effort: if the
/// outbound loop is gone the message simply stays local.
fn publish_message(
    hub: &Controller,
    outbound: &mpsc::UnboundedSender<OutboundEvent>,
    message: &chat_core::Message,
) {
    let model = hub.model();
    let (Some(author), Some(conversation)) = (
        model.find_user(message.author),
        model.find_conversation(message.conversation),
    ) else {
        return;
    };
    let event = OutboundEvent {
        user: Pack {
            id: author.id,
            text: author.name.clone(),
            time: author.creation,
        },
        conversation: Pack {
            id: conversation.id,
            text: conversation.title.clone(),
            time: conversation.creation,
        },
        message: Pack {
            id: message.id,
            text: message.content.clone(),
            time: message.creation,
        },
    };
    if outbound.send(event).is_err() {
        debug!("outbound relay loop stopped, message stays local");
    }
}
