//! Status-driven updated-conversations flow over the wire.
//!
//! A user tracks a conversation, records a status-update time, and then
//! sees exactly the conversations whose newest message is strictly after
//! that time.

use chat_core::{ConversationHeader, Controller, JournalWriter, Message, User};
use chat_protocol::{Time, Uuid, Wire, opcodes as op};
use server::dispatcher::handle_connection;
use server::timeline::Timeline;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ---------------------------------------------------------------------------
// Harness helpers (duplicated from server_restart.rs to keep each test file
// self-contained and independently runnable).
// ---------------------------------------------------------------------------

async fn start_server() -> (SocketAddr, NamedTempFile) {
    let file = NamedTempFile::new().expect("temp journal");
    let writer = JournalWriter::open(file.path()).expect("open journal");
    let controller = Rc::new(RefCell::new(Controller::new(1, writer)));
    let (timeline, worker) = Timeline::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::task::spawn_local(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            timeline.schedule_now(handle_connection(Rc::clone(&controller), None, stream));
        }
    });
    tokio::task::spawn_local(worker.run());
    (addr, file)
}

async fn exchange(addr: SocketAddr, request: Vec<u8>) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(&request).await.expect("send request");
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read response");
    response
}

async fn create_user(addr: SocketAddr, name: &str) -> User {
    let mut request = Vec::new();
    op::NEW_USER_REQUEST.put(&mut request);
    name.to_owned().put(&mut request);
    let response = exchange(addr, request).await;
    let mut cursor = response.as_slice();
    assert_eq!(i32::read(&mut cursor).await.unwrap(), op::NEW_USER_RESPONSE);
    Option::<User>::read(&mut cursor).await.unwrap().expect("user")
}

async fn create_conversation(addr: SocketAddr, title: &str, owner: Uuid) -> ConversationHeader {
    let mut request = Vec::new();
    op::NEW_CONVERSATION_REQUEST.put(&mut request);
    title.to_owned().put(&mut request);
    owner.put(&mut request);
    let response = exchange(addr, request).await;
    let mut cursor = response.as_slice();
    assert_eq!(
        i32::read(&mut cursor).await.unwrap(),
        op::NEW_CONVERSATION_RESPONSE
    );
    Option::<ConversationHeader>::read(&mut cursor)
        .await
        .unwrap()
        .expect("conversation")
}

async fn create_message(addr: SocketAddr, author: Uuid, conversation: Uuid, content: &str) -> Message {
    let mut request = Vec::new();
    op::NEW_MESSAGE_REQUEST.put(&mut request);
    author.put(&mut request);
    conversation.put(&mut request);
    content.to_owned().put(&mut request);
    let response = exchange(addr, request).await;
    let mut cursor = response.as_slice();
    assert_eq!(
        i32::read(&mut cursor).await.unwrap(),
        op::NEW_MESSAGE_RESPONSE
    );
    Option::<Message>::read(&mut cursor).await.unwrap().expect("message")
}

async fn updated_conversations(addr: SocketAddr, user: Uuid) -> Vec<(Uuid, Time)> {
    let mut request = Vec::new();
    op::GET_UPDATED_CONVERSATIONS_REQUEST.put(&mut request);
    user.put(&mut request);
    let response = exchange(addr, request).await;
    let mut cursor = response.as_slice();
    assert_eq!(
        i32::read(&mut cursor).await.unwrap(),
        op::GET_UPDATED_CONVERSATIONS_RESPONSE
    );
    Vec::<(Uuid, Time)>::read(&mut cursor).await.unwrap()
}

async fn set_last_status_update(addr: SocketAddr, user: Uuid, time: Time) -> Time {
    let mut request = Vec::new();
    op::UPDATE_USER_LAST_STATUS_UPDATE_REQUEST.put(&mut request);
    user.put(&mut request);
    time.put(&mut request);
    let response = exchange(addr, request).await;
    let mut cursor = response.as_slice();
    assert_eq!(
        i32::read(&mut cursor).await.unwrap(),
        op::UPDATE_USER_LAST_STATUS_UPDATE_RESPONSE
    );
    Time::read(&mut cursor).await.unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "current_thread")]
async fn tracked_conversation_reports_its_newest_message() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (addr, _journal) = start_server().await;

            let alice = create_user(addr, "alice").await;
            let bob = create_user(addr, "bob").await;
            let general = create_conversation(addr, "general", bob.id).await;

            // Track the conversation.
            let mut request = Vec::new();
            op::NEW_CONVERSATION_INTEREST_REQUEST.put(&mut request);
            alice.id.put(&mut request);
            general.id.put(&mut request);
            exchange(addr, request).await;

            // Status recorded well before the messages below.
            let previous = set_last_status_update(addr, alice.id, Time(1)).await;
            assert_eq!(previous, Time::ZERO);

            let _first = create_message(addr, bob.id, general.id, "one").await;
            let second = create_message(addr, bob.id, general.id, "two").await;

            let updated = updated_conversations(addr, alice.id).await;
            assert_eq!(updated, vec![(general.id, second.creation)]);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn caught_up_user_sees_no_updates() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (addr, _journal) = start_server().await;

            let alice = create_user(addr, "alice").await;
            let general = create_conversation(addr, "general", alice.id).await;

            let mut request = Vec::new();
            op::NEW_CONVERSATION_INTEREST_REQUEST.put(&mut request);
            alice.id.put(&mut request);
            general.id.put(&mut request);
            exchange(addr, request).await;

            let message = create_message(addr, alice.id, general.id, "hello").await;
            set_last_status_update(addr, alice.id, message.creation).await;

            // Strictly-after comparison: a message at exactly the status time
            // does not count.
            assert!(updated_conversations(addr, alice.id).await.is_empty());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn following_an_owner_tracks_their_conversations() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (addr, _journal) = start_server().await;

            let alice = create_user(addr, "alice").await;
            let bob = create_user(addr, "bob").await;
            let corner = create_conversation(addr, "bobs corner", bob.id).await;

            let mut request = Vec::new();
            op::NEW_USER_INTEREST_REQUEST.put(&mut request);
            alice.id.put(&mut request);
            bob.id.put(&mut request);
            exchange(addr, request).await;

            let message = create_message(addr, bob.id, corner.id, "news").await;
            let updated = updated_conversations(addr, alice.id).await;
            assert_eq!(updated, vec![(corner.id, message.creation)]);

            // An untracked bystander sees nothing.
            let carol = create_user(addr, "carol").await;
            assert!(updated_conversations(addr, carol.id).await.is_empty());
        })
        .await;
}
