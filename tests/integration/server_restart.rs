//! Server stop/restart validation.
//!
//! "Restart" is simulated by building a second in-process server instance
//! against the same transaction log — equivalent to stopping and restarting
//! the server binary while the data directory remains intact.  Read
//! responses after the restart must match the pre-restart responses
//! byte-for-byte.

use chat_core::{Controller, JournalWriter, replay_file};
use chat_protocol::{Uuid, Wire, opcodes as op};
use server::dispatcher::handle_connection;
use server::timeline::Timeline;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::path::Path;
use std::rc::Rc;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ---------------------------------------------------------------------------
// Harness helpers (shared shape with status_updates.rs but duplicated to
// keep each test file self-contained and independently runnable).
// ---------------------------------------------------------------------------

fn recover_controller(log_path: &Path) -> Controller {
    let writer = JournalWriter::open(log_path).expect("open journal");
    let mut controller = Controller::new(1, writer);
    replay_file(log_path, &mut controller).expect("replay journal");
    controller
}

/// Boot an in-process server; the returned guard keeps it alive.
async fn start_server(controller: Controller) -> (SocketAddr, Rc<RefCell<Controller>>) {
    let controller = Rc::new(RefCell::new(controller));
    let (timeline, worker) = Timeline::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let hub = Rc::clone(&controller);
    tokio::task::spawn_local(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            timeline.schedule_now(handle_connection(Rc::clone(&hub), None, stream));
        }
    });
    tokio::task::spawn_local(worker.run());
    (addr, controller)
}

async fn exchange(addr: SocketAddr, request: Vec<u8>) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(&request).await.expect("send request");
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read response");
    response
}

async fn get_all_conversations(addr: SocketAddr) -> Vec<u8> {
    let mut request = Vec::new();
    op::GET_ALL_CONVERSATIONS_REQUEST.put(&mut request);
    exchange(addr, request).await
}

async fn get_messages_by_id(addr: SocketAddr, ids: &[Uuid]) -> Vec<u8> {
    let mut request = Vec::new();
    op::GET_MESSAGES_BY_ID_REQUEST.put(&mut request);
    (ids.len() as i32).put(&mut request);
    for id in ids {
        id.put(&mut request);
    }
    exchange(addr, request).await
}

// ---------------------------------------------------------------------------
// Test: restart replay equivalence
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "current_thread")]
async fn reads_after_restart_match_byte_for_byte() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let dir = tempdir().expect("tempdir");
            let log_path = dir.path().join("transaction_log.txt");

            // ---- first server lifetime -------------------------------------
            let (addr, _hub) = start_server(recover_controller(&log_path)).await;

            let mut request = Vec::new();
            op::NEW_USER_REQUEST.put(&mut request);
            String::from("alice").put(&mut request);
            exchange(addr, request).await;

            let mut request = Vec::new();
            op::NEW_CONVERSATION_REQUEST.put(&mut request);
            String::from("general").put(&mut request);
            Uuid::new(1, 1).put(&mut request);
            exchange(addr, request).await;

            let mut request = Vec::new();
            op::NEW_MESSAGE_REQUEST.put(&mut request);
            Uuid::new(1, 1).put(&mut request);
            Uuid::new(1, 2).put(&mut request);
            String::from("hi").put(&mut request);
            exchange(addr, request).await;

            let conversations_before = get_all_conversations(addr).await;
            let messages_before = get_messages_by_id(addr, &[Uuid::new(1, 3)]).await;
            // Sanity: the message response actually carries the message.
            assert!(messages_before.len() > 8);

            // ---- restart against the same log ------------------------------
            let (addr, _hub) = start_server(recover_controller(&log_path)).await;

            let conversations_after = get_all_conversations(addr).await;
            let messages_after = get_messages_by_id(addr, &[Uuid::new(1, 3)]).await;

            assert_eq!(conversations_before, conversations_after);
            assert_eq!(messages_before, messages_after);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn restarted_server_continues_the_id_sequence() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let dir = tempdir().expect("tempdir");
            let log_path = dir.path().join("transaction_log.txt");

            let (addr, _hub) = start_server(recover_controller(&log_path)).await;
            let mut request = Vec::new();
            op::NEW_USER_REQUEST.put(&mut request);
            String::from("alice").put(&mut request);
            exchange(addr, request).await;

            let (addr, _hub) = start_server(recover_controller(&log_path)).await;
            let mut request = Vec::new();
            op::NEW_USER_REQUEST.put(&mut request);
            String::from("bob").put(&mut request);
            let response = exchange(addr, request).await;

            let mut cursor = response.as_slice();
            assert_eq!(i32::read(&mut cursor).await.unwrap(), op::NEW_USER_RESPONSE);
            let bob = Option::<chat_core::User>::read(&mut cursor)
                .await
                .unwrap()
                .expect("present user");
            // Fresh ids never collide with replayed ones.
            assert_eq!(bob.id, Uuid::new(1, 2));
        })
        .await;
}
