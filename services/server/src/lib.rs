// server: the chat service binary.
//
// One cooperative worker (the timeline) owns the model; sockets hand their
// requests to it as tasks.  The relay pump shares the same timeline, so no
// lock is ever taken on the model.

use chat_core::Controller;
use chat_protocol::Uuid;
use std::cell::RefCell;
use std::rc::Rc;

pub mod config;
pub mod dispatcher;
pub mod relay;
pub mod timeline;

/// The fixed server-build identity reported by SERVER_INFO.
pub const SERVER_VERSION: Uuid = Uuid::new(1, 0);

/// The model and journal, shared across timeline tasks.  Plain `Rc/RefCell`:
/// every touch happens on the single timeline thread, and no borrow is held
/// across an await point.
pub type SharedController = Rc<RefCell<Controller>>;
