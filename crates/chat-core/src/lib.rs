// chat-core: the authoritative in-memory chat model and its durable journal.
//
// The model is an indexed arena: entities reference each other by `Uuid`,
// never by pointer.  All mutations go through the `Controller`, which
// appends one journal record per mutation; replaying the journal into an
// empty model reproduces the live model exactly.

pub mod controller;
pub mod error;
pub mod ident;
pub mod journal;
pub mod model;
pub mod view;
pub mod wire;

pub use controller::Controller;
pub use error::CoreError;
pub use ident::IdentityGen;
pub use journal::{JournalWriter, Record, ReplayStats, replay, replay_file};
pub use model::{ConversationHeader, ConversationPayload, Message, Model, User, access};
