// chat-protocol: wire codec, opcode constants, and shared value types for the
// chat request/response protocol and the relay exchanges.
//
// Every exchange is one request and one response on a fresh connection.  Each
// message begins with an INTEGER opcode; the body layout per opcode is frozen
// and shared with clients, so the byte layouts in `codec` must never change.

pub mod bundle;
pub mod codec;
pub mod error;
pub mod opcodes;
pub mod types;

pub use bundle::{Bundle, Pack};
pub use codec::{Blob, Wire, put_map, put_seq};
pub use error::WireError;
pub use types::{Time, Uuid};
