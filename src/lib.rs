//! relay-chat workspace root.
//!
//! The functional crates live under `crates/` (protocol and core) and
//! `services/` (the server binary).  This package only hosts the
//! cross-service integration suites under `tests/integration/`.
