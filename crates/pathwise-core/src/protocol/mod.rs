//! Protocol definitions, parsing and validation.
//!
//! Protocols are authored as YAML/JSON documents, checked against an embedded
//! JSON Schema and then validated structurally (unique ids and orders, the
//! decision-point invariant, branch targets that resolve).

mod parser;
mod schema;

pub use parser::{BranchOutcome, Protocol, ProtocolError, ProtocolInfo, ProtocolStep};
pub use schema::{is_valid_protocol, validate_protocol_schema};
