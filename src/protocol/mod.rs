//! WebSocket protocol core (RFC 6455).

pub mod assembler;
pub mod close;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod utf8;

pub use assembler::{AssembledMessage, MessageReassembler};
pub use close::{decode_close, encode_close};
pub use frame::Frame;
pub use handshake::{compute_accept_key, UpgradeRequest, UpgradeResponse, WS_GUID};
pub use mask::{apply_mask, generate_mask_key};
pub use opcode::OpCode;
pub use utf8::{validate_utf8, Utf8Validator};
