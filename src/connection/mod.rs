//! Connection state machine, fragmentation, and the connection core.

pub mod state;

mod fragmenter;

#[allow(clippy::module_inception)]
pub(crate) mod connection;

pub use connection::{MessageStream, MessageWriter};
pub use fragmenter::Fragmenter;
pub use state::{Action, Input, StateMachine, PING_NONCE_LEN};
