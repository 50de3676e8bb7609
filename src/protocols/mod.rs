pub mod message;
pub mod protocol;

pub use message::{IncomingMessage, MessageError, SttMessage};
pub use protocol::{Protocol, ProtocolListener};
