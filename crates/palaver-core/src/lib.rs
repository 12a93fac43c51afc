pub mod ids;
pub mod message;
pub mod protocol;

pub use ids::ConnectionId;
pub use message::{ChatMessage, MessageKind};
pub use protocol::{ClientFrame, FrameParseError, ServerFrame};
