//! Presence is derived, never stored: the frame is recomputed from
//! registry state strictly after the mutation that triggered it.

use palaver_core::protocol::ServerFrame;

use crate::registry::ConnectionRegistry;

/// Build the presence frame from the current online set.
pub fn presence_frame(registry: &ConnectionRegistry) -> ServerFrame {
    ServerFrame::Presence {
        online: registry.online_usernames(),
    }
}
