//! Per-connection protocol state machine.
//!
//! Each connection's reader task hands frames here one at a time; a frame
//! is fully processed before the next one on the same connection is read.
//! A session is either Unauthenticated or Authenticated; the transition
//! fires exactly once on a successful login, and disconnection is the
//! only way out.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use palaver_core::ids::ConnectionId;
use palaver_core::message::ChatMessage;
use palaver_core::protocol::{ClientFrame, ServerFrame};
use palaver_store::{MessageRepo, UserRepo};

use crate::broadcast::Broadcaster;
use crate::presence;
use crate::registry::{ConnectionRegistry, Identity, RegistryError};

/// Authorization outcome, computed from registry state before any
/// frame-specific work runs. Explicit data, not control flow.
enum Access {
    Unauthenticated,
    User(Identity),
    Admin(Identity),
}

impl Access {
    fn identity(&self) -> Option<&Identity> {
        match self {
            Access::Unauthenticated => None,
            Access::User(identity) | Access::Admin(identity) => Some(identity),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    users: UserRepo,
    messages: MessageRepo,
    history_limit: u32,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Broadcaster,
        users: UserRepo,
        messages: MessageRepo,
        history_limit: u32,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            users,
            messages,
            history_limit,
        }
    }

    /// Handle one inbound frame for one connection.
    pub async fn handle(&self, conn: &ConnectionId, raw: &str) {
        let frame = match ClientFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.reply(conn, &ServerFrame::error(e.to_string()));
                return;
            }
        };

        match frame {
            ClientFrame::Login { username, password } => {
                self.login(conn, username, password).await;
            }
            // Rooms are rejected in any state, logged in or not.
            ClientFrame::Join | ClientFrame::HistoryRoom => {
                self.reply(
                    conn,
                    &ServerFrame::error("Rooms are disabled. Single chat only."),
                );
            }
            gated => {
                let access = self.access(conn);
                let Some(identity) = access.identity().cloned() else {
                    self.reply(conn, &ServerFrame::error("Please login first"));
                    return;
                };
                match gated {
                    ClientFrame::Send {
                        kind,
                        content,
                        sticker,
                        reply_to,
                    } => self.send_message(conn, &identity, kind, content, sticker, reply_to),
                    ClientFrame::WhoOnline => self.who_online(conn),
                    ClientFrame::AdminCreateUser {
                        username,
                        password,
                        is_admin,
                    } => {
                        self.admin_create_user(conn, &access, username, password, is_admin)
                            .await;
                    }
                    ClientFrame::Login { .. }
                    | ClientFrame::Join
                    | ClientFrame::HistoryRoom => unreachable!("handled above"),
                }
            }
        }
    }

    fn access(&self, conn: &ConnectionId) -> Access {
        match self.registry.identity(conn) {
            None => Access::Unauthenticated,
            Some(identity) if identity.is_admin => Access::Admin(identity),
            Some(identity) => Access::User(identity),
        }
    }

    #[instrument(skip_all, fields(conn_id = %conn))]
    async fn login(&self, conn: &ConnectionId, username: String, password: String) {
        if self.registry.identity(conn).is_some() {
            self.reply(conn, &ServerFrame::error("Already logged in"));
            return;
        }

        // Credential verification runs PBKDF2; keep it off the async
        // threads.
        let users = self.users.clone();
        let lookup = username.clone();
        let checked =
            tokio::task::spawn_blocking(move || users.authenticate(&lookup, &password)).await;

        let user = match checked {
            Ok(Ok(Some(user))) => user,
            Ok(Ok(None)) => {
                self.reject_login(conn);
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "credential check failed");
                self.reject_login(conn);
                return;
            }
            Err(e) => {
                warn!(error = %e, "credential check task failed");
                self.reject_login(conn);
                return;
            }
        };

        let identity = Identity {
            user_id: user.id,
            username: user.username.clone(),
            is_admin: user.is_admin,
        };
        match self.registry.authenticate(conn, identity) {
            Ok(()) => {}
            Err(RegistryError::AlreadyAuthenticated) => {
                self.reply(conn, &ServerFrame::error("Already logged in"));
                return;
            }
            // Connection closed while credentials were being checked.
            Err(RegistryError::UnknownConnection) => return,
        }

        info!(conn_id = %conn, username = %user.username, "login");

        self.reply(
            conn,
            &ServerFrame::LoginOk {
                username: user.username.clone(),
                is_admin: user.is_admin,
            },
        );

        // History must reach the client before any live traffic it then
        // observes; both go through the same per-connection queue.
        let messages = match self.messages.fetch_history(self.history_limit) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "history fetch failed");
                Vec::new()
            }
        };
        self.reply(conn, &ServerFrame::History { messages });

        self.broadcaster
            .broadcast(&presence::presence_frame(&self.registry));
    }

    /// Bad credentials, inactive accounts, and store failures all look
    /// the same from outside.
    fn reject_login(&self, conn: &ConnectionId) {
        self.reply(
            conn,
            &ServerFrame::LoginError {
                message: "Invalid credentials or inactive user".into(),
            },
        );
    }

    fn send_message(
        &self,
        conn: &ConnectionId,
        identity: &Identity,
        kind: Option<String>,
        content: Option<String>,
        sticker: Option<String>,
        reply_to: Option<i64>,
    ) {
        let kind = kind.unwrap_or_else(|| "text".into());
        let content = content.unwrap_or_default();

        match self.messages.insert(
            identity.user_id,
            &content,
            &kind,
            sticker.as_deref(),
            reply_to,
        ) {
            Ok(stored) => {
                let message = ChatMessage {
                    id: stored.id,
                    user_id: identity.user_id,
                    username: identity.username.clone(),
                    kind: stored.kind,
                    sticker: stored.sticker,
                    reply_to: stored.reply_to,
                    content: stored.content,
                    created_at: stored.created_at,
                };
                // The sender has no local echo; it sees its own message
                // through this broadcast like everyone else.
                self.broadcaster.broadcast(&ServerFrame::Message { message });
            }
            Err(e) => {
                self.reply(conn, &ServerFrame::error(format!("Send failed: {e}")));
            }
        }
    }

    fn who_online(&self, conn: &ConnectionId) {
        self.reply(conn, &presence::presence_frame(&self.registry));
    }

    #[instrument(skip_all, fields(conn_id = %conn))]
    async fn admin_create_user(
        &self,
        conn: &ConnectionId,
        access: &Access,
        username: String,
        password: String,
        is_admin: bool,
    ) {
        if !matches!(access, Access::Admin(_)) {
            self.reply(
                conn,
                &ServerFrame::AdminCreateUserError {
                    message: "Admin only".into(),
                },
            );
            return;
        }

        let users = self.users.clone();
        let new_username = username.trim().to_string();
        let create_name = new_username.clone();
        let created =
            tokio::task::spawn_blocking(move || users.create(&create_name, &password, is_admin))
                .await;

        match created {
            Ok(Ok(_id)) => {
                info!(username = %new_username, is_admin, "admin created user");
                self.reply(
                    conn,
                    &ServerFrame::AdminCreateUserOk {
                        username: new_username,
                    },
                );
            }
            Ok(Err(e)) => {
                self.reply(
                    conn,
                    &ServerFrame::AdminCreateUserError {
                        message: e.to_string(),
                    },
                );
            }
            Err(e) => {
                warn!(error = %e, "user creation task failed");
                self.reply(
                    conn,
                    &ServerFrame::AdminCreateUserError {
                        message: "User creation failed".into(),
                    },
                );
            }
        }
    }

    /// Reply to the originating connection only.
    fn reply(&self, conn: &ConnectionId, frame: &ServerFrame) {
        let Ok(payload) = serde_json::to_string(frame) else {
            return;
        };
        if !self.registry.send_to(conn, payload) {
            debug!(conn_id = %conn, "reply dropped, connection gone");
        }
    }
}
