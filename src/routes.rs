//! Well-known events published by the game server
//!
//! Everything the server sends on the `user` stream: group membership
//! changes and server notices. The default handlers only log; callers that
//! need to react register their own handler for the same route afterwards,
//! which replaces the default.

use crate::dispatch::{Handler, RegistryBuilder};
use crate::types::{Payload, Scope};

/// Category of group membership events
pub const GROUP: &str = "group";
/// Category of server-wide messages
pub const SERVER: &str = "server";

/// Someone invited us into their group (spelled as the server sends it)
pub const INVITATION_RECEIVED: &str = "invitation recieved";
pub const USER_JOINED: &str = "user joined";
pub const USER_LEFT: &str = "user left";
pub const USER_READY: &str = "user is ready";
pub const USER_NOT_READY: &str = "user is not ready";
/// The group entered the matchmaking queue
pub const QUEUE_JOINED: &str = "queue joined";
pub const NOTICE: &str = "notice";

/// Group events delivered on the `user` stream
pub const GROUP_EVENTS: [&str; 6] = [
    INVITATION_RECEIVED,
    USER_JOINED,
    USER_LEFT,
    USER_READY,
    USER_NOT_READY,
    QUEUE_JOINED,
];

/// Register a logging handler for every well-known route
pub fn register_defaults(builder: &mut RegistryBuilder) -> &mut RegistryBuilder {
    for command in GROUP_EVENTS {
        builder.register(
            Scope::User,
            GROUP,
            command,
            Handler::sync(move |payload| log_group_event(command, &payload)),
        );
    }

    builder.register(
        Scope::User,
        SERVER,
        NOTICE,
        Handler::sync(|payload| {
            tracing::info!(notice = %serde_json::Value::Object(payload), "Notice from server");
        }),
    )
}

fn log_group_event(command: &str, payload: &Payload) {
    let user = payload.get("user").or_else(|| payload.get("username"));
    match user {
        Some(user) => tracing::info!(event = command, user = %user, "Group event"),
        None => tracing::info!(event = command, payload = ?payload, "Group event"),
    }
}
