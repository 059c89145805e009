//! Real-time chat core for per-project team rooms.
//!
//! Each project has one conversation. Messages are persisted through a REST
//! API and fanned out to room members over a websocket broadcast channel.
//! This crate keeps the local view of the active conversation correct while
//! both channels confirm the same change in any order: optimistic sends,
//! edits and deletes with rollback, at-most-one copy per message, a single
//! room subscription, typing presence and unread-mention flags.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`client`] | Async driver task and its [`client::ChatHandle`] |
//! | [`chat`] | I/O-free aggregate turning inputs into [`chat::Effect`]s |
//! | [`session`] | Everything scoped to the open project |
//! | [`store`] | Ordered message list of one conversation |
//! | [`reconcile`] | Dedup merge rule and event application |
//! | [`optimistic`] | Optimistic send/edit/delete with rollback |
//! | [`subscription`] | Single active room subscription |
//! | [`presence`] | Local and remote typing state |
//! | [`mention`] | Unread-mention flags and `@name` matching |
//! | [`reply`] | Reply snapshots and quoted snippets |
//! | [`api`] | Durable message API trait and `reqwest` client |
//! | [`transport`] | Broadcast channel contract and frame mapping |
//! | [`ws`] | Websocket transport with reconnect |
//! | [`config`] | Environment configuration |
//! | [`prefs`] | Remembered last project |
//! | [`types`] / [`wire`] | Domain types and REST wire records |
//! | [`error`] | Error taxonomy and user notices |

pub mod api;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod mention;
pub mod optimistic;
pub mod prefs;
pub mod presence;
pub mod reconcile;
pub mod reply;
pub mod session;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod types;
pub mod wire;
pub mod ws;

#[cfg(test)]
mod test_helpers;

pub use api::{HttpMessageApi, MessageApi};
pub use chat::{ChatState, ChatView};
pub use client::{ChatClient, ChatHandle, ClientError};
pub use config::ChatConfig;
pub use error::{ChatError, ErrorCode, Notice};
pub use prefs::PrefsStore;
pub use ws::WsTransport;
