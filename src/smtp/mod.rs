//! The SMTP submission client.
//!
//! Layered bottom-up: [`reply`] turns raw lines into replies, [`channel`] exchanges commands and
//! replies over a plain or TLS connection, [`auth`] and [`message`] handle AUTH LOGIN and the DATA
//! payload, and [`session`] sequences everything for a single message.

pub mod auth;
pub mod channel;
mod connection;
pub mod extensions;
pub mod message;
pub mod reply;
pub mod session;

pub use channel::CommandChannel;
pub use extensions::{Capabilities, Extension};
pub use message::OutboundMessage;
pub use reply::{Reply, ReplyLine};
pub use session::{Delivery, SmtpSession, State};
