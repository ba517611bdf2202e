//! A small SMTP client that submits one transactional HTML email per call.
//!
//! ```no_run
//! use empath_mailer::{OutboundMessage, SmtpConfig, send_email};
//!
//! # async fn example() -> Result<(), empath_mailer::SendError> {
//! let config = SmtpConfig::new(
//!     "smtp.example.com",
//!     587,
//!     "mailer@example.com",
//!     "app-password",
//!     "Example Shop <noreply@example.com>",
//!     true,
//! );
//! let message = OutboundMessage::new("client@example.com", "Test", "<p>Hello</p>");
//!
//! let delivery = send_email(&config, &message).await?;
//! println!("accepted: {}", delivery.server_reply);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
mod send;
pub mod smtp;

pub use config::{ClientTimeouts, ConfigError, ConfigSource, SmtpConfig, StaticConfig, TomlFile};
pub use error::{ErrorKind, Rejection, Result, SendError};
pub use send::{send_email, send_email_from};
pub use smtp::{Delivery, OutboundMessage};
pub use tracing;
