//! SMTP submission client used to hand messages to an outbound relay.
//!
//! The client speaks plain TCP, implicit TLS, or STARTTLS, and can authenticate
//! with `AUTH PLAIN` or `AUTH LOGIN`. [`MessageBuilder`] renders the RFC 5322
//! text that is sent after `DATA`.

mod client;
mod error;
mod message;
mod response;

pub use client::SmtpClient;
pub use error::{ClientError, Result};
pub use message::{Attachment, MessageBuilder, guess_content_type};
pub use response::{Response, ResponseLine};
