//! Delivery through a single authenticated SMTP relay.
//!
//! Each attempt runs one SMTP transaction:
//!
//! ```text
//! connect → greeting → EHLO → [STARTTLS → EHLO] → [AUTH] → MAIL FROM → RCPT TO… → DATA
//! ```
//!
//! Sessions that completed a transaction are kept in a small idle pool and
//! probed with `RSET` before reuse. A session is only ever used by one attempt
//! at a time.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use courier_smtp::{ClientError, Response, SmtpClient};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Outcome, Transport};
use crate::{
    error::{DeliveryError, PermanentError, TemporaryError},
    message::Envelope,
};

/// How the relay connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    /// Plain text only. Credentials are sent unencrypted.
    None,
    /// STARTTLS when the relay offers it, plain text otherwise.
    Opportunistic,
    /// STARTTLS must succeed before anything else is sent.
    #[default]
    Required,
    /// TLS from the first byte (port 465).
    Implicit,
}

/// Per-step time limits for an SMTP transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Covers the greeting and every EHLO.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::ehlo_secs")]
    pub ehlo_secs: u64,

    /// STARTTLS command and the handshake that follows.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::starttls_secs")]
    pub starttls_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::auth_secs")]
    pub auth_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::mail_from_secs")]
    pub mail_from_secs: u64,

    /// Applies to each recipient separately.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::rcpt_to_secs")]
    pub rcpt_to_secs: u64,

    /// DATA command and message transmission.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "defaults::quit_secs")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            ehlo_secs: defaults::ehlo_secs(),
            starttls_secs: defaults::starttls_secs(),
            auth_secs: defaults::auth_secs(),
            mail_from_secs: defaults::mail_from_secs(),
            rcpt_to_secs: defaults::rcpt_to_secs(),
            data_secs: defaults::data_secs(),
            quit_secs: defaults::quit_secs(),
        }
    }
}

/// Relay connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "defaults::host")]
    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    /// AUTH is skipped when empty.
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub tls: TlsMode,

    /// Name announced in EHLO.
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,

    /// Accept self-signed or otherwise invalid relay certificates.
    ///
    /// **Testing only.**
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Idle sessions kept for reuse. Zero disables pooling.
    ///
    /// Default: 4
    #[serde(default = "defaults::max_idle_connections")]
    pub max_idle_connections: usize,

    /// Idle sessions older than this are closed instead of reused.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            username: String::new(),
            password: String::new(),
            tls: TlsMode::default(),
            helo_name: defaults::helo_name(),
            accept_invalid_certs: false,
            max_idle_connections: defaults::max_idle_connections(),
            idle_timeout_secs: defaults::idle_timeout_secs(),
            timeouts: SmtpTimeouts::default(),
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    const fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

/// An established, authenticated relay session.
struct Session {
    client: SmtpClient,
    /// The most recent EHLO reply.
    capabilities: Response,
    last_used: Instant,
}

/// Outcome of STARTTLS negotiation on a fresh connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsNegotiation {
    Upgraded,
    Skipped,
    /// Opportunistic upgrade failed mid-handshake; the connection is unusable.
    RetryWithoutTls,
}

pub struct SmtpTransport {
    config: RelayConfig,
    idle: Mutex<Vec<Session>>,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Number of sessions currently waiting in the pool.
    #[must_use]
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<Response, DeliveryError> {
        let mut session = match self.checkout().await {
            Some(session) => session,
            None => self.open().await?,
        };

        let response = self.transact(&mut session, envelope).await?;
        self.release(session).await;

        Ok(response)
    }

    /// Take a healthy idle session, discarding stale or broken ones.
    async fn checkout(&self) -> Option<Session> {
        let max_idle = Duration::from_secs(self.config.idle_timeout_secs);
        let probe = Duration::from_secs(self.config.timeouts.ehlo_secs);

        loop {
            let mut session = self.idle.lock().pop()?;

            if session.last_used.elapsed() > max_idle {
                debug!("Discarding idle relay session past its idle timeout");
                continue;
            }

            match step(probe, "RSET", session.client.rset()).await {
                Ok(response) if response.is_success() => {
                    debug!("Reusing pooled relay session");
                    return Some(session);
                }
                _ => debug!("Pooled relay session failed its probe, discarding"),
            }
        }
    }

    async fn release(&self, mut session: Session) {
        session.last_used = Instant::now();

        {
            let mut idle = self.idle.lock();
            if idle.len() < self.config.max_idle_connections {
                idle.push(session);
                return;
            }
        }

        let timeout = Duration::from_secs(self.config.timeouts.quit_secs);
        if let Err(e) = step(timeout, "QUIT", session.client.quit()).await {
            warn!(error = %e, "QUIT failed after successful delivery");
        }
    }

    async fn open(&self) -> Result<Session, DeliveryError> {
        match self.connect(self.config.tls).await? {
            (session, TlsNegotiation::RetryWithoutTls) => {
                drop(session);
                warn!(
                    relay = %self.config.address(),
                    "STARTTLS failed, retrying without TLS"
                );
                let (session, _) = self.connect(TlsMode::None).await?;
                Ok(session)
            }
            (session, _) => Ok(session),
        }
    }

    async fn connect(&self, mode: TlsMode) -> Result<(Session, TlsNegotiation), DeliveryError> {
        let timeouts = &self.config.timeouts;
        let address = self.config.address();
        let connect_timeout = Duration::from_secs(timeouts.connect_secs);

        let mut client = if mode == TlsMode::Implicit {
            step(
                connect_timeout,
                "connect",
                SmtpClient::connect_tls(
                    &address,
                    self.config.host.clone(),
                    self.config.accept_invalid_certs,
                ),
            )
            .await?
        } else {
            step(
                connect_timeout,
                "connect",
                SmtpClient::connect(&address, self.config.host.clone()),
            )
            .await?
            .accept_invalid_certs(self.config.accept_invalid_certs)
        };

        let ehlo_timeout = Duration::from_secs(timeouts.ehlo_secs);
        step(ehlo_timeout, "greeting", client.read_greeting())
            .await?
            .into_result()?;

        let capabilities = step(ehlo_timeout, "EHLO", client.ehlo(&self.config.helo_name))
            .await?
            .into_result()?;

        let mut session = Session {
            client,
            capabilities,
            last_used: Instant::now(),
        };

        let negotiation = self.negotiate_tls(&mut session, mode).await?;
        if negotiation == TlsNegotiation::RetryWithoutTls {
            return Ok((session, negotiation));
        }

        if self.config.has_credentials() {
            self.authenticate(&mut session).await?;
        }

        info!(
            relay = %address,
            tls = session.client.is_tls(),
            "Relay session established"
        );

        Ok((session, negotiation))
    }

    async fn negotiate_tls(
        &self,
        session: &mut Session,
        mode: TlsMode,
    ) -> Result<TlsNegotiation, DeliveryError> {
        if matches!(mode, TlsMode::None | TlsMode::Implicit) {
            return Ok(TlsNegotiation::Skipped);
        }

        if !session.capabilities.has_extension("STARTTLS") {
            if mode == TlsMode::Required {
                return Err(PermanentError::TlsRequired(format!(
                    "{} does not advertise STARTTLS",
                    self.config.address()
                ))
                .into());
            }
            return Ok(TlsNegotiation::Skipped);
        }

        let timeout = Duration::from_secs(self.config.timeouts.starttls_secs);
        let response = match step(timeout, "STARTTLS", session.client.starttls()).await {
            Ok(response) => response,
            Err(e) if mode == TlsMode::Opportunistic => {
                warn!(error = %e, "Opportunistic STARTTLS failed");
                return Ok(TlsNegotiation::RetryWithoutTls);
            }
            Err(e) => return Err(e),
        };

        if !response.is_success() {
            if mode == TlsMode::Opportunistic {
                debug!(code = response.code, "Relay declined STARTTLS, continuing in plain text");
                return Ok(TlsNegotiation::Skipped);
            }
            let code = response.code;
            response.into_result()?;
            return Err(PermanentError::TlsRequired(format!(
                "unexpected STARTTLS reply {code}"
            ))
            .into());
        }

        let ehlo_timeout = Duration::from_secs(self.config.timeouts.ehlo_secs);
        session.capabilities = step(
            ehlo_timeout,
            "EHLO",
            session.client.ehlo(&self.config.helo_name),
        )
        .await?
        .into_result()?;

        Ok(TlsNegotiation::Upgraded)
    }

    /// `AUTH PLAIN`, or `AUTH LOGIN` when PLAIN is not offered.
    async fn authenticate(&self, session: &mut Session) -> Result<(), DeliveryError> {
        let mechanisms = session.capabilities.auth_mechanisms();
        let timeout = Duration::from_secs(self.config.timeouts.auth_secs);
        let (username, password) = (&self.config.username, &self.config.password);

        let response = if mechanisms.iter().any(|m| m == "PLAIN") {
            step(timeout, "AUTH PLAIN", session.client.auth_plain(username, password)).await?
        } else if mechanisms.iter().any(|m| m == "LOGIN") {
            step(timeout, "AUTH LOGIN", session.client.auth_login(username, password)).await?
        } else {
            return Err(ClientError::Unsupported("AUTH PLAIN or LOGIN".to_string()).into());
        };

        if response.is_success() {
            debug!(username = %username, "Authenticated with relay");
            return Ok(());
        }

        let message = response.message();
        if response.is_permanent_error() {
            Err(PermanentError::AuthenticationFailed {
                code: response.code,
                message,
            }
            .into())
        } else if response.is_temporary_error() {
            Err(TemporaryError::Deferred {
                code: response.code,
                message,
            }
            .into())
        } else {
            Err(TemporaryError::Protocol(format!(
                "unexpected AUTH reply {} {message}",
                response.code
            ))
            .into())
        }
    }

    async fn transact(
        &self,
        session: &mut Session,
        envelope: &Envelope,
    ) -> Result<Response, DeliveryError> {
        let timeouts = &self.config.timeouts;
        let client = &mut session.client;

        let size = session
            .capabilities
            .has_extension("SIZE")
            .then(|| envelope.size());
        let sender = envelope.sender.to_string();
        step(
            Duration::from_secs(timeouts.mail_from_secs),
            "MAIL FROM",
            client.mail_from(&sender, size),
        )
        .await?
        .into_result()?;

        let rcpt_timeout = Duration::from_secs(timeouts.rcpt_to_secs);
        for recipient in &envelope.recipients {
            let recipient = recipient.to_string();
            step(rcpt_timeout, "RCPT TO", client.rcpt_to(&recipient))
                .await?
                .into_result()?;
        }

        let data_timeout = Duration::from_secs(timeouts.data_secs);
        let response = step(data_timeout, "DATA", client.data()).await?;
        if !response.is_intermediate() {
            let code = response.code;
            response.into_result()?;
            return Err(TemporaryError::Protocol(format!(
                "expected 354 after DATA, got {code}"
            ))
            .into());
        }

        let response = step(data_timeout, "message data", client.send_data(&envelope.data))
            .await?
            .into_result()?;

        Ok(response)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn attempt(&self, envelope: &Envelope) -> Outcome {
        match self.deliver(envelope).await {
            Ok(response) => {
                debug!(code = response.code, "Relay accepted message");
                Outcome::Delivered {
                    code: response.code,
                    message: response.message(),
                }
            }
            Err(e) => {
                warn!(
                    relay = %self.config.address(),
                    permanent = e.is_permanent(),
                    error = %e,
                    "Delivery attempt failed"
                );
                e.into()
            }
        }
    }
}

/// Run one protocol step under `limit`, classifying both timeouts and client errors.
async fn step<T>(
    limit: Duration,
    what: &str,
    future: impl Future<Output = courier_smtp::Result<T>>,
) -> Result<T, DeliveryError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| TemporaryError::Timeout(format!("{what} after {}s", limit.as_secs())))?
        .map_err(DeliveryError::from)
}

mod defaults {
    pub fn host() -> String {
        "sandbox.smtp.mailtrap.io".to_string()
    }

    pub const fn port() -> u16 {
        2525
    }

    pub fn helo_name() -> String {
        "localhost".to_string()
    }

    pub const fn max_idle_connections() -> usize {
        4
    }

    pub const fn idle_timeout_secs() -> u64 {
        60
    }

    pub const fn connect_secs() -> u64 {
        30
    }

    pub const fn ehlo_secs() -> u64 {
        30
    }

    pub const fn starttls_secs() -> u64 {
        30
    }

    pub const fn auth_secs() -> u64 {
        30
    }

    pub const fn mail_from_secs() -> u64 {
        30
    }

    pub const fn rcpt_to_secs() -> u64 {
        30
    }

    pub const fn data_secs() -> u64 {
        120
    }

    pub const fn quit_secs() -> u64 {
        10
    }
}
