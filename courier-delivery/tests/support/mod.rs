#![allow(dead_code, clippy::unwrap_used)]

pub mod mock_server;

use courier_delivery::{Envelope, RelayConfig, SmtpTimeouts, TlsMode};

pub fn envelope() -> Envelope {
    Envelope {
        sender: "sender@example.com".parse().unwrap(),
        recipients: vec![
            "first@example.com".parse().unwrap(),
            "second@example.com".parse().unwrap(),
        ],
        subject: "Hello".to_string(),
        data: "Subject: Hello\r\n\r\nHello there.\r\n.leading dot\r\n".to_string(),
    }
}

/// Plain-text relay settings pointing at `addr`, with short step timeouts.
pub fn relay(addr: std::net::SocketAddr) -> RelayConfig {
    RelayConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        tls: TlsMode::None,
        timeouts: SmtpTimeouts {
            connect_secs: 2,
            ehlo_secs: 2,
            starttls_secs: 2,
            auth_secs: 2,
            mail_from_secs: 2,
            rcpt_to_secs: 2,
            data_secs: 2,
            quit_secs: 2,
        },
        ..RelayConfig::default()
    }
}
