//! SMTP transport against a scripted relay.
#![allow(clippy::unwrap_used)]

mod support;

use std::time::Duration;

use courier_delivery::{AttemptOutcome, Outcome, RelayConfig, SmtpTransport, TlsMode, Transport};
use pretty_assertions::assert_eq;
use support::mock_server::{MockSmtpServer, SmtpCommand};

fn authenticated(config: RelayConfig) -> RelayConfig {
    RelayConfig {
        username: "user".to_string(),
        password: "secret".to_string(),
        ..config
    }
}

#[tokio::test]
async fn test_successful_delivery() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new(support::relay(server.addr()));
    let envelope = support::envelope();

    let outcome = transport.attempt(&envelope).await;
    assert_eq!(
        outcome,
        Outcome::Delivered {
            code: 250,
            message: "OK: queued".to_string(),
        }
    );

    let commands = server.commands().await;
    assert!(matches!(&commands[0], SmtpCommand::Ehlo(name) if name == "localhost"));
    assert_eq!(
        commands[1],
        SmtpCommand::MailFrom(format!("FROM:<sender@example.com> SIZE={}", envelope.size()))
    );
    assert_eq!(commands[2], SmtpCommand::RcptTo("TO:<first@example.com>".to_string()));
    assert_eq!(commands[3], SmtpCommand::RcptTo("TO:<second@example.com>".to_string()));
    assert_eq!(commands[4], SmtpCommand::Data);

    let SmtpCommand::MessageContent(content) = &commands[5] else {
        panic!("expected message content, got {:?}", commands[5]);
    };
    assert!(content.contains("\r\n..leading dot\r\n"));
    assert!(!commands.iter().any(|c| matches!(c, SmtpCommand::Auth(_))));

    server.shutdown();
}

#[tokio::test]
async fn test_4xx_is_transient() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(450, "Mailbox busy")
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new(support::relay(server.addr()));

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(outcome.kind(), AttemptOutcome::TransientFailure);
    assert_eq!(outcome.code(), Some(450));
    assert_eq!(
        outcome.message(),
        "Temporary SMTP error: 450 Mailbox busy"
    );

    server.shutdown();
}

#[tokio::test]
async fn test_5xx_is_permanent() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(550, "User unknown")
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new(support::relay(server.addr()));

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(
        outcome,
        Outcome::PermanentFailure {
            code: Some(550),
            reason: "Message rejected: 550 User unknown".to_string(),
        }
    );
    assert!(!server.commands().await.contains(&SmtpCommand::Data));

    server.shutdown();
}

#[tokio::test]
async fn test_rejected_message_data_is_permanent() {
    let server = MockSmtpServer::builder()
        .with_data_end_response(554, "Message looks like spam")
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new(support::relay(server.addr()));

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(outcome.kind(), AttemptOutcome::PermanentFailure);
    assert_eq!(outcome.code(), Some(554));

    server.shutdown();
}

#[tokio::test]
async fn test_auth_plain_then_send() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new(authenticated(support::relay(server.addr())));

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(outcome.kind(), AttemptOutcome::Success);
    assert!(
        server
            .commands()
            .await
            .contains(&SmtpCommand::Auth("PLAIN".to_string()))
    );

    server.shutdown();
}

#[tokio::test]
async fn test_auth_login_when_plain_not_offered() {
    let server = MockSmtpServer::builder()
        .with_capabilities(&["mock.relay", "AUTH LOGIN"])
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new(authenticated(support::relay(server.addr())));

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(outcome.kind(), AttemptOutcome::Success);

    let commands = server.commands().await;
    assert!(commands.contains(&SmtpCommand::Auth("LOGIN".to_string())));
    // No SIZE extension advertised.
    assert!(commands.contains(&SmtpCommand::MailFrom("FROM:<sender@example.com>".to_string())));

    server.shutdown();
}

#[tokio::test]
async fn test_bad_credentials_are_permanent() {
    let server = MockSmtpServer::builder()
        .with_auth_response(535, "5.7.8 Authentication credentials invalid")
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new(authenticated(support::relay(server.addr())));

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(outcome.kind(), AttemptOutcome::PermanentFailure);
    assert_eq!(outcome.code(), Some(535));
    assert!(outcome.message().starts_with("Authentication failed: 535"));
    assert_eq!(transport.idle_connections(), 0);

    server.shutdown();
}

#[tokio::test]
async fn test_auth_rate_limit_is_transient() {
    let server = MockSmtpServer::builder()
        .with_auth_response(454, "4.7.0 Too many login attempts, try again later")
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new(authenticated(support::relay(server.addr())));

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(outcome.kind(), AttemptOutcome::TransientFailure);
    assert_eq!(outcome.code(), Some(454));
    assert!(!server.commands().await.iter().any(|c| matches!(c, SmtpCommand::MailFrom(_))));
    assert_eq!(transport.idle_connections(), 0);

    server.shutdown();
}

#[tokio::test]
async fn test_required_tls_without_starttls_is_permanent() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new(RelayConfig {
        tls: TlsMode::Required,
        ..support::relay(server.addr())
    });

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(outcome.kind(), AttemptOutcome::PermanentFailure);
    assert!(outcome.message().starts_with("TLS required:"));

    server.shutdown();
}

#[tokio::test]
async fn test_opportunistic_tls_falls_back_to_plain() {
    let server = MockSmtpServer::builder()
        .with_capabilities(&["mock.relay", "STARTTLS", "SIZE 1000000"])
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new(RelayConfig {
        tls: TlsMode::Opportunistic,
        ..support::relay(server.addr())
    });

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(outcome.kind(), AttemptOutcome::Success);
    assert!(server.commands().await.contains(&SmtpCommand::StartTls));

    server.shutdown();
}

#[tokio::test]
async fn test_slow_relay_times_out_as_transient() {
    let server = MockSmtpServer::builder()
        .with_response_delay(Duration::from_secs(4))
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new(support::relay(server.addr()));

    let outcome = transport.attempt(&support::envelope()).await;
    assert_eq!(outcome.kind(), AttemptOutcome::TransientFailure);
    assert_eq!(outcome.code(), None);
    assert_eq!(outcome.message(), "Timed out: EHLO after 2s");

    server.shutdown();
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = SmtpTransport::new(support::relay(addr));
    let outcome = transport.attempt(&support::envelope()).await;

    assert_eq!(outcome.kind(), AttemptOutcome::TransientFailure);
    assert!(outcome.message().starts_with("Connection failed:"));
}

#[tokio::test]
async fn test_sessions_are_pooled_and_probed() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new(support::relay(server.addr()));

    for _ in 0..3 {
        let outcome = transport.attempt(&support::envelope()).await;
        assert_eq!(outcome.kind(), AttemptOutcome::Success);
    }

    assert_eq!(server.connections(), 1);
    assert_eq!(transport.idle_connections(), 1);

    let commands = server.commands().await;
    assert_eq!(commands.iter().filter(|c| **c == SmtpCommand::Rset).count(), 2);
    assert_eq!(
        commands
            .iter()
            .filter(|c| matches!(c, SmtpCommand::Ehlo(_)))
            .count(),
        1
    );

    server.shutdown();
}

#[tokio::test]
async fn test_pooling_disabled_quits_after_each_message() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new(RelayConfig {
        max_idle_connections: 0,
        ..support::relay(server.addr())
    });

    for _ in 0..2 {
        assert_eq!(
            transport.attempt(&support::envelope()).await.kind(),
            AttemptOutcome::Success
        );
    }

    assert_eq!(server.connections(), 2);
    assert_eq!(transport.idle_connections(), 0);
    assert_eq!(
        server
            .commands()
            .await
            .iter()
            .filter(|c| **c == SmtpCommand::Quit)
            .count(),
        2
    );

    server.shutdown();
}
