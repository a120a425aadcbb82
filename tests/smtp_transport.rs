//! Tests for the SMTP relay transport against a scripted in-process server.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use integrations_mail::config::{PoolConfig, SendOptions, SmtpConfig, TlsMode};
use integrations_mail::errors::{SmtpError, SmtpErrorKind};
use integrations_mail::mocks::sample_message;
use integrations_mail::transport::SmtpTransport;
use integrations_mail::{Transport, TransportKind};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
struct Script {
    reject: Vec<&'static str>,
    refuse_ehlo: bool,
}

#[derive(Debug, Default)]
struct Transcript {
    connections: usize,
    commands: Vec<String>,
    data: Vec<String>,
}

impl Transcript {
    fn count(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

const EHLO_REPLY: &str =
    "250-mock.example.com\r\n250-AUTH PLAIN LOGIN\r\n250-SIZE 1000000\r\n250 8BITMIME\r\n";

async fn start_server(script: Script, connections: usize) -> (u16, JoinHandle<Transcript>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut transcript = Transcript::default();
        for _ in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            transcript.connections += 1;
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read);
            write.write_all(b"220 mock.example.com ESMTP ready\r\n").await.unwrap();

            loop {
                let mut line = String::new();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let line = line.trim_end().to_string();
                transcript.commands.push(line.clone());
                let upper = line.to_uppercase();

                let reply = if upper.starts_with("EHLO") {
                    if script.refuse_ehlo {
                        "502 5.5.2 Command not recognized\r\n"
                    } else {
                        EHLO_REPLY
                    }
                } else if upper.starts_with("HELO") {
                    "250 mock.example.com\r\n"
                } else if upper.starts_with("AUTH") {
                    "235 2.7.0 Authentication successful\r\n"
                } else if upper.starts_with("MAIL FROM") {
                    "250 2.1.0 Ok\r\n"
                } else if upper.starts_with("RCPT TO") {
                    if script.reject.iter().any(|r| line.contains(r)) {
                        "550 5.1.1 User unknown\r\n"
                    } else {
                        "250 2.1.5 Ok\r\n"
                    }
                } else if upper == "DATA" {
                    write
                        .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                        .await
                        .unwrap();
                    let mut data = Vec::new();
                    loop {
                        let mut body_line = String::new();
                        if reader.read_line(&mut body_line).await.unwrap() == 0 {
                            break;
                        }
                        let body_line = body_line.trim_end_matches(['\r', '\n']).to_string();
                        if body_line == "." {
                            break;
                        }
                        data.push(body_line);
                    }
                    transcript.data.push(data.join("\r\n"));
                    "250 2.0.0 Ok: queued as ABC123\r\n"
                } else if upper == "QUIT" {
                    let _ = write.write_all(b"221 2.0.0 Bye\r\n").await;
                    break;
                } else {
                    "250 2.0.0 Ok\r\n"
                };
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        }
        transcript
    });

    (port, handle)
}

fn config(port: u16) -> SmtpConfig {
    SmtpConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .no_tls()
        .credentials("user", "secret")
        .client_id("client.example.com")
        .connect_timeout(Duration::from_secs(5))
        .command_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

async fn finish(handle: JoinHandle<Transcript>) -> Transcript {
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_relays_message() {
    let (port, server) = start_server(Script::default(), 1).await;
    let transport = SmtpTransport::new(config(port)).unwrap();

    let mut message = sample_message();
    message.message_id("<smtp-1@example.com>");
    let response = transport.send(&message, SendOptions::new()).await.unwrap();

    assert_eq!(response.message_id, "smtp-1@example.com");
    assert_eq!(
        response.raw["accepted"],
        serde_json::json!(["t1@example.com", "c1@example.com", "b1@example.com"])
    );
    assert_eq!(response.raw["rejected"], serde_json::json!([]));
    assert!(response.raw["response"].as_str().unwrap().contains("queued as ABC123"));

    let transcript = finish(server).await;
    let plain = BASE64.encode("\0user\0secret");
    assert_eq!(
        transcript.commands,
        vec![
            "EHLO client.example.com".to_string(),
            format!("AUTH PLAIN {}", plain),
            "MAIL FROM:<sender@example.com>".to_string(),
            "RCPT TO:<t1@example.com>".to_string(),
            "RCPT TO:<c1@example.com>".to_string(),
            "RCPT TO:<b1@example.com>".to_string(),
            "DATA".to_string(),
            "QUIT".to_string(),
        ]
    );

    let data = &transcript.data[0];
    assert!(data.contains("Subject: Hello"));
    assert!(data.contains("Message-ID: <smtp-1@example.com>"));
    assert!(!data.contains("Bcc:"));
}

#[tokio::test]
async fn test_partial_rejection_is_reported() {
    let script = Script {
        reject: vec!["c1@example.com"],
        ..Default::default()
    };
    let (port, server) = start_server(script, 1).await;
    let transport = SmtpTransport::new(config(port)).unwrap();

    let response = transport
        .send(&sample_message(), SendOptions::new())
        .await
        .unwrap();
    assert_eq!(
        response.raw["accepted"],
        serde_json::json!(["t1@example.com", "b1@example.com"])
    );
    assert_eq!(response.raw["rejected"], serde_json::json!(["c1@example.com"]));
    assert_eq!(response.envelope.to.len(), 3);

    finish(server).await;
}

#[tokio::test]
async fn test_total_rejection_is_transport_error() {
    let script = Script {
        reject: vec!["@example.com>"],
        ..Default::default()
    };
    let (port, server) = start_server(script, 1).await;
    let transport = SmtpTransport::new(config(port)).unwrap();

    let err = transport
        .send(&sample_message(), SendOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.transport_kind(), Some(TransportKind::Smtp));
    let cause = err.cause().unwrap().downcast_ref::<SmtpError>().unwrap();
    assert_eq!(cause.kind(), SmtpErrorKind::RecipientsRejected);

    let transcript = finish(server).await;
    assert_eq!(transcript.count("DATA"), 0);
    assert_eq!(transcript.count("RSET"), 1);
}

#[tokio::test]
async fn test_falls_back_to_helo() {
    let script = Script {
        refuse_ehlo: true,
        ..Default::default()
    };
    let (port, server) = start_server(script, 1).await;
    let mut config = config(port);
    config.username = None;
    config.password = None;
    let transport = SmtpTransport::new(config).unwrap();

    transport
        .send(&sample_message(), SendOptions::new())
        .await
        .unwrap();

    let transcript = finish(server).await;
    assert_eq!(transcript.commands[0], "EHLO client.example.com");
    assert_eq!(transcript.commands[1], "HELO client.example.com");
    assert_eq!(transcript.count("AUTH"), 0);
}

#[tokio::test]
async fn test_required_starttls_not_offered() {
    let (port, server) = start_server(Script::default(), 1).await;
    let mut config = config(port);
    config.tls = TlsMode::StartTlsRequired;
    let transport = SmtpTransport::new(config).unwrap();

    let err = transport
        .send(&sample_message(), SendOptions::new())
        .await
        .unwrap_err();
    let cause = err.cause().unwrap().downcast_ref::<SmtpError>().unwrap();
    assert_eq!(cause.kind(), SmtpErrorKind::StarttlsNotSupported);

    let transcript = finish(server).await;
    assert_eq!(transcript.count("MAIL FROM"), 0);
}

#[tokio::test]
async fn test_pool_reuses_connection() {
    let (port, server) = start_server(Script::default(), 1).await;
    let mut config = config(port);
    config.pool = Some(PoolConfig {
        max_connections: 1,
        acquire_timeout: Duration::from_secs(5),
    });
    let transport = SmtpTransport::new(config).unwrap();

    transport
        .send(&sample_message(), SendOptions::new())
        .await
        .unwrap();
    transport
        .send(&sample_message(), SendOptions::new())
        .await
        .unwrap();
    transport.close().await.unwrap();

    let transcript = finish(server).await;
    assert_eq!(transcript.connections, 1);
    assert_eq!(transcript.count("EHLO"), 1);
    assert_eq!(transcript.count("NOOP"), 1);
    assert_eq!(transcript.count("DATA"), 2);
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = SmtpTransport::new(config(port)).unwrap();
    let err = transport
        .send(&sample_message(), SendOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_transport());
    let cause = err.cause().unwrap().downcast_ref::<SmtpError>().unwrap();
    assert_eq!(cause.kind(), SmtpErrorKind::ConnectionRefused);
}

#[tokio::test]
async fn test_verify_opens_and_closes_session() {
    let (port, server) = start_server(Script::default(), 1).await;
    let transport = SmtpTransport::new(config(port)).unwrap();

    transport.verify().await.unwrap();

    let transcript = finish(server).await;
    assert_eq!(transcript.count("AUTH PLAIN"), 1);
    assert_eq!(transcript.commands.last().map(String::as_str), Some("QUIT"));
}
