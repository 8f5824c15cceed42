//! Scripted conversations with a session over an in-memory pipe.
#![allow(clippy::unwrap_used)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use postern_common::{Signal, config::ServerTimeouts, error::SessionError, status::Status};
use postern_smtp::{
    auth::{Authenticator, Mechanisms},
    extensions::Extension,
    hooks::SessionHooks,
    reply::Reply,
    session::{Limits, Session, SessionConfig},
    sink::MessageSink,
    state::SessionState,
    transaction::{MailFrom, RcptTo},
};
use pretty_assertions::assert_eq;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf},
    sync::broadcast,
    task::JoinHandle,
};

const HOSTNAME: &str = "mx.test";

struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    signal: broadcast::Sender<Signal>,
    session: JoinHandle<Result<(), SessionError>>,
}

impl Client {
    async fn connect(config: SessionConfig) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (signal, receiver) = broadcast::channel(4);
        let peer: SocketAddr = "192.0.2.7:40000".parse().unwrap();

        let session = Session::create(server, peer, config);
        let session = tokio::spawn(session.run(receiver));

        let (reader, writer) = tokio::io::split(client);

        Self {
            reader: BufReader::new(reader),
            writer,
            signal,
            session,
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\r\n").as_bytes()).await;
    }

    /// Every line of the next reply, CRLF stripped.
    async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await.unwrap();
            assert!(read > 0, "connection closed while waiting for a reply");

            let line = line.trim_end_matches("\r\n").to_string();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);

            if last {
                return lines;
            }
        }
    }

    async fn expect(&mut self, line: &str) {
        assert_eq!(self.reply().await, vec![line.to_string()]);
    }

    async fn expect_prefix(&mut self, prefix: &str) {
        let reply = self.reply().await;
        assert_eq!(reply.len(), 1, "{reply:?}");
        assert!(reply[0].starts_with(prefix), "{reply:?} does not start with {prefix}");
    }

    async fn command(&mut self, line: &str, expected: &str) {
        self.send(line).await;
        self.expect(expected).await;
    }

    async fn closed(&mut self) -> bool {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap() == 0
    }

    async fn greeted(config: SessionConfig) -> Self {
        let mut client = Self::connect(config).await;
        client
            .expect(&format!("220 {HOSTNAME} Simple Mail Transfer Service Ready."))
            .await;
        client.send("EHLO client.test").await;
        assert_eq!(client.reply().await[0], format!("250-{HOSTNAME}"));
        client
    }

    async fn envelope(&mut self) {
        self.command("MAIL FROM:<sender@example.org>", "250 OK.").await;
        self.command("RCPT TO:<rcpt@example.org>", "250 OK.").await;
    }
}

fn config() -> postern_smtp::session::SessionConfigBuilder {
    SessionConfig::builder().with_hostname(HOSTNAME)
}

fn limits(max_message_size: usize) -> Limits {
    Limits {
        max_message_size,
        ..Limits::default()
    }
}

/// Keeps what the session reports to its hooks.
#[derive(Default)]
struct Recorder {
    stored: Mutex<Vec<Vec<u8>>>,
    recipients: Mutex<Vec<usize>>,
    canceled: Mutex<usize>,
    reject_greeting: bool,
}

impl Recorder {
    fn stored(&self) -> Vec<Vec<u8>> {
        self.stored.lock().unwrap().clone()
    }

    fn canceled(&self) -> usize {
        *self.canceled.lock().unwrap()
    }
}

#[async_trait]
impl SessionHooks for Recorder {
    async fn started(&self, _state: &SessionState, reply: Reply) -> Reply {
        if self.reject_greeting {
            Reply::single(Status::from(554), "No service for you.")
        } else {
            reply
        }
    }

    async fn mail_from(&self, _state: &SessionState, from: &MailFrom, reply: Reply) -> Reply {
        if from.mailbox == "spammer@example.org" {
            Reply::single(Status::from(550), "Sender refused.")
        } else {
            reply
        }
    }

    async fn rcpt_to(&self, _state: &SessionState, to: &RcptTo, reply: Reply) -> Reply {
        if to.mailbox.starts_with("blocked@") {
            Reply::single(Status::from(550), "Mailbox unavailable.")
        } else {
            reply
        }
    }

    async fn message_canceled(&self, _state: &SessionState) {
        *self.canceled.lock().unwrap() += 1;
    }

    async fn message_stored(
        &self,
        state: &SessionState,
        sink: Box<dyn MessageSink>,
        reply: Reply,
    ) -> Reply {
        self.recipients
            .lock()
            .unwrap()
            .push(state.recipient_count());
        self.stored
            .lock()
            .unwrap()
            .push(sink.contents().unwrap_or_default().to_vec());
        reply
    }
}

struct Accounts;

#[async_trait]
impl Authenticator for Accounts {
    async fn authenticate(&self, _authzid: &str, authcid: &str, password: &str) -> bool {
        authcid == "user" && password == "secret"
    }
}

fn with_auth(allow_insecure: bool) -> postern_smtp::session::SessionConfigBuilder {
    config().with_mechanisms(Mechanisms::with_authenticator(
        Arc::new(Accounts),
        allow_insecure,
    ))
}

fn body(message: &[u8]) -> &[u8] {
    let header_end = message
        .windows(2)
        .position(|window| window == b"\r\n")
        .unwrap();
    &message[header_end + 2..]
}

#[tokio::test]
async fn ehlo_capabilities() {
    let mut client = Client::connect(config().build()).await;
    client.reply().await;

    client.send("EHLO client.test").await;
    assert_eq!(
        client.reply().await,
        vec![
            format!("250-{HOSTNAME}"),
            "250-PIPELINING".to_string(),
            "250-SIZE 10000000".to_string(),
            "250-8BITMIME".to_string(),
            "250-BINARYMIME".to_string(),
            "250 CHUNKING".to_string(),
        ]
    );

    client.command("HELO client.test", &format!("250 {HOSTNAME}")).await;
    client
        .command(
            "EHLO",
            "501 Syntax error, syntax: \"EHLO\" SP hostname CRLF",
        )
        .await;
}

#[tokio::test]
async fn auth_is_only_advertised_when_usable() {
    let mut client = Client::connect(with_auth(false).build()).await;
    client.reply().await;
    client.send("EHLO client.test").await;
    assert!(!client.reply().await.iter().any(|line| line.contains("AUTH")));

    client
        .command(
            "AUTH PLAIN",
            "501 Not supported authentication mechanism.",
        )
        .await;

    let mut client = Client::connect(
        with_auth(true)
            .with_extensions(vec![Extension::Pipelining])
            .build(),
    )
    .await;
    client.reply().await;
    client.send("EHLO client.test").await;
    assert_eq!(
        client.reply().await,
        vec![
            format!("250-{HOSTNAME}"),
            "250-PIPELINING".to_string(),
            "250 AUTH PLAIN LOGIN".to_string(),
        ]
    );
}

#[tokio::test]
async fn full_transaction_then_another() {
    let hooks = Arc::new(Recorder::default());
    let mut client = Client::greeted(config().with_hooks(hooks.clone()).build()).await;

    client.envelope().await;
    client
        .command("DATA", "354 Start mail input; end with <CRLF>.<CRLF>")
        .await;
    client
        .send_raw(b"Subject: hi\r\n\r\nhello\r\n..dotted\r\n.\r\n")
        .await;
    client.expect_prefix("250 DATA completed in ").await;

    client.command("MAIL FROM:<sender@example.org>", "250 OK.").await;
    client
        .command(
            "QUIT",
            &format!("221 {HOSTNAME} Service closing transmission channel."),
        )
        .await;

    assert!(client.closed().await);
    assert!(client.session.await.unwrap().is_ok());

    let stored = hooks.stored();
    assert_eq!(stored.len(), 1);

    let header = String::from_utf8_lossy(&stored[0]);
    assert!(
        header.starts_with(&format!(
            "Received: from client.test (192.0.2.7) by {HOSTNAME} with ESMTP; "
        )),
        "{header}"
    );
    assert_eq!(body(&stored[0]), b"Subject: hi\r\n\r\nhello\r\n.dotted\r\n");
}

#[tokio::test]
async fn sequencing() {
    let mut client = Client::connect(config().build()).await;
    client.reply().await;

    client
        .command(
            "MAIL FROM:<sender@example.org>",
            "503 Bad sequence of commands: send EHLO/HELO first.",
        )
        .await;
    client.send("EHLO client.test").await;
    client.reply().await;

    client
        .command(
            "RCPT TO:<rcpt@example.org>",
            "503 Bad sequence of commands: send 'MAIL FROM:' first.",
        )
        .await;
    client
        .command(
            "DATA",
            "503 Bad sequence of commands: send 'MAIL FROM:' first.",
        )
        .await;

    client.command("MAIL FROM:<sender@example.org>", "250 OK.").await;
    client
        .command(
            "MAIL FROM:<sender@example.org>",
            "503 Bad sequence of commands: nested MAIL command.",
        )
        .await;
    client
        .command(
            "DATA",
            "503 Bad sequence of commands: send 'RCPT TO:' first.",
        )
        .await;

    client.command("RCPT TO:<rcpt@example.org>", "250 OK.").await;
    client.command("DATA now", "500 Command line syntax error.").await;

    client.command("RSET", "250 OK.").await;
    client.command("NOOP", "250 OK.").await;
    client.command("MAIL FROM:<>", "250 OK.").await;
}

#[tokio::test]
async fn parameters() {
    let mut client = Client::greeted(config().build()).await;

    client
        .command(
            "MAIL FROM:<sender@example.org> SIZE=10000001",
            "552 Message exceeds fixed maximum message size.",
        )
        .await;
    client
        .command(
            "MAIL FROM:<sender@example.org> RET=FULL",
            "555 Unsupported parameter: RET=FULL",
        )
        .await;
    client
        .command(
            "MAIL FROM sender@example.org",
            "501 Syntax error, syntax: \"MAIL FROM:\" \"<\" address \">\" / \"<>\" [SP Mail-parameters] CRLF",
        )
        .await;
    client
        .command(
            "MAIL FROM:<sender@example.org> SIZE=1000 BODY=8BITMIME",
            "250 OK.",
        )
        .await;
    client
        .command(
            "RCPT TO:<rcpt@example.org> NOTIFY=NEVER",
            "555 Unsupported parameter: NOTIFY=NEVER",
        )
        .await;
}

#[tokio::test]
async fn recipients() {
    let hooks = Arc::new(Recorder::default());
    let mut client = Client::greeted(
        config()
            .with_hooks(hooks.clone())
            .with_limits(Limits {
                max_recipients: 2,
                ..Limits::default()
            })
            .build(),
    )
    .await;

    client
        .command(
            "MAIL FROM:<spammer@example.org>",
            "550 Sender refused.",
        )
        .await;
    client.command("MAIL FROM:<sender@example.org>", "250 OK.").await;
    client.command("RCPT TO:<Someone@Example.org>", "250 OK.").await;
    client.command("RCPT TO:<someone@example.org>", "250 OK.").await;
    client
        .command("RCPT TO:<blocked@example.org>", "550 Mailbox unavailable.")
        .await;
    client.command("RCPT TO:<other@example.org>", "250 OK.").await;
    client
        .command("RCPT TO:<third@example.org>", "452 Too many recipients")
        .await;

    client.send_raw(b"BDAT 4 LAST\r\ntest").await;
    client.expect_prefix("250 4 bytes received in ").await;

    assert_eq!(*hooks.recipients.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn chunking() {
    let hooks = Arc::new(Recorder::default());
    let mut client = Client::greeted(
        config()
            .with_hooks(hooks.clone())
            .with_limits(limits(100))
            .build(),
    )
    .await;

    client.envelope().await;

    client.send_raw(b"BDAT 10\r\n0123456789").await;
    client.expect_prefix("250 10 bytes received in ").await;
    client.send_raw(b"BDAT 20\r\n01234567890123456789").await;
    client.expect_prefix("250 20 bytes received in ").await;
    client
        .command(
            "DATA",
            "503 Bad sequence of commands: DATA and BDAT commands cannot be used in the same transaction.",
        )
        .await;
    client
        .command(
            "MAIL FROM:<sender@example.org>",
            "503 Bad sequence of commands: nested MAIL command.",
        )
        .await;
    client.send_raw(b"BDAT 5 LAST\r\nabcde").await;
    client.expect_prefix("250 5 bytes received in ").await;

    client
        .command(
            "BDAT 1",
            "503 Bad sequence of commands: BDAT LAST already received, send RSET.",
        )
        .await;
    client
        .command(
            "DATA",
            "503 Bad sequence of commands: BDAT LAST already received, send RSET.",
        )
        .await;
    client.command("RSET", "250 OK.").await;
    client.command("MAIL FROM:<sender@example.org>", "250 OK.").await;

    let stored = hooks.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(body(&stored[0]), b"0123456789012345678901234567890123456789abcde");
    assert_eq!(hooks.canceled(), 0);
}

#[tokio::test]
async fn chunk_over_the_limit_is_drained() {
    let hooks = Arc::new(Recorder::default());
    let mut client = Client::greeted(
        config()
            .with_hooks(hooks.clone())
            .with_limits(limits(100))
            .build(),
    )
    .await;

    client.envelope().await;

    client.send_raw(&[b"BDAT 60\r\n".as_slice(), &[b'a'; 60]].concat()).await;
    client.expect_prefix("250 60 bytes received in ").await;
    client.send_raw(&[b"BDAT 50 LAST\r\n".as_slice(), &[b'b'; 50]].concat()).await;
    client.expect("552 Too much mail data.").await;

    // The 50 bytes were consumed, so the next line is a command again.
    client.command("NOOP", "250 OK.").await;
    client.command("RSET", "250 OK.").await;

    assert!(hooks.stored().is_empty());
    assert_eq!(hooks.canceled(), 1);
}

#[tokio::test]
async fn chunks_after_the_limit_cancel_once() {
    let hooks = Arc::new(Recorder::default());
    let mut client = Client::greeted(
        config()
            .with_hooks(hooks.clone())
            .with_limits(limits(100))
            .build(),
    )
    .await;

    client.envelope().await;

    client.send_raw(&[b"BDAT 60\r\n".as_slice(), &[b'a'; 60]].concat()).await;
    client.expect_prefix("250 60 bytes received in ").await;
    client.send_raw(&[b"BDAT 50\r\n".as_slice(), &[b'b'; 50]].concat()).await;
    client.expect("552 Too much mail data.").await;
    client.send_raw(&[b"BDAT 5\r\n".as_slice(), &[b'c'; 5]].concat()).await;
    client.expect("552 Too much mail data.").await;
    client.command("RSET", "250 OK.").await;

    assert_eq!(hooks.canceled(), 1);

    // A fresh message goes through untouched.
    client.envelope().await;
    client.send_raw(&[b"BDAT 5 LAST\r\n".as_slice(), b"hello".as_slice()].concat()).await;
    client.expect_prefix("250 5 bytes received in ").await;

    assert_eq!(hooks.canceled(), 1);
    assert_eq!(hooks.stored().len(), 1);
}

#[tokio::test]
async fn bdat_syntax() {
    let mut client = Client::greeted(config().build()).await;
    client.envelope().await;

    client
        .command(
            "BDAT ten",
            "501 Syntax error(chunk-size must be integer), syntax: \"BDAT\" SP chunk-size [SP \"LAST\"] CRLF",
        )
        .await;
    client
        .command(
            "BDAT 1 FIRST",
            "501 Syntax error, syntax: \"BDAT\" SP chunk-size [SP \"LAST\"] CRLF",
        )
        .await;
}

#[tokio::test]
async fn data_over_the_limit_is_drained() {
    let hooks = Arc::new(Recorder::default());
    let mut client = Client::greeted(
        config()
            .with_hooks(hooks.clone())
            .with_limits(limits(600))
            .build(),
    )
    .await;

    client.envelope().await;
    client
        .command("DATA", "354 Start mail input; end with <CRLF>.<CRLF>")
        .await;

    let line = "x".repeat(98);
    for _ in 0..10 {
        client.send(&line).await;
    }
    client.send(".").await;
    client.expect("552 Too much mail data.").await;

    client.command("NOOP", "250 OK.").await;
    client.command("MAIL FROM:<sender@example.org>", "250 OK.").await;

    assert!(hooks.stored().is_empty());
    assert_eq!(hooks.canceled(), 1);
}

#[tokio::test]
async fn long_lines() {
    let hooks = Arc::new(Recorder::default());
    let mut client = Client::greeted(config().with_hooks(hooks.clone()).build()).await;

    client.send(&"a".repeat(32_001)).await;
    client.expect("500 Line too long.").await;

    client.envelope().await;
    client
        .command("DATA", "354 Start mail input; end with <CRLF>.<CRLF>")
        .await;
    client.send("short").await;
    client.send(&"b".repeat(40_000)).await;
    client.send("short again").await;
    client.send(".").await;
    client.expect("500 Line too long.").await;

    client.command("NOOP", "250 OK.").await;
    assert_eq!(hooks.canceled(), 1);
}

#[tokio::test]
async fn long_client_text_is_shortened_in_replies() {
    let mut client = Client::greeted(config().build()).await;

    client
        .command(
            &"x".repeat(600),
            &format!("502 Error: command '{}...' not recognized.", "X".repeat(64)),
        )
        .await;
    client.command("NOOP", "250 OK.").await;

    client
        .command(
            &format!("MAIL FROM:<sender@example.org> X={}", "y".repeat(600)),
            &format!("555 Unsupported parameter: X={}...", "y".repeat(62)),
        )
        .await;
    client
        .command("MAIL FROM:<sender@example.org>", "250 OK.")
        .await;
}

#[tokio::test]
async fn too_many_bad_commands() {
    let mut client = Client::connect(
        config()
            .with_limits(Limits {
                max_bad_commands: 2,
                ..Limits::default()
            })
            .build(),
    )
    .await;
    client.reply().await;

    client
        .command("FOO", "502 Error: command 'FOO' not recognized.")
        .await;
    client
        .command("bar baz", "502 Error: command 'BAR' not recognized.")
        .await;
    client
        .command(
            "QUX",
            "421 Too many bad commands, closing transmission channel.",
        )
        .await;

    assert!(client.closed().await);
    assert!(client.session.await.unwrap().is_ok());
}

#[tokio::test]
async fn rejected_session() {
    let hooks = Arc::new(Recorder {
        reject_greeting: true,
        ..Recorder::default()
    });
    let mut client = Client::connect(config().with_hooks(hooks).build()).await;

    client.expect("554 No service for you.").await;
    client
        .command(
            "EHLO client.test",
            "503 bad sequence of commands: Session rejected.",
        )
        .await;
    client
        .command("NOOP", "503 bad sequence of commands: Session rejected.")
        .await;
    client
        .command(
            "QUIT",
            &format!("221 {HOSTNAME} Service closing transmission channel."),
        )
        .await;
}

#[tokio::test]
async fn starttls_without_certificate() {
    let mut client = Client::greeted(config().build()).await;

    client
        .command(
            "STARTTLS now",
            "501 Syntax error: No parameters allowed.",
        )
        .await;
    client
        .command(
            "STARTTLS",
            "454 TLS not available: Server has no SSL certificate.",
        )
        .await;
}

#[tokio::test]
async fn auth_plain() {
    let hooks = Arc::new(Recorder::default());
    let mut client = Client::greeted(with_auth(true).with_hooks(hooks.clone()).build()).await;

    let wrong = STANDARD.encode(b"\0user\0wrong");
    client
        .command(
            &format!("AUTH PLAIN {wrong}"),
            "535 5.7.8 Authentication credentials invalid.",
        )
        .await;

    client.command("AUTH PLAIN", "334 ").await;
    client
        .command("", "535 5.7.8 Authentication credentials invalid.")
        .await;

    client.command("AUTH PLAIN", "334 ").await;
    client
        .command(
            &STANDARD.encode(b"\0user\0secret"),
            "235 2.7.0 Authentication succeeded.",
        )
        .await;
    client
        .command(
            "AUTH PLAIN",
            "503 Bad sequence of commands: you are already authenticated.",
        )
        .await;

    client.envelope().await;
    client.send_raw(b"BDAT 2 LAST\r\nhi").await;
    client.expect_prefix("250 2 bytes received in ").await;

    let stored = hooks.stored();
    assert!(
        String::from_utf8_lossy(&stored[0]).contains(" with ESMTPA; "),
        "{stored:?}"
    );
}

#[tokio::test]
async fn auth_login() {
    let mut client = Client::greeted(with_auth(true).build()).await;

    client.command("AUTH LOGIN", "334 VXNlcm5hbWU6").await;
    client.command("*", "501 Authentication canceled.").await;

    client.command("AUTH LOGIN", "334 VXNlcm5hbWU6").await;
    client.command("not base64!", "501 Invalid client response.").await;

    client
        .command(
            &format!("AUTH LOGIN {}", STANDARD.encode("user")),
            "334 UGFzc3dvcmQ6",
        )
        .await;
    client
        .command(
            &STANDARD.encode("secret"),
            "235 2.7.0 Authentication succeeded.",
        )
        .await;
}

#[tokio::test]
async fn auth_during_transaction() {
    let mut client = Client::greeted(with_auth(true).build()).await;

    client.command("MAIL FROM:<sender@example.org>", "250 OK.").await;
    client
        .command(
            "AUTH PLAIN",
            "503 Bad sequence of commands: The AUTH command is not permitted during a mail transaction.",
        )
        .await;
    client
        .command(
            "AUTH PLAIN not-base64",
            "503 Bad sequence of commands: The AUTH command is not permitted during a mail transaction.",
        )
        .await;
}

#[tokio::test]
async fn transaction_limit() {
    let mut client = Client::greeted(
        config()
            .with_limits(Limits {
                max_transactions: 1,
                ..Limits::default()
            })
            .build(),
    )
    .await;

    client.command("MAIL FROM:<sender@example.org>", "250 OK.").await;
    client.command("RSET", "250 OK.").await;
    client
        .command(
            "MAIL FROM:<sender@example.org>",
            "503 Bad sequence of commands: Maximum allowed mail transactions exceeded.",
        )
        .await;
}

#[tokio::test]
async fn shutdown_signal() {
    let mut client = Client::greeted(config().build()).await;

    client.signal.send(Signal::Shutdown).unwrap();
    client
        .expect(&format!(
            "421 {HOSTNAME} Service shutting down, closing transmission channel."
        ))
        .await;

    assert!(client.closed().await);
    let result = client.session.await.unwrap();
    assert!(matches!(result, Err(SessionError::Shutdown)));
    assert!(!result.unwrap_err().is_client_error());
}

#[tokio::test]
async fn idle_timeout() {
    let mut client = Client::greeted(
        config()
            .with_timeouts(ServerTimeouts {
                command_secs: 1,
                ..ServerTimeouts::default()
            })
            .build(),
    )
    .await;

    client.expect("421 Idle timeout, closing connection.").await;
    let result = client.session.await.unwrap();
    assert!(matches!(result, Err(SessionError::Timeout(1))));
    assert!(result.unwrap_err().is_client_error());
}

#[tokio::test]
async fn client_disconnect_ends_session() {
    let client = Client::greeted(config().build()).await;
    let Client {
        reader,
        writer,
        session,
        ..
    } = client;

    drop(writer);
    drop(reader);

    assert!(session.await.unwrap().is_ok());
}
