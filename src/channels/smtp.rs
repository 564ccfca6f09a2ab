//! SMTP intake: a small ESMTP listener that turns each accepted message
//! into an [`Envelope`] and hands it to a [`NotificationSink`].
//!
//! A sink error rejects the message with `554` so the sending MTA keeps it
//! queued and retries later.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{SmtpError, escape_multiline};
use crate::mail::mime::parse_envelope;
use crate::pipeline::processor::NotificationSink;

/// Longest accepted command line, including CRLF.
const MAX_COMMAND_LINE: usize = 1024;

/// Session closes after this long without a complete command.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Listener settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub listen: String,
    /// Name announced in the greeting and `EHLO` reply.
    pub primary_host: String,
    /// Largest accepted message in bytes.
    pub max_envelope_size: usize,
    /// How long `serve` waits for in-flight sessions after cancellation.
    pub shutdown_timeout: Duration,
    pub idle_timeout: Duration,
}

pub struct SmtpServer {
    listener: TcpListener,
    config: Arc<SmtpConfig>,
    sink: Arc<dyn NotificationSink>,
    span: tracing::Span,
}

impl SmtpServer {
    pub async fn bind(
        config: SmtpConfig,
        sink: Arc<dyn NotificationSink>,
        span: tracing::Span,
    ) -> Result<Self, SmtpError> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|source| SmtpError::Bind {
                addr: config.listen.clone(),
                source,
            })?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            sink,
            span,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SmtpError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires, then drain open sessions.
    ///
    /// Idle sessions are told to go away as soon as `cancel` fires; a session
    /// in the middle of a delivery is allowed to finish until the shutdown
    /// deadline, after which it is aborted and
    /// [`SmtpError::ShutdownTimedOut`] is returned.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), SmtpError> {
        let Self {
            listener,
            config,
            sink,
            span,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(parent: &span, %addr, "SMTP listener started");
        }

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session = Session::new(Arc::clone(&config), Arc::clone(&sink), cancel.clone());
                        let session_span = info_span!(parent: &span, "smtp_session", %peer);
                        sessions.spawn(session.run(stream).instrument(session_span));
                    }
                    Err(e) => warn!(parent: &span, error = %e, "Failed to accept SMTP connection"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(parent: &span, error = %e, "SMTP session task failed");
                    }
                }
            }
        }

        drop(listener);
        info!(parent: &span, in_flight = sessions.len(), "SMTP listener stopping");

        let drained = tokio::time::timeout(config.shutdown_timeout, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            sessions.abort_all();
            return Err(SmtpError::ShutdownTimedOut(config.shutdown_timeout));
        }
        info!(parent: &span, "SMTP listener stopped");
        Ok(())
    }
}

/// Outcome of one protocol step.
enum Flow {
    Continue,
    Close,
}

struct Session {
    config: Arc<SmtpConfig>,
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
    greeted: bool,
    mail_from: Option<String>,
    rcpt_to: Vec<String>,
}

impl Session {
    fn new(config: Arc<SmtpConfig>, sink: Arc<dyn NotificationSink>, cancel: CancellationToken) -> Self {
        Self {
            config,
            sink,
            cancel,
            greeted: false,
            mail_from: None,
            rcpt_to: Vec::new(),
        }
    }

    async fn run(mut self, stream: TcpStream) {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        if let Err(e) = self.converse(&mut reader, &mut writer).await {
            debug!(error = %e, "SMTP session ended with I/O error");
        }
    }

    async fn converse<R, W>(&mut self, reader: &mut R, writer: &mut W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let greeting = format!("220 {} ESMTP smtp-to-telegram", self.config.primary_host);
        reply(writer, &greeting).await?;

        let mut line = Vec::with_capacity(256);
        loop {
            line.clear();
            let read = tokio::select! {
                _ = self.cancel.cancelled() => {
                    reply(writer, "421 4.3.2 Service shutting down").await?;
                    return Ok(());
                }
                read = tokio::time::timeout(self.config.idle_timeout, read_line(reader, &mut line, MAX_COMMAND_LINE)) => read,
            };

            let n = match read {
                Ok(n) => n?,
                Err(_) => {
                    reply(writer, "421 4.4.2 Idle timeout, closing connection").await?;
                    return Ok(());
                }
            };
            if n == 0 {
                return Ok(());
            }
            if !line.ends_with(b"\n") {
                reply(writer, "500 5.5.2 Line too long").await?;
                return Ok(());
            }

            let command = String::from_utf8_lossy(&line);
            match self.handle(command.trim_end(), reader, writer).await? {
                Flow::Continue => {}
                Flow::Close => return Ok(()),
            }
        }
    }

    async fn handle<R, W>(&mut self, command: &str, reader: &mut R, writer: &mut W) -> std::io::Result<Flow>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (verb, arg) = match command.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
            None => (command.to_ascii_uppercase(), ""),
        };

        match verb.as_str() {
            "HELO" | "EHLO" => {
                if arg.is_empty() {
                    reply(writer, "501 5.5.4 Syntax: HELO hostname").await?;
                    return Ok(Flow::Continue);
                }
                self.reset();
                self.greeted = true;
                let host = &self.config.primary_host;
                if verb == "EHLO" {
                    let lines = format!(
                        "250-{host} greets {arg}\r\n250-SIZE {}\r\n250 8BITMIME",
                        self.config.max_envelope_size
                    );
                    reply(writer, &lines).await?;
                } else {
                    reply(writer, &format!("250 {host}")).await?;
                }
            }
            "MAIL" => {
                if !self.greeted {
                    reply(writer, "503 5.5.1 Send HELO/EHLO first").await?;
                } else if self.mail_from.is_some() {
                    reply(writer, "503 5.5.1 Nested MAIL command").await?;
                } else {
                    match parse_path(arg, "FROM:") {
                        Some((addr, params)) => {
                            if declared_size(params).is_some_and(|s| s > self.config.max_envelope_size) {
                                reply(writer, "552 5.3.4 Message size exceeds fixed maximum message size")
                                    .await?;
                            } else {
                                self.mail_from = Some(addr.to_string());
                                reply(writer, "250 2.1.0 OK").await?;
                            }
                        }
                        None => reply(writer, "501 5.5.4 Syntax: MAIL FROM:<address>").await?,
                    }
                }
            }
            "RCPT" => {
                if self.mail_from.is_none() {
                    reply(writer, "503 5.5.1 Need MAIL command").await?;
                } else {
                    match parse_path(arg, "TO:") {
                        Some((addr, _)) if !addr.is_empty() => {
                            self.rcpt_to.push(addr.to_string());
                            reply(writer, "250 2.1.5 OK").await?;
                        }
                        _ => reply(writer, "501 5.5.4 Syntax: RCPT TO:<address>").await?,
                    }
                }
            }
            "DATA" => {
                if self.rcpt_to.is_empty() {
                    reply(writer, "503 5.5.1 Need RCPT command").await?;
                } else {
                    reply(writer, "354 End data with <CR><LF>.<CR><LF>").await?;
                    let data = read_data(
                        reader,
                        self.config.max_envelope_size,
                        self.config.idle_timeout,
                    )
                    .await?;
                    let answer = match data {
                        None => return Ok(Flow::Close),
                        Some(Data::TimedOut) => {
                            reply(writer, "421 4.4.2 Idle timeout, closing connection").await?;
                            return Ok(Flow::Close);
                        }
                        Some(Data::TooLarge) => {
                            "552 5.3.4 Message size exceeds fixed maximum message size".to_string()
                        }
                        Some(Data::Complete(raw)) => self.deliver(&raw).await,
                    };
                    self.reset();
                    reply(writer, &answer).await?;
                }
            }
            "RSET" => {
                self.reset();
                reply(writer, "250 2.0.0 OK").await?;
            }
            "NOOP" => reply(writer, "250 2.0.0 OK").await?,
            "VRFY" => reply(writer, "252 2.5.0 Cannot VRFY user").await?,
            "QUIT" => {
                reply(writer, "221 2.0.0 Bye").await?;
                return Ok(Flow::Close);
            }
            _ => reply(writer, "500 5.5.2 Command not recognized").await?,
        }
        Ok(Flow::Continue)
    }

    /// Parse and notify; returns the reply line for the client.
    async fn deliver(&self, raw: &[u8]) -> String {
        let from = self.mail_from.as_deref().unwrap_or_default();
        let envelope = parse_envelope(from, &self.rcpt_to, raw);
        info!(
            envelope_id = %envelope.id,
            from = %envelope.from,
            recipients = envelope.to.len(),
            size = raw.len(),
            parts = envelope.parts.len(),
            parts_size = envelope.parts_size(),
            "Envelope received"
        );

        match self.sink.notify(&envelope).await {
            Ok(()) => format!("250 2.0.0 OK: queued as {}", envelope.id),
            Err(e) => {
                let message = escape_multiline(&e.to_string());
                error!(envelope_id = %envelope.id, error = %message, "Envelope rejected");
                format!("554 Error: {message}")
            }
        }
    }

    fn reset(&mut self) {
        self.mail_from = None;
        self.rcpt_to.clear();
    }
}

enum Data {
    Complete(Vec<u8>),
    TooLarge,
    TimedOut,
}

/// Read a DATA section up to the lone dot, undoing dot-stuffing.
///
/// Each read waits at most `idle_timeout` and returns at most one line of
/// `max_size + 3` bytes; longer lines arrive in chunks and mark the message
/// too large. Oversized messages are consumed to the terminator and dropped.
/// Returns `None` if the peer disconnects first.
async fn read_data<R>(
    reader: &mut R,
    max_size: usize,
    idle_timeout: Duration,
) -> std::io::Result<Option<Data>>
where
    R: AsyncBufRead + Unpin,
{
    let line_cap = max_size.saturating_add(3);
    let mut data = Vec::new();
    let mut too_large = false;
    let mut at_line_start = true;
    let mut line = Vec::with_capacity(1024);

    loop {
        line.clear();
        let read = tokio::time::timeout(idle_timeout, read_line(reader, &mut line, line_cap)).await;
        let n = match read {
            Ok(n) => n?,
            Err(_) => return Ok(Some(Data::TimedOut)),
        };
        if n == 0 {
            return Ok(None);
        }

        let starts_line = at_line_start;
        at_line_start = line.ends_with(b"\n");
        if starts_line && (line == b".\r\n" || line == b".\n") {
            break;
        }

        let content: &[u8] = if starts_line {
            line.strip_prefix(b".").unwrap_or(&line)
        } else {
            &line
        };
        if too_large || !at_line_start || data.len() + content.len() > max_size {
            too_large = true;
            data.clear();
            continue;
        }
        data.extend_from_slice(content);
    }

    Ok(Some(if too_large {
        Data::TooLarge
    } else {
        Data::Complete(data)
    }))
}

/// `read_until` capped at `limit` bytes.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    reader.take(limit as u64).read_until(b'\n', buf).await
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

/// Split `FROM:<addr> PARAMS` into the bare address and the parameters.
fn parse_path<'a>(arg: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let head = arg.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = arg[keyword.len()..].trim_start();
    if let Some(inner) = rest.strip_prefix('<') {
        let end = inner.find('>')?;
        return Some((inner[..end].trim(), inner[end + 1..].trim()));
    }
    let (addr, params) = rest.split_once(' ').unwrap_or((rest, ""));
    (!addr.is_empty()).then(|| (addr, params.trim()))
}

/// Value of a `SIZE=` parameter, if present.
fn declared_size(params: &str) -> Option<usize> {
    params.split_whitespace().find_map(|p| {
        let (key, value) = p.split_once('=')?;
        key.eq_ignore_ascii_case("SIZE").then(|| value.parse().ok())?
    })
}
