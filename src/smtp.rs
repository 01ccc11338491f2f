pub mod session;

use crate::maildir::writer::MessageWriter;
use crate::settings::Config;
use anyhow::Result;
use log::{debug, error, info, warn};
use mailparse::MailHeaderMap;
use session::{Session, Step};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
pub struct SmtpContext {
    pub hostname: String,
    pub max_message_size: usize,
    pub writer: Arc<MessageWriter>,
}

pub async fn start_smtp_server(config: &Config, writer: Arc<MessageWriter>) -> Result<()> {
    let listener = TcpListener::bind((config.bind_host.as_str(), config.smtp_port)).await?;
    info!("SMTP server listening on {}:{}", config.bind_host, config.smtp_port);
    let context = SmtpContext {
        hostname: config.mail_domain.clone(),
        max_message_size: config.max_message_size,
        writer,
    };
    serve(listener, context).await
}

pub async fn serve(listener: TcpListener, context: SmtpContext) -> Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        let context = context.clone();
        tokio::spawn(async move {
            debug!("SMTP connection from {}", addr);
            if let Err(e) = handle_connection(socket, &context).await {
                warn!("SMTP session with {} ended with error: {}", addr, e);
            }
            debug!("SMTP connection from {} closed", addr);
        });
    }
}

async fn handle_connection(socket: TcpStream, context: &SmtpContext) -> Result<()> {
    socket.set_nodelay(true)?;
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut session = Session::new(context.hostname.clone(), context.max_message_size);
    let mut line = Vec::new();

    writer.write_all(session.greeting().to_string().as_bytes()).await?;

    loop {
        let step = match read_line_bounded(&mut reader, &mut line, session.line_limit()).await? {
            LineRead::Eof => break,
            LineRead::TooLong => session.line_too_long(),
            LineRead::Line => {
                let trimmed = line.strip_suffix(b"\n").unwrap_or(&line[..]);
                let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
                session.handle_line(trimmed)
            }
        };

        match step {
            Step::Continue => {}
            Step::Reply(reply) => writer.write_all(reply.to_string().as_bytes()).await?,
            Step::Close(reply) => {
                writer.write_all(reply.to_string().as_bytes()).await?;
                break;
            }
            Step::Deliver(message) => {
                let recipients = session.recipients().join(", ");
                let sender = session.sender().unwrap_or("<>").to_string();
                let outcome = match context.writer.commit(&message).await {
                    Ok(location) => {
                        info!(
                            "Stored {} ({} bytes) from {} for {}{}",
                            location.filename,
                            message.len(),
                            sender,
                            recipients,
                            describe(&message)
                        );
                        Ok(location.filename)
                    }
                    Err(e) => {
                        error!("Failed to store message for {}: {}", recipients, e);
                        Err(e.to_string())
                    }
                };
                let reply = session.delivered(outcome);
                writer.write_all(reply.to_string().as_bytes()).await?;
            }
        }
    }
    writer.shutdown().await.ok();
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    /// The line went past the limit; everything up to its LF was dropped.
    TooLong,
    Eof,
}

/// Reads one LF-terminated line into `line`, never holding more than `limit`
/// bytes of it.
async fn read_line_bounded<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut overflow = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (overflow, line.is_empty()) {
                (true, _) => LineRead::TooLong,
                (false, true) => LineRead::Eof,
                (false, false) => LineRead::Line,
            });
        }

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let used = chunk.len();
        if !overflow {
            if line.len() + chunk.len() > limit {
                overflow = true;
                line.clear();
            } else {
                line.extend_from_slice(chunk);
            }
        }
        reader.consume(used);

        if done {
            return Ok(if overflow { LineRead::TooLong } else { LineRead::Line });
        }
    }
}

/// Best-effort ` from=… subject=…` suffix for the delivery log line.
fn describe(message: &[u8]) -> String {
    match mailparse::parse_headers(message) {
        Ok((headers, _)) => format!(
            " from={:?} to={:?} subject={:?}",
            headers.get_first_value("From").unwrap_or_default(),
            headers.get_first_value("To").unwrap_or_default(),
            headers.get_first_value("Subject").unwrap_or_default()
        ),
        Err(e) => {
            debug!("Could not read headers for logging: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maildir::writer::Ownership;
    use crate::maildir::Maildir;
    use tokio::io::AsyncReadExt;

    async fn start(dir: &std::path::Path) -> (Maildir, std::net::SocketAddr) {
        start_with_limit(dir, 1 << 20).await
    }

    async fn start_with_limit(dir: &std::path::Path, max_message_size: usize) -> (Maildir, std::net::SocketAddr) {
        let maildir = Maildir::new(dir, "catchall");
        let context = SmtpContext {
            hostname: "mail.test".to_string(),
            max_message_size,
            writer: Arc::new(MessageWriter::new(&maildir, "mail.test", Ownership::default())),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, context));
        (maildir, addr)
    }

    async fn expect(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>, code: &str) -> String {
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert!(line.starts_with(code), "expected {}, got {:?}", code, line);
            // Continuation lines use `-` after the code.
            if line.as_bytes().get(3) != Some(&b'-') {
                return line;
            }
        }
    }

    #[tokio::test]
    async fn delivers_message_for_arbitrary_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let (maildir, addr) = start(dir.path()).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        expect(&mut reader, "220").await;
        write_half.write_all(b"EHLO tester\r\n").await.unwrap();
        expect(&mut reader, "250").await;
        write_half.write_all(b"MAIL FROM:<from@remote.test>\r\n").await.unwrap();
        expect(&mut reader, "250").await;
        write_half.write_all(b"RCPT TO:<whoever@any-domain.example>\r\n").await.unwrap();
        expect(&mut reader, "250").await;
        write_half.write_all(b"DATA\r\n").await.unwrap();
        expect(&mut reader, "354").await;
        write_half
            .write_all(b"Subject: over the wire\r\n\r\nhello\r\n..dot\r\n.\r\n")
            .await
            .unwrap();
        let queued = expect(&mut reader, "250").await;
        write_half.write_all(b"QUIT\r\n").await.unwrap();
        expect(&mut reader, "221").await;

        let filename = queued.trim().rsplit(' ').next().unwrap().to_string();
        let stored = std::fs::read(maildir.root().join("new").join(&filename)).unwrap();
        assert_eq!(stored, b"Subject: over the wire\r\n\r\nhello\r\n.dot\r\n");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_signalled_as_temporary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("catchall"), b"").unwrap();
        let (_, addr) = start(dir.path()).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        expect(&mut reader, "220").await;
        write_half
            .write_all(b"HELO t\r\nMAIL FROM:<a@b>\r\nRCPT TO:<c@d>\r\nDATA\r\n")
            .await
            .unwrap();
        for code in ["250", "250", "250", "354"] {
            expect(&mut reader, code).await;
        }
        write_half.write_all(b"Subject: x\r\n\r\nbody\r\n.\r\n").await.unwrap();
        expect(&mut reader, "451").await;
    }

    #[tokio::test]
    async fn bounded_reader_drops_overlong_lines() {
        let mut input: &[u8] = b"short\r\n0123456789abcdef\r\nnext\r\ntail";
        let mut line = Vec::new();

        assert_eq!(read_line_bounded(&mut input, &mut line, 10).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"short\r\n");
        assert_eq!(read_line_bounded(&mut input, &mut line, 10).await.unwrap(), LineRead::TooLong);
        assert!(line.is_empty());
        assert_eq!(read_line_bounded(&mut input, &mut line, 10).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"next\r\n");
        assert_eq!(read_line_bounded(&mut input, &mut line, 10).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"tail");
        assert_eq!(read_line_bounded(&mut input, &mut line, 10).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn overlong_lines_are_refused_without_buffering() {
        let dir = tempfile::tempdir().unwrap();
        let (maildir, addr) = start_with_limit(dir.path(), 1024).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        expect(&mut reader, "220").await;
        let mut command = vec![b'a'; 4 * 1024 * 1024];
        command.extend_from_slice(b"\r\n");
        write_half.write_all(&command).await.unwrap();
        expect(&mut reader, "500").await;
        write_half.write_all(b"NOOP\r\n").await.unwrap();
        expect(&mut reader, "250").await;

        write_half
            .write_all(b"MAIL FROM:<a@b>\r\nRCPT TO:<c@d>\r\nDATA\r\n")
            .await
            .unwrap();
        for code in ["250", "250", "354"] {
            expect(&mut reader, code).await;
        }
        let mut body = b"Subject: big\r\n\r\n".to_vec();
        body.extend(std::iter::repeat(b'z').take(2 * 1024 * 1024));
        body.extend_from_slice(b"\r\n.\r\n");
        write_half.write_all(&body).await.unwrap();
        expect(&mut reader, "552").await;

        write_half.write_all(b"QUIT\r\n").await.unwrap();
        expect(&mut reader, "221").await;
        assert_eq!(std::fs::read_dir(maildir.root().join("new")).map(|d| d.count()).unwrap_or(0), 0);
    }
}
