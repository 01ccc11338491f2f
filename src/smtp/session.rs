//! Catch-all SMTP session: every recipient is accepted and every complete
//! message is handed to the store.
//!
//! The session is a pure state machine over input lines; the connection
//! loop in [`crate::smtp`] performs the actual I/O and the commit.

use log::{debug, info, warn};
use std::fmt;

/// Longest command line accepted outside DATA, CRLF included.
pub const COMMAND_LINE_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No open transaction.
    Connected,
    /// `MAIL FROM` seen, waiting for a recipient.
    MailFrom,
    RecipientAccepted,
    Receiving,
    Committed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Reply {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Reply { code, lines }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            write!(f, "{}{}{}\r\n", self.code, sep, line)?;
        }
        Ok(())
    }
}

/// What the connection loop must do after feeding a line.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Reply(Reply),
    /// Message complete: commit it, then report back via [`Session::delivered`].
    Deliver(Vec<u8>),
    /// Consumed silently (a DATA line).
    Continue,
    Close(Reply),
}

#[derive(Debug)]
pub struct Session {
    hostname: String,
    max_size: usize,
    state: SessionState,
    sender: Option<String>,
    recipients: Vec<String>,
    data: Vec<u8>,
    oversized: bool,
}

impl Session {
    pub fn new(hostname: impl Into<String>, max_size: usize) -> Self {
        Session {
            hostname: hostname.into(),
            max_size,
            state: SessionState::Connected,
            sender: None,
            recipients: Vec::new(),
            data: Vec::new(),
            oversized: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn greeting(&self) -> Reply {
        Reply::new(220, format!("{} ESMTP ready", self.hostname))
    }

    /// Most bytes the connection may buffer for the next line, CRLF included.
    pub fn line_limit(&self) -> usize {
        if self.state == SessionState::Receiving {
            self.max_size.saturating_add(2)
        } else {
            COMMAND_LINE_LIMIT
        }
    }

    /// Called instead of [`Session::handle_line`] when a line exceeded
    /// [`Session::line_limit`] and was discarded up to its LF.
    pub fn line_too_long(&mut self) -> Step {
        if self.state == SessionState::Receiving {
            self.oversized = true;
            self.data = Vec::new();
            return Step::Continue;
        }
        warn!("Discarded command line over {} bytes", COMMAND_LINE_LIMIT);
        Step::Reply(Reply::new(500, "Line too long"))
    }

    /// Feeds one line without its trailing CRLF.
    pub fn handle_line(&mut self, line: &[u8]) -> Step {
        if self.state == SessionState::Receiving {
            return self.receive(line);
        }

        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        let (verb, args) = match line.split_once(' ') {
            Some((verb, args)) => (verb.to_ascii_uppercase(), args.trim()),
            None => (line.to_ascii_uppercase(), ""),
        };

        match verb.as_str() {
            "EHLO" => {
                self.reset();
                Step::Reply(Reply::multiline(
                    250,
                    vec![
                        format!("{} greets {}", self.hostname, non_empty(args, "client")),
                        format!("SIZE {}", self.max_size),
                        "8BITMIME".to_string(),
                        "PIPELINING".to_string(),
                    ],
                ))
            }
            "HELO" => {
                self.reset();
                Step::Reply(Reply::new(250, self.hostname.clone()))
            }
            "MAIL" => self.mail_from(args),
            "RCPT" => self.rcpt_to(args),
            "DATA" => self.start_data(),
            "RSET" => {
                self.reset();
                Step::Reply(Reply::new(250, "OK"))
            }
            "NOOP" => Step::Reply(Reply::new(250, "OK")),
            "VRFY" => Step::Reply(Reply::new(252, "Cannot verify user, but will accept message")),
            "QUIT" => Step::Close(Reply::new(221, format!("{} closing connection", self.hostname))),
            _ => {
                debug!("Unrecognised command: {}", line);
                Step::Reply(Reply::new(502, "Command not implemented"))
            }
        }
    }

    /// Records the outcome of the commit requested by [`Step::Deliver`].
    pub fn delivered(&mut self, result: Result<String, String>) -> Reply {
        let reply = match result {
            Ok(id) => {
                self.state = SessionState::Committed;
                Reply::new(250, format!("OK queued as {}", id))
            }
            Err(err) => {
                self.state = SessionState::Rejected;
                debug!("Delivery rejected: {}", err);
                Reply::new(451, "Requested action aborted: local error in processing")
            }
        };
        self.clear_transaction();
        reply
    }

    fn mail_from(&mut self, args: &str) -> Step {
        if matches!(self.state, SessionState::MailFrom | SessionState::RecipientAccepted) {
            return Step::Reply(Reply::new(503, "Sender already specified"));
        }
        let Some(path) = strip_keyword(args, "FROM:") else {
            return Step::Reply(Reply::new(501, "Syntax: MAIL FROM:<address>"));
        };
        self.clear_transaction();
        self.sender = Some(path_address(path));
        self.state = SessionState::MailFrom;
        Step::Reply(Reply::new(250, "OK"))
    }

    fn rcpt_to(&mut self, args: &str) -> Step {
        if !matches!(self.state, SessionState::MailFrom | SessionState::RecipientAccepted) {
            return Step::Reply(Reply::new(503, "Need MAIL before RCPT"));
        }
        let Some(path) = strip_keyword(args, "TO:") else {
            return Step::Reply(Reply::new(501, "Syntax: RCPT TO:<address>"));
        };
        // Catch-all: no mailbox or domain check.
        let recipient = path_address(path);
        debug!("Accepting recipient {}", recipient);
        self.recipients.push(recipient);
        self.state = SessionState::RecipientAccepted;
        Step::Reply(Reply::new(250, "OK"))
    }

    fn start_data(&mut self) -> Step {
        if self.state != SessionState::RecipientAccepted {
            return Step::Reply(Reply::new(503, "Need RCPT before DATA"));
        }
        self.data.clear();
        self.oversized = false;
        self.state = SessionState::Receiving;
        Step::Reply(Reply::new(354, "End data with <CR><LF>.<CR><LF>"))
    }

    fn receive(&mut self, line: &[u8]) -> Step {
        if line == b"." {
            if self.oversized {
                info!("Rejected message over {} bytes", self.max_size);
                self.state = SessionState::Rejected;
                self.clear_transaction();
                return Step::Reply(Reply::new(552, "Message exceeds fixed maximum message size"));
            }
            return Step::Deliver(std::mem::take(&mut self.data));
        }
        if self.oversized {
            return Step::Continue;
        }

        let line = line.strip_prefix(b".").unwrap_or(line);
        if self.data.len() + line.len() + 2 > self.max_size {
            self.oversized = true;
            self.data = Vec::new();
            return Step::Continue;
        }
        self.data.extend_from_slice(line);
        self.data.extend_from_slice(b"\r\n");
        Step::Continue
    }

    fn reset(&mut self) {
        self.clear_transaction();
        self.state = SessionState::Connected;
    }

    fn clear_transaction(&mut self) {
        self.sender = None;
        self.recipients.clear();
        self.data.clear();
        self.oversized = false;
    }
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

/// `FROM:<a@b> SIZE=10` -> `<a@b> SIZE=10`, case-insensitively.
fn strip_keyword<'a>(args: &'a str, keyword: &str) -> Option<&'a str> {
    let head = args.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(args[keyword.len()..].trim())
    } else {
        None
    }
}

/// Address inside the angle brackets, ignoring ESMTP parameters.
fn path_address(path: &str) -> String {
    let path = path.trim();
    if let Some(rest) = path.strip_prefix('<') {
        if let Some(end) = rest.find('>') {
            return rest[..end].trim().to_string();
        }
    }
    path.split_whitespace().next().unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("mail.test", 1024)
    }

    fn code(step: Step) -> u16 {
        match step {
            Step::Reply(reply) | Step::Close(reply) => reply.code,
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    fn open_transaction(s: &mut Session) {
        assert_eq!(code(s.handle_line(b"EHLO client.test")), 250);
        assert_eq!(code(s.handle_line(b"MAIL FROM:<sender@remote.test>")), 250);
    }

    #[test]
    fn any_recipient_is_accepted() {
        let mut s = session();
        open_transaction(&mut s);
        for rcpt in ["<nobody@nowhere.invalid>", "<x@y>", "<postmaster>"] {
            assert_eq!(code(s.handle_line(format!("RCPT TO:{}", rcpt).as_bytes())), 250);
        }
        assert_eq!(s.state(), SessionState::RecipientAccepted);
        assert_eq!(s.recipients().len(), 3);
        assert_eq!(s.sender(), Some("sender@remote.test"));
    }

    #[test]
    fn full_transaction_delivers_unstuffed_bytes() {
        let mut s = session();
        open_transaction(&mut s);
        s.handle_line(b"rcpt to:<a@b.c>");
        assert_eq!(code(s.handle_line(b"DATA")), 354);
        assert_eq!(s.state(), SessionState::Receiving);

        assert_eq!(s.handle_line(b"Subject: x"), Step::Continue);
        assert_eq!(s.handle_line(b""), Step::Continue);
        assert_eq!(s.handle_line(b"..leading dot"), Step::Continue);
        let step = s.handle_line(b".");

        assert_eq!(step, Step::Deliver(b"Subject: x\r\n\r\n.leading dot\r\n".to_vec()));
        let reply = s.delivered(Ok("1.ab.host".to_string()));
        assert_eq!(reply.code, 250);
        assert_eq!(s.state(), SessionState::Committed);
    }

    #[test]
    fn failed_commit_is_temporary_failure() {
        let mut s = session();
        open_transaction(&mut s);
        s.handle_line(b"RCPT TO:<a@b.c>");
        s.handle_line(b"DATA");
        s.handle_line(b"x");
        assert!(matches!(s.handle_line(b"."), Step::Deliver(_)));

        let reply = s.delivered(Err("disk full".to_string()));
        assert_eq!(reply.code, 451);
        assert_eq!(s.state(), SessionState::Rejected);

        // A new transaction may follow.
        assert_eq!(code(s.handle_line(b"MAIL FROM:<>")), 250);
        assert_eq!(s.sender(), Some(""));
    }

    #[test]
    fn sequence_errors() {
        let mut s = session();
        assert_eq!(code(s.handle_line(b"RCPT TO:<a@b.c>")), 503);
        assert_eq!(code(s.handle_line(b"DATA")), 503);
        assert_eq!(code(s.handle_line(b"MAIL FROM:<a@b.c>")), 250);
        assert_eq!(code(s.handle_line(b"MAIL FROM:<a@b.c>")), 503);
        assert_eq!(code(s.handle_line(b"DATA")), 503);
        assert_eq!(code(s.handle_line(b"MAIL TO:<a@b.c>")), 503);
        assert_eq!(code(s.handle_line(b"RSET")), 250);
        assert_eq!(s.state(), SessionState::Connected);
        assert_eq!(code(s.handle_line(b"MAIL <a@b.c>")), 501);
    }

    #[test]
    fn oversized_message_is_rejected_after_terminator() {
        let mut s = Session::new("mail.test", 16);
        open_transaction(&mut s);
        s.handle_line(b"RCPT TO:<a@b.c>");
        s.handle_line(b"DATA");
        assert_eq!(s.handle_line(b"0123456789abcdefXYZ"), Step::Continue);
        assert_eq!(s.handle_line(b"more"), Step::Continue);

        assert_eq!(code(s.handle_line(b".")), 552);
        assert_eq!(s.state(), SessionState::Rejected);
    }

    #[test]
    fn overlong_lines() {
        let mut s = Session::new("mail.test", 64);
        assert_eq!(s.line_limit(), COMMAND_LINE_LIMIT);
        assert_eq!(code(s.line_too_long()), 500);
        assert_eq!(s.state(), SessionState::Connected);

        open_transaction(&mut s);
        s.handle_line(b"RCPT TO:<a@b.c>");
        s.handle_line(b"DATA");
        assert_eq!(s.line_limit(), 66);
        assert_eq!(s.line_too_long(), Step::Continue);
        assert_eq!(s.handle_line(b"short"), Step::Continue);
        assert_eq!(code(s.handle_line(b".")), 552);
    }

    #[test]
    fn misc_commands() {
        let mut s = session();
        assert_eq!(code(s.handle_line(b"noop")), 250);
        assert_eq!(code(s.handle_line(b"VRFY someone")), 252);
        assert_eq!(code(s.handle_line(b"STARTTLS")), 502);
        assert!(matches!(s.handle_line(b"QUIT"), Step::Close(r) if r.code == 221));
    }

    #[test]
    fn ehlo_reply_is_multiline() {
        let mut s = session();
        let Step::Reply(reply) = s.handle_line(b"EHLO me") else {
            panic!("expected reply");
        };
        let text = reply.to_string();
        assert!(text.starts_with("250-mail.test greets me\r\n"));
        assert!(text.contains("250-SIZE 1024\r\n"));
        assert!(text.ends_with("250 PIPELINING\r\n"));
    }

    #[test]
    fn path_parsing() {
        assert_eq!(path_address("<a@b.c> SIZE=100"), "a@b.c");
        assert_eq!(path_address("a@b.c"), "a@b.c");
        assert_eq!(path_address("<>"), "");
    }
}
