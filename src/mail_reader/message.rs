use crate::error::Result;
use mailparse::{addrparse_header, parse_mail, DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Address {
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content_id: Option<String>,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn is_image(&self) -> bool {
        self.content_type.to_ascii_lowercase().starts_with("image/")
    }
}

/// Decoded view of a stored message. Built fresh on every read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub subject: Option<String>,
    pub date: Option<String>,
    /// `Date` header as unix seconds, when it parses.
    pub sent_at: Option<i64>,
    pub headers: Vec<Header>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// MIME decoding capability.
pub trait MessageParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<ParsedMessage>;
}

/// [`MessageParser`] backed by the `mailparse` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct MailParser;

impl MessageParser for MailParser {
    fn parse(&self, raw: &[u8]) -> Result<ParsedMessage> {
        let parsed_mail = parse_mail(raw)?;

        let mut message = ParsedMessage {
            from: addresses(&parsed_mail, "From"),
            to: addresses(&parsed_mail, "To"),
            cc: addresses(&parsed_mail, "Cc"),
            subject: parsed_mail.headers.get_first_value("Subject"),
            date: parsed_mail.headers.get_first_value("Date"),
            headers: parsed_mail
                .headers
                .iter()
                .map(|header| Header {
                    name: header.get_key(),
                    value: header.get_value(),
                })
                .collect(),
            ..Default::default()
        };
        message.sent_at = message
            .date
            .as_deref()
            .and_then(|date| mailparse::dateparse(date).ok());

        collect_parts(&parsed_mail, &mut message)?;
        Ok(message)
    }
}

fn addresses(parsed_mail: &ParsedMail, name: &str) -> Vec<Address> {
    let Some(header) = parsed_mail.headers.get_first_header(name) else {
        return Vec::new();
    };
    match addrparse_header(header) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.clone()],
                MailAddr::Group(group) => group.addrs.clone(),
            })
            .map(|info| Address {
                name: info.display_name.filter(|n| !n.trim().is_empty()),
                address: Some(info.addr).filter(|a| !a.is_empty()),
            })
            .collect(),
        // Keep unparseable headers visible instead of dropping them.
        Err(_) => vec![Address {
            name: None,
            address: Some(header.get_value()).filter(|v| !v.trim().is_empty()),
        }],
    }
}

fn collect_parts(part: &ParsedMail, message: &mut ParsedMessage) -> Result<()> {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_parts(subpart, message)?;
        }
        return Ok(());
    }

    let content_type = part.ctype.mimetype.to_ascii_lowercase();
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();
    let is_attachment = matches!(disposition.disposition, DispositionType::Attachment) || filename.is_some();

    if !is_attachment {
        if content_type == "text/plain" && message.text.is_none() {
            message.text = Some(part.get_body()?);
            return Ok(());
        }
        if content_type == "text/html" && message.html.is_none() {
            message.html = Some(part.get_body()?);
            return Ok(());
        }
        if content_type.starts_with("text/") {
            return Ok(());
        }
    }

    message.attachments.push(Attachment {
        filename: filename.unwrap_or_else(|| "unnamed_attachment".to_string()),
        content_type,
        content_id: part
            .headers
            .get_first_value("Content-ID")
            .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string()),
        content: part.get_body_raw()?,
    });
    Ok(())
}
