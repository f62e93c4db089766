//! RFC 5322 / MIME message writer.
//!
//! Produces the text sent after `DATA`:
//!
//! - a single `text/plain` or `text/html` part when there is only one body,
//! - `multipart/alternative` when both a plain-text and an HTML body exist,
//! - wrapped in `multipart/mixed` when attachments are present.
//!
//! Non-ASCII bodies and every attachment are base64 encoded, wrapped at 76
//! columns. Non-ASCII subjects use RFC 2047 encoded words and non-ASCII
//! attachment names use RFC 2231 parameters.

use std::{fmt::Write, path::Path};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::{ClientError, Result};

const LINE_WIDTH: usize = 76;

/// An attachment ready to be written into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    #[must_use]
    pub fn cc(mut self, email: impl Into<String>) -> Self {
        self.cc.push(email.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds an extra header. Names and values must not contain line breaks.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Plain-text body.
    #[must_use]
    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.text = Some(content.into());
        self
    }

    /// HTML body.
    #[must_use]
    pub fn html(mut self, content: impl Into<String>) -> Self {
        self.html = Some(content.into());
        self
    }

    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Overrides the `Date` header, which otherwise uses the current time.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the `Message-ID` (without angle brackets).
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Renders the message.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::MessageError` if `From` is missing, there are no
    /// body parts, or a header contains a line break.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .as_deref()
            .ok_or_else(|| ClientError::MessageError("missing From".to_string()))?;

        if self.text.is_none() && self.html.is_none() && self.attachments.is_empty() {
            return Err(ClientError::MessageError("message has no content".to_string()));
        }

        for (name, value) in &self.headers {
            if has_line_break(name) || has_line_break(value) {
                return Err(ClientError::MessageError(format!(
                    "header {name:?} contains a line break"
                )));
            }
        }

        for attachment in &self.attachments {
            if has_line_break(&attachment.filename) || has_line_break(&attachment.content_type) {
                return Err(ClientError::MessageError(format!(
                    "attachment {:?} contains a line break",
                    attachment.filename
                )));
            }
        }

        let mut out = String::with_capacity(2048);

        push_header(&mut out, "From", from)?;
        if !self.to.is_empty() {
            push_header(&mut out, "To", &self.to.join(", "))?;
        }
        if !self.cc.is_empty() {
            push_header(&mut out, "Cc", &self.cc.join(", "))?;
        }
        if let Some(subject) = &self.subject {
            push_header(&mut out, "Subject", &encode_header_value(subject))?;
        }

        let date = self.date.unwrap_or_else(Utc::now);
        push_header(&mut out, "Date", &date.to_rfc2822())?;

        let message_id = self.message_id.unwrap_or_else(|| {
            let domain = from.rsplit_once('@').map_or("localhost", |(_, d)| d);
            format!("{}@{domain}", ulid::Ulid::new())
        });
        push_header(&mut out, "Message-ID", &format!("<{message_id}>"))?;

        for (name, value) in &self.headers {
            push_header(&mut out, name, value)?;
        }
        push_header(&mut out, "MIME-Version", "1.0")?;

        let body = write_body(self.text.as_deref(), self.html.as_deref())?;

        if self.attachments.is_empty() {
            out.push_str(&body);
            return Ok(out);
        }

        let boundary = boundary("mixed");
        push_header(
            &mut out,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{boundary}\""),
        )?;
        out.push_str("\r\n");

        if self.text.is_some() || self.html.is_some() {
            write!(out, "--{boundary}\r\n{body}\r\n").map_err(fmt_error)?;
        }

        for attachment in &self.attachments {
            let (name, filename) = filename_params(&attachment.filename);
            write!(
                out,
                "--{boundary}\r\n\
                 Content-Type: {}; {name}\r\n\
                 Content-Transfer-Encoding: base64\r\n\
                 Content-Disposition: attachment; {filename}\r\n\r\n",
                attachment.content_type,
            )
            .map_err(fmt_error)?;
            out.push_str(&wrap_base64(&attachment.data));
        }

        write!(out, "--{boundary}--\r\n").map_err(fmt_error)?;
        Ok(out)
    }
}

/// Writes the `Content-Type` header(s) and body of the non-attachment part.
fn write_body(text: Option<&str>, html: Option<&str>) -> Result<String> {
    let mut out = String::new();

    match (text, html) {
        (Some(text), Some(html)) => {
            let boundary = boundary("alt");
            push_header(
                &mut out,
                "Content-Type",
                &format!("multipart/alternative; boundary=\"{boundary}\""),
            )?;
            out.push_str("\r\n");
            write!(out, "--{boundary}\r\n{}", single_part("plain", text)).map_err(fmt_error)?;
            write!(out, "--{boundary}\r\n{}", single_part("html", html)).map_err(fmt_error)?;
            write!(out, "--{boundary}--\r\n").map_err(fmt_error)?;
        }
        (Some(text), None) => out.push_str(&single_part("plain", text)),
        (None, Some(html)) => out.push_str(&single_part("html", html)),
        (None, None) => {}
    }

    Ok(out)
}

fn single_part(subtype: &str, content: &str) -> String {
    if content.is_ascii() {
        let mut body = content.replace("\r\n", "\n").replace('\n', "\r\n");
        if !body.ends_with("\r\n") {
            body.push_str("\r\n");
        }
        format!(
            "Content-Type: text/{subtype}; charset=utf-8\r\n\
             Content-Transfer-Encoding: 7bit\r\n\r\n{body}"
        )
    } else {
        format!(
            "Content-Type: text/{subtype}; charset=utf-8\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{}",
            wrap_base64(content.as_bytes())
        )
    }
}

fn push_header(out: &mut String, name: &str, value: &str) -> Result<()> {
    write!(out, "{name}: {value}\r\n").map_err(fmt_error)
}

fn fmt_error(err: std::fmt::Error) -> ClientError {
    ClientError::MessageError(err.to_string())
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// RFC 2047 `B` encoding for non-ASCII header values; line breaks are flattened.
fn encode_header_value(value: &str) -> String {
    let flat = value.replace(['\r', '\n'], " ");
    if flat.is_ascii() {
        flat
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(flat.as_bytes()))
    }
}

/// RFC 2231 `attr-char`s pass through unescaped.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `name` parameter for `Content-Type` and `filename` parameter for
/// `Content-Disposition`.
///
/// Non-ASCII names use RFC 2231 `filename*=UTF-8''...`, with an RFC 2047
/// encoded `name` for older readers.
fn filename_params(filename: &str) -> (String, String) {
    if filename.is_ascii() {
        let quoted = escape_quoted(filename);
        return (format!("name=\"{quoted}\""), format!("filename=\"{quoted}\""));
    }

    (
        format!("name=\"{}\"", encode_header_value(filename)),
        format!("filename*=UTF-8''{}", utf8_percent_encode(filename, ATTR_CHAR)),
    )
}

fn boundary(kind: &str) -> String {
    format!("=_courier_{kind}_{}", ulid::Ulid::new())
}

/// Base64 with CRLF line breaks every 76 characters, always newline-terminated.
fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH * 2 + 2);

    for chunk in encoded.as_bytes().chunks(LINE_WIDTH) {
        // Base64 output is ASCII, so every chunk boundary is a char boundary.
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }

    out
}

/// Guesses the MIME content type from a filename's extension.
#[must_use]
pub fn guess_content_type(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "zip" => "application/zip",
        "json" => "application/json",
        "xml" => "application/xml",
        "ics" => "text/calendar",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn base() -> MessageBuilder {
        MessageBuilder::new()
            .from("payments@example.com")
            .to("alice@example.com")
            .subject("Test")
            .date(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
            .message_id("fixed@example.com")
    }

    #[test]
    fn test_plain_text_message() {
        let message = base().text("Hello World").build().unwrap();

        assert_eq!(
            message,
            "From: payments@example.com\r\n\
             To: alice@example.com\r\n\
             Subject: Test\r\n\
             Date: Wed, 1 May 2024 12:00:00 +0000\r\n\
             Message-ID: <fixed@example.com>\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Transfer-Encoding: 7bit\r\n\
             \r\n\
             Hello World\r\n"
        );
    }

    #[test]
    fn test_alternative_when_both_bodies_present() {
        let message = base()
            .cc("bob@example.com")
            .text("plain")
            .html("<p>rich</p>")
            .build()
            .unwrap();

        assert!(message.contains("Cc: bob@example.com\r\n"));
        assert!(message.contains("Content-Type: multipart/alternative;"));
        let plain = message.find("text/plain").unwrap();
        let html = message.find("text/html").unwrap();
        assert!(plain < html, "plain part must precede the html part");
    }

    #[test]
    fn test_attachments_use_mixed() {
        let message = base()
            .html("<p>See attached</p>")
            .attach(Attachment {
                filename: "invoice.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                data: b"Hello World".to_vec(),
            })
            .build()
            .unwrap();

        assert!(message.contains("Content-Type: multipart/mixed;"));
        assert!(message.contains("filename=\"invoice.pdf\""));
        assert!(message.contains("SGVsbG8gV29ybGQ=\r\n"));
        assert!(message.trim_end().ends_with("--"));
    }

    #[test]
    fn test_non_ascii_is_encoded() {
        let message = base().subject("Paiement reçu").text("Merci beaucoup ✓").build().unwrap();

        assert!(message.contains("Subject: =?UTF-8?B?"));
        assert!(message.contains("Content-Transfer-Encoding: base64"));
        assert!(message.is_ascii());
    }

    #[test]
    fn test_non_ascii_attachment_name_uses_rfc2231() {
        let message = base()
            .text("Receipt attached")
            .attach(Attachment {
                filename: "reçu 5%.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                data: b"%PDF".to_vec(),
            })
            .build()
            .unwrap();

        assert!(message.contains("filename*=UTF-8''re%C3%A7u%205%25.pdf\r\n"));
        assert!(message.contains("name=\"=?UTF-8?B?"));
        assert!(message.is_ascii());
    }

    #[test]
    fn test_attachment_line_breaks_are_rejected() {
        let result = base()
            .text("x")
            .attach(Attachment {
                filename: "notes.txt".to_string(),
                content_type: "text/plain\r\nX-Injected: yes".to_string(),
                data: b"hi".to_vec(),
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_from_is_rejected() {
        let err = MessageBuilder::new().to("a@example.com").text("x").build().unwrap_err();
        assert_eq!(err.to_string(), "Invalid message: missing From");
    }

    #[test]
    fn test_header_injection_is_rejected() {
        assert!(
            base()
                .text("x")
                .header("X-Source", "billing\r\nBcc: evil@example.com")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_wrap_base64_line_width() {
        let wrapped = wrap_base64(&[0u8; 200]);
        assert!(wrapped.lines().all(|line| line.len() <= LINE_WIDTH));
        assert!(wrapped.ends_with("\r\n"));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("report.PDF"), "application/pdf");
        assert_eq!(guess_content_type("data.csv"), "text/csv");
        assert_eq!(guess_content_type("blob"), "application/octet-stream");
    }
}
