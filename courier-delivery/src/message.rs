//! Send requests and the transport envelope built from them.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use courier_common::Address;
use courier_smtp::{ClientError, guess_content_type};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    error::ValidationError,
    template::{DEFAULT_SUBJECT, Substitutions, TemplateRenderer},
};

/// Caller-supplied description of an email to send.
///
/// Addresses stay as strings here; they are parsed once by [`MessageBuilder`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub cc: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    /// Plain-text body.
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default, alias = "template_id")]
    pub template: Option<String>,
    #[serde(default, alias = "template_data")]
    pub substitutions: Substitutions,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Overrides the configured default sender.
    #[serde(default)]
    pub sender: Option<String>,
    /// Calling service, logged and recorded but never interpreted.
    #[serde(default)]
    pub source_service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(alias = "name")]
    pub filename: String,
    /// Raw bytes; base64 in JSON.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Guessed from the filename when absent.
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Per-message attachment limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLimits {
    #[serde(default = "defaults::max_attachment_bytes")]
    pub max_attachment_bytes: usize,
    #[serde(default = "defaults::max_total_attachment_bytes")]
    pub max_total_attachment_bytes: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_attachment_bytes: defaults::max_attachment_bytes(),
            max_total_attachment_bytes: defaults::max_total_attachment_bytes(),
        }
    }
}

mod defaults {
    pub const fn max_attachment_bytes() -> usize {
        10 * 1024 * 1024
    }

    pub const fn max_total_attachment_bytes() -> usize {
        25 * 1024 * 1024
    }
}

/// Immutable, transport-ready message. Encoded once and reused on every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: Address,
    /// `to`, `cc` and `bcc` in that order, without duplicates.
    pub recipients: Vec<Address>,
    pub subject: String,
    /// RFC 5322 message text sent after `DATA`.
    pub data: String,
}

impl Envelope {
    #[must_use]
    pub const fn size(&self) -> usize {
        self.data.len()
    }
}

/// Validates send requests and renders them into [`Envelope`]s.
#[derive(Clone)]
pub struct MessageBuilder {
    renderer: Arc<dyn TemplateRenderer>,
    default_sender: Address,
    limits: MessageLimits,
}

impl MessageBuilder {
    #[must_use]
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        default_sender: Address,
        limits: MessageLimits,
    ) -> Self {
        Self {
            renderer,
            default_sender,
            limits,
        }
    }

    #[must_use]
    pub const fn default_sender(&self) -> &Address {
        &self.default_sender
    }

    /// Validate `request` and encode it for transport.
    ///
    /// The request is consumed so attachment bytes are released as soon as
    /// they have been encoded.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first problem found.
    pub fn build(&self, request: SendRequest) -> Result<Envelope, ValidationError> {
        if request.to.iter().all(|to| to.trim().is_empty()) {
            return Err(ValidationError::NoRecipients);
        }

        let to = parse_addresses("to", &request.to)?;
        let cc = parse_addresses("cc", &request.cc)?;
        let bcc = parse_addresses("bcc", &request.bcc)?;
        let sender = match request.sender.as_deref() {
            Some(raw) => parse_address("sender", raw)?,
            None => self.default_sender.clone(),
        };

        if let Some(source) = &request.source_service
            && source.contains(['\r', '\n'])
        {
            return Err(ValidationError::InvalidHeader("X-Source-Service".to_string()));
        }

        self.check_attachments(&request.attachments)?;

        let (subject, text, html) = match request.template.as_deref() {
            Some(name) => {
                let rendered = self.renderer.render(name, &request.substitutions)?;
                (
                    request.subject.unwrap_or(rendered.subject),
                    Some(rendered.text),
                    Some(rendered.html),
                )
            }
            None if request.body.is_none() && request.html_body.is_none() => {
                return Err(ValidationError::MissingContent);
            }
            None => (
                request
                    .subject
                    .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
                request.body,
                request.html_body,
            ),
        };

        let mut message = courier_smtp::MessageBuilder::new()
            .from(sender.to_string())
            .subject(subject.clone());
        for address in &to {
            message = message.to(address.to_string());
        }
        for address in &cc {
            message = message.cc(address.to_string());
        }
        if let Some(text) = text {
            message = message.text(text);
        }
        if let Some(html) = html {
            message = message.html(html);
        }
        if let Some(source) = request.source_service {
            message = message.header("X-Source-Service", source);
        }
        for attachment in request.attachments {
            let content_type = attachment
                .content_type
                .unwrap_or_else(|| guess_content_type(&attachment.filename).to_string());
            message = message.attach(courier_smtp::Attachment {
                filename: attachment.filename,
                content_type,
                data: attachment.content,
            });
        }

        let data = message.build().map_err(|e| match e {
            ClientError::MessageError(reason) => ValidationError::Encoding(reason),
            other => ValidationError::Encoding(other.to_string()),
        })?;

        let mut recipients: Vec<Address> = Vec::with_capacity(to.len() + cc.len() + bcc.len());
        for address in to.into_iter().chain(cc).chain(bcc) {
            if !recipients.contains(&address) {
                recipients.push(address);
            }
        }

        Ok(Envelope {
            sender,
            recipients,
            subject,
            data,
        })
    }

    fn check_attachments(&self, attachments: &[Attachment]) -> Result<(), ValidationError> {
        let mut total = 0usize;

        for attachment in attachments {
            if attachment.filename.trim().is_empty() {
                return Err(ValidationError::EmptyAttachmentName);
            }
            if attachment.filename.contains(['\r', '\n']) {
                return Err(ValidationError::InvalidHeader(attachment.filename.clone()));
            }
            if let Some(content_type) = &attachment.content_type
                && !is_media_type(content_type)
            {
                return Err(ValidationError::InvalidHeader(format!(
                    "Content-Type: {}",
                    content_type.escape_debug()
                )));
            }

            let size = attachment.content.len();
            if size > self.limits.max_attachment_bytes {
                return Err(ValidationError::AttachmentTooLarge {
                    filename: attachment.filename.clone(),
                    size,
                    limit: self.limits.max_attachment_bytes,
                });
            }

            total = total.saturating_add(size);
            if total > self.limits.max_total_attachment_bytes {
                return Err(ValidationError::AttachmentsTooLarge {
                    size: total,
                    limit: self.limits.max_total_attachment_bytes,
                });
            }
        }

        Ok(())
    }
}

/// `type/subtype` made of RFC 2045 token characters, optionally followed by
/// `; parameters`. Never contains CR or LF.
fn is_media_type(value: &str) -> bool {
    let is_token = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`{|}~".contains(c))
    };

    if value.contains(['\r', '\n']) {
        return false;
    }

    let essence = value.split_once(';').map_or(value, |(essence, _)| essence);
    essence
        .trim()
        .split_once('/')
        .is_some_and(|(kind, subtype)| is_token(kind) && is_token(subtype))
}

fn parse_address(field: &'static str, raw: &str) -> Result<Address, ValidationError> {
    raw.parse()
        .map_err(|source| ValidationError::InvalidAddress {
            field,
            value: raw.to_string(),
            source,
        })
}

fn parse_addresses(field: &'static str, raw: &[String]) -> Result<Vec<Address>, ValidationError> {
    raw.iter().map(|r| parse_address(field, r)).collect()
}

/// Accept either a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
        OneOrMany::Null(()) => Vec::new(),
    })
}

mod base64_bytes {
    use super::{Deserialize, Deserializer, Engine, STANDARD, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{error::TemplateError, template::TeraRenderer};

    fn builder() -> MessageBuilder {
        MessageBuilder::new(
            Arc::new(TeraRenderer::builtin().unwrap()),
            "payment@example.com".parse().unwrap(),
            MessageLimits {
                max_attachment_bytes: 8,
                max_total_attachment_bytes: 12,
            },
        )
    }

    fn plain(to: &[&str]) -> SendRequest {
        SendRequest {
            to: to.iter().map(ToString::to_string).collect(),
            subject: Some("Hello".to_string()),
            body: Some("Hi there".to_string()),
            ..SendRequest::default()
        }
    }

    fn attachment(name: &str, size: usize) -> Attachment {
        Attachment {
            filename: name.to_string(),
            content: vec![b'x'; size],
            content_type: None,
        }
    }

    #[test]
    fn test_build_plain_message() {
        let envelope = builder().build(plain(&["alice@example.com"])).unwrap();

        assert_eq!(envelope.sender.to_string(), "payment@example.com");
        assert_eq!(envelope.recipients.len(), 1);
        assert_eq!(envelope.subject, "Hello");
        assert!(envelope.data.contains("Content-Type: text/plain"));
        assert!(!envelope.data.contains("text/html"));
        assert!(envelope.data.contains("Hi there"));
    }

    #[test]
    fn test_empty_recipients_rejected() {
        assert!(matches!(
            builder().build(plain(&[])),
            Err(ValidationError::NoRecipients)
        ));
        assert!(matches!(
            builder().build(plain(&["  "])),
            Err(ValidationError::NoRecipients)
        ));
    }

    #[test]
    fn test_malformed_address_rejected() {
        let err = builder().build(plain(&["not-an-email"])).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidAddress { field: "to", .. }
        ));

        let mut request = plain(&["alice@example.com"]);
        request.bcc = vec!["bad address".to_string()];
        assert!(matches!(
            builder().build(request),
            Err(ValidationError::InvalidAddress { field: "bcc", .. })
        ));

        let mut request = plain(&["alice@example.com"]);
        request.sender = Some("nobody".to_string());
        assert!(matches!(
            builder().build(request),
            Err(ValidationError::InvalidAddress { field: "sender", .. })
        ));
    }

    #[test]
    fn test_missing_content_rejected() {
        let request = SendRequest {
            to: vec!["alice@example.com".to_string()],
            ..SendRequest::default()
        };
        assert!(matches!(
            builder().build(request),
            Err(ValidationError::MissingContent)
        ));
    }

    #[test]
    fn test_bcc_in_envelope_not_headers() {
        let mut request = plain(&["alice@example.com", "alice@example.com"]);
        request.cc = vec!["carol@example.com".to_string()];
        request.bcc = vec!["bob@example.com".to_string()];
        request.sender = Some("billing@example.com".to_string());

        let envelope = builder().build(request).unwrap();
        let recipients: Vec<String> = envelope.recipients.iter().map(ToString::to_string).collect();

        assert_eq!(
            recipients,
            vec!["alice@example.com", "carol@example.com", "bob@example.com"]
        );
        assert_eq!(envelope.sender.to_string(), "billing@example.com");
        assert!(envelope.data.contains("Cc: carol@example.com"));
        assert!(!envelope.data.contains("bob@example.com"));
    }

    #[test]
    fn test_html_preferred_with_text_fallback() {
        let mut request = plain(&["alice@example.com"]);
        request.html_body = Some("<p>Hi</p>".to_string());
        let envelope = builder().build(request).unwrap();
        assert!(envelope.data.contains("multipart/alternative"));

        let mut request = plain(&["alice@example.com"]);
        request.body = None;
        request.html_body = Some("<p>Hi</p>".to_string());
        let envelope = builder().build(request).unwrap();
        assert!(envelope.data.contains("Content-Type: text/html"));
        assert!(!envelope.data.contains("text/plain"));
    }

    #[test]
    fn test_templated_request() {
        let request = SendRequest {
            to: vec!["alice@example.com".to_string()],
            template: Some("payment_failed".to_string()),
            substitutions: serde_json::from_value(json!({
                "payment_id": "PAY9",
                "service_name": "Shop",
                "amount": "12.00",
                "reason": "Card declined",
            }))
            .unwrap(),
            source_service: Some("billing".to_string()),
            ..SendRequest::default()
        };

        let envelope = builder().build(request).unwrap();
        assert_eq!(envelope.subject, "Payment Failed: PAY9");
        assert!(envelope.data.contains("X-Source-Service: billing"));
        assert!(envelope.data.contains("Card declined"));
    }

    #[test]
    fn test_caller_subject_overrides_template() {
        let request = SendRequest {
            to: vec!["alice@example.com".to_string()],
            subject: Some("Custom Subject".to_string()),
            template: Some("application_deleted".to_string()),
            substitutions: serde_json::from_value(json!({
                "application_id": "APP1",
                "service_name": "Loans",
                "amount": 5,
            }))
            .unwrap(),
            ..SendRequest::default()
        };

        assert_eq!(builder().build(request).unwrap().subject, "Custom Subject");
    }

    #[test]
    fn test_unknown_template_rejected() {
        let request = SendRequest {
            to: vec!["alice@example.com".to_string()],
            template: Some("nonexistent".to_string()),
            ..SendRequest::default()
        };

        assert!(matches!(
            builder().build(request),
            Err(ValidationError::Template(TemplateError::NotFound(_)))
        ));
    }

    #[test]
    fn test_attachment_limits() {
        let mut request = plain(&["alice@example.com"]);
        request.attachments = vec![attachment("big.bin", 9)];
        assert!(matches!(
            builder().build(request),
            Err(ValidationError::AttachmentTooLarge { size: 9, limit: 8, .. })
        ));

        let mut request = plain(&["alice@example.com"]);
        request.attachments = vec![attachment("a.txt", 8), attachment("b.txt", 8)];
        assert!(matches!(
            builder().build(request),
            Err(ValidationError::AttachmentsTooLarge { size: 16, limit: 12 })
        ));

        let mut request = plain(&["alice@example.com"]);
        request.attachments = vec![attachment(" ", 1)];
        assert!(matches!(
            builder().build(request),
            Err(ValidationError::EmptyAttachmentName)
        ));
    }

    #[test]
    fn test_attachment_content_type_cannot_carry_headers() {
        let mut request = plain(&["alice@example.com"]);
        request.attachments = vec![Attachment {
            content_type: Some("text/plain\r\nX-Injected: yes\r\n\r\nforged body".to_string()),
            ..attachment("notes.txt", 4)
        }];
        assert!(matches!(
            builder().build(request),
            Err(ValidationError::InvalidHeader(_))
        ));

        for bad in ["text", "text/", "/plain", "text plain/x", "text/plain\n"] {
            let mut request = plain(&["alice@example.com"]);
            request.attachments = vec![Attachment {
                content_type: Some(bad.to_string()),
                ..attachment("notes.txt", 4)
            }];
            assert!(
                matches!(builder().build(request), Err(ValidationError::InvalidHeader(_))),
                "{bad:?} accepted"
            );
        }

        let mut request = plain(&["alice@example.com"]);
        request.attachments = vec![Attachment {
            content_type: Some("text/csv; charset=utf-8".to_string()),
            ..attachment("data.csv", 4)
        }];
        let envelope = builder().build(request).unwrap();
        assert!(envelope.data.contains("text/csv; charset=utf-8"));
    }

    #[test]
    fn test_attachment_encoded() {
        let mut request = plain(&["alice@example.com"]);
        request.attachments = vec![attachment("notes.txt", 4)];

        let envelope = builder().build(request).unwrap();
        assert!(envelope.data.contains("multipart/mixed"));
        assert!(envelope.data.contains("Content-Type: text/plain; name=\"notes.txt\""));
        assert!(envelope.data.contains("eHh4eA=="));
    }

    #[test]
    fn test_request_json_shapes() {
        let request: SendRequest = serde_json::from_value(json!({
            "to": "alice@example.com",
            "cc": null,
            "template_id": "payment_created",
            "template_data": { "payment_id": "PAY123" },
            "attachments": [{ "name": "file.txt", "content": "aGVsbG8=" }],
        }))
        .unwrap();

        assert_eq!(request.to, vec!["alice@example.com"]);
        assert!(request.cc.is_empty());
        assert_eq!(request.template.as_deref(), Some("payment_created"));
        assert_eq!(request.substitutions["payment_id"], json!("PAY123"));
        assert_eq!(request.attachments[0].filename, "file.txt");
        assert_eq!(request.attachments[0].content, b"hello");
    }
}
