//! Mailbox addresses as accepted on the dispatch API.
//!
//! Addresses follow the RFC 5321 `Mailbox` production:
//!
//! ```text
//! Mailbox        = Local-part "@" ( Domain / address-literal )
//! Local-part     = Dot-string / Quoted-string
//! Dot-string     = Atom *("." Atom)
//! Domain         = sub-domain *("." sub-domain)
//! sub-domain     = Let-dig [Ldh-str]
//! ```
//!
//! Callers may optionally wrap the mailbox in angle brackets (`<user@example.com>`).
//! Display names and source routes are rejected; the service only ever needs the
//! bare mailbox for the SMTP envelope and the `To`/`Cc` headers.

use std::{
    fmt::{self, Display},
    net::{Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

const MAX_PATH: usize = 256;
const MAX_LOCAL_PART: usize = 64;
const MAX_DOMAIN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,

    #[error("Address exceeds {MAX_PATH} octets")]
    TooLong,

    #[error("Local-part exceeds {MAX_LOCAL_PART} octets")]
    LocalPartTooLong,

    #[error("Domain exceeds {MAX_DOMAIN} octets")]
    DomainTooLong,

    #[error("Unbalanced angle brackets")]
    UnbalancedBrackets,

    #[error("Missing '@' separator")]
    MissingAtSign,

    #[error("Invalid local-part: {0}")]
    InvalidLocalPart(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid address literal: {0}")]
    InvalidAddressLiteral(String),
}

/// A validated `local-part@domain` mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    local_part: String,
    domain: String,
}

impl Address {
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        if trimmed.len() > MAX_PATH {
            return Err(AddressError::TooLong);
        }

        let mailbox = match (trimmed.strip_prefix('<'), trimmed.ends_with('>')) {
            (Some(rest), true) => &rest[..rest.len() - 1],
            (None, false) => trimmed,
            _ => return Err(AddressError::UnbalancedBrackets),
        };

        let at = find_unquoted_at(mailbox).ok_or(AddressError::MissingAtSign)?;
        let (local_part, domain) = (&mailbox[..at], &mailbox[at + 1..]);

        if local_part.len() > MAX_LOCAL_PART {
            return Err(AddressError::LocalPartTooLong);
        }
        if domain.len() > MAX_DOMAIN {
            return Err(AddressError::DomainTooLong);
        }

        validate_local_part(local_part)?;
        if domain.starts_with('[') {
            validate_address_literal(domain)?;
        } else {
            validate_domain(domain)?;
        }

        Ok(Self {
            local_part: local_part.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

/// Byte offset of the first `@` outside a quoted string or address literal.
fn find_unquoted_at(input: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut in_literal = false;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        match ch {
            '"' if !escaped && !in_literal => in_quotes = !in_quotes,
            '[' if !in_quotes => in_literal = true,
            ']' if !in_quotes => in_literal = false,
            '@' if !in_quotes && !in_literal => return Some(idx),
            _ => {}
        }
        escaped = ch == '\\' && !escaped;
    }

    None
}

fn validate_local_part(local_part: &str) -> Result<(), AddressError> {
    let invalid = |reason: &str| Err(AddressError::InvalidLocalPart(reason.to_string()));

    if local_part.is_empty() {
        return invalid("empty");
    }

    if let Some(quoted) = local_part.strip_prefix('"') {
        let Some(content) = quoted.strip_suffix('"') else {
            return invalid("unclosed quoted string");
        };

        let mut chars = content.chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                match chars.next() {
                    Some(next) if next == ' ' || next.is_ascii_graphic() => {}
                    Some(next) => return invalid(&format!("invalid quoted-pair '\\{next}'")),
                    None => return invalid("trailing backslash"),
                }
            } else if !is_qtext(ch) {
                return invalid(&format!("'{ch}' not allowed in quoted string"));
            }
        }

        return Ok(());
    }

    for atom in local_part.split('.') {
        if atom.is_empty() {
            return invalid("empty atom");
        }
        if let Some(ch) = atom.chars().find(|ch| !is_atext(*ch)) {
            return invalid(&format!("'{ch}' not allowed in atom"));
        }
    }

    Ok(())
}

fn validate_domain(domain: &str) -> Result<(), AddressError> {
    if domain.is_empty() {
        return Err(AddressError::InvalidDomain("empty".to_string()));
    }

    for label in domain.split('.') {
        let bytes = label.as_bytes();
        let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
            return Err(AddressError::InvalidDomain("empty label".to_string()));
        };

        if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
            return Err(AddressError::InvalidDomain(format!(
                "label '{label}' must start and end with a letter or digit"
            )));
        }

        if let Some(ch) = label
            .chars()
            .find(|ch| !ch.is_ascii_alphanumeric() && *ch != '-')
        {
            return Err(AddressError::InvalidDomain(format!(
                "'{ch}' not allowed in label '{label}'"
            )));
        }
    }

    Ok(())
}

fn validate_address_literal(domain: &str) -> Result<(), AddressError> {
    let content = domain
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| AddressError::InvalidAddressLiteral(domain.to_string()))?;

    let valid = content.parse::<Ipv4Addr>().is_ok()
        || content
            .strip_prefix("IPv6:")
            .is_some_and(|v6| v6.parse::<Ipv6Addr>().is_ok());

    if valid {
        Ok(())
    } else {
        Err(AddressError::InvalidAddressLiteral(content.to_string()))
    }
}

const fn is_atext(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

/// Printable ASCII except backslash and double quote.
const fn is_qtext(ch: char) -> bool {
    matches!(ch as u32, 32..=33 | 35..=91 | 93..=126)
}
