//! Token merge, text normalization and rich/plain classification
//!
//! Templates are normalized before tokens are merged so contact data is
//! never stripped. Subjects are always treated as plain text.

use std::{borrow::Cow, sync::LazyLock};

use cadence_common::Tokens;
use regex::{Captures, Regex};

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}\r\n]+)\}").expect("valid placeholder regex"));

#[allow(clippy::expect_used)]
static RICH_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(?:b|i|u|em|strong|p|br|a|span|div|ul|ol|li)(?:\s[^<>]*)?/?\s*>")
        .expect("valid markup regex")
});

const PUNCTUATION: [(char, char); 6] = [
    ('\u{201c}', '"'),
    ('\u{201d}', '"'),
    ('\u{2018}', '\''),
    ('\u{2019}', '\''),
    ('\u{2014}', '-'),
    ('\u{2013}', '-'),
];

/// Replace every `{Key}` whose key is present in `tokens`
///
/// Unknown placeholders are left verbatim. Substituted values are not
/// scanned again.
#[must_use]
pub fn render(template: &str, tokens: &Tokens) -> String {
    PLACEHOLDER
        .replace_all(template, |captures: &Captures<'_>| {
            tokens
                .get(&captures[1])
                .map_or_else(|| captures[0].to_string(), Clone::clone)
        })
        .into_owned()
}

/// Map curly quotes and dashes to their ASCII forms
#[must_use]
pub fn normalize_punctuation(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| PUNCTUATION.iter().any(|(from, _)| *from == c)) {
        return Cow::Borrowed(text);
    }

    Cow::Owned(
        text.chars()
            .map(|c| {
                PUNCTUATION
                    .iter()
                    .find_map(|(from, to)| (*from == c).then_some(*to))
                    .unwrap_or(c)
            })
            .collect(),
    )
}

/// Normalize punctuation, then drop anything outside ASCII
#[must_use]
pub fn normalize_plain(text: &str) -> String {
    normalize_punctuation(text)
        .chars()
        .filter(char::is_ascii)
        .collect()
}

/// Whether `body` carries markup from the supported tag set
#[must_use]
pub fn is_rich(body: &str) -> bool {
    RICH_TAG.is_match(body)
}

/// Wrap a rich fragment in a minimal document shell
#[must_use]
pub fn wrap_document(fragment: &str) -> String {
    let fragment = fragment
        .replace("<ul>", r#"<ul style="margin:0; padding-left:28px;">"#)
        .replace("<ol>", r#"<ol style="margin:0; padding-left:28px;">"#)
        .replace("<li>", r#"<li style="margin:0; padding:0;">"#);

    format!(
        "<html><head><meta charset=\"utf-8\"></head>\
         <body style=\"font-family: Calibri, Arial, sans-serif; font-size: 11pt; color: #1E293B;\">\n\
         {fragment}\n\
         </body></html>"
    )
}

/// A rendered message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Plain(String),

    /// A complete document, shell included
    Rich(String),
}

impl Body {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(text) | Self::Rich(text) => text,
        }
    }

    #[must_use]
    pub const fn is_rich(&self) -> bool {
        matches!(self, Self::Rich(_))
    }
}

/// Rendered subject and body for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub subject: String,
    pub body: Body,
}

impl Content {
    #[must_use]
    pub fn compose(subject: &str, body: &str, tokens: &Tokens) -> Self {
        let subject = render(&normalize_plain(subject), tokens);

        let body = if is_rich(body) {
            Body::Rich(wrap_document(&render(&normalize_punctuation(body), tokens)))
        } else {
            Body::Plain(render(&normalize_plain(body), tokens))
        };

        Self { subject, body }
    }
}
