//! Normalized contact records and the merge tokens derived from them.
//!
//! Contacts arrive from an upstream import step with their columns already
//! reconciled. The only hard requirement enforced here is a non-empty email
//! address; every other field is optional and defaults to an empty token.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ContactError;

/// Merge tokens keyed by placeholder name (without braces)
pub type Tokens = HashMap<String, String>;

/// A single recipient of a sequence
///
/// Immutable once constructed. The email is trimmed and guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ContactRecord")]
pub struct Contact {
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    company: Option<String>,
    title: Option<String>,
    city: Option<String>,
    state: Option<String>,
}

/// Wire shape of a contact, accepting the field-name aliases produced by
/// common CRM exports.
///
/// Unlike [`Contact`], a record may lack an email address; list loaders use
/// it to skip unusable rows instead of rejecting the whole list.
#[derive(Debug, Default, Deserialize)]
pub struct ContactRecord {
    #[serde(default, alias = "Email", alias = "Work Email", alias = "work_email")]
    email: String,
    #[serde(default, alias = "FirstName", alias = "First Name")]
    first_name: String,
    #[serde(default, alias = "LastName", alias = "Last Name")]
    last_name: String,
    #[serde(default, alias = "Company")]
    company: String,
    #[serde(default, alias = "Title", alias = "JobTitle", alias = "job_title")]
    title: String,
    #[serde(default, alias = "City")]
    city: String,
    #[serde(default, alias = "State")]
    state: String,
}

impl TryFrom<ContactRecord> for Contact {
    type Error = ContactError;

    fn try_from(record: ContactRecord) -> Result<Self, Self::Error> {
        let mut contact = Self::new(record.email)?;
        contact.first_name = non_blank(record.first_name);
        contact.last_name = non_blank(record.last_name);
        contact.company = non_blank(record.company);
        contact.title = non_blank(record.title);
        contact.city = non_blank(record.city);
        contact.state = non_blank(record.state);
        Ok(contact)
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl Contact {
    /// Create a contact with only an email address
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::MissingEmail`] if the address is blank.
    pub fn new(email: impl Into<String>) -> Result<Self, ContactError> {
        let email = email.into().trim().to_string();
        if email.is_empty() {
            return Err(ContactError::MissingEmail);
        }

        Ok(Self {
            email,
            first_name: None,
            last_name: None,
            company: None,
            title: None,
            city: None,
            state: None,
        })
    }

    #[must_use]
    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = non_blank(first.into());
        self.last_name = non_blank(last.into());
        self
    }

    #[must_use]
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = non_blank(company.into());
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = non_blank(title.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, city: impl Into<String>, state: impl Into<String>) -> Self {
        self.city = non_blank(city.into());
        self.state = non_blank(state.into());
        self
    }

    /// The resolved recipient address
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn first_name(&self) -> Option<&str> {
        self.first_name.as_deref()
    }

    #[must_use]
    pub fn company(&self) -> Option<&str> {
        self.company.as_deref()
    }

    /// `City, State`, or whichever half is present
    #[must_use]
    pub fn location(&self) -> String {
        match (self.city.as_deref(), self.state.as_deref()) {
            (Some(city), Some(state)) => format!("{city}, {state}"),
            (Some(one), None) | (None, Some(one)) => one.to_string(),
            (None, None) => String::new(),
        }
    }

    /// Build the merge tokens for this contact
    ///
    /// Every token is present, defaulting to an empty string, so that a
    /// template referencing a missing field renders blank rather than leaving
    /// the placeholder behind. Aliased names map to the same value.
    #[must_use]
    pub fn tokens(&self) -> Tokens {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();

        let pairs = [
            ("FirstName", field(&self.first_name)),
            ("First Name", field(&self.first_name)),
            ("LastName", field(&self.last_name)),
            ("Last Name", field(&self.last_name)),
            ("Company", field(&self.company)),
            ("Email", self.email.clone()),
            ("Work Email", self.email.clone()),
            ("Title", field(&self.title)),
            ("JobTitle", field(&self.title)),
            ("City", field(&self.city)),
            ("State", field(&self.state)),
            ("Location", self.location()),
        ];

        pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }
}
