//! Where a run's contacts come from

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cadence_common::{Contact, ContactError, ContactRecord, internal};

/// Supplies normalized contacts, in send order
#[async_trait]
pub trait ContactSource: Send + Sync {
    /// Load every usable contact
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::Unreadable`] if the list cannot be read at all.
    async fn load(&self) -> Result<Vec<Contact>, ContactError>;
}

#[async_trait]
impl ContactSource for Vec<Contact> {
    async fn load(&self) -> Result<Vec<Contact>, ContactError> {
        Ok(self.clone())
    }
}

/// A RON file holding a list of contact records
///
/// ```ron
/// [
///     (email: "ana@example.com", first_name: "Ana", company: "Acme"),
///     (work_email: "bo@example.com", FirstName: "Bo", JobTitle: "CTO"),
/// ]
/// ```
///
/// Field names are RON identifiers, so export aliases containing spaces
/// (`Work Email`) are only reachable from self-describing formats. Records
/// without an email address are skipped.
#[derive(Debug, Clone)]
pub struct ContactFile {
    path: PathBuf,
}

impl ContactFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unreadable(&self, reason: impl ToString) -> ContactError {
        ContactError::Unreadable {
            source_name: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ContactSource for ContactFile {
    async fn load(&self) -> Result<Vec<Contact>, ContactError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.unreadable(e))?;

        let records: Vec<ContactRecord> = ron::from_str(&text).map_err(|e| self.unreadable(e))?;
        let total = records.len();

        let contacts: Vec<Contact> = records
            .into_iter()
            .filter_map(|record| Contact::try_from(record).ok())
            .collect();

        if contacts.len() < total {
            internal!(
                level = DEBUG,
                "Skipped {} contact records without an email address in {}",
                total - contacts.len(),
                self.path.display()
            );
        }

        Ok(contacts)
    }
}
