//! Directory-backed transport
//!
//! Messages are written as RON documents:
//! - Saved drafts: `drafts/{ulid}.ron`
//! - Submitted messages: `outbox/{ulid}.ron`
//!
//! An external relay picks entries up from `outbox/` and honors their
//! `deferred_delivery` value. Every write goes to a `.tmp_` file first and is
//! renamed into place, so a reader never observes a partial document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cadence_common::transport;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::fs;
use ulid::Ulid;

use super::{MessageHandle, Transport, choose_identity};
use crate::error::{BestEffort, TransportError};

const DRAFTS: &str = "drafts";
const OUTBOX: &str = "outbox";

/// A message as persisted in the spool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: String,
    pub to: String,
    pub from: Option<String>,
    pub subject: String,
    pub body: String,
    pub rich: bool,
    pub attachments: Vec<PathBuf>,
    pub deferred_delivery: Option<NaiveDateTime>,
}

/// Transport writing drafts and submissions to a spool directory
#[derive(Debug, Clone)]
pub struct SpoolTransport {
    path: PathBuf,
    identities: Vec<String>,
}

impl SpoolTransport {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, identities: Vec<String>) -> Self {
        Self {
            path: path.into(),
            identities,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every submitted message, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the outbox cannot be listed or an entry cannot be decoded.
    pub async fn outbox(&self) -> Result<Vec<OutboundMessage>, TransportError> {
        read_all(&self.path.join(OUTBOX)).await
    }

    /// Read every saved draft, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the drafts directory cannot be listed or an entry cannot be decoded.
    pub async fn drafts(&self) -> Result<Vec<OutboundMessage>, TransportError> {
        read_all(&self.path.join(DRAFTS)).await
    }
}

async fn read_all(directory: &Path) -> Result<Vec<OutboundMessage>, TransportError> {
    let mut entries = fs::read_dir(directory).await?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(".tmp_")
            && let Some(stem) = name.strip_suffix(".ron")
            && Ulid::from_string(stem).is_ok()
        {
            names.push(name);
        }
    }

    names.sort();

    let mut messages = Vec::with_capacity(names.len());
    for name in names {
        let text = fs::read_to_string(directory.join(name)).await?;
        let message =
            ron::from_str(&text).map_err(|e| TransportError::Serialization(e.to_string()))?;
        messages.push(message);
    }

    Ok(messages)
}

async fn write_atomic(
    directory: &Path,
    message: &OutboundMessage,
) -> Result<PathBuf, TransportError> {
    let filename = format!("{}.ron", message.id);
    let target = directory.join(&filename);
    let temp = directory.join(format!(".tmp_{filename}"));

    let document = ron::ser::to_string_pretty(message, ron::ser::PrettyConfig::default())?;
    fs::write(&temp, document).await?;
    fs::rename(&temp, &target).await?;

    Ok(target)
}

#[async_trait]
impl Transport for SpoolTransport {
    async fn open_session(&self) -> Result<(), TransportError> {
        for directory in [DRAFTS, OUTBOX] {
            fs::create_dir_all(self.path.join(directory)).await?;
        }

        transport!(level = DEBUG, "Opened spool session at {}", self.path.display());
        Ok(())
    }

    fn release(&self) {
        transport!(level = DEBUG, "Released spool session at {}", self.path.display());
    }

    async fn create_draft(&self) -> Result<Box<dyn MessageHandle>, TransportError> {
        Ok(Box::new(SpoolMessage {
            root: self.path.clone(),
            identities: self.identities.clone(),
            message: OutboundMessage {
                id: Ulid::new().to_string(),
                ..OutboundMessage::default()
            },
            draft: None,
        }))
    }

    async fn is_reachable(&self) -> bool {
        match fs::metadata(self.path.join(OUTBOX)).await {
            Ok(metadata) => metadata.is_dir() && !metadata.permissions().readonly(),
            Err(_) => false,
        }
    }

    async fn flush_outbound(&self) -> Result<(), TransportError> {
        let outbox = self.path.join(OUTBOX);
        fs::File::open(&outbox).await?.sync_all().await?;

        transport!(level = DEBUG, "Flushed spool outbox {}", outbox.display());
        Ok(())
    }
}

struct SpoolMessage {
    root: PathBuf,
    identities: Vec<String>,
    message: OutboundMessage,

    /// Where the draft was saved, if it was
    draft: Option<PathBuf>,
}

#[async_trait]
impl MessageHandle for SpoolMessage {
    async fn set_content(
        &mut self,
        to: &str,
        subject: &str,
        body: &str,
        rich: bool,
    ) -> Result<(), TransportError> {
        to.clone_into(&mut self.message.to);
        subject.clone_into(&mut self.message.subject);
        body.clone_into(&mut self.message.body);
        self.message.rich = rich;
        Ok(())
    }

    async fn add_attachment(&mut self, path: &Path) -> Result<(), TransportError> {
        let path = fs::canonicalize(path)
            .await
            .map_err(|e| TransportError::Attachment {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        self.message.attachments.push(path);
        Ok(())
    }

    async fn bind_identity(
        &mut self,
        preferred: Option<&str>,
    ) -> Result<Option<String>, TransportError> {
        let identity = choose_identity(&self.identities, preferred)
            .ok_or(TransportError::NoIdentity)?
            .to_string();

        self.message.from = Some(identity.clone());
        Ok(Some(identity))
    }

    async fn set_deferred_delivery(&mut self, at: NaiveDateTime) -> Result<(), TransportError> {
        self.message.deferred_delivery = Some(at);
        Ok(())
    }

    async fn get_deferred_delivery(&self) -> Result<Option<NaiveDateTime>, TransportError> {
        Ok(self.message.deferred_delivery)
    }

    async fn save(&mut self) -> Result<(), TransportError> {
        let path = write_atomic(&self.root.join(DRAFTS), &self.message).await?;
        self.draft = Some(path);
        Ok(())
    }

    async fn submit(self: Box<Self>) -> Result<Option<String>, TransportError> {
        let path = write_atomic(&self.root.join(OUTBOX), &self.message).await?;

        // Already queued; a stale draft must not fail the submission
        if let Some(draft) = &self.draft
            && let Err(err) = fs::remove_file(draft).await
        {
            BestEffort::DraftCleanup.swallow(&err.into());
        }

        transport!(
            level = DEBUG,
            "Submitted {} to {}",
            self.message.id,
            path.display()
        );

        Ok(Some(self.message.id.clone()))
    }
}
