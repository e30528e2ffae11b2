use std::{path::PathBuf, sync::Arc};

use cadence_common::internal;
use cadence_delivery::{
    AuditConfig, CampaignDispatcher, Clock, ContactFile, DispatchConfig, FixedClock,
    MemoryTransport, RunSummary, SequenceStep, SpoolTransport, SystemClock, ThrottleConfig,
    Transport, transport::memory::StoredMessage,
};
use chrono::NaiveDateTime;
use serde::Deserialize;

/// The mail transport a run hands messages to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum TransportConfig {
    /// Write drafts and submissions to a spool directory
    Spool {
        #[serde(default = "default_spool_path")]
        path: PathBuf,
        #[serde(default)]
        identities: Vec<String>,
    },

    /// Keep everything in memory; nothing leaves the process
    Memory {
        #[serde(default)]
        identities: Vec<String>,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Spool {
            path: default_spool_path(),
            identities: Vec::new(),
        }
    }
}

fn default_spool_path() -> PathBuf {
    PathBuf::from("./spool")
}

impl TransportConfig {
    fn build(&self) -> Arc<dyn Transport> {
        match self {
            Self::Spool { path, identities } => {
                Arc::new(SpoolTransport::new(path.clone(), identities.clone()))
            }
            Self::Memory { identities } => Arc::new(memory_transport(identities)),
        }
    }

    fn identities(&self) -> &[String] {
        match self {
            Self::Spool { identities, .. } | Self::Memory { identities } => identities,
        }
    }
}

fn memory_transport(identities: &[String]) -> MemoryTransport {
    if identities.is_empty() {
        MemoryTransport::new()
    } else {
        MemoryTransport::new().with_identities(identities.iter().cloned())
    }
}

/// Top-level configuration, read from `cadence.config.ron`
///
/// ```ron
/// Cadence(
///     contacts: "contacts.ron",
///     send: true,
///     window_minutes: 30,
///     transport: Spool(path: "./spool", identities: ["sales@example.com"]),
///     dispatch: (sender: Some("sales@example.com")),
///     schedule: [
///         (
///             subject: "Quick question, {FirstName}",
///             body: "Hi {FirstName}, ...",
///             timing: Offset(days: 0, time: "9:00 AM"),
///         ),
///     ],
/// )
/// ```
#[derive(Debug, Deserialize)]
pub struct Cadence {
    /// RON file with the contact list
    contacts: PathBuf,

    #[serde(alias = "sequence", default)]
    schedule: Vec<SequenceStep>,

    #[serde(default)]
    transport: TransportConfig,

    #[serde(default)]
    dispatch: DispatchConfig,

    /// Submit messages; only drafts are saved otherwise
    #[serde(default)]
    send: bool,

    /// Random padding, in minutes, added to each send time
    #[serde(default)]
    window_minutes: u32,
}

/// Command-line overrides for a run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub send: Option<bool>,
    pub window_minutes: Option<u32>,

    /// Reference time for day offsets, instead of the wall clock
    pub now: Option<NaiveDateTime>,
}

impl Cadence {
    /// Parse a configuration document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid RON for this structure.
    pub fn from_ron(text: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(text)?)
    }

    #[must_use]
    pub fn schedule(&self) -> &[SequenceStep] {
        &self.schedule
    }

    fn clock(options: RunOptions) -> Arc<dyn Clock> {
        match options.now {
            Some(now) => Arc::new(FixedClock(now)),
            None => Arc::new(SystemClock),
        }
    }

    /// Dispatch the schedule to every contact through the configured transport
    ///
    /// # Errors
    ///
    /// Returns the first dispatch error; see [`CampaignDispatcher::run`].
    pub async fn run(self, options: RunOptions) -> anyhow::Result<RunSummary> {
        let send = options.send.unwrap_or(self.send);
        let window = options.window_minutes.unwrap_or(self.window_minutes);

        internal!(
            level = INFO,
            "Loaded {} steps, contacts from {}",
            self.schedule.len(),
            self.contacts.display()
        );

        let dispatcher = CampaignDispatcher::new(self.transport.build(), self.dispatch)
            .with_clock(Self::clock(options));

        let summary = dispatcher
            .run(&self.schedule, &ContactFile::new(self.contacts), send, window)
            .await?;

        Ok(summary)
    }

    /// Render every message the run would produce, without touching the
    /// configured transport or writing audit files
    ///
    /// # Errors
    ///
    /// Returns an error if the contacts cannot be loaded or a message cannot be built.
    pub async fn preview(&self, options: RunOptions) -> anyhow::Result<Vec<StoredMessage>> {
        let transport = Arc::new(memory_transport(self.transport.identities()));

        let config = DispatchConfig {
            audit: AuditConfig {
                enabled: false,
                ..self.dispatch.audit.clone()
            },
            throttle: ThrottleConfig { max_per_minute: 0 },
            ..self.dispatch.clone()
        };

        CampaignDispatcher::new(transport.clone(), config)
            .with_clock(Self::clock(options))
            .run(
                &self.schedule,
                &ContactFile::new(&self.contacts),
                true,
                options.window_minutes.unwrap_or(self.window_minutes),
            )
            .await?;

        Ok(transport.submitted())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cadence_delivery::Timing;
    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = r#"
        Cadence(
            contacts: "contacts.ron",
            send: true,
            window_minutes: 15,
            transport: Spool(path: "/var/spool/cadence", identities: ["sales@example.com"]),
            dispatch: (
                sender: Some("sales@example.com"),
                throttle: (max_per_minute: 30),
            ),
            schedule: [
                (
                    subject: "Hello {FirstName}",
                    body: "Body",
                    timing: Offset(days: 0, time: "9:00 AM"),
                ),
                (
                    subject: "Follow up",
                    body: "Body",
                    timing: At(date: "2026-03-09", time: "14:30"),
                    attachments: ["deck.pdf"],
                ),
            ],
        )
    "#;

    #[test]
    fn test_parse_config() {
        let cadence = Cadence::from_ron(CONFIG).unwrap();

        assert_eq!(cadence.contacts, PathBuf::from("contacts.ron"));
        assert!(cadence.send);
        assert_eq!(cadence.window_minutes, 15);
        assert_eq!(
            cadence.transport,
            TransportConfig::Spool {
                path: PathBuf::from("/var/spool/cadence"),
                identities: vec!["sales@example.com".to_string()],
            }
        );
        assert_eq!(cadence.dispatch.sender.as_deref(), Some("sales@example.com"));
        assert_eq!(cadence.dispatch.throttle.max_per_minute, 30);
        assert!(cadence.dispatch.compensation.enabled);

        assert_eq!(cadence.schedule().len(), 2);
        assert_eq!(
            cadence.schedule()[1].timing,
            Timing::At {
                date: "2026-03-09".to_string(),
                time: "14:30".to_string(),
            }
        );
        assert_eq!(
            cadence.schedule()[1].attachments,
            vec![PathBuf::from("deck.pdf")]
        );
    }

    #[test]
    fn test_defaults() {
        let cadence = Cadence::from_ron(r#"Cadence(contacts: "c.ron")"#).unwrap();

        assert!(!cadence.send);
        assert_eq!(cadence.window_minutes, 0);
        assert_eq!(cadence.transport, TransportConfig::default());
        assert_eq!(cadence.dispatch, DispatchConfig::default());
        assert_eq!(cadence.dispatch.throttle.max_per_minute, 20);
        assert!(cadence.schedule().is_empty());
    }

    #[test]
    fn test_missing_contacts_rejected() {
        assert!(Cadence::from_ron("Cadence(send: true)").is_err());
    }

    #[tokio::test]
    async fn test_preview_renders_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let contacts = dir.path().join("contacts.ron");
        std::fs::write(
            &contacts,
            r#"[(email: "ana@example.com", first_name: "Ana"), (email: "bo@example.com")]"#,
        )
        .unwrap();

        let spool = dir.path().join("spool");
        let text = CONFIG
            .replace("contacts.ron", &contacts.display().to_string())
            .replace("/var/spool/cadence", &spool.display().to_string());
        let cadence = Cadence::from_ron(&text).unwrap();

        let now = NaiveDateTime::parse_from_str("2026-03-02 07:00", "%Y-%m-%d %H:%M").unwrap();
        let messages = cadence
            .preview(RunOptions {
                window_minutes: Some(0),
                now: Some(now),
                ..RunOptions::default()
            })
            .await
            .unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].subject, "Hello Ana");
        assert_eq!(messages[2].subject, "Hello ");
        assert_eq!(messages[0].identity.as_deref(), Some("sales@example.com"));
        assert_eq!(
            messages[1].deferred,
            NaiveDateTime::parse_from_str("2026-03-09 14:30", "%Y-%m-%d %H:%M").ok()
        );
        assert!(!spool.exists());
    }
}
