//! Outbound email alerts.
//!
//! Delivery is fire-and-forget from the caller's point of view: a failed send is
//! logged by the caller and never retried.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::path::PathBuf;

#[derive(Debug)]
pub enum NotifyError {
    Address(String),
    Message(lettre::error::Error),
    Smtp(lettre::transport::smtp::Error),
    Attachment { path: PathBuf, source: std::io::Error },
}

impl core::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NotifyError::Address(s) => write!(f, "invalid address: {}", s),
            NotifyError::Message(e) => write!(f, "message build error: {}", e),
            NotifyError::Smtp(e) => write!(f, "smtp error: {}", e),
            NotifyError::Attachment { path, source } => {
                write!(f, "attachment {} unreadable: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for NotifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifyError::Message(e) => Some(e),
            NotifyError::Smtp(e) => Some(e),
            NotifyError::Attachment { source, .. } => Some(source),
            NotifyError::Address(_) => None,
        }
    }
}

impl From<lettre::error::Error> for NotifyError {
    fn from(value: lettre::error::Error) -> Self {
        NotifyError::Message(value)
    }
}

impl From<lettre::transport::smtp::Error> for NotifyError {
    fn from(value: lettre::transport::smtp::Error) -> Self {
        NotifyError::Smtp(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

impl Alert {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Alert {
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }
}

pub trait Notifier {
    fn send(&self, alert: &Alert) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub recipients: Vec<String>,
}

pub struct SmtpNotifier {
    settings: SmtpSettings,
}

impl SmtpNotifier {
    pub fn new(settings: SmtpSettings) -> Self {
        SmtpNotifier { settings }
    }

    fn sender(&self) -> String {
        self.settings
            .username
            .clone()
            .unwrap_or_else(|| format!("{}@localhost", env!("CARGO_PKG_NAME")))
    }

    fn transport(&self) -> Result<SmtpTransport, NotifyError> {
        if self.settings.server == "localhost" {
            return Ok(SmtpTransport::builder_dangerous("localhost").build());
        }
        let mut builder = SmtpTransport::relay(&self.settings.server)?;
        if let (Some(user), Some(pass)) = (&self.settings.username, &self.settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(builder.build())
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let message = build_message(&self.sender(), &self.settings.recipients, alert)?;
        self.transport()?.send(&message)?;
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| NotifyError::Address(format!("{}: {}", address, e)))
}

pub fn build_message(from: &str, to: &[String], alert: &Alert) -> Result<Message, NotifyError> {
    if to.is_empty() {
        return Err(NotifyError::Address("no recipients".to_string()));
    }
    let mut builder = Message::builder().from(parse_mailbox(from)?).subject(alert.subject.as_str());
    for recipient in to {
        builder = builder.to(parse_mailbox(recipient)?);
    }

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(alert.body.clone()));
    for path in &alert.attachments {
        let bytes = std::fs::read(path).map_err(|source| NotifyError::Attachment {
            path: path.clone(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = ContentType::parse("application/octet-stream")
            .map_err(|e| NotifyError::Address(format!("content type: {}", e)))?;
        parts = parts.singlepart(Attachment::new(filename).body(bytes, content_type));
    }

    Ok(builder.multipart(parts)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builds_message_with_all_recipients() {
        let alert = Alert::new("[IFCB010] ALERT", "Counts Above Threshold");
        let to = vec!["a@example.org".to_string(), "b@example.org".to_string()];
        let message = build_message("alerts@example.org", &to, &alert).expect("message");
        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("Subject: [IFCB010] ALERT"));
        assert!(raw.contains("a@example.org"));
        assert!(raw.contains("b@example.org"));
        assert!(raw.contains("Counts Above Threshold"));
    }

    #[test]
    fn attaches_files_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pumplog.csv");
        let mut f = std::fs::File::create(&path).expect("create");
        writeln!(f, "triggering_bin,pump_turned_off,pump_back_on").expect("write");

        let mut alert = Alert::new("subject", "body");
        alert.attachments.push(path);
        let message = build_message("alerts@example.org", &["a@example.org".to_string()], &alert).expect("message");
        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("filename=\"pumplog.csv\""));
    }

    #[test]
    fn rejects_bad_or_missing_recipients() {
        let alert = Alert::new("s", "b");
        assert!(matches!(
            build_message("alerts@example.org", &[], &alert),
            Err(NotifyError::Address(_))
        ));
        assert!(matches!(
            build_message("alerts@example.org", &["not an address".to_string()], &alert),
            Err(NotifyError::Address(_))
        ));
    }

    #[test]
    fn missing_attachment_is_reported() {
        let mut alert = Alert::new("s", "b");
        alert.attachments.push(PathBuf::from("/nonexistent/plot.png"));
        let err = build_message("alerts@example.org", &["a@example.org".to_string()], &alert).unwrap_err();
        assert!(matches!(err, NotifyError::Attachment { .. }));
    }
}
