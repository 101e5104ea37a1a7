//! Diagnostic metadata attached to a request. Never read by firing, equality
//! or dispatch.

use std::fmt;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugNote {
    pub at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    /// Name of the component that produced the request.
    pub transcoder: Option<String>,
    /// Sync state the producer was in.
    pub state: Option<String>,
    pub notes: Vec<DebugNote>,
    pub start_of_upload: Option<DateTime<Utc>>,
}

impl DebugInfo {
    pub fn is_empty(&self) -> bool {
        self.transcoder.is_none()
            && self.state.is_none()
            && self.notes.is_empty()
            && self.start_of_upload.is_none()
    }

    pub(crate) fn append(&mut self, text: impl Into<String>) {
        self.notes.push(DebugNote {
            at: Utc::now(),
            text: text.into(),
        });
    }
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no debug information");
        }
        let mut sep = "";
        if let Some(transcoder) = &self.transcoder {
            write!(f, "transcoder: {transcoder}")?;
            sep = ", ";
        }
        if let Some(state) = &self.state {
            write!(f, "{sep}state: {state}")?;
            sep = ", ";
        }
        if let Some(start) = &self.start_of_upload {
            write!(f, "{sep}upload started: {}", start.to_rfc3339())?;
            sep = ", ";
        }
        for note in &self.notes {
            write!(f, "{sep}[{}] {}", note.at.to_rfc3339(), note.text)?;
            sep = ", ";
        }
        Ok(())
    }
}
