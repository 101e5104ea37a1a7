//! Session affinity: which class of transport session must carry a request.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Starts at `Default` and can be narrowed once, to one of the forced values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAffinity {
    #[default]
    Default,
    BackgroundOnly,
    VoipOnly,
}

impl SessionAffinity {
    /// Move to `target`. Re-applying the current value is a no-op; switching
    /// between the two forced values is rejected and leaves `self` untouched.
    pub fn narrow(&mut self, target: SessionAffinity) -> Result<(), RequestError> {
        match (*self, target) {
            (current, requested) if current == requested => Ok(()),
            (_, SessionAffinity::Default)
            | (SessionAffinity::BackgroundOnly, _)
            | (SessionAffinity::VoipOnly, _) => Err(RequestError::AffinityConflict {
                current: *self,
                requested: target,
            }),
            (SessionAffinity::Default, requested) => {
                *self = requested;
                Ok(())
            }
        }
    }
}

impl fmt::Display for SessionAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionAffinity::Default => "default",
            SessionAffinity::BackgroundOnly => "background",
            SessionAffinity::VoipOnly => "voip",
        })
    }
}
