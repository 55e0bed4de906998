//! The authenticated owner of a drive session.

use serde::{Deserialize, Serialize};

/// An authenticated user as reported by the identity provider.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Stable identifier; used as the owner key of every file record.
    pub id: String,

    pub email: String,

    pub display_name: Option<String>,

    pub avatar_url: Option<String>,
}

impl Principal {
    /// Name to show for this user: the display name, or the local part of the email.
    pub fn label(&self) -> String {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or(&self.email)
                .to_string(),
        }
    }

    /// Single uppercase initial used when no avatar is set.
    pub fn initial(&self) -> Option<char> {
        self.label().chars().next().map(|c| c.to_ascii_uppercase())
    }
}
