//! GitHub identities.
//!
//! Logins are compared case-insensitively (GitHub treats `Alice` and `ALIcE`
//! as the same account) but the spelling an actor arrived with is kept for
//! display, so rendered output echoes what the user actually typed.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Suffix GitHub appends to the login of every App installation.
const BOT_SUFFIX: &str = "[bot]";

/// A login whose equality, ordering and hashing ignore ASCII case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    pub fn new(login: impl Into<String>) -> Self {
        Self(login.into())
    }

    /// The login exactly as it was observed.
    pub fn login(&self) -> &str {
        &self.0
    }

    /// Lower-cased login, used for set membership and the metadata marker.
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Returns true if this actor is the configured bot or any GitHub App.
    pub fn is_bot(&self, bot_login: Option<&str>) -> bool {
        if let Some(bot) = bot_login {
            if self.0.eq_ignore_ascii_case(bot) {
                return true;
            }
        }
        self.normalized().ends_with(BOT_SUFFIX)
    }
}

impl PartialEq for Actor {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Actor {}

impl Hash for Actor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl Ord for Actor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .bytes()
            .map(|b| b.to_ascii_lowercase())
            .cmp(other.0.bytes().map(|b| b.to_ascii_lowercase()))
    }
}

impl PartialOrd for Actor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Actor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Actor {
    fn from(s: String) -> Self {
        Self(s)
    }
}
