//! Users and the logged-in account.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snowflake::{Entity, Snowflake};

/// A user known to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: Snowflake,
    /// Username, not unique across the platform.
    pub username: String,
    /// Four-digit tag, `"0"` for users migrated to unique usernames.
    #[serde(default = "default_discriminator")]
    pub discriminator: String,
    /// Display name, if set.
    #[serde(default)]
    pub global_name: Option<String>,
    /// Avatar hash.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Whether this is a bot account.
    #[serde(default)]
    pub bot: bool,
}

fn default_discriminator() -> String {
    "0".to_string()
}

impl User {
    /// `username#discriminator`, or just the username once the tag is retired.
    #[must_use]
    pub fn tag(&self) -> String {
        if self.discriminator == "0" {
            self.username.clone()
        } else {
            format!("{}#{}", self.username, self.discriminator)
        }
    }

    /// The name to show in lists: display name if present, else username.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

impl Entity for User {
    const KIND: &'static str = "user";

    fn id(&self) -> Snowflake {
        self.id
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// The account this session is authenticated as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// Public user fields.
    #[serde(flatten)]
    pub user: User,
    /// Account email.
    #[serde(default)]
    pub email: Option<String>,
    /// Whether the email is verified.
    #[serde(default)]
    pub verified: bool,
    /// Whether two-factor authentication is enabled.
    #[serde(default)]
    pub mfa_enabled: bool,
    /// Account phone number.
    #[serde(default)]
    pub phone: Option<String>,
}

impl CurrentUser {
    /// The account's user ID.
    #[must_use]
    pub const fn id(&self) -> Snowflake {
        self.user.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, discriminator: &str) -> User {
        User {
            id: Snowflake::new(1),
            username: name.to_string(),
            discriminator: discriminator.to_string(),
            global_name: None,
            avatar: None,
            bot: false,
        }
    }

    #[test]
    fn test_tag_with_discriminator() {
        assert_eq!(user("skip", "0001").tag(), "skip#0001");
    }

    #[test]
    fn test_tag_without_discriminator() {
        assert_eq!(user("skip", "0").tag(), "skip");
    }

    #[test]
    fn test_display_name_prefers_global_name() {
        let mut u = user("skip", "0");
        assert_eq!(u.display_name(), "skip");
        u.global_name = Some("Skip".to_string());
        assert_eq!(u.display_name(), "Skip");
    }

    #[test]
    fn test_current_user_flattened_decode() {
        let json = r#"{"id":"5","username":"me","discriminator":"1234","email":"me@example.com","verified":true,"mfa_enabled":false}"#;
        let me: CurrentUser = serde_json::from_str(json).unwrap();
        assert_eq!(me.id(), Snowflake::new(5));
        assert_eq!(me.user.tag(), "me#1234");
        assert!(me.verified);
    }
}
