use std::fmt;

use serde::{Deserialize, Serialize};

/// Account role as reported by the API.
/// Unrecognized roles are kept verbatim so they survive a storage round trip.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    #[default]
    User,
    Admin,
    Other(String),
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user" => Role::User,
            "admin" => Role::Admin,
            _ => Role::Other(s),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::User => "user".to_string(),
            Role::Admin => "admin".to_string(),
            Role::Other(s) => s,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Admin => f.write_str("admin"),
            Role::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub role: Role,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Name shown in the CLI, e.g. `alice <alice@example.com>`
    pub fn display_name(&self) -> String {
        match self.email {
            Some(ref email) if !email.is_empty() => format!("{} <{}>", self.username, email),
            _ => self.username.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_parses_api_shape() {
        let json = r#"{"id":"6650f1","username":"alice","email":"alice@example.com","role":"admin"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "6650f1");
        assert_eq!(user.username, "alice");
        assert!(user.is_admin());
        assert_eq!(user.display_name(), "alice <alice@example.com>");
    }

    #[test]
    fn test_user_without_email_or_role() {
        let user: User = serde_json::from_str(r#"{"id":"1","username":"bob"}"#).unwrap();
        assert_eq!(user.email, None);
        assert_eq!(user.role, Role::User);
        assert_eq!(user.display_name(), "bob");

        // email is omitted again when serialized
        let text = serde_json::to_string(&user).unwrap();
        assert!(!text.contains("email"));
    }

    #[test]
    fn test_unknown_role_is_preserved() {
        let user: User =
            serde_json::from_str(r#"{"id":"1","username":"mod","role":"moderator"}"#).unwrap();
        assert_eq!(user.role, Role::Other("moderator".to_string()));
        assert_eq!(user.role.to_string(), "moderator");

        let text = serde_json::to_string(&user).unwrap();
        assert!(text.contains(r#""role":"moderator""#));
    }
}
