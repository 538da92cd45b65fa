use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Role tag held by an identity. Tags are compared trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::new(value)
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::new(raw))
    }
}

/// Ordered, de-duplicated role list; empty tags are dropped.
pub fn normalize_roles<I, R>(roles: I) -> Vec<Role>
where
    I: IntoIterator<Item = R>,
    R: Into<Role>,
{
    let mut out: Vec<Role> = Vec::new();
    for role in roles.into_iter().map(Into::into) {
        if role.is_empty() || out.contains(&role) {
            continue;
        }
        out.push(role);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_normalised() {
        assert_eq!(Role::new(" Teacher "), Role::new("teacher"));
        assert_eq!(Role::new("ADMIN").as_str(), "admin");
    }

    #[test]
    fn normalize_roles_keeps_first_occurrence_order() {
        let roles = normalize_roles(["admin", "Teacher", "", "ADMIN", "warden"]);
        assert_eq!(
            roles,
            vec![Role::new("admin"), Role::new("teacher"), Role::new("warden")]
        );
    }

    #[test]
    fn role_deserialises_normalised() {
        let role: Role = serde_json::from_str("\"Librarian\"").expect("role");
        assert_eq!(role.as_str(), "librarian");
    }
}
