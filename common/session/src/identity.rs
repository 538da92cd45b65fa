use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionResult;
use crate::roles::{normalize_roles, Role};

/// Signed-in user as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IdentityRepr")]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new<I, R>(id: Uuid, name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        Self {
            id,
            name: name.into(),
            email: None,
            roles: normalize_roles(roles),
            is_active: true,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|value| value == role)
    }
}

fn default_active() -> bool {
    true
}

/// Collaborator that resolves the identity behind the current credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_identity(&self) -> SessionResult<Identity>;
}

#[derive(Debug, Deserialize)]
struct IdentityRepr {
    id: Uuid,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    roles: Option<RolesRepr>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default = "default_active")]
    is_active: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RolesRepr {
    Single(String),
    Many(Vec<String>),
}

impl TryFrom<IdentityRepr> for Identity {
    type Error = String;

    fn try_from(value: IdentityRepr) -> Result<Self, Self::Error> {
        let mut raw_roles = match value.roles {
            Some(RolesRepr::Single(item)) => vec![item],
            Some(RolesRepr::Many(items)) => items,
            None => Vec::new(),
        };
        if let Some(legacy) = value.role {
            raw_roles.push(legacy);
        }

        Ok(Self {
            id: value.id,
            name: value.name,
            email: value.email,
            roles: normalize_roles(raw_roles.iter().map(String::as_str)),
            is_active: value.is_active,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_role_list() {
        let id = Uuid::new_v4();
        let identity: Identity = serde_json::from_value(json!({
            "id": id,
            "name": "Asha",
            "email": "asha@campus.test",
            "roles": ["Admin", "teacher", "admin"],
            "is_active": true,
            "created_at": "2024-01-02T03:04:05Z"
        }))
        .expect("identity");

        assert_eq!(identity.id, id);
        assert_eq!(identity.roles, vec![Role::new("admin"), Role::new("teacher")]);
        assert!(identity.created_at.is_some());
        assert!(identity.updated_at.is_none());
    }

    #[test]
    fn decodes_single_legacy_role() {
        let identity: Identity = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "name": "Ravi",
            "role": "warden"
        }))
        .expect("identity");

        assert_eq!(identity.roles, vec![Role::new("warden")]);
        assert!(identity.is_active);
    }

    #[test]
    fn decodes_roles_given_as_string() {
        let identity: Identity = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "name": "Mei",
            "roles": "student"
        }))
        .expect("identity");
        assert!(identity.has_role(&Role::new("student")));
    }

    #[test]
    fn serialised_identity_round_trips_through_repr() {
        let identity = Identity::new(Uuid::new_v4(), "Lena", ["teacher", "librarian"]);
        let value = serde_json::to_value(&identity).expect("serialise");
        let back: Identity = serde_json::from_value(value).expect("deserialise");
        assert_eq!(back, identity);
    }
}
