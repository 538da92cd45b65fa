use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use common_session::{CredentialPair, SessionConfig};

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub session: SessionConfig,
    pub snapshot_path: PathBuf,
    pub route_tree_path: Option<PathBuf>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl ShellConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let session = SessionConfig::from_lookup(&lookup).context("invalid session configuration")?;
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let snapshot_path = non_empty("SESSION_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".dashboard/session.json"));
        let route_tree_path = non_empty("DASHBOARD_ROUTE_TREE_PATH").map(PathBuf::from);
        let access_token = non_empty("SESSION_ACCESS_TOKEN");
        let refresh_token = non_empty("SESSION_REFRESH_TOKEN");
        if refresh_token.is_some() && access_token.is_none() {
            anyhow::bail!("SESSION_REFRESH_TOKEN requires SESSION_ACCESS_TOKEN");
        }

        Ok(Self {
            session,
            snapshot_path,
            route_tree_path,
            access_token,
            refresh_token,
        })
    }

    /// Credentials to sign in with, when supplied through the environment.
    pub fn credentials(&self) -> Option<CredentialPair> {
        let access_token = self.access_token.clone()?;
        Some(CredentialPair {
            access_token,
            refresh_token: self.refresh_token.clone(),
        })
    }
}
