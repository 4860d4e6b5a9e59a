//! Configuration loading

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::{AuthorityConfig, ScopeSet};
use crate::error::ConfigurationError;

/// Application settings (`config.toml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Identity provider instance, e.g. https://login.microsoftonline.com/
    pub instance: String,
    /// Azure AD tenant (common for multi-tenant)
    pub tenant_id: String,
    /// Application (client) ID of the registered public client
    pub client_id: String,
    /// Redirect URI registered for the client
    pub redirect_uri: String,
    /// Base URL of the calendar; calendarView is appended
    pub api_base_url: String,
    /// Delegated permissions to request
    pub scopes: Vec<String>,
    /// Maximum calendarView pages to follow per day
    pub max_pages: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instance: "https://login.microsoftonline.com/".to_string(),
            tenant_id: "common".to_string(),
            client_id: String::new(),
            redirect_uri: "https://login.microsoftonline.com/common/oauth2/nativeclient"
                .to_string(),
            api_base_url: "https://graph.microsoft.com/v1.0/me/calendar".to_string(),
            scopes: vec!["User.Read".to_string(), "Calendars.Read".to_string()],
            max_pages: 10,
        }
    }
}

impl Settings {
    /// Get config file path
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "dayview", "dayview")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Load settings from `path`, or the default location. A missing file
    /// yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate into the authority used by the broker and API client.
    pub fn authority_config(&self) -> Result<AuthorityConfig, ConfigurationError> {
        AuthorityConfig::new(
            &self.instance,
            &self.tenant_id,
            &self.client_id,
            &self.redirect_uri,
            &self.api_base_url,
            self.scopes.iter().collect::<ScopeSet>(),
        )
    }
}
