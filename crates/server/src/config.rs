use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use server_api::identity::MAX_TOKEN_TTL_SECONDS;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";
pub const MAX_INVITE_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_seconds: i64,
    pub notification_grace_seconds: u64,
    pub notify_relay_url: Option<String>,
    pub email_from: String,
    pub client_url: Option<String>,
    pub invite_ttl_hours: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            database_url: "sqlite://./data/casework.db".into(),
            jwt_secret: DEV_JWT_SECRET.into(),
            token_ttl_seconds: 8 * 3600,
            notification_grace_seconds: 300,
            notify_relay_url: None,
            email_from: "no-reply@casework.local".into(),
            client_url: None,
            invite_ttl_hours: 24,
        }
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string("server.toml").ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then `server.toml`, then the environment. `APP__` keys win over bare ones.
pub fn load_settings_from(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) {
            if let Some(v) = file_cfg.get("bind_addr") {
                settings.server_bind = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("jwt_secret") {
                settings.jwt_secret = v.clone();
            }
            if let Some(v) = file_cfg.get("notify_relay_url") {
                settings.notify_relay_url = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("email_from") {
                settings.email_from = v.clone();
            }
            if let Some(v) = file_cfg.get("client_url") {
                settings.client_url = Some(v.clone());
            }
        }
    }

    let pick = |bare: &str, prefixed: &str| env(prefixed).or_else(|| env(bare));

    if let Some(v) = pick("SERVER_BIND", "APP__BIND_ADDR") {
        settings.server_bind = v;
    }
    if let Some(v) = pick("DATABASE_URL", "APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = pick("JWT_SECRET", "APP__JWT_SECRET") {
        settings.jwt_secret = v;
    }
    if let Some(v) = pick("NOTIFY_RELAY_URL", "APP__NOTIFY_RELAY_URL") {
        settings.notify_relay_url = Some(v).filter(|url| !url.trim().is_empty());
    }
    if let Some(v) = pick("EMAIL_FROM", "APP__EMAIL_FROM") {
        settings.email_from = v;
    }
    if let Some(v) = pick("CLIENT_URL", "APP__CLIENT_URL") {
        settings.client_url = Some(v).filter(|url| !url.trim().is_empty());
    }

    if let Some(parsed) = env("APP__TOKEN_TTL_SECONDS")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| (1..=MAX_TOKEN_TTL_SECONDS).contains(v))
    {
        settings.token_ttl_seconds = parsed;
    }
    if let Some(parsed) =
        env("APP__NOTIFICATION_GRACE_SECONDS").and_then(|v| v.parse::<u64>().ok())
    {
        settings.notification_grace_seconds = parsed;
    }
    if let Some(parsed) = env("APP__INVITE_TTL_HOURS")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| (1..=MAX_INVITE_TTL_HOURS).contains(v))
    {
        settings.invite_ttl_hours = parsed;
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
