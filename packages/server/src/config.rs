//! Process configuration from `THUMBNAILER_*` environment variables.

use std::str::FromStr;

use db::DbConfig;
use storage::{StorageConfig, StorageError};
use thumbnailer_core::PipelineConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything the binary needs to start the pipeline.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Read the configuration from the process environment.
    ///
    /// - `THUMBNAILER_DB`: `memory` (default), `rocksdb:<path>` (`rocksdb`
    ///   feature) or a server endpoint such as `ws://localhost:8000`
    ///   (`remote` feature)
    /// - `THUMBNAILER_DB_NAMESPACE`, `THUMBNAILER_DB_DATABASE`
    /// - `THUMBNAILER_DB_USER` / `THUMBNAILER_DB_PASS`
    /// - `THUMBNAILER_CONCURRENCY`, `THUMBNAILER_THUMB_WIDTH`,
    ///   `THUMBNAILER_THUMB_HEIGHT`, `THUMBNAILER_SUFFIX`,
    ///   `THUMBNAILER_POLL_INTERVAL_MS`, `THUMBNAILER_GENERATE_TIMEOUT_SECS`,
    ///   `THUMBNAILER_SWEEP_INTERVAL_SECS`, `THUMBNAILER_STALE_PENDING_SECS`
    ///
    /// Storage variables are read by [`StorageConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage = StorageConfig::from_env()?;
        Self::from_lookup(|name| std::env::var(name).ok(), storage)
    }

    pub fn from_lookup<F>(lookup: F, storage: StorageConfig) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut db = match var("THUMBNAILER_DB") {
            None => DbConfig::memory(),
            Some(v) if v == "memory" || v == "mem://" => DbConfig::memory(),
            Some(v) => match v.strip_prefix("rocksdb:") {
                Some(path) => DbConfig::rocksdb(path.trim_start_matches("//")),
                None => DbConfig::endpoint(v),
            },
        };
        if !db.is_supported() {
            return Err(invalid(
                "THUMBNAILER_DB",
                &db.endpoint,
                "engine not compiled in (see the rocksdb and remote features)",
            ));
        }
        if let Some(ns) = var("THUMBNAILER_DB_NAMESPACE") {
            db = db.with_namespace(ns);
        }
        if let Some(name) = var("THUMBNAILER_DB_DATABASE") {
            db = db.with_database(name);
        }
        if let (Some(user), Some(pass)) = (var("THUMBNAILER_DB_USER"), var("THUMBNAILER_DB_PASS")) {
            db = db.with_credentials(user, pass);
        }

        let mut pipeline = PipelineConfig::default();
        if let Some(n) = parse::<u32>("THUMBNAILER_CONCURRENCY", var("THUMBNAILER_CONCURRENCY"))? {
            if n == 0 {
                return Err(invalid("THUMBNAILER_CONCURRENCY", "0", "must be at least 1"));
            }
            pipeline.concurrency = n;
        }
        if let Some(w) = parse::<u32>("THUMBNAILER_THUMB_WIDTH", var("THUMBNAILER_THUMB_WIDTH"))? {
            pipeline.thumbnail_width = w;
        }
        if let Some(h) = parse::<u32>("THUMBNAILER_THUMB_HEIGHT", var("THUMBNAILER_THUMB_HEIGHT"))? {
            pipeline.thumbnail_height = h;
        }
        if pipeline.thumbnail_width == 0 || pipeline.thumbnail_height == 0 {
            return Err(invalid(
                "THUMBNAILER_THUMB_WIDTH",
                &pipeline.thumbnail_size().to_string(),
                "thumbnail dimensions must be positive",
            ));
        }
        if let Some(suffix) = var("THUMBNAILER_SUFFIX") {
            pipeline.filename_suffix = suffix;
        }
        if let Some(ms) = parse::<u64>("THUMBNAILER_POLL_INTERVAL_MS", var("THUMBNAILER_POLL_INTERVAL_MS"))? {
            pipeline.poll_interval_ms = ms.max(1);
        }
        if let Some(secs) = parse::<u64>(
            "THUMBNAILER_GENERATE_TIMEOUT_SECS",
            var("THUMBNAILER_GENERATE_TIMEOUT_SECS"),
        )? {
            pipeline.generate_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(secs) = parse::<u64>(
            "THUMBNAILER_SWEEP_INTERVAL_SECS",
            var("THUMBNAILER_SWEEP_INTERVAL_SECS"),
        )? {
            pipeline.sweep_interval_secs = secs.max(1);
        }
        if let Some(secs) = parse::<u64>(
            "THUMBNAILER_STALE_PENDING_SECS",
            var("THUMBNAILER_STALE_PENDING_SECS"),
        )? {
            pipeline.stale_pending_secs = secs;
        }

        Ok(Self {
            db,
            storage,
            pipeline,
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(var: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| v.parse::<T>().map_err(|e| invalid(var, &v, &e.to_string())))
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned(), StorageConfig::memory())
    }

    #[test]
    fn defaults_without_variables() -> Result<(), ConfigError> {
        let cfg = config(&[])?;
        assert_eq!(cfg.db.endpoint, "mem://");
        assert_eq!(cfg.pipeline, PipelineConfig::default());
        Ok(())
    }

    #[test]
    fn variables_override_defaults() -> Result<(), ConfigError> {
        let cfg = config(&[
            ("THUMBNAILER_DB", "memory"),
            ("THUMBNAILER_DB_NAMESPACE", "media"),
            ("THUMBNAILER_CONCURRENCY", "4"),
            ("THUMBNAILER_THUMB_WIDTH", "320"),
            ("THUMBNAILER_SUFFIX", "-small"),
            ("THUMBNAILER_GENERATE_TIMEOUT_SECS", "15"),
        ])?;
        assert_eq!(cfg.db.endpoint, "mem://");
        assert_eq!(cfg.db.namespace, "media");
        assert_eq!(cfg.pipeline.concurrency, 4);
        assert_eq!(cfg.pipeline.thumbnail_width, 320);
        assert_eq!(cfg.pipeline.thumbnail_height, 100);
        assert_eq!(cfg.pipeline.filename_suffix, "-small");
        assert_eq!(cfg.pipeline.generate_timeout_secs, Some(15));
        Ok(())
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = config(&[("THUMBNAILER_CONCURRENCY", "many")]);
        assert!(matches!(
            err,
            Err(ConfigError::Invalid {
                var: "THUMBNAILER_CONCURRENCY",
                ..
            })
        ));
        assert!(config(&[("THUMBNAILER_CONCURRENCY", "0")]).is_err());
        assert!(config(&[("THUMBNAILER_THUMB_HEIGHT", "0")]).is_err());
    }

    #[test]
    fn endpoints_need_their_engine() -> Result<(), ConfigError> {
        let ws = config(&[("THUMBNAILER_DB", "ws://localhost:8000")]);
        assert_eq!(ws.is_ok(), cfg!(feature = "remote"));
        if !cfg!(feature = "remote") {
            assert!(matches!(ws, Err(ConfigError::Invalid { var: "THUMBNAILER_DB", .. })));
        }

        let rocks = config(&[("THUMBNAILER_DB", "rocksdb:./data/db")]);
        assert_eq!(rocks.is_ok(), cfg!(feature = "rocksdb"));
        if let Ok(cfg) = rocks {
            assert_eq!(cfg.db.endpoint, "rocksdb://./data/db");
        }

        assert!(config(&[("THUMBNAILER_DB", "carrier-pigeon://coop")]).is_err());
        Ok(())
    }
}
