//! Server configuration: layered defaults, optional config file, and
//! `BELTREX_`-prefixed environment overrides.

use std::path::{Path, PathBuf};

use beltrex_model::{SourceDescriptor, SourceKind};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// SQLite database holding configuration records and the frame index.
    pub database_path: PathBuf,
    /// Root for raw frame storage.
    pub storage_root: PathBuf,
    /// Root the local IRIS artifact tree is created under.
    pub artifact_root: PathBuf,
    /// Grace period for the shutdown sequence before the failsafe exit.
    pub shutdown_grace_seconds: u64,
    pub upstreams: UpstreamEndpoints,
}

/// Base URLs of the three upstream producers.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamEndpoints {
    pub webcam: String,
    pub legacy: String,
    pub simulator: String,
}

impl ServerConfig {
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 5000_i64)?
            .set_default("database_path", "beltrex.db")?
            .set_default("storage_root", "raw_data_store")?
            .set_default("artifact_root", ".")?
            .set_default("shutdown_grace_seconds", 30_i64)?
            .set_default("upstreams.webcam", "http://localhost:5001")?
            .set_default("upstreams.legacy", "http://localhost:5002")?
            .set_default("upstreams.simulator", "http://localhost:5003")?;

        builder = match file {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("beltrex").required(false)),
        };
        let settings = builder
            .add_source(config::Environment::with_prefix("BELTREX").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    fn base_url(&self, kind: SourceKind) -> &str {
        match kind {
            SourceKind::Webcam => &self.upstreams.webcam,
            SourceKind::Legacy => &self.upstreams.legacy,
            SourceKind::Simulator => &self.upstreams.simulator,
        }
    }

    /// Stream URL of one upstream device. Only the industrial front-end
    /// addresses devices individually.
    pub fn video_url(&self, kind: SourceKind, device_id: u32) -> String {
        let base = self.base_url(kind);
        match kind {
            SourceKind::Legacy => format!("{base}/video/{device_id}"),
            _ => format!("{base}/video"),
        }
    }

    pub fn health_url(&self, kind: SourceKind) -> String {
        format!("{}/devices", self.base_url(kind))
    }

    pub fn descriptor(&self, kind: SourceKind, device_id: u32) -> SourceDescriptor {
        SourceDescriptor {
            kind,
            device_id,
            stream_url: self.video_url(kind, device_id),
            health_url: self.health_url(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_upstreams() {
        let config = ServerConfig::load(None).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(
            config.video_url(SourceKind::Webcam, 0),
            "http://localhost:5001/video"
        );
        assert_eq!(
            config.video_url(SourceKind::Legacy, 3),
            "http://localhost:5002/video/3"
        );
        assert_eq!(
            config.health_url(SourceKind::Simulator),
            "http://localhost:5003/devices"
        );
    }

    #[test]
    fn descriptor_carries_both_urls() {
        let config = ServerConfig::load(None).unwrap();
        let descriptor = config.descriptor(SourceKind::Legacy, 1);
        assert_eq!(descriptor.task_key(), "legacy_1");
        assert!(descriptor.stream_url.ends_with("/video/1"));
        assert!(descriptor.health_url.ends_with("/devices"));
    }
}
