//! Persists sampled JPEGs under rolling, time-bucketed session folders and
//! records each saved frame in the persistent frame index.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use dashmap::DashMap;
use tracing::{debug, error};

use crate::db::FrameRepository;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FrameSinkConfig {
    /// Absolute storage root for raw frames.
    pub root: PathBuf,
    /// Wall-clock lifetime of one session folder.
    pub session_duration: Duration,
    /// Tracked-session cap; beyond it, entries older than twice the session
    /// duration are evicted.
    pub max_sessions: usize,
}

impl FrameSinkConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            session_duration: Duration::from_secs(15 * 60),
            max_sessions: 100,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionFolder {
    started: DateTime<Local>,
    relative: PathBuf,
}

/// One sink is shared by every ingest task; sessions are keyed by source.
#[derive(Debug)]
pub struct FrameSink {
    config: FrameSinkConfig,
    project: String,
    sessions: DashMap<String, SessionFolder>,
    frames: FrameRepository,
}

impl FrameSink {
    pub fn new(config: FrameSinkConfig, project: String, frames: FrameRepository) -> Self {
        Self {
            config,
            project,
            sessions: DashMap::new(),
            frames,
        }
    }

    /// Save one JPEG under the current session folder for `source_key`,
    /// returning the stored relative path. The folder is created lazily on
    /// first write and rolled over once it outlives the session duration.
    /// The filename is chosen by the caller so detection records can point
    /// at the stored frame.
    pub async fn save_frame(
        &self,
        source_key: &str,
        captured_at: DateTime<Local>,
        filename: &str,
        jpeg: &[u8],
    ) -> Result<String> {
        let folder = self.current_session_folder(source_key, captured_at).await?;
        let relative = folder.join(filename);

        tokio::fs::write(self.config.root.join(&relative), jpeg).await?;

        let relative = relative.to_string_lossy().into_owned();
        if let Err(err) = self
            .frames
            .insert(source_key, captured_at.with_timezone(&Utc), &relative)
            .await
        {
            error!("failed to index frame {relative}: {err}");
        }
        Ok(relative)
    }

    async fn current_session_folder(
        &self,
        source_key: &str,
        now: DateTime<Local>,
    ) -> Result<PathBuf> {
        if self.sessions.len() > self.config.max_sessions {
            self.evict_stale(now);
        }

        if let Some(session) = self.sessions.get(source_key) {
            let elapsed = (now - session.started)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < self.config.session_duration {
                return Ok(session.relative.clone());
            }
        }

        let folder_name = format!("session_{}", now.format("%Y%m%d_%H%M%S"));
        let relative = Path::new(&self.project).join("export").join(folder_name);
        tokio::fs::create_dir_all(self.config.root.join(&relative)).await?;
        debug!("[{source_key}] new session folder {}", relative.display());

        self.sessions.insert(
            source_key.to_string(),
            SessionFolder {
                started: now,
                relative: relative.clone(),
            },
        );
        Ok(relative)
    }

    fn evict_stale(&self, now: DateTime<Local>) {
        let limit = self.config.session_duration * 2;
        self.sessions.retain(|key, session| {
            let keep = (now - session.started).to_std().unwrap_or(Duration::ZERO) <= limit;
            if !keep {
                debug!("evicted stale session {key}");
            }
            keep
        });
    }

    /// Drop the session tracking for a finished task.
    pub fn end_session(&self, source_key: &str) {
        self.sessions.remove(source_key);
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn sink(session_duration: Duration) -> (FrameSink, tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).await.unwrap();
        let config = FrameSinkConfig {
            root: dir.path().join("raw_data_store"),
            session_duration,
            max_sessions: 4,
        };
        let sink = FrameSink::new(config, "belt_test".into(), db.frames());
        (sink, dir, db)
    }

    #[tokio::test]
    async fn saves_frame_and_indexes_it() {
        let (sink, dir, db) = sink(Duration::from_secs(900)).await;
        let relative = sink
            .save_frame("webcam_0", Local::now(), "frame_0001.jpg", b"\xFF\xD8jpeg\xFF\xD9")
            .await
            .unwrap();
        assert!(relative.contains("belt_test"));
        assert!(relative.ends_with("frame_0001.jpg"));
        assert!(dir.path().join("raw_data_store").join(&relative).exists());
        assert_eq!(db.frames().count_for("webcam_0").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn session_folder_rolls_over_after_duration() {
        let (sink, _dir, _db) = sink(Duration::from_millis(100)).await;
        let first = sink
            .save_frame("webcam_0", Local::now(), "frame_a.jpg", b"a")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = sink
            .save_frame("webcam_0", Local::now(), "frame_b.jpg", b"b")
            .await
            .unwrap();

        let folder = |path: &str| {
            Path::new(path)
                .parent()
                .unwrap()
                .file_name()
                .unwrap()
                .to_owned()
        };
        assert_ne!(folder(&first), folder(&second));
    }

    #[tokio::test]
    async fn sessions_are_evicted_beyond_the_cap() {
        let (sink, _dir, _db) = sink(Duration::from_millis(10)).await;
        for i in 0..5 {
            sink.save_frame(&format!("webcam_{i}"), Local::now(), "frame_x.jpg", b"x")
                .await
                .unwrap();
        }
        assert_eq!(sink.tracked_sessions(), 5);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The next write trips the cap check and sweeps stale entries.
        sink.save_frame("webcam_9", Local::now(), "frame_x.jpg", b"x")
            .await
            .unwrap();
        assert!(sink.tracked_sessions() <= 2);
    }
}
