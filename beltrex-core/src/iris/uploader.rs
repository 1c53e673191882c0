//! SFTP delivery of closed CSV artifacts. One connection per job, jobs
//! strictly FIFO, no retry: a failed job counts as failed and is dropped.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use beltrex_model::{ProjectSettings, SftpServerInfo, Stage};
use ssh2::Session;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::queue::QueueProcessor;

use super::ClosedArtifact;

/// One closed artifact to push to the remote tree.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub artifact: ClosedArtifact,
}

/// Single consumer of the upload queue; owns the remote connection for the
/// duration of one job.
#[derive(Debug)]
pub struct SftpUploader {
    server: SftpServerInfo,
    main_folder: String,
    model_subfolder: String,
    classifier_subfolder: String,
    connect_timeout: Duration,
}

impl SftpUploader {
    pub fn new(server: SftpServerInfo, settings: &ProjectSettings) -> Self {
        Self {
            server,
            main_folder: settings.iris_main_folder.clone(),
            model_subfolder: settings.iris_model_subfolder.clone(),
            classifier_subfolder: settings.iris_classifier_subfolder.clone(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn remote_dir(&self, stage: Stage) -> String {
        let subfolder = match stage {
            Stage::Detector => &self.model_subfolder,
            Stage::Classifier => &self.classifier_subfolder,
        };
        format!("{}/{}", self.main_folder, subfolder)
    }
}

#[async_trait]
impl QueueProcessor for SftpUploader {
    type Item = UploadJob;

    fn name(&self) -> &'static str {
        "sftp_uploader"
    }

    async fn process(&mut self, job: UploadJob) -> Result<()> {
        let local_path = job.artifact.path.clone();
        info!("uploading {}", local_path.display());

        let server = self.server.clone();
        let remote_dir = self.remote_dir(job.artifact.stage);
        let connect_timeout = self.connect_timeout;

        let remote_path = tokio::task::spawn_blocking(move || {
            transfer_file(&server, &local_path, &remote_dir, connect_timeout)
        })
        .await
        .map_err(|e| PipelineError::Remote(format!("upload task panicked: {e}")))??;

        info!("uploaded to {remote_path}");
        Ok(())
    }
}

/// Blocking transfer of one file. Connects, authenticates, ensures the
/// remote directory exists, puts the file under its base name, and closes
/// everything on the way out.
fn transfer_file(
    server: &SftpServerInfo,
    local_path: &Path,
    remote_dir: &str,
    connect_timeout: Duration,
) -> Result<String> {
    if !local_path.is_file() {
        return Err(PipelineError::Remote(format!(
            "not a file: {}",
            local_path.display()
        )));
    }

    let address = resolve(&server.server_name)?;
    let tcp = TcpStream::connect_timeout(&address, connect_timeout)
        .map_err(|e| PipelineError::Remote(format!("connect {}: {e}", server.server_name)))?;

    let mut session =
        Session::new().map_err(|e| PipelineError::Remote(format!("session: {e}")))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| PipelineError::Remote(format!("handshake: {e}")))?;
    session
        .userauth_password(&server.username, &server.password)
        .map_err(|e| PipelineError::Remote(format!("auth: {e}")))?;

    let sftp = session
        .sftp()
        .map_err(|e| PipelineError::Remote(format!("sftp subsystem: {e}")))?;

    ensure_remote_dir(&sftp, remote_dir);

    let file_name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::Remote("artifact path has no file name".into()))?;
    let remote_path = format!("{remote_dir}/{file_name}");

    let mut local = std::fs::File::open(local_path)?;
    let mut contents = Vec::new();
    local.read_to_end(&mut contents)?;

    let mut remote = sftp
        .create(Path::new(&remote_path))
        .map_err(|e| PipelineError::Remote(format!("create {remote_path}: {e}")))?;
    std::io::Write::write_all(&mut remote, &contents)
        .map_err(|e| PipelineError::Remote(format!("put {remote_path}: {e}")))?;

    Ok(remote_path)
}

fn resolve(server_name: &str) -> Result<std::net::SocketAddr> {
    let with_port = if server_name.contains(':') {
        server_name.to_string()
    } else {
        format!("{server_name}:22")
    };
    with_port
        .to_socket_addrs()
        .map_err(|e| PipelineError::Remote(format!("resolve {server_name}: {e}")))?
        .next()
        .ok_or_else(|| PipelineError::Remote(format!("no address for {server_name}")))
}

/// mkdir -p semantics: walk the ancestors root-first and create whatever is
/// missing. Creation failures are warnings; the final put surfaces the real
/// error.
fn ensure_remote_dir(sftp: &ssh2::Sftp, remote_dir: &str) {
    let mut prefix = PathBuf::new();
    for component in Path::new(remote_dir).components() {
        prefix.push(component);
        if sftp.stat(&prefix).is_err() {
            match sftp.mkdir(&prefix, 0o755) {
                Ok(()) => info!("created remote directory {}", prefix.display()),
                Err(e) => warn!("could not create remote directory {}: {e}", prefix.display()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueWorker;
    use chrono::Local;

    fn uploader_to(server_name: &str) -> SftpUploader {
        let mut uploader = SftpUploader::new(
            SftpServerInfo {
                server_name: server_name.into(),
                username: "iris".into(),
                password: "secret".into(),
            },
            &ProjectSettings::default(),
        );
        uploader.connect_timeout = Duration::from_millis(500);
        uploader
    }

    #[tokio::test]
    async fn unreachable_host_counts_a_failure_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_path = dir.path().join("model_x.csv");
        std::fs::write(&artifact_path, "header\n").unwrap();

        // Nothing listens on this port; the connect fails fast.
        let worker = QueueWorker::spawn(uploader_to("127.0.0.1:1"), 4);
        let queue = worker.queue();
        queue.enqueue(UploadJob {
            artifact: ClosedArtifact {
                path: artifact_path,
                stage: Stage::Detector,
                created_at: Local::now(),
            },
        });

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(worker.stop(Duration::from_secs(5)).await);
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.depth, 0);
    }

    #[test]
    fn remote_dir_follows_stage_subfolder() {
        let uploader = uploader_to("example.invalid");
        assert_eq!(uploader.remote_dir(Stage::Detector), "iris_data/model");
        assert_eq!(
            uploader.remote_dir(Stage::Classifier),
            "iris_data/classifier"
        );
    }

    #[test]
    fn missing_file_is_a_remote_error() {
        let err = transfer_file(
            &SftpServerInfo {
                server_name: "127.0.0.1:1".into(),
                username: "iris".into(),
                password: "secret".into(),
            },
            Path::new("/nonexistent/artifact.csv"),
            "iris_data/model",
            Duration::from_millis(100),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Remote(_)));
    }
}
