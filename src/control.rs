//! Reading control metadata out of `.deb` files.

use apt_repository::Stanza;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Source of a package file's control fields.
#[async_trait]
pub trait ControlExtractor: Send + Sync {
    async fn extract(&self, package_file: &Path) -> Result<Stanza>;
}

/// Runs `dpkg-deb --field` on the package file.
#[derive(Debug, Clone)]
pub struct DpkgDebExtractor {
    program: PathBuf,
}

impl DpkgDebExtractor {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("dpkg-deb"),
        }
    }

    /// Use a different `dpkg-deb` binary.
    pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DpkgDebExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlExtractor for DpkgDebExtractor {
    async fn extract(&self, package_file: &Path) -> Result<Stanza> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--field")
            .arg(package_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running command: {:?}", cmd);

        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            error!(
                "Failed to read control fields of {} (exit code {}): {}",
                package_file.display(),
                exit_code,
                stderr
            );
            return Err(Error::MalformedMetadata(format!(
                "{}: dpkg-deb failed with exit code {}: {}",
                package_file.display(),
                exit_code,
                stderr.trim()
            )));
        }

        parse_control(package_file, &output.stdout)
    }
}

/// Control fields known up front.
#[derive(Debug, Clone)]
pub struct StaticControl(pub Stanza);

#[async_trait]
impl ControlExtractor for StaticControl {
    async fn extract(&self, _package_file: &Path) -> Result<Stanza> {
        Ok(self.0.clone())
    }
}

fn parse_control(package_file: &Path, data: &[u8]) -> Result<Stanza> {
    let text = std::str::from_utf8(data).map_err(|e| {
        Error::MalformedMetadata(format!("{}: {}", package_file.display(), e))
    })?;
    Stanza::parse(text)
        .map_err(|e| Error::MalformedMetadata(format!("{}: {}", package_file.display(), e)))
}
