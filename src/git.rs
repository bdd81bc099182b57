//! Clonado superficial (`--depth 1`) del repositorio a un directorio efímero.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::Repository;

/// Tiempo máximo para un `git clone`; pasado este plazo se mata el proceso.
pub const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
pub trait RepoCloner: Send + Sync {
    /// Clona `repo` en `dest` (que ya existe y está vacío).
    async fn clone_repo(&self, repo: &Repository, dest: &Path) -> Result<(), AppError>;
}

/// Clonado mediante el binario `git` del sistema, por HTTPS con token.
pub struct GitCloner {
    host: String,
    token: Option<String>,
}

impl GitCloner {
    pub fn new(host: impl Into<String>, token: Option<String>) -> Self {
        Self {
            host: host.into(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn clone_url(&self, repo: &Repository) -> String {
        match &self.token {
            Some(token) => format!(
                "https://{token}@{}/{}/{}.git",
                self.host, repo.owner, repo.name
            ),
            None => format!("https://{}/{}/{}.git", self.host, repo.owner, repo.name),
        }
    }

    /// Elimina el token de cualquier texto que vaya a registrarse o persistirse.
    fn redact(&self, text: &str) -> String {
        match &self.token {
            Some(token) => text.replace(token.as_str(), "***"),
            None => text.to_string(),
        }
    }
}

#[async_trait]
impl RepoCloner for GitCloner {
    async fn clone_repo(&self, repo: &Repository, dest: &Path) -> Result<(), AppError> {
        info!(
            "Clonando {}/{} (rama {}) en {}",
            repo.owner,
            repo.name,
            repo.branch,
            dest.display()
        );

        let mut command = Command::new("git");
        command
            .args(["clone", "--depth", "1", "--single-branch", "--branch"])
            .arg(&repo.branch)
            .arg(self.clone_url(repo))
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = run_with_timeout(command, CLONE_TIMEOUT).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Clone(self.redact(stderr.trim())));
        }
        Ok(())
    }
}

/// Ejecuta el comando y lo mata si no termina en `limit`.
async fn run_with_timeout(mut command: Command, limit: Duration) -> Result<Output, AppError> {
    command.kill_on_drop(true);
    match tokio::time::timeout(limit, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AppError::Clone(format!("no se pudo ejecutar git: {e}"))),
        Err(_) => {
            warn!("git no terminó en {}s, se aborta el clonado", limit.as_secs());
            Err(AppError::Clone(format!(
                "el clonado superó el tiempo máximo de {}s",
                limit.as_secs()
            )))
        }
    }
}
