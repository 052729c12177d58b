//! Source stage: shallow checkout of the configured branch.
//!
//! The access token is resolved through the [`SecretResolver`] seam at
//! run time and handed to git through an askpass helper that reads it
//! from the git process's environment. The token never appears on the
//! command line, in the clone URL, in logs, or on disk, so git cannot
//! echo it back in its own error output.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::info;

use gantry_core::config::SourceConfig;

use crate::artifact::Artifact;
use crate::error::StageError;
use crate::pipeline::{Stage, StageFuture};

/// Env var the askpass helper echoes back to git. Set only on the git
/// process, never on our own environment.
const TOKEN_ENV: &str = "GANTRY_GIT_TOKEN";

/// Askpass helper file name within the work directory.
const ASKPASS_FILE: &str = "git-askpass.sh";

/// Resolves a secret by name and key at run time.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, secret: &str, key: &str) -> Result<String, StageError>;
}

/// Reads secrets from environment variables.
///
/// `scm-access-token` / `token` resolves from `SCM_ACCESS_TOKEN_TOKEN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

/// Environment variable name for a secret/key pair: upper snake case,
/// non-alphanumerics collapsed to underscores.
pub fn env_var_name(secret: &str, key: &str) -> String {
    format!("{secret}_{key}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl SecretResolver for EnvSecrets {
    fn resolve(&self, secret: &str, key: &str) -> Result<String, StageError> {
        let var = env_var_name(secret, key);
        std::env::var(&var).map_err(|_| StageError::SecretUnavailable {
            name: format!("{secret}/{key}"),
            reason: format!("environment variable {var} is not set"),
        })
    }
}

/// Checks out `owner/repo@branch` into the work directory.
pub struct SourceStage<S> {
    config: SourceConfig,
    secrets: S,
    host: String,
    workdir: PathBuf,
}

impl<S: SecretResolver> SourceStage<S> {
    pub fn new(config: SourceConfig, secrets: S, workdir: &Path) -> Self {
        Self {
            config,
            secrets,
            host: "github.com".to_string(),
            workdir: workdir.to_path_buf(),
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Token-free clone URL, safe for argv, logs, and errors.
    fn clone_url(&self) -> String {
        format!(
            "https://{}/{}/{}.git",
            self.host, self.config.owner, self.config.repo
        )
    }

    /// Write the askpass helper. It echoes `TOKEN_ENV` back for both
    /// of git's credential prompts; the script itself holds no secret.
    fn write_askpass(&self) -> Result<PathBuf, StageError> {
        let path = self.workdir.join(ASKPASS_FILE);
        std::fs::write(&path, format!("#!/bin/sh\nprintf '%s' \"${TOKEN_ENV}\"\n"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(path)
    }

    async fn checkout(&self) -> Result<Artifact, StageError> {
        let token = self
            .secrets
            .resolve(&self.config.token_secret, &self.config.token_key)?;

        let dest = self
            .workdir
            .join(format!("{}-{}", self.config.repo, self.config.branch));
        if dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }

        let askpass = self.write_askpass()?;
        let status = Command::new("git")
            .args(["clone", "--depth", "1", "--branch", &self.config.branch])
            .arg(self.clone_url())
            .arg(&dest)
            .env("GIT_ASKPASS", &askpass)
            .env(TOKEN_ENV, &token)
            .env("GIT_TERMINAL_PROMPT", "0")
            .status()
            .await;
        let _ = std::fs::remove_file(&askpass);
        let status = status?;
        if !status.success() {
            return Err(StageError::Fetch(format!(
                "git clone of {} ({}) exited with {status}",
                self.clone_url(),
                self.config.branch
            )));
        }

        let output = Command::new("git")
            .arg("-C")
            .arg(&dest)
            .args(["rev-parse", "HEAD"])
            .output()
            .await?;
        if !output.status.success() {
            return Err(StageError::Fetch(
                "could not resolve the checked-out revision".to_string(),
            ));
        }
        let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();

        info!(
            source = %self.clone_url(),
            branch = %self.config.branch,
            %revision,
            "source checked out"
        );
        Ok(Artifact::new("source", dest, revision))
    }
}

impl<S: SecretResolver> Stage for SourceStage<S> {
    fn name(&self) -> &'static str {
        "source"
    }

    fn run<'a>(&'a self, _input: Option<&'a Artifact>) -> StageFuture<'a> {
        Box::pin(self.checkout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SourceConfig {
        SourceConfig {
            owner: "acme".to_string(),
            repo: "storefront-backend".to_string(),
            branch: "main".to_string(),
            token_secret: "scm-access-token".to_string(),
            token_key: "token".to_string(),
        }
    }

    #[test]
    fn env_var_name_is_upper_snake() {
        assert_eq!(
            env_var_name("scm-access-token", "token"),
            "SCM_ACCESS_TOKEN_TOKEN"
        );
        assert_eq!(env_var_name("a.b", "c/d"), "A_B_C_D");
    }

    #[test]
    fn env_secrets_resolves_and_reports_missing() {
        // Set/remove are process-global; the var name is test-unique.
        unsafe { std::env::set_var("GANTRY_TEST_SECRET_TOKEN", "s3cr3t") };
        let token = EnvSecrets.resolve("gantry-test-secret", "token").unwrap();
        assert_eq!(token, "s3cr3t");
        unsafe { std::env::remove_var("GANTRY_TEST_SECRET_TOKEN") };

        let err = EnvSecrets
            .resolve("gantry-test-secret", "token")
            .unwrap_err();
        assert!(matches!(err, StageError::SecretUnavailable { .. }));
    }

    #[test]
    fn clone_url_is_token_free() {
        let dir = tempfile::tempdir().unwrap();
        let stage = SourceStage::new(config(), EnvSecrets, dir.path());
        assert_eq!(
            stage.clone_url(),
            "https://github.com/acme/storefront-backend.git"
        );
    }

    #[test]
    fn askpass_helper_holds_no_secret() {
        let dir = tempfile::tempdir().unwrap();
        let stage = SourceStage::new(config(), EnvSecrets, dir.path());

        let path = stage.write_askpass().unwrap();
        let script = std::fs::read_to_string(&path).unwrap();
        // The helper defers to the git process's environment.
        assert!(script.contains(TOKEN_ENV));
        assert!(script.starts_with("#!/bin/sh"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn missing_secret_fails_before_any_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.token_secret = "gantry-absent-secret".to_string();
        let stage = SourceStage::new(config, EnvSecrets, dir.path());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt.block_on(stage.checkout()).unwrap_err();
        assert!(matches!(err, StageError::SecretUnavailable { .. }));
        // No checkout directory was created.
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
