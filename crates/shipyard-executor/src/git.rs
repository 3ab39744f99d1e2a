//! Git source provider backed by the `git` command line.

use async_trait::async_trait;
use chrono::Utc;
use shipyard_core::secret::SecretStore;
use shipyard_core::source::{SourceManifest, SourceProvider};
use shipyard_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const LS_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolves branch heads of one remote repository.
pub struct GitSource {
    repository: String,
    secrets: Arc<dyn SecretStore>,
    /// Secret path of an access token for https remotes.
    token_secret: Option<String>,
}

impl GitSource {
    pub fn new(repository: impl Into<String>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            repository: repository.into(),
            secrets,
            token_secret: None,
        }
    }

    pub fn with_token_secret(mut self, path: impl Into<String>) -> Self {
        self.token_secret = Some(path.into());
        self
    }

    async fn remote_url(&self) -> Result<(String, Option<String>)> {
        let Some(path) = &self.token_secret else {
            return Ok((self.repository.clone(), None));
        };
        let token = self.secrets.get(path).await?;
        let url = match self.repository.strip_prefix("https://") {
            Some(rest) => format!("https://{}@{}", token, rest),
            None => self.repository.clone(),
        };
        Ok((url, Some(token)))
    }

    /// Head commit of `branch` on the remote.
    async fn branch_head(&self, branch: &str) -> Result<String> {
        let (url, token) = self.remote_url().await?;
        let redact = |text: &str| match &token {
            Some(t) if !t.is_empty() => text.replace(t.as_str(), "***"),
            _ => text.to_string(),
        };

        let refname = format!("refs/heads/{}", branch);
        debug!(repository = %self.repository, %refname, "Listing remote ref");

        let output = tokio::time::timeout(
            LS_REMOTE_TIMEOUT,
            Command::new("git")
                .args(["ls-remote", "--heads", &url, &refname])
                .env("GIT_TERMINAL_PROMPT", "0")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::Source(format!("git ls-remote timed out for {}", self.repository)))?
        .map_err(|e| Error::Source(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Source(redact(stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ls_remote(&stdout, &refname).ok_or_else(|| {
            Error::Source(format!(
                "branch {} not found in {}",
                branch, self.repository
            ))
        })
    }
}

/// Find the SHA for `refname` in `git ls-remote` output.
fn parse_ls_remote(output: &str, refname: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (sha, name) = line.split_once('\t')?;
        (name.trim() == refname && !sha.is_empty()).then(|| sha.to_string())
    })
}

#[async_trait]
impl SourceProvider for GitSource {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn resolve(&self, branch: &str, revision: Option<&str>) -> Result<SourceManifest> {
        // The branch must exist even when the trigger already names a commit.
        let head = self.branch_head(branch).await?;
        let revision = revision.map(str::to_string).unwrap_or(head);
        info!(repository = %self.repository, branch, revision = %revision, "Resolved source");

        Ok(SourceManifest {
            repository: self.repository.clone(),
            branch: branch.to_string(),
            revision,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::secret::StaticSecretStore;

    const LS_REMOTE: &str = "\
1111111111111111111111111111111111111111\trefs/heads/main-old
9fceb02d0ae598e95dc970b74767f19372d61af8\trefs/heads/main
";

    #[test]
    fn test_parse_ls_remote() {
        assert_eq!(
            parse_ls_remote(LS_REMOTE, "refs/heads/main").as_deref(),
            Some("9fceb02d0ae598e95dc970b74767f19372d61af8")
        );
        assert!(parse_ls_remote(LS_REMOTE, "refs/heads/dev").is_none());
        assert!(parse_ls_remote("", "refs/heads/main").is_none());
    }

    #[tokio::test]
    async fn test_remote_url_embeds_token() {
        let secrets = Arc::new(StaticSecretStore::new().with("github/token", "s3cret"));
        let source = GitSource::new("https://github.com/owner/repo.git", secrets.clone())
            .with_token_secret("github/token");
        let (url, token) = source.remote_url().await.unwrap();
        assert_eq!(url, "https://s3cret@github.com/owner/repo.git");
        assert_eq!(token.as_deref(), Some("s3cret"));

        let public = GitSource::new("https://github.com/owner/repo.git", secrets);
        let (url, token) = public.remote_url().await.unwrap();
        assert_eq!(url, "https://github.com/owner/repo.git");
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn test_missing_token_secret() {
        let source = GitSource::new(
            "https://github.com/owner/repo.git",
            Arc::new(StaticSecretStore::new()),
        )
        .with_token_secret("github/token");
        assert!(matches!(
            source.resolve("main", None).await,
            Err(Error::NotFound(_))
        ));
    }
}
