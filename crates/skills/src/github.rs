//! GitHub source-control client: repository URL parsing and zipball download.

use std::time::Duration;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

/// A repository location, optionally narrowed to a subdirectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Subdirectory inside the repository, `/`-delimited, no leading slash.
    pub path: Option<String>,
}

impl RepoInfo {
    /// Canonical `https://github.com/{owner}/{repo}` URL.
    pub fn repository_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("invalid GitHub URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("repository {owner}/{repo} (branch {branch}) not found")]
    NotFound {
        owner: String,
        repo: String,
        branch: String,
    },
    #[error("GitHub returned HTTP {status} for {owner}/{repo}")]
    Status {
        status: u16,
        owner: String,
        repo: String,
    },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("archive exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

impl GitHubError {
    fn invalid_url(url: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Source-control host consumed by the GitHub import flow.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Resolve a repository URL. `branch` overrides any branch in the URL.
    fn parse_repo_url(&self, url: &str, branch: Option<&str>) -> Result<RepoInfo, GitHubError>;

    /// Fetch the archive of the repository at `info.branch`.
    async fn download_archive(&self, info: &RepoInfo) -> Result<Vec<u8>, GitHubError>;
}

#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    pub api_base: String,
    pub user_agent: String,
    pub token: Option<Secret<String>>,
    pub timeout: Duration,
    pub default_branch: String,
    pub max_archive_bytes: u64,
}

impl Default for GitHubClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
            user_agent: "skillport-skill-importer".into(),
            token: None,
            timeout: Duration::from_secs(60),
            default_branch: "main".into(),
            max_archive_bytes: 50 * 1024 * 1024,
        }
    }
}

pub struct GitHubClient {
    http: reqwest::Client,
    config: GitHubClientConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubClientConfig) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn zipball_url(&self, info: &RepoInfo) -> String {
        format!(
            "{}/repos/{}/{}/zipball/{}",
            self.config.api_base.trim_end_matches('/'),
            info.owner,
            info.repo,
            info.branch
        )
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    fn parse_repo_url(&self, url: &str, branch: Option<&str>) -> Result<RepoInfo, GitHubError> {
        parse_repo_url(url, branch, &self.config.default_branch)
    }

    async fn download_archive(&self, info: &RepoInfo) -> Result<Vec<u8>, GitHubError> {
        let url = self.zipball_url(info);
        debug!(%url, "downloading repository archive");

        let mut request = self.http.get(&url);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token.expose_secret());
        }
        let mut resp = request.send().await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GitHubError::NotFound {
                owner: info.owner.clone(),
                repo: info.repo.clone(),
                branch: info.branch.clone(),
            });
        }
        if !status.is_success() {
            return Err(GitHubError::Status {
                status: status.as_u16(),
                owner: info.owner.clone(),
                repo: info.repo.clone(),
            });
        }

        let limit = self.config.max_archive_bytes;
        if resp.content_length().is_some_and(|len| len > limit) {
            return Err(GitHubError::TooLarge { limit });
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > limit {
                return Err(GitHubError::TooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }
        debug!(size = bytes.len(), owner = %info.owner, repo = %info.repo, "downloaded archive");
        Ok(bytes)
    }
}

/// Parse `owner/repo`, `github.com/owner/repo`, `https://github.com/owner/repo`
/// (with optional `.git` or trailing slash) and
/// `https://github.com/owner/repo/tree/<branch>/<path...>`.
pub fn parse_repo_url(
    url: &str,
    branch: Option<&str>,
    default_branch: &str,
) -> Result<RepoInfo, GitHubError> {
    let trimmed = url.trim();
    let without_query = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    let rest = match without_query.split_once("://") {
        Some((scheme, rest)) => {
            if !matches!(scheme, "https" | "http") {
                return Err(GitHubError::invalid_url(url, "unsupported scheme"));
            }
            rest.strip_prefix("www.")
                .unwrap_or(rest)
                .strip_prefix("github.com/")
                .ok_or_else(|| GitHubError::invalid_url(url, "not a github.com URL"))?
        },
        None => without_query
            .strip_prefix("www.")
            .unwrap_or(without_query)
            .strip_prefix("github.com/")
            .unwrap_or(without_query),
    };

    let segments: Vec<&str> = rest.split('/').collect();
    let (owner, repo) = match segments.as_slice() {
        [owner, repo, ..] => (*owner, repo.trim_end_matches(".git")),
        _ => return Err(GitHubError::invalid_url(url, "expected owner/repo")),
    };
    if !is_valid_name(owner) || !is_valid_name(repo) {
        return Err(GitHubError::invalid_url(url, "expected owner/repo"));
    }

    let (url_branch, path) = match &segments[2..] {
        [] => (None, None),
        ["tree" | "blob", branch, path @ ..] if !branch.is_empty() => {
            let path = path
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>();
            if path.iter().any(|s| *s == "." || *s == "..") {
                return Err(GitHubError::invalid_url(url, "path must not contain '..'"));
            }
            let path = (!path.is_empty()).then(|| path.join("/"));
            (Some(*branch), path)
        },
        _ => return Err(GitHubError::invalid_url(url, "unrecognized repository path")),
    };

    let branch = branch
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .or(url_branch)
        .unwrap_or(default_branch)
        .to_string();

    Ok(RepoInfo {
        owner: owner.to_string(),
        repo: repo.to_string(),
        branch,
        path,
    })
}

fn is_valid_name(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(url: &str) -> Result<RepoInfo, GitHubError> {
        parse_repo_url(url, None, "main")
    }

    #[test]
    fn parses_shorthand_and_full_urls() {
        for url in [
            "lobehub/skills",
            "github.com/lobehub/skills",
            "https://github.com/lobehub/skills",
            "https://github.com/lobehub/skills/",
            "https://github.com/lobehub/skills.git",
            "https://www.github.com/lobehub/skills?tab=readme",
        ] {
            let info = parse(url).unwrap();
            assert_eq!(info, RepoInfo {
                owner: "lobehub".into(),
                repo: "skills".into(),
                branch: "main".into(),
                path: None,
            });
        }
    }

    #[test]
    fn tree_url_yields_branch_and_subdirectory() {
        let info = parse("https://github.com/o/r/tree/dev/a/b").unwrap();
        assert_eq!(info.branch, "dev");
        assert_eq!(info.path.as_deref(), Some("a/b"));
        assert_eq!(info.repository_url(), "https://github.com/o/r");
    }

    #[test]
    fn explicit_branch_overrides_url_branch() {
        let info = parse_repo_url("https://github.com/o/r/tree/dev/a", Some("release"), "main")
            .unwrap();
        assert_eq!(info.branch, "release");
        assert_eq!(info.path.as_deref(), Some("a"));

        let info = parse_repo_url("o/r", None, "trunk").unwrap();
        assert_eq!(info.branch, "trunk");
    }

    #[test]
    fn rejects_malformed_urls() {
        for url in [
            "",
            "noslash",
            "/repo",
            "owner/",
            "https://gitlab.com/o/r",
            "ftp://github.com/o/r",
            "https://github.com/o/r/issues/1",
            "https://github.com/o/r/tree/main/../x",
            "o w/r",
        ] {
            assert!(
                matches!(parse(url), Err(GitHubError::InvalidUrl { .. })),
                "{url:?} should be rejected"
            );
        }
    }

    fn client(base: String, token: Option<&str>, max: u64) -> GitHubClient {
        GitHubClient::new(GitHubClientConfig {
            api_base: base,
            token: token.map(|t| Secret::new(t.to_string())),
            max_archive_bytes: max,
            ..GitHubClientConfig::default()
        })
        .unwrap()
    }

    fn repo(branch: &str) -> RepoInfo {
        RepoInfo {
            owner: "o".into(),
            repo: "r".into(),
            branch: branch.into(),
            path: None,
        }
    }

    #[tokio::test]
    async fn download_returns_zipball_bytes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/o/r/zipball/main")
            .match_header("authorization", "Bearer t0ken")
            .with_status(200)
            .with_body(b"PK\x03\x04zip")
            .create_async()
            .await;

        let bytes = client(server.url(), Some("t0ken"), 1024)
            .download_archive(&repo("main"))
            .await
            .unwrap();
        assert_eq!(bytes, b"PK\x03\x04zip");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn download_maps_404_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/repos/o/r/zipball/gone")
            .with_status(404)
            .create_async()
            .await;

        let err = client(server.url(), None, 1024)
            .download_archive(&repo("gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, GitHubError::NotFound { .. }));
    }

    #[tokio::test]
    async fn download_maps_other_statuses() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/repos/o/r/zipball/main")
            .with_status(500)
            .create_async()
            .await;

        let err = client(server.url(), None, 1024)
            .download_archive(&repo("main"))
            .await
            .unwrap_err();
        assert!(matches!(err, GitHubError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn download_enforces_size_limit() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/repos/o/r/zipball/main")
            .with_status(200)
            .with_body(vec![0u8; 64])
            .create_async()
            .await;

        let err = client(server.url(), None, 16)
            .download_archive(&repo("main"))
            .await
            .unwrap_err();
        assert!(matches!(err, GitHubError::TooLarge { limit: 16 }));
    }
}
