//! Build MCP server images from git or local sources.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    gridctl_config::{McpServerSpec, SourceKind},
    sha2::{Digest, Sha256},
    tokio::{process::Command, sync::Mutex},
    tracing::{debug, info},
};

use crate::{labels::container_name, runtime::ContainerRuntime, types::BuildSpec};

/// Stable cache key for a source location: 16 hex chars of its SHA-256.
pub fn cache_key(location: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(location.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Root of the source checkout cache: `<home>/cache/repos`.
pub fn repos_cache_dir() -> PathBuf {
    gridctl_config::cache_dir().join("repos")
}

/// Working-tree path for `url` under an explicit cache root.
pub fn cache_path_in(root: &Path, url: &str) -> PathBuf {
    root.join(cache_key(url))
}

/// Working-tree path for `url` under the default cache root.
pub fn cache_path_for(url: &str) -> PathBuf {
    cache_path_in(&repos_cache_dir(), url)
}

/// Tag given to an image built for a topology's server.
pub fn image_tag_for(topology: &str, server: &str) -> String {
    format!("{}:latest", container_name(topology, server))
}

/// Remove every cached checkout. Returns whether anything was removed.
pub fn clean_cache_in(root: &Path) -> std::io::Result<bool> {
    match std::fs::remove_dir_all(root) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Produces a runnable image for a source-based server.
#[async_trait]
pub trait SourceBuilder: Send + Sync {
    /// Build (or rebuild) the server's image and return its reference.
    async fn build(
        &self,
        runtime: &dyn ContainerRuntime,
        topology: &str,
        server: &McpServerSpec,
    ) -> anyhow::Result<String>;
}

/// Default builder: git sources are cloned into (or refreshed in) the cache,
/// local sources build straight from their resolved path.
pub struct GitSourceBuilder {
    cache_root: PathBuf,
    git: String,
    /// Serializes work on one working tree when servers share a source.
    checkouts: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Default for GitSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GitSourceBuilder {
    pub fn new() -> Self {
        Self::with_cache_root(repos_cache_dir())
    }

    pub fn with_cache_root(cache_root: PathBuf) -> Self {
        Self {
            cache_root,
            git: "git".into(),
            checkouts: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    async fn checkout_lock(&self, dir: &Path) -> Arc<Mutex<()>> {
        Arc::clone(
            self.checkouts
                .lock()
                .await
                .entry(dir.to_path_buf())
                .or_default(),
        )
    }

    /// Check out `git_ref` of `url` in its cache working tree, cloning on
    /// first use. Branches, tags and commit ids all resolve through
    /// `FETCH_HEAD`, so a warm tree follows the remote ref.
    async fn sync_repo(&self, url: &str, git_ref: &str) -> anyhow::Result<PathBuf> {
        let dir = cache_path_in(&self.cache_root, url);
        let lock = self.checkout_lock(&dir).await;
        let _guard = lock.lock().await;

        if dir.join(".git").is_dir() {
            debug!(url, git_ref, dir = %dir.display(), "refreshing cached checkout");
        } else {
            info!(url, git_ref, dir = %dir.display(), "cloning source");
            tokio::fs::create_dir_all(&self.cache_root)
                .await
                .with_context(|| format!("creating {}", self.cache_root.display()))?;
            let target = dir.display().to_string();
            self.git(&self.cache_root, &["clone", "--no-checkout", url, &target])
                .await?;
        }
        self.git(&dir, &["fetch", "origin", git_ref]).await?;
        self.git(&dir, &["checkout", "--force", "--detach", "FETCH_HEAD"])
            .await?;
        Ok(dir)
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> anyhow::Result<()> {
        let output = Command::new(&self.git)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("running git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl SourceBuilder for GitSourceBuilder {
    async fn build(
        &self,
        runtime: &dyn ContainerRuntime,
        topology: &str,
        server: &McpServerSpec,
    ) -> anyhow::Result<String> {
        let Some(source) = server.source.as_ref() else {
            bail!("server '{}' has no source to build", server.name);
        };

        let context = match source.kind().map_err(anyhow::Error::msg)? {
            SourceKind::Git => self.sync_repo(&source.url, &source.git_ref).await?,
            SourceKind::Local => PathBuf::from(&source.path),
        };

        let tag = image_tag_for(topology, &server.name);
        let spec = BuildSpec {
            context,
            dockerfile: source.dockerfile.clone(),
            tag: tag.clone(),
            build_args: server.build_args.clone(),
        };
        info!(
            topology,
            server = %server.name,
            image = %tag,
            context = %spec.context.display(),
            "building image"
        );
        runtime
            .build_image(&spec)
            .await
            .with_context(|| format!("building image for '{}'", server.name))?;
        Ok(tag)
    }
}
