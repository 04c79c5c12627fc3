//! Cache warmup.
//!
//! Warming pre-populates the cache with placeholder entries for files that
//! are likely to be analyzed soon: everything matching a glob pattern, files
//! changed since the last commit, and declared dependencies. A placeholder
//! marks a file as known; it never replaces a real analysis result that is
//! already cached.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSetBuilder};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{generate_key, ResultCache};
use crate::errors::{DispatchError, DispatchResult};
use crate::observability::{metric_names, MetricsCollector, NoopMetricsCollector};

/// Files above this size are skipped during warmup.
pub const MAX_WARM_FILE_BYTES: u64 = 1024 * 1024;

/// Analyzer tag attached to file placeholders.
const WARMUP_TAG: &str = "warmup";

/// Analyzer tag attached to dependency placeholders.
const DEPENDENCY_TAG: &str = "dependency";

/// Outcome counts for one warmup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmStats {
    /// Placeholder entries inserted.
    pub warmed: usize,
    /// Candidates left alone: already cached, oversized, or gone.
    pub skipped: usize,
    /// Candidates that could not be read, plus failed stages in
    /// [`CacheWarmer::warm_all`].
    pub errors: usize,
}

impl WarmStats {
    /// Folds another pass's counts into this one.
    pub fn merge(&mut self, other: WarmStats) {
        self.warmed += other.warmed;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// Pre-populates a [`ResultCache`] from the project tree.
pub struct CacheWarmer {
    cache: Arc<ResultCache>,
    root: PathBuf,
    metrics: Arc<dyn MetricsCollector>,
}

impl CacheWarmer {
    /// Creates a warmer rooted at the current directory.
    pub fn new(cache: Arc<ResultCache>) -> Self {
        Self {
            cache,
            root: PathBuf::from("."),
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Sets the project root that patterns, git commands, and manifest
    /// lookups resolve against.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Replaces the metrics collector. Intended for wiring at startup.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Warms every file under the project root matching one of `patterns`.
    ///
    /// Patterns use glob syntax and match paths relative to the root.
    /// Oversized files and files already cached are counted as skipped;
    /// unreadable files are counted as errors. Hidden directories such as
    /// `.git` are not descended into.
    pub async fn warm_from_files(&self, patterns: &[&str]) -> DispatchResult<WarmStats> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| DispatchError::Configuration {
                message: format!("invalid warmup pattern {:?}: {}", pattern, e),
            })?;
            builder.add(glob);
        }
        let matcher = builder.build().map_err(|e| DispatchError::Configuration {
            message: format!("cannot build warmup matcher: {}", e),
        })?;

        let mut stats = WarmStats::default();
        for dirent in WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
        {
            let dirent = match dirent {
                Ok(d) => d,
                Err(err) => {
                    debug!(error = %err, "walk error during warmup");
                    stats.errors += 1;
                    continue;
                }
            };
            if !dirent.file_type().is_file() {
                continue;
            }
            let rel = match dirent.path().strip_prefix(&self.root) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            if !matcher.is_match(&rel) {
                continue;
            }
            self.warm_file(dirent.path(), &rel, &mut stats).await;
        }

        self.record_warmed("files", &stats);
        info!(
            ?patterns,
            warmed = stats.warmed,
            skipped = stats.skipped,
            errors = stats.errors,
            "file warmup finished"
        );
        Ok(stats)
    }

    /// Warms every file that differs from `base_ref` according to
    /// `git diff --name-only`.
    ///
    /// Paths that no longer exist (deletions, renames) are skipped. A git
    /// failure, including running outside a repository, is returned as an
    /// error rather than folded into the stats.
    pub async fn warm_from_git_changes(&self, base_ref: &str) -> DispatchResult<WarmStats> {
        let output = Command::new("git")
            .args(["diff", "--name-only", base_ref])
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| DispatchError::Io {
                message: format!("cannot run git: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DispatchError::Io {
                message: format!("git diff failed: {}", stderr.trim()),
            });
        }

        let mut stats = WarmStats::default();
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = self.root.join(line);
            let is_file = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                stats.skipped += 1;
                continue;
            }
            self.warm_file(&path, line, &mut stats).await;
        }

        self.record_warmed("git", &stats);
        info!(
            base_ref,
            warmed = stats.warmed,
            skipped = stats.skipped,
            errors = stats.errors,
            "git change warmup finished"
        );
        Ok(stats)
    }

    /// Warms one placeholder per declared dependency.
    ///
    /// Reads `package.json` (`dependencies` and `devDependencies`) and
    /// `Cargo.toml` (`[dependencies]` and `[dev-dependencies]`) at the
    /// project root, whichever exist. A missing manifest contributes
    /// nothing; a malformed one is an error.
    pub async fn warm_from_manifest(&self) -> DispatchResult<WarmStats> {
        let mut stats = WarmStats::default();

        let package_json = self.root.join("package.json");
        if tokio::fs::try_exists(&package_json).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&package_json).await?;
            let manifest: Value =
                serde_json::from_str(&raw).map_err(|e| DispatchError::Configuration {
                    message: format!("malformed package.json: {}", e),
                })?;
            for section in ["dependencies", "devDependencies"] {
                if let Some(deps) = manifest.get(section).and_then(Value::as_object) {
                    for (name, req) in deps {
                        let version = req.as_str().unwrap_or("*");
                        self.warm_dependency("package.json", name, version, &mut stats)
                            .await;
                    }
                }
            }
        }

        let cargo_toml = self.root.join("Cargo.toml");
        if tokio::fs::try_exists(&cargo_toml).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&cargo_toml).await?;
            let manifest: toml::Value =
                toml::from_str(&raw).map_err(|e| DispatchError::Configuration {
                    message: format!("malformed Cargo.toml: {}", e),
                })?;
            for section in ["dependencies", "dev-dependencies"] {
                if let Some(deps) = manifest.get(section).and_then(toml::Value::as_table) {
                    for (name, req) in deps {
                        let version = match req {
                            toml::Value::String(v) => v.as_str(),
                            toml::Value::Table(t) => {
                                t.get("version").and_then(toml::Value::as_str).unwrap_or("*")
                            }
                            _ => "*",
                        };
                        self.warm_dependency("Cargo.toml", name, version, &mut stats)
                            .await;
                    }
                }
            }
        }

        self.record_warmed("manifest", &stats);
        info!(
            warmed = stats.warmed,
            skipped = stats.skipped,
            "manifest warmup finished"
        );
        Ok(stats)
    }

    /// Runs every warmup source and merges the results, diffing against
    /// `HEAD` for the git stage.
    ///
    /// A failed stage is logged, counted as one error, and does not stop the
    /// remaining stages.
    pub async fn warm_all(&self, patterns: &[&str]) -> WarmStats {
        let mut total = WarmStats::default();

        match self.warm_from_files(patterns).await {
            Ok(stats) => total.merge(stats),
            Err(err) => {
                warn!(error = %err, "file warmup stage failed");
                total.errors += 1;
            }
        }

        match self.warm_from_git_changes("HEAD").await {
            Ok(stats) => total.merge(stats),
            Err(err) => {
                warn!(error = %err, "git warmup stage failed");
                total.errors += 1;
            }
        }

        match self.warm_from_manifest().await {
            Ok(stats) => total.merge(stats),
            Err(err) => {
                warn!(error = %err, "manifest warmup stage failed");
                total.errors += 1;
            }
        }

        info!(
            warmed = total.warmed,
            skipped = total.skipped,
            errors = total.errors,
            "cache warmup finished"
        );
        total
    }

    async fn warm_file(&self, path: &Path, rel: &str, stats: &mut WarmStats) {
        let len = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(err) => {
                debug!(file = rel, error = %err, "cannot stat file during warmup");
                stats.errors += 1;
                return;
            }
        };
        if len > MAX_WARM_FILE_BYTES {
            debug!(file = rel, len, "skipping oversized file during warmup");
            stats.skipped += 1;
            return;
        }

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) => {
                debug!(file = rel, error = %err, "cannot read file during warmup");
                stats.errors += 1;
                return;
            }
        };

        let key = generate_key(rel, &content, WARMUP_TAG);
        if self.cache.contains(&key).await {
            stats.skipped += 1;
            return;
        }
        self.cache
            .set(&key, json!({"warmed": true}), WARMUP_TAG, rel)
            .await;
        stats.warmed += 1;
    }

    async fn warm_dependency(
        &self,
        manifest: &str,
        name: &str,
        version: &str,
        stats: &mut WarmStats,
    ) {
        let marker = format!("{}@{}", name, version);
        let key = generate_key(manifest, &marker, DEPENDENCY_TAG);
        if self.cache.contains(&key).await {
            stats.skipped += 1;
            return;
        }
        self.cache
            .set(
                &key,
                json!({"warmed": true, "package": marker}),
                DEPENDENCY_TAG,
                manifest,
            )
            .await;
        stats.warmed += 1;
    }

    fn record_warmed(&self, source: &str, stats: &WarmStats) {
        if stats.warmed > 0 {
            self.metrics.increment_counter(
                metric_names::CACHE_WARMED,
                stats.warmed as u64,
                &[("source", source)],
            );
        }
    }
}

/// Whether a walk entry is a hidden file or directory (dot-prefixed). The
/// walk root itself is never treated as hidden.
fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}
