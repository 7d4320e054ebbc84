//! Extra repository enabling (COPR projects, OBS repositories).

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::categorizer::InstallBucket;
use crate::command_runner::{CommandRunner, StepRange};
use crate::distro::DistroBackend;
use crate::error::{InstallError, Result};

/// Enables each extra repository at most once per run.
pub struct RepositoryEnabler<'a> {
    runner: &'a CommandRunner,
    backend: &'a dyn DistroBackend,
    seen: BTreeSet<String>,
}

impl<'a> RepositoryEnabler<'a> {
    pub fn new(runner: &'a CommandRunner, backend: &'a dyn DistroBackend) -> Self {
        Self {
            runner,
            backend,
            seen: BTreeSet::new(),
        }
    }

    pub fn is_enabled(&self, repo: &str) -> bool {
        self.seen.contains(repo)
    }

    /// Repository identities referenced by `bucket`, first occurrence order
    pub fn pending(&self, bucket: &InstallBucket) -> Vec<String> {
        let mut repos: Vec<String> = Vec::new();
        for repo in bucket.entries().iter().filter_map(|e| e.source.repo()) {
            if repo.is_empty() || self.is_enabled(repo) || repos.iter().any(|r| r == repo) {
                continue;
            }
            repos.push(repo.to_string());
        }
        repos
    }

    /// Enable every repository `bucket` needs, spreading progress over `range`.
    /// Returns the number of repositories newly enabled.
    pub fn enable_all(&mut self, bucket: &InstallBucket, range: &StepRange) -> Result<usize> {
        let repos = self.pending(bucket);
        for (i, repo) in repos.iter().enumerate() {
            self.enable(repo, &range.split(i, repos.len()))?;
        }
        Ok(repos.len())
    }

    /// Enable one repository and run its post-enable action. Returns `false`
    /// if it was already enabled in this run.
    pub fn enable(&mut self, repo: &str, range: &StepRange) -> Result<bool> {
        if repo.is_empty() {
            return Ok(false);
        }
        if self.is_enabled(repo) {
            debug!(repo, "repository already enabled in this run");
            return Ok(false);
        }

        let wrap = |source: InstallError| InstallError::RepositoryEnable {
            repo: repo.to_string(),
            source: Box::new(source),
        };

        info!(repo, "enabling repository");
        let command = self.backend.enable_repository_command(repo).map_err(wrap)?;
        let post = self.backend.post_enable_action(repo);

        let (enable_range, post_range) = if post.is_some() {
            (range.split(0, 2), range.split(1, 2))
        } else {
            (range.clone(), range.clone())
        };

        self.runner
            .run(&command, &enable_range.with_step(format!("Enabling {}", repo)))
            .map_err(wrap)?;
        self.seen.insert(repo.to_string());

        if let Some(action) = post {
            debug!(repo, "running post-enable action");
            self.runner
                .run(&action, &post_range.with_step(format!("Configuring {}", repo)))
                .map_err(wrap)?;
        }
        Ok(true)
    }
}
