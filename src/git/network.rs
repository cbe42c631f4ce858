//! Network operations with progress reporting
//!
//! Thin wrappers that add `--progress`, pick the matching step table and
//! forward parsed updates to the caller.

use std::path::Path;

use super::progress::{ProgressParser, ProgressUpdate, StepTable};
use super::runner::{GitOptions, GitRunner, Invocation};
use super::utils::GitError;

/// Operations whose progress can be estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOperation {
    Clone,
    Fetch,
    Pull,
    Push,
}

impl ProgressOperation {
    pub fn step_table(&self) -> StepTable {
        match self {
            ProgressOperation::Clone => StepTable::clone_steps(),
            ProgressOperation::Fetch => StepTable::fetch_steps(),
            ProgressOperation::Pull => StepTable::pull_steps(),
            ProgressOperation::Push => StepTable::push_steps(),
        }
    }

    pub fn parser(&self) -> ProgressParser {
        ProgressParser::new(self.step_table())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressOperation::Clone => "clone",
            ProgressOperation::Fetch => "fetch",
            ProgressOperation::Pull => "pull",
            ProgressOperation::Push => "push",
        }
    }
}

/// Arguments for `git clone`
pub fn clone_args(url: &str, destination: &Path, branch: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "clone".to_string(),
        "--recursive".to_string(),
        "--progress".to_string(),
    ];
    if let Some(branch) = branch {
        args.push("-b".to_string());
        args.push(branch.to_string());
    }
    args.push("--".to_string());
    args.push(url.to_string());
    args.push(destination.to_string_lossy().into_owned());
    args
}

/// Arguments for `git fetch`
pub fn fetch_args(remote: &str) -> Vec<String> {
    vec![
        "fetch".to_string(),
        "--progress".to_string(),
        "--prune".to_string(),
        remote.to_string(),
    ]
}

/// Arguments for `git pull`
pub fn pull_args(remote: &str, branch: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "pull".to_string(),
        "--no-rebase".to_string(),
        "--recurse-submodules".to_string(),
        "--progress".to_string(),
        remote.to_string(),
    ];
    if let Some(branch) = branch {
        args.push(branch.to_string());
    }
    args
}

/// Arguments for `git push`
pub fn push_args(
    remote: &str,
    local_branch: &str,
    remote_branch: Option<&str>,
    set_upstream: bool,
) -> Vec<String> {
    let mut args = vec!["push".to_string(), "--progress".to_string()];
    if set_upstream {
        args.push("--set-upstream".to_string());
    }
    args.push(remote.to_string());
    args.push(match remote_branch {
        Some(target) => format!("{}:{}", local_branch, target),
        None => local_branch.to_string(),
    });
    args
}

async fn run_network<F>(
    runner: &GitRunner,
    kind: ProgressOperation,
    invocation: Invocation,
    on_progress: F,
) -> Result<(), GitError>
where
    F: FnMut(&ProgressUpdate) + Send,
{
    runner
        .run_with_progress(&invocation, kind.parser(), on_progress)
        .await
        .map(|_| ())
}

/// Clone `url` into `destination`; runs from the destination's parent
pub async fn clone<F>(
    runner: &GitRunner,
    url: &str,
    destination: &Path,
    branch: Option<&str>,
    options: GitOptions,
    on_progress: F,
) -> Result<(), GitError>
where
    F: FnMut(&ProgressUpdate) + Send,
{
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let invocation = Invocation::new(clone_args(url, destination, branch), parent, "clone")
        .with_options(options);
    run_network(runner, ProgressOperation::Clone, invocation, on_progress).await
}

pub async fn fetch<F>(
    runner: &GitRunner,
    repository: &Path,
    remote: &str,
    options: GitOptions,
    on_progress: F,
) -> Result<(), GitError>
where
    F: FnMut(&ProgressUpdate) + Send,
{
    let invocation = Invocation::new(fetch_args(remote), repository, "fetchRemote")
        .with_options(options);
    run_network(runner, ProgressOperation::Fetch, invocation, on_progress).await
}

pub async fn pull<F>(
    runner: &GitRunner,
    repository: &Path,
    remote: &str,
    branch: Option<&str>,
    options: GitOptions,
    on_progress: F,
) -> Result<(), GitError>
where
    F: FnMut(&ProgressUpdate) + Send,
{
    let invocation =
        Invocation::new(pull_args(remote, branch), repository, "pull").with_options(options);
    run_network(runner, ProgressOperation::Pull, invocation, on_progress).await
}

#[allow(clippy::too_many_arguments)]
pub async fn push<F>(
    runner: &GitRunner,
    repository: &Path,
    remote: &str,
    local_branch: &str,
    remote_branch: Option<&str>,
    set_upstream: bool,
    options: GitOptions,
    on_progress: F,
) -> Result<(), GitError>
where
    F: FnMut(&ProgressUpdate) + Send,
{
    let invocation = Invocation::new(
        push_args(remote, local_branch, remote_branch, set_upstream),
        repository,
        "push",
    )
    .with_options(options);
    run_network(runner, ProgressOperation::Push, invocation, on_progress).await
}
