//! Revision ranges and patch generation

use std::path::Path;

use super::runner::{GitRunner, Invocation};
use super::utils::GitError;

/// `<base>..<head>`: commits reachable from `head` but not from `base`
pub fn rev_range(base: &str, head: &str) -> String {
    format!("{}..{}", base, head)
}

/// `<base>...<head>`: commits reachable from either side but not both.
///
/// Only used where merge-base semantics are explicitly wanted; never
/// substituted for [`rev_range`].
pub fn rev_symmetric_difference(base: &str, head: &str) -> String {
    format!("{}...{}", base, head)
}

/// Arguments for a patch covering `base..head`
pub fn format_patch_args(base: &str, head: &str) -> Vec<String> {
    vec![
        "format-patch".to_string(),
        "--unified=1".to_string(),
        "--minimal".to_string(),
        "--stdout".to_string(),
        rev_range(base, head),
    ]
}

/// Generate a patch for `base..head` and return git's stdout verbatim
pub async fn format_patch(
    runner: &GitRunner,
    repository: &Path,
    base: &str,
    head: &str,
) -> Result<String, GitError> {
    let invocation = Invocation::new(format_patch_args(base, head), repository, "formatPatch");
    let output = runner.run(&invocation).await?;
    Ok(output.stdout_text().into_owned())
}
