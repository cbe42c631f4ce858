//! TidyFlow git layer
//!
//! Runs the git CLI on behalf of the app: scoped trampoline environments for
//! credential prompts, progress estimation for network operations, plus the
//! small byte and revision helpers built on top.

pub mod config;
pub mod git;
pub mod trampoline;
pub mod util;
