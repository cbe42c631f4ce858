// Git module - process execution and output interpretation
//
// This module is split into logical submodules:
// - utils: Error types, output types, redaction and stderr classification
// - runner: Spawning git with a trampoline environment (GitRunner)
// - timing: Timing collaborator wrapped around every invocation
// - progress: Step tables and the progress parser
// - split: Delimiter-based splitting of raw output
// - range: Revision ranges and format-patch
// - network: clone / fetch / pull / push with progress

pub mod network;
pub mod progress;
pub mod range;
pub mod runner;
pub mod split;
pub mod timing;
pub mod utils;

pub use progress::{ProgressParser, ProgressState, ProgressStep, ProgressUpdate, StepTable};
pub use range::{format_patch, rev_range, rev_symmetric_difference};
pub use runner::{GitOptions, GitRunner, Invocation};
pub use split::{split_buffer, ByteRange, SplitError};
pub use timing::{measure, TimingCollector, TracingTimer};
pub use utils::*;
