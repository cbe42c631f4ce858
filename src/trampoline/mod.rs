// Trampoline - routes git credential prompts back into TidyFlow
//
// git is spawned with GIT_ASKPASS (and optionally SSH_ASKPASS / a credential
// helper) pointing at the `tidyflow-askpass` helper. The helper connects to a
// localhost listener owned by the core and forwards its arguments, its
// TIDYFLOW_* variables and its stdin. The token in those variables selects the
// invocation the request belongs to.
//
// - protocol: wire format and credential protocol parsing
// - registry: live sessions keyed by token, per-directory locks
// - server: listener and the host-facing TrampolineHandler trait
// - environment: scoped per-invocation environments (TrampolineProvider)

pub mod environment;
pub mod protocol;
pub mod registry;
pub mod server;

pub use environment::{TrampolineEnv, TrampolineProvider};
pub use protocol::{CredentialAction, CredentialFields, TrampolineCommand, TrampolineRequest};
pub use registry::{SessionGuard, TrampolineRegistry, TrampolineSession};
pub use server::{TrampolineHandler, TrampolineServer};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrampolineError {
    #[error("Failed to bind trampoline listener: {0}")]
    Bind(String),
    #[error("Malformed trampoline message: {0}")]
    Malformed(String),
    #[error("Trampoline IO error: {0}")]
    Io(#[from] std::io::Error),
}
