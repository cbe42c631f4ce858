//! Per-invocation environment that routes git's credential prompts back to
//! the host application

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{FeatureFlags, GitConfig, TrampolineSection};

use super::protocol::{HOST_ENV, PORT_ENV, TOKEN_ENV};
use super::registry::{TrampolineRegistry, TrampolineSession};
use super::server::{TrampolineHandler, TrampolineServer};
use super::TrampolineError;

/// Environment handed to the scoped action
#[derive(Debug, Clone)]
pub struct TrampolineEnv {
    vars: HashMap<String, String>,
    session: Option<Arc<TrampolineSession>>,
}

impl TrampolineEnv {
    /// Variables to overlay on the spawned process's environment
    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn into_vars(self) -> HashMap<String, String> {
        self.vars
    }

    /// `None` in degraded mode
    pub fn session(&self) -> Option<&Arc<TrampolineSession>> {
        self.session.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token())
    }

    pub fn is_intercepting(&self) -> bool {
        self.session.is_some()
    }

    /// Environment with credential interception switched off: git neither
    /// prompts on a terminal nor calls any askpass program.
    pub fn degraded(extra_env: &HashMap<String, String>) -> Self {
        let mut vars = extra_env.clone();
        vars.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
        vars.insert("GIT_ASKPASS".to_string(), String::new());
        vars.insert("SSH_ASKPASS".to_string(), String::new());
        vars.remove(TOKEN_ENV);
        vars.remove(PORT_ENV);
        vars.remove(HOST_ENV);
        Self {
            vars,
            session: None,
        }
    }
}

/// Hands out scoped trampoline environments
///
/// The listener is started lazily on first use and shared by every
/// invocation; sessions are per invocation.
pub struct TrampolineProvider {
    settings: TrampolineSection,
    features: FeatureFlags,
    handler: Option<Arc<dyn TrampolineHandler>>,
    registry: Arc<TrampolineRegistry>,
    server: Mutex<Option<Arc<TrampolineServer>>>,
}

impl TrampolineProvider {
    pub fn new(config: &GitConfig, handler: Arc<dyn TrampolineHandler>) -> Self {
        Self {
            settings: config.trampoline.clone(),
            features: config.features.clone(),
            handler: Some(handler),
            registry: TrampolineRegistry::new(),
            server: Mutex::new(None),
        }
    }

    /// Provider that always runs actions with interception disabled
    pub fn disabled() -> Self {
        Self {
            settings: TrampolineSection {
                enabled: false,
                ..Default::default()
            },
            features: FeatureFlags::default(),
            handler: None,
            registry: TrampolineRegistry::new(),
            server: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<TrampolineRegistry> {
        &self.registry
    }

    async fn ensure_server(
        &self,
        handler: &Arc<dyn TrampolineHandler>,
    ) -> Result<Arc<TrampolineServer>, TrampolineError> {
        let mut server = self.server.lock().await;
        if let Some(running) = server.as_ref() {
            return Ok(running.clone());
        }
        // A failed bind is retried on the next invocation
        let started = Arc::new(
            TrampolineServer::start(
                &self.settings.bind_address,
                self.registry.clone(),
                handler.clone(),
            )
            .await?,
        );
        *server = Some(started.clone());
        Ok(started)
    }

    /// Run `action` with an environment whose credential prompts reach the
    /// host's [`TrampolineHandler`].
    ///
    /// Trampoline variables win over `extra_env`. The session is released when
    /// this future completes or is dropped. If the callback channel cannot be
    /// set up, `action` still runs, with interception disabled.
    pub async fn with_trampoline_env<T, F, Fut>(
        &self,
        working_dir: &Path,
        is_background_task: bool,
        extra_env: &HashMap<String, String>,
        action: F,
    ) -> T
    where
        F: FnOnce(TrampolineEnv) -> Fut,
        Fut: Future<Output = T>,
    {
        let handler = match (&self.handler, self.settings.enabled) {
            (Some(handler), true) => handler.clone(),
            _ => {
                debug!("trampoline disabled, running without credential interception");
                return action(TrampolineEnv::degraded(extra_env)).await;
            }
        };

        let server = match self.ensure_server(&handler).await {
            Ok(server) => server,
            Err(e) => {
                warn!(error = %e, "trampoline unavailable, continuing without credential interception");
                return action(TrampolineEnv::degraded(extra_env)).await;
            }
        };

        let _directory_guard = if handler.is_reentrant() {
            None
        } else {
            Some(self.registry.directory_lock(working_dir).lock_owned().await)
        };

        let session = self.registry.register(working_dir, is_background_task);
        let env = TrampolineEnv {
            vars: self.build_vars(extra_env, server.addr(), session.session().token()),
            session: Some(session.session().clone()),
        };

        let result = action(env).await;
        drop(session);
        result
    }

    fn build_vars(
        &self,
        extra_env: &HashMap<String, String>,
        listener: SocketAddr,
        token: &str,
    ) -> HashMap<String, String> {
        let helper = helper_path_string(&self.settings.helper_path);
        let mut vars = extra_env.clone();

        let mut set = |k: &str, v: String| {
            vars.insert(k.to_string(), v);
        };
        set("GIT_TERMINAL_PROMPT", "0".to_string());
        set("GIT_ASKPASS", helper.clone());
        set(HOST_ENV, callback_host(listener.ip()).to_string());
        set(PORT_ENV, listener.port().to_string());
        set(TOKEN_ENV, token.to_string());

        if self.features.ssh_askpass {
            set("SSH_ASKPASS", helper.clone());
            set("SSH_ASKPASS_REQUIRE", "force".to_string());
        } else {
            set("SSH_ASKPASS", String::new());
        }

        if self.features.credential_helper {
            // Appended after the caller's GIT_CONFIG_* entries: reset any
            // configured helpers, then install ours
            let base = extra_env
                .get("GIT_CONFIG_COUNT")
                .and_then(|n| n.trim().parse::<usize>().ok())
                .unwrap_or(0);
            set(&format!("GIT_CONFIG_KEY_{}", base), "credential.helper".to_string());
            set(&format!("GIT_CONFIG_VALUE_{}", base), String::new());
            set(&format!("GIT_CONFIG_KEY_{}", base + 1), "credential.helper".to_string());
            set(
                &format!("GIT_CONFIG_VALUE_{}", base + 1),
                format!("!\"{}\" credential", helper),
            );
            set("GIT_CONFIG_COUNT", (base + 2).to_string());
        }

        vars
    }
}

/// Address the helper should dial to reach a listener bound to `ip`
fn callback_host(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        other => other,
    }
}

fn helper_path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
