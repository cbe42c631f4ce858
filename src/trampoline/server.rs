//! Localhost listener the helper executable calls back into

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{
    decode_request, format_credential_fields, CredentialAction, CredentialFields,
    TrampolineCommand, MAX_MESSAGE_LEN,
};
use super::registry::{TrampolineRegistry, TrampolineSession};
use super::TrampolineError;

/// A helper that doesn't finish sending within this window is dropped
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Host-side credential UI and storage
///
/// Implemented by the application. `session` tells the handler which
/// directory the request belongs to and whether it may prompt at all.
#[async_trait]
pub trait TrampolineHandler: Send + Sync {
    /// Answer an askpass prompt (username, password, passphrase, host key)
    async fn ask_pass(&self, session: &TrampolineSession, prompt: &str) -> Option<String>;

    /// Fill in credentials for `git credential get`
    async fn get_credential(
        &self,
        session: &TrampolineSession,
        request: &CredentialFields,
    ) -> Option<CredentialFields>;

    /// git accepted the credential
    async fn store_credential(&self, _session: &TrampolineSession, _fields: &CredentialFields) {}

    /// git rejected the credential
    async fn erase_credential(&self, _session: &TrampolineSession, _fields: &CredentialFields) {}

    /// Whether concurrent requests for the same directory are safe.
    ///
    /// Returning `false` makes invocations against one directory run one at a time.
    fn is_reentrant(&self) -> bool {
        true
    }
}

/// Running trampoline listener; stops accepting when dropped
pub struct TrampolineServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TrampolineServer {
    /// Bind to `bind_address` on an ephemeral port and start serving
    pub async fn start(
        bind_address: &str,
        registry: Arc<TrampolineRegistry>,
        handler: Arc<dyn TrampolineHandler>,
    ) -> Result<Self, TrampolineError> {
        let listener = TcpListener::bind((bind_address, 0))
            .await
            .map_err(|e| TrampolineError::Bind(format!("{}: {}", bind_address, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| TrampolineError::Bind(e.to_string()))?;

        let shutdown = CancellationToken::new();
        tokio::spawn(accept_loop(listener, registry, handler, shutdown.clone()));

        info!(%addr, "trampoline server listening");
        Ok(Self { addr, shutdown })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for TrampolineServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<TrampolineRegistry>,
    handler: Arc<dyn TrampolineHandler>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let registry = registry.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, &registry, handler.as_ref()).await {
                        warn!(%peer, error = %e, "trampoline request failed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "trampoline accept failed");
            }
        }
    }
    debug!("trampoline server stopped");
}

async fn serve_connection(
    mut stream: TcpStream,
    registry: &TrampolineRegistry,
    handler: &dyn TrampolineHandler,
) -> Result<(), TrampolineError> {
    let mut buffer = Vec::new();
    let mut limited = (&mut stream).take(MAX_MESSAGE_LEN as u64 + 1);
    tokio::time::timeout(READ_TIMEOUT, limited.read_to_end(&mut buffer))
        .await
        .map_err(|_| TrampolineError::Malformed("helper did not finish sending".to_string()))??;
    if buffer.len() > MAX_MESSAGE_LEN {
        return Err(TrampolineError::Malformed("message too large".to_string()));
    }

    let response = respond(&buffer, registry, handler).await?;
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Decode one helper message and produce the text to send back
pub(crate) async fn respond(
    buffer: &[u8],
    registry: &TrampolineRegistry,
    handler: &dyn TrampolineHandler,
) -> Result<String, TrampolineError> {
    let request = decode_request(buffer)?;

    let Some(session) = request.token().and_then(|t| registry.lookup(t)) else {
        // Stale or forged token: answer nothing so git gives up
        warn!("trampoline request with unknown token");
        return Ok(String::new());
    };
    session.record_request();
    if session.is_cancelled() {
        debug!("trampoline request for a cancelled invocation");
        return Ok(String::new());
    }

    let command = request.command()?;
    Ok(dispatch(&session, command, handler).await)
}

async fn dispatch(
    session: &TrampolineSession,
    command: TrampolineCommand,
    handler: &dyn TrampolineHandler,
) -> String {
    match command {
        TrampolineCommand::AskPass { prompt } => {
            if session.is_background_task() {
                debug!("askpass prompt suppressed for background task");
                session.mark_prompt_suppressed();
                return String::new();
            }
            if session.credential_rejected() {
                return String::new();
            }
            handler
                .ask_pass(session, &prompt)
                .await
                .map(|answer| format!("{}\n", answer.trim_end_matches(['\r', '\n'])))
                .unwrap_or_default()
        }
        TrampolineCommand::Credential {
            action: CredentialAction::Get,
            fields,
        } => {
            // One shot: after git rejected a credential, fail fast instead of looping
            if session.credential_rejected() {
                return String::new();
            }
            match handler.get_credential(session, &fields).await {
                Some(found) => format_credential_fields(&found),
                None => String::new(),
            }
        }
        TrampolineCommand::Credential {
            action: CredentialAction::Store,
            fields,
        } => {
            handler.store_credential(session, &fields).await;
            String::new()
        }
        TrampolineCommand::Credential {
            action: CredentialAction::Erase,
            fields,
        } => {
            session.mark_credential_rejected();
            handler.erase_credential(session, &fields).await;
            String::new()
        }
    }
}
