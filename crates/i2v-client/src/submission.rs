/// Submission controller
///
/// Drives one generate request at a time through
/// `Idle -> InFlight -> {Succeeded | Failed}` and owns the current result
/// handle. Every failure, local or remote, ends in `Failed(message)` with
/// progress reset to 0; the upload session is never touched, so the user can
/// retry without selecting files again.
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{SubmitError, TransportError, ValidationError};
use crate::progress::{clip_step, HeuristicProgress};
use crate::resources::{ResourceManager, ResultHandle};
use crate::session::UploadSession;
use crate::transport::{GenerateRequest, GenerateTransport};

/// Live submission state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubmissionState {
    /// Nothing submitted yet, or cleared
    #[default]
    Idle,
    /// Waiting for the response; `progress` is simulated
    InFlight { progress: u8 },
    /// Result video ready
    Succeeded { result: ResultHandle },
    /// Last submission failed
    Failed { message: String },
}

impl SubmissionState {
    /// Percentage to render
    pub fn progress(&self) -> u8 {
        match self {
            Self::Idle | Self::Failed { .. } => 0,
            Self::InFlight { progress } => *progress,
            Self::Succeeded { .. } => 100,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::InFlight { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }

    pub fn result(&self) -> Option<&ResultHandle> {
        match self {
            Self::Succeeded { result } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { message } => Some(message),
            _ => None,
        }
    }

    /// Approximate "clip i of n" while in flight
    pub fn clip_step(&self, file_count: usize) -> Option<(usize, usize)> {
        match self {
            Self::InFlight { progress } => clip_step(*progress, file_count),
            _ => None,
        }
    }
}

struct Inner {
    state: SubmissionState,
    /// Incremented on every accepted submission; stale timers and responses
    /// compare against it
    attempt: u64,
    /// Aborts the spawned transport call of the current attempt
    request: Option<AbortHandle>,
    /// True until the last spawned transport future has been dropped, which
    /// can trail an abort
    request_live: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SubmissionState>,
    resources: Arc<ResourceManager>,
}

impl Shared {
    /// Replace the state, releasing a result handle the new state no longer
    /// holds. Must be called with `inner` locked.
    fn transition(&self, inner: &mut Inner, next: SubmissionState) {
        if let Some(old) = inner.state.result() {
            if next.result() != Some(old) {
                self.resources.release(old);
            }
        }
        inner.state = next.clone();
        self.state_tx.send_replace(next);
    }

    fn is_current(inner: &Inner, attempt: u64) -> bool {
        inner.attempt == attempt && inner.state.is_in_flight()
    }
}

/// Moved into the spawned transport future; clears `request_live` however
/// that future ends, including being dropped unpolled
struct RequestLive {
    shared: Arc<Shared>,
}

impl Drop for RequestLive {
    fn drop(&mut self) {
        self.shared.inner.lock().request_live = false;
    }
}

/// Fails the attempt if the submit future is dropped before it settles
struct AttemptGuard {
    shared: Arc<Shared>,
    attempt: u64,
    armed: bool,
}

impl AttemptGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let request = {
            let mut inner = self.shared.inner.lock();
            if !Shared::is_current(&inner, self.attempt) {
                return;
            }
            warn!("submission {} dropped while in flight", self.attempt);
            self.shared.transition(
                &mut inner,
                SubmissionState::Failed {
                    message: SubmitError::Cancelled.user_message(),
                },
            );
            inner.request.take()
        };
        if let Some(request) = request {
            request.abort();
        }
    }
}

/// Serializes the session into one request and tracks its outcome
pub struct SubmissionController {
    config: ClientConfig,
    transport: Arc<dyn GenerateTransport>,
    shared: Arc<Shared>,
    progress: HeuristicProgress,
}

impl SubmissionController {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn GenerateTransport>,
        resources: Arc<ResourceManager>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SubmissionState::Idle);
        let progress = HeuristicProgress::new(config.progress);

        Self {
            config,
            transport,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SubmissionState::Idle,
                    attempt: 0,
                    request: None,
                    request_live: false,
                }),
                state_tx,
                resources,
            }),
            progress,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> SubmissionState {
        self.shared.inner.lock().state.clone()
    }

    pub fn progress(&self) -> u8 {
        self.shared.inner.lock().state.progress()
    }

    pub fn result(&self) -> Option<ResultHandle> {
        self.shared.inner.lock().state.result().cloned()
    }

    /// Follow state changes without polling
    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.shared.state_tx.subscribe()
    }

    /// Submit every file of `session` plus `fields` as one multipart request.
    ///
    /// Validation and the `InFlight` transition happen before the first
    /// await, so a concurrent second call is rejected with
    /// `ValidationError::AlreadyInFlight` and never reaches the network.
    /// The transport call runs as its own task; `cancel`, `reset` and
    /// dropping this future abort it, and no new call starts until the
    /// aborted one has been torn down.
    pub async fn submit(
        &self,
        session: &UploadSession,
        fields: &BTreeMap<String, String>,
    ) -> Result<ResultHandle, SubmitError> {
        let attempt = self.begin(session.len())?;

        let request = GenerateRequest {
            files: session.files().cloned().collect(),
            file_field: self.config.file_field.clone(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        info!(
            "submission {} started: {} files, {} bytes",
            attempt,
            request.files.len(),
            session.total_bytes()
        );

        let live = RequestLive {
            shared: self.shared.clone(),
        };
        let transport = self.transport.clone();
        let task = tokio::spawn(async move {
            let _live = live;
            transport.send(request).await
        });
        self.shared.inner.lock().request = Some(task.abort_handle());

        let mut guard = AttemptGuard {
            shared: self.shared.clone(),
            attempt,
            armed: true,
        };

        let ticker = {
            let shared = self.shared.clone();
            self.progress.spawn(self.progress.initial(), move |value| {
                let mut inner = shared.inner.lock();
                if Shared::is_current(&inner, attempt) {
                    shared.transition(&mut inner, SubmissionState::InFlight { progress: value });
                }
            })
        };

        let outcome = task.await;
        drop(ticker);
        guard.disarm();

        let mut inner = self.shared.inner.lock();
        if !Shared::is_current(&inner, attempt) {
            // Cancelled or reset while waiting; the state is already settled
            info!("submission {} cancelled", attempt);
            return Err(SubmitError::Cancelled);
        }
        inner.request = None;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                let err = SubmitError::from(err);
                warn!("submission {} transport failure: {}", attempt, err);
                self.fail(&mut inner, &err);
                return Err(err);
            }
            Err(join) if join.is_cancelled() => {
                let err = SubmitError::Cancelled;
                self.fail(&mut inner, &err);
                return Err(err);
            }
            Err(join) => {
                let err = SubmitError::from(TransportError::Other(format!(
                    "transport task failed: {}",
                    join
                )));
                warn!("submission {} {}", attempt, err);
                self.fail(&mut inner, &err);
                return Err(err);
            }
        };

        if !response.is_success() {
            let err = SubmitError::from_response(response.status, &response.body_text());
            warn!("submission {} rejected: {} {}", attempt, response.status, err);
            self.fail(&mut inner, &err);
            return Err(err);
        }

        let handle = self
            .shared
            .resources
            .acquire(response.body.clone(), self.config.result_mime.clone());
        info!(
            "submission {} succeeded: {} bytes as {}",
            attempt,
            response.body.len(),
            handle
        );
        self.shared.transition(
            &mut inner,
            SubmissionState::Succeeded {
                result: handle.clone(),
            },
        );
        Ok(handle)
    }

    /// Abort the in-flight request. The state becomes
    /// `Failed("Request cancelled")` with progress 0. Returns false when
    /// nothing was in flight.
    pub fn cancel(&self) -> bool {
        let request = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_in_flight() {
                return false;
            }
            info!("submission {} cancel requested", inner.attempt);
            self.fail(&mut inner, &SubmitError::Cancelled);
            inner.request.take()
        };
        if let Some(request) = request {
            request.abort();
        }
        true
    }

    /// Cancel anything in flight, release the result and return to `Idle`
    pub fn reset(&self) {
        let request = {
            let mut inner = self.shared.inner.lock();
            self.shared.transition(&mut inner, SubmissionState::Idle);
            inner.request.take()
        };
        if let Some(request) = request {
            request.abort();
        }
    }

    /// Validate and enter `InFlight`, all under one lock
    fn begin(&self, file_count: usize) -> Result<u64, SubmitError> {
        let mut inner = self.shared.inner.lock();

        if inner.state.is_in_flight() || inner.request_live {
            // The running submission keeps its state; a cancelled request
            // still being torn down blocks a new one
            return Err(ValidationError::AlreadyInFlight.into());
        }

        let rejected = if file_count == 0 {
            Some(ValidationError::NoFiles)
        } else {
            match self.config.max_files {
                Some(max) if file_count > max => Some(ValidationError::TooManyFiles {
                    max,
                    actual: file_count,
                }),
                _ => None,
            }
        };
        if let Some(reason) = rejected {
            let err = SubmitError::from(reason);
            self.fail(&mut inner, &err);
            return Err(err);
        }

        inner.attempt += 1;
        inner.request_live = true;
        self.shared.transition(
            &mut inner,
            SubmissionState::InFlight {
                progress: self.progress.initial(),
            },
        );
        Ok(inner.attempt)
    }

    fn fail(&self, inner: &mut Inner, err: &SubmitError) {
        self.shared.transition(
            inner,
            SubmissionState::Failed {
                message: err.user_message(),
            },
        );
    }
}

impl Drop for SubmissionController {
    fn drop(&mut self) {
        self.reset();
    }
}
