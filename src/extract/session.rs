//! Named, cancellable extraction runs over an explicit selection of entries.
//!
//! Every run gets its own [`SessionId`] and cancel token, kept in a
//! [`SessionRegistry`] only while the run is live. A run emits one
//! `"Extracting <name>..."` line per entry it is about to write and ends with
//! [`COMPLETE_LINE`], [`ABORTED_LINE`] or an `"ERROR: ..."` line.
//!
//! Cancellation is checked before each entry; an entry already being written
//! is always finished.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::zip::RemoteArchive;

use super::guard::target_path;
use super::scheduler::{ExtractionJob, extract_job};

pub const COMPLETE_LINE: &str = "Extraction complete.";
pub const ABORTED_LINE: &str = "Aborted";

const LINE_BUFFER: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::UnknownSession(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Terminal state for the result of [`ExtractionSession::finish`].
    pub fn from_outcome(outcome: &Result<()>) -> Self {
        match outcome {
            Ok(()) => Self::Completed,
            Err(Error::Cancelled) => Self::Cancelled,
            Err(_) => Self::Failed,
        }
    }
}

struct Slot {
    token: CancellationToken,
    state: SessionState,
}

/// Live sessions, keyed by id. Each session owns its own slot.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begin extracting the entries whose names are exactly in `selected`.
    ///
    /// The session is registered before this returns, so it can be cancelled
    /// right away.
    pub fn start<I, S>(
        self: &Arc<Self>,
        archive: Arc<RemoteArchive>,
        dest: impl Into<PathBuf>,
        selected: I,
    ) -> ExtractionSession
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let token = CancellationToken::new();
        let id = {
            let mut sessions = self.sessions();
            let mut id = SessionId::new();
            while sessions.contains_key(&id) {
                id = SessionId::new();
            }
            sessions.insert(
                id,
                Slot {
                    token: token.clone(),
                    state: SessionState::Created,
                },
            );
            id
        };

        let selected: HashSet<String> = selected.into_iter().map(Into::into).collect();
        let dest = dest.into();
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let registry = self.clone();

        info!(session = %id, selected = selected.len(), dest = %dest.display(), "session created");

        let task = tokio::spawn(async move {
            let _unregister = Unregister {
                registry: registry.clone(),
                id,
            };
            registry.set_state(id, SessionState::Running);

            let outcome = run(&archive, &dest, &selected, &token, &tx).await;
            match &outcome {
                Ok(()) => info!(session = %id, "session completed"),
                Err(Error::Cancelled) => info!(session = %id, "session cancelled"),
                Err(err) => {
                    warn!(session = %id, error = %err, "session failed");
                    emit(&tx, format!("ERROR: {err}")).await;
                }
            }
            outcome
        });

        ExtractionSession {
            id,
            lines: rx,
            task,
        }
    }

    /// Request cooperative cancellation of a live session.
    pub fn cancel(&self, id: &SessionId) -> Result<()> {
        let sessions = self.sessions();
        let slot = sessions
            .get(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
        info!(session = %id, "cancelling session");
        slot.token.cancel();
        Ok(())
    }

    /// State of a live session; `None` once it reached a terminal state.
    pub fn state(&self, id: &SessionId) -> Option<SessionState> {
        self.sessions().get(id).map(|slot| slot.state)
    }

    pub fn active(&self) -> usize {
        self.sessions().len()
    }

    fn set_state(&self, id: SessionId, state: SessionState) {
        if let Some(slot) = self.sessions().get_mut(&id) {
            slot.state = state;
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Slot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the session from its registry when the run ends, however it ends.
struct Unregister {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl Drop for Unregister {
    fn drop(&mut self) {
        self.registry.sessions().remove(&self.id);
    }
}

/// Handle to a running session: its status lines and final outcome.
pub struct ExtractionSession {
    id: SessionId,
    lines: mpsc::Receiver<String>,
    task: JoinHandle<Result<()>>,
}

impl ExtractionSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next status line; `None` once the run has ended and all lines were read.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Wait for the run to end without reading further lines.
    ///
    /// `Err(Error::Cancelled)` if it was cancelled.
    pub async fn finish(self) -> Result<()> {
        let Self { lines, task, .. } = self;
        drop(lines);
        task.await?
    }

    /// Read every remaining line, then wait for the outcome.
    pub async fn collect(mut self) -> (Vec<String>, Result<()>) {
        let mut lines = Vec::new();
        while let Some(line) = self.lines.recv().await {
            lines.push(line);
        }
        (lines, self.finish().await)
    }
}

async fn run(
    archive: &RemoteArchive,
    dest: &Path,
    selected: &HashSet<String>,
    token: &CancellationToken,
    lines: &mpsc::Sender<String>,
) -> Result<()> {
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(Error::fs("create output directory", dest))?;
    let base = std::path::absolute(dest).map_err(Error::fs("resolve output directory", dest))?;

    for (index, entry) in archive.entries().iter().enumerate() {
        if token.is_cancelled() {
            emit(lines, ABORTED_LINE).await;
            return Err(Error::Cancelled);
        }
        if !selected.contains(&entry.name) {
            continue;
        }

        emit(lines, format!("Extracting {}...", entry.name)).await;
        let job = ExtractionJob {
            index,
            entry: entry.clone(),
            target: target_path(&base, &entry.name),
        };
        extract_job(archive, &base, &job)
            .await
            .map_err(|err| Error::entry(&entry.name, err))?;
    }

    emit(lines, COMPLETE_LINE).await;
    Ok(())
}

async fn emit(lines: &mpsc::Sender<String>, line: impl Into<String>) {
    // A consumer that stopped listening does not stop the run.
    let _ = lines.send(line.into()).await;
}
