//! Task state with local or remote persistence.
//!
//! Anonymous: every change is written to the local store. Authenticated:
//! the local store is left untouched and changes go to the remote table.
//! Toggle, rename, delete and clear-completed are applied in memory first.
//! If the remote request fails, the rows it touched are put back as they
//! were; rows changed by other requests in the meantime are left alone.
//!
//! Remote requests run on worker threads and report back over a channel;
//! call [`TaskSync::poll`] from the event loop or [`TaskSync::settle`] to
//! wait for everything in flight. Completions that belong to an earlier
//! session epoch are dropped.

use crate::model::{normalize_title, Filter, Task, TaskError, TaskId, TaskList};
use crate::remote::{RemoteError, TaskBackend};
use crate::session::Session;
use crate::storage::{load_filter, load_tasks, save_filter, save_tasks, KeyValueStore};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Anonymous,
    Authenticated(Session),
}

#[derive(Debug, Clone)]
enum Request {
    Fetch,
    Insert(String),
    SetDone(TaskId, bool),
    Rename(TaskId, String),
    Delete(TaskId),
    DeleteCompleted,
}

enum Outcome {
    Fetched(Vec<Task>),
    Inserted(Task),
    Applied,
}

struct Completion {
    epoch: u64,
    ticket: u64,
    result: Result<Outcome, RemoteError>,
}

struct Pending {
    action: &'static str,
    rollback: Option<Vec<(usize, Task)>>,
}

impl Request {
    fn action(&self) -> &'static str {
        match self {
            Request::Fetch => "load tasks",
            Request::Insert(_) => "add task",
            Request::SetDone(..) => "update task",
            Request::Rename(..) => "rename task",
            Request::Delete(_) => "delete task",
            Request::DeleteCompleted => "clear completed tasks",
        }
    }

    /// Ids of the rows this request changes in `list`.
    fn touched(&self, list: &TaskList) -> Vec<TaskId> {
        match self {
            Request::SetDone(id, _) | Request::Rename(id, _) | Request::Delete(id) => vec![*id],
            Request::DeleteCompleted => list
                .tasks()
                .iter()
                .filter(|t| t.done)
                .map(|t| t.id)
                .collect(),
            Request::Fetch | Request::Insert(_) => Vec::new(),
        }
    }

    fn run(self, backend: &dyn TaskBackend, session: &Session) -> Result<Outcome, RemoteError> {
        match self {
            Request::Fetch => backend.fetch_tasks(session).map(Outcome::Fetched),
            Request::Insert(title) => backend.insert_task(session, &title).map(Outcome::Inserted),
            Request::SetDone(id, done) => {
                backend.set_done(session, id, done).map(|_| Outcome::Applied)
            }
            Request::Rename(id, title) => backend
                .rename_task(session, id, &title)
                .map(|_| Outcome::Applied),
            Request::Delete(id) => backend.delete_task(session, id).map(|_| Outcome::Applied),
            Request::DeleteCompleted => backend.delete_completed(session).map(|_| Outcome::Applied),
        }
    }
}

pub struct TaskSync {
    list: TaskList,
    filter: Filter,
    mode: Mode,
    store: Box<dyn KeyValueStore>,
    backend: Option<Arc<dyn TaskBackend>>,
    epoch: u64,
    next_ticket: u64,
    pending: HashMap<u64, Pending>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    status: String,
    data_error: Option<String>,
    auth_error: Option<String>,
}

impl TaskSync {
    pub fn new(store: Box<dyn KeyValueStore>, backend: Option<Arc<dyn TaskBackend>>) -> Self {
        let list = load_tasks(store.as_ref());
        let filter = load_filter(store.as_ref());
        let (tx, rx) = mpsc::channel();
        TaskSync {
            status: format!("Loaded {} local task(s)", list.len()),
            list,
            filter,
            mode: Mode::Anonymous,
            store,
            backend,
            epoch: 0,
            next_ticket: 0,
            pending: HashMap::new(),
            tx,
            rx,
            data_error: None,
            auth_error: None,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        self.list.tasks()
    }

    pub fn list(&self) -> &TaskList {
        &self.list
    }

    pub fn visible(&self) -> Vec<&Task> {
        self.list.visible(self.filter)
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.mode {
            Mode::Authenticated(session) => Some(session),
            Mode::Anonymous => None,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn data_error(&self) -> Option<&str> {
        self.data_error.as_deref()
    }

    pub fn auth_error(&self) -> Option<&str> {
        self.auth_error.as_deref()
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn set_auth_error(&mut self, message: impl Into<String>) {
        self.auth_error = Some(message.into());
    }

    pub fn dismiss_errors(&mut self) {
        self.data_error = None;
        self.auth_error = None;
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
        save_filter(self.store.as_mut(), filter);
        self.status = format!("Showing {} tasks", filter.label());
    }

    /// Returns false when the title is blank and nothing was done.
    pub fn add(&mut self, title: &str) -> bool {
        let Some(title) = normalize_title(title) else {
            return false;
        };
        self.data_error = None;
        match self.mode {
            Mode::Anonymous => {
                self.list.add(&title);
                self.persist_local();
                self.status = format!("Added \"{}\"", title);
            }
            Mode::Authenticated(_) => {
                self.status = format!("Adding \"{}\"...", title);
                self.dispatch(Request::Insert(title), None);
            }
        }
        true
    }

    pub fn toggle(&mut self, id: TaskId) -> Result<bool, TaskError> {
        let done = !self.list.get(id).ok_or(TaskError::NotFound(id))?.done;
        self.mutate(Request::SetDone(id, done), |list| list.set_done(id, done))?;
        self.status = if done {
            "Marked done".into()
        } else {
            "Marked active".into()
        };
        Ok(done)
    }

    pub fn rename(&mut self, id: TaskId, title: &str) -> Result<(), TaskError> {
        let title = normalize_title(title).ok_or(TaskError::EmptyTitle)?;
        if self.list.get(id).map(|t| t.title == title).unwrap_or(false) {
            return Ok(());
        }
        let request = Request::Rename(id, title.clone());
        self.mutate(request, |list| list.rename(id, &title))?;
        self.status = format!("Renamed to \"{}\"", title);
        Ok(())
    }

    pub fn remove(&mut self, id: TaskId) -> Result<(), TaskError> {
        let removed = self.mutate(Request::Delete(id), |list| list.remove(id))?;
        self.status = format!("Deleted \"{}\"", removed.title);
        Ok(())
    }

    /// Returns the number of tasks removed.
    pub fn clear_completed(&mut self) -> usize {
        if !self.list.has_completed() {
            return 0;
        }
        let removed = self
            .mutate(Request::DeleteCompleted, |list| Ok(list.clear_completed()))
            .map(|ids| ids.len())
            .unwrap_or(0);
        self.status = format!("Cleared {} completed task(s)", removed);
        removed
    }

    /// Switches to remote persistence and loads the user's tasks.
    pub fn sign_in(&mut self, session: Session) -> Result<(), RemoteError> {
        if self.backend.is_none() {
            return Err(RemoteError::NotConfigured);
        }
        self.begin_epoch();
        info!("signed in as {}", session.display_name());
        self.status = format!("Signed in as {}; loading tasks...", session.display_name());
        self.mode = Mode::Authenticated(session);
        self.list = TaskList::default();
        self.dispatch(Request::Fetch, None);
        Ok(())
    }

    /// Drops remote state and restores the local snapshot.
    pub fn sign_out(&mut self) {
        if self.mode == Mode::Anonymous {
            return;
        }
        self.begin_epoch();
        self.mode = Mode::Anonymous;
        self.list = load_tasks(self.store.as_ref());
        info!("signed out; restored {} local task(s)", self.list.len());
        self.status = format!("Signed out; {} local task(s)", self.list.len());
    }

    /// Re-fetches the remote list. No-op when anonymous.
    pub fn reload(&mut self) {
        if let Mode::Authenticated(_) = self.mode {
            self.status = "Reloading...".into();
            self.dispatch(Request::Fetch, None);
        }
    }

    /// Applies every completion that has already arrived.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(completion) = self.rx.try_recv() {
            changed |= self.apply(completion);
        }
        changed
    }

    /// Blocks until nothing is in flight or `timeout` passes. Returns false
    /// on timeout.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(completion) => {
                    self.apply(completion);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
        true
    }

    fn mutate<T>(
        &mut self,
        request: Request,
        f: impl FnOnce(&mut TaskList) -> Result<T, TaskError>,
    ) -> Result<T, TaskError> {
        let rows = self.list.rows_at(&request.touched(&self.list));
        let out = f(&mut self.list)?;
        self.data_error = None;
        match self.mode {
            Mode::Anonymous => self.persist_local(),
            Mode::Authenticated(_) => self.dispatch(request, Some(rows)),
        }
        Ok(out)
    }

    fn persist_local(&mut self) {
        save_tasks(self.store.as_mut(), &self.list);
    }

    fn begin_epoch(&mut self) {
        self.epoch += 1;
        self.pending.clear();
        self.data_error = None;
        self.auth_error = None;
    }

    fn dispatch(&mut self, request: Request, rollback: Option<Vec<(usize, Task)>>) {
        let (Some(backend), Mode::Authenticated(session)) = (&self.backend, &self.mode) else {
            return;
        };
        let backend = Arc::clone(backend);
        let session = session.clone();
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let action = request.action();
        self.pending.insert(ticket, Pending { action, rollback });

        let tx = self.tx.clone();
        let epoch = self.epoch;
        debug!(ticket, epoch, action, "dispatching remote request");
        thread::spawn(move || {
            let result = request.run(backend.as_ref(), &session);
            // The receiver lives as long as the TaskSync; a send error only
            // means the app is shutting down.
            let _ = tx.send(Completion {
                epoch,
                ticket,
                result,
            });
        });
    }

    fn apply(&mut self, completion: Completion) -> bool {
        if completion.epoch != self.epoch {
            debug!(
                ticket = completion.ticket,
                "dropping completion from earlier session"
            );
            return false;
        }
        let Some(pending) = self.pending.remove(&completion.ticket) else {
            return false;
        };
        match completion.result {
            Ok(Outcome::Fetched(tasks)) => {
                self.list.replace(tasks);
                self.status = format!("Loaded {} remote task(s)", self.list.len());
            }
            Ok(Outcome::Inserted(task)) => {
                self.status = format!("Added \"{}\"", task.title);
                self.list.insert_front(task);
            }
            Ok(Outcome::Applied) => {
                debug!(ticket = completion.ticket, action = pending.action, "remote request ok");
            }
            Err(err) => {
                warn!("could not {}: {}", pending.action, err);
                if let Some(rows) = pending.rollback {
                    self.list.restore_rows(rows);
                    warn!("rolled back local change after failed {}", pending.action);
                }
                self.data_error = Some(format!("Could not {}: {}", pending.action, err));
            }
        }
        true
    }
}
