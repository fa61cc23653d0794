use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type TaskId = i64;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub done: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    #[default]
    All,
    Active,
    Done,
}

/// Ordered task list. Ids are unique within the list.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct TaskList {
    tasks: Vec<Task>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("title is required")]
    EmptyTitle,
}

impl Task {
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        Task {
            id,
            title: title.into(),
            done: false,
        }
    }
}

impl Filter {
    pub fn label(&self) -> &'static str {
        match self {
            Filter::All => "all",
            Filter::Active => "active",
            Filter::Done => "done",
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        match self {
            Filter::All => true,
            Filter::Active => !task.done,
            Filter::Done => task.done,
        }
    }

    pub fn next(&self) -> Filter {
        match self {
            Filter::All => Filter::Active,
            Filter::Active => Filter::Done,
            Filter::Done => Filter::All,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Filter::All),
            "active" => Ok(Filter::Active),
            "done" | "completed" => Ok(Filter::Done),
            other => Err(format!("unknown filter: {} (use all, active or done)", other)),
        }
    }
}

/// Returns the tasks visible under `filter`, in list order.
pub fn select<'a>(tasks: &'a [Task], filter: Filter) -> Vec<&'a Task> {
    tasks.iter().filter(|t| filter.matches(t)).collect()
}

/// Trims a user-entered title; `None` when nothing is left.
pub fn normalize_title(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl TaskList {
    pub fn new(tasks: Vec<Task>) -> Self {
        let mut list = TaskList::default();
        for task in tasks {
            list.upsert_back(task);
        }
        list
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn visible(&self, filter: Filter) -> Vec<&Task> {
        select(&self.tasks, filter)
    }

    pub fn has_completed(&self) -> bool {
        self.tasks.iter().any(|t| t.done)
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.done).count()
    }

    /// Creates a task with a fresh local id at the front of the list.
    /// Returns `None` for an empty title.
    pub fn add(&mut self, title: &str) -> Option<&Task> {
        let title = normalize_title(title)?;
        let id = self.next_local_id();
        self.insert_front(Task::new(id, title));
        self.tasks.first()
    }

    /// Places `task` at the front, replacing any row with the same id.
    pub fn insert_front(&mut self, task: Task) {
        self.tasks.retain(|t| t.id != task.id);
        self.tasks.insert(0, task);
    }

    pub fn set_done(&mut self, id: TaskId, done: bool) -> Result<(), TaskError> {
        self.get_mut(id)?.done = done;
        Ok(())
    }

    pub fn rename(&mut self, id: TaskId, title: &str) -> Result<(), TaskError> {
        let title = normalize_title(title).ok_or(TaskError::EmptyTitle)?;
        self.get_mut(id)?.title = title;
        Ok(())
    }

    pub fn remove(&mut self, id: TaskId) -> Result<Task, TaskError> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskError::NotFound(id))?;
        Ok(self.tasks.remove(idx))
    }

    pub fn clear_completed(&mut self) -> Vec<TaskId> {
        let removed = self
            .tasks
            .iter()
            .filter(|t| t.done)
            .map(|t| t.id)
            .collect();
        self.tasks.retain(|t| !t.done);
        removed
    }

    /// Rows as they stand now, with their positions. Unknown ids are skipped.
    pub fn rows_at(&self, ids: &[TaskId]) -> Vec<(usize, Task)> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| ids.contains(&t.id))
            .map(|(pos, t)| (pos, t.clone()))
            .collect()
    }

    /// Puts rows taken by [`TaskList::rows_at`] back. A row whose id is still
    /// present is overwritten in place; a missing one is reinserted at its
    /// old position, or at the end if the list has since shrunk.
    pub fn restore_rows(&mut self, mut rows: Vec<(usize, Task)>) {
        rows.sort_by_key(|(pos, _)| *pos);
        for (pos, task) in rows {
            if let Some(existing) = self.tasks.iter_mut().find(|t| t.id == task.id) {
                *existing = task;
            } else {
                let at = pos.min(self.tasks.len());
                self.tasks.insert(at, task);
            }
        }
    }

    pub fn replace(&mut self, tasks: Vec<Task>) {
        *self = TaskList::new(tasks);
    }

    fn get_mut(&mut self, id: TaskId) -> Result<&mut Task, TaskError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(TaskError::NotFound(id))
    }

    fn upsert_back(&mut self, task: Task) {
        if let Some(existing) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            *existing = task;
        } else {
            self.tasks.push(task);
        }
    }

    fn next_local_id(&self) -> TaskId {
        let now = Utc::now().timestamp_millis();
        let max = self.tasks.iter().map(|t| t.id).max().unwrap_or(0);
        now.max(max + 1)
    }
}
