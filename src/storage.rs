use crate::model::{Filter, Task, TaskList};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const TASKS_KEY: &str = "checkit-tasks";
pub const FILTER_KEY: &str = "checkit-filter";

const PROJECT_DIR: &str = ".checkit";

/// String-keyed persistent storage.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScope {
    Project,
    Global,
}

impl StoreScope {
    pub fn label(&self) -> &'static str {
        match self {
            StoreScope::Project => "project",
            StoreScope::Global => "global",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreLocation {
    pub dir: PathBuf,
    pub scope: StoreScope,
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    pub fn open(location: &StoreLocation) -> Self {
        FileStore::new(location.dir.clone())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
        Ok(Some(data))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| format!("creating {:?}", self.dir))?;
        let path = self.path_for(key);
        fs::write(&path, value).with_context(|| format!("writing {:?}", path))?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("removing {:?}", path))?;
        }
        Ok(())
    }
}

pub fn init_project_store(cwd: &Path) -> Result<StoreLocation> {
    let dir = cwd.join(PROJECT_DIR);
    fs::create_dir_all(&dir).context("failed to create .checkit directory")?;
    let location = StoreLocation {
        dir,
        scope: StoreScope::Project,
    };
    let mut store = FileStore::open(&location);
    if store.get(TASKS_KEY)?.is_none() {
        store.set(TASKS_KEY, &encode_tasks(&TaskList::default())?)?;
    }
    Ok(location)
}

pub fn locate_store(start: &Path) -> Result<StoreLocation> {
    if let Some(dir) = find_project_store(start) {
        return Ok(StoreLocation {
            dir,
            scope: StoreScope::Project,
        });
    }
    Ok(StoreLocation {
        dir: global_data_dir()?,
        scope: StoreScope::Global,
    })
}

pub fn global_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "checkit").context("locating data directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

fn find_project_store(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(PROJECT_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }
        dir = current.parent();
    }
    None
}

fn encode_tasks(list: &TaskList) -> Result<String> {
    serde_yaml::to_string(list.tasks()).context("serializing tasks")
}

fn decode_tasks(raw: &str) -> Result<TaskList> {
    let tasks: Vec<Task> = serde_yaml::from_str(raw).context("parsing task snapshot")?;
    Ok(TaskList::new(tasks))
}

// Local persistence is best-effort: failures are logged and swallowed.

pub fn load_tasks(store: &dyn KeyValueStore) -> TaskList {
    match store.get(TASKS_KEY).and_then(|raw| match raw {
        Some(raw) if !raw.trim().is_empty() => decode_tasks(&raw),
        _ => Ok(TaskList::default()),
    }) {
        Ok(list) => list,
        Err(err) => {
            warn!("ignoring unreadable task snapshot: {:#}", err);
            TaskList::default()
        }
    }
}

pub fn save_tasks(store: &mut dyn KeyValueStore, list: &TaskList) {
    if let Err(err) = encode_tasks(list).and_then(|data| store.set(TASKS_KEY, &data)) {
        warn!("could not persist tasks: {:#}", err);
    }
}

pub fn load_filter(store: &dyn KeyValueStore) -> Filter {
    match store.get(FILTER_KEY) {
        Ok(Some(raw)) => raw.parse().unwrap_or_else(|err| {
            warn!("{}; falling back to all", err);
            Filter::All
        }),
        Ok(None) => Filter::All,
        Err(err) => {
            warn!("could not read filter preference: {:#}", err);
            Filter::All
        }
    }
}

pub fn save_filter(store: &mut dyn KeyValueStore, filter: Filter) {
    if let Err(err) = store.set(FILTER_KEY, filter.label()) {
        warn!("could not persist filter: {:#}", err);
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;

    #[test]
    fn file_store_round_trips_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("nested"));
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "value").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("value"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn tasks_and_filter_persist_under_separate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        let mut list = TaskList::default();
        list.add("milk");
        save_tasks(&mut store, &list);
        save_filter(&mut store, Filter::Active);

        assert!(dir.path().join(TASKS_KEY).exists());
        assert_eq!(
            fs::read_to_string(dir.path().join(FILTER_KEY)).unwrap(),
            "active"
        );
        assert_eq!(load_tasks(&store), list);
        assert_eq!(load_filter(&store), Filter::Active);
    }

    #[test]
    fn unreadable_snapshot_loads_empty() {
        let mut store = MemoryStore::default();
        store.set(TASKS_KEY, "{not: [valid").unwrap();
        store.set(FILTER_KEY, "someday").unwrap();
        assert!(load_tasks(&store).is_empty());
        assert_eq!(load_filter(&store), Filter::All);
    }

    #[test]
    fn write_failures_are_ignored() {
        let mut store = MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        };
        let mut list = TaskList::default();
        list.add("eggs");
        save_tasks(&mut store, &list);
        save_filter(&mut store, Filter::Done);
        assert_eq!(store.raw(TASKS_KEY), None);
    }

    #[test]
    fn project_store_found_from_subdirectory() {
        let root = tempfile::tempdir().unwrap();
        let location = init_project_store(root.path()).unwrap();
        assert_eq!(location.scope, StoreScope::Project);

        let nested = root.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        let found = locate_store(&nested).unwrap();
        assert_eq!(found.scope, StoreScope::Project);
        assert_eq!(found.dir, location.dir);
        assert!(load_tasks(&FileStore::open(&found)).is_empty());
    }
}
