use crate::{RunList, TaskList};
use cmon_core::{ProjectStats, RunInfo, TaskDetail};
use cmon_messages::MessageList;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const RUNS_FLAT: &str = "runs-flat";

/// Identity of one cached query. Keys form ordered segment tuples; a key
/// covers every key whose segments start with its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryKey {
    RunsFlat {
        project_id: String,
    },
    RunsFlatScoped {
        project_id: String,
        task_id: String,
        limit: usize,
    },
    Tasks {
        project_id: String,
    },
    Task {
        project_id: String,
        task_id: String,
    },
    Run {
        project_id: String,
        task_id: String,
        run_id: String,
    },
    RunFile {
        project_id: String,
        task_id: String,
        run_id: String,
        name: String,
    },
    ProjectMessages {
        project_id: String,
    },
    TaskMessages {
        project_id: String,
        task_id: String,
    },
    ProjectStats {
        project_id: String,
    },
}

impl QueryKey {
    pub fn runs_flat(project_id: &str) -> Self {
        QueryKey::RunsFlat {
            project_id: project_id.to_string(),
        }
    }

    /// Scoped run slice; an unset task reads as `""` and an unset or zero limit as `0`.
    pub fn runs_flat_scoped(project_id: &str, task_id: Option<&str>, limit: Option<usize>) -> Self {
        QueryKey::RunsFlatScoped {
            project_id: project_id.to_string(),
            task_id: task_id.unwrap_or_default().to_string(),
            limit: limit.unwrap_or(0),
        }
    }

    pub fn tasks(project_id: &str) -> Self {
        QueryKey::Tasks {
            project_id: project_id.to_string(),
        }
    }

    pub fn task(project_id: &str, task_id: &str) -> Self {
        QueryKey::Task {
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
        }
    }

    pub fn run(project_id: &str, task_id: &str, run_id: &str) -> Self {
        QueryKey::Run {
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
            run_id: run_id.to_string(),
        }
    }

    pub fn segments(&self) -> Vec<String> {
        let parts: Vec<&str> = match self {
            QueryKey::RunsFlat { project_id } => vec![RUNS_FLAT, project_id.as_str()],
            QueryKey::RunsFlatScoped {
                project_id,
                task_id,
                limit,
            } => {
                return vec![
                    RUNS_FLAT.to_string(),
                    project_id.clone(),
                    task_id.clone(),
                    limit.to_string(),
                ];
            }
            QueryKey::Tasks { project_id } => vec!["tasks", project_id.as_str()],
            QueryKey::Task {
                project_id,
                task_id,
            } => vec!["task", project_id.as_str(), task_id.as_str()],
            QueryKey::Run {
                project_id,
                task_id,
                run_id,
            } => vec!["run", project_id.as_str(), task_id.as_str(), run_id.as_str()],
            QueryKey::RunFile {
                project_id,
                task_id,
                run_id,
                name,
            } => vec![
                "run-file",
                project_id.as_str(),
                task_id.as_str(),
                run_id.as_str(),
                name.as_str(),
            ],
            QueryKey::ProjectMessages { project_id } => {
                vec!["messages", "project", project_id.as_str()]
            }
            QueryKey::TaskMessages {
                project_id,
                task_id,
            } => vec!["messages", "task", project_id.as_str(), task_id.as_str()],
            QueryKey::ProjectStats { project_id } => vec!["project-stats", project_id.as_str()],
        };
        parts.into_iter().map(str::to_string).collect()
    }

    /// True when `other` equals this key or extends it.
    pub fn covers(&self, other: &QueryKey) -> bool {
        let own = self.segments();
        let theirs = other.segments();
        theirs.len() >= own.len() && theirs[..own.len()] == own[..]
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.segments().join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Runs(RunList),
    Tasks(TaskList),
    Task(Arc<TaskDetail>),
    Run(Arc<RunInfo>),
    Messages(MessageList),
    Stats(Arc<ProjectStats>),
    File(Arc<String>),
}

/// A typed view over one `CacheValue` variant.
pub trait CachedValue: Clone {
    fn from_cache(value: &CacheValue) -> Option<Self>;
    fn into_cache(self) -> CacheValue;
    /// Reference identity, not structural equality.
    fn same(&self, other: &Self) -> bool;
}

macro_rules! cached_value {
    ($ty:ty, $variant:ident) => {
        impl CachedValue for Arc<$ty> {
            fn from_cache(value: &CacheValue) -> Option<Self> {
                match value {
                    CacheValue::$variant(inner) => Some(Arc::clone(inner)),
                    _ => None,
                }
            }

            fn into_cache(self) -> CacheValue {
                CacheValue::$variant(self)
            }

            fn same(&self, other: &Self) -> bool {
                Arc::ptr_eq(self, other)
            }
        }
    };
}

cached_value!(Vec<cmon_core::FlatRun>, Runs);
cached_value!(Vec<cmon_core::Task>, Tasks);
cached_value!(TaskDetail, Task);
cached_value!(RunInfo, Run);
cached_value!(Vec<Arc<cmon_core::BusMessage>>, Messages);
cached_value!(ProjectStats, Stats);
cached_value!(String, File);

/// The query cache the reconciler reads, patches and marks stale.
pub trait QueryCache {
    fn read(&self, key: &QueryKey) -> Option<CacheValue>;

    fn write(&mut self, key: QueryKey, value: CacheValue);

    /// Marks `key` and every key it covers stale; returns how many cached
    /// entries were touched.
    fn invalidate(&mut self, key: &QueryKey) -> usize;

    /// Cached keys covered by `prefix`.
    fn keys_under(&self, prefix: &QueryKey) -> Vec<QueryKey>;

    fn get<T: CachedValue>(&self, key: &QueryKey) -> Option<T>
    where
        Self: Sized,
    {
        self.read(key).as_ref().and_then(T::from_cache)
    }

    /// Computes the next value from the current one and writes it only when
    /// it is a new reference. Returns whether a write happened.
    fn update<T, F>(&mut self, key: &QueryKey, next: F) -> bool
    where
        Self: Sized,
        T: CachedValue,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let current = self.get::<T>(key);
        match (current.as_ref(), next(current.as_ref())) {
            (Some(current), Some(next)) if current.same(&next) => false,
            (_, Some(next)) => {
                self.write(key.clone(), next.into_cache());
                true
            }
            (_, None) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CacheValue,
    stale: bool,
}

/// Most recent invalidation calls kept by [`MemoryCache`].
pub const INVALIDATION_LOG_CAPACITY: usize = 1024;

/// In-process cache used by the replay harness and tests. Records
/// invalidation calls in order, keeping the latest
/// [`INVALIDATION_LOG_CAPACITY`] until drained with `take_invalidations`.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: BTreeMap<QueryKey, CacheEntry>,
    invalidations: Vec<QueryKey>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.stale)
    }

    pub fn stale_keys(&self) -> Vec<&QueryKey> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.stale)
            .map(|(key, _)| key)
            .collect()
    }

    pub fn invalidations(&self) -> &[QueryKey] {
        &self.invalidations
    }

    pub fn take_invalidations(&mut self) -> Vec<QueryKey> {
        std::mem::take(&mut self.invalidations)
    }
}

impl QueryCache for MemoryCache {
    fn read(&self, key: &QueryKey) -> Option<CacheValue> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    fn write(&mut self, key: QueryKey, value: CacheValue) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stale: false,
            },
        );
    }

    fn invalidate(&mut self, key: &QueryKey) -> usize {
        if self.invalidations.len() >= INVALIDATION_LOG_CAPACITY {
            let excess = self.invalidations.len() + 1 - INVALIDATION_LOG_CAPACITY;
            self.invalidations.drain(..excess);
        }
        self.invalidations.push(key.clone());
        let mut touched = 0;
        for (cached, entry) in self.entries.iter_mut() {
            if key.covers(cached) {
                entry.stale = true;
                touched += 1;
            }
        }
        debug!(event = "cache_invalidate", key = %key, touched);
        touched
    }

    fn keys_under(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.entries
            .keys()
            .filter(|key| prefix.covers(key))
            .cloned()
            .collect()
    }
}
