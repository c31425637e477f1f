use anyhow::{bail, Context, Result};
use cmon_core::{BusMessage, FlatRun, Task};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const TASKS_FILE: &str = "tasks.json";
pub const RUNS_FILE: &str = "runs.json";
pub const MESSAGES_FILE: &str = "messages.json";
pub const EVENTS_FILE: &str = "events.sse";

/// A captured dashboard session: the snapshots the API served, plus the raw
/// bytes of the live stream that followed.
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    pub tasks: Vec<Task>,
    pub runs: Vec<FlatRun>,
    pub messages: Vec<BusMessage>,
    pub events: Vec<u8>,
}

/// Listings are accepted bare or wrapped the way the API wraps them.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Tasks { tasks: Vec<T> },
    Runs { runs: Vec<T> },
    Messages { messages: Vec<T> },
}

impl<T> Listing<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Listing::Bare(items)
            | Listing::Tasks { tasks: items }
            | Listing::Runs { runs: items }
            | Listing::Messages { messages: items } => items,
        }
    }
}

pub fn load_fixture(dir: &Path) -> Result<Fixture> {
    if !dir.is_dir() {
        bail!("fixture directory not found: {}", dir.display());
    }
    let tasks = read_listing(&dir.join(TASKS_FILE))?;
    let runs = read_listing(&dir.join(RUNS_FILE))?;
    let messages_path = dir.join(MESSAGES_FILE);
    let messages = if messages_path.exists() {
        read_listing(&messages_path)?
    } else {
        Vec::new()
    };
    let events_path = dir.join(EVENTS_FILE);
    let events = if events_path.exists() {
        fs::read(&events_path)
            .with_context(|| format!("failed to read {}", events_path.display()))?
    } else {
        Vec::new()
    };
    Ok(Fixture {
        tasks,
        runs,
        messages,
        events,
    })
}

fn read_listing<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let listing: Listing<T> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(listing.into_items())
}
