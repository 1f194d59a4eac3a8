use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use console::style;
use tasklist_store::{
    Notice, PersistentStore, Shape, SqliteBackend, StorageKey, StoreConfig, Task, TokioScheduler,
    ValueKind,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

pub type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Layout version of the records this tool writes.
const SCHEMA_VERSION: u64 = 1;

/// Which tasks `list` shows. Persisted as the filter preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Filter {
    #[default]
    All,
    Active,
    Completed,
}

impl Filter {
    fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    fn accepts(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
        }
    }
}

impl FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown filter '{other}' (expected all, active or completed)")),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn report(notice: &Notice) {
    eprintln!("{} {notice}", style("note:").yellow().bold());
}

/// The task list and its persisted preferences.
pub struct TaskApp {
    store: PersistentStore<SqliteBackend>,
    tasks_key: StorageKey,
    filter_key: StorageKey,
    tasks: Vec<Task>,
}

impl TaskApp {
    /// Open the database at `db_path`, optionally configured from a TOML
    /// file.
    pub fn open(db_path: &str, config_path: Option<&str>) -> Result<Self> {
        let config = match config_path {
            Some(path) => StoreConfig::from_path(path)?,
            None => StoreConfig::default(),
        };
        let backend = SqliteBackend::open(db_path)?;
        info!(db = db_path, namespace = %config.namespace, "opening task list");
        let store = PersistentStore::builder(backend, TokioScheduler::new())
            .config(config)
            .on_notice(report)
            .build()?;
        Self::new(store)
    }

    /// Load the task list from an already built store.
    pub fn new(store: PersistentStore<SqliteBackend>) -> Result<Self> {
        let version_key = store.key("schema-version");
        let version = store
            .load(&version_key, SCHEMA_VERSION, &Shape::Value(ValueKind::Integer))
            .value;
        if version > SCHEMA_VERSION {
            return Err(format!(
                "database uses schema v{version}, this tool only understands v{SCHEMA_VERSION}"
            )
            .into());
        }
        store.save(&version_key, &SCHEMA_VERSION)?;

        let tasks_key = store.key("tasks");
        let filter_key = store.key("filter");
        let loaded = store.load(&tasks_key, Vec::new(), &Task::shape());
        debug!(tasks = loaded.value.len(), repaired = loaded.repaired, "task list loaded");

        Ok(Self {
            store,
            tasks_key,
            filter_key,
            tasks: loaded.value,
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn store(&self) -> &PersistentStore<SqliteBackend> {
        &self.store
    }

    fn persist(&mut self) -> Result {
        let tasks = std::mem::take(&mut self.tasks);
        self.tasks = self.store.save_collection(&self.tasks_key, tasks)?;
        Ok(())
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| format!("no task with id '{id}'").into())
    }

    fn next_id(&self) -> Result<String> {
        let max = self
            .tasks
            .iter()
            .filter_map(|t| t.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let next = max
            .checked_add(1)
            .ok_or_else(|| format!("no task id left after '{max}'"))?;
        Ok(next.to_string())
    }

    /// Append a task and return its id.
    pub fn add(&mut self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("task text must not be empty".into());
        }
        let id = self.next_id()?;
        self.tasks.push(Task::new(id.clone(), text, now_ms()));
        self.persist()?;
        Ok(id)
    }

    /// Flip a task's completion; returns the new state.
    pub fn toggle(&mut self, id: &str) -> Result<bool> {
        let index = self.position(id)?;
        self.tasks[index].toggle(now_ms());
        let completed = self.tasks[index].completed;
        self.persist()?;
        Ok(completed)
    }

    /// Replace a task's text. Empty text deletes the task.
    pub fn edit(&mut self, id: &str, text: &str) -> Result {
        let index = self.position(id)?;
        let text = text.trim();
        if text.is_empty() {
            self.tasks.remove(index);
        } else {
            self.tasks[index].text = text.to_string();
        }
        self.persist()
    }

    pub fn delete(&mut self, id: &str) -> Result {
        let index = self.position(id)?;
        self.tasks.remove(index);
        self.persist()
    }

    /// Remove every completed task; returns how many went.
    pub fn clear_completed(&mut self) -> Result<usize> {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.completed);
        let removed = before - self.tasks.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// The saved filter preference.
    pub fn filter(&self) -> Filter {
        let loaded = self.store.load(
            &self.filter_key,
            Filter::All.as_str().to_string(),
            &Shape::Value(ValueKind::String),
        );
        loaded.value.parse().unwrap_or_default()
    }

    pub fn set_filter(&mut self, filter: Filter) -> Result {
        self.store
            .save(&self.filter_key, &filter.as_str().to_string())?;
        Ok(())
    }

    pub fn visible(&self, filter: Filter) -> Vec<&Task> {
        self.tasks.iter().filter(|t| filter.accepts(t)).collect()
    }

    /// Drop every record of this namespace, including the in-memory list.
    pub fn reset(&mut self) -> usize {
        self.tasks.clear();
        self.store.clear_namespace()
    }

    /// Write everything still pending. Call before exiting.
    pub fn close(self) {
        self.store.flush_all();
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// `tasks add <text>`
pub fn add(app: &mut TaskApp, text: &str) -> Result {
    let id = app.add(text)?;
    println!("Added task {}", style(id).bold());
    Ok(())
}

/// `tasks list [--filter <filter>]`
pub fn list(app: &mut TaskApp, filter: Option<Filter>) -> Result {
    let filter = match filter {
        Some(filter) => {
            app.set_filter(filter)?;
            filter
        }
        None => app.filter(),
    };
    let visible = app.visible(filter);

    if visible.is_empty() {
        println!("  (no {filter} tasks)");
    } else {
        for task in &visible {
            println!("{}", format_task(task));
        }
    }

    let left = app.tasks().iter().filter(|t| !t.completed).count();
    println!();
    println!(
        "{left} item{} left  [{}]",
        if left == 1 { "" } else { "s" },
        style(filter).cyan()
    );
    Ok(())
}

/// `tasks toggle <id>`
pub fn toggle(app: &mut TaskApp, id: &str) -> Result {
    let completed = app.toggle(id)?;
    let state = if completed { "completed" } else { "active" };
    println!("Task {} is now {state}", style(id).bold());
    Ok(())
}

/// `tasks edit <id> <text>`
pub fn edit(app: &mut TaskApp, id: &str, text: &str) -> Result {
    app.edit(id, text)?;
    println!("Updated task {}", style(id).bold());
    Ok(())
}

/// `tasks delete <id>`
pub fn delete(app: &mut TaskApp, id: &str) -> Result {
    app.delete(id)?;
    println!("Deleted task {}", style(id).bold());
    Ok(())
}

/// `tasks clear-completed`
pub fn clear_completed(app: &mut TaskApp) -> Result {
    let removed = app.clear_completed()?;
    println!("Removed {removed} completed task{}", if removed == 1 { "" } else { "s" });
    Ok(())
}

/// `tasks quota` — Estimated usage of the namespace.
pub fn quota(app: &TaskApp) -> Result {
    let store = app.store();
    let config = store.config();
    let estimate = store.quota_status();
    let size = store.backend().file_size()?;

    println!("Namespace: {}", store.namespace());
    println!(
        "Used: {} of {} ({:.1}%)",
        format_bytes(estimate.bytes_used),
        format_bytes(config.quota_ceiling_bytes),
        estimate.percent_used
    );
    println!(
        "Thresholds: warn at {}%, critical at {}%",
        config.quota_warn_percent, config.quota_critical_percent
    );
    println!("Database file: {}", format_bytes(size));
    let fallback = store.fallback_state();
    if !fallback.backend_available {
        println!("{}", style("Storage unavailable: working from memory").red());
    }
    Ok(())
}

/// `tasks reset --yes`
pub fn reset(app: &mut TaskApp, confirmed: bool) -> Result {
    if !confirmed {
        return Err("reset deletes every task and preference; pass --yes to confirm".into());
    }
    let removed = app.reset();
    println!("Removed {removed} record{}", if removed == 1 { "" } else { "s" });
    Ok(())
}

const SHELL_HELP: &str = "\
commands:
  add <text>            add a task
  list [filter]         list tasks (all, active, completed)
  toggle <id>           mark a task done or not done
  edit <id> <text>      change a task's text
  delete <id>           delete a task
  clear-completed       delete every completed task
  quota                 show storage usage
  help                  show this help
  quit                  leave the shell";

/// `tasks shell` — Interactive session. Saves are debounced while it runs.
pub async fn shell(app: &mut TaskApp) -> Result {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    println!("{}", SHELL_HELP);

    loop {
        stdout.write_all(b"tasks> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let outcome = match command {
            "" => Ok(()),
            "add" => add(app, rest),
            "list" | "ls" => {
                let filter = if rest.is_empty() {
                    Ok(None)
                } else {
                    rest.parse().map(Some)
                };
                match filter {
                    Ok(filter) => list(app, filter),
                    Err(e) => Err(e.into()),
                }
            }
            "toggle" => toggle(app, rest),
            "edit" => {
                let (id, text) = rest.split_once(' ').unwrap_or((rest, ""));
                edit(app, id, text)
            }
            "delete" | "rm" => delete(app, rest),
            "clear-completed" => clear_completed(app),
            "quota" => quota(app),
            "help" => {
                println!("{SHELL_HELP}");
                Ok(())
            }
            "quit" | "exit" => break,
            other => Err(format!("unknown command '{other}', try 'help'").into()),
        };
        if let Err(e) = outcome {
            eprintln!("{} {e}", style("error:").red());
        }
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────

fn format_task(task: &Task) -> String {
    let mark = if task.completed {
        style("[x]").green()
    } else {
        style("[ ]").dim()
    };
    let text = if task.completed {
        style(task.text.as_str()).dim().strikethrough()
    } else {
        style(task.text.as_str())
    };
    format!(
        "{mark} {:>4}  {text}  {}",
        task.id,
        style(format_time(task.created_at)).dim()
    )
}

fn format_time(ms: u64) -> String {
    if ms == 0 {
        return String::new();
    }
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use tasklist_store::{KeyValueBackend, ManualScheduler};

    use super::*;

    fn app() -> (TaskApp, ManualScheduler) {
        let clock = ManualScheduler::new();
        let store = PersistentStore::builder(SqliteBackend::open_in_memory().unwrap(), clock.clone())
            .build()
            .unwrap();
        (TaskApp::new(store).unwrap(), clock)
    }

    #[test]
    fn add_refuses_when_ids_are_exhausted() {
        let (mut app, _clock) = app();
        app.tasks.push(Task::new(u64::MAX.to_string(), "last", 0));

        let err = app.add("one more").unwrap_err();
        assert!(err.to_string().contains("no task id left"));
        assert_eq!(app.tasks().len(), 1);
    }

    #[test]
    fn add_toggle_and_clear() {
        let (mut app, _clock) = app();
        assert_eq!(app.add("buy milk").unwrap(), "1");
        assert_eq!(app.add("  walk dog ").unwrap(), "2");
        assert_eq!(app.tasks()[1].text, "walk dog");

        assert!(app.toggle("1").unwrap());
        assert_eq!(app.visible(Filter::Active).len(), 1);
        assert_eq!(app.visible(Filter::Completed)[0].id, "1");

        assert_eq!(app.clear_completed().unwrap(), 1);
        assert_eq!(app.tasks().len(), 1);
        assert!(app.toggle("1").is_err());
    }

    #[test]
    fn ids_continue_after_deletion() {
        let (mut app, _clock) = app();
        app.add("a").unwrap();
        app.add("b").unwrap();
        app.delete("1").unwrap();
        assert_eq!(app.add("c").unwrap(), "3");
    }

    #[test]
    fn empty_edit_deletes() {
        let (mut app, _clock) = app();
        app.add("a").unwrap();
        app.edit("1", "   ").unwrap();
        assert!(app.tasks().is_empty());
        assert!(app.add("").is_err());
    }

    #[test]
    fn state_survives_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        {
            let clock = ManualScheduler::new();
            let store = PersistentStore::builder(SqliteBackend::open(&path).unwrap(), clock)
                .build()
                .unwrap();
            let mut app = TaskApp::new(store).unwrap();
            app.add("persist me").unwrap();
            app.set_filter(Filter::Active).unwrap();
            app.close();
        }

        let store = PersistentStore::builder(SqliteBackend::open(&path).unwrap(), ManualScheduler::new())
            .build()
            .unwrap();
        let app = TaskApp::new(store).unwrap();
        assert_eq!(app.tasks().len(), 1);
        assert_eq!(app.tasks()[0].text, "persist me");
        assert_eq!(app.filter(), Filter::Active);
    }

    #[test]
    fn newer_schema_is_refused() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .set(&StoreConfig::default().namespace().key("schema-version").to_string(), "2")
            .unwrap();
        let store = PersistentStore::builder(backend, ManualScheduler::new())
            .build()
            .unwrap();
        assert!(TaskApp::new(store).is_err());
    }

    #[test]
    fn reset_clears_the_namespace() {
        let (mut app, clock) = app();
        app.add("a").unwrap();
        clock.advance(1_000);
        assert!(app.reset() >= 2);
        assert!(app.tasks().is_empty());
        assert_eq!(app.store().backend().keys().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn filters_parse_from_their_names() {
        assert_eq!("active".parse::<Filter>(), Ok(Filter::Active));
        assert!("done".parse::<Filter>().is_err());
        assert_eq!(Filter::Completed.to_string(), "completed");
    }
}
