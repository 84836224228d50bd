//! Durable, resumable task batches.
//!
//! A [`DurableTaskList`] holds an ordered run of task descriptors plus a
//! cursor marking the next one to execute. The list is persisted with an
//! atomic write before every execution, so a process that dies mid-batch
//! can reload the file and pick up from the exact task it was about to run.

mod file;
mod task;

pub mod codec;

pub use file::StorePath;
pub use task::{StoredTask, TaskError};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{trace, warn};

use crate::error::StoreError;
use crate::signal::lock_ignore_poison;

/// Result of a [`DurableTaskList::run`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task from the cursor to the end of the list ran.
    Completed,
    /// The task at `index` failed; the cursor still points at it.
    Halted {
        /// Position of the failing task.
        index: usize,
        /// Rendered failure, either the task's error or its panic message.
        error: String,
    },
}

impl RunOutcome {
    /// True if the batch reached the end of the list.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug)]
struct ListState<D> {
    tasks: Vec<D>,
    cursor: usize,
}

impl<D> ListState<D> {
    fn remove_at(&mut self, index: usize) {
        self.tasks.remove(index);
        let len = self.tasks.len();
        if self.cursor == len {
            self.cursor = len.saturating_sub(1);
        } else if self.cursor > len {
            self.cursor = len;
        }
    }
}

/// Ordered, duplicate-free batch of persisted tasks with a progress cursor.
///
/// Mutations (append, remove, reset, clear, run) take the state lock
/// exclusively; queries and the explicit save/delete operations share it.
/// File writes additionally serialize on an io lock because every save of
/// one list goes through the same temporary path.
#[derive(Debug)]
pub struct DurableTaskList<D: StoredTask> {
    state: RwLock<ListState<D>>,
    path: StorePath,
    io: Mutex<()>,
}

impl<D: StoredTask> DurableTaskList<D> {
    /// Creates an empty list stored at `path`. Nothing is written until the
    /// first save or run.
    pub fn new(path: StorePath) -> Self {
        Self {
            state: RwLock::new(ListState {
                tasks: Vec::new(),
                cursor: 0,
            }),
            path,
            io: Mutex::new(()),
        }
    }

    /// Loads a previously saved list from `path`.
    ///
    /// Returns `Ok(None)` when no file exists there. A file that exists but
    /// cannot be decoded is an error; no partial recovery is attempted.
    pub fn load(path: StorePath) -> Result<Option<Self>, StoreError> {
        let Some(raw) = file::read(&path)? else {
            return Ok(None);
        };
        if raw.name != path.name() {
            warn!(
                stored = %raw.name,
                requested = %path.name(),
                "list file carries a different name, keeping the requested path"
            );
        }

        let mut tasks = Vec::with_capacity(raw.records.len());
        for record in &raw.records {
            tasks.push(D::decode(record)?);
        }
        let cursor = raw.cursor as usize;
        if cursor > tasks.len() {
            return Err(StoreError::Decode(format!(
                "cursor {cursor} out of range for {} tasks",
                tasks.len()
            )));
        }

        Ok(Some(Self {
            state: RwLock::new(ListState { tasks, cursor }),
            path,
            io: Mutex::new(()),
        }))
    }

    /// Location this list persists to.
    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Index of the next task to execute.
    pub fn cursor(&self) -> usize {
        self.read_state().cursor
    }

    /// Number of tasks in the list.
    pub fn len(&self) -> usize {
        self.read_state().tasks.len()
    }

    /// True if the list holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.read_state().tasks.is_empty()
    }

    /// True once the cursor has moved past the last task.
    pub fn is_finished(&self) -> bool {
        let state = self.read_state();
        state.cursor == state.tasks.len()
    }

    /// The task the cursor points at, if any.
    pub fn current(&self) -> Option<D> {
        let state = self.read_state();
        state.tasks.get(state.cursor).cloned()
    }

    /// Snapshot of the task sequence in list order.
    pub fn tasks(&self) -> Vec<D> {
        self.read_state().tasks.clone()
    }

    /// True if a task with the given identity is present.
    pub fn contains(&self, id: &D::Id) -> bool {
        self.read_state().tasks.iter().any(|task| &task.id() == id)
    }

    /// Appends a task unless one with the same identity is already present.
    ///
    /// Returns whether the task was added. The list is not persisted here;
    /// call [`save`](Self::save) or [`run`](Self::run) for that.
    pub fn append(&self, task: D) -> bool {
        let mut state = self.write_state();
        let id = task.id();
        if state.tasks.iter().any(|existing| existing.id() == id) {
            return false;
        }
        state.tasks.push(task);
        true
    }

    /// Removes the task with the given identity. Returns whether one was
    /// found.
    pub fn remove_task(&self, id: &D::Id) -> bool {
        let mut state = self.write_state();
        let Some(index) = state.tasks.iter().position(|task| &task.id() == id) else {
            return false;
        };
        state.remove_at(index);
        true
    }

    /// Removes the task at `index`. Returns false if out of range.
    pub fn remove_at(&self, index: usize) -> bool {
        let mut state = self.write_state();
        if index >= state.tasks.len() {
            return false;
        }
        state.remove_at(index);
        true
    }

    /// Moves the cursor back to the start without touching the tasks.
    pub fn reset(&self) {
        self.write_state().cursor = 0;
    }

    /// Drops every task and resets the cursor.
    pub fn clear(&self) {
        let mut state = self.write_state();
        state.tasks.clear();
        state.cursor = 0;
    }

    /// Executes tasks from the cursor to the end of the list.
    ///
    /// The full list is persisted before each execution, so after a crash
    /// the on-disk cursor points at the task that was in flight; that task
    /// runs again on resume. A failing task halts the batch with the cursor
    /// still on it, and later tasks do not run. Only persistence failures
    /// surface as `Err`.
    pub fn run(&self) -> Result<RunOutcome, StoreError> {
        let mut state = self.write_state();
        while state.cursor < state.tasks.len() {
            self.persist(&state)?;
            let index = state.cursor;
            let task = state.tasks[index].clone();
            if let Err(error) = run_one(&task) {
                warn!(index, %error, "batch halted");
                return Ok(RunOutcome::Halted { index, error });
            }
            state.cursor += 1;
        }
        Ok(RunOutcome::Completed)
    }

    /// Persists the current tasks and cursor.
    pub fn save(&self) -> Result<(), StoreError> {
        let state = self.read_state();
        self.persist(&state)
    }

    /// Removes the canonical file. Returns whether a file existed.
    pub fn delete(&self) -> Result<bool, StoreError> {
        let _state = self.read_state();
        let _io = lock_ignore_poison(&self.io);
        file::delete(&self.path)
    }

    /// Removes a leftover temporary file from an interrupted save.
    pub fn delete_temporary(&self) -> Result<bool, StoreError> {
        let _state = self.read_state();
        let _io = lock_ignore_poison(&self.io);
        file::delete_temporary(&self.path)
    }

    fn persist(&self, state: &ListState<D>) -> Result<(), StoreError> {
        let mut records = Vec::with_capacity(state.tasks.len());
        for task in &state.tasks {
            records.push(task.encode()?);
        }
        let cursor = u32::try_from(state.cursor)
            .map_err(|_| StoreError::Encode("cursor exceeds u32".to_string()))?;

        let _io = lock_ignore_poison(&self.io);
        file::write_atomic(&self.path, &records, cursor)?;
        trace!(
            name = %self.path.name(),
            tasks = records.len(),
            cursor = state.cursor,
            "list persisted"
        );
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ListState<D>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ListState<D>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn set_cursor(&self, cursor: usize) {
        self.write_state().cursor = cursor;
    }
}

/// Runs one task, turning an `Err` return or a panic into a rendered message.
fn run_one<D: StoredTask>(task: &D) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(error.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    use super::*;

    type RunLog = Arc<Mutex<Vec<String>>>;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct StepTask {
        name: String,
        fail: bool,
        panics: bool,
        #[serde(skip)]
        log: RunLog,
    }

    impl StoredTask for StepTask {
        type Id = String;

        fn id(&self) -> String {
            self.name.clone()
        }

        fn run(&self) -> Result<(), TaskError> {
            self.log.lock().unwrap().push(self.name.clone());
            if self.panics {
                panic!("step {} blew up", self.name);
            }
            if self.fail {
                return Err(format!("step {} failed", self.name).into());
            }
            Ok(())
        }

        fn encode(&self) -> Result<Vec<u8>, StoreError> {
            codec::encode_json(self)
        }

        fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
            codec::decode_json(bytes)
        }
    }

    fn step(name: &str, fail: bool, log: &RunLog) -> StepTask {
        StepTask {
            name: name.to_string(),
            fail,
            panics: false,
            log: Arc::clone(log),
        }
    }

    #[test]
    fn append_ignores_duplicate_identities() {
        let dir = tempdir().unwrap();
        let list = DurableTaskList::new(StorePath::new(dir.path(), "dup.list"));
        let log = RunLog::default();

        assert!(list.append(step("a", false, &log)));
        assert!(list.append(step("b", false, &log)));
        assert!(!list.append(step("a", true, &log)));

        assert_eq!(list.len(), 2);
        assert!(list.contains(&"a".to_string()));
        assert!(!list.contains(&"c".to_string()));
    }

    #[test]
    fn run_executes_in_order_and_completes() {
        let dir = tempdir().unwrap();
        let list = DurableTaskList::new(StorePath::new(dir.path(), "batch.list"));
        let log = RunLog::default();
        for name in ["a", "b", "c"] {
            list.append(step(name, false, &log));
        }

        let outcome = list.run().unwrap();

        assert!(outcome.is_completed());
        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
        assert_eq!(list.cursor(), 3);
        assert!(list.is_finished());
    }

    #[test]
    fn failing_task_halts_with_cursor_on_it() {
        let dir = tempdir().unwrap();
        let list = DurableTaskList::new(StorePath::new(dir.path(), "batch.list"));
        let log = RunLog::default();
        list.append(step("a", false, &log));
        list.append(step("b", false, &log));
        list.append(step("c", true, &log));
        list.append(step("d", false, &log));

        let outcome = list.run().unwrap();

        let RunOutcome::Halted { index, error } = outcome else {
            panic!("expected a halted batch");
        };
        assert_eq!(index, 2);
        assert!(error.contains("step c failed"));
        assert_eq!(list.cursor(), 2);
        assert_eq!(list.current().unwrap().name, "c");

        // dropping the failing step resumes from the same position
        assert!(list.remove_task(&"c".to_string()));
        assert_eq!(list.cursor(), 2);
        assert_eq!(list.run().unwrap(), RunOutcome::Completed);
        assert_eq!(*log.lock().unwrap(), ["a", "b", "c", "d"]);
    }

    #[test]
    fn panicking_task_halts_like_an_error() {
        let dir = tempdir().unwrap();
        let list = DurableTaskList::new(StorePath::new(dir.path(), "batch.list"));
        let log = RunLog::default();
        list.append(step("a", false, &log));
        let mut bomb = step("b", false, &log);
        bomb.panics = true;
        list.append(bomb);

        let outcome = list.run().unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Halted {
                index: 1,
                error: "step b blew up".to_string(),
            }
        );
        assert_eq!(list.cursor(), 1);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = StorePath::new(dir.path(), "batch.list");
        let log = RunLog::default();

        let list = DurableTaskList::new(path.clone());
        for name in ["a", "b", "c"] {
            list.append(step(name, false, &log));
        }
        list.set_cursor(1);
        list.save().unwrap();

        let loaded = DurableTaskList::<StepTask>::load(path).unwrap().unwrap();
        let names: Vec<String> = loaded.tasks().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(loaded.cursor(), 1);
    }

    #[test]
    fn reload_resumes_at_the_persisted_cursor() {
        let dir = tempdir().unwrap();
        let path = StorePath::new(dir.path(), "batch.list");
        let log = RunLog::default();

        let list = DurableTaskList::new(path.clone());
        list.append(step("a", false, &log));
        list.append(step("b", false, &log));
        list.append(step("c", true, &log));
        assert!(matches!(
            list.run().unwrap(),
            RunOutcome::Halted { index: 2, .. }
        ));

        // the file was written just before c ran, so a fresh process sees
        // the cursor parked on the failing step
        let recovered = DurableTaskList::<StepTask>::load(path).unwrap().unwrap();
        assert_eq!(recovered.cursor(), 2);
        assert_eq!(recovered.current().unwrap().name, "c");
        assert!(!recovered.is_finished());
    }

    #[rstest]
    #[case(4, 3, 3, 2)]
    #[case(4, 1, 3, 1)]
    #[case(4, 4, 0, 3)]
    #[case(1, 0, 0, 0)]
    #[case(4, 2, 0, 2)]
    #[case(3, 1, 1, 1)]
    fn removal_clamps_the_cursor(
        #[case] len: usize,
        #[case] cursor: usize,
        #[case] remove: usize,
        #[case] expected: usize,
    ) {
        let dir = tempdir().unwrap();
        let list = DurableTaskList::new(StorePath::new(dir.path(), "clamp.list"));
        let log = RunLog::default();
        for i in 0..len {
            list.append(step(&format!("t{i}"), false, &log));
        }
        list.set_cursor(cursor);

        assert!(list.remove_at(remove));

        assert_eq!(list.cursor(), expected);
        assert_eq!(list.len(), len - 1);
    }

    #[test]
    fn remove_by_identity_reports_presence() {
        let dir = tempdir().unwrap();
        let list = DurableTaskList::new(StorePath::new(dir.path(), "rm.list"));
        let log = RunLog::default();
        list.append(step("a", false, &log));

        assert!(list.remove_task(&"a".to_string()));
        assert!(!list.remove_task(&"a".to_string()));
        assert!(!list.remove_at(5));
        assert!(list.is_empty());
    }

    #[test]
    fn reset_rewinds_and_clear_empties() {
        let dir = tempdir().unwrap();
        let list = DurableTaskList::new(StorePath::new(dir.path(), "reset.list"));
        let log = RunLog::default();
        list.append(step("a", false, &log));
        list.append(step("b", false, &log));
        list.run().unwrap();
        assert!(list.is_finished());

        list.reset();
        assert_eq!(list.cursor(), 0);
        assert!(!list.is_finished());

        list.clear();
        assert!(list.is_empty());
        assert!(list.is_finished());
        assert_eq!(list.cursor(), 0);
    }

    #[test]
    fn loading_a_missing_file_yields_none() {
        let dir = tempdir().unwrap();
        let path = StorePath::new(dir.path(), "absent.list");
        assert!(DurableTaskList::<StepTask>::load(path).unwrap().is_none());
    }

    #[test]
    fn corrupt_records_are_fatal_on_load() {
        let dir = tempdir().unwrap();
        let path = StorePath::new(dir.path(), "bad.list");
        file::write_atomic(&path, &[b"not json".to_vec()], 0).unwrap();

        let err = DurableTaskList::<StepTask>::load(path).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn out_of_range_cursor_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = StorePath::new(dir.path(), "cur.list");
        file::write_atomic(&path, &[], 7).unwrap();

        assert!(matches!(
            DurableTaskList::<StepTask>::load(path),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn renamed_file_still_loads_under_the_new_path() {
        let dir = tempdir().unwrap();
        let old = StorePath::new(dir.path(), "old.list");
        let log = RunLog::default();
        let list = DurableTaskList::new(old.clone());
        list.append(step("a", false, &log));
        list.save().unwrap();

        let new = StorePath::new(dir.path(), "new.list");
        std::fs::rename(old.canonical(), new.canonical()).unwrap();

        let loaded = DurableTaskList::<StepTask>::load(new).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn delete_removes_the_saved_file() {
        let dir = tempdir().unwrap();
        let path = StorePath::new(dir.path(), "del.list");
        let log = RunLog::default();
        let list = DurableTaskList::new(path.clone());
        list.append(step("a", false, &log));
        list.save().unwrap();
        assert!(path.canonical().exists());

        assert!(list.delete().unwrap());
        assert!(!path.canonical().exists());
        assert!(!list.delete().unwrap());
        assert!(DurableTaskList::<StepTask>::load(path).unwrap().is_none());
    }

    #[test]
    fn delete_temporary_cleans_interrupted_saves() {
        let dir = tempdir().unwrap();
        let path = StorePath::new(dir.path(), "tmp.list");
        std::fs::write(path.temporary(), b"half written").unwrap();

        let list = DurableTaskList::<StepTask>::new(path.clone());
        assert!(list.delete_temporary().unwrap());
        assert!(!path.temporary().exists());
        assert!(!list.delete_temporary().unwrap());
    }
}
