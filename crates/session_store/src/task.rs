//! Long-running tool-call tracking within a session (spec.md §4.10
//! "Task Store"): create, transition, and fetch the terminal result of a
//! task, plus cursor-paged listing.

use std::collections::VecDeque;

use parking_lot::Mutex;
use sheet_errors::ErrorMetadata;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Working,
    InputRequired,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// The transitions spec.md §4.10 allows: `working` can ask for input or
    /// reach any terminal state, `input_required` can only resume to
    /// `working` or give up as `cancelled`, and terminal states are final.
    fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Working => matches!(next, InputRequired | Completed | Failed | Cancelled),
            InputRequired => matches!(next, Working | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub id: TaskId,
    pub tool: String,
    pub status: TaskStatus,
    pub message: Option<String>,
}

struct Task {
    tool: String,
    status: TaskStatus,
    message: Option<String>,
    result: Option<serde_json::Value>,
    cancel_token: CancellationToken,
}

const PAGE_SIZE: usize = 50;

/// Tasks in creation order, newest-first on listing. `order` doubles as the
/// eviction-free backing list; tasks are never dropped by this store on
/// their own (a session's lifetime bounds them).
pub struct TaskStore {
    tasks: Mutex<std::collections::HashMap<TaskId, Task>>,
    order: Mutex<VecDeque<TaskId>>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self { tasks: Mutex::new(std::collections::HashMap::new()), order: Mutex::new(VecDeque::new()) }
    }

    pub fn create_task(&self, tool: impl Into<String>) -> TaskId {
        let id = TaskId::new();
        let task = Task {
            tool: tool.into(),
            status: TaskStatus::Working,
            message: None,
            result: None,
            cancel_token: CancellationToken::new(),
        };
        self.tasks.lock().insert(id.clone(), task);
        self.order.lock().push_back(id.clone());
        sheet_metrics::session_store::log_task_created();
        id
    }

    pub fn update_status(&self, id: &TaskId, next: TaskStatus, message: Option<String>) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(id).ok_or_else(|| anyhow::anyhow!(ErrorMetadata::not_found(format!("task {id} not found"))))?;
        if !task.status.can_transition_to(next) {
            anyhow::bail!(ErrorMetadata::invalid_params(format!("task {id} cannot move from {:?} to {next:?}", task.status)));
        }
        task.status = next;
        task.message = message;
        if next == TaskStatus::Cancelled {
            task.cancel_token.cancel();
            sheet_metrics::session_store::log_task_cancelled();
        }
        Ok(())
    }

    /// Stores a terminal result. `final_status` must itself be a terminal
    /// state reachable from the task's current one.
    pub fn store_result(&self, id: &TaskId, final_status: TaskStatus, result: serde_json::Value) -> anyhow::Result<()> {
        if !final_status.is_terminal() {
            anyhow::bail!(ErrorMetadata::invalid_params("store_result requires a terminal status"));
        }
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(id).ok_or_else(|| anyhow::anyhow!(ErrorMetadata::not_found(format!("task {id} not found"))))?;
        if !task.status.can_transition_to(final_status) {
            anyhow::bail!(ErrorMetadata::invalid_params(format!("task {id} cannot move from {:?} to {final_status:?}", task.status)));
        }
        task.status = final_status;
        task.result = Some(result);
        if final_status == TaskStatus::Cancelled {
            task.cancel_token.cancel();
        }
        Ok(())
    }

    pub fn get_result(&self, id: &TaskId) -> Option<serde_json::Value> {
        self.tasks.lock().get(id).and_then(|task| task.result.clone())
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.lock().get(id).map(|task| task.status)
    }

    /// Marks the task cancelled regardless of whether the caller holds its
    /// own terminal status already, and signals `is_task_cancelled` /
    /// anything awaiting the task's cancellation token.
    pub fn cancel_task(&self, id: &TaskId, reason: impl Into<String>) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(id).ok_or_else(|| anyhow::anyhow!(ErrorMetadata::not_found(format!("task {id} not found"))))?;
        if task.status.is_terminal() {
            anyhow::bail!(ErrorMetadata::conflict(format!("task {id} already in terminal state {:?}", task.status)));
        }
        task.status = TaskStatus::Cancelled;
        task.message = Some(reason.into());
        task.cancel_token.cancel();
        sheet_metrics::session_store::log_task_cancelled();
        Ok(())
    }

    pub fn is_task_cancelled(&self, id: &TaskId) -> bool {
        self.tasks.lock().get(id).is_some_and(|task| task.cancel_token.is_cancelled())
    }

    /// Newest-first, 50 per page. `cursor` is the offset into the
    /// newest-first ordering that the next page should start at.
    pub fn list_tasks(&self, cursor: Option<usize>) -> (Vec<TaskSummary>, Option<usize>) {
        let order = self.order.lock();
        let tasks = self.tasks.lock();
        let newest_first: Vec<&TaskId> = order.iter().rev().collect();
        let start = cursor.unwrap_or(0);
        let page: Vec<TaskSummary> = newest_first
            .iter()
            .skip(start)
            .take(PAGE_SIZE)
            .filter_map(|id| {
                tasks.get(id).map(|task| TaskSummary {
                    id: (*id).clone(),
                    tool: task.tool.clone(),
                    status: task.status,
                    message: task.message.clone(),
                })
            })
            .collect();
        let next_cursor = if start + page.len() < newest_first.len() { Some(start + page.len()) } else { None };
        (page, next_cursor)
    }
}
