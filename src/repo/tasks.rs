use chrono::Duration;
use serde_json::Value;
use stowage_common::{Error, Result, Task, TaskId};
use stowage_db::pool::{get_conn, DbPool};
use stowage_db::queries::tasks;
use tokio::sync::mpsc;

use crate::domain::{TaskExecutor, TaskFactory, TaskFilter, TaskRepo};

/// Tasks persisted in SQLite.
#[derive(Clone)]
pub struct DbTaskRepo {
    pool: DbPool,
    time_to_live: Duration,
}

impl DbTaskRepo {
    pub fn new(pool: DbPool, time_to_live: Duration) -> Self {
        Self { pool, time_to_live }
    }

    fn hydrate(&self, mut task: Task) -> Task {
        task.time_to_live = self.time_to_live;
        task
    }
}

impl TaskRepo for DbTaskRepo {
    type Task = Task;

    fn get(&self, task_id: TaskId) -> Result<Task> {
        let conn = get_conn(&self.pool)?;
        tasks::get_task(&conn, task_id)?
            .map(|task| self.hydrate(task))
            .ok_or_else(|| Error::not_found(format!("No task found with ID {}", task_id)))
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let conn = get_conn(&self.pool)?;
        Ok(tasks::list_tasks(&conn, filter)?
            .into_iter()
            .map(|task| self.hydrate(task))
            .collect())
    }

    fn add(&self, task: &mut Task) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        tasks::insert_task(&conn, task)?;
        Ok(())
    }

    fn save(&self, task: &mut Task) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        tasks::update_task(&conn, task)
    }

    fn remove(&self, task: &mut Task) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        if !tasks::delete_task(&conn, task.task_id)? {
            return Err(Error::not_found(format!(
                "No task found with ID {}",
                task.task_id
            )));
        }
        Ok(())
    }
}

pub struct BaseTaskFactory {
    time_to_live: Duration,
}

impl BaseTaskFactory {
    pub fn new(time_to_live: Duration) -> Self {
        Self { time_to_live }
    }
}

impl TaskFactory for BaseTaskFactory {
    type Task = Task;

    fn new_task(&self, task_type: &str, owner: Option<String>, input: Value) -> Result<Task> {
        Task::new(task_type, owner, input, self.time_to_live)
    }
}

/// Hands task ids to whoever holds the receiving end.
#[derive(Clone)]
pub struct ChannelExecutor {
    tx: mpsc::UnboundedSender<TaskId>,
}

impl ChannelExecutor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TaskExecutor for ChannelExecutor {
    fn begin_processing(&self, task_id: TaskId) -> Result<()> {
        self.tx
            .send(task_id)
            .map_err(|_| Error::internal(format!("Task executor is gone, cannot run {}", task_id)))
    }
}
