//! Task queries.

use chrono::{Duration, Utc};
use rusqlite::Connection;
use stowage_common::{Error, Result, Task, TaskId, TaskStatus, DEFAULT_TASK_TIME_TO_LIVE_HOURS};

use super::{parse_column, parse_json, parse_optional_timestamp, parse_timestamp};

/// Filter options for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub owner: Option<String>,
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub limit: Option<u32>,
}

const TASK_COLUMNS: &str = "id, task_type, status, owner, input, result, message, expires_at,
     created_at, updated_at";

/// Parse a task from a database row.
///
/// The time-to-live is not persisted; loaded tasks carry the default.
fn parse_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let result: Option<String> = row.get(5)?;
    let result = match result {
        Some(_) => Some(parse_json(row, 5)?),
        None => None,
    };

    Ok(Task {
        task_id: parse_column(row, 0)?,
        task_type: row.get(1)?,
        status: parse_column(row, 2)?,
        owner: row.get(3)?,
        input: parse_json(row, 4)?,
        result,
        message: row.get(6)?,
        expires_at: parse_optional_timestamp(row, 7)?,
        created_at: parse_timestamp(row, 8)?,
        updated_at: parse_timestamp(row, 9)?,
        time_to_live: Duration::hours(DEFAULT_TASK_TIME_TO_LIVE_HOURS),
    })
}

fn encode_json(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::database(e.to_string()))
}

/// Insert a new task.
///
/// # Returns
///
/// * `Ok(TaskId)` - The ID of the inserted task
/// * `Err(Error)` - If a database error occurs
pub fn insert_task(conn: &Connection, task: &Task) -> Result<TaskId> {
    let result = task.result.as_ref().map(encode_json).transpose()?;

    conn.execute(
        &format!(
            "INSERT INTO tasks ({})
             VALUES (:id, :task_type, :status, :owner, :input, :result, :message, :expires_at,
                     :created_at, :updated_at)",
            TASK_COLUMNS
        ),
        rusqlite::named_params! {
            ":id": task.task_id.to_string(),
            ":task_type": &task.task_type,
            ":status": task.status.to_string(),
            ":owner": &task.owner,
            ":input": encode_json(&task.input)?,
            ":result": result,
            ":message": &task.message,
            ":expires_at": task.expires_at.map(|t| t.to_rfc3339()),
            ":created_at": task.created_at.to_rfc3339(),
            ":updated_at": task.updated_at.to_rfc3339(),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(task.task_id)
}

/// Update a live task's mutable fields.
pub fn update_task(conn: &Connection, task: &Task) -> Result<()> {
    let result = task.result.as_ref().map(encode_json).transpose()?;

    let rows = conn
        .execute(
            "UPDATE tasks SET status = :status, result = :result, message = :message,
                    expires_at = :expires_at, updated_at = :updated_at
             WHERE id = :id AND deleted = 0",
            rusqlite::named_params! {
                ":id": task.task_id.to_string(),
                ":status": task.status.to_string(),
                ":result": result,
                ":message": &task.message,
                ":expires_at": task.expires_at.map(|t| t.to_rfc3339()),
                ":updated_at": task.updated_at.to_rfc3339(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if rows == 0 {
        return Err(Error::not_found(format!(
            "No task found with ID {}",
            task.task_id
        )));
    }

    Ok(())
}

/// Get a live task by ID.
pub fn get_task(conn: &Connection, id: TaskId) -> Result<Option<Task>> {
    let result = conn.query_row(
        &format!(
            "SELECT {} FROM tasks WHERE id = :id AND deleted = 0",
            TASK_COLUMNS
        ),
        rusqlite::named_params! { ":id": id.to_string() },
        parse_task_row,
    );

    match result {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List live tasks matching a filter, oldest first.
pub fn list_tasks(conn: &Connection, filter: &TaskFilter) -> Result<Vec<Task>> {
    let mut query = format!("SELECT {} FROM tasks WHERE deleted = 0", TASK_COLUMNS);

    if filter.owner.is_some() {
        query.push_str(" AND owner = :owner");
    }
    if filter.status.is_some() {
        query.push_str(" AND status = :status");
    }
    if filter.task_type.is_some() {
        query.push_str(" AND task_type = :task_type");
    }
    query.push_str(" ORDER BY created_at, id LIMIT :limit");

    let limit = filter.limit.map(i64::from).unwrap_or(-1);
    let status = filter.status.map(|s| s.to_string());

    let mut params: Vec<(&str, &dyn rusqlite::ToSql)> = vec![(":limit", &limit)];
    if let Some(ref owner) = filter.owner {
        params.push((":owner", owner));
    }
    if let Some(ref status) = status {
        params.push((":status", status));
    }
    if let Some(ref task_type) = filter.task_type {
        params.push((":task_type", task_type));
    }

    let mut stmt = conn
        .prepare(&query)
        .map_err(|e| Error::database(e.to_string()))?;

    let tasks = stmt
        .query_map(&*params, parse_task_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(tasks)
}

/// Soft-delete a task.
///
/// # Returns
///
/// * `Ok(true)` - If a live task was deleted
/// * `Ok(false)` - If no live task had this ID
pub fn delete_task(conn: &Connection, id: TaskId) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let rows = conn
        .execute(
            "UPDATE tasks SET deleted = 1, deleted_at = :now, updated_at = :now
             WHERE id = :id AND deleted = 0",
            rusqlite::named_params! { ":id": id.to_string(), ":now": now },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use serde_json::json;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn import_task(owner: &str) -> Task {
        Task::new(
            "import",
            Some(owner.into()),
            json!({"import_from": "http://example.com/cirros.img"}),
            Duration::hours(48),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_get_task() {
        let conn = setup();
        let task = import_task("tenant-a");
        let id = insert_task(&conn, &task).unwrap();

        let loaded = get_task(&conn, id).unwrap().unwrap();
        assert_eq!(loaded.task_type, "import");
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.input, task.input);
        assert!(loaded.result.is_none());
    }

    #[test]
    fn test_update_task_result() {
        let conn = setup();
        let mut task = import_task("tenant-a");
        insert_task(&conn, &task).unwrap();

        task.begin_processing().unwrap();
        task.succeed(json!({"image_id": "abc"})).unwrap();
        update_task(&conn, &task).unwrap();

        let loaded = get_task(&conn, task.task_id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Success);
        assert_eq!(loaded.result, Some(json!({"image_id": "abc"})));
        assert!(loaded.expires_at.is_some());
    }

    #[test]
    fn test_list_and_delete_tasks() {
        let conn = setup();
        let a = import_task("tenant-a");
        let b = import_task("tenant-b");
        insert_task(&conn, &a).unwrap();
        insert_task(&conn, &b).unwrap();

        let owned = list_tasks(
            &conn,
            &TaskFilter {
                owner: Some("tenant-b".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].task_id, b.task_id);

        assert!(delete_task(&conn, a.task_id).unwrap());
        assert!(get_task(&conn, a.task_id).unwrap().is_none());
        assert_eq!(list_tasks(&conn, &TaskFilter::default()).unwrap().len(), 1);
    }
}
