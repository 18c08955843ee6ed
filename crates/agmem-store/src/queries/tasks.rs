use agmem_types::{Result, Task, TaskAgent, TaskStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};

const TASK_COLUMNS: &str = "task_id, objective, task_type, status, created_branch, created_at";
const AGENT_COLUMNS: &str = "task_id, agent_id, assigned_branch, role, joined_at, left_at";

fn raw_task(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn build_task(
    (task_id, objective, task_type, status, created_branch, created_at): (
        String,
        String,
        String,
        String,
        String,
        String,
    ),
) -> Result<Task> {
    Ok(Task {
        task_id,
        objective,
        task_type,
        status: TaskStatus::parse(&status)?,
        created_branch,
        created_at: parse_ts(&created_at)?,
    })
}

fn raw_agent(
    row: &Row<'_>,
) -> rusqlite::Result<(String, String, String, Option<String>, String, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn build_agent(
    (task_id, agent_id, assigned_branch, role, joined_at, left_at): (
        String,
        String,
        String,
        Option<String>,
        String,
        Option<String>,
    ),
) -> Result<TaskAgent> {
    Ok(TaskAgent {
        task_id,
        agent_id,
        assigned_branch,
        role,
        joined_at: parse_ts(&joined_at)?,
        left_at: left_at.as_deref().map(parse_ts).transpose()?,
    })
}

pub fn insert(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tasks (task_id, objective, task_type, status, created_branch, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            &task.task_id,
            &task.objective,
            &task.task_type,
            task.status.as_str(),
            &task.created_branch,
            to_ts(task.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"))
        .map_err(db_err)?;

    let mut rows = stmt.query([task_id]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build_task(raw_task(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

pub fn set_status(conn: &Connection, task_id: &str, status: TaskStatus) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE tasks SET status = ?2 WHERE task_id = ?1",
            params![task_id, status.as_str()],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}

pub fn insert_agent(conn: &Connection, agent: &TaskAgent) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO task_agents (task_id, agent_id, assigned_branch, role, joined_at, left_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            &agent.task_id,
            &agent.agent_id,
            &agent.assigned_branch,
            &agent.role,
            to_ts(agent.joined_at),
            agent.left_at.map(to_ts),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get_agent(conn: &Connection, task_id: &str, agent_id: &str) -> Result<Option<TaskAgent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {AGENT_COLUMNS} FROM task_agents WHERE task_id = ?1 AND agent_id = ?2"
        ))
        .map_err(db_err)?;

    let mut rows = stmt.query(params![task_id, agent_id]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build_agent(raw_agent(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

pub fn list_agents(conn: &Connection, task_id: &str) -> Result<Vec<TaskAgent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {AGENT_COLUMNS} FROM task_agents WHERE task_id = ?1 ORDER BY joined_at, agent_id"
        ))
        .map_err(db_err)?;

    let rows = stmt
        .query_map([task_id], raw_agent)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    rows.into_iter().map(build_agent).collect()
}

pub fn mark_agent_left(
    conn: &Connection,
    task_id: &str,
    agent_id: &str,
    left_at: DateTime<Utc>,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE task_agents SET left_at = ?3
             WHERE task_id = ?1 AND agent_id = ?2 AND left_at IS NULL",
            params![task_id, agent_id, to_ts(left_at)],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}
