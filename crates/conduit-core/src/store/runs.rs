//! Run Store: run lifecycle persistence and the append-only event log.
//!
//! Grounded in `storage::sessions::SessionManager`'s rusqlite CRUD idiom —
//! `conn().execute(...)`/`prepare()`/`query_map()`, JSON-serialized content
//! columns, `QueryReturnedNoRows` mapped to `Ok(None)`. `update_run`'s
//! optional-field patch semantics (including the `pending_tool_call`
//! clear-sentinel) follow `original_source/app/core/run_store.py::update_run`.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::model::{PendingToolCall, Run, RunEvent, RunPatch, RunStatus, StepRecord, ToolCallRecord};

use super::database::Database;

pub struct RunStore {
    db: Mutex<Database>,
}

impl RunStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(Database::new(path)?))
    }

    pub fn create_run(
        &self,
        goal: &str,
        agent_profile_id: &str,
        context: &std::collections::HashMap<String, Value>,
        request_id: Option<&str>,
        stream_tokens: bool,
    ) -> Result<Run> {
        let run = Run {
            run_id: uuid::Uuid::new_v4().to_string(),
            goal: goal.to_string(),
            agent_profile_id: agent_profile_id.to_string(),
            status: RunStatus::Pending,
            context: context.clone(),
            steps: Vec::new(),
            tool_calls: Vec::new(),
            stream_tokens,
            pending_tool_call: None,
            checkpoint_step_index: None,
            answer: None,
            error: None,
            request_id: request_id.map(|s| s.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };

        let db = self.db.lock();
        db.conn()
            .execute(
                "INSERT INTO runs (
                    run_id, goal, agent_profile_id, status, context, steps,
                    tool_calls, stream_tokens, pending_tool_call, checkpoint_step_index,
                    answer, error, request_id, created_at, updated_at, completed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    run.run_id,
                    run.goal,
                    run.agent_profile_id,
                    run.status.as_str(),
                    serde_json::to_string(&run.context).unwrap(),
                    serde_json::to_string(&run.steps).unwrap(),
                    serde_json::to_string(&run.tool_calls).unwrap(),
                    run.stream_tokens,
                    None::<String>,
                    None::<i64>,
                    run.answer,
                    run.error,
                    run.request_id,
                    run.created_at.to_rfc3339(),
                    run.updated_at.to_rfc3339(),
                    None::<String>,
                ],
            )
            .map_err(EngineError::Store)?;
        Ok(run)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let db = self.db.lock();
        db.conn()
            .query_row(
                "SELECT run_id, goal, agent_profile_id, status, context, steps,
                        tool_calls, stream_tokens, pending_tool_call, checkpoint_step_index,
                        answer, error, request_id, created_at, updated_at, completed_at
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                row_to_run,
            )
            .optional()
            .map_err(EngineError::Store)
    }

    pub fn require_run(&self, run_id: &str) -> Result<Run> {
        self.get_run(run_id)?
            .ok_or_else(|| EngineError::NotFound(run_id.to_string()))
    }

    pub fn list_runs(&self, status: Option<RunStatus>, limit: u32, offset: u32) -> Result<Vec<Run>> {
        let db = self.db.lock();
        let sql = match status {
            Some(_) => {
                "SELECT run_id, goal, agent_profile_id, status, context, steps,
                        tool_calls, stream_tokens, pending_tool_call, checkpoint_step_index,
                        answer, error, request_id, created_at, updated_at, completed_at
                 FROM runs WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
            }
            None => {
                "SELECT run_id, goal, agent_profile_id, status, context, steps,
                        tool_calls, stream_tokens, pending_tool_call, checkpoint_step_index,
                        answer, error, request_id, created_at, updated_at, completed_at
                 FROM runs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
            }
        };
        let mut stmt = db.conn().prepare(sql).map_err(EngineError::Store)?;
        let rows = match status {
            Some(s) => stmt.query_map(params![s.as_str(), limit, offset], row_to_run),
            None => stmt.query_map(params![limit, offset], row_to_run),
        }
        .map_err(EngineError::Store)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(EngineError::Store)
    }

    /// Counts runs currently in `running` state, used by the webhook
    /// intake's concurrency cap.
    pub fn count_running(&self) -> Result<usize> {
        let db = self.db.lock();
        let n: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM runs WHERE status = ?1",
                params![RunStatus::Running.as_str()],
                |r| r.get(0),
            )
            .map_err(EngineError::Store)?;
        Ok(n as usize)
    }

    /// Patches a subset of a run's fields. Only `Some` fields in `patch`
    /// are written, with `clear_pending_tool_call` as the distinguished
    /// sentinel for setting `pending_tool_call` back to `NULL` (merely
    /// leaving `patch.pending_tool_call` as `None` leaves the column
    /// untouched).
    pub fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<()> {
        let db = self.db.lock();
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = patch.status {
            sets.push(format!("status = ?{}", sets.len() + 1));
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(error) = &patch.error {
            sets.push(format!("error = ?{}", sets.len() + 1));
            values.push(Box::new(error.clone()));
        }
        if let Some(answer) = &patch.answer {
            sets.push(format!("answer = ?{}", sets.len() + 1));
            values.push(Box::new(answer.clone()));
        }
        if let Some(steps) = &patch.steps {
            sets.push(format!("steps = ?{}", sets.len() + 1));
            values.push(Box::new(serde_json::to_string(steps).unwrap()));
        }
        if let Some(tool_calls) = &patch.tool_calls {
            sets.push(format!("tool_calls = ?{}", sets.len() + 1));
            values.push(Box::new(serde_json::to_string(tool_calls).unwrap()));
        }
        if let Some(completed_at) = patch.completed_at {
            sets.push(format!("completed_at = ?{}", sets.len() + 1));
            values.push(Box::new(completed_at.to_rfc3339()));
        }
        if let Some(checkpoint) = patch.checkpoint_step_index {
            sets.push(format!("checkpoint_step_index = ?{}", sets.len() + 1));
            values.push(Box::new(checkpoint));
        }
        if patch.clear_pending_tool_call {
            sets.push(format!("pending_tool_call = ?{}", sets.len() + 1));
            values.push(Box::new(None::<String>));
        } else if let Some(pending) = &patch.pending_tool_call {
            sets.push(format!("pending_tool_call = ?{}", sets.len() + 1));
            values.push(Box::new(serde_json::to_string(pending).unwrap()));
        }

        if sets.is_empty() {
            return Ok(());
        }

        sets.push(format!("updated_at = ?{}", sets.len() + 1));
        values.push(Box::new(Utc::now().to_rfc3339()));

        let run_id_param_idx = sets.len() + 1;
        let sql = format!(
            "UPDATE runs SET {} WHERE run_id = ?{}",
            sets.join(", "),
            run_id_param_idx
        );
        values.push(Box::new(run_id.to_string()));

        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let n = db
            .conn()
            .execute(&sql, param_refs.as_slice())
            .map_err(EngineError::Store)?;
        if n == 0 {
            return Err(EngineError::NotFound(run_id.to_string()));
        }
        Ok(())
    }

    pub fn append_event(&self, run_id: &str, event_type: &str, payload: Value) -> Result<i64> {
        let db = self.db.lock();
        db.conn()
            .execute(
                "INSERT INTO run_events (run_id, event_type, payload) VALUES (?1, ?2, ?3)",
                params![run_id, event_type, serde_json::to_string(&payload).unwrap()],
            )
            .map_err(EngineError::Store)?;
        Ok(db.conn().last_insert_rowid())
    }

    pub fn get_events(&self, run_id: &str, after_id: Option<i64>, limit: u32) -> Result<Vec<RunEvent>> {
        let db = self.db.lock();
        let sql = match after_id {
            Some(_) => {
                "SELECT event_id, run_id, event_type, payload FROM run_events
                 WHERE run_id = ?1 AND event_id > ?2 ORDER BY event_id ASC LIMIT ?3"
            }
            None => {
                "SELECT event_id, run_id, event_type, payload FROM run_events
                 WHERE run_id = ?1 ORDER BY event_id ASC LIMIT ?2"
            }
        };
        let mut stmt = db.conn().prepare(sql).map_err(EngineError::Store)?;
        let rows = match after_id {
            Some(after) => stmt.query_map(params![run_id, after, limit], row_to_event),
            None => stmt.query_map(params![run_id, limit], row_to_event),
        }
        .map_err(EngineError::Store)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(EngineError::Store)
    }
}

fn row_to_run(row: &Row) -> rusqlite::Result<Run> {
    let status_str: String = row.get("status")?;
    let context_str: String = row.get("context")?;
    let steps_str: String = row.get("steps")?;
    let tool_calls_str: String = row.get("tool_calls")?;
    let pending_str: Option<String> = row.get("pending_tool_call")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    let steps: Vec<StepRecord> = serde_json::from_str(&steps_str).unwrap_or_default();
    let tool_calls: Vec<ToolCallRecord> = serde_json::from_str(&tool_calls_str).unwrap_or_default();
    let context = serde_json::from_str(&context_str).unwrap_or_default();
    let stream_tokens: bool = row.get("stream_tokens")?;
    let pending_tool_call: Option<PendingToolCall> =
        pending_str.and_then(|s| serde_json::from_str(&s).ok());

    Ok(Run {
        run_id: row.get("run_id")?,
        goal: row.get("goal")?,
        agent_profile_id: row.get("agent_profile_id")?,
        status: RunStatus::parse(&status_str).unwrap_or(RunStatus::Failed),
        context,
        steps,
        tool_calls,
        stream_tokens,
        pending_tool_call,
        checkpoint_step_index: row
            .get::<_, Option<i64>>("checkpoint_step_index")?
            .map(|v| v as u32),
        answer: row.get("answer")?,
        error: row.get("error")?,
        request_id: row.get("request_id")?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .unwrap()
            .with_timezone(&Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .unwrap()
            .with_timezone(&Utc),
        completed_at: completed_at.map(|s| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .unwrap()
                .with_timezone(&Utc)
        }),
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<RunEvent> {
    let payload_str: String = row.get("payload")?;
    Ok(RunEvent {
        event_id: row.get("event_id")?,
        run_id: row.get("run_id")?,
        event_type: row.get("event_type")?,
        payload: serde_json::from_str(&payload_str).unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn store() -> RunStore {
        RunStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn create_and_get_round_trip() {
        let s = store();
        let run = s
            .create_run("diagnose latency spike", "default", &HashMap::new(), Some("req-1"), false)
            .unwrap();
        let fetched = s.require_run(&run.run_id).unwrap();
        assert_eq!(fetched.goal, "diagnose latency spike");
        assert_eq!(fetched.status, RunStatus::Pending);
        assert!(fetched.steps.is_empty());
    }

    #[test]
    fn missing_run_is_not_found() {
        let s = store();
        assert!(s.get_run("nope").unwrap().is_none());
        assert!(matches!(
            s.require_run("nope").unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[test]
    fn update_run_patches_only_provided_fields() {
        let s = store();
        let run = s.create_run("goal", "default", &HashMap::new(), None, false).unwrap();
        s.update_run(&run.run_id, RunPatch::default().status(RunStatus::Running))
            .unwrap();
        let fetched = s.require_run(&run.run_id).unwrap();
        assert_eq!(fetched.status, RunStatus::Running);
        assert_eq!(fetched.goal, "goal");
        assert!(fetched.answer.is_none());
    }

    #[test]
    fn pending_tool_call_set_then_cleared() {
        let s = store();
        let run = s.create_run("goal", "default", &HashMap::new(), None, false).unwrap();
        let pending = PendingToolCall {
            server_id: "srv".into(),
            tool_name: "lookup".into(),
            arguments: Value::Null,
            step_index: 0,
        };
        s.update_run(
            &run.run_id,
            RunPatch::default()
                .status(RunStatus::AwaitingApproval)
                .pending_tool_call(pending),
        )
        .unwrap();
        let fetched = s.require_run(&run.run_id).unwrap();
        assert!(fetched.pending_tool_call.is_some());

        s.update_run(
            &run.run_id,
            RunPatch::default()
                .status(RunStatus::Running)
                .clear_pending_tool_call(),
        )
        .unwrap();
        let fetched = s.require_run(&run.run_id).unwrap();
        assert!(fetched.pending_tool_call.is_none());
    }

    #[test]
    fn events_are_ordered_and_filterable_by_after_id() {
        let s = store();
        let run = s.create_run("goal", "default", &HashMap::new(), None, false).unwrap();
        let e1 = s.append_event(&run.run_id, "step", Value::Null).unwrap();
        let _e2 = s.append_event(&run.run_id, "step", Value::Null).unwrap();
        let e3 = s.append_event(&run.run_id, "status", Value::Null).unwrap();

        let all = s.get_events(&run.run_id, None, 100).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].event_id, e1);

        let after = s.get_events(&run.run_id, Some(e1), 100).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after.last().unwrap().event_id, e3);
    }

    #[test]
    fn list_runs_filters_by_status() {
        let s = store();
        let r1 = s.create_run("a", "default", &HashMap::new(), None, false).unwrap();
        let _r2 = s.create_run("b", "default", &HashMap::new(), None, false).unwrap();
        s.update_run(&r1.run_id, RunPatch::default().status(RunStatus::Running))
            .unwrap();

        let running = s.list_runs(Some(RunStatus::Running), 20, 0).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].run_id, r1.run_id);

        let all = s.list_runs(None, 20, 0).unwrap();
        assert_eq!(all.len(), 2);
    }
}
