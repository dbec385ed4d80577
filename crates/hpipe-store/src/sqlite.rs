use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error, info};

use hpipe_core::error::{HpipeError, Result};
use hpipe_core::flow::Flow;
use hpipe_core::status::Status;
use hpipe_core::traits::StatusStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS hpipe_task_info (
        instance_id TEXT NOT NULL,
        status TEXT NOT NULL,
        PRIMARY KEY(instance_id)
    );

    CREATE TABLE IF NOT EXISTS hpipe_step_info (
        flow TEXT NOT NULL,
        step TEXT NOT NULL,
        status TEXT NOT NULL,
        PRIMARY KEY(flow, step)
    );";

fn db_err(e: rusqlite::Error) -> HpipeError {
    HpipeError::Database(e.to_string())
}

/// SQLite-backed status ledger.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
}

impl SqliteStatusStore {
    /// Open the ledger at `path`, creating the file and schema on first use.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HpipeError::Database(format!("Failed to create meta directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.bootstrap()?;
        debug!(path = %path.display(), "Status ledger opened");
        Ok(store)
    }

    /// Open a throwaway ledger (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.bootstrap()?;
        Ok(store)
    }

    /// Create whichever ledger tables are missing. Returns `false` when
    /// both were already there. Safe to call repeatedly.
    pub fn bootstrap(&self) -> Result<bool> {
        let conn = self.lock()?;
        let existing: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('hpipe_task_info', 'hpipe_step_info')",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if existing == 2 {
            return Ok(false);
        }

        info!(existing, "Initializing status ledger schema");
        conn.execute_batch(SCHEMA).map_err(|e| {
            error!(error = %e, "Failed to create status ledger schema");
            db_err(e)
        })?;
        Ok(true)
    }

    /// Persisted step statuses for one flow, ordered by step name.
    pub fn step_statuses(&self, flow: &str) -> Result<BTreeMap<String, Status>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT step, status FROM hpipe_step_info WHERE flow = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![flow], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (step, status) = row.map_err(db_err)?;
            out.insert(step, status.parse()?);
        }
        Ok(out)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HpipeError::Database(e.to_string()))
    }
}

impl StatusStore for SqliteStatusStore {
    fn save(&self, flow: &Flow) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| {
            error!(error = %e, "Begin transaction failed");
            db_err(e)
        })?;

        // Dropping `tx` on any early return rolls the whole snapshot back.
        let mut jobs = 0usize;
        for job in flow.jobs() {
            tx.execute(
                "DELETE FROM hpipe_task_info WHERE instance_id = ?1",
                params![job.instance_id],
            )
            .map_err(|e| {
                error!(instance_id = %job.instance_id, error = %e, "Save job failed");
                db_err(e)
            })?;
            tx.execute(
                "INSERT INTO hpipe_task_info (instance_id, status) VALUES (?1, ?2)",
                params![job.instance_id, job.status.as_str()],
            )
            .map_err(|e| {
                error!(instance_id = %job.instance_id, error = %e, "Save job failed");
                db_err(e)
            })?;
            jobs += 1;
        }

        for id in flow.reachable() {
            let step = flow.step(id);
            tx.execute(
                "DELETE FROM hpipe_step_info WHERE flow = ?1 AND step = ?2",
                params![flow.name, step.name],
            )
            .map_err(db_err)?;
            tx.execute(
                "INSERT INTO hpipe_step_info (flow, step, status) VALUES (?1, ?2, ?3)",
                params![flow.name, step.name, step.status.as_str()],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(|e| {
            error!(error = %e, "Commit failed");
            db_err(e)
        })?;
        debug!(flow = %flow.name, jobs, "Flow status saved");
        Ok(())
    }

    fn status_of(&self, instance_id: &str) -> Result<Option<Status>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM hpipe_task_info WHERE instance_id = ?1",
                params![instance_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(|s| s.parse()).transpose()
    }

    fn snapshot(&self) -> Result<BTreeMap<String, Status>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT instance_id, status FROM hpipe_task_info")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (id, status) = row.map_err(db_err)?;
            out.insert(id, status.parse()?);
        }
        Ok(out)
    }

    fn reset(&self, instance_ids: &[String]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut removed = 0;
        for id in instance_ids {
            removed += tx
                .execute(
                    "DELETE FROM hpipe_task_info WHERE instance_id = ?1",
                    params![id],
                )
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpipe_core::flow::{Job, Step};

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("hpipe_store_test_{}", uuid::Uuid::new_v4()))
            .join("hpipe.db")
    }

    fn two_job_flow() -> Flow {
        let mut flow = Flow::new("f");
        let a = flow.add_step(Step::new("a").with_job(Job::new("j1", "f.a.j1", "shell")));
        let b = flow.add_step(
            Step::new("b")
                .with_dep(a)
                .with_job(Job::new("j2", "f.b.j2", "shell")),
        );
        flow.set_entry(b);
        flow
    }

    #[test]
    fn test_save_and_query_round_trip() {
        let store = SqliteStatusStore::in_memory().unwrap();
        let mut flow = two_job_flow();
        let a = flow.step_by_name("a").unwrap();
        let b = flow.step_by_name("b").unwrap();
        flow.step_mut(a).jobs[0].status = Status::Done;
        flow.step_mut(a).status = Status::Done;
        flow.step_mut(b).jobs[0].status = Status::Fail;
        flow.step_mut(b).status = Status::Fail;

        store.save(&flow).unwrap();

        assert_eq!(store.status_of("f.a.j1").unwrap(), Some(Status::Done));
        assert_eq!(store.status_of("f.b.j2").unwrap(), Some(Status::Fail));
        assert_eq!(store.status_of("missing").unwrap(), None);

        let steps = store.step_statuses("f").unwrap();
        assert_eq!(steps.get("a"), Some(&Status::Done));
        assert_eq!(steps.get("b"), Some(&Status::Fail));
    }

    #[test]
    fn test_save_replaces_previous_record() {
        let store = SqliteStatusStore::in_memory().unwrap();
        let mut flow = two_job_flow();
        store.save(&flow).unwrap();
        assert_eq!(store.status_of("f.a.j1").unwrap(), Some(Status::Todo));

        let a = flow.step_by_name("a").unwrap();
        flow.step_mut(a).jobs[0].status = Status::Done;
        store.save(&flow).unwrap();

        assert_eq!(store.status_of("f.a.j1").unwrap(), Some(Status::Done));
        assert_eq!(store.snapshot().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_write_rolls_back_whole_snapshot() {
        let store = SqliteStatusStore::in_memory().unwrap();
        let flow = two_job_flow();
        store.save(&flow).unwrap();

        store
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_j1 BEFORE INSERT ON hpipe_task_info
                 WHEN NEW.instance_id = 'f.a.j1' AND NEW.status = 'DONE'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let mut updated = flow.clone();
        for r in updated.job_refs() {
            updated.job_mut(r).status = Status::Done;
        }
        let err = store.save(&updated).unwrap_err();
        assert!(matches!(err, HpipeError::Database(_)));

        // f.b.j2 belongs to the entry step and is written before the rejected row.
        assert_eq!(store.status_of("f.a.j1").unwrap(), Some(Status::Todo));
        assert_eq!(store.status_of("f.b.j2").unwrap(), Some(Status::Todo));
    }

    #[test]
    fn test_bootstrap_runs_once() {
        let path = temp_path();
        {
            let store = SqliteStatusStore::open(&path).unwrap();
            // second bootstrap is a no-op
            assert!(!store.bootstrap().unwrap());
            let mut flow = two_job_flow();
            let a = flow.step_by_name("a").unwrap();
            flow.step_mut(a).jobs[0].status = Status::Done;
            store.save(&flow).unwrap();
        }

        let reopened = SqliteStatusStore::open(&path).unwrap();
        assert!(!reopened.bootstrap().unwrap());
        assert_eq!(reopened.status_of("f.a.j1").unwrap(), Some(Status::Done));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_bootstrap_adds_step_table_to_task_only_ledger() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE hpipe_task_info(instance_id TEXT PRIMARY KEY, status TEXT);
                 INSERT INTO hpipe_task_info VALUES ('f.a.j1', 'DONE');",
            )
            .unwrap();
        }

        let store = SqliteStatusStore::open(&path).unwrap();
        assert!(!store.bootstrap().unwrap());
        assert_eq!(store.status_of("f.a.j1").unwrap(), Some(Status::Done));

        let mut flow = two_job_flow();
        let a = flow.step_by_name("a").unwrap();
        flow.step_mut(a).jobs[0].status = Status::Done;
        flow.step_mut(a).status = Status::Done;
        store.save(&flow).unwrap();

        assert_eq!(store.status_of("f.b.j2").unwrap(), Some(Status::Todo));
        assert_eq!(store.step_statuses("f").unwrap().get("a"), Some(&Status::Done));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_reset() {
        let store = SqliteStatusStore::in_memory().unwrap();
        store.save(&two_job_flow()).unwrap();

        let removed = store
            .reset(&["f.a.j1".to_string(), "unknown".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.status_of("f.a.j1").unwrap(), None);
        assert!(store.status_of("f.b.j2").unwrap().is_some());
    }
}
