use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OpenFlags, params, params_from_iter};
use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use crate::aggregate::DoctorTable;
use crate::query::{self, BoundQuery};
use crate::schema::ClaimsSchema;

/// Which encounters and service lines feed the derived tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsFilter {
    /// ICD-9 codes of the diagnoses of interest.
    pub diagnosis_codes: Vec<String>,
    /// CPT codes of the procedures of interest.
    pub procedure_codes: Vec<String>,
    /// SQL `LIKE` pattern (e.g. `152.%`) checked against every diagnosis slot.
    pub excluded_diagnoses: Option<String>,
}

/// How a loader scope ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeExit {
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedRowCounts {
    pub diagnosis_rows: u64,
    pub procedure_rows: u64,
}

/// Owns one connection to a claims database for the duration of a scope.
///
/// The connection runs inside a single transaction opened by [`open`]. It is
/// committed or rolled back by [`close`]; a loader dropped without `close`
/// rolls back.
///
/// [`open`]: DiagnosisProceduresLoader::open
/// [`close`]: DiagnosisProceduresLoader::close
pub struct DiagnosisProceduresLoader {
    database_path: PathBuf,
    conn: Option<Connection>,
    filter: ClaimsFilter,
    schema: ClaimsSchema,
}

impl DiagnosisProceduresLoader {
    /// Connect to an existing claims database and begin a transaction.
    ///
    /// Never creates the database file: a missing path or a file that is not
    /// a SQLite database is an error.
    pub fn open(
        database_path: impl AsRef<Path>,
        filter: ClaimsFilter,
        schema: ClaimsSchema,
    ) -> Result<Self> {
        let database_path = database_path.as_ref().to_path_buf();
        schema.validate().context("Invalid claims schema")?;

        let conn = Connection::open_with_flags(
            &database_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed opening claims DB {}", database_path.display()))?;

        // Forces a schema read so a non-database file fails here, not mid-scope.
        let table_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))
            .with_context(|| format!("Failed reading claims DB {}", database_path.display()))?;

        conn.execute_batch("BEGIN")
            .with_context(|| format!("Failed starting transaction on {}", database_path.display()))?;

        tracing::info!(
            "Opened claims DB {} ({} schema objects); diagnosis_codes={} procedure_codes={} excluded={:?}",
            database_path.display(),
            table_count,
            filter.diagnosis_codes.len(),
            filter.procedure_codes.len(),
            filter.excluded_diagnoses
        );

        Ok(Self {
            database_path,
            conn: Some(conn),
            filter,
            schema,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn filter(&self) -> &ClaimsFilter {
        &self.filter
    }

    pub fn schema(&self) -> &ClaimsSchema {
        &self.schema
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| anyhow!("Claims DB {} already closed", self.database_path.display()))
    }

    /// Per-doctor counts of distinct patients diagnosed and distinct diagnosed
    /// patients referred to a qualifying procedure.
    ///
    /// Builds the two derived tables first if they are absent. Existing
    /// derived tables are reused as-is, even if the filter has changed since
    /// they were built; call [`drop_derived_tables`] to rebuild.
    ///
    /// [`drop_derived_tables`]: DiagnosisProceduresLoader::drop_derived_tables
    pub fn doctor_diagnosis_procedure_data(&mut self) -> Result<DoctorTable> {
        self.create_diagnosis_table()?;
        self.create_procedure_table()?;

        let derived = self.derived_row_counts()?;
        tracing::info!(
            "Derived rows: {}={} {}={}",
            self.schema.diagnosis_table,
            derived.diagnosis_rows,
            self.schema.procedure_table,
            derived.procedure_rows
        );

        let operated_on = self
            .per_doctor_counts(&query::count_operated_on(&self.schema))
            .context("count operated-on patients per doctor")?;
        let diagnosed = self
            .per_doctor_counts(&query::count_diagnosed(&self.schema))
            .context("count diagnosed patients per doctor")?;

        let table = DoctorTable::outer_join(diagnosed, operated_on);
        let totals = table.totals();
        tracing::info!(
            "Aggregated {} doctors (num_diagnosed sum={} num_operated_on sum={})",
            table.len(),
            totals.num_diagnosed,
            totals.num_operated_on
        );
        Ok(table)
    }

    fn create_diagnosis_table(&self) -> Result<()> {
        let bound = query::create_diagnosis_table(
            &self.schema,
            &self.filter.diagnosis_codes,
            self.filter.excluded_diagnoses.as_deref(),
        );
        self.ensure_derived_table(&self.schema.diagnosis_table, bound)
    }

    fn create_procedure_table(&self) -> Result<()> {
        let bound = query::create_procedure_table(&self.schema, &self.filter.procedure_codes);
        self.ensure_derived_table(&self.schema.procedure_table, bound)
    }

    fn ensure_derived_table(&self, table: &str, bound: BoundQuery) -> Result<()> {
        let conn = self.conn()?;
        if table_exists(conn, table)? {
            tracing::info!("Derived table {table} already exists; reusing");
            return Ok(());
        }

        tracing::info!("Building {table} ({} bound values)...", bound.params.len());
        let t0 = Instant::now();
        conn.execute(&bound.sql, params_from_iter(bound.params.iter()))
            .with_context(|| format!("Failed building derived table {table}"))?;
        tracing::info!("Built {table} in {:.1}s", t0.elapsed().as_secs_f64());
        Ok(())
    }

    fn per_doctor_counts(&self, sql: &str) -> Result<Vec<(String, u64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map([], |row| {
            let doctor_id: String = row.get(0)?;
            let n: i64 = row.get(1)?;
            Ok((doctor_id, n.max(0) as u64))
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        tracing::debug!("{} doctors from aggregate query", out.len());
        Ok(out)
    }

    /// Row counts of both derived tables. Errors if either has not been built.
    pub fn derived_row_counts(&self) -> Result<DerivedRowCounts> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn
                .prepare_cached(&query::count_rows(table))?
                .query_row([], |row| row.get(0))
                .with_context(|| format!("Failed counting rows of {table}"))?;
            Ok(n.max(0) as u64)
        };
        Ok(DerivedRowCounts {
            diagnosis_rows: count(&self.schema.diagnosis_table)?,
            procedure_rows: count(&self.schema.procedure_table)?,
        })
    }

    /// Drop both derived tables so the next aggregate call rebuilds them from
    /// the current filter. Takes effect only if the scope commits.
    pub fn drop_derived_tables(&mut self) -> Result<()> {
        let conn = self.conn()?;
        // Cached statements may reference the tables being dropped.
        conn.flush_prepared_statement_cache();
        for table in [&self.schema.diagnosis_table, &self.schema.procedure_table] {
            conn.execute(&query::drop_table(table), [])
                .with_context(|| format!("Failed dropping derived table {table}"))?;
            tracing::info!("Dropped derived table {table}");
        }
        Ok(())
    }

    /// End the scope: release statements, commit or roll back, close the connection.
    pub fn close(mut self, exit: ScopeExit) -> Result<()> {
        let conn = self.conn.take().ok_or_else(|| {
            anyhow!("Claims DB {} already closed", self.database_path.display())
        })?;
        finish(conn, exit, &self.database_path)
    }
}

impl Drop for DiagnosisProceduresLoader {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                "Claims loader for {} dropped without close; rolling back",
                self.database_path.display()
            );
            if let Err(err) = finish(conn, ScopeExit::Rollback, &self.database_path) {
                tracing::warn!("{err:#}");
            }
        }
    }
}

fn finish(conn: Connection, exit: ScopeExit, database_path: &Path) -> Result<()> {
    conn.flush_prepared_statement_cache();

    let end_sql = match exit {
        ScopeExit::Commit => "COMMIT",
        ScopeExit::Rollback => "ROLLBACK",
    };
    let ended = conn
        .execute_batch(end_sql)
        .with_context(|| format!("Failed {end_sql} on {}", database_path.display()));
    if ended.is_ok() {
        tracing::info!("{end_sql} on {}", database_path.display());
    }

    // SQLite rolls back whatever is still open when the handle closes.
    let closed = conn
        .close()
        .map_err(|(_, err)| err)
        .with_context(|| format!("Failed closing claims DB {}", database_path.display()));

    ended?;
    closed
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
    )?;
    let count: i64 = stmt.query_row(params![name], |row| row.get(0))?;
    Ok(count > 0)
}

/// Run `scope` against a freshly opened loader.
///
/// An `Ok` from the scope commits, an `Err` rolls back; either way the
/// connection is closed before returning. A panic in the scope rolls back
/// while unwinding.
pub fn with_loader<T, F>(
    database_path: impl AsRef<Path>,
    filter: ClaimsFilter,
    schema: ClaimsSchema,
    scope: F,
) -> Result<T>
where
    F: FnOnce(&mut DiagnosisProceduresLoader) -> Result<T>,
{
    let mut loader = DiagnosisProceduresLoader::open(database_path, filter, schema)?;
    let outcome = scope(&mut loader);
    let exit = if outcome.is_ok() {
        ScopeExit::Commit
    } else {
        ScopeExit::Rollback
    };
    let closed = loader.close(exit);

    match outcome {
        Ok(value) => closed.map(|()| value),
        Err(err) => {
            if let Err(close_err) = closed {
                tracing::warn!("{close_err:#}");
            }
            Err(err)
        }
    }
}
