use log::{debug, info, warn};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::FixedIssueRecord;

/// SQLite store of [`FixedIssueRecord`]s keyed by `issue_url`.
///
/// Writes go into an open transaction that is committed every
/// `batch_size` inserts and at [`IssueStore::finish_repo`]. Dropping the
/// store without committing rolls the pending batch back.
pub struct IssueStore {
    conn: Connection,
    batch_size: usize,
    pending: usize,
    repo_inserted: usize,
}

impl IssueStore {
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init(conn, batch_size)
    }

    pub fn open_in_memory(batch_size: usize) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, batch_size)
    }

    fn init(conn: Connection, batch_size: usize) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS fixed_issues (
                issue_url TEXT PRIMARY KEY,
                repo_name TEXT,
                pull_request_url TEXT,
                languages TEXT,
                before_code_url TEXT,
                after_code_url TEXT,
                affected_files TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_fixed_issues_repo ON fixed_issues(repo_name);
            ",
        )?;

        Ok(Self {
            conn,
            batch_size: batch_size.max(1),
            pending: 0,
            repo_inserted: 0,
        })
    }

    /// Start counting inserts for a new repository.
    pub fn begin_repo(&mut self) {
        self.repo_inserted = 0;
    }

    /// Insert the record unless its `issue_url` is already stored.
    /// Returns whether a row was added.
    pub fn upsert(&mut self, record: &FixedIssueRecord) -> Result<bool> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }

        let languages = serde_json::to_string(&record.languages)?;
        let affected_files = serde_json::to_string(&record.affected_files)?;

        let changed = match self.conn.execute(
            "INSERT OR IGNORE INTO fixed_issues
                (issue_url, repo_name, pull_request_url, languages,
                 before_code_url, after_code_url, affected_files)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.issue_url,
                record.repo_name,
                record.pull_request_url,
                languages,
                record.before_code_url,
                record.after_code_url,
                affected_files,
            ],
        ) {
            Ok(changed) => changed,
            Err(e) => {
                self.discard_if_rolled_back();
                return Err(e.into());
            }
        };

        if changed == 0 {
            debug!("Skipping already stored issue {}", record.issue_url);
            return Ok(false);
        }

        self.pending += 1;
        self.repo_inserted += 1;
        if self.pending >= self.batch_size {
            self.commit()?;
            info!(
                "Committed {} entries for {}",
                self.repo_inserted, record.repo_name
            );
        }
        Ok(true)
    }

    /// Commit the open batch, if any.
    pub fn commit(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("COMMIT") {
                self.discard_if_rolled_back();
                return Err(e.into());
            }
        }
        self.pending = 0;
        Ok(())
    }

    /// SQLite rolls the whole transaction back on some errors (I/O, full
    /// disk, `RAISE(ROLLBACK)`). The batch is gone; stop counting it.
    fn discard_if_rolled_back(&mut self) {
        if self.conn.is_autocommit() && self.pending > 0 {
            warn!("Transaction rolled back, {} uncommitted inserts lost", self.pending);
            self.repo_inserted = self.repo_inserted.saturating_sub(self.pending);
            self.pending = 0;
        }
    }

    /// Final commit for the current repository. Returns how many records
    /// the repository added.
    pub fn finish_repo(&mut self) -> Result<usize> {
        self.commit()?;
        Ok(self.repo_inserted)
    }

    /// Uncommitted inserts in the open batch.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fixed_issues", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn get(&self, issue_url: &str) -> Result<Option<FixedIssueRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_url, repo_name, pull_request_url, languages,
                    before_code_url, after_code_url, affected_files
             FROM fixed_issues WHERE issue_url = ?1",
        )?;
        let mut rows = stmt.query_map(params![issue_url], row_to_record)?;
        let record = rows.next().transpose()?;
        Ok(record)
    }

    /// Repositories with the most records, highest first.
    pub fn top_repositories(&self, limit: usize) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT repo_name, COUNT(*) AS entries
             FROM fixed_issues
             GROUP BY repo_name
             ORDER BY entries DESC, repo_name ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn sample(&self, limit: usize) -> Result<Vec<FixedIssueRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_url, repo_name, pull_request_url, languages,
                    before_code_url, after_code_url, affected_files
             FROM fixed_issues LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        Ok(StoreSummary {
            total: self.count()?,
            top_repositories: self.top_repositories(5)?,
            samples: self.sample(3)?,
        })
    }

    /// Write every non-empty table to `<table>.csv` under `out_dir`.
    pub fn export_csv(&self, out_dir: impl AsRef<Path>) -> Result<Vec<ExportOutcome>> {
        export_tables(&self.conn, out_dir.as_ref())
    }
}

impl Drop for IssueStore {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            debug!("Discarding {} uncommitted inserts", self.pending);
        }
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FixedIssueRecord> {
    let languages: Option<String> = row.get(3)?;
    let affected_files: Option<String> = row.get(6)?;
    Ok(FixedIssueRecord {
        issue_url: row.get(0)?,
        repo_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        pull_request_url: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        languages: parse_list(languages.as_deref()),
        before_code_url: row.get(4)?,
        after_code_url: row.get(5)?,
        affected_files: parse_list(affected_files.as_deref()),
    })
}

fn parse_list(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
pub struct StoreSummary {
    pub total: usize,
    pub top_repositories: Vec<(String, usize)>,
    pub samples: Vec<FixedIssueRecord>,
}

impl std::fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database contains {} total entries", self.total)?;
        if self.total == 0 {
            return Ok(());
        }

        writeln!(f, "\nTop repos (by entries):")?;
        for (repo, entries) in &self.top_repositories {
            writeln!(f, "  {}: {} entries", repo, entries)?;
        }

        writeln!(f, "\nSample entries:")?;
        for record in &self.samples {
            writeln!(f, "  Issue: {}", record.issue_url)?;
            writeln!(f, "  Repo: {}", record.repo_name)?;
            writeln!(f, "  PR: {}", record.pull_request_url)?;
            writeln!(f, "  Languages: {:?}", record.languages)?;
            writeln!(f, "  Files: {:?}", record.affected_files)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written { table: String, path: PathBuf, rows: usize },
    SkippedEmpty { table: String },
}

fn export_tables(conn: &Connection, out_dir: &Path) -> Result<Vec<ExportOutcome>> {
    std::fs::create_dir_all(out_dir)?;

    let tables: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut outcomes = Vec::with_capacity(tables.len());
    for table in tables {
        let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", table.replace('"', "\"\"")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut lines = vec![csv_line(columns.iter().map(String::as_str))];
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut fields = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                fields.push(sql_value_to_field(row.get_ref(i)?));
            }
            lines.push(csv_line(fields.iter().map(String::as_str)));
        }

        let row_count = lines.len() - 1;
        if row_count == 0 {
            info!("Skipped {}, it was empty", table);
            outcomes.push(ExportOutcome::SkippedEmpty { table });
            continue;
        }

        let path = out_dir.join(format!("{}.csv", table));
        let mut contents = lines.join("\n");
        contents.push('\n');
        std::fs::write(&path, contents)?;
        info!("Exported {} to {}", table, path.display());
        outcomes.push(ExportOutcome::Written {
            table,
            path,
            rows: row_count,
        });
    }

    Ok(outcomes)
}

fn sql_value_to_field(value: rusqlite::types::ValueRef<'_>) -> String {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn csv_line<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    fields
        .map(|field| {
            if field.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
