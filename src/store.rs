use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::model::StudyRecord;

/// Single-table SQLite store keyed by accession. One reconciliation process
/// owns writes; idempotence of the callers, not locking, makes re-runs safe.
pub struct StudyStore {
    conn: Connection,
}

impl StudyStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        configure_connection(&conn)?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Insert or replace the prelim side of a record. On conflict only the
    /// prelim-related columns are rewritten; `final`, `final_timestamp` and
    /// the diff columns survive a re-ingest untouched.
    pub fn upsert(&self, record: &StudyRecord) -> Result<()> {
        self.conn
            .execute(
                "
                INSERT INTO study(site, accession, timestamp, procedure_description,
                                  procedure_code, modality, resident, resident_id,
                                  prelim, prelim_timestamp)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(accession) DO UPDATE SET
                  site=excluded.site,
                  timestamp=excluded.timestamp,
                  procedure_description=excluded.procedure_description,
                  procedure_code=excluded.procedure_code,
                  modality=excluded.modality,
                  resident=excluded.resident,
                  resident_id=excluded.resident_id,
                  prelim=excluded.prelim,
                  prelim_timestamp=excluded.prelim_timestamp
                ",
                params![
                    record.site,
                    record.accession,
                    record.timestamp,
                    record.procedure_description,
                    record.procedure_code,
                    record.modality,
                    record.resident,
                    record.resident_id,
                    record.prelim,
                    record.prelim_timestamp,
                ],
            )
            .with_context(|| format!("failed to upsert study {}", record.accession))?;
        Ok(())
    }

    /// Stored change-detection fingerprint for an accession, if the record
    /// exists and has one.
    pub fn find_fingerprint(&self, accession: &str) -> Result<Option<String>> {
        let fingerprint: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT prelim_timestamp FROM study WHERE accession=?1",
                params![accession],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read fingerprint for {accession}"))?;
        Ok(fingerprint.flatten())
    }

    /// Write the final-report fields, exactly once. Returns `false` when the
    /// record is missing or already finalized; finalization is one-way.
    pub fn update_final_fields(
        &self,
        accession: &str,
        attending: Option<&str>,
        attending_id: Option<&str>,
        final_text: Option<&str>,
        final_timestamp: Option<&str>,
    ) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "
                UPDATE study
                SET attending=?1, attending_id=?2, final=?3, final_timestamp=?4
                WHERE accession=?5 AND final IS NULL
                ",
                params![attending, attending_id, final_text, final_timestamp, accession],
            )
            .with_context(|| format!("failed to finalize study {accession}"))?;
        Ok(updated > 0)
    }

    /// Write the diff score and percentage together, exactly once, and only
    /// for a finalized record.
    pub fn update_diff_fields(&self, accession: &str, score: i64, percent: f64) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "
                UPDATE study
                SET diff_score=?1, diff_score_percent=?2
                WHERE accession=?3 AND final IS NOT NULL AND diff_score IS NULL
                ",
                params![score, percent, accession],
            )
            .with_context(|| format!("failed to record diff for {accession}"))?;
        Ok(updated > 0)
    }

    /// Remove a record whose accession no longer resolves upstream.
    pub fn delete(&self, accession: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM study WHERE accession=?1", params![accession])
            .with_context(|| format!("failed to delete study {accession}"))?;
        Ok(())
    }

    /// Accessions still waiting on a signed final.
    pub fn open_accessions(&self) -> Result<Vec<String>> {
        let mut statement = self
            .conn
            .prepare("SELECT accession FROM study WHERE final IS NULL ORDER BY accession")?;
        let rows = statement
            .query_map([], |row| row.get(0))
            .context("failed to list open studies")?;
        let mut accessions = Vec::new();
        for row in rows {
            accessions.push(row?);
        }
        Ok(accessions)
    }

    /// Finalized records that have not been scored yet.
    pub fn unscored_finals(&self) -> Result<Vec<StudyRecord>> {
        let mut statement = self.conn.prepare(
            "
            SELECT site, accession, timestamp, procedure_description, procedure_code,
                   modality, resident, resident_id, attending, attending_id,
                   prelim, prelim_timestamp, final, final_timestamp,
                   diff_score, diff_score_percent
            FROM study
            WHERE final IS NOT NULL AND diff_score IS NULL
            ORDER BY accession
            ",
        )?;
        let rows = statement
            .query_map([], row_to_record)
            .context("failed to list unscored studies")?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            total: self.count_where("1=1")?,
            open: self.count_where("final IS NULL")?,
            finalized: self.count_where("final IS NOT NULL")?,
            scored: self.count_where("diff_score IS NOT NULL")?,
        })
    }

    fn count_where(&self, predicate: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM study WHERE {predicate}");
        let count = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .context("failed to count studies")?;
        Ok(count)
    }

    #[cfg(test)]
    pub fn get(&self, accession: &str) -> Result<Option<StudyRecord>> {
        let record = self
            .conn
            .query_row(
                "
                SELECT site, accession, timestamp, procedure_description, procedure_code,
                       modality, resident, resident_id, attending, attending_id,
                       prelim, prelim_timestamp, final, final_timestamp,
                       diff_score, diff_score_percent
                FROM study WHERE accession=?1
                ",
                params![accession],
                row_to_record,
            )
            .optional()
            .with_context(|| format!("failed to read study {accession}"))?;
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreCounts {
    pub total: i64,
    pub open: i64,
    pub finalized: i64,
    pub scored: i64,
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS study (
          site TEXT,
          accession TEXT PRIMARY KEY,
          timestamp TEXT,
          procedure_description TEXT,
          procedure_code TEXT,
          modality TEXT,
          resident TEXT,
          resident_id TEXT,
          attending TEXT,
          attending_id TEXT,
          prelim TEXT,
          prelim_timestamp TEXT,
          final TEXT,
          final_timestamp TEXT,
          diff_score INTEGER,
          diff_score_percent REAL
        );

        CREATE INDEX IF NOT EXISTS idx_study_open ON study(accession) WHERE final IS NULL;
        CREATE INDEX IF NOT EXISTS idx_study_unscored ON study(accession)
          WHERE final IS NOT NULL AND diff_score IS NULL;
        ",
    )
    .context("failed to initialize study schema")?;
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<StudyRecord> {
    Ok(StudyRecord {
        site: row.get(0)?,
        accession: row.get(1)?,
        timestamp: row.get(2)?,
        procedure_description: row.get(3)?,
        procedure_code: row.get(4)?,
        modality: row.get(5)?,
        resident: row.get(6)?,
        resident_id: row.get(7)?,
        attending: row.get(8)?,
        attending_id: row.get(9)?,
        prelim: row.get(10)?,
        prelim_timestamp: row.get(11)?,
        final_text: row.get(12)?,
        final_timestamp: row.get(13)?,
        diff_score: row.get(14)?,
        diff_score_percent: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prelim_record(accession: &str, fingerprint: &str) -> StudyRecord {
        StudyRecord {
            site: "https://ras.example.org".to_string(),
            accession: accession.to_string(),
            timestamp: Some("2026-08-01T09:30:00".to_string()),
            procedure_description: Some("CT CHEST WITHOUT CONTRAST".to_string()),
            procedure_code: Some("CTCH".to_string()),
            modality: Some("CT".to_string()),
            resident: Some("Alex Rivera".to_string()),
            resident_id: Some("4021".to_string()),
            prelim: Some("No acute findings.".to_string()),
            prelim_timestamp: Some(fingerprint.to_string()),
            ..StudyRecord::default()
        }
    }

    #[test]
    fn upsert_then_get_round_trips_prelim_fields() {
        let store = StudyStore::open_in_memory().unwrap();
        store.upsert(&prelim_record("ACC-1", "fp-1")).unwrap();

        let record = store.get("ACC-1").unwrap().expect("record exists");
        assert_eq!(record.modality.as_deref(), Some("CT"));
        assert_eq!(record.prelim_timestamp.as_deref(), Some("fp-1"));
        assert!(record.final_text.is_none());
        assert!(record.diff_score.is_none());
    }

    #[test]
    fn reingest_replaces_prelim_fields_but_preserves_final_and_diff() {
        let store = StudyStore::open_in_memory().unwrap();
        store.upsert(&prelim_record("ACC-1", "fp-1")).unwrap();
        assert!(
            store
                .update_final_fields(
                    "ACC-1",
                    Some("Sam Chen"),
                    Some("88"),
                    Some("No acute findings. No effusion."),
                    Some("2026-08-02T08:00:00"),
                )
                .unwrap()
        );
        assert!(store.update_diff_fields("ACC-1", 13, 41.9).unwrap());

        let mut edited = prelim_record("ACC-1", "fp-2");
        edited.prelim = Some("No acute findings. Stable.".to_string());
        store.upsert(&edited).unwrap();

        let record = store.get("ACC-1").unwrap().unwrap();
        assert_eq!(record.prelim_timestamp.as_deref(), Some("fp-2"));
        assert_eq!(record.prelim.as_deref(), Some("No acute findings. Stable."));
        assert_eq!(
            record.final_text.as_deref(),
            Some("No acute findings. No effusion.")
        );
        assert_eq!(record.diff_score, Some(13));
    }

    #[test]
    fn finalization_is_one_way() {
        let store = StudyStore::open_in_memory().unwrap();
        store.upsert(&prelim_record("ACC-1", "fp-1")).unwrap();

        assert!(
            store
                .update_final_fields("ACC-1", Some("Sam Chen"), Some("88"), Some("v1"), Some("t1"))
                .unwrap()
        );
        assert!(
            !store
                .update_final_fields("ACC-1", Some("Pat Doe"), Some("99"), Some("v2"), Some("t2"))
                .unwrap()
        );

        let record = store.get("ACC-1").unwrap().unwrap();
        assert_eq!(record.attending.as_deref(), Some("Sam Chen"));
        assert_eq!(record.final_text.as_deref(), Some("v1"));
    }

    #[test]
    fn diff_fields_require_a_finalized_record_and_write_once() {
        let store = StudyStore::open_in_memory().unwrap();
        store.upsert(&prelim_record("ACC-1", "fp-1")).unwrap();

        assert!(!store.update_diff_fields("ACC-1", 5, 10.0).unwrap());

        store
            .update_final_fields("ACC-1", None, None, Some("final"), Some("t1"))
            .unwrap();
        assert!(store.update_diff_fields("ACC-1", 5, 10.0).unwrap());
        assert!(!store.update_diff_fields("ACC-1", 9, 90.0).unwrap());

        let record = store.get("ACC-1").unwrap().unwrap();
        assert_eq!(record.diff_score, Some(5));
        assert_eq!(record.diff_score_percent, Some(10.0));
    }

    #[test]
    fn predicate_queries_partition_the_lifecycle() {
        let store = StudyStore::open_in_memory().unwrap();
        store.upsert(&prelim_record("ACC-1", "fp")).unwrap();
        store.upsert(&prelim_record("ACC-2", "fp")).unwrap();
        store.upsert(&prelim_record("ACC-3", "fp")).unwrap();

        store
            .update_final_fields("ACC-2", None, None, Some("final"), Some("t"))
            .unwrap();
        store
            .update_final_fields("ACC-3", None, None, Some("final"), Some("t"))
            .unwrap();
        store.update_diff_fields("ACC-3", 2, 4.0).unwrap();

        assert_eq!(store.open_accessions().unwrap(), vec!["ACC-1"]);
        let unscored: Vec<String> = store
            .unscored_finals()
            .unwrap()
            .into_iter()
            .map(|record| record.accession)
            .collect();
        assert_eq!(unscored, vec!["ACC-2"]);

        let counts = store.counts().unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.open, 1);
        assert_eq!(counts.finalized, 2);
        assert_eq!(counts.scored, 1);
    }

    #[test]
    fn delete_removes_the_record_and_is_idempotent() {
        let store = StudyStore::open_in_memory().unwrap();
        store.upsert(&prelim_record("ACC-1", "fp")).unwrap();
        store.delete("ACC-1").unwrap();
        assert!(store.get("ACC-1").unwrap().is_none());
        store.delete("ACC-1").unwrap();
    }

    #[test]
    fn find_fingerprint_distinguishes_missing_record() {
        let store = StudyStore::open_in_memory().unwrap();
        assert_eq!(store.find_fingerprint("ACC-1").unwrap(), None);
        store.upsert(&prelim_record("ACC-1", "fp-1")).unwrap();
        assert_eq!(
            store.find_fingerprint("ACC-1").unwrap().as_deref(),
            Some("fp-1")
        );
    }
}
