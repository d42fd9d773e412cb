//! Query functions for the `forages` table.
//!
//! Inserts are chunked multi-row `VALUES` statements so a large upload
//! stays under the `PostgreSQL` bind-parameter limit.

use std::fmt::Write as _;

use moosicbox_json_utils::database::ToValue as _;
use smart_mining_database_models::{MAX_RECENT_LIMIT, SampleRow};
use smart_mining_sample_models::SampleRecord;
use switchy_database::{Database, DatabaseValue, Row};

use crate::DbError;

/// Maximum number of parameters `PostgreSQL` allows per statement.
pub const PG_MAX_PARAMS: usize = 65_535;

/// Bind parameters used by a row that carries its own id.
const PARAMS_WITH_ID: usize = 5;

/// Bind parameters used by a row whose id is generated.
const PARAMS_WITHOUT_ID: usize = 4;

/// Blocks concurrent writers until the batch commits, so no other
/// transaction can draw a generated id between the sequence bump and the
/// explicit-id rows.
const LOCK_FORAGES: &str = "LOCK TABLE forages IN SHARE ROW EXCLUSIVE MODE";

/// Moves the id sequence past both the stored ids and the batch's largest
/// explicit id (`$1`).
const BUMP_ID_SEQUENCE: &str = "SELECT setval(
    pg_get_serial_sequence('forages', 'id'),
    GREATEST((SELECT MAX(id) FROM forages), $1, 1)
)";

/// One statement of an insert batch.
#[derive(Debug)]
struct Statement {
    sql: String,
    params: Vec<DatabaseValue>,
    /// Whether the affected-row count is a number of inserted samples.
    inserts: bool,
}

/// Inserts a batch of validated samples.
///
/// When any record carries a source-provided id, the table is locked and
/// the id sequence is moved past the largest id before anything is
/// written, so generated ids never collide with explicit ones. Explicit
/// ids that already exist are skipped (`ON CONFLICT DO NOTHING`) and are
/// not counted. Callers wanting all-or-nothing semantics run this inside a
/// transaction; the lock is held until that transaction ends.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub async fn insert_samples<D: Database + ?Sized>(
    db: &D,
    records: &[SampleRecord],
) -> Result<u64, DbError> {
    let mut inserted = 0u64;

    for statement in plan_insert(records) {
        let affected = db.exec_raw_params(&statement.sql, &statement.params).await?;
        if statement.inserts {
            inserted += affected;
        }
    }

    log::debug!("Inserted {inserted} of {} samples", records.len());

    Ok(inserted)
}

/// Orders the statements of one batch: lock and sequence bump first (only
/// when explicit ids are present), then explicit-id rows, then generated
/// rows.
fn plan_insert(records: &[SampleRecord]) -> Vec<Statement> {
    let (with_id, without_id): (Vec<&SampleRecord>, Vec<&SampleRecord>) =
        records.iter().partition(|r| r.id().is_some());

    let mut statements = Vec::new();

    if let Some(max_id) = with_id.iter().filter_map(|r| r.id()).max() {
        statements.push(Statement {
            sql: LOCK_FORAGES.to_string(),
            params: Vec::new(),
            inserts: false,
        });
        statements.push(Statement {
            sql: BUMP_ID_SEQUENCE.to_string(),
            params: vec![DatabaseValue::Int64(max_id)],
            inserts: false,
        });
    }

    for chunk in with_id.chunks(PG_MAX_PARAMS / PARAMS_WITH_ID) {
        let (sql, params) = build_insert(chunk, true);
        statements.push(Statement {
            sql,
            params,
            inserts: true,
        });
    }

    for chunk in without_id.chunks(PG_MAX_PARAMS / PARAMS_WITHOUT_ID) {
        let (sql, params) = build_insert(chunk, false);
        statements.push(Statement {
            sql,
            params,
            inserts: true,
        });
    }

    statements
}

/// Builds one multi-row `INSERT` statement and its parameters.
fn build_insert(chunk: &[&SampleRecord], with_id: bool) -> (String, Vec<DatabaseValue>) {
    let per_row = if with_id {
        PARAMS_WITH_ID
    } else {
        PARAMS_WITHOUT_ID
    };

    let mut sql = String::from(if with_id {
        "INSERT INTO forages (id, x_coord, y_coord, z_coord, teneur) VALUES "
    } else {
        "INSERT INTO forages (x_coord, y_coord, z_coord, teneur) VALUES "
    });
    let mut params = Vec::with_capacity(chunk.len() * per_row);

    for (row_idx, record) in chunk.iter().enumerate() {
        if row_idx > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..per_row {
            if col > 0 {
                sql.push_str(", ");
            }
            let _ = write!(sql, "${}", row_idx * per_row + col + 1);
        }
        sql.push(')');

        if let Some(id) = record.id()
            && with_id
        {
            params.push(DatabaseValue::Int64(id));
        }
        params.push(DatabaseValue::Real64(record.x_coord()));
        params.push(DatabaseValue::Real64(record.y_coord()));
        params.push(DatabaseValue::Real64(record.z_coord()));
        params.push(DatabaseValue::Real64(record.teneur()));
    }

    if with_id {
        sql.push_str(" ON CONFLICT (id) DO NOTHING");
    }

    (sql, params)
}

/// Returns up to `limit` samples, newest first. `limit` is capped at
/// [`MAX_RECENT_LIMIT`].
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a column cannot be read.
pub async fn list_recent_samples(db: &dyn Database, limit: u32) -> Result<Vec<SampleRow>, DbError> {
    let limit = limit.min(MAX_RECENT_LIMIT);

    let rows = db
        .query_raw_params(
            "SELECT id, x_coord, y_coord, z_coord, teneur, created_at
             FROM forages
             ORDER BY created_at DESC, id DESC
             LIMIT $1",
            &[DatabaseValue::Int64(i64::from(limit))],
        )
        .await?;

    rows.iter().map(row_to_sample).collect()
}

fn row_to_sample(row: &Row) -> Result<SampleRow, DbError> {
    let column = |name: &str| -> Result<f64, DbError> {
        row.to_value(name).map_err(|e| DbError::Conversion {
            message: format!("Failed to parse sample {name}: {e}"),
        })
    };

    Ok(SampleRow {
        id: row.to_value("id").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse sample id: {e}"),
        })?,
        x_coord: column("x_coord")?,
        y_coord: column("y_coord")?,
        z_coord: column("z_coord")?,
        teneur: column("teneur")?,
        created_at: row.to_value("created_at").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse sample created_at: {e}"),
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: Option<i64>) -> SampleRecord {
        SampleRecord::new(id, 1.0, 2.0, 3.0, 0.4).unwrap()
    }

    #[test]
    fn builds_placeholders_without_ids() {
        let a = sample(None);
        let b = sample(None);
        let (sql, params) = build_insert(&[&a, &b], false);
        assert!(sql.starts_with("INSERT INTO forages (x_coord, y_coord, z_coord, teneur)"));
        assert!(sql.ends_with("($1, $2, $3, $4), ($5, $6, $7, $8)"));
        assert!(!sql.contains("ON CONFLICT"));
        assert_eq!(params.len(), 8);
    }

    #[test]
    fn explicit_ids_skip_conflicts() {
        let a = sample(Some(10));
        let (sql, params) = build_insert(&[&a], true);
        assert!(sql.contains("(id, x_coord"));
        assert!(sql.ends_with("($1, $2, $3, $4, $5) ON CONFLICT (id) DO NOTHING"));
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn generated_only_batch_takes_no_lock() {
        let plan = plan_insert(&[sample(None), sample(None)]);
        assert_eq!(plan.len(), 1);
        assert!(plan[0].inserts);
        assert!(plan[0].sql.starts_with("INSERT INTO forages (x_coord"));
    }

    #[test]
    fn explicit_ids_lock_and_bump_sequence_before_inserting() {
        let plan = plan_insert(&[sample(None), sample(Some(7)), sample(Some(42))]);
        let sql: Vec<&str> = plan.iter().map(|s| s.sql.as_str()).collect();

        assert_eq!(sql.len(), 4);
        assert_eq!(sql[0], LOCK_FORAGES);
        assert!(sql[1].contains("setval"));
        assert!(matches!(plan[1].params.as_slice(), [DatabaseValue::Int64(42)]));
        assert!(sql[2].starts_with("INSERT INTO forages (id,"));
        assert!(sql[3].starts_with("INSERT INTO forages (x_coord"));

        let counted: Vec<bool> = plan.iter().map(|s| s.inserts).collect();
        assert_eq!(counted, vec![false, false, true, true]);
    }

    #[test]
    fn unreadable_column_is_an_error_not_zero() {
        let row = Row {
            columns: vec![
                ("id".to_string(), DatabaseValue::Int64(7)),
                ("y_coord".to_string(), DatabaseValue::Real64(33.42)),
                ("z_coord".to_string(), DatabaseValue::Real64(150.0)),
                ("teneur".to_string(), DatabaseValue::Real64(1.2)),
            ],
        };

        match row_to_sample(&row) {
            Err(DbError::Conversion { message }) => assert!(message.contains("x_coord")),
            other => panic!("expected a conversion error, got {other:?}"),
        }
    }

    #[test]
    fn chunks_stay_under_param_limit() {
        assert!((PG_MAX_PARAMS / PARAMS_WITH_ID) * PARAMS_WITH_ID <= PG_MAX_PARAMS);
        assert!((PG_MAX_PARAMS / PARAMS_WITHOUT_ID) * PARAMS_WITHOUT_ID <= PG_MAX_PARAMS);
    }
}
