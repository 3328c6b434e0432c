use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const NOTE_MIN: f64 = 0.0;
pub const NOTE_MAX: f64 = 5.0;

/// Both note fields share the same range. The weight field is named
/// "percentage" but runs 0..=5, not 0..=1; callers rely on that.
pub fn note_value_in_range(v: f64) -> bool {
    (NOTE_MIN..=NOTE_MAX).contains(&v)
}

#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Query(String),
}

impl From<rusqlite::Error> for CalcError {
    fn from(e: rusqlite::Error) -> Self {
        CalcError::Query(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub group_detail_id: i64,
    pub user_id: i64,
    pub full_name: String,
    pub grade: f64,
}

/// Total grade for one student in one group: the sum of
/// `percentage * qualification` over every note under every enrollment
/// matching the pair. Normally exactly one enrollment matches; zero or
/// several are tolerated and an absent pair yields 0.0, never an error.
/// No normalization and no rounding on the way out.
pub fn compute_grade(conn: &Connection, group_id: i64, user_id: i64) -> Result<f64, CalcError> {
    let mut stmt = conn.prepare(
        "SELECT n.percentage, n.qualification
         FROM notes n
         JOIN group_details gd ON gd.id = n.group_detail_id
         WHERE gd.group_id = ? AND gd.user_id = ?",
    )?;
    let rows = stmt.query_map((group_id, user_id), |r| {
        Ok((r.get::<_, f64>(0)?, r.get::<_, f64>(1)?))
    })?;

    let mut total = 0.0_f64;
    for row in rows {
        let (percentage, qualification) = row?;
        total += percentage * qualification;
    }
    Ok(total)
}

/// One entry per enrolled student, in enrollment insertion order
/// (ascending group_detail id). Students without notes appear with 0.0.
/// Recomputed from source rows on every call.
pub fn compute_roster(conn: &Connection, group_id: i64) -> Result<Vec<RosterEntry>, CalcError> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(CalcError::NotFound("group not found".to_string()));
    }

    let mut stmt = conn.prepare(
        "SELECT gd.id, gd.user_id, u.first_name, u.last_name
         FROM group_details gd
         JOIN users u ON u.id = gd.user_id
         WHERE gd.group_id = ?
         ORDER BY gd.id",
    )?;
    let enrollments = stmt
        .query_map([group_id], |r| {
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                format!("{} {}", first, last),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut roster = Vec::with_capacity(enrollments.len());
    for (group_detail_id, user_id, full_name) in enrollments {
        let grade = compute_grade(conn, group_id, user_id)?;
        roster.push(RosterEntry {
            group_detail_id,
            user_id,
            full_name,
            grade,
        });
    }
    Ok(roster)
}
