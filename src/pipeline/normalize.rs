//! Dataset normalisation: two raw sheets in, canonical ordered records out.
//!
//! The steps run in a fixed order:
//!
//! 1. absent or null `FREM` / `RES` remarks become the literal `"null"`
//! 2. keep rows with `RSLT == "P"` whose remarks are both `"null"`
//! 3. map the `SEX` code to a [`Gender`]
//! 4. left-join the roster on `COLL_NO` (adds college-level columns, never
//!    drops rows; per-student columns always come from the result row)
//! 5. stable sort by college number
//! 6. number each record within its college group, starting at 1
//! 7. zero-pad college number and page number to four digits
//!
//! The output order is the canonical order: the assembler places artifacts
//! in exactly this sequence, no matter in which order they were rendered.

use crate::error::CertError;
use crate::pipeline::input::Row;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

/// Sentinel for an empty remark cell.
pub const NULL_SENTINEL: &str = "null";

const COL_RESULT: &str = "RSLT";
const COL_FREM: &str = "FREM";
const COL_RES: &str = "RES";
const COL_SEX: &str = "SEX";
const COL_COLLEGE: &str = "COLL_NO";
const COL_SEAT: &str = "SEAT_NO";
const COL_NAME: &str = "NAME";
const COL_CGPA: &str = "CGPA";
const COL_GRADE: &str = "GRADE";

/// Columns that belong to one student. The roster is keyed by college, so
/// these are never filled in from it.
const STUDENT_COLUMNS: [&str; 8] = [
    COL_SEAT, COL_NAME, COL_SEX, COL_CGPA, COL_GRADE, COL_RESULT, COL_FREM, COL_RES,
];

const PASS: &str = "P";
const PAD_WIDTH: usize = 4;

/// One certificate to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Idempotency key and artifact file stem.
    pub seat_no: String,
    pub name: Option<String>,
    /// Zero-padded college number.
    pub college_no: String,
    /// Zero-padded 1-based position within the college group.
    pub page_no: String,
    pub gender: Gender,
    pub score: Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Gender {
    Male,
    Female,
    NotApplicable,
}

impl Gender {
    fn from_code(v: Option<&Value>) -> Self {
        let code = match v {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match code {
            Some(c) if c == 1.0 => Gender::Male,
            Some(c) if c == 2.0 => Gender::Female,
            _ => Gender::NotApplicable,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
            Gender::NotApplicable => "N/A",
        })
    }
}

/// Which score column the record carries. `CGPA` wins when both exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Score {
    /// `CGPA` column present; `None` when the cell is empty.
    Cgpa(Option<String>),
    /// `GRADE` column present (and no `CGPA` column); `None` when empty.
    Grade(Option<String>),
    /// Neither column present.
    Missing,
}

impl Score {
    fn from_row(row: &Row) -> Self {
        if let Some(v) = row.get(COL_CGPA) {
            Score::Cgpa(cell_text(v))
        } else if let Some(v) = row.get(COL_GRADE) {
            Score::Grade(cell_text(v))
        } else {
            Score::Missing
        }
    }
}

/// College-number sort key: numbers sort numerically and before any text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum CollegeKey {
    Numeric(i64),
    Text(String),
}

impl CollegeKey {
    fn from_cell(v: &Value) -> Option<Self> {
        match v {
            Value::Null => None,
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => CollegeKey::Numeric(i),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        CollegeKey::Numeric(f as i64)
                    }
                    _ => CollegeKey::Text(n.to_string()),
                },
            }),
            Value::String(s) => {
                let s = s.trim();
                Some(match s.parse::<i64>() {
                    Ok(i) => CollegeKey::Numeric(i),
                    Err(_) => CollegeKey::Text(s.to_string()),
                })
            }
            other => Some(CollegeKey::Text(other.to_string())),
        }
    }

    fn padded(&self) -> String {
        match self {
            CollegeKey::Numeric(i) => zero_pad(&i.to_string(), PAD_WIDTH),
            CollegeKey::Text(s) => zero_pad(s, PAD_WIDTH),
        }
    }
}

/// Left-pad with zeros to `width`, keeping a leading sign in front.
pub fn zero_pad(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        return s.to_string();
    }
    let zeros = "0".repeat(width - len);
    match s.strip_prefix(['-', '+']) {
        Some(rest) => format!("{}{zeros}{rest}", &s[..1]),
        None => format!("{zeros}{s}"),
    }
}

/// Cell value as trimmed text; `None` for null or blank cells.
fn cell_text(v: &Value) -> Option<String> {
    let s = match v {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn remark_is_empty(row: &Row, column: &str) -> bool {
    match row.get(column) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s == NULL_SENTINEL,
        Some(_) => false,
    }
}

fn is_pass(row: &Row) -> bool {
    matches!(row.get(COL_RESULT), Some(Value::String(s)) if s.trim() == PASS)
}

fn missing(sheet: &str, row: usize, column: &str) -> CertError {
    CertError::MissingColumn {
        sheet: sheet.to_string(),
        row,
        column: column.to_string(),
    }
}

/// Build the canonical record sequence from the roster and results sheets.
pub fn normalize(roster: &[Row], results: &[Row]) -> Result<Vec<Record>, CertError> {
    // ── Roster index (first row per college wins) ────────────────────────
    let mut roster_by_key: HashMap<CollegeKey, &Row> = HashMap::new();
    for (i, row) in roster.iter().enumerate() {
        let cell = row
            .get(COL_COLLEGE)
            .ok_or_else(|| missing("roster", i + 1, COL_COLLEGE))?;
        if let Some(key) = CollegeKey::from_cell(cell) {
            roster_by_key.entry(key).or_insert(row);
        }
    }

    // ── Filter + join ────────────────────────────────────────────────────
    let mut selected: Vec<(CollegeKey, Row)> = Vec::new();
    for (i, row) in results.iter().enumerate() {
        if !row.contains_key(COL_RESULT) {
            return Err(missing("results", i + 1, COL_RESULT));
        }
        if !is_pass(row) || !remark_is_empty(row, COL_FREM) || !remark_is_empty(row, COL_RES) {
            continue;
        }

        let key = row
            .get(COL_COLLEGE)
            .and_then(CollegeKey::from_cell)
            .ok_or_else(|| missing("results", i + 1, COL_COLLEGE))?;

        if row.get(COL_SEAT).and_then(cell_text).is_none() {
            return Err(missing("results", i + 1, COL_SEAT));
        }

        let mut joined = row.clone();
        if let Some(roster_row) = roster_by_key.get(&key) {
            for (col, val) in roster_row.iter() {
                if STUDENT_COLUMNS.contains(&col.as_str()) {
                    continue;
                }
                joined.entry(col.clone()).or_insert_with(|| val.clone());
            }
        }
        for col in [COL_FREM, COL_RES] {
            if matches!(joined.get(col), None | Some(Value::Null)) {
                joined.insert(col.to_string(), Value::String(NULL_SENTINEL.to_string()));
            }
        }
        selected.push((key, joined));
    }
    debug!(
        "Selected {} of {} result rows ({} roster rows)",
        selected.len(),
        results.len(),
        roster.len()
    );

    // ── Stable sort + per-college numbering ──────────────────────────────
    selected.sort_by(|a, b| a.0.cmp(&b.0));

    let mut group_counts: HashMap<CollegeKey, usize> = HashMap::new();
    let mut seen_seats: HashSet<String> = HashSet::with_capacity(selected.len());
    let mut records = Vec::with_capacity(selected.len());

    for (key, row) in selected {
        let count = group_counts.entry(key.clone()).or_insert(0);
        *count += 1;

        let seat_no = row.get(COL_SEAT).and_then(cell_text).unwrap_or_default();
        if !seen_seats.insert(seat_no.clone()) {
            return Err(CertError::DuplicateSeat { seat_no });
        }

        records.push(Record {
            seat_no,
            name: row.get(COL_NAME).and_then(cell_text),
            college_no: key.padded(),
            page_no: zero_pad(&count.to_string(), PAD_WIDTH),
            gender: Gender::from_code(row.get(COL_SEX)),
            score: Score::from_row(&row),
        });
    }

    info!("Normalised {} records", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        match v {
            Value::Object(m) => m,
            _ => panic!("test rows must be objects"),
        }
    }

    fn result(seat: i64, coll: i64, sex: i64) -> Row {
        row(json!({
            "SEAT_NO": seat, "NAME": format!("Student {seat}"), "COLL_NO": coll,
            "SEX": sex, "RSLT": "P", "CGPA": 8.5
        }))
    }

    #[test]
    fn filters_failed_and_remarked_rows() {
        let results = vec![
            result(1, 10, 1),
            row(json!({"SEAT_NO": 2, "COLL_NO": 10, "RSLT": "F", "CGPA": 4.0})),
            row(json!({"SEAT_NO": 3, "COLL_NO": 10, "RSLT": "P", "FREM": "RLE", "CGPA": 7.0})),
            row(json!({"SEAT_NO": 4, "COLL_NO": 10, "RSLT": "P", "RES": "RR", "CGPA": 7.0})),
            row(json!({"SEAT_NO": 5, "COLL_NO": 10, "RSLT": "P", "FREM": null, "RES": "null", "CGPA": 7.0})),
        ];
        let records = normalize(&[], &results).unwrap();
        let seats: Vec<_> = records.iter().map(|r| r.seat_no.as_str()).collect();
        assert_eq!(seats, vec!["1", "5"]);
    }

    #[test]
    fn sorted_by_college_with_group_numbering() {
        let results = vec![
            result(30, 12, 1),
            result(10, 3, 2),
            result(31, 12, 1),
            result(11, 3, 1),
            result(32, 12, 0),
        ];
        let records = normalize(&[], &results).unwrap();
        let got: Vec<_> = records
            .iter()
            .map(|r| (r.seat_no.as_str(), r.college_no.as_str(), r.page_no.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("10", "0003", "0001"),
                ("11", "0003", "0002"),
                ("30", "0012", "0001"),
                ("31", "0012", "0002"),
                ("32", "0012", "0003"),
            ]
        );
    }

    #[test]
    fn numeric_keys_sort_numerically() {
        let results = vec![
            row(json!({"SEAT_NO": 1, "COLL_NO": "100", "RSLT": "P", "GRADE": "A"})),
            row(json!({"SEAT_NO": 2, "COLL_NO": 9, "RSLT": "P", "GRADE": "A"})),
        ];
        let records = normalize(&[], &results).unwrap();
        assert_eq!(records[0].college_no, "0009");
        assert_eq!(records[1].college_no, "0100");
    }

    #[test]
    fn gender_mapping() {
        let records = normalize(&[], &[result(1, 1, 1), result(2, 1, 2), result(3, 1, 9)]).unwrap();
        assert_eq!(records[0].gender, Gender::Male);
        assert_eq!(records[1].gender, Gender::Female);
        assert_eq!(records[2].gender, Gender::NotApplicable);
        assert_eq!(records[2].gender.to_string(), "N/A");
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let roster = vec![row(json!({"COLL_NO": 5, "COLL_NAME": "Fifth College"}))];
        let results = vec![
            row(json!({"SEAT_NO": 1, "COLL_NO": 5, "RSLT": "P", "GRADE": "O"})),
            row(json!({"SEAT_NO": 2, "COLL_NO": 6, "RSLT": "P", "GRADE": "A", "NAME": "Own Name"})),
        ];
        let records = normalize(&roster, &results).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name.as_deref(), Some("Own Name"));
    }

    #[test]
    fn roster_never_supplies_student_fields() {
        let roster = vec![
            row(json!({"COLL_NO": 5, "SEAT_NO": 111, "NAME": "OTHER STUDENT", "CGPA": 9.9, "SEX": 2})),
            row(json!({"COLL_NO": 5, "SEAT_NO": 112, "NAME": "THIRD STUDENT", "GRADE": "C"})),
        ];
        let results = vec![row(json!({"SEAT_NO": 1, "COLL_NO": 5, "RSLT": "P", "GRADE": "B"}))];
        let records = normalize(&roster, &results).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].seat_no, "1");
        assert_eq!(records[0].name, None);
        assert_eq!(records[0].gender, Gender::NotApplicable);
        assert_eq!(records[0].score, Score::Grade(Some("B".into())));
    }

    #[test]
    fn roster_seat_does_not_hide_missing_seat() {
        let roster = vec![row(json!({"COLL_NO": 5, "SEAT_NO": 111, "NAME": "OTHER STUDENT"}))];
        let results = vec![row(json!({"COLL_NO": 5, "RSLT": "P", "GRADE": "B"}))];
        assert!(matches!(
            normalize(&roster, &results),
            Err(CertError::MissingColumn { ref column, .. }) if column == "SEAT_NO"
        ));
    }

    #[test]
    fn score_branch_selection() {
        let results = vec![
            row(json!({"SEAT_NO": 1, "COLL_NO": 1, "RSLT": "P", "CGPA": 9.1, "GRADE": "O"})),
            row(json!({"SEAT_NO": 2, "COLL_NO": 1, "RSLT": "P", "GRADE": "A+"})),
            row(json!({"SEAT_NO": 3, "COLL_NO": 1, "RSLT": "P", "CGPA": null})),
            row(json!({"SEAT_NO": 4, "COLL_NO": 1, "RSLT": "P"})),
        ];
        let records = normalize(&[], &results).unwrap();
        assert_eq!(records[0].score, Score::Cgpa(Some("9.1".into())));
        assert_eq!(records[1].score, Score::Grade(Some("A+".into())));
        assert_eq!(records[2].score, Score::Cgpa(None));
        assert_eq!(records[3].score, Score::Missing);
    }

    #[test]
    fn normalising_twice_is_identical() {
        let results = vec![result(3, 2, 1), result(1, 1, 2), result(2, 2, 1)];
        let roster = vec![row(json!({"COLL_NO": 2}))];
        assert_eq!(
            normalize(&roster, &results).unwrap(),
            normalize(&roster, &results).unwrap()
        );
    }

    #[test]
    fn missing_result_column_is_fatal() {
        let results = vec![row(json!({"SEAT_NO": 1, "COLL_NO": 1}))];
        assert!(matches!(
            normalize(&[], &results),
            Err(CertError::MissingColumn { ref column, .. }) if column == "RSLT"
        ));
    }

    #[test]
    fn missing_seat_on_passing_row_is_fatal() {
        let results = vec![row(json!({"COLL_NO": 1, "RSLT": "P", "GRADE": "A"}))];
        assert!(matches!(
            normalize(&[], &results),
            Err(CertError::MissingColumn { ref column, .. }) if column == "SEAT_NO"
        ));
    }

    #[test]
    fn duplicate_seat_is_fatal() {
        let results = vec![result(7, 1, 1), result(7, 2, 1)];
        assert!(matches!(
            normalize(&[], &results),
            Err(CertError::DuplicateSeat { ref seat_no }) if seat_no == "7"
        ));
    }

    #[test]
    fn zero_pad_behaviour() {
        assert_eq!(zero_pad("7", 4), "0007");
        assert_eq!(zero_pad("12345", 4), "12345");
        assert_eq!(zero_pad("-5", 4), "-005");
        assert_eq!(zero_pad("AB", 4), "00AB");
    }
}
