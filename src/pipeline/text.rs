//! Certificate wording and layout.
//!
//! Everything printed on a certificate is derived here from a [`Record`] and
//! the [`BatchParams`], as plain data. The drawing primitive only ever sees
//! the resulting [`TextPlacement`] list, so the wording is testable without
//! touching pixels.

use crate::config::BatchParams;
use crate::error::RecordError;
use crate::pipeline::normalize::{Gender, Record, Score};
use serde::Serialize;

const NOT_AVAILABLE: &str = "N/A";
const FEMALE_SUFFIX: &str = "/ - FEMALE";
const THIRD_LINE: &str = "held by the University of Mumbai in the month of";
const DIRECTOR: &str = "DIRECTOR";
const BOARD: &str = "BOARD OF EXAMINATIONS & EVALUATION";

/// Issue-date format, e.g. `October 19, 2026`.
pub const DATE_FORMAT: &str = "%B %d, %Y";

const GREY: [u8; 3] = [157, 157, 157];
const BLACK: [u8; 3] = [0, 0, 0];
const FONT_SIZE: f32 = 2.0;

/// One line of text at a fixed position on the template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPlacement {
    pub text: String,
    /// Left edge of the line, in template pixels.
    pub x: u32,
    /// Baseline of the line, in template pixels.
    pub y: u32,
    pub font_size: f32,
    pub color: [u8; 3],
}

impl TextPlacement {
    fn new(text: impl Into<String>, x: u32, y: u32, color: [u8; 3]) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            font_size: FONT_SIZE,
            color,
        }
    }
}

/// The variable lines of one certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateText {
    /// `CCF : {college} : {page}`
    pub ccf: String,
    /// `NO : {seat}`
    pub seat_line: String,
    pub name_line: String,
    pub course_line: String,
    pub score_line: String,
    /// `/ - FEMALE` for female candidates, empty otherwise.
    pub gender_suffix: String,
    pub issue_date: String,
}

impl CertificateText {
    /// Derive the wording for `record`.
    ///
    /// Fails with [`RecordError::NoScore`] when the record carries neither a
    /// CGPA nor a grade column.
    pub fn derive(
        record: &Record,
        params: &BatchParams,
        issue_date: &str,
    ) -> Result<Self, RecordError> {
        let seat = non_empty_or_na(Some(record.seat_no.as_str()));
        let name = non_empty_or_na(record.name.as_deref());

        let gender_suffix = if record.gender == Gender::Female {
            FEMALE_SUFFIX.to_string()
        } else {
            String::new()
        };
        let name_line = if gender_suffix.is_empty() {
            name.to_string()
        } else {
            format!("/ {name}")
        };

        let roman = to_roman(params.semester);
        let (scheme, score_line) = match &record.score {
            Score::Cgpa(v) => (
                "CBCGS",
                format!("{} WITH {} CGPI", params.year, non_empty_or_na(v.as_deref())),
            ),
            Score::Grade(v) => (
                "CBSGS",
                format!(
                    "{} AND WAS PLACED IN THE {} GRADE",
                    params.year,
                    non_empty_or_na(v.as_deref())
                ),
            ),
            Score::Missing => {
                return Err(RecordError::NoScore {
                    seat_no: seat.to_string(),
                })
            }
        };

        Ok(Self {
            ccf: format!("CCF : {} : {}", record.college_no, record.page_no),
            seat_line: format!("NO : {seat}"),
            name_line,
            course_line: format!(
                "PASSED THE {} (SEM {roman}) ({scheme}) EXAMINATION",
                params.course_name
            ),
            score_line,
            gender_suffix,
            issue_date: issue_date.to_string(),
        })
    }

    /// The full layout: variable lines plus the fixed signature block.
    pub fn placements(&self) -> Vec<TextPlacement> {
        vec![
            TextPlacement::new(&self.ccf, 300, 590, GREY),
            TextPlacement::new(&self.seat_line, 300, 680, GREY),
            TextPlacement::new(&self.name_line, 400, 1300, GREY),
            TextPlacement::new(&self.course_line, 385, 1500, GREY),
            TextPlacement::new(THIRD_LINE, 385, 1700, BLACK),
            TextPlacement::new(&self.score_line, 390, 1850, GREY),
            TextPlacement::new(&self.gender_suffix, 350, 2300, GREY),
            TextPlacement::new(&self.issue_date, 330, 2400, GREY),
            TextPlacement::new(DIRECTOR, 1700, 2300, BLACK),
            TextPlacement::new(BOARD, 1200, 2400, BLACK),
        ]
    }
}

fn non_empty_or_na(v: Option<&str>) -> &str {
    match v.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => NOT_AVAILABLE,
    }
}

/// Upper-case Roman numeral using the standard subtractive pairs.
///
/// Zero yields an empty string; callers validate the range up front.
pub fn to_roman(mut n: u32) -> String {
    const TABLE: [(u32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];

    let mut out = String::new();
    for &(value, symbol) in TABLE.iter() {
        while n >= value {
            out.push_str(symbol);
            n -= value;
        }
    }
    out
}

/// Today's date in [`DATE_FORMAT`], local time.
pub fn today() -> String {
    chrono::Local::now().format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(gender: Gender, score: Score) -> Record {
        Record {
            seat_no: "1234567".into(),
            name: Some("ASHA PATIL".into()),
            college_no: "0042".into(),
            page_no: "0003".into(),
            gender,
            score,
        }
    }

    fn params() -> BatchParams {
        BatchParams::new("MAY 2024", "BACHELOR OF COMMERCE", 6)
    }

    #[test]
    fn roman_numerals() {
        let cases = [
            (1, "I"),
            (4, "IV"),
            (9, "IX"),
            (40, "XL"),
            (90, "XC"),
            (400, "CD"),
            (900, "CM"),
            (2024, "MMXXIV"),
            (3999, "MMMCMXCIX"),
        ];
        for (n, want) in cases {
            assert_eq!(to_roman(n), want, "to_roman({n})");
        }
        assert_eq!(to_roman(0), "");
    }

    #[test]
    fn cgpa_record_uses_cbcgs_wording() {
        let t = CertificateText::derive(
            &record(Gender::Male, Score::Cgpa(Some("8.75".into()))),
            &params(),
            "October 19, 2026",
        )
        .unwrap();
        assert_eq!(t.ccf, "CCF : 0042 : 0003");
        assert_eq!(t.seat_line, "NO : 1234567");
        assert_eq!(t.name_line, "ASHA PATIL");
        assert_eq!(
            t.course_line,
            "PASSED THE BACHELOR OF COMMERCE (SEM VI) (CBCGS) EXAMINATION"
        );
        assert_eq!(t.score_line, "MAY 2024 WITH 8.75 CGPI");
        assert_eq!(t.gender_suffix, "");
    }

    #[test]
    fn grade_record_uses_cbsgs_wording() {
        let t = CertificateText::derive(
            &record(Gender::NotApplicable, Score::Grade(Some("A+".into()))),
            &params(),
            "October 19, 2026",
        )
        .unwrap();
        assert!(t.course_line.contains("(CBSGS)"));
        assert_eq!(t.score_line, "MAY 2024 AND WAS PLACED IN THE A+ GRADE");
    }

    #[test]
    fn record_without_score_is_an_error() {
        let err = CertificateText::derive(
            &record(Gender::Male, Score::Missing),
            &params(),
            "October 19, 2026",
        )
        .unwrap_err();
        assert!(matches!(err, RecordError::NoScore { ref seat_no } if seat_no == "1234567"));
    }

    #[test]
    fn empty_score_and_name_fall_back_to_na() {
        let mut r = record(Gender::Male, Score::Cgpa(None));
        r.name = None;
        let t = CertificateText::derive(&r, &params(), "x").unwrap();
        assert_eq!(t.name_line, "N/A");
        assert_eq!(t.score_line, "MAY 2024 WITH N/A CGPI");
    }

    #[test]
    fn female_candidates_get_suffix_and_prefix() {
        let t = CertificateText::derive(
            &record(Gender::Female, Score::Grade(Some("O".into()))),
            &params(),
            "x",
        )
        .unwrap();
        assert_eq!(t.gender_suffix, "/ - FEMALE");
        assert_eq!(t.name_line, "/ ASHA PATIL");
    }

    #[test]
    fn layout_has_fixed_signature_block() {
        let t = CertificateText::derive(
            &record(Gender::Male, Score::Grade(Some("B".into()))),
            &params(),
            "x",
        )
        .unwrap();
        let p = t.placements();
        assert_eq!(p.len(), 10);
        assert!(p.iter().any(|l| l.text == "DIRECTOR" && l.color == [0, 0, 0]));
        assert!(p.iter().all(|l| l.font_size == 2.0));
        assert_eq!((p[0].x, p[0].y), (300, 590));
    }

    #[test]
    fn date_format() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(d.format(DATE_FORMAT).to_string(), "March 07, 2024");
    }
}
