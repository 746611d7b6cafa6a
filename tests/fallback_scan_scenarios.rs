#[path = "../src/format.rs"]
mod format;

use format::{
    basic_format, format_rows_fallback, merge_duplicates, normalize, resolve_year, OutputRecord,
    SchoolMetadata, COL_CLASS, COL_PLACEHOLDERS, COL_SECOND_CLASS, COL_TEACHER_EMAIL, COL_TEACHER_TITLE,
    COL_YEAR, RECORD_WIDTH,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn rows(v: Value) -> Vec<Vec<Value>> {
    serde_json::from_value(v).expect("rows")
}

fn meta(school_type: &str) -> SchoolMetadata {
    SchoolMetadata {
        school_type: school_type.to_string(),
        ..Default::default()
    }
}

fn strings(v: &[&str]) -> [String; RECORD_WIDTH] {
    let mut out: [String; RECORD_WIDTH] = Default::default();
    for (slot, s) in out.iter_mut().zip(v) {
        *slot = s.to_string();
    }
    out
}

#[test]
fn class_teacher_student_sheet_yields_one_record() {
    let sheet = format_rows_fallback(
        &rows(json!([
            ["Year 3"],
            ["Mrs Smith", "smith@school.nz"],
            ["Anaru Ngata"]
        ])),
        &meta("primary"),
    );
    assert_eq!(
        sheet.rows,
        vec![OutputRecord(strings(&[
            "Ngata",
            "Anaru",
            "Year 3",
            "3",
            "",
            "",
            "Mrs Smith",
            "",
            "",
            "smith@school.nz",
        ]))]
    );
}

#[test]
fn second_class_within_a_year_is_folded_in() {
    let sheet = format_rows_fallback(
        &rows(json!([
            ["Year 3 Kauri"],
            ["Mr Jones", "jones@school.nz"],
            ["Anaru Ngata", "M"],
            ["Mere Tane", "F"],
            ["Year 4 Rimu"],
            ["Miss Brown", "brown@school.nz"],
            ["Anaru Ngata", "M"]
        ])),
        &meta("primary"),
    );
    assert_eq!(sheet.rows.len(), 2);
    let anaru = &sheet.rows[0];
    assert_eq!(anaru.get(COL_CLASS), "Year 3 Kauri");
    assert_eq!(
        &anaru.0[COL_SECOND_CLASS..],
        &["Year 4 Rimu", "4", "", "", "Miss Brown"].map(String::from)[..]
    );
    assert_eq!(sheet.rows[1].get(0), "Tane");
}

#[test]
fn repeat_far_apart_in_years_is_dropped() {
    let sheet = format_rows_fallback(
        &rows(json!([
            ["Year 1"],
            ["Anaru Ngata", "M"],
            ["Year 9"],
            ["Anaru Ngata", "M"]
        ])),
        &meta("k-12"),
    );
    assert_eq!(sheet.rows.len(), 1);
    assert_eq!(sheet.rows[0].get(COL_YEAR), "1");
    assert!(sheet.rows[0].0[COL_SECOND_CLASS..].iter().all(|f| f.is_empty()));
}

#[test]
fn whitespace_rows_never_emit_records() {
    let out = basic_format(
        &rows(json!([[], [""], ["   ", "\t"], [null], [" ", null, ""]])),
        &meta("secondary"),
    );
    assert!(out.is_empty());
}

#[test]
fn every_record_is_fifteen_wide_with_blank_placeholders() {
    let out = basic_format(
        &rows(json!([
            ["Room 12"],
            ["Dr Hohaia", "hohaia@school.nz"],
            ["Wiremu Pōtae", 1, true],
            ["Hine", "x"],
            ["Tūī Kawa Rangi", "y"]
        ])),
        &meta("secondary"),
    );
    assert_eq!(out.len(), 3);
    for r in &out {
        assert_eq!(r.0.len(), RECORD_WIDTH);
        for col in COL_PLACEHOLDERS {
            assert_eq!(r.get(col), "");
        }
        assert_eq!(r.get(COL_TEACHER_TITLE), "Dr Hohaia");
        assert_eq!(r.get(COL_TEACHER_EMAIL), "hohaia@school.nz");
        assert_eq!(r.get(COL_YEAR), "12");
    }
    assert_eq!(out[0].get(0), "Potae");
    assert_eq!((out[1].get(0), out[1].get(1)), ("Hine", ""));
    assert_eq!((out[2].get(0), out[2].get(1)), ("Rangi", "Tui Kawa"));
}

#[test]
fn year_tokens_after_prefix_win_over_surrounding_text() {
    for n in 1..=12 {
        for label in [
            format!("Year {n}"),
            format!("Room 20 yr{n}"),
            format!("Kauri YEAR {n} (2024)"),
        ] {
            assert_eq!(resolve_year(&label, "primary"), n.to_string(), "{label}");
        }
    }
    assert_eq!(resolve_year("Totara Year K", "secondary"), "K");
    assert_eq!(resolve_year("Tui", "middle"), "");
}

#[test]
fn normalizing_twice_changes_nothing() {
    for s in ["Ngā'ti Pōrou ", " ''ā'ē'ī'ō'ū", "O'Neill", "\tMāia\n", ""] {
        let once = normalize(s);
        assert_eq!(normalize(&once), once);
        assert!(!once.contains('\''));
    }
}

#[test]
fn merge_keeps_scan_order() {
    let mk = |last: &str, year: &str| {
        let mut r = OutputRecord::default();
        r.0[0] = last.to_string();
        r.0[COL_YEAR] = year.to_string();
        r
    };
    let out = merge_duplicates(vec![mk("C", "3"), mk("A", "3"), mk("B", "3"), mk("A", "2")]);
    let names: Vec<&str> = out.iter().map(|r| r.get(0)).collect();
    assert_eq!(names, vec!["C", "A", "B"]);
}

#[test]
fn lone_caption_without_keywords_reads_as_a_student() {
    let out = basic_format(
        &rows(json!([["Student List"], ["Year 5"], ["Aroha Wiremu", "F"]])),
        &meta("primary"),
    );
    assert_eq!(out.len(), 2);
    assert_eq!((out[0].get(0), out[0].get(1)), ("List", "Student"));
    assert_eq!(out[0].get(COL_CLASS), "");
    assert_eq!(out[0].get(COL_YEAR), "2");
    assert_eq!(out[1].get(COL_YEAR), "5");
}
