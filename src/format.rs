use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const RECORD_WIDTH: usize = 15;

pub const HEADERS: [&str; RECORD_WIDTH] = [
    "Last Name",
    "First Name",
    "Class",
    "Year",
    "Teacher Last",
    "Teacher First",
    "Teacher Title",
    "",
    "",
    "Teacher Email",
    "Second Class",
    "Second Teacher Last",
    "Second Teacher First",
    "Second Teacher Title",
    "Second Teacher Email",
];

// Column positions inside an output record.
pub const COL_LAST: usize = 0;
pub const COL_FIRST: usize = 1;
pub const COL_CLASS: usize = 2;
pub const COL_YEAR: usize = 3;
pub const COL_TEACHER_LAST: usize = 4;
pub const COL_TEACHER_FIRST: usize = 5;
pub const COL_TEACHER_TITLE: usize = 6;
pub const COL_TEACHER_EMAIL: usize = 9;
pub const COL_SECOND_CLASS: usize = 10;
// Always-blank columns H and I.
pub const COL_PLACEHOLDERS: [usize; 2] = [7, 8];

static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:year|yr|class|room)").expect("class pattern"));
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:mr|mrs|miss|ms|dr)").expect("title pattern"));
static PREFIXED_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:year|yr)\s*(\d+|k)\b").expect("prefixed year pattern"));
static BARE_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+|k)").expect("bare year pattern"));

/// One formatted student row. Always exactly [`RECORD_WIDTH`] fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRecord(pub [String; RECORD_WIDTH]);

impl OutputRecord {
    pub fn get(&self, col: usize) -> &str {
        &self.0[col]
    }

    pub fn student_key(&self) -> StudentKey {
        StudentKey {
            last_name: self.get(COL_LAST).to_string(),
            first_name: self.get(COL_FIRST).to_string(),
        }
    }

    pub fn year_number(&self) -> i64 {
        parse_year_number(&self.0[COL_YEAR])
    }
}

/// Normalized (last, first) pair. Two students sharing both names collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StudentKey {
    pub last_name: String,
    pub first_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolMetadata {
    pub school_type: String,
    #[serde(default)]
    pub admin_lastname: Option<String>,
    #[serde(default)]
    pub admin_firstname: Option<String>,
    #[serde(default)]
    pub admin_title: Option<String>,
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

impl SchoolMetadata {
    #[allow(dead_code)]
    pub fn admin_name(&self) -> String {
        [
            self.admin_title.as_deref(),
            self.admin_firstname.as_deref(),
            self.admin_lastname.as_deref(),
        ]
        .iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedSheet {
    pub headers: Vec<String>,
    pub rows: Vec<OutputRecord>,
}

impl FormattedSheet {
    pub fn with_fixed_headers(rows: Vec<OutputRecord>) -> Self {
        FormattedSheet {
            headers: HEADERS.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TeacherContext {
    last: String,
    first: String,
    title: String,
    email: String,
}

#[derive(Debug, Clone, Default)]
struct ClassContext {
    label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellRole {
    Class,
    Title,
    Email,
    Plain,
}

/// Folds macron vowels to ASCII, drops apostrophes, trims.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .filter(|c| *c != '\'')
        .map(|c| match c {
            'ā' => 'a',
            'ē' => 'e',
            'ī' => 'i',
            'ō' => 'o',
            'ū' => 'u',
            other => other,
        })
        .collect();
    folded.trim().to_string()
}

/// Renders a spreadsheet cell as text. Null becomes the empty string.
pub fn cell_text(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub fn resolve_year(class_label: &str, school_type: &str) -> String {
    let caps = PREFIXED_YEAR_RE
        .captures(class_label)
        .or_else(|| BARE_YEAR_RE.captures(class_label));
    if let Some(token) = caps.and_then(|c| c.get(1)) {
        return token.as_str().to_ascii_uppercase();
    }

    match school_type.trim().to_ascii_lowercase().as_str() {
        "secondary" => "9".to_string(),
        "primary" => "2".to_string(),
        "k-12" => "6".to_string(),
        _ => String::new(),
    }
}

/// Last token is the surname; everything before it is the given name(s).
pub fn split_name(full_name: &str) -> (String, String) {
    let parts: Vec<&str> = full_name.split_whitespace().collect();
    match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() => (normalize(last), normalize(&rest.join(" "))),
        _ => (normalize(full_name), String::new()),
    }
}

/// Non-numeric or empty years count as 0.
pub fn parse_year_number(year: &str) -> i64 {
    let t = year.trim();
    if t.is_empty() || !t.chars().all(|c| c.is_ascii_digit()) {
        return 0;
    }
    t.parse::<i64>().unwrap_or(0)
}

fn classify_cell(cell: &str) -> CellRole {
    // A cell takes the first role it matches.
    if CLASS_RE.is_match(cell) {
        CellRole::Class
    } else if TITLE_RE.is_match(cell) {
        CellRole::Title
    } else if cell.contains('@') {
        CellRole::Email
    } else {
        CellRole::Plain
    }
}

fn is_blank_row(row: &[Value]) -> bool {
    row.iter().all(|c| cell_text(c).trim().is_empty())
}

/// Rule-based scan producing one record per detected student row, in row order.
///
/// A row with a single cell that carries no class, title or email keyword is
/// read as a student name, so a lone caption such as "Student List" comes out
/// as a student record.
pub fn basic_format(rows: &[Vec<Value>], metadata: &SchoolMetadata) -> Vec<OutputRecord> {
    let mut out: Vec<OutputRecord> = Vec::new();
    let mut class_ctx = ClassContext::default();
    let mut teacher = TeacherContext::default();

    for raw in rows {
        if is_blank_row(raw) {
            continue;
        }
        let cells: Vec<String> = raw.iter().map(|c| cell_text(c).trim().to_string()).collect();

        let mut has_title = false;
        let mut carried_context = false;
        for cell in &cells {
            match classify_cell(cell) {
                CellRole::Class => {
                    class_ctx.label = cell.clone();
                    carried_context = true;
                }
                CellRole::Title => {
                    teacher.title = cell.clone();
                    carried_context = true;
                }
                CellRole::Email => {
                    teacher.email = cell.clone();
                    carried_context = true;
                }
                CellRole::Plain => {}
            }
            if TITLE_RE.is_match(cell) {
                has_title = true;
            }
        }

        // Rows naming a teacher never name a student. A lone cell counts only
        // when it carried no class/teacher context.
        let is_student = !has_title && (cells.len() >= 2 || !carried_context);
        if !is_student {
            continue;
        }

        let (last_name, first_name) = split_name(&cells[0]);
        let year = resolve_year(&class_ctx.label, &metadata.school_type);
        let mut record = OutputRecord::default();
        record.0[COL_LAST] = last_name;
        record.0[COL_FIRST] = first_name;
        record.0[COL_CLASS] = class_ctx.label.clone();
        record.0[COL_YEAR] = year;
        record.0[COL_TEACHER_LAST] = teacher.last.clone();
        record.0[COL_TEACHER_FIRST] = teacher.first.clone();
        record.0[COL_TEACHER_TITLE] = teacher.title.clone();
        record.0[COL_TEACHER_EMAIL] = teacher.email.clone();
        out.push(record);
    }

    out
}

struct SeenStudent {
    index: usize,
    merged: bool,
}

/// Folds a student's second occurrence into the first record's second-class
/// columns when the years are within one of each other. Repeats that do not
/// merge are dropped; each key merges at most once.
pub fn merge_duplicates(records: Vec<OutputRecord>) -> Vec<OutputRecord> {
    let mut emitted: Vec<OutputRecord> = Vec::with_capacity(records.len());
    let mut seen: HashMap<StudentKey, SeenStudent> = HashMap::new();

    for rec in records {
        let key = rec.student_key();
        let Some(slot) = seen.get_mut(&key) else {
            seen.insert(
                key,
                SeenStudent {
                    index: emitted.len(),
                    merged: false,
                },
            );
            emitted.push(rec);
            continue;
        };

        if slot.merged {
            continue;
        }
        let prev = &mut emitted[slot.index];
        if (prev.year_number() - rec.year_number()).abs() <= 1 {
            // Five source columns starting at Class land in the five
            // second-class columns.
            prev.0[COL_SECOND_CLASS..RECORD_WIDTH]
                .clone_from_slice(&rec.0[COL_CLASS..COL_CLASS + 5]);
            slot.merged = true;
        }
    }

    emitted
}

/// Deterministic path: scan then merge, with the fixed header row attached.
pub fn format_rows_fallback(rows: &[Vec<Value>], metadata: &SchoolMetadata) -> FormattedSheet {
    FormattedSheet::with_fixed_headers(merge_duplicates(basic_format(rows, metadata)))
}
