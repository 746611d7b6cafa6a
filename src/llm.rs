use crate::format::{cell_text, OutputRecord, SchoolMetadata, COL_PLACEHOLDERS, HEADERS, RECORD_WIDTH};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LlmFormatError {
    #[error("model call failed: {0}")]
    Request(String),
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response does not match the roster schema: {0}")]
    Schema(String),
}

/// Rows validated against the fixed column layout. Cells are raw model text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSchema {
    pub rows: Vec<OutputRecord>,
}

pub fn build_prompt(rows: &[Vec<Value>], metadata: &SchoolMetadata) -> String {
    let sheet_text = rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>().join("\t"))
        .collect::<Vec<_>>()
        .join("\n");
    let headers_json = serde_json::to_string(&HEADERS).unwrap_or_default();

    format!(
        r#"Analyze this spreadsheet data and format it according to these rules:
1. Identify student names, class names, and teacher information
2. For each student:
   - Split names into last name (col A) and first name (col B)
   - Identify their class (col C)
   - Determine year group (col D) - use K for kindergarten, numbers 1-12 for other years
   - Extract teacher's last name (col E), first name (col F), and title (col G)
   - Leave columns H and I blank
   - Add teacher's email if available (col J)
3. For duplicate students (same name in different classes):
   - Keep first occurrence
   - Add second class info in columns K-O
   - Only match if classes are within 1 year of each other
4. Use metadata for missing teacher info:
   School Type: {school_type}
   Admin Name: {admin_name}
   Admin Email: {admin_email}

Spreadsheet data:
{sheet_text}

Return only the data in this exact JSON format, with every row holding exactly {width} strings:
{{
    "headers": {headers_json},
    "rows": [
        ["last", "first", "class", "year", "tlast", "tfirst", "title", "", "", "email",
         "sclass", "stlast", "stfirst", "sttitle", "stemail"]
    ]
}}
"#,
        school_type = metadata.school_type,
        admin_name = metadata.admin_name(),
        admin_email = metadata.admin_email.as_deref().unwrap_or(""),
        width = RECORD_WIDTH,
    )
}

fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // Drop an info string such as "json" on the opening fence line.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn scalar_text(cell: &Value) -> Option<String> {
    match cell {
        Value::Array(_) | Value::Object(_) => None,
        other => Some(cell_text(other)),
    }
}

pub fn parse_response(text: &str) -> Result<ParsedSchema, LlmFormatError> {
    let doc: Value = serde_json::from_str(strip_code_fence(text))?;
    let rows = doc
        .get("rows")
        .and_then(|v| v.as_array())
        .ok_or_else(|| LlmFormatError::Schema("missing rows array".to_string()))?;

    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let cells = row
            .as_array()
            .ok_or_else(|| LlmFormatError::Schema(format!("row {i} is not an array")))?;
        if cells.len() != RECORD_WIDTH {
            return Err(LlmFormatError::Schema(format!(
                "row {i} has {} cells, expected {RECORD_WIDTH}",
                cells.len()
            )));
        }
        let mut record = OutputRecord::default();
        for (slot, cell) in record.0.iter_mut().zip(cells) {
            *slot = scalar_text(cell)
                .ok_or_else(|| LlmFormatError::Schema(format!("row {i} has a nested cell")))?;
        }
        for col in COL_PLACEHOLDERS {
            record.0[col].clear();
        }
        out.push(record);
    }
    Ok(ParsedSchema { rows: out })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row_json(last: &str, year: Value) -> Value {
        json!([last, "Anaru", "Year 3", year, "", "", "Mrs", "", "", "", "", "", "", "", ""])
    }

    #[test]
    fn prompt_carries_sheet_and_metadata() {
        let rows: Vec<Vec<Value>> = vec![vec![json!("Year 3")], vec![json!("Anaru Ngata"), json!(8)]];
        let meta = SchoolMetadata {
            school_type: "primary".to_string(),
            admin_firstname: Some("Mere".to_string()),
            admin_lastname: Some("Tane".to_string()),
            admin_email: Some("office@school.nz".to_string()),
            ..Default::default()
        };
        let prompt = build_prompt(&rows, &meta);
        assert!(prompt.contains("Year 3\nAnaru Ngata\t8"));
        assert!(prompt.contains("School Type: primary"));
        assert!(prompt.contains("Admin Name: Mere Tane"));
        assert!(prompt.contains("Admin Email: office@school.nz"));
        assert!(prompt.contains("\"Second Teacher Email\""));
    }

    #[test]
    fn parse_accepts_fenced_json_and_numbers() {
        let body = json!({ "headers": HEADERS, "rows": [row_json("Ngata", json!(3))] });
        let text = format!("```json\n{body}\n```");
        let parsed = parse_response(&text).expect("parse");
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].get(0), "Ngata");
        assert_eq!(parsed.rows[0].get(3), "3");
    }

    #[test]
    fn parse_rejects_malformed_output() {
        assert!(matches!(parse_response("Sure! Here you go"), Err(LlmFormatError::Json(_))));
        assert!(matches!(
            parse_response(r#"{"headers": []}"#),
            Err(LlmFormatError::Schema(_))
        ));
        assert!(matches!(
            parse_response(r#"{"rows": [["Ngata", "Anaru"]]}"#),
            Err(LlmFormatError::Schema(_))
        ));
        let nested = json!({ "rows": [row_json("Ngata", json!({ "y": 3 }))] });
        assert!(matches!(
            parse_response(&nested.to_string()),
            Err(LlmFormatError::Schema(_))
        ));
    }
}
