use crate::format::{format_rows_fallback, merge_duplicates, normalize, FormattedSheet, SchoolMetadata};
use crate::google::{SheetSource, TextGenerator};
use crate::llm::{self, LlmFormatError, ParsedSchema};
use crate::results::ResultStore;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatSource {
    Llm,
    Fallback,
}

fn format_with_model(
    rows: &[Vec<Value>],
    metadata: &SchoolMetadata,
    generator: &dyn TextGenerator,
) -> Result<ParsedSchema, LlmFormatError> {
    let prompt = llm::build_prompt(rows, metadata);
    let text = generator
        .generate(&prompt)
        .map_err(|e| LlmFormatError::Request(e.to_string()))?;
    llm::parse_response(&text)
}

/// Model-driven formatting with the rule-based scan as fallback. Never fails.
pub fn format_sheet_data(
    rows: &[Vec<Value>],
    metadata: &SchoolMetadata,
    generator: Option<&dyn TextGenerator>,
) -> (FormattedSheet, FormatSource) {
    let Some(generator) = generator else {
        return (format_rows_fallback(rows, metadata), FormatSource::Fallback);
    };

    match format_with_model(rows, metadata, generator) {
        Ok(parsed) => {
            let cleaned = parsed
                .rows
                .into_iter()
                .map(|mut r| {
                    for cell in r.0.iter_mut() {
                        *cell = normalize(cell);
                    }
                    r
                })
                .collect();
            let sheet = FormattedSheet::with_fixed_headers(merge_duplicates(cleaned));
            (sheet, FormatSource::Llm)
        }
        Err(e) => {
            warn!(error = %e, "model formatting failed, using rule-based formatter");
            (format_rows_fallback(rows, metadata), FormatSource::Fallback)
        }
    }
}

/// Background body of a formatting request: fetch, format, record outcome.
pub fn process_request(
    store: &ResultStore,
    request_id: &str,
    file_id: &str,
    metadata: &SchoolMetadata,
    sheets: &dyn SheetSource,
    generator: Option<&dyn TextGenerator>,
) {
    let rows = match sheets.fetch_rows(file_id) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(request_id, file_id, error = %e, "sheet fetch failed");
            store.fail(
                request_id,
                format!("Error processing sheet: Error fetching sheet data: {e}"),
            );
            return;
        }
    };

    let (sheet, source) = format_sheet_data(&rows, metadata, generator);
    info!(
        request_id,
        rows_in = rows.len(),
        rows_out = sheet.rows.len(),
        ?source,
        "sheet formatted"
    );
    store.complete(request_id, sheet);
}
