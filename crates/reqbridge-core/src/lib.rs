//! Domain model, label normalization, form-schema lookup, field mapping,
//! and row validation for the request bridge.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "reqbridge-core";

/// Fold case, collapse internal whitespace runs to a single space, and trim.
/// Idempotent; canonical form used for all label comparisons.
pub fn canonicalize(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Canonicalize, then drop every non-alphanumeric character. This is the
/// lookup key for choice labels, so "Full-Time", " full-time " and
/// "full time" all land on the same key.
pub fn choice_key(label: &str) -> String {
    canonicalize(label)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Parse a loosely-formatted source date. Accepts `YYYY-MM-DD` with any
/// trailing time component (only the first ten characters are considered).
pub fn parse_source_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let prefix = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// One candidate source row, as handed over by the row source. Ephemeral;
/// exists only for the duration of processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub email: Option<String>,
    pub requester_name: Option<String>,
    pub phone_number: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub cost_center: Option<String>,
    pub comments: Option<String>,
    pub category: Option<String>,
    pub needed_by: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
    pub hardware: Option<String>,
    pub created_on: NaiveDate,
}

impl CandidateRow {
    /// Stable identity of the row. `None` when the e-mail is absent or
    /// blank; such rows are never eligible for processing.
    pub fn identity(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

/// Ordered start/end pair. Constructible only when `start < end` strictly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }
}

/// Per-row result consumed by the run orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Created { ticket_key: String },
    Flagged { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Text,
    Date,
    SingleChoice,
    MultiChoice,
}

impl QuestionKind {
    fn from_code(code: &str) -> Self {
        match code {
            "da" => Self::Date,
            "cs" => Self::SingleChoice,
            "cm" => Self::MultiChoice,
            // "ts", "te", "pg", "text" and anything unrecognized.
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Question {
    pub label: Option<String>,
    pub code: String,
    pub kind: QuestionKind,
    pub choices: Vec<Choice>,
    lookup: HashMap<String, String>,
}

impl Question {
    pub fn resolve_choice(&self, raw_label: &str) -> Option<&str> {
        self.lookup.get(&choice_key(raw_label)).map(String::as_str)
    }
}

/// Raised when the fetched form definition does not have the shape we rely
/// on. Always fatal: a malformed schema cannot safely map anything.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaShapeError {
    #[error("form definition has no design.questions object")]
    MissingQuestions,
    #[error("question {0} is not an object")]
    QuestionShape(String),
    #[error("question {0} has no type code")]
    MissingTypeCode(String),
    #[error("question {0} has a non-array choices field")]
    ChoicesShape(String),
    #[error("question {qid} choice {index} is missing an id or label")]
    ChoiceShape { qid: String, index: usize },
}

/// Per-run lookup from canonical choice label to the target system's
/// internal choice id, per question. Built fresh each run from the fetched
/// form definition; never persisted.
#[derive(Debug, Clone, Default)]
pub struct FormSchema {
    questions: BTreeMap<String, Question>,
}

impl FormSchema {
    /// Strict parse of the raw form definition. The definition is expected
    /// to carry a `design.questions` object mapping question ids to
    /// `{ type, label?, choices?: [{ id, label }] }`.
    pub fn build(raw: &JsonValue) -> Result<Self, SchemaShapeError> {
        let questions_obj = raw
            .get("design")
            .and_then(|design| design.get("questions"))
            .and_then(JsonValue::as_object)
            .ok_or(SchemaShapeError::MissingQuestions)?;

        let mut questions = BTreeMap::new();
        for (qid, value) in questions_obj {
            let qobj = value
                .as_object()
                .ok_or_else(|| SchemaShapeError::QuestionShape(qid.clone()))?;
            let code = qobj
                .get("type")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| SchemaShapeError::MissingTypeCode(qid.clone()))?;
            let label = qobj
                .get("label")
                .and_then(JsonValue::as_str)
                .map(ToString::to_string);

            let mut choices = Vec::new();
            if let Some(raw_choices) = qobj.get("choices") {
                let entries = raw_choices
                    .as_array()
                    .ok_or_else(|| SchemaShapeError::ChoicesShape(qid.clone()))?;
                for (index, entry) in entries.iter().enumerate() {
                    let choice = parse_choice(entry).ok_or_else(|| {
                        SchemaShapeError::ChoiceShape {
                            qid: qid.clone(),
                            index,
                        }
                    })?;
                    choices.push(choice);
                }
            }

            let lookup = choices
                .iter()
                .map(|choice| (choice_key(&choice.label), choice.id.clone()))
                .collect();

            questions.insert(
                qid.clone(),
                Question {
                    label,
                    code: code.to_string(),
                    kind: QuestionKind::from_code(code),
                    choices,
                    lookup,
                },
            );
        }

        Ok(Self { questions })
    }

    pub fn question(&self, qid: &str) -> Option<&Question> {
        self.questions.get(qid)
    }

    /// Resolve a raw choice label to its internal id. `None` is a per-field
    /// mapping failure, never fatal.
    pub fn resolve_choice(&self, qid: &str, raw_label: &str) -> Option<&str> {
        self.question(qid)
            .and_then(|question| question.resolve_choice(raw_label))
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

fn parse_choice(entry: &JsonValue) -> Option<Choice> {
    let obj = entry.as_object()?;
    let id = match obj.get("id")? {
        JsonValue::String(id) => id.clone(),
        JsonValue::Number(id) => id.to_string(),
        _ => return None,
    };
    let label = obj.get("label")?.as_str()?.to_string();
    Some(Choice { id, label })
}

/// Answer value shapes expected by the ticket form API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerValue {
    Text(String),
    Date(NaiveDate),
    Choices(Vec<String>),
}

/// A fully mapped row, ready to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedFields {
    pub summary: String,
    pub description: String,
    pub answers: BTreeMap<String, AnswerValue>,
}

/// Source-field to form-question-id bindings. Defaults match the production
/// form; override via a YAML bindings file when the form is cloned.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FieldBindings {
    pub requester_name: String,
    pub phone_number: String,
    pub department: String,
    pub job_title: String,
    pub cost_center: String,
    pub category: String,
    pub needed_by: String,
    pub ends_on: String,
    pub comments: String,
    pub hardware: String,
}

impl Default for FieldBindings {
    fn default() -> Self {
        Self {
            requester_name: "150".to_string(),
            phone_number: "151".to_string(),
            department: "152".to_string(),
            job_title: "153".to_string(),
            cost_center: "154".to_string(),
            category: "155".to_string(),
            needed_by: "156".to_string(),
            ends_on: "157".to_string(),
            comments: "158".to_string(),
            hardware: "159".to_string(),
        }
    }
}

/// A per-field mapping failure. Recoverable per row; the orchestrator turns
/// it into a flagged outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct MappingError {
    pub field: String,
    pub reason: String,
}

impl MappingError {
    fn missing(field: &str) -> Self {
        Self {
            field: field.to_string(),
            reason: "value is missing".to_string(),
        }
    }

    fn no_choice(field: &str, raw_label: &str) -> Self {
        Self {
            field: field.to_string(),
            reason: format!("no matching choice for '{raw_label}'"),
        }
    }
}

/// Raised when a row violates a domain rule. Recoverable per row.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing date(s) for temporary request")]
    MissingTemporaryDates,
    #[error("Invalid timeframe: temporary")]
    UnorderedTemporaryDates,
}

/// Domain-rule check; a pre-condition for mapping. A temporary request must
/// carry both dates with the needed-by date strictly before the end date.
/// Any other category skips the date-range check.
pub fn validate(row: &CandidateRow) -> Result<(), ValidationError> {
    let Some(category) = row.category.as_deref() else {
        return Ok(());
    };
    if choice_key(category) != "temporary" {
        return Ok(());
    }
    let (Some(start), Some(end)) = (row.needed_by, row.ends_on) else {
        return Err(ValidationError::MissingTemporaryDates);
    };
    if DateRange::new(start, end).is_none() {
        return Err(ValidationError::UnorderedTemporaryDates);
    }
    Ok(())
}

/// Convert one validated row into the answer shapes the form expects. Pure;
/// no network or disk access. Choice labels resolve through the schema
/// lookup only; an unmatched label is a `MappingError`, never a guess.
pub fn map_row(
    row: &CandidateRow,
    schema: &FormSchema,
    bindings: &FieldBindings,
) -> Result<MappedFields, MappingError> {
    let mut answers = BTreeMap::new();

    let category_raw = row
        .category
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| MappingError::missing("category"))?;
    let category_id = schema
        .resolve_choice(&bindings.category, category_raw)
        .ok_or_else(|| MappingError::no_choice("category", category_raw))?;
    answers.insert(
        bindings.category.clone(),
        AnswerValue::Choices(vec![category_id.to_string()]),
    );

    if choice_key(category_raw) == "temporary" {
        let start = row.needed_by.ok_or_else(|| MappingError::missing("needed_by"))?;
        let end = row.ends_on.ok_or_else(|| MappingError::missing("ends_on"))?;
        let range = DateRange::new(start, end).ok_or_else(|| MappingError {
            field: "ends_on".to_string(),
            reason: "end date is not after the needed-by date".to_string(),
        })?;
        answers.insert(bindings.needed_by.clone(), AnswerValue::Date(range.start));
        answers.insert(bindings.ends_on.clone(), AnswerValue::Date(range.end));
    } else if let Some(needed_by) = row.needed_by {
        // Non-temporary requests carry no end date.
        answers.insert(bindings.needed_by.clone(), AnswerValue::Date(needed_by));
    }

    let text_fields = [
        ("requester_name", &bindings.requester_name, &row.requester_name),
        ("phone_number", &bindings.phone_number, &row.phone_number),
        ("department", &bindings.department, &row.department),
        ("job_title", &bindings.job_title, &row.job_title),
        ("cost_center", &bindings.cost_center, &row.cost_center),
        ("comments", &bindings.comments, &row.comments),
    ];
    for (field, qid, value) in text_fields {
        let Some(raw) = value.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) else {
            continue;
        };
        let answer = shape_answer(schema, field, qid, raw)?;
        answers.insert(qid.clone(), answer);
    }

    if let Some(raw) = row.hardware.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        let ids = map_multi_select(schema, "hardware", &bindings.hardware, raw, ';')?;
        if !ids.is_empty() {
            answers.insert(bindings.hardware.clone(), AnswerValue::Choices(ids));
        }
    }

    let requester = row
        .requester_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or_else(|| row.identity())
        .unwrap_or("unknown requester");

    Ok(MappedFields {
        summary: format!("Phone equipment request - {requester}"),
        description: build_description(row),
        answers,
    })
}

/// Shape a raw text value according to the bound question's declared kind.
/// Unknown questions are treated as free text.
fn shape_answer(
    schema: &FormSchema,
    field: &str,
    qid: &str,
    raw: &str,
) -> Result<AnswerValue, MappingError> {
    match schema.question(qid).map(|question| question.kind) {
        None | Some(QuestionKind::Text) => Ok(AnswerValue::Text(raw.to_string())),
        Some(QuestionKind::Date) => parse_source_date(raw)
            .map(AnswerValue::Date)
            .ok_or_else(|| MappingError {
                field: field.to_string(),
                reason: format!("unparseable date '{raw}'"),
            }),
        Some(QuestionKind::SingleChoice) | Some(QuestionKind::MultiChoice) => {
            let ids = map_multi_select(schema, field, qid, raw, ',')?;
            Ok(AnswerValue::Choices(ids))
        }
    }
}

/// Split a delimited value into labels and resolve each through the schema,
/// de-duplicating ids while preserving order.
fn map_multi_select(
    schema: &FormSchema,
    field: &str,
    qid: &str,
    raw: &str,
    delimiter: char,
) -> Result<Vec<String>, MappingError> {
    let mut ids = Vec::new();
    for part in raw.split(delimiter).map(str::trim).filter(|part| !part.is_empty()) {
        let id = schema
            .resolve_choice(qid, part)
            .ok_or_else(|| MappingError::no_choice(field, part))?;
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

fn build_description(row: &CandidateRow) -> String {
    let parts = [
        ("Requested by", &row.requester_name),
        ("Phone number", &row.phone_number),
        ("Department", &row.department),
        ("Job title", &row.job_title),
        ("Cost center", &row.cost_center),
        ("Comments", &row.comments),
    ];
    let lines = parts
        .iter()
        .filter_map(|(label, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| format!("{label}: {value}"))
        })
        .collect::<Vec<_>>();
    if lines.is_empty() {
        "Phone equipment request".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn sample_row() -> CandidateRow {
        CandidateRow {
            email: Some("a@x.com".to_string()),
            requester_name: Some("Dana Reyes".to_string()),
            phone_number: Some("555-0100".to_string()),
            department: Some("Field Ops".to_string()),
            job_title: Some("Technician".to_string()),
            cost_center: Some("CC-204".to_string()),
            comments: None,
            category: Some("Permanent".to_string()),
            needed_by: Some(date(2025, 1, 10)),
            ends_on: None,
            hardware: Some("Desk phone; Wireless headset".to_string()),
            created_on: date(2025, 1, 2),
        }
    }

    fn sample_schema() -> FormSchema {
        let raw = json!({
            "design": {
                "questions": {
                    "150": {"type": "ts", "label": "Requested by"},
                    "151": {"type": "ts", "label": "Phone number"},
                    "152": {"type": "ts", "label": "Department"},
                    "153": {"type": "ts", "label": "Job title"},
                    "154": {"type": "ts", "label": "Cost center"},
                    "155": {
                        "type": "cs",
                        "label": "Timeframe",
                        "choices": [
                            {"id": "10001", "label": "Temporary"},
                            {"id": "10002", "label": "Permanent"}
                        ]
                    },
                    "156": {"type": "da", "label": "Date needed by"},
                    "157": {"type": "da", "label": "Approximate ending date"},
                    "158": {"type": "pg", "label": "Comments"},
                    "159": {
                        "type": "cm",
                        "label": "Handsets and headsets",
                        "choices": [
                            {"id": "20001", "label": "Desk Phone"},
                            {"id": "20002", "label": "Wireless Headset"},
                            {"id": "20003", "label": "Mobile Phone"}
                        ]
                    }
                }
            }
        });
        FormSchema::build(&raw).expect("schema")
    }

    #[test]
    fn canonicalize_folds_case_and_whitespace() {
        assert_eq!(canonicalize("  Full-Time   Staff "), "full-time staff");
        assert_eq!(canonicalize(canonicalize("  Full-Time   Staff ").as_str()), "full-time staff");
        assert_eq!(canonicalize(""), "");
    }

    #[test]
    fn choice_key_folds_spacing_and_punctuation_variants() {
        assert_eq!(choice_key("Full-Time"), "fulltime");
        assert_eq!(choice_key(" full time "), "fulltime");
        assert_eq!(choice_key("FULL TIME"), "fulltime");
        assert_ne!(choice_key("part time"), choice_key("full time"));
    }

    #[test]
    fn source_dates_parse_with_trailing_time() {
        assert_eq!(parse_source_date("2025-01-10"), Some(date(2025, 1, 10)));
        assert_eq!(parse_source_date("2025-01-10T09:30:00Z"), Some(date(2025, 1, 10)));
        assert_eq!(parse_source_date("not a date"), None);
        assert_eq!(parse_source_date(""), None);
    }

    #[test]
    fn schema_build_rejects_missing_questions() {
        assert_eq!(
            FormSchema::build(&json!({"design": {}})).expect_err("missing"),
            SchemaShapeError::MissingQuestions
        );
        assert_eq!(
            FormSchema::build(&json!({})).expect_err("missing"),
            SchemaShapeError::MissingQuestions
        );
    }

    #[test]
    fn schema_build_rejects_malformed_choice_entries() {
        let raw = json!({
            "design": {
                "questions": {
                    "155": {"type": "cs", "choices": [{"label": "Temporary"}]}
                }
            }
        });
        assert_eq!(
            FormSchema::build(&raw).expect_err("bad choice"),
            SchemaShapeError::ChoiceShape {
                qid: "155".to_string(),
                index: 0
            }
        );
    }

    #[test]
    fn schema_build_rejects_question_without_type() {
        let raw = json!({
            "design": {"questions": {"155": {"label": "Timeframe"}}}
        });
        assert_eq!(
            FormSchema::build(&raw).expect_err("no type"),
            SchemaShapeError::MissingTypeCode("155".to_string())
        );
    }

    #[test]
    fn schema_accepts_numeric_choice_ids() {
        let raw = json!({
            "design": {
                "questions": {
                    "155": {"type": "cs", "choices": [{"id": 10001, "label": "Temporary"}]}
                }
            }
        });
        let schema = FormSchema::build(&raw).expect("schema");
        assert_eq!(schema.resolve_choice("155", "temporary"), Some("10001"));
    }

    #[test]
    fn resolve_choice_is_insensitive_to_case_and_spacing() {
        let raw = json!({
            "design": {
                "questions": {
                    "42": {
                        "type": "cs",
                        "label": "Employment Type",
                        "choices": [{"id": "10031", "label": "Full-Time"}]
                    }
                }
            }
        });
        let schema = FormSchema::build(&raw).expect("schema");
        assert_eq!(schema.resolve_choice("42", " Full-Time "), Some("10031"));
        assert_eq!(schema.resolve_choice("42", "full-time"), Some("10031"));
        assert_eq!(schema.resolve_choice("42", "full time"), Some("10031"));
        assert_eq!(schema.resolve_choice("42", "part time"), None);
        assert_eq!(schema.resolve_choice("7", "full time"), None);
    }

    #[test]
    fn temporary_rows_require_an_ordered_date_range() {
        let mut row = sample_row();
        row.category = Some("temporary".to_string());
        row.needed_by = Some(date(2025, 1, 10));
        row.ends_on = Some(date(2025, 1, 10));
        assert_eq!(validate(&row), Err(ValidationError::UnorderedTemporaryDates));

        row.ends_on = Some(date(2025, 1, 11));
        assert_eq!(validate(&row), Ok(()));

        row.ends_on = None;
        assert_eq!(validate(&row), Err(ValidationError::MissingTemporaryDates));
    }

    #[test]
    fn unordered_range_reason_matches_the_flag_text() {
        assert_eq!(
            ValidationError::UnorderedTemporaryDates.to_string(),
            "Invalid timeframe: temporary"
        );
    }

    #[test]
    fn validation_is_category_format_insensitive() {
        let mut row = sample_row();
        row.category = Some(" TEMPORARY ".to_string());
        row.ends_on = None;
        assert_eq!(validate(&row), Err(ValidationError::MissingTemporaryDates));
    }

    #[test]
    fn non_temporary_rows_skip_the_date_check() {
        let mut row = sample_row();
        row.category = Some("Permanent".to_string());
        row.needed_by = None;
        row.ends_on = None;
        assert_eq!(validate(&row), Ok(()));

        row.category = None;
        assert_eq!(validate(&row), Ok(()));
    }

    #[test]
    fn map_row_resolves_category_through_normalization() {
        let schema = sample_schema();
        let bindings = FieldBindings::default();
        let mut row = sample_row();
        row.category = Some("permanent".to_string());

        let mapped = map_row(&row, &schema, &bindings).expect("mapped");
        assert_eq!(
            mapped.answers.get("155"),
            Some(&AnswerValue::Choices(vec!["10002".to_string()]))
        );
        assert_eq!(mapped.summary, "Phone equipment request - Dana Reyes");
        assert!(mapped.description.contains("Department: Field Ops"));
    }

    #[test]
    fn map_row_emits_the_date_pair_for_temporary_rows() {
        let schema = sample_schema();
        let bindings = FieldBindings::default();
        let mut row = sample_row();
        row.category = Some("Temporary".to_string());
        row.needed_by = Some(date(2025, 1, 10));
        row.ends_on = Some(date(2025, 1, 20));

        let mapped = map_row(&row, &schema, &bindings).expect("mapped");
        assert_eq!(
            mapped.answers.get("156"),
            Some(&AnswerValue::Date(date(2025, 1, 10)))
        );
        assert_eq!(
            mapped.answers.get("157"),
            Some(&AnswerValue::Date(date(2025, 1, 20)))
        );
    }

    #[test]
    fn map_row_omits_end_date_for_permanent_rows() {
        let schema = sample_schema();
        let bindings = FieldBindings::default();
        let mut row = sample_row();
        row.ends_on = Some(date(2025, 6, 30));

        let mapped = map_row(&row, &schema, &bindings).expect("mapped");
        assert!(mapped.answers.contains_key("156"));
        assert!(!mapped.answers.contains_key("157"));
    }

    #[test]
    fn map_row_fails_on_unmatched_category() {
        let schema = sample_schema();
        let bindings = FieldBindings::default();
        let mut row = sample_row();
        row.category = Some("Seasonal".to_string());

        let err = map_row(&row, &schema, &bindings).expect_err("no match");
        assert_eq!(err.field, "category");
        assert!(err.reason.contains("Seasonal"));
    }

    #[test]
    fn map_row_fails_on_missing_category() {
        let schema = sample_schema();
        let bindings = FieldBindings::default();
        let mut row = sample_row();
        row.category = None;

        let err = map_row(&row, &schema, &bindings).expect_err("missing");
        assert_eq!(err.field, "category");
    }

    #[test]
    fn hardware_labels_resolve_and_deduplicate() {
        let schema = sample_schema();
        let bindings = FieldBindings::default();
        let mut row = sample_row();
        row.hardware = Some("Desk phone; WIRELESS HEADSET ;desk phone".to_string());

        let mapped = map_row(&row, &schema, &bindings).expect("mapped");
        assert_eq!(
            mapped.answers.get("159"),
            Some(&AnswerValue::Choices(vec![
                "20001".to_string(),
                "20002".to_string()
            ]))
        );
    }

    #[test]
    fn unknown_hardware_label_is_a_mapping_error() {
        let schema = sample_schema();
        let bindings = FieldBindings::default();
        let mut row = sample_row();
        row.hardware = Some("Desk phone; Fax machine".to_string());

        let err = map_row(&row, &schema, &bindings).expect_err("no match");
        assert_eq!(err.field, "hardware");
        assert!(err.reason.contains("Fax machine"));
    }

    #[test]
    fn answer_values_serialize_to_the_wire_shapes() {
        let text = serde_json::to_value(AnswerValue::Text("hello".to_string())).expect("json");
        assert_eq!(text, json!({"text": "hello"}));

        let day = serde_json::to_value(AnswerValue::Date(date(2025, 1, 10))).expect("json");
        assert_eq!(day, json!({"date": "2025-01-10"}));

        let choices =
            serde_json::to_value(AnswerValue::Choices(vec!["10031".to_string()])).expect("json");
        assert_eq!(choices, json!({"choices": ["10031"]}));
    }

    #[test]
    fn identity_rejects_blank_email() {
        let mut row = sample_row();
        row.email = Some("   ".to_string());
        assert_eq!(row.identity(), None);
        row.email = Some(" a@x.com ".to_string());
        assert_eq!(row.identity(), Some("a@x.com"));
    }

    #[test]
    fn field_bindings_deserialize_with_partial_overrides() {
        let bindings: FieldBindings =
            serde_json::from_value(json!({"hardware": "901"})).expect("bindings");
        assert_eq!(bindings.hardware, "901");
        assert_eq!(bindings.category, "155");
    }
}
