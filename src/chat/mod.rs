//! Natural-language questions over the dataset.
//!
//! The answering itself belongs to a hosted language model behind
//! [`QueryBackend`]: a dataset and a question go in, a text or a row set
//! comes out. [`ChatService`] turns every failure into a message a user
//! can read.

pub mod gemini;

use crate::config::Config;
use crate::error::{DashboardError, Result};
use crate::loader::Dataset;
use crate::types::Observation;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub type Record = Map<String, Value>;

/// What the backend answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatAnswer {
    Text(String),
    Records(Vec<Record>),
}

/// A user-facing outcome: the answer, or an error message. Serializes as
/// `{"answer": ...}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatReply {
    Answer(ChatAnswer),
    Error(String),
}

/// Trait for language-model backends.
#[async_trait::async_trait]
pub trait QueryBackend: Send + Sync {
    /// Answer `question` about `dataset`.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::Backend`] or a transport error if the call
    /// fails.
    async fn ask(&self, dataset: &Dataset, question: &str) -> Result<ChatAnswer>;
}

/// Front door for chat: refuses early without a backend and never lets a
/// raw fault through.
#[derive(Clone)]
pub struct ChatService {
    backend: Option<Arc<dyn QueryBackend>>,
}

impl ChatService {
    pub fn new(backend: Option<Arc<dyn QueryBackend>>) -> Self {
        Self { backend }
    }

    /// Gemini when the API key is configured, otherwise a service that
    /// refuses every question.
    pub fn from_config(config: &Config) -> Self {
        let backend = config.api_key().ok().map(|key| {
            Arc::new(gemini::GeminiBackend::new(
                key.to_string(),
                config.gemini_model.clone(),
                config.gemini_base_url.clone(),
            )) as Arc<dyn QueryBackend>
        });
        Self::new(backend)
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn ask(&self, dataset: &Dataset, question: &str) -> Result<ChatAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(DashboardError::InvalidParameter {
                name: "question",
                value: String::new(),
                expected: "a non-empty question",
            });
        }
        let backend = self
            .backend
            .as_ref()
            .ok_or(DashboardError::MissingConfiguration {
                key: crate::config::API_KEY_VAR,
            })?;
        log::info!("Chat question: {}", question);
        backend.ask(dataset, question).await
    }

    /// Like [`ChatService::ask`] but with failures folded into the reply.
    pub async fn reply(&self, dataset: &Dataset, question: &str) -> ChatReply {
        match self.ask(dataset, question).await {
            Ok(answer) => ChatReply::Answer(answer),
            Err(e) => {
                log::error!("Chat failed: {}", e);
                ChatReply::Error(format!("Error: {e}"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Per-session transcript, shown back to the user in the dashboard.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn push_user(&mut self, content: &str) {
        self.push("user", content);
    }

    pub fn push_assistant(&mut self, content: &str) {
        self.push("assistant", content);
    }

    fn push(&mut self, role: &str, content: &str) {
        self.messages.push(ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        });
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// Most rows of data sent with a question.
pub const MAX_CONTEXT_ROWS: usize = 15_000;

const CONTEXT_COLUMNS: [&str; 12] = [
    "location",
    "iso_code",
    "date",
    "new_cases",
    "total_cases",
    "new_deaths",
    "total_deaths",
    "total_vaccinations",
    "total_tests",
    "population",
    "gdp_per_capita",
    "human_development_index",
];

fn context_record(o: &Observation) -> [String; 12] {
    let cell = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    [
        o.location.clone(),
        o.iso_code.clone().unwrap_or_default(),
        o.date.to_string(),
        cell(o.new_cases),
        cell(o.total_cases),
        cell(o.new_deaths),
        cell(o.total_deaths),
        cell(o.total_vaccinations),
        cell(o.total_tests),
        cell(o.population),
        cell(o.gdp_per_capita),
        cell(o.human_development_index),
    ]
}

fn sum(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x + y),
        (x, None) => x,
        (None, y) => y,
    }
}

/// One row per calendar month of a date-ordered series: daily counts are
/// summed, everything else keeps its last known value in the month.
fn monthly_rows(series: &[Observation]) -> Vec<Observation> {
    let mut out: Vec<Observation> = Vec::new();
    for o in series {
        match out.last_mut() {
            Some(m) if m.year == o.year && m.date.month() == o.date.month() => {
                m.date = o.date;
                m.new_cases = sum(m.new_cases, o.new_cases);
                m.new_deaths = sum(m.new_deaths, o.new_deaths);
                m.iso_code = o.iso_code.clone().or(m.iso_code.take());
                m.total_cases = o.total_cases.or(m.total_cases);
                m.total_deaths = o.total_deaths.or(m.total_deaths);
                m.total_vaccinations = o.total_vaccinations.or(m.total_vaccinations);
                m.total_tests = o.total_tests.or(m.total_tests);
                m.population = o.population.or(m.population);
                m.gdp_per_capita = o.gdp_per_capita.or(m.gdp_per_capita);
                m.human_development_index =
                    o.human_development_index.or(m.human_development_index);
            }
            _ => out.push(o.clone()),
        }
    }
    out
}

/// The dataset as the model sees it: a description followed by the data
/// as CSV. Daily rows are sent whole up to [`MAX_CONTEXT_ROWS`]; larger
/// datasets go as monthly rows, cut at the same limit.
pub fn dataset_context(dataset: &Dataset) -> Result<String> {
    context_with_limit(dataset, MAX_CONTEXT_ROWS)
}

fn context_with_limit(dataset: &Dataset, max_rows: usize) -> Result<String> {
    let monthly = dataset.row_count() > max_rows;
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(CONTEXT_COLUMNS)?;

    let mut written = 0usize;
    let mut available = 0usize;
    for location in dataset.locations() {
        let series = dataset.country_series(location);
        let aggregated;
        let rows: &[Observation] = if monthly {
            aggregated = monthly_rows(series);
            &aggregated
        } else {
            series
        };
        available += rows.len();
        for o in rows.iter().take(max_rows - written) {
            wtr.write_record(context_record(o))?;
            written += 1;
        }
    }
    let data = wtr
        .into_inner()
        .map_err(|e| DashboardError::backend(e.to_string()))?;
    let data = String::from_utf8_lossy(&data);

    let range = dataset
        .date_range()
        .map(|(a, b)| format!("{a} to {b}"))
        .unwrap_or_else(|| "empty".to_string());
    let shape = if monthly {
        "One row per location and month: new_cases and new_deaths are monthly \
         sums, date is the last day observed in the month and the other \
         columns are their last value in that month."
    } else {
        "One row per location and day."
    };
    let cut = if written < available {
        log::warn!("Chat context cut to {written} of {available} rows");
        format!("Only the first {written} of {available} rows are included.\n")
    } else {
        String::new()
    };

    Ok(format!(
        "The dataset has {} daily rows for {} locations covering {}.\n\
         {shape}\n{cut}Columns: {}.\n\
         Data:\n{}",
        dataset.row_count(),
        dataset.locations().len(),
        range,
        CONTEXT_COLUMNS.join(", "),
        data
    ))
}

/// Interpret the model's reply. JSON `{"records": [...]}` is a row set,
/// `{"answer": ...}` a text answer; anything else is taken as plain text.
pub fn parse_answer(raw: &str) -> ChatAnswer {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(mut obj)) => {
            if let Some(Value::Array(rows)) = obj.remove("records") {
                let records: Vec<Record> = rows
                    .into_iter()
                    .filter_map(|r| match r {
                        Value::Object(m) => Some(m),
                        _ => None,
                    })
                    .collect();
                return ChatAnswer::Records(records);
            }
            match obj.remove("answer") {
                Some(Value::String(s)) => ChatAnswer::Text(s),
                Some(other) => ChatAnswer::Text(other.to_string()),
                None => ChatAnswer::Text(body.to_string()),
            }
        }
        _ => ChatAnswer::Text(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::read_observations;

    struct Canned(Result<ChatAnswer>);

    #[async_trait::async_trait]
    impl QueryBackend for Canned {
        async fn ask(&self, _dataset: &Dataset, _question: &str) -> Result<ChatAnswer> {
            match &self.0 {
                Ok(a) => Ok(a.clone()),
                Err(e) => Err(DashboardError::backend(e.to_string())),
            }
        }
    }

    fn dataset() -> Dataset {
        let csv = "location,iso_code,date,total_cases,population\n\
                   Chile,CHL,2021-01-01,10,100\nChile,CHL,2021-01-02,12,100\n";
        read_observations(csv.as_bytes()).unwrap().0
    }

    #[test]
    fn parses_text_records_and_plain_replies() {
        assert_eq!(
            parse_answer(r#"{"answer": "India"}"#),
            ChatAnswer::Text("India".to_string())
        );
        assert_eq!(parse_answer(r#"{"answer": 42}"#), ChatAnswer::Text("42".to_string()));
        assert_eq!(
            parse_answer("Plain words."),
            ChatAnswer::Text("Plain words.".to_string())
        );
        let fenced = "```json\n{\"records\": [{\"location\": \"Chile\", \"cases\": 12}, 3]}\n```";
        match parse_answer(fenced) {
            ChatAnswer::Records(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["location"], "Chile");
            }
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[test]
    fn context_sends_every_daily_row() {
        let ctx = dataset_context(&dataset()).unwrap();
        assert!(ctx.contains("2 daily rows for 1 locations"));
        assert!(ctx.contains("One row per location and day."));
        assert!(ctx.contains("Chile,CHL,2021-01-01,,10,"));
        assert!(ctx.contains("Chile,CHL,2021-01-02,,12,"));
        assert!(ctx.contains(&format!("Columns: {}.", CONTEXT_COLUMNS.join(", "))));
        assert!(ctx.contains(&CONTEXT_COLUMNS.join(",")));
        assert!(!ctx.contains("Only the first"));
    }

    #[test]
    fn large_datasets_go_monthly_and_are_capped() {
        let csv = "location,iso_code,date,new_cases,total_cases\n\
                   Peru,PER,2021-01-01,1,1\nPeru,PER,2021-01-02,2,3\n\
                   Peru,PER,2021-01-03,3,\nPeru,PER,2021-02-01,4,10\n\
                   Togo,TGO,2021-01-05,5,5\n";
        let (ds, _) = read_observations(csv.as_bytes()).unwrap();

        let ctx = context_with_limit(&ds, 3).unwrap();
        assert!(ctx.contains("One row per location and month"));
        assert!(ctx.contains("Peru,PER,2021-01-03,6,3,"));
        assert!(ctx.contains("Peru,PER,2021-02-01,4,10,"));
        assert!(ctx.contains("Togo,TGO,2021-01-05,5,5,"));
        assert!(!ctx.contains("Only the first"));

        let ctx = context_with_limit(&ds, 2).unwrap();
        assert!(ctx.contains("Only the first 2 of 3 rows are included."));
        assert!(!ctx.contains("Togo,TGO"));
    }

    #[tokio::test]
    async fn missing_backend_fails_fast() {
        let service = ChatService::new(None);
        assert!(!service.is_configured());
        let err = service.ask(&dataset(), "Which country?").await.unwrap_err();
        assert!(matches!(err, DashboardError::MissingConfiguration { .. }));
        match service.reply(&dataset(), "Which country?").await {
            ChatReply::Error(msg) => assert!(msg.contains("GEMINI_API_KEY")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_failures_become_messages() {
        let service = ChatService::new(Some(Arc::new(Canned(Err(DashboardError::backend(
            "quota exceeded",
        ))))));
        match service.reply(&dataset(), "How many cases?").await {
            ChatReply::Error(msg) => assert!(msg.contains("quota exceeded")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn answers_pass_through_and_serialize() {
        let service = ChatService::new(Some(Arc::new(Canned(Ok(ChatAnswer::Text(
            "12".to_string(),
        ))))));
        let reply = service.reply(&dataset(), "How many cases?").await;
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"answer": "12"})
        );
        assert!(service.ask(&dataset(), "   ").await.is_err());
    }

    #[test]
    fn history_keeps_roles_in_order() {
        let mut h = ChatHistory::default();
        h.push_user("hi");
        h.push_assistant("hello");
        let roles: Vec<_> = h.messages().iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
    }
}
