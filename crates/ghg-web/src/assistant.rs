//! Natural-language questions over the loaded dataset.
//!
//! The language model and the web search are optional providers behind
//! traits. Without them, or when either fails, the answer is a templated
//! summary of the data context.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ghg_core::{EmissionRecord, InsightsSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::service::DataSnapshot;

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4-turbo-preview";
pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

pub const MAX_WEB_RESULTS: usize = 3;
pub const WEB_SNIPPET_CHARS: usize = 500;
pub const CONVERSATION_WINDOW: usize = 5;
/// Conversation ids remembered at once; the least recently used is evicted.
pub const MAX_CONVERSATIONS: usize = 1000;
const CONTEXT_TOP_EMITTERS: usize = 5;
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider response had no answer")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub content: String,
    pub url: String,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AssistantError>;
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, AssistantError>;
}

pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AssistantError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(PROVIDER_TIMEOUT).build()?,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: OPENAI_CHAT_URL.to_string(),
        })
    }

    /// `OPENAI_API_KEY` (required) and `OPENAI_MODEL`.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string());
        match Self::new(key, model) {
            Ok(chat) => Some(chat),
            Err(err) => {
                error!(error = %err, "language model client unavailable");
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AssistantError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "temperature": 0.7,
                "max_tokens": 1000,
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AssistantError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let completion: ChatCompletion = resp.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(AssistantError::EmptyResponse)
    }
}

pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AssistantError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(PROVIDER_TIMEOUT).build()?,
            api_key: api_key.into(),
            endpoint: TAVILY_SEARCH_URL.to_string(),
        })
    }

    pub fn from_env() -> Option<Self> {
        let key = std::env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty())?;
        match Self::new(key) {
            Ok(search) => Some(search),
            Err(err) => {
                error!(error = %err, "web search client unavailable");
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Deserialize)]
struct TavilyHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: String,
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, AssistantError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "api_key": self.api_key,
                "query": format!("climate emissions {query}"),
                "max_results": max_results,
                "search_depth": "advanced",
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AssistantError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: TavilyResponse = resp.json().await?;
        Ok(parsed
            .results
            .into_iter()
            .map(|hit| WebResult {
                title: hit.title,
                content: hit.content,
                url: hit.url,
            })
            .collect())
    }
}

/// Dataset facts handed to the model and echoed in every answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataContext {
    pub latest_year: Option<i32>,
    pub year_range: String,
    pub total_countries: usize,
    pub total_records: usize,
    pub global_emissions_mt: Option<f64>,
    pub top_emitters: Vec<String>,
}

impl DataContext {
    /// Prefers the insights snapshot persisted by the pipeline and computes
    /// the same facts from the merged table when there is none.
    pub fn from_snapshot(snapshot: &DataSnapshot) -> Self {
        match &snapshot.insights {
            Some(insights) => Self::from_insights(insights),
            None => Self::from_records(&snapshot.emissions),
        }
    }

    pub fn from_insights(insights: &InsightsSnapshot) -> Self {
        Self {
            latest_year: Some(insights.latest_year),
            year_range: insights.year_range.clone(),
            total_countries: insights.total_countries,
            total_records: insights.total_records,
            global_emissions_mt: insights.global_total_mt,
            top_emitters: insights
                .top_emitters
                .iter()
                .take(CONTEXT_TOP_EMITTERS)
                .map(|t| t.country.clone())
                .collect(),
        }
    }

    pub fn from_records(rows: &[EmissionRecord]) -> Self {
        let latest_year = rows.iter().map(|r| r.year).max();
        let earliest = rows.iter().map(|r| r.year).min();
        let year_range = match (earliest, latest_year) {
            (Some(min), Some(max)) => format!("{min} - {max}"),
            _ => "n/a".to_string(),
        };
        let countries: HashSet<&str> = rows.iter().map(|r| r.country.as_str()).collect();

        let mut latest: Vec<(&str, f64)> = rows
            .iter()
            .filter(|r| Some(r.year) == latest_year)
            .filter_map(|r| r.ghg_total_mt.map(|v| (r.country.as_str(), v)))
            .collect();
        let global_emissions_mt: Option<f64> = (!latest.is_empty()).then(|| latest.iter().map(|(_, v)| v).sum());
        latest.sort_by(|a, b| b.1.total_cmp(&a.1));

        Self {
            latest_year,
            year_range,
            total_countries: countries.len(),
            total_records: rows.len(),
            global_emissions_mt,
            top_emitters: latest
                .into_iter()
                .take(CONTEXT_TOP_EMITTERS)
                .map(|(c, _)| c.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<String>,
    pub data_context: DataContext,
    pub web_results: Option<Vec<WebResult>>,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone)]
struct Exchange {
    question: String,
    answer: String,
}

/// Per-id exchange windows with least-recently-used eviction of whole ids.
struct ConversationStore {
    capacity: usize,
    windows: HashMap<String, VecDeque<Exchange>>,
    // front is the least recently used id
    recency: VecDeque<String>,
}

impl ConversationStore {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    fn history(&self, id: &str) -> Vec<Exchange> {
        self.windows
            .get(id)
            .map(|window| window.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn push(&mut self, id: &str, exchange: Exchange) {
        if let Some(pos) = self.recency.iter().position(|known| known == id) {
            self.recency.remove(pos);
        }
        self.recency.push_back(id.to_string());

        let window = self.windows.entry(id.to_string()).or_default();
        window.push_back(exchange);
        while window.len() > CONVERSATION_WINDOW {
            window.pop_front();
        }

        while self.windows.len() > self.capacity {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            self.windows.remove(&oldest);
            debug!(conversation_id = %oldest, "conversation evicted");
        }
    }
}

pub struct QueryAssistant {
    model: Option<Arc<dyn LanguageModel>>,
    search: Option<Arc<dyn WebSearch>>,
    conversations: Mutex<ConversationStore>,
}

impl QueryAssistant {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, search: Option<Arc<dyn WebSearch>>) -> Self {
        Self {
            model,
            search,
            conversations: Mutex::new(ConversationStore::new(MAX_CONVERSATIONS)),
        }
    }

    pub fn from_env() -> Self {
        let model = OpenAiChat::from_env().map(|m| Arc::new(m) as Arc<dyn LanguageModel>);
        let search = TavilySearch::from_env().map(|s| Arc::new(s) as Arc<dyn WebSearch>);
        info!(
            ai_enabled = model.is_some(),
            web_search_enabled = search.is_some(),
            "query assistant configured"
        );
        Self::new(model, search)
    }

    pub fn ai_enabled(&self) -> bool {
        self.model.is_some()
    }

    pub fn web_search_enabled(&self) -> bool {
        self.search.is_some()
    }

    pub async fn answer(
        &self,
        question: &str,
        context: DataContext,
        include_web_search: bool,
        conversation_id: Option<&str>,
    ) -> QueryResponse {
        let started = Instant::now();
        let mut sources = vec!["Emissions Dataset".to_string()];

        let mut web_results = None;
        let mut web_context = String::new();
        if include_web_search {
            if let Some(search) = &self.search {
                let results = match search.search(question, MAX_WEB_RESULTS).await {
                    Ok(results) => truncate_results(results),
                    Err(err) => {
                        error!(error = %err, "web search failed");
                        Vec::new()
                    }
                };
                if !results.is_empty() {
                    web_context.push_str("\n\nRecent information from web search:\n");
                    for r in &results {
                        web_context.push_str(&format!("- {}: {}\n", r.title, r.content));
                    }
                    sources.push("Web Search".to_string());
                }
                web_results = Some(results);
            }
        }

        let answer = match &self.model {
            Some(model) => {
                let mut messages = vec![ChatMessage::new(
                    Role::System,
                    system_prompt(&context, &web_context),
                )];
                for exchange in self.history(conversation_id) {
                    messages.push(ChatMessage::new(Role::User, exchange.question));
                    messages.push(ChatMessage::new(Role::Assistant, exchange.answer));
                }
                messages.push(ChatMessage::new(Role::User, question));
                match model.complete(&messages).await {
                    Ok(answer) => answer,
                    Err(err) => {
                        error!(error = %err, "language model query failed; using fallback");
                        fallback_summary(question, &context)
                    }
                }
            }
            None => fallback_summary(question, &context),
        };

        if let Some(id) = conversation_id {
            self.remember(id, question, &answer);
        }

        QueryResponse {
            answer,
            sources,
            data_context: context,
            web_results,
            processing_time_ms: (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0,
        }
    }

    fn history(&self, conversation_id: Option<&str>) -> Vec<Exchange> {
        let Some(id) = conversation_id else {
            return Vec::new();
        };
        let conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        conversations.history(id)
    }

    fn remember(&self, id: &str, question: &str, answer: &str) {
        let mut conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        conversations.push(
            id,
            Exchange {
                question: question.to_string(),
                answer: answer.to_string(),
            },
        );
    }
}

fn truncate_results(results: Vec<WebResult>) -> Vec<WebResult> {
    results
        .into_iter()
        .take(MAX_WEB_RESULTS)
        .map(|mut r| {
            if r.content.chars().count() > WEB_SNIPPET_CHARS {
                r.content = r.content.chars().take(WEB_SNIPPET_CHARS).collect();
            }
            r
        })
        .collect()
}

fn latest_year_label(context: &DataContext) -> String {
    context
        .latest_year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "Latest Year".to_string())
}

fn global_label(context: &DataContext, decimals: usize) -> String {
    context
        .global_emissions_mt
        .map(|v| format!("{v:.decimals$}"))
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn system_prompt(context: &DataContext, web_context: &str) -> String {
    format!(
        "You are an expert climate data analyst with access to comprehensive global emissions data.

## Data Context
- Latest year in dataset: {latest}
- Year range: {range}
- Total countries: {countries}
- Global emissions: {global} Mt CO2e (if available)
- Top emitters: {top}
{web_context}

## Guidelines
1. Provide accurate, data-driven responses
2. Use specific numbers and statistics when available
3. Explain trends and patterns clearly
4. If uncertain, acknowledge limitations
5. Suggest relevant follow-up questions
6. Format responses with clear structure using markdown

## Response Format
- Use bullet points for lists
- Include relevant statistics
- Provide context for numbers (comparisons, percentages)
- Be concise but comprehensive",
        latest = latest_year_label(context),
        range = context.year_range,
        countries = context.total_countries,
        global = global_label(context, 2),
        top = context.top_emitters.join(", "),
    )
}

/// Deterministic answer used when no language model is configured or it
/// failed.
pub fn fallback_summary(question: &str, context: &DataContext) -> String {
    let top: Vec<String> = context
        .top_emitters
        .iter()
        .take(CONTEXT_TOP_EMITTERS)
        .map(|c| format!("- {c}"))
        .collect();
    format!(
        "Based on the emissions data available:

**Data Overview ({latest}):**
- Global GHG emissions: {global} Mt CO2e
- Countries covered: {countries}
- Year range: {range}

**Top Emitting Countries:**
{top}

*Note: For more detailed AI-powered analysis, please configure the OPENAI_API_KEY environment variable.*

Your question: \"{question}\"
",
        latest = latest_year_label(context),
        global = global_label(context, 1),
        countries = context.total_countries,
        range = context.year_range,
        top = top.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> DataContext {
        DataContext {
            latest_year: Some(2022),
            year_range: "1990 - 2022".into(),
            total_countries: 190,
            total_records: 6000,
            global_emissions_mt: Some(40000.0),
            top_emitters: vec!["China".into(), "United States".into(), "India".into()],
        }
    }

    struct Failing;

    #[async_trait]
    impl LanguageModel for Failing {
        async fn complete(&self, _: &[ChatMessage]) -> Result<String, AssistantError> {
            Err(AssistantError::EmptyResponse)
        }
    }

    /// Answers with the number of messages it was given.
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for Counting {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AssistantError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(messages[0].role, Role::System);
            Ok(format!("{} messages", messages.len()))
        }
    }

    struct LongSnippets;

    #[async_trait]
    impl WebSearch for LongSnippets {
        async fn search(&self, query: &str, _: usize) -> Result<Vec<WebResult>, AssistantError> {
            Ok((0..5)
                .map(|i| WebResult {
                    title: format!("{query} {i}"),
                    content: "x".repeat(900),
                    url: format!("https://example.org/{i}"),
                })
                .collect())
        }
    }

    #[test]
    fn fallback_mentions_the_context() {
        let text = fallback_summary("Who emits most?", &context());
        for needle in ["2022", "40000.0", "190", "1990 - 2022", "- China", "- United States", "- India"] {
            assert!(text.contains(needle), "missing {needle} in {text}");
        }
        assert!(text.contains("Your question: \"Who emits most?\""));
    }

    #[tokio::test]
    async fn without_providers_the_fallback_is_returned() {
        let assistant = QueryAssistant::new(None, None);
        let resp = assistant.answer("Top emitters?", context(), true, None).await;
        assert!(resp.answer.contains("40000.0"));
        assert_eq!(resp.sources, vec!["Emissions Dataset".to_string()]);
        assert!(resp.web_results.is_none());
        assert!(!assistant.ai_enabled());
    }

    #[tokio::test]
    async fn provider_errors_fall_back() {
        let assistant = QueryAssistant::new(Some(Arc::new(Failing)), None);
        let resp = assistant.answer("Top emitters?", context(), false, None).await;
        assert!(resp.answer.starts_with("Based on the emissions data available"));
    }

    #[tokio::test]
    async fn web_results_are_capped_and_truncated() {
        let assistant = QueryAssistant::new(None, Some(Arc::new(LongSnippets)));
        let resp = assistant.answer("methane", context(), true, None).await;
        let results = resp.web_results.unwrap();
        assert_eq!(results.len(), MAX_WEB_RESULTS);
        assert!(results.iter().all(|r| r.content.chars().count() == WEB_SNIPPET_CHARS));
        assert_eq!(resp.sources, vec!["Emissions Dataset", "Web Search"]);
    }

    #[tokio::test]
    async fn conversations_replay_a_bounded_window() {
        let model = Arc::new(Counting::default());
        let assistant = QueryAssistant::new(Some(model.clone()), None);

        let first = assistant.answer("q0", context(), false, Some("c1")).await;
        assert_eq!(first.answer, "2 messages");
        for i in 1..8 {
            assistant.answer(&format!("q{i}"), context(), false, Some("c1")).await;
        }
        // system + 5 replayed exchanges + the new question
        let resp = assistant.answer("again", context(), false, Some("c1")).await;
        assert_eq!(resp.answer, format!("{} messages", 2 + 2 * CONVERSATION_WINDOW));

        let other = assistant.answer("fresh", context(), false, Some("c2")).await;
        assert_eq!(other.answer, "2 messages");
        assert_eq!(model.calls.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn least_recently_used_conversation_is_evicted() {
        let exchange = |q: &str| Exchange {
            question: q.into(),
            answer: "a".into(),
        };
        let mut store = ConversationStore::new(2);
        store.push("a", exchange("1"));
        store.push("b", exchange("2"));
        store.push("a", exchange("3"));
        store.push("c", exchange("4"));

        assert_eq!(store.windows.len(), 2);
        assert!(store.history("b").is_empty());
        assert_eq!(store.history("a").len(), 2);
        assert_eq!(store.history("c").len(), 1);
    }

    #[tokio::test]
    async fn distinct_conversation_ids_stay_bounded() {
        let model = Arc::new(Counting::default());
        let assistant = QueryAssistant::new(Some(model.clone()), None);
        for i in 0..=MAX_CONVERSATIONS {
            let id = format!("c{i}");
            assistant.answer("hello", context(), false, Some(id.as_str())).await;
        }
        let held = assistant.conversations.lock().unwrap().windows.len();
        assert_eq!(held, MAX_CONVERSATIONS);

        // c0 was the oldest id and starts over without history; taking its
        // slot back pushes out c1
        let resp = assistant.answer("hello again", context(), false, Some("c0")).await;
        assert_eq!(resp.answer, "2 messages");
        let resp = assistant.answer("hello again", context(), false, Some("c1")).await;
        assert_eq!(resp.answer, "2 messages");
        let resp = assistant.answer("hello again", context(), false, Some("c3")).await;
        assert_eq!(resp.answer, "4 messages");
    }

    #[test]
    fn context_is_built_from_the_latest_year() {
        use ghg_core::{EmissionRecord, Source};
        let mut rows = Vec::new();
        for (country, iso, total) in [
            ("China", "CHN", 20000.0),
            ("United States", "USA", 12000.0),
            ("India", "IND", 8000.0),
        ] {
            let mut r = EmissionRecord::new(country, Some(iso.into()), 2022, Source::Owid);
            r.ghg_total_mt = Some(total);
            rows.push(r);
        }
        let mut old = EmissionRecord::new("China", Some("CHN".into()), 1990, Source::Owid);
        old.ghg_total_mt = Some(3000.0);
        rows.push(old);

        let snapshot = DataSnapshot {
            emissions: rows,
            sectors: Vec::new(),
            gases: Vec::new(),
            insights: None,
            loaded_at: chrono::Utc::now(),
        };
        let ctx = DataContext::from_snapshot(&snapshot);
        assert_eq!(ctx.latest_year, Some(2022));
        assert_eq!(ctx.year_range, "1990 - 2022");
        assert_eq!(ctx.total_countries, 3);
        assert_eq!(ctx.total_records, 4);
        assert_eq!(ctx.global_emissions_mt, Some(40000.0));
        assert_eq!(ctx.top_emitters, vec!["China", "United States", "India"]);

        // the persisted snapshot says the same thing when it is present
        let persisted = ghg_pipeline::report::generate_insights(&snapshot.emissions, chrono::Utc::now());
        assert_eq!(DataContext::from_insights(persisted.as_ref().unwrap()), ctx);
    }

    #[test]
    fn persisted_insights_are_preferred() {
        use ghg_core::Source;
        let mut row = EmissionRecord::new("Chile", Some("CHL".into()), 2021, Source::Owid);
        row.ghg_total_mt = Some(100.0);
        let rows = vec![row];
        let mut insights = ghg_pipeline::report::generate_insights(&rows, chrono::Utc::now()).unwrap();
        insights.global_total_mt = Some(123.0);

        let snapshot = DataSnapshot {
            emissions: rows,
            sectors: Vec::new(),
            gases: Vec::new(),
            insights: Some(insights),
            loaded_at: chrono::Utc::now(),
        };
        let ctx = DataContext::from_snapshot(&snapshot);
        assert_eq!(ctx.global_emissions_mt, Some(123.0));
        assert_eq!(ctx.top_emitters, vec!["Chile"]);
    }
}
