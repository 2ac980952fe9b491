//! Filter-Extraction Reconciler: turns a natural-language query plus a
//! language-model response into a validated [`ExtractedFilters`].
//!
//! The model is asked to invoke a single `filter_events` tool. Everything it
//! hands back is treated as untrusted: tool parameters are parsed
//! defensively, free-text answers are screened for tool-plan leakage and
//! corruption, and every failure path degrades to deterministic keyword
//! extraction. A query never produces an unconstrained filter silently.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::{FILTER_TOOL_NAME, MAX_CONTEXT_MESSAGES};
use crate::domain::{fallback_keywords, parse_event_date, ChatTurn, ExtractedFilters};
use crate::llm::{ChatModel, ChatReply, ChatRequest, ToolParameter, ToolSpec};
use crate::observability;

const PREAMBLE: &str = "You are a helpful assistant that ONLY answers questions about events in Toronto. \
If the user asks about anything other than events (like general questions, math, weather, etc.), politely redirect them to ask about events. \
For ALL event-related queries, you MUST use the filter_events tool to extract search filters. \
Only respond directly with text if the user asks something completely unrelated to events.";

/// Model text narrating an intended tool call instead of answering.
static TOOL_PLAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)I will use the|I'll use the|filter_events|extract_event_filters|I will search|I'll search")
        .expect("tool-plan regex")
});

/// Literal date-format spam seen in corrupted completions.
static DATE_SPAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"DD-DD-DD").expect("date-spam regex"));

/// A sentence fragment repeated at least three times.
static FRAGMENT_SPAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"I'm looking for.*I'm looking for.*I'm looking for").expect("fragment-spam regex")
});

/// Does the query look like it is about events at all?
static EVENT_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)event|show|concert|festival|exhibition|workshop|class|meeting|gathering|activity")
        .expect("event-query regex")
});

static FREE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfree\b").expect("free regex"));

#[derive(Debug, Clone)]
pub struct ExtractionRequest<'a> {
    pub query: &'a str,
    pub available_themes: &'a [String],
    pub available_categories: &'a [String],
    pub chat_context: &'a [ChatTurn],
}

/// Result of reconciliation: always a usable filter, plus a direct
/// conversational reply when the model chose not to invoke the tool.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub filters: ExtractedFilters,
    pub response: Option<String>,
}

/// Run the full extraction pipeline. Infallible by design: any upstream
/// failure collapses into a keyword-only filter.
pub async fn extract_filters(
    model: &dyn ChatModel,
    request: &ExtractionRequest<'_>,
    today: NaiveDate,
) -> Extraction {
    let themes_vocab: BTreeSet<String> = request.available_themes.iter().cloned().collect();
    let categories_vocab: BTreeSet<String> = request.available_categories.iter().cloned().collect();

    let chat_request = build_chat_request(request, &themes_vocab, &categories_vocab, today);

    let started = std::time::Instant::now();
    let outcome = model.chat(chat_request).await;
    observability::search::model_duration(started.elapsed().as_secs_f64());

    let (mut filters, response) = match outcome {
        Ok(reply) => reconcile_reply(reply, request.query),
        Err(err) => {
            warn!(error = %err, "Language model call failed, using keyword fallback");
            observability::search::fallback_used("model_error");
            (ExtractedFilters::keyword_fallback(request.query), None)
        }
    };

    enhance_relative_dates(&mut filters, request.query, today);
    enhance_free_preference(&mut filters, request.query);
    let filters = validate(filters, &themes_vocab, &categories_vocab, request.query);

    Extraction { filters, response }
}

fn build_chat_request(
    request: &ExtractionRequest<'_>,
    themes_vocab: &BTreeSet<String>,
    categories_vocab: &BTreeSet<String>,
    today: NaiveDate,
) -> ChatRequest {
    let join = |vocab: &BTreeSet<String>| {
        if vocab.is_empty() {
            "None".to_string()
        } else {
            vocab.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    };
    let themes_list = join(themes_vocab);
    let categories_list = join(categories_vocab);

    let mut parameters = BTreeMap::new();
    parameters.insert(
        "dateStart".to_string(),
        ToolParameter {
            description: "Start date in ISO format YYYY-MM-DD. Convert relative dates like today, tomorrow, this weekend, next week to actual dates. Only include if the user mentions a specific date or time period.".to_string(),
            param_type: "str",
            required: false,
        },
    );
    parameters.insert(
        "dateEnd".to_string(),
        ToolParameter {
            description: "End date in ISO format YYYY-MM-DD. Use same as dateStart for single-day events.".to_string(),
            param_type: "str",
            required: false,
        },
    );
    parameters.insert(
        "isFree".to_string(),
        ToolParameter {
            description: "True for free events only, false for paid only, omit for no preference. Preserve from context unless changed.".to_string(),
            param_type: "bool",
            required: false,
        },
    );
    parameters.insert(
        "isAccessible".to_string(),
        ToolParameter {
            description: "True for accessible events only, false otherwise, omit for no preference. Preserve from context unless changed.".to_string(),
            param_type: "bool",
            required: false,
        },
    );
    parameters.insert(
        "themes".to_string(),
        ToolParameter {
            description: format!(
                "Comma-separated or JSON array of theme names. Use ONLY from: {themes_list}. Omit if no theme filter."
            ),
            param_type: "str",
            required: false,
        },
    );
    parameters.insert(
        "categories".to_string(),
        ToolParameter {
            description: format!(
                "Comma-separated or JSON array of category names. Use ONLY from: {categories_list}. Omit if no category filter."
            ),
            param_type: "str",
            required: false,
        },
    );
    parameters.insert(
        "keywords".to_string(),
        ToolParameter {
            description: "Comma-separated or JSON array of keywords for text search. Only use if date cannot be converted to ISO format.".to_string(),
            param_type: "str",
            required: false,
        },
    );

    let tool = ToolSpec {
        name: FILTER_TOOL_NAME.to_string(),
        description: format!(
            "ALWAYS use this tool when the user asks about finding events in Toronto. \
             Extract search filters from their query. Only include date/category/theme/free/accessible \
             when the user clearly asks for them. Current date: {today}. \
             Available themes (use only these exact strings or omit): {themes_list}. \
             Available categories (use only these exact strings or omit): {categories_list}."
        ),
        parameter_definitions: parameters,
    };

    let history_start = request.chat_context.len().saturating_sub(MAX_CONTEXT_MESSAGES);
    ChatRequest {
        message: request.query.to_string(),
        preamble: Some(PREAMBLE.to_string()),
        chat_history: request.chat_context[history_start..].to_vec(),
        tools: vec![tool],
        temperature: 0.3,
        max_tokens: 300,
    }
}

/// Turn the model reply into provisional filters and/or a direct answer.
fn reconcile_reply(reply: ChatReply, query: &str) -> (ExtractedFilters, Option<String>) {
    if let Some(call) = reply.tool_calls.first() {
        if call.name != FILTER_TOOL_NAME {
            warn!(tool = %call.name, "Model invoked an undeclared tool");
            observability::search::fallback_used("unknown_tool");
            return (ExtractedFilters::keyword_fallback(query), None);
        }
        return match parse_tool_parameters(&call.parameters) {
            Some(filters) => {
                observability::search::tool_call_extracted();
                debug!(?filters, "Extracted filters from tool call");
                (filters, None)
            }
            None => {
                warn!("Tool parameters were not a parameter object");
                observability::search::fallback_used("bad_tool_parameters");
                (ExtractedFilters::keyword_fallback(query), None)
            }
        };
    }

    // No tool call: the model answered directly.
    let mut filters = ExtractedFilters::default();
    let mut response = None;
    if let Some(text) = reply.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let is_plan = TOOL_PLAN.is_match(text);
        let corrupted = is_corrupted(text);
        if !is_plan && !corrupted {
            observability::search::direct_reply();
            response = Some(text.to_string());
        } else if corrupted {
            let prefix: String = text.chars().take(100).collect();
            warn!(%prefix, "Ignoring corrupted model text");
            observability::search::fallback_used("corrupted_text");
            if EVENT_QUERY.is_match(query) {
                filters = ExtractedFilters::keyword_fallback(query);
            }
        }
    }

    if filters.is_unconstrained() {
        filters = ExtractedFilters::keyword_fallback(query);
    }
    (filters, response)
}

/// Corruption heuristics for free-text answers: anything this long, this
/// repetitive, or carrying date-format spam came out of a degenerate sampling
/// loop and must not be shown to the user.
fn is_corrupted(text: &str) -> bool {
    text.chars().count() > 500
        || has_repeated_char(text, 10)
        || DATE_SPAM.is_match(text)
        || FRAGMENT_SPAM.is_match(text)
        || text.split_whitespace().count() > 200
}

/// Any character repeated more than `limit` times consecutively.
fn has_repeated_char(text: &str, limit: usize) -> bool {
    let mut run = 0usize;
    let mut previous: Option<char> = None;
    for c in text.chars() {
        if Some(c) == previous {
            run += 1;
            if run > limit {
                return true;
            }
        } else {
            previous = Some(c);
            run = 0;
        }
    }
    false
}

/// List parameters arrive as JSON arrays, JSON-array strings, or plain
/// delimiter-separated strings.
fn parse_string_or_array(value: &Value) -> Option<Vec<String>> {
    fn strings(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect()
    }

    match value {
        Value::Array(items) => Some(strings(items)),
        Value::String(raw) => {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
                return Some(strings(&items));
            }
            Some(
                raw.split([',', ';'])
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        }
        _ => None,
    }
}

/// Defensive parse of `filter_events` parameters. Booleans are accepted only
/// as literal true/false; anything else stays tri-state null.
fn parse_tool_parameters(parameters: &Value) -> Option<ExtractedFilters> {
    if !parameters.is_object() {
        return None;
    }
    Some(ExtractedFilters {
        date_start: parameters["dateStart"].as_str().map(str::to_string),
        date_end: parameters["dateEnd"].as_str().map(str::to_string),
        is_free: parameters["isFree"].as_bool(),
        is_accessible: parameters["isAccessible"].as_bool(),
        themes: parse_string_or_array(&parameters["themes"]),
        categories: parse_string_or_array(&parameters["categories"]),
        keywords: parse_string_or_array(&parameters["keywords"]),
    })
}

fn retain_keywords(filters: &mut ExtractedFilters, keep: impl Fn(&str) -> bool) {
    if let Some(keywords) = filters.keywords.as_mut() {
        keywords.retain(|k| keep(k));
    }
}

/// Deterministic relative-date conversion, applied only when the model left
/// both dates unset. The matched phrase is stripped from the keyword list so
/// it is not double-counted as a text search term.
fn enhance_relative_dates(filters: &mut ExtractedFilters, query: &str, today: NaiveDate) {
    if filters.date_start.is_some() || filters.date_end.is_some() {
        return;
    }
    let query_lower = query.to_lowercase();

    if query_lower.contains("weekend") && !query_lower.contains("next weekend") {
        let days_to_saturday = (6 - today.weekday().num_days_from_sunday() as i64 + 7) % 7;
        let saturday = today + Duration::days(days_to_saturday);
        let sunday = saturday + Duration::days(1);
        filters.date_start = Some(saturday.format("%Y-%m-%d").to_string());
        filters.date_end = Some(sunday.format("%Y-%m-%d").to_string());
        retain_keywords(filters, |k| !k.to_lowercase().contains("weekend"));
        debug!(start = ?filters.date_start, end = ?filters.date_end, "Converted \"weekend\" to dates");
    } else if query_lower.contains("tomorrow") {
        let tomorrow = (today + Duration::days(1)).format("%Y-%m-%d").to_string();
        filters.date_start = Some(tomorrow.clone());
        filters.date_end = Some(tomorrow);
        retain_keywords(filters, |k| !k.eq_ignore_ascii_case("tomorrow"));
    } else if query_lower.contains("today") {
        let date = today.format("%Y-%m-%d").to_string();
        filters.date_start = Some(date.clone());
        filters.date_end = Some(date);
        retain_keywords(filters, |k| !k.eq_ignore_ascii_case("today"));
    } else if query_lower.contains("next week") {
        let start = today + Duration::days(7);
        let end = start + Duration::days(7);
        filters.date_start = Some(start.format("%Y-%m-%d").to_string());
        filters.date_end = Some(end.format("%Y-%m-%d").to_string());
        retain_keywords(filters, |k| !k.to_lowercase().contains("next week"));
    }
}

/// Queries that say "free" get the free-only preference even when extraction
/// ran on the keyword path and never saw the tool.
fn enhance_free_preference(filters: &mut ExtractedFilters, query: &str) {
    if filters.is_free.is_none() && FREE_WORD.is_match(query) {
        filters.is_free = Some(true);
    }
}

/// Final validation pass: vocabulary containment for themes/categories,
/// malformed dates coerced to absent, and the empty-filter invariant.
fn validate(
    mut filters: ExtractedFilters,
    themes_vocab: &BTreeSet<String>,
    categories_vocab: &BTreeSet<String>,
    query: &str,
) -> ExtractedFilters {
    filters.date_start = filters
        .date_start
        .filter(|d| parse_event_date(d).is_some());
    filters.date_end = filters.date_end.filter(|d| parse_event_date(d).is_some());
    if let Some(themes) = filters.themes.as_mut() {
        themes.retain(|t| themes_vocab.contains(t));
    }
    if let Some(categories) = filters.categories.as_mut() {
        categories.retain(|c| categories_vocab.contains(c));
    }
    if let Some(keywords) = filters.keywords.as_mut() {
        keywords.retain(|k| !k.is_empty());
    }

    if filters.is_unconstrained() {
        filters.keywords = Some(fallback_keywords(query));
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{StaticChatModel, ToolCall};
    use serde_json::json;

    fn vocab(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn request<'a>(
        query: &'a str,
        themes: &'a [String],
        categories: &'a [String],
    ) -> ExtractionRequest<'a> {
        ExtractionRequest {
            query,
            available_themes: themes,
            available_categories: categories,
            chat_context: &[],
        }
    }

    fn today() -> NaiveDate {
        // a Wednesday
        NaiveDate::from_ymd_opt(2025, 6, 4).unwrap()
    }

    fn tool_reply(parameters: Value) -> ChatReply {
        ChatReply {
            text: None,
            tool_calls: vec![ToolCall {
                name: FILTER_TOOL_NAME.to_string(),
                parameters,
            }],
        }
    }

    #[tokio::test]
    async fn weekend_query_without_tool_call_gets_dates_and_free_flag() {
        let model = StaticChatModel::silent();
        let themes = vocab(&[]);
        let categories = vocab(&[]);
        let extraction = extract_filters(
            &model,
            &request("free events this weekend", &themes, &categories),
            today(),
        )
        .await;

        let filters = extraction.filters;
        // Wednesday June 4 → Saturday June 7, Sunday June 8
        assert_eq!(filters.date_start.as_deref(), Some("2025-06-07"));
        assert_eq!(filters.date_end.as_deref(), Some("2025-06-08"));
        assert_eq!(filters.is_free, Some(true));
        let keywords = filters.keywords.unwrap();
        assert!(!keywords.iter().any(|k| k.to_lowercase().contains("weekend")));
        assert!(extraction.response.is_none());
    }

    #[tokio::test]
    async fn tool_call_parameters_accept_arrays_and_delimited_strings() {
        let model = StaticChatModel::replying(tool_reply(json!({
            "dateStart": "2025-06-10",
            "dateEnd": "2025-06-12",
            "isFree": true,
            "isAccessible": "yes please", // not a literal boolean → null
            "themes": ["Culture", "Bogus"],
            "categories": "Music; Sports",
            "keywords": "[\"jazz\"]",
        })));
        let themes = vocab(&["Culture", "Family"]);
        let categories = vocab(&["Music", "Sports"]);
        let extraction =
            extract_filters(&model, &request("doesn't matter", &themes, &categories), today()).await;

        let filters = extraction.filters;
        assert_eq!(filters.date_start.as_deref(), Some("2025-06-10"));
        assert_eq!(filters.is_free, Some(true));
        assert_eq!(filters.is_accessible, None);
        // out-of-vocabulary theme dropped, never invented
        assert_eq!(filters.themes.unwrap(), vec!["Culture"]);
        assert_eq!(filters.categories.unwrap(), vec!["Music", "Sports"]);
        assert_eq!(filters.keywords.unwrap(), vec!["jazz"]);
    }

    #[tokio::test]
    async fn unknown_tool_name_falls_back_to_keywords() {
        let model = StaticChatModel::replying(ChatReply {
            text: None,
            tool_calls: vec![ToolCall {
                name: "delete_everything".to_string(),
                parameters: json!({}),
            }],
        });
        let themes = vocab(&[]);
        let categories = vocab(&[]);
        let extraction =
            extract_filters(&model, &request("jazz concerts downtown", &themes, &categories), today())
                .await;
        assert_eq!(
            extraction.filters.keywords.unwrap(),
            vec!["jazz", "concerts", "downtown"]
        );
    }

    #[tokio::test]
    async fn non_object_tool_parameters_fall_back_to_keywords() {
        let model = StaticChatModel::replying(tool_reply(json!("not an object")));
        let themes = vocab(&[]);
        let categories = vocab(&[]);
        let extraction =
            extract_filters(&model, &request("outdoor festivals", &themes, &categories), today())
                .await;
        assert_eq!(extraction.filters.keywords.unwrap(), vec!["outdoor", "festivals"]);
    }

    #[tokio::test]
    async fn model_error_always_yields_populated_filters() {
        let model = StaticChatModel::failing("connection reset");
        let themes = vocab(&[]);
        let categories = vocab(&[]);
        for query in ["art shows", "x", "concerts near me tomorrow"] {
            let extraction =
                extract_filters(&model, &request(query, &themes, &categories), today()).await;
            assert!(
                !extraction.filters.is_unconstrained() || query == "x",
                "query {query:?} produced an unconstrained filter"
            );
            assert!(extraction.response.is_none());
        }
    }

    #[tokio::test]
    async fn clean_direct_answer_is_returned_as_response() {
        let model = StaticChatModel::replying(ChatReply {
            text: Some("I can only help you find events in Toronto.".to_string()),
            tool_calls: vec![],
        });
        let themes = vocab(&[]);
        let categories = vocab(&[]);
        let extraction =
            extract_filters(&model, &request("what is 2+2", &themes, &categories), today()).await;
        assert_eq!(
            extraction.response.as_deref(),
            Some("I can only help you find events in Toronto.")
        );
        // the invariant still populates keywords
        assert!(!extraction.filters.is_unconstrained());
    }

    #[tokio::test]
    async fn tool_plan_leakage_is_not_returned_as_response() {
        let model = StaticChatModel::replying(ChatReply {
            text: Some("I will use the filter_events tool to find those.".to_string()),
            tool_calls: vec![],
        });
        let themes = vocab(&[]);
        let categories = vocab(&[]);
        let extraction =
            extract_filters(&model, &request("family events", &themes, &categories), today()).await;
        assert!(extraction.response.is_none());
        assert_eq!(extraction.filters.keywords.unwrap(), vec!["family", "events"]);
    }

    #[tokio::test]
    async fn corrupted_text_is_rejected() {
        let spam = "a".repeat(40);
        let model = StaticChatModel::replying(ChatReply {
            text: Some(spam),
            tool_calls: vec![],
        });
        let themes = vocab(&[]);
        let categories = vocab(&[]);
        let extraction =
            extract_filters(&model, &request("music events tonight", &themes, &categories), today())
                .await;
        assert!(extraction.response.is_none());
        assert_eq!(
            extraction.filters.keywords.unwrap(),
            vec!["music", "events", "tonight"]
        );
    }

    #[tokio::test]
    async fn tomorrow_and_next_week_convert_to_dates() {
        let themes = vocab(&[]);
        let categories = vocab(&[]);

        let model = StaticChatModel::silent();
        let extraction =
            extract_filters(&model, &request("shows tomorrow", &themes, &categories), today()).await;
        assert_eq!(extraction.filters.date_start.as_deref(), Some("2025-06-05"));
        assert_eq!(extraction.filters.date_end.as_deref(), Some("2025-06-05"));
        assert!(!extraction
            .filters
            .keywords
            .unwrap()
            .iter()
            .any(|k| k.eq_ignore_ascii_case("tomorrow")));

        let extraction = extract_filters(
            &model,
            &request("markets next week", &themes, &categories),
            today(),
        )
        .await;
        assert_eq!(extraction.filters.date_start.as_deref(), Some("2025-06-11"));
        assert_eq!(extraction.filters.date_end.as_deref(), Some("2025-06-18"));
    }

    #[tokio::test]
    async fn explicit_dates_from_tool_suppress_relative_enhancement() {
        let model = StaticChatModel::replying(tool_reply(json!({
            "dateStart": "2025-07-01",
            "dateEnd": "2025-07-02",
        })));
        let themes = vocab(&[]);
        let categories = vocab(&[]);
        let extraction = extract_filters(
            &model,
            &request("things to do this weekend", &themes, &categories),
            today(),
        )
        .await;
        assert_eq!(extraction.filters.date_start.as_deref(), Some("2025-07-01"));
        assert_eq!(extraction.filters.date_end.as_deref(), Some("2025-07-02"));
    }

    #[tokio::test]
    async fn malformed_tool_dates_are_coerced_to_absent() {
        let model = StaticChatModel::replying(tool_reply(json!({
            "dateStart": "sometime soon",
            "keywords": "street food",
        })));
        let themes = vocab(&[]);
        let categories = vocab(&[]);
        let extraction =
            extract_filters(&model, &request("street food", &themes, &categories), today()).await;
        assert!(extraction.filters.date_start.is_none());
        assert_eq!(extraction.filters.keywords.unwrap(), vec!["street food"]);
    }

    #[test]
    fn repeated_char_detection() {
        assert!(has_repeated_char("aaaaaaaaaaaa", 10)); // 12 consecutive
        assert!(!has_repeated_char("aaaaaaaaaa", 10)); // exactly 10
        assert!(!has_repeated_char("abcabcabc", 10));
    }

    #[test]
    fn corruption_heuristics() {
        assert!(is_corrupted(&"word ".repeat(201)));
        assert!(is_corrupted("The format is DD-DD-DD everywhere"));
        assert!(is_corrupted(
            "I'm looking for x I'm looking for x I'm looking for x"
        ));
        assert!(!is_corrupted("Here are some great events this week."));
    }

    #[test]
    fn saturday_query_uses_same_day_weekend() {
        // today is Saturday June 7 → weekend is June 7/8
        let mut filters = ExtractedFilters::default();
        enhance_relative_dates(
            &mut filters,
            "events this weekend",
            NaiveDate::from_ymd_opt(2025, 6, 7).unwrap(),
        );
        assert_eq!(filters.date_start.as_deref(), Some("2025-06-07"));
        assert_eq!(filters.date_end.as_deref(), Some("2025-06-08"));
    }

    #[test]
    fn next_weekend_skips_the_weekend_branch_and_takes_the_next_week_range() {
        // "next weekend" must not resolve to the upcoming Saturday/Sunday;
        // it falls through to the week-out range instead
        let mut filters = ExtractedFilters::default();
        enhance_relative_dates(&mut filters, "events next weekend", today());
        assert_eq!(filters.date_start.as_deref(), Some("2025-06-11"));
        assert_eq!(filters.date_end.as_deref(), Some("2025-06-18"));
    }
}
