//! LLM judge for code-understanding answers
//!
//! Each question of an instance is matched with its section of the model's
//! free-text answer and scored 0.0-1.0 by an OpenAI-compatible chat endpoint
//! against the question's checklist. The instance score is the mean.

use crate::config::JudgeConfig;
use crate::dataset::WorkItem;
use crate::error::{EvalError, EvalResult};
use crate::util::safe_file_name;
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MAX_PATCH_LEN: usize = 50_000;
pub const MAX_ANSWER_LEN: usize = 100_000;

const SYSTEM_PROMPT: &str = "You are an expert evaluator for code understanding questions.";

/// Ask-the-judge capability.
///
/// Transport failures come back as text starting with `[ERROR]` rather than
/// as an error, so one failed call never aborts an instance.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn ask(&self, system: &str, user: &str) -> String;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Chat-completions judge over HTTP
pub struct HttpJudge {
    client: Client,
    config: JudgeConfig,
}

impl HttpJudge {
    pub fn new(config: JudgeConfig) -> EvalResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EvalError::Judge(format!("failed to build HTTP client: {}", e)))?;

        info!("Judge client: model={} base={}", config.model, config.api_base);
        Ok(Self { client, config })
    }

    async fn complete(&self, system: &str, user: &str) -> EvalResult<String> {
        let messages = vec![
            Message {
                role: "system".to_string(),
                content: system.to_string(),
            },
            Message {
                role: "user".to_string(),
                content: user.to_string(),
            },
        ];

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&ChatRequest {
                model: &self.config.model,
                messages,
            })
            .send()
            .await
            .map_err(|e| EvalError::Judge(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(EvalError::Judge(format!("HTTP {}: {}", status, err)));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| EvalError::Judge(format!("invalid response: {}", e)))?;
        Ok(chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Judge for HttpJudge {
    async fn ask(&self, system: &str, user: &str) -> String {
        match self.complete(system, user).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Judge call failed: {}", e);
                format!("[ERROR] {}\nRESULT: FAIL", e)
            }
        }
    }
}

/// Cut `text` to `max_len` characters, noting the original length.
pub fn truncate(text: &str, max_len: usize) -> String {
    let len = text.chars().count();
    if len <= max_len {
        return text.to_string();
    }
    let head: String = text.chars().take(max_len).collect();
    format!("{}\n\n[truncated from {} chars]", head, len)
}

/// Section of `answer` that answers question `n` (1-based).
///
/// Tries `## n.` headings, then `**n.**` markers, then `n.` at line start;
/// each section runs to the marker for `n + 1` or the end. Falls back to
/// the whole answer.
pub fn extract_answer_section(answer: &str, n: usize) -> String {
    let next = n + 1;
    let markers = [
        (format!(r"#+\s*{}[.)]", n), format!(r"#+\s*{}[.)]", next)),
        (format!(r"\*\*{}[.)]\*\*", n), format!(r"\*\*{}[.)]", next)),
        (format!(r"(?m)^{}[.)]", n), format!(r"(?m)^{}[.)]", next)),
    ];

    for (start, end) in &markers {
        let (Ok(start), Ok(end)) = (regex::Regex::new(start), regex::Regex::new(end)) else {
            continue;
        };
        for found in start.find_iter(answer) {
            let rest = &answer[found.end()..];
            let body = rest.trim_start();
            let Some(first) = body.chars().next() else {
                continue;
            };
            // the section holds at least one character before the next marker
            let offset = rest.len() - body.len() + first.len_utf8();
            let stop = end
                .find_at(rest, offset)
                .map(|m| m.start())
                .unwrap_or(rest.len());
            return rest[..stop].trim().to_string();
        }
    }
    answer.to_string()
}

/// One checklist requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub item_id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub related: Vec<String>,
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Questions from either `{"questions": [...]}` or a bare list.
pub fn questions_from(value: &Value) -> Vec<Question> {
    let list = match value {
        Value::Object(map) => map.get("questions").and_then(Value::as_array),
        Value::Array(list) => Some(list),
        _ => None,
    };
    list.into_iter()
        .flatten()
        .enumerate()
        .map(|(idx, q)| Question {
            id: q
                .get("question_id")
                .map(value_text)
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("q{}", idx + 1)),
            text: q.get("question_text").map(value_text).unwrap_or_default(),
            related: q
                .get("related_checklist_items")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(value_text).collect())
                .unwrap_or_default(),
        })
        .collect()
}

/// Checklist items from `checklists.checklist_categories`, keyed by id
pub fn checklist_items(value: &Value) -> HashMap<String, ChecklistItem> {
    let Some(categories) = value.get("checklist_categories").and_then(Value::as_object) else {
        return HashMap::new();
    };
    categories
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|item| serde_json::from_value::<ChecklistItem>(item.clone()).ok())
        .map(|item| (item.item_id.clone(), item))
        .collect()
}

pub fn build_prompt(question: &str, checklist: &[&ChecklistItem], answer: &str, patch: &str) -> String {
    let items: Vec<String> = checklist
        .iter()
        .map(|item| format!("- {}: {}", item.item_id, item.description))
        .collect();

    let patch_part = if patch.is_empty() {
        String::new()
    } else {
        format!("\n[PR Context]:\n{}\n", truncate(patch, MAX_PATCH_LEN))
    };

    format!(
        r#"Evaluate if the answer satisfies the question requirements.

QUESTION:
{question}

REQUIREMENTS:
{requirements}
{patch_part}
ANSWER:
{answer}

RULES:
1. Answer MUST use clear English explanations, NOT just code diffs
2. Score = (satisfied items) / (total items), give 1.0 only when ALL items satisfied
3. Give 0.0 when answer is just code diffs or completely wrong

Respond with JSON only:
{{
    "reasoning": "brief explanation",
    "score": 0.0-1.0,
    "satisfied_items": ["item_id1", ...]
}}
"#,
        question = question,
        requirements = items.join("\n"),
        patch_part = patch_part,
        answer = truncate(answer, MAX_ANSWER_LEN),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub score: f64,
    pub reasoning: String,
}

/// Read the judge's JSON verdict, tolerating code fences and chatter.
pub fn parse_verdict(response: &str) -> EvalResult<QuestionScore> {
    if response.starts_with("[ERROR]") {
        return Err(EvalError::Judge(format!("API error: {}", response)));
    }

    let mut content = response.trim();
    if content.starts_with("```") {
        content = content.find('\n').map(|i| &content[i + 1..]).unwrap_or(content);
    }
    if let Some(stripped) = content.strip_suffix("```") {
        content = stripped;
    }

    let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) else {
        return Err(EvalError::Judge("No valid JSON found".to_string()));
    };
    if end < start {
        return Err(EvalError::Judge("No valid JSON found".to_string()));
    }
    let verdict: Value = serde_json::from_str(&content[start..=end])?;

    let score = match verdict.get("score") {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| EvalError::Judge(format!("score is not a number: {}", s)))?,
        Some(other) => {
            return Err(EvalError::Judge(format!("score is not a number: {}", other)));
        }
    };
    let reasoning = verdict.get("reasoning").map(value_text).unwrap_or_default();
    Ok(QuestionScore { score, reasoning })
}

/// Per-instance artifact `<safe_id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderstandingResult {
    pub instance_id: String,
    pub average_score: f64,
    pub question_scores: IndexMap<String, QuestionScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnderstandingResult {
    fn empty(instance_id: &str, error: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            average_score: 0.0,
            question_scores: IndexMap::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Scores code-understanding answers with a [`Judge`]
pub struct UnderstandingScorer<J: ?Sized> {
    judge: std::sync::Arc<J>,
}

impl<J: Judge + ?Sized> UnderstandingScorer<J> {
    pub fn new(judge: std::sync::Arc<J>) -> Self {
        Self { judge }
    }

    async fn judge_question(
        &self,
        question: &Question,
        checklist: &[&ChecklistItem],
        answer: &str,
        patch: &str,
    ) -> QuestionScore {
        let prompt = build_prompt(&question.text, checklist, answer, patch);
        let response = self.judge.ask(SYSTEM_PROMPT, &prompt).await;
        match parse_verdict(&response) {
            Ok(verdict) => verdict,
            Err(e) => {
                debug!("Question {} degraded to 0: {}", question.id, e);
                QuestionScore {
                    score: 0.0,
                    reasoning: format!("Error: {}", e),
                }
            }
        }
    }

    /// Judge every question of `item` in order.
    pub async fn evaluate(&self, item: &WorkItem) -> UnderstandingResult {
        let answer = item.model_patch.as_str();
        if answer.trim().is_empty() {
            return UnderstandingResult::empty(&item.instance_id, "Empty answer");
        }
        let questions = questions_from(&item.questions);
        if questions.is_empty() {
            return UnderstandingResult::empty(&item.instance_id, "No questions");
        }

        let checklist = checklist_items(&item.checklists);
        let patch = item.test_patch.as_deref().unwrap_or("");

        let mut question_scores = IndexMap::new();
        for (idx, question) in questions.iter().enumerate() {
            let section = extract_answer_section(answer, idx + 1);
            let items: Vec<&ChecklistItem> = question
                .related
                .iter()
                .filter_map(|id| checklist.get(id))
                .collect();
            let verdict = self.judge_question(question, &items, &section, patch).await;
            question_scores.insert(question.id.clone(), verdict);
        }

        let average_score =
            question_scores.values().map(|q| q.score).sum::<f64>() / question_scores.len() as f64;
        UnderstandingResult {
            instance_id: item.instance_id.clone(),
            average_score,
            question_scores,
            error: None,
        }
    }

    /// Evaluate and write `<out_dir>/<safe_id>.json`.
    pub async fn evaluate_to(&self, item: &WorkItem, out_dir: &Path) -> EvalResult<(f64, PathBuf)> {
        let result = self.evaluate(item).await;
        std::fs::create_dir_all(out_dir)?;
        let path = out_dir.join(format!("{}.json", safe_file_name(&item.instance_id)));
        std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
        info!(
            "Code understanding {}: {:.2} over {} questions",
            item.instance_id,
            result.average_score,
            result.question_scores.len()
        );
        Ok((result.average_score, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    struct ScriptedJudge {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedJudge {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Judge for ScriptedJudge {
        async fn ask(&self, _system: &str, user: &str) -> String {
            self.prompts.lock().push(user.to_string());
            self.replies.lock().pop().unwrap_or_default()
        }
    }

    fn item() -> WorkItem {
        WorkItem {
            instance_id: "org/repo-7".to_string(),
            model_patch: "## 1. Parsing\nThe lexer splits tokens.\n## 2. Caching\nResults are memoised.".to_string(),
            test_patch: Some("diff --git a/x b/x".to_string()),
            questions: json!({"questions": [
                {"question_id": "Q1", "question_text": "How is input parsed?", "related_checklist_items": ["C1"]},
                {"question_id": "Q2", "question_text": "What is cached?", "related_checklist_items": ["C2", "missing"]}
            ]}),
            checklists: json!({"checklist_categories": {
                "core": [{"item_id": "C1", "description": "mentions the lexer"}],
                "perf": [{"item_id": "C2", "description": "mentions memoisation"}]
            }}),
            ..Default::default()
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc\n\n[truncated from 6 chars]");
    }

    #[test]
    fn test_extract_heading_sections() {
        let answer = "Intro\n## 1. First\nalpha\n## 2) Second\nbeta\n";
        assert_eq!(extract_answer_section(answer, 1), "First\nalpha");
        assert_eq!(extract_answer_section(answer, 2), "Second\nbeta");
    }

    #[test]
    fn test_extract_bold_and_line_start() {
        let bold = "**1.** uses a cache **2.** evicts LRU";
        assert_eq!(extract_answer_section(bold, 1), "uses a cache");
        assert_eq!(extract_answer_section(bold, 2), "evicts LRU");

        let plain = "1. first answer\nmore\n2. second answer";
        assert_eq!(extract_answer_section(plain, 1), "first answer\nmore");
        assert_eq!(extract_answer_section(plain, 2), "second answer");
    }

    #[test]
    fn test_extract_falls_back_to_whole_answer() {
        let answer = "no numbering at all";
        assert_eq!(extract_answer_section(answer, 3), answer);
        // ## 10. is not a heading for question 1
        assert_eq!(extract_answer_section("## 10. ten", 1), "## 10. ten");
    }

    #[test]
    fn test_questions_and_checklist() {
        let questions = questions_from(&item().questions);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[1].related, vec!["C2", "missing"]);

        let bare = questions_from(&json!([{"question_text": "why?"}]));
        assert_eq!(bare[0].id, "q1");

        let checklist = checklist_items(&item().checklists);
        assert_eq!(checklist["C2"].description, "mentions memoisation");
        assert!(checklist_items(&Value::Null).is_empty());
    }

    #[test]
    fn test_build_prompt() {
        let c1 = ChecklistItem {
            item_id: "C1".to_string(),
            description: "mentions the lexer".to_string(),
        };
        let prompt = build_prompt("How?", &[&c1], "It lexes.", "");
        assert!(prompt.starts_with("Evaluate if the answer satisfies the question requirements."));
        assert!(prompt.contains("REQUIREMENTS:\n- C1: mentions the lexer\n"));
        assert!(prompt.contains("ANSWER:\nIt lexes.\n"));
        assert!(!prompt.contains("[PR Context]"));

        let with_patch = build_prompt("How?", &[], "a", "diff");
        assert!(with_patch.contains("\n[PR Context]:\ndiff\n"));
    }

    #[test]
    fn test_parse_verdict() {
        let fenced = "```json\n{\"reasoning\": \"ok\", \"score\": 0.5}\n```";
        assert_eq!(
            parse_verdict(fenced).unwrap(),
            QuestionScore {
                score: 0.5,
                reasoning: "ok".to_string()
            }
        );
        assert_eq!(parse_verdict("Sure! {\"score\": \"1\"} done").unwrap().score, 1.0);
        assert_eq!(parse_verdict("{}").unwrap().score, 0.0);
        assert!(parse_verdict("no json").is_err());
        assert!(parse_verdict("[ERROR] timeout\nRESULT: FAIL").is_err());
        assert!(parse_verdict("{\"score\": [1]}").is_err());
    }

    #[tokio::test]
    async fn test_scorer_averages_and_degrades() {
        let judge = Arc::new(ScriptedJudge::new(&[
            "{\"score\": 1.0, \"reasoning\": \"complete\"}",
            "[ERROR] connection reset\nRESULT: FAIL",
        ]));
        let scorer = UnderstandingScorer::new(judge.clone());

        let result = scorer.evaluate(&item()).await;
        assert_eq!(result.average_score, 0.5);
        assert_eq!(result.question_scores["Q1"].reasoning, "complete");
        assert!(result.question_scores["Q2"]
            .reasoning
            .starts_with("Error: Judge error: API error: [ERROR] connection reset"));

        let prompts = judge.prompts.lock();
        assert!(prompts[0].contains("ANSWER:\nParsing\nThe lexer splits tokens.\n"));
        assert!(prompts[0].contains("- C1: mentions the lexer"));
        assert!(prompts[1].contains("- C2: mentions memoisation"));
        assert!(prompts[1].contains("[PR Context]:\ndiff --git a/x b/x"));
    }

    #[tokio::test]
    async fn test_scorer_empty_answer_or_questions() {
        let judge = Arc::new(ScriptedJudge::new(&[]));
        let scorer = UnderstandingScorer::new(judge);

        let mut blank = item();
        blank.model_patch = "   ".to_string();
        let result = scorer.evaluate(&blank).await;
        assert_eq!(result.average_score, 0.0);
        assert_eq!(result.error.as_deref(), Some("Empty answer"));

        let mut unasked = item();
        unasked.questions = Value::Null;
        assert_eq!(scorer.evaluate(&unasked).await.error.as_deref(), Some("No questions"));
    }

    #[tokio::test]
    async fn test_evaluate_to_writes_safe_name() {
        let dir = tempfile::tempdir().unwrap();
        let judge = Arc::new(ScriptedJudge::new(&["{\"score\": 0.25}", "{\"score\": 0.75}"]));
        let scorer = UnderstandingScorer::new(judge);

        let (score, path) = scorer.evaluate_to(&item(), dir.path()).await.unwrap();
        assert_eq!(score, 0.5);
        assert_eq!(path, dir.path().join("org_repo-7.json"));

        let written: UnderstandingResult =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written.average_score, 0.5);
        assert_eq!(written.question_scores.len(), 2);
    }

    #[tokio::test]
    async fn test_http_judge_chat_completion() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .body_contains("\"model\":\"judge-model\"");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"choices": [{"message": {"role": "assistant", "content": "{\"score\": 0.8}"}}]}"#);
            })
            .await;

        let judge = HttpJudge::new(JudgeConfig {
            api_base: server.base_url(),
            api_key: "sk-test".to_string(),
            model: "judge-model".to_string(),
            timeout_secs: 5,
        })
        .unwrap();

        let reply = judge.ask(SYSTEM_PROMPT, "question").await;
        mock.assert_async().await;
        assert_eq!(parse_verdict(&reply).unwrap().score, 0.8);
    }

    #[tokio::test]
    async fn test_http_judge_error_is_tagged() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(500).body("overloaded");
            })
            .await;

        let judge = HttpJudge::new(JudgeConfig {
            api_base: server.base_url(),
            api_key: String::new(),
            model: "m".to_string(),
            timeout_secs: 5,
        })
        .unwrap();

        let reply = judge.ask(SYSTEM_PROMPT, "question").await;
        assert!(reply.starts_with("[ERROR] Judge error: HTTP 500"));
        assert!(reply.ends_with("\nRESULT: FAIL"));
        assert!(reply.contains("overloaded"));
    }
}
