//! eegdigest-test-utils: scripted model backend, static text resolver and
//! fixtures shared by the workspace's integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use eegdigest_common::{CandidateItem, PaperLinks, TextDiagnostic};
use eegdigest_ingestion::{ResolvedText, TextResolver};
use eegdigest_llm::{CallSettings, GenerativeClient, LlmBackend, LlmError, LlmRequest, LlmResponse};

// ── Assets ───────────────────────────────────────────────────────────────────

pub const TRIAGE_PROMPT: &str = include_str!("../../../prompts/triage.md");
pub const SUMMARY_PROMPT: &str = include_str!("../../../prompts/summarize.md");
pub const REPAIR_PROMPT: &str = include_str!("../../../prompts/repair.md");

/// The shipped classification schema.
pub fn triage_schema() -> Value {
    serde_json::from_str(include_str!("../../../schemas/triage.json")).expect("triage schema is valid JSON")
}

/// The shipped summary schema.
pub fn summary_schema() -> Value {
    serde_json::from_str(include_str!("../../../schemas/summary.json")).expect("summary schema is valid JSON")
}

// ── Scripted backend ─────────────────────────────────────────────────────────

type Responder = Box<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<Result<String, String>>>),
    Responder(Responder),
}

/// Backend that answers from a script instead of the network.
///
/// `Err(message)` replies surface as a 500 API error. An exhausted queue
/// answers with `Unavailable`.
pub struct ScriptedBackend {
    script: Script,
    token_count: Option<u64>,
    prompts: Mutex<Vec<String>>,
    token_requests: AtomicUsize,
}

impl ScriptedBackend {
    /// Replies are handed out in order, one per `complete` call.
    pub fn queue<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        Self::with_script(Script::Queue(Mutex::new(replies.into_iter().collect())))
    }

    /// Same reply for every call.
    pub fn always(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::responding(move |_| Ok(reply.clone()))
    }

    /// Reply computed from the prompt.
    pub fn responding<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    {
        Self::with_script(Script::Responder(Box::new(f)))
    }

    fn with_script(script: Script) -> Self {
        Self { script, token_count: None, prompts: Mutex::new(Vec::new()), token_requests: AtomicUsize::new(0) }
    }

    /// Token count returned for every `count_tokens` call; `None` makes counting fail.
    pub fn with_token_count(mut self, tokens: Option<u64>) -> Self {
        self.token_count = tokens;
        self
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Every prompt sent so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    fn next_reply(&self, prompt: &str) -> Result<String, String> {
        match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| Err("script exhausted".to_string())),
            Script::Responder(f) => f(prompt),
        }
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(req.prompt.clone());
        }
        match self.next_reply(&req.prompt) {
            Ok(content) => Ok(LlmResponse {
                content,
                model: "scripted".to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
            }),
            Err(message) if message == "script exhausted" => Err(LlmError::Unavailable(message)),
            Err(message) => Err(LlmError::ApiError { status: 500, message }),
        }
    }

    async fn count_tokens(&self, _text: &str) -> Result<u64, LlmError> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        self.token_count.ok_or(LlmError::MissingTokenCount)
    }

    fn model_id(&self) -> &str {
        "scripted"
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// Adapter over a scripted backend with the default stage settings.
pub fn client(backend: &Arc<ScriptedBackend>, stage: &'static str) -> GenerativeClient {
    let settings = CallSettings {
        stage,
        temperature: 0.2,
        max_output_tokens: 1024,
        timeout: Duration::from_secs(5),
    };
    GenerativeClient::new(backend.clone(), settings)
}

// ── Text resolver ────────────────────────────────────────────────────────────

/// Resolver backed by a fixed map of item id to text or error.
#[derive(Default)]
pub struct StaticResolver {
    texts: HashMap<String, Result<String, String>>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, item_id: &str, text: impl Into<String>) -> Self {
        self.texts.insert(item_id.to_string(), Ok(text.into()));
        self
    }

    pub fn with_error(mut self, item_id: &str, message: impl Into<String>) -> Self {
        self.texts.insert(item_id.to_string(), Err(message.into()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextResolver for StaticResolver {
    async fn resolve(&self, item: &CandidateItem) -> anyhow::Result<ResolvedText> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.texts.get(&item.item_id) {
            Some(Ok(text)) => Ok(ResolvedText {
                text: text.clone(),
                diagnostic: TextDiagnostic {
                    tool: "fixture".to_string(),
                    pages: Some(1),
                    chars: text.chars().count(),
                    error: None,
                },
            }),
            Some(Err(message)) => anyhow::bail!("{message}"),
            None => anyhow::bail!("no text for {}", item.item_id),
        }
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// Candidate published on the given day of January 2025.
pub fn candidate(item_id: &str, title: &str, day: u32) -> CandidateItem {
    let ts = Utc
        .with_ymd_and_hms(2025, 1, day, 10, 30, 0)
        .single()
        .expect("valid fixture date");
    CandidateItem {
        item_id: item_id.to_string(),
        arxiv_id: format!("{item_id}v1"),
        version: 1,
        title: title.to_string(),
        abstract_text: format!("We study {title} on large EEG corpora."),
        authors: vec!["A. Researcher".to_string()],
        categories: vec!["cs.LG".to_string(), "eess.SP".to_string()],
        published: ts,
        updated: ts,
        links: PaperLinks {
            abs: format!("https://arxiv.org/abs/{item_id}v1"),
            pdf: format!("https://arxiv.org/pdf/{item_id}v1"),
        },
    }
}

/// Extracted paper text with the usual section headings.
pub const PAPER_TEXT: &str = "\
NeuroFM: A Foundation Model for Scalp EEG

Abstract
We pretrain a transformer on 20,000 hours of unlabeled EEG.

1 Introduction
Large pretrained models have not yet transferred well to EEG.

2 Methods
Masked patch reconstruction over channel-time tokens.

3 Results
NeuroFM improves balanced accuracy on TUAB and TUEV.

4 Conclusion
Scale helps, and cross-montage transfer remains open.
";

/// Well-formed classification reply.
pub fn triage_reply(decision: &str, confidence: f64) -> String {
    json!({
        "decision": decision,
        "confidence": confidence,
        "reasons": [format!("{decision}: eeg pretraining")],
    })
    .to_string()
}

/// Well-formed summary reply for `item`.
pub fn summary_reply(item: &CandidateItem) -> String {
    json!({
        "arxiv_id_base": item.item_id,
        "title": item.title,
        "published_date": item.published_date(),
        "categories": item.categories,
        "paper_type": "new_model",
        "one_liner": format!("{} pretrains a transformer on unlabeled EEG.", item.title),
        "unique_contribution": "Channel-time masked pretraining at scale.",
        "key_points": ["20k hours of EEG", "masked reconstruction", "TUAB and TUEV gains"],
        "data_scale": {"datasets": ["TUEG"], "subjects": null, "eeg_hours": "20000", "channels": "19"},
        "method": {"architecture": "transformer", "objective": "masked reconstruction", "pretraining": "self-supervised", "finetuning": "linear probe"},
        "evaluation": {"tasks": ["abnormal detection"], "benchmarks": ["TUAB"], "headline_results": ["+3 BAcc"]},
        "open_source": {"code_url": null, "weights_url": null, "license": null},
        "limitations": ["single montage"],
        "used_fulltext": false,
        "notes": "model notes"
    })
    .to_string()
}
