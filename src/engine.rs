use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::llm_client::{extract_json_payload, ChatModel, Message};
use crate::persona::Persona;
use crate::queries::primary_query_for;
use crate::retriever::TimeFilteredRetriever;
use crate::retry::RetryPolicy;

/// Normalized purchase decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Decision {
    Yes,
    No,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Yes => "YES",
            Decision::No => "NO",
        }
    }

    pub fn is_yes(&self) -> bool {
        matches!(self, Decision::Yes)
    }
}

/// One persona's one-day purchase decision. Immutable once collected.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub persona_id: String,
    pub date: NaiveDate,
    pub decision: Decision,
    pub reasoning: String,
}

/// Fan-in result of a run: completed records plus the count of tasks that
/// exhausted retries or returned unusable output. Partial output is a normal
/// outcome; the run itself only fails on setup errors.
#[derive(Debug)]
pub struct SimulationOutcome {
    pub run_id: String,
    pub records: Vec<DecisionRecord>,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on simultaneously in-flight LLM calls.
    pub max_concurrent: usize,
    pub top_k: usize,
    pub product_name: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            top_k: 5,
            product_name: "Cyberpunk 2077".to_string(),
        }
    }
}

/// Drives the (persona × simulated date) cross product through retrieval and
/// bounded-concurrency LLM calls. Without a retriever the engine runs the
/// zero-shot variant: same prompt, no evidence.
pub struct SimulationEngine {
    model: Arc<dyn ChatModel>,
    retriever: Option<Arc<TimeFilteredRetriever>>,
    retry: RetryPolicy,
    opts: EngineOptions,
}

impl SimulationEngine {
    pub fn time_aware(
        model: Arc<dyn ChatModel>,
        retriever: Arc<TimeFilteredRetriever>,
        retry: RetryPolicy,
        opts: EngineOptions,
    ) -> Self {
        Self {
            model,
            retriever: Some(retriever),
            retry,
            opts,
        }
    }

    pub fn zero_shot(model: Arc<dyn ChatModel>, retry: RetryPolicy, opts: EngineOptions) -> Self {
        Self {
            model,
            retriever: None,
            retry,
            opts,
        }
    }

    /// One task per (persona, date) pair, all fanned out at once; the
    /// semaphore keeps in-flight LLM calls under the cap. Completion order is
    /// nondeterministic, so records are sorted by (date, persona id) before
    /// they are returned.
    pub async fn run(
        &self,
        personas: &[Persona],
        dates: &[NaiveDate],
    ) -> Result<SimulationOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let total = personas.len() * dates.len();
        tracing::info!(
            "simulation run {} starting: {} personas x {} dates = {} tasks (cap {})",
            run_id,
            personas.len(),
            dates.len(),
            total,
            self.opts.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.opts.max_concurrent.max(1)));
        let (tx, rx) = flume::unbounded::<Option<DecisionRecord>>();

        for date in dates {
            for persona in personas {
                let task = TaskContext {
                    model: self.model.clone(),
                    retriever: self.retriever.clone(),
                    retry: self.retry.clone(),
                    semaphore: semaphore.clone(),
                    persona: persona.clone(),
                    date: *date,
                    top_k: self.opts.top_k,
                    product_name: self.opts.product_name.clone(),
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = run_task(task).await;
                    // The receiver outlives every sender; a send failure just
                    // means the run was abandoned.
                    let _ = tx.send(outcome);
                });
            }
        }
        drop(tx);

        let mut records = Vec::with_capacity(total);
        let mut failed = 0usize;
        let mut done = 0usize;
        while let Ok(outcome) = rx.recv_async().await {
            match outcome {
                Some(record) => records.push(record),
                None => failed += 1,
            }
            done += 1;
            if done % 50 == 0 || done == total {
                tracing::info!("simulation progress: {}/{} tasks ({} failed)", done, total, failed);
            }
        }

        records.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.persona_id.cmp(&b.persona_id))
        });

        tracing::info!(
            "simulation run {} finished: {} records, {} failed tasks",
            run_id,
            records.len(),
            failed
        );
        Ok(SimulationOutcome {
            run_id,
            records,
            failed,
        })
    }
}

struct TaskContext {
    model: Arc<dyn ChatModel>,
    retriever: Option<Arc<TimeFilteredRetriever>>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    persona: Persona,
    date: NaiveDate,
    top_k: usize,
    product_name: String,
}

/// One retrieval + LLM round trip. Any failure is logged and reported as
/// `None`; it never aborts sibling tasks.
async fn run_task(ctx: TaskContext) -> Option<DecisionRecord> {
    let time_aware = ctx.retriever.is_some();
    let evidence = match &ctx.retriever {
        Some(retriever) => {
            let query = primary_query_for(ctx.persona.profile.key);
            match retriever.retrieve(query, ctx.date, ctx.top_k).await {
                Ok(snippets) => Some(snippets),
                Err(e) => {
                    tracing::warn!(
                        "retrieval failed for {} on {}: {}",
                        ctx.persona.id,
                        ctx.date,
                        e
                    );
                    return None;
                }
            }
        }
        None => None,
    };

    let messages = build_messages(
        &ctx.persona,
        evidence.as_deref(),
        time_aware.then_some(ctx.date),
        &ctx.product_name,
    );

    let permit = match ctx.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return None,
    };
    let response = ctx.retry.run(|| ctx.model.complete(&messages)).await;
    drop(permit);

    let raw = match response {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("LLM call failed for {} on {}: {}", ctx.persona.id, ctx.date, e);
            return None;
        }
    };

    match parse_decision(&raw) {
        DecisionParse::Ok {
            decision,
            reasoning,
        } => Some(DecisionRecord {
            persona_id: ctx.persona.id.clone(),
            date: ctx.date,
            decision,
            reasoning,
        }),
        DecisionParse::ParseError => {
            tracing::warn!(
                "unparsable decision for {} on {}: {}",
                ctx.persona.id,
                ctx.date,
                raw.chars().take(200).collect::<String>()
            );
            None
        }
    }
}

fn build_messages(
    persona: &Persona,
    evidence: Option<&[String]>,
    today: Option<NaiveDate>,
    product_name: &str,
) -> Vec<Message> {
    let mut system = format!("[ROLE]\n{}\n\n[INSTRUCTION]\n", persona.prompt_description());

    match today {
        Some(date) => {
            system.push_str(&format!(
                "Today is {}. Decide as this person, weighing your traits against \
                 the reviews you have seen below.\n",
                date.format("%Y-%m-%d")
            ));
        }
        None => {
            system.push_str(
                "Judge using only your disposition and prior knowledge, without any \
                 outside information (news, patches, reviews).\n",
            );
        }
    }
    system.push_str("Answer honestly, consistent with your gamer type.\n");

    if let Some(snippets) = evidence {
        system.push_str("\n[RECENT REVIEWS]\n");
        if snippets.is_empty() {
            system.push_str("No reviews are available yet.\n");
        } else {
            for snippet in snippets {
                system.push_str(snippet);
                system.push('\n');
            }
        }
    }

    system.push_str(
        "\n[OUTPUT FORMAT]\nRespond with only a JSON object:\n\
         {\"decision\": \"YES\" or \"NO\", \"reasoning\": \"one or two short sentences\"}",
    );

    vec![
        Message::system(system),
        Message::user(format!(
            "Is {} worth buying? Are you going to buy it?",
            product_name
        )),
    ]
}

#[derive(Debug, Deserialize)]
struct DecisionPayload {
    #[serde(default)]
    decision: Option<serde_json::Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Tagged parse result: a JSON object yields `Ok` (with normalization applied
/// to whatever the decision field holds), anything else is a parse error.
#[derive(Debug, PartialEq, Eq)]
enum DecisionParse {
    Ok {
        decision: Decision,
        reasoning: String,
    },
    ParseError,
}

fn parse_decision(raw: &str) -> DecisionParse {
    match serde_json::from_str::<DecisionPayload>(extract_json_payload(raw)) {
        Ok(payload) => DecisionParse::Ok {
            decision: normalize_decision(payload.decision.as_ref().and_then(|v| v.as_str())),
            reasoning: payload.reasoning.unwrap_or_default(),
        },
        Err(_) => DecisionParse::ParseError,
    }
}

/// Case-insensitive, punctuation-tolerant normalization: only a value whose
/// first word starts with "YES" is affirmative; a missing or malformed field
/// is negative.
pub fn normalize_decision(field: Option<&str>) -> Decision {
    let Some(text) = field else {
        return Decision::No;
    };
    let stripped = text
        .trim()
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    let prefix: String = stripped.chars().take(3).collect();
    if prefix.eq_ignore_ascii_case("yes") {
        Decision::Yes
    } else {
        Decision::No
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCache;
    use crate::embedding::EmbeddingProvider;
    use crate::error::ProviderError;
    use crate::persona::{profile_by_key, GAMER_TYPES};
    use crate::store::{Document, ReviewStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn persona(id: &str, name: &str, gamer_type: &str) -> Persona {
        Persona {
            id: id.to_string(),
            name: name.to_string(),
            gender: "Male",
            age: 30,
            age_group: "30-39",
            occupation: "marketer",
            profile: profile_by_key(gamer_type).unwrap(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Scripted model: fails permanently for personas whose prompt carries
    /// the poison marker, answers YES otherwise. Records every prompt.
    struct ScriptedModel {
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError> {
            let system = messages[0].content.clone();
            self.prompts.lock().unwrap().push(system.clone());
            if system.contains("Unlucky") {
                return Err(ProviderError::Api {
                    status: 400,
                    body: "permanent".to_string(),
                });
            }
            Ok(r#"{"decision": "YES", "reasoning": "looks great"}"#.to_string())
        }
    }

    struct UnitProvider;

    #[async_trait]
    impl EmbeddingProvider for UnitProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            base_delay: std::time::Duration::from_millis(1),
            max_jitter: std::time::Duration::from_millis(1),
        }
    }

    #[test]
    fn normalization_accepts_only_affirmative_prefixes() {
        assert_eq!(normalize_decision(Some("YES")), Decision::Yes);
        assert_eq!(normalize_decision(Some("  yes.")), Decision::Yes);
        assert_eq!(normalize_decision(Some("\"Yes, definitely\"")), Decision::Yes);
        assert_eq!(normalize_decision(Some("NO")), Decision::No);
        assert_eq!(normalize_decision(Some("maybe")), Decision::No);
        assert_eq!(normalize_decision(Some("")), Decision::No);
        assert_eq!(normalize_decision(None), Decision::No);
    }

    #[test]
    fn parse_handles_clean_json_and_fences() {
        let clean = parse_decision(r#"{"decision": "NO", "reasoning": "too buggy"}"#);
        assert_eq!(
            clean,
            DecisionParse::Ok {
                decision: Decision::No,
                reasoning: "too buggy".to_string()
            }
        );

        let fenced = parse_decision("```json\n{\"decision\": \"yes\"}\n```");
        assert!(matches!(
            fenced,
            DecisionParse::Ok {
                decision: Decision::Yes,
                ..
            }
        ));
    }

    #[test]
    fn missing_fields_normalize_to_negative_not_error() {
        let parsed = parse_decision(r#"{"reasoning": "no decision field"}"#);
        assert_eq!(
            parsed,
            DecisionParse::Ok {
                decision: Decision::No,
                reasoning: "no decision field".to_string()
            }
        );

        // Non-string decision values are malformed fields, still negative.
        let numeric = parse_decision(r#"{"decision": 1}"#);
        assert!(matches!(
            numeric,
            DecisionParse::Ok {
                decision: Decision::No,
                ..
            }
        ));
    }

    #[test]
    fn non_json_is_a_parse_error() {
        assert_eq!(parse_decision("I would buy it!"), DecisionParse::ParseError);
    }

    #[tokio::test]
    async fn failed_tasks_are_counted_without_aborting_the_run() {
        let model = ScriptedModel::new();
        let engine =
            SimulationEngine::zero_shot(model, fast_retry(), EngineOptions::default());

        // 10 tasks, 3 of which hit a permanently failing model call.
        let mut personas: Vec<Persona> = (0..7)
            .map(|i| persona(&format!("ok_{}", i), "Steady Buyer", "ultimate_gamer"))
            .collect();
        for i in 0..3 {
            personas.push(persona(&format!("bad_{}", i), "Unlucky Caller", "time_filler"));
        }

        let outcome = engine
            .run(&personas, &[date(2020, 12, 10)])
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 7);
        assert_eq!(outcome.failed, 3);
    }

    #[tokio::test]
    async fn records_sort_by_date_then_persona() {
        let model = ScriptedModel::new();
        let engine =
            SimulationEngine::zero_shot(model, fast_retry(), EngineOptions::default());

        let personas = vec![
            persona("b_persona", "Second Alphabetical", "cloud_gamer"),
            persona("a_persona", "First Alphabetical", "cloud_gamer"),
        ];
        let dates = vec![date(2021, 1, 8), date(2021, 1, 1)];

        let outcome = engine.run(&personas, &dates).await.unwrap();
        let keys: Vec<(NaiveDate, &str)> = outcome
            .records
            .iter()
            .map(|r| (r.date, r.persona_id.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (date(2021, 1, 1), "a_persona"),
                (date(2021, 1, 1), "b_persona"),
                (date(2021, 1, 8), "a_persona"),
                (date(2021, 1, 8), "b_persona"),
            ]
        );
    }

    #[tokio::test]
    async fn time_aware_prompts_embed_only_visible_evidence() {
        let store = Arc::new(ReviewStore::open_in_memory().unwrap());
        let docs = vec![
            Document {
                id: "early".to_string(),
                text: "runs poorly on old cards".to_string(),
                date: 20201209,
                voted_up: false,
                playtime: 5.0,
                source: "test".to_string(),
            },
            Document {
                id: "late".to_string(),
                text: "patched and smooth now".to_string(),
                date: 20211209,
                voted_up: true,
                playtime: 50.0,
                source: "test".to_string(),
            },
        ];
        store
            .insert_batch(&docs, &[vec![1.0, 0.0], vec![1.0, 0.0]])
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(QueryCache::open(
            dir.path().join("cache.json"),
            Arc::new(UnitProvider),
        ));
        let retriever = Arc::new(TimeFilteredRetriever::new(store, cache));

        let model = ScriptedModel::new();
        let engine = SimulationEngine::time_aware(
            model.clone(),
            retriever,
            fast_retry(),
            EngineOptions::default(),
        );

        let personas = vec![persona("cloud_1", "Evidence Reader", "cloud_gamer")];
        let outcome = engine
            .run(&personas, &[date(2020, 12, 10)])
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.failed, 0);

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("[RECENT REVIEWS]"));
        assert!(prompts[0].contains("runs poorly on old cards"));
        assert!(!prompts[0].contains("patched and smooth now"));
        assert!(prompts[0].contains("Today is 2020-12-10"));
    }

    #[test]
    fn zero_shot_prompt_omits_evidence_section() {
        let p = persona("x", "No Evidence", GAMER_TYPES[0].key);
        let messages = build_messages(&p, None, None, "Cyberpunk 2077");
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].content.contains("[RECENT REVIEWS]"));
        assert!(messages[0].content.contains("without any"));
        assert!(messages[1].content.contains("Cyberpunk 2077"));
    }
}
