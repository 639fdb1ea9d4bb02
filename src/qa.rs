//! Retrieval-augmented question answering.
//!
//! [`QaEngine::answer`] turns a question plus the caller's
//! [`SessionContext`] into an [`AnswerStream`] of text deltas. With a store
//! selected, the top-k passages are retrieved and placed in a system
//! message ahead of a bounded window of recent turns; without one, the
//! whole history goes to the model as a plain conversation.
//!
//! The question and the answer are recorded in the session only once the
//! model has finished. Dropping the stream early, or a failure mid-stream,
//! leaves the history exactly as it was.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream, StreamExt};

use knowba_core::embedding::EmbeddingProvider;
use knowba_core::models::{ChatMessage, ChatSession};

use crate::config::RetrievalConfig;
use crate::error::{QaError, StoreError};
use crate::llm::{ChatModel, DeltaStream};
use crate::store::{SearchHit, StoreHandle};

/// Opening assistant turn of an interactive session.
pub const GREETING: &str = "How can I help you?";

const SYSTEM_TEMPLATE: &str = "Use the following pieces of context to answer the user's question. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
----------------\n";

/// Caller-owned state threaded through every question.
#[derive(Debug, Default)]
pub struct SessionContext {
    /// Store to ground answers in. `None` means plain conversation.
    pub store: Option<StoreHandle>,
    pub history: ChatSession,
}

impl SessionContext {
    pub fn new(store: Option<StoreHandle>) -> Self {
        Self {
            store,
            history: ChatSession::new(),
        }
    }

    /// A session that opens with [`GREETING`].
    pub fn greeted(store: Option<StoreHandle>) -> Self {
        Self {
            store,
            history: ChatSession::with_greeting(GREETING),
        }
    }
}

pub struct QaEngine {
    llm: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl QaEngine {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            config,
        }
    }

    /// Top-k passages for `question` from `store`.
    pub async fn retrieve(
        &self,
        store: &StoreHandle,
        question: &str,
    ) -> Result<Vec<SearchHit>, StoreError> {
        store
            .search(question, self.embedder.as_ref(), self.config.top_k)
            .await
    }

    /// Start answering `question`.
    ///
    /// Retrieval and the completion request happen before this returns, so
    /// store errors and request failures surface here. The returned stream
    /// borrows the session history until it is finished or dropped.
    pub async fn answer<'s>(
        &self,
        question: &str,
        ctx: &'s mut SessionContext,
    ) -> Result<AnswerStream<'s>, QaError> {
        let messages = match &ctx.store {
            Some(store) => {
                let hits = self.retrieve(store, question).await?;
                tracing::debug!(store = store.name(), hits = hits.len(), "retrieved context");
                grounded_messages(&hits, &ctx.history, question, &self.config)
            }
            None => {
                let mut messages = ctx.history.turns().to_vec();
                messages.push(ChatMessage::user(question));
                messages
            }
        };

        let inner = self.llm.stream_chat(&messages).await.map_err(|e| {
            tracing::warn!(model = self.llm.model_name(), error = %e, "completion request failed");
            QaError::GenerationFailed(e)
        })?;

        Ok(AnswerStream {
            history: &mut ctx.history,
            question: question.to_string(),
            inner,
            answer: String::new(),
            done: false,
        })
    }
}

/// System prompt with retrieved context, a bounded slice of history, then
/// the question.
fn grounded_messages(
    hits: &[SearchHit],
    history: &ChatSession,
    question: &str,
    config: &RetrievalConfig,
) -> Vec<ChatMessage> {
    let context = hits
        .iter()
        .map(|hit| format!("[{}]\n{}", hit.metadata, hit.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = vec![ChatMessage::system(format!("{}{}", SYSTEM_TEMPLATE, context))];
    messages.extend(history_window(history, config).iter().cloned());
    messages.push(ChatMessage::user(question));
    messages
}

/// Most recent turns that fit both the turn and character budgets,
/// oldest first.
fn history_window<'h>(history: &'h ChatSession, config: &RetrievalConfig) -> &'h [ChatMessage] {
    let turns = history.turns();
    let mut chars = 0;
    let mut start = turns.len();
    for (i, turn) in turns.iter().enumerate().rev() {
        if turns.len() - i > config.history_turns {
            break;
        }
        chars += turn.content.chars().count();
        if chars > config.history_chars {
            break;
        }
        start = i;
    }
    &turns[start..]
}

/// Streamed answer deltas for one question.
///
/// Finite and not restartable. On successful completion the user turn and
/// the full assistant turn are appended to the session history.
pub struct AnswerStream<'s> {
    history: &'s mut ChatSession,
    question: String,
    inner: DeltaStream,
    answer: String,
    done: bool,
}

impl AnswerStream<'_> {
    /// Drain the stream and return the full answer text.
    pub async fn collect_answer(mut self) -> Result<String, QaError> {
        while let Some(delta) = self.next().await {
            delta?;
        }
        Ok(self
            .history
            .turns()
            .last()
            .map(|turn| turn.content.clone())
            .unwrap_or_default())
    }
}

impl Stream for AnswerStream<'_> {
    type Item = Result<String, QaError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(delta))) => {
                this.answer.push_str(&delta);
                Poll::Ready(Some(Ok(delta)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                tracing::warn!(error = %e, "answer stream failed");
                Poll::Ready(Some(Err(QaError::GenerationFailed(e))))
            }
            Poll::Ready(None) => {
                this.done = true;
                this.history
                    .push(ChatMessage::user(std::mem::take(&mut this.question)));
                this.history
                    .push(ChatMessage::assistant(std::mem::take(&mut this.answer)));
                Poll::Ready(None)
            }
        }
    }
}

impl FusedStream for AnswerStream<'_> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use crate::llm::LlmError;
    use crate::store::{EmbedOptions, VectorStores};
    use async_trait::async_trait;
    use knowba_core::models::{Chunk, Locator, Role, UnitMetadata};
    use std::sync::Mutex;
    use tempfile::TempDir;

    enum Step {
        Delta(&'static str),
        Fail(&'static str),
    }

    struct ScriptedModel {
        script: Vec<&'static str>,
        fail_after: Option<usize>,
        reject: bool,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<&'static str>) -> Self {
            Self {
                script,
                fail_after: None,
                reject: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> Vec<ChatMessage> {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            if self.reject {
                return Err(LlmError::Api {
                    status: 429,
                    message: "rate limited".to_string(),
                });
            }
            let mut steps: Vec<Step> = self.script.iter().map(|d| Step::Delta(*d)).collect();
            if let Some(n) = self.fail_after {
                steps.truncate(n);
                steps.push(Step::Fail("connection reset"));
            }
            Ok(futures::stream::iter(steps.into_iter().map(|s| match s {
                Step::Delta(d) => Ok(d.to_string()),
                Step::Fail(m) => Err(LlmError::Parse(m.to_string())),
            }))
            .boxed())
        }
    }

    fn engine(model: Arc<ScriptedModel>, config: RetrievalConfig) -> QaEngine {
        QaEngine::new(model, Arc::new(HashingProvider::new(64)), config)
    }

    #[tokio::test]
    async fn test_plain_conversation_sends_full_history() {
        let model = Arc::new(ScriptedModel::new(vec!["Hi", " there"]));
        let qa = engine(model.clone(), RetrievalConfig::default());
        let mut ctx = SessionContext::greeted(None);

        let answer = qa.answer("hello?", &mut ctx).await.unwrap();
        let deltas: Vec<String> = answer.map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas, vec!["Hi".to_string(), " there".to_string()]);

        let sent = model.last_request();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], ChatMessage::assistant(GREETING));
        assert_eq!(sent[1], ChatMessage::user("hello?"));

        assert_eq!(ctx.history.len(), 3);
        assert_eq!(ctx.history.turns()[1], ChatMessage::user("hello?"));
        assert_eq!(ctx.history.turns()[2], ChatMessage::assistant("Hi there"));
    }

    #[tokio::test]
    async fn test_grounded_prompt_includes_labelled_context() {
        let tmp = TempDir::new().unwrap();
        let stores = VectorStores::new(tmp.path(), EmbedOptions::default());
        let chunk = Chunk {
            text: "The warranty lasts 24 months.".to_string(),
            metadata: UnitMetadata {
                source: "terms.pdf".to_string(),
                locator: Locator::Page {
                    page_number: 2,
                    total_pages: 5,
                },
            },
            index: 0,
        };
        let handle = stores
            .create("kb", &[chunk], &HashingProvider::new(64))
            .await
            .unwrap();

        let model = Arc::new(ScriptedModel::new(vec!["24 months."]));
        let qa = engine(model.clone(), RetrievalConfig::default());
        let mut ctx = SessionContext::new(Some(handle));
        let text = qa
            .answer("How long is the warranty?", &mut ctx)
            .await
            .unwrap()
            .collect_answer()
            .await
            .unwrap();
        assert_eq!(text, "24 months.");

        let sent = model.last_request();
        assert_eq!(sent[0].role, Role::System);
        assert!(sent[0].content.contains("[terms.pdf, page 2 of 5]"));
        assert!(sent[0].content.contains("The warranty lasts 24 months."));
        assert_eq!(sent.last().unwrap(), &ChatMessage::user("How long is the warranty?"));
    }

    #[tokio::test]
    async fn test_dropping_stream_leaves_history_untouched() {
        let model = Arc::new(ScriptedModel::new(vec!["partial", " answer"]));
        let qa = engine(model, RetrievalConfig::default());
        let mut ctx = SessionContext::greeted(None);
        let before = ctx.history.clone();

        {
            let mut answer = qa.answer("question", &mut ctx).await.unwrap();
            assert_eq!(answer.next().await.unwrap().unwrap(), "partial");
        }
        assert_eq!(ctx.history, before);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_generation_failed() {
        let mut model = ScriptedModel::new(vec!["one", "two"]);
        model.fail_after = Some(1);
        let qa = engine(Arc::new(model), RetrievalConfig::default());
        let mut ctx = SessionContext::greeted(None);

        let mut answer = qa.answer("question", &mut ctx).await.unwrap();
        assert_eq!(answer.next().await.unwrap().unwrap(), "one");
        assert!(matches!(
            answer.next().await,
            Some(Err(QaError::GenerationFailed(_)))
        ));
        assert!(answer.next().await.is_none());
        assert!(answer.is_terminated());
        drop(answer);
        assert_eq!(ctx.history.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_request_is_generation_failed() {
        let mut model = ScriptedModel::new(vec![]);
        model.reject = true;
        let qa = engine(Arc::new(model), RetrievalConfig::default());
        let mut ctx = SessionContext::new(None);

        let err = qa.answer("question", &mut ctx).await.err().unwrap();
        assert!(matches!(
            err,
            QaError::GenerationFailed(LlmError::Api { status: 429, .. })
        ));
        assert!(ctx.history.is_empty());
    }

    #[test]
    fn test_history_window_respects_both_budgets() {
        let mut history = ChatSession::new();
        for i in 0..10 {
            history.push(ChatMessage::user(format!("question {}", i)));
            history.push(ChatMessage::assistant("x".repeat(50)));
        }

        let by_turns = RetrievalConfig {
            history_turns: 4,
            history_chars: 10_000,
            ..RetrievalConfig::default()
        };
        let window = history_window(&history, &by_turns);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].content, "question 8");

        let by_chars = RetrievalConfig {
            history_turns: 100,
            history_chars: 115,
            ..RetrievalConfig::default()
        };
        let window = history_window(&history, &by_chars);
        // 50 + 10 + 50 fits, the next question would exceed 115.
        assert_eq!(window.len(), 3);
        assert_eq!(window.last().unwrap().role, Role::Assistant);

        let none = RetrievalConfig {
            history_turns: 0,
            ..RetrievalConfig::default()
        };
        assert!(history_window(&history, &none).is_empty());
    }
}
