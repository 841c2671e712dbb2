//! Retrieval-augmented answers about registered faces.
//!
//! Face summaries are projected into [`Document`]s, embedded into a
//! [`VectorIndex`], and retrieved per question before the chat model is
//! asked. When embedding fails the service stays usable in simple-storage
//! mode, falling back to keyword retrieval over the cached documents.

use crate::document::{most_recent, Document};
use crate::index::{keyword_search, VectorIndex};
use crate::llm::{ChatModel, Embedder, LlmError};
use crate::retry::{retry, RetryPolicy};
use facewise_core::{FaceStore, FaceSummary, Reply, StoreError};
use std::path::{Path, PathBuf};

pub const NO_DATA_ANSWER: &str = "No face data is available to query. Please register some faces first.";
pub const HIGH_DEMAND_ANSWER: &str = "I'm currently experiencing high demand and cannot process your query with full capabilities. Please try again in a few minutes or phrase your question in a simpler way.";
pub const TECHNICAL_ISSUE_ANSWER: &str =
    "I'm sorry, I couldn't process your query due to a technical issue. Please try again later.";

const RELOAD_COMMANDS: [&str; 2] = ["reload database", "refresh data"];

/// How a question is answered, decided by simple lexical patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// "Who registered last?": the single newest document.
    MostRecent,
    /// "How many people are registered?": every document.
    Count,
    /// Anything else: top-k similarity.
    Similarity,
}

impl QueryIntent {
    pub fn classify(question: &str) -> Self {
        let q = question.to_lowercase();
        if q.contains("last") && q.contains("register") {
            QueryIntent::MostRecent
        } else if q.contains("how many") && q.contains("register") {
            QueryIntent::Count
        } else {
            QueryIntent::Similarity
        }
    }
}

/// Outcome of loading the face store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// Documents embedded and the vector index is live.
    Indexed(usize),
    /// Embedding failed; documents are served by keyword search.
    SimpleMode(usize),
    NoTable,
    Empty,
    /// The store could not be read.
    Unavailable,
    /// Loading failed for a reason other than the store.
    Failed,
}

impl LoadStatus {
    pub fn has_data(&self) -> bool {
        matches!(self, LoadStatus::Indexed(_) | LoadStatus::SimpleMode(_))
    }

    /// User-facing system message. Simple-storage mode is only logged.
    pub fn message(&self) -> Option<String> {
        match self {
            LoadStatus::Indexed(n) => Some(format!("Successfully loaded {n} faces into the chat system")),
            LoadStatus::SimpleMode(_) => None,
            LoadStatus::NoTable => Some("No face data available. Please register faces first.".into()),
            LoadStatus::Empty => Some("No faces found in database. Please register faces first.".into()),
            LoadStatus::Unavailable => Some("Unable to access face data. Please try again later.".into()),
            LoadStatus::Failed => Some("Chat system is currently unavailable. Please try again later.".into()),
        }
    }
}

pub struct ChatRag {
    db_path: PathBuf,
    embedder: Box<dyn Embedder>,
    llm: Box<dyn ChatModel>,
    top_k: usize,
    index_retry: RetryPolicy,
    llm_retry: RetryPolicy,
    index: Option<VectorIndex>,
    documents: Vec<Document>,
}

impl ChatRag {
    pub fn new(
        db_path: impl Into<PathBuf>,
        embedder: Box<dyn Embedder>,
        llm: Box<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            embedder,
            llm,
            top_k,
            index_retry: RetryPolicy::index_build(),
            llm_retry: RetryPolicy::llm_call(),
            index: None,
            documents: Vec::new(),
        }
    }

    pub fn with_retry_policies(mut self, index: RetryPolicy, llm: RetryPolicy) -> Self {
        self.index_retry = index;
        self.llm_retry = llm;
        self
    }

    pub fn has_data(&self) -> bool {
        !self.documents.is_empty()
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// (Re)load every face from the store and rebuild the index.
    pub async fn load_data(&mut self) -> LoadStatus {
        self.clear();

        let path = self.db_path.clone();
        let faces = match tokio::task::spawn_blocking(move || read_faces(&path)).await {
            Ok(Ok(Some(faces))) => faces,
            Ok(Ok(None)) => {
                tracing::warn!(db = %self.db_path.display(), "faces table does not exist");
                return LoadStatus::NoTable;
            }
            Ok(Err(err)) => {
                tracing::error!(error = %err, "cannot read face store");
                return LoadStatus::Unavailable;
            }
            Err(err) => {
                tracing::error!(error = %err, "store reader task failed");
                return LoadStatus::Failed;
            }
        };

        self.load_faces(&faces).await
    }

    /// Build documents and the index from already-read summaries.
    pub async fn load_faces(&mut self, faces: &[FaceSummary]) -> LoadStatus {
        self.clear();
        if faces.is_empty() {
            tracing::warn!("no faces registered");
            return LoadStatus::Empty;
        }

        let documents: Vec<Document> = faces.iter().map(Document::from).collect();
        let count = documents.len();
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();

        let embedded = retry(&self.index_retry, "embed documents", || {
            self.embedder.embed_documents(&texts)
        })
        .await
        .and_then(|vectors| {
            if vectors.len() == count {
                Ok(vectors)
            } else {
                Err(LlmError::InvalidResponse(format!(
                    "expected {count} embeddings, got {}",
                    vectors.len()
                )))
            }
        });

        let status = match embedded {
            Ok(vectors) => {
                let entries = vectors.into_iter().zip(documents.iter().cloned()).collect();
                self.index = Some(VectorIndex::new(entries));
                tracing::info!(count, "vector index built");
                LoadStatus::Indexed(count)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to build vector index");
                tracing::info!(count, "using simple storage mode");
                LoadStatus::SimpleMode(count)
            }
        };
        self.documents = documents;
        status
    }

    /// Answer one input line: reload commands become system replies,
    /// everything else is a question.
    pub async fn handle(&mut self, query: &str) -> Reply {
        let trimmed = query.trim();
        if RELOAD_COMMANDS.iter().any(|c| trimmed.eq_ignore_ascii_case(c)) {
            let status = self.load_data().await;
            tracing::info!(?status, "reloaded face data");
            return if self.has_data() {
                Reply::system("Database reloaded")
            } else {
                Reply::system("No face data available after reload")
            };
        }
        Reply::response(self.query(query).await)
    }

    pub async fn query(&self, question: &str) -> String {
        if !self.has_data() {
            tracing::warn!("no data available to query");
            return NO_DATA_ANSWER.to_string();
        }

        let docs = self.retrieve(QueryIntent::classify(question), question).await;
        tracing::info!(question, retrieved = docs.len(), "retrieved context");

        let prompt = build_prompt(&docs, question);
        match retry(&self.llm_retry, "chat completion", || self.llm.complete(&prompt)).await {
            Ok(answer) => {
                tracing::info!(question, answer = %answer, "answered");
                answer.trim().to_string()
            }
            Err(err) if err.is_rate_limit() => {
                tracing::warn!("rate limited by the chat model, using canned response");
                degraded_answer(question, &docs)
            }
            Err(err) => {
                tracing::error!(error = %err, "chat completion failed");
                TECHNICAL_ISSUE_ANSWER.to_string()
            }
        }
    }

    async fn retrieve(&self, intent: QueryIntent, question: &str) -> Vec<Document> {
        match intent {
            QueryIntent::MostRecent => {
                let all = self
                    .vector_search(question, usize::MAX)
                    .await
                    .unwrap_or_else(|| self.documents.clone());
                most_recent(&all).cloned().into_iter().collect()
            }
            QueryIntent::Count => self
                .vector_search(question, usize::MAX)
                .await
                .unwrap_or_else(|| self.documents.clone()),
            QueryIntent::Similarity => match self.vector_search(question, self.top_k).await {
                Some(docs) => docs,
                None => keyword_search(&self.documents, question),
            },
        }
    }

    /// `None` when there is no index or the query cannot be embedded.
    async fn vector_search(&self, question: &str, k: usize) -> Option<Vec<Document>> {
        let index = self.index.as_ref()?;
        match retry(&self.llm_retry, "embed query", || self.embedder.embed_query(question)).await {
            Ok(vector) => Some(index.search(&vector, k)),
            Err(err) => {
                tracing::error!(error = %err, "vector retrieval failed");
                None
            }
        }
    }

    fn clear(&mut self) {
        self.index = None;
        self.documents.clear();
    }
}

/// `Ok(None)` when the database has no faces table yet.
fn read_faces(path: &Path) -> Result<Option<Vec<FaceSummary>>, StoreError> {
    let store = FaceStore::open_existing(path)?;
    if !store.has_faces_table()? {
        return Ok(None);
    }
    store.summaries().map(Some)
}

pub fn build_prompt(docs: &[Document], question: &str) -> String {
    let context = docs
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a helpful assistant that answers questions about registered faces based on the provided context.\n\
         Use the context to provide accurate answers. If the information is not available, say so clearly.\n\
         \n\
         Context: {context}\n\
         \n\
         Question: {question}\n\
         \n\
         Answer in a concise and natural manner. If you're not sure about some details, you can say that \
         the information is not available in the database."
    )
}

fn degraded_answer(question: &str, docs: &[Document]) -> String {
    let q = question.to_lowercase();
    if (q.contains("who") || q.contains("name")) && !docs.is_empty() {
        let names: Vec<&str> = docs.iter().map(|d| d.metadata.name.as_str()).collect();
        return format!(
            "I found these names in our database: {}. I cannot provide more detailed information at the moment due to service limitations.",
            names.join(", ")
        );
    }
    HIGH_DEMAND_ANSWER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    const VOCAB: [&str; 4] = ["alice", "bob", "carol", "dave"];

    /// Bag-of-names embedding: one axis per known name plus a bias axis.
    struct FakeEmbedder {
        fail_documents: bool,
        fail_queries: bool,
    }

    fn bag(text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut v: Vec<f32> = VOCAB.iter().map(|w| if lowered.contains(w) { 1.0 } else { 0.0 }).collect();
        v.push(0.1);
        v
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            if self.fail_documents {
                return Err(LlmError::RateLimited("429".into()));
            }
            Ok(texts.iter().map(|t| bag(t)).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            if self.fail_queries {
                return Err(LlmError::Connection("down".into()));
            }
            Ok(bag(text))
        }
    }

    struct FakeLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ChatModel for FakeLlm {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::RateLimited("429".into())))
        }
    }

    struct Harness {
        rag: ChatRag,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    fn harness(replies: Vec<Result<String, LlmError>>, fail_documents: bool, fail_queries: bool) -> Harness {
        harness_at("/nonexistent/faces.db".as_ref(), replies, fail_documents, fail_queries)
    }

    fn harness_at(
        db_path: &Path,
        replies: Vec<Result<String, LlmError>>,
        fail_documents: bool,
        fail_queries: bool,
    ) -> Harness {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let llm = FakeLlm { replies: Mutex::new(replies.into()), prompts: prompts.clone() };
        let rag = ChatRag::new(
            db_path,
            Box::new(FakeEmbedder { fail_documents, fail_queries }),
            Box::new(llm),
            3,
        )
        .with_retry_policies(
            RetryPolicy::index_build().immediate(),
            RetryPolicy::llm_call().immediate(),
        );
        Harness { rag, prompts }
    }

    fn faces() -> Vec<FaceSummary> {
        [
            (1, "Alice", "2024-01-01 09:00:00"),
            (2, "Bob", "2024-03-05 12:30:00"),
            (3, "Carol", "2024-02-10 08:15:00"),
            (4, "Dave", "2023-12-31 23:59:59"),
        ]
        .into_iter()
        .map(|(id, name, ts)| FaceSummary { id, name: name.into(), timestamp: ts.into() })
        .collect()
    }

    fn last_prompt(h: &Harness) -> String {
        h.prompts.lock().unwrap().last().cloned().unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(QueryIntent::classify("Who was the LAST person to Register?"), QueryIntent::MostRecent);
        assert_eq!(QueryIntent::classify("How many people are registered?"), QueryIntent::Count);
        assert_eq!(QueryIntent::classify("How many faces?"), QueryIntent::Similarity);
        assert_eq!(QueryIntent::classify("Tell me about Alice"), QueryIntent::Similarity);
    }

    #[tokio::test]
    async fn test_no_data_answer() {
        let mut h = harness(vec![], false, false);
        assert_eq!(h.rag.load_faces(&[]).await, LoadStatus::Empty);
        assert_eq!(h.rag.query("who is here?").await, NO_DATA_ANSWER);
        assert!(h.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_indexed_similarity_query() {
        let mut h = harness(vec![Ok("  Alice registered in January.  ".into())], false, false);
        assert_eq!(h.rag.load_faces(&faces()).await, LoadStatus::Indexed(4));
        assert!(h.rag.is_indexed());

        let answer = h.rag.query("When did Alice register?").await;
        assert_eq!(answer, "Alice registered in January.");

        let prompt = last_prompt(&h);
        assert!(prompt.contains("Question: When did Alice register?"));
        let context = prompt.split("Context: ").nth(1).unwrap().split("\n\nQuestion").next().unwrap();
        assert_eq!(context.lines().count(), 3);
        assert!(context.lines().next().unwrap().starts_with("Name: Alice,"));
    }

    #[tokio::test]
    async fn test_most_recent_uses_single_newest() {
        let mut h = harness(vec![Ok("Bob".into())], false, false);
        h.rag.load_faces(&faces()).await;

        h.rag.query("Who was the last person to register?").await;
        let prompt = last_prompt(&h);
        assert!(prompt.contains("Context: Name: Bob, Registered at: 2024-03-05 12:30:00, ID: 2\n"));
        assert!(!prompt.contains("Alice"));
    }

    #[tokio::test]
    async fn test_count_uses_every_document() {
        let mut h = harness(vec![Ok("4".into())], true, false);
        assert_eq!(h.rag.load_faces(&faces()).await, LoadStatus::SimpleMode(4));
        assert!(h.rag.has_data());
        assert!(!h.rag.is_indexed());

        h.rag.query("How many people have registered?").await;
        let prompt = last_prompt(&h);
        for name in ["Alice", "Bob", "Carol", "Dave"] {
            assert!(prompt.contains(&format!("Name: {name},")));
        }
    }

    #[tokio::test]
    async fn test_count_with_index_retrieves_every_document() {
        let mut h = harness(vec![Ok("4".into())], false, false);
        assert_eq!(h.rag.load_faces(&faces()).await, LoadStatus::Indexed(4));
        assert!(h.rag.is_indexed());

        // Four documents exceed top_k; vector order puts the named face first.
        h.rag.query("How many registered people look like Dave?").await;
        let prompt = last_prompt(&h);
        let context = prompt.split("Context: ").nth(1).unwrap().split("\n\nQuestion").next().unwrap();
        assert_eq!(context.lines().count(), 4);
        assert!(context.lines().next().unwrap().starts_with("Name: Dave,"));
    }

    #[tokio::test]
    async fn test_query_embedding_failure_falls_back_to_keywords() {
        let mut h = harness(vec![Ok("ok".into())], false, true);
        h.rag.load_faces(&faces()).await;

        h.rag.query("carol").await;
        let prompt = last_prompt(&h);
        assert!(prompt.contains("Name: Carol,"));
        assert!(!prompt.contains("Name: Bob,"));
    }

    #[tokio::test]
    async fn test_rate_limit_canned_names() {
        let mut h = harness(vec![], true, false);
        h.rag.load_faces(&faces()).await;

        let answer = h.rag.query("Who is Dave?").await;
        assert_eq!(
            answer,
            "I found these names in our database: Dave. I cannot provide more detailed information at the moment due to service limitations."
        );
        assert_eq!(h.prompts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_high_demand() {
        let mut h = harness(vec![], false, false);
        h.rag.load_faces(&faces()).await;
        assert_eq!(h.rag.query("Describe the database").await, HIGH_DEMAND_ANSWER);
    }

    #[tokio::test]
    async fn test_other_failure_is_technical_issue() {
        let mut h = harness(vec![Err(LlmError::Connection("refused".into()))], false, false);
        h.rag.load_faces(&faces()).await;
        assert_eq!(h.rag.query("Who is Alice?").await, TECHNICAL_ISSUE_ANSWER);
    }

    #[tokio::test]
    async fn test_reload_with_missing_database() {
        let mut h = harness(vec![], false, false);
        h.rag.load_faces(&faces()).await;

        let reply = h.rag.handle("  Reload Database ").await;
        assert_eq!(reply, Reply::system("No face data available after reload"));
        assert!(!h.rag.has_data());
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let path = std::env::temp_dir().join(format!("facewise-chat-{}-load.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let store = FaceStore::open(&path).unwrap();
            let mut values = vec![0.0; facewise_core::ENCODING_DIM];
            values[0] = 1.0;
            store.insert("Erin", &facewise_core::Encoding::new(values)).unwrap();
        }

        let mut h = harness_at(&path, vec![], false, false);
        assert_eq!(h.rag.load_data().await, LoadStatus::Indexed(1));
        assert_eq!(h.rag.handle("refresh data").await, Reply::system("Database reloaded"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(
            LoadStatus::Indexed(2).message().unwrap(),
            "Successfully loaded 2 faces into the chat system"
        );
        assert!(LoadStatus::SimpleMode(2).message().is_none());
        assert!(LoadStatus::SimpleMode(2).has_data());
        assert!(!LoadStatus::Unavailable.has_data());
        assert_eq!(
            LoadStatus::Unavailable.message().unwrap(),
            "Unable to access face data. Please try again later."
        );
        assert_eq!(
            LoadStatus::Failed.message().unwrap(),
            "Chat system is currently unavailable. Please try again later."
        );
        assert!(!LoadStatus::Failed.has_data());
    }
}
