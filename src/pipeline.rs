//! Orchestration of the refresh and ask workflows.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use tokio::task;

use crate::answer::{build_prompt, AnswerModel, FALLBACK_ANSWER, SYSTEM_PROMPT};
use crate::embedder::Embedder;
use crate::fetcher::WikiSource;
use crate::index::SimilarityIndex;
use crate::normalizer::{clean_html, CleanOptions};
use crate::refresh::RefreshTracker;
use crate::store::EmbeddingStore;

/// Workflow tuning shared by refresh and ask.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    /// Spaces to index during a refresh; empty means every visible space.
    pub spaces: Vec<String>,
    /// Candidates returned per retrieval query.
    pub top_k: usize,
    /// Concurrent page-content fetches. Bounded to stay under the wiki's
    /// rate limits; unbounded fan-out triggers cascading 429s.
    pub fetch_concurrency: usize,
    /// HTML cleaning policy applied before embedding and prompting.
    pub clean: CleanOptions,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            spaces: Vec::new(),
            top_k: 8,
            fetch_concurrency: 5,
            clean: CleanOptions::default(),
        }
    }
}

/// A grounded answer plus the pages that contributed context.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Generated (or fallback) answer text.
    pub text: String,
    /// Contributing page ids, best match first.
    pub page_ids: Vec<String>,
}

/// Wires the fetcher, normalizer, embedder, store, index, and scheduler into
/// the refresh and ask workflows. Collaborators are injected so tests can run
/// against fakes.
pub struct Assistant<W> {
    wiki: W,
    embedder: Arc<dyn Embedder>,
    store: EmbeddingStore,
    tracker: RefreshTracker,
    settings: AssistantSettings,
}

impl<W: WikiSource> Assistant<W> {
    /// Builds an assistant from its collaborators.
    pub fn new(
        wiki: W,
        embedder: Arc<dyn Embedder>,
        store: EmbeddingStore,
        tracker: RefreshTracker,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            wiki,
            embedder,
            store,
            tracker,
            settings,
        }
    }

    /// Whether the snapshot is due for regeneration.
    pub fn needs_refresh(&self, force: bool) -> bool {
        self.tracker.need_update(force)
    }

    /// Full re-embed of the configured spaces (every space when none are
    /// configured). Returns the number of pages embedded.
    pub async fn refresh(&self) -> Result<usize> {
        let spaces = if self.settings.spaces.is_empty() {
            self.wiki
                .spaces()
                .await
                .context("failed to enumerate spaces")?
        } else {
            self.settings.spaces.clone()
        };
        self.refresh_spaces(&spaces).await
    }

    /// Full re-embed of the entire wiki, ignoring the configured space list
    /// and the staleness check.
    pub async fn rebuild_all(&self) -> Result<usize> {
        let spaces = self
            .wiki
            .spaces()
            .await
            .context("failed to enumerate spaces")?;
        self.refresh_spaces(&spaces).await
    }

    async fn refresh_spaces(&self, spaces: &[String]) -> Result<usize> {
        eprintln!("refreshing embeddings for {} space(s)", spaces.len());
        let mut page_ids = Vec::new();
        for space in spaces {
            match self.wiki.page_ids(space).await {
                Ok(ids) => {
                    eprintln!("space {space}: {} page(s)", ids.len());
                    page_ids.extend(ids);
                }
                // listing is enumeration-level work: skip the space, keep going
                Err(err) => eprintln!("space {space}: listing failed, skipping: {err}"),
            }
        }

        let documents = self.fetch_clean(&page_ids).await;
        anyhow::ensure!(
            !documents.is_empty(),
            "no content retrieved; refusing to write an empty snapshot"
        );

        let (ids, texts): (Vec<String>, Vec<String>) = documents.into_iter().unzip();
        let embedder = Arc::clone(&self.embedder);
        let vectors = task::spawn_blocking(move || embedder.embed(&texts))
            .await
            .context("embedding task panicked")?
            .context("failed to embed refreshed content")?;
        anyhow::ensure!(
            vectors.len() == ids.len(),
            "embedder returned {} vectors for {} documents",
            vectors.len(),
            ids.len()
        );

        let count = ids.len();
        // the write happens only after every fetch and the whole embed join
        self.store
            .save(ids, vectors)
            .context("failed to persist embeddings snapshot")?;
        self.tracker
            .mark_refreshed()
            .context("failed to record refresh timestamp")?;
        eprintln!("snapshot written: {count} page(s) embedded");
        Ok(count)
    }

    /// Answers a question from the knowledge base.
    ///
    /// Refreshes first when stale or forced, then loads the snapshot, embeds
    /// the question with the same embedder, retrieves top-k pages, re-fetches
    /// their content for grounding, and asks the answer model. Generation
    /// failures degrade to [`FALLBACK_ANSWER`] instead of erroring.
    pub async fn ask(
        &self,
        question: &str,
        force_refresh: bool,
        answerer: Arc<dyn AnswerModel>,
    ) -> Result<Answer> {
        if self.tracker.need_update(force_refresh) {
            self.refresh().await?;
        }

        let (ids, vectors) = self.store.load().context("failed to load embeddings")?;
        let index = SimilarityIndex::from_snapshot(ids, vectors)
            .context("failed to build similarity index")?;

        let embedder = Arc::clone(&self.embedder);
        let query_texts = vec![question.to_string()];
        let mut query_vectors = task::spawn_blocking(move || embedder.embed(&query_texts))
            .await
            .context("embedding task panicked")?
            .context("failed to embed question")?;
        anyhow::ensure!(
            query_vectors.len() == 1,
            "embedder returned {} vectors for one question",
            query_vectors.len()
        );
        let query_vector = query_vectors.remove(0);

        let hits = index
            .search(&query_vector, self.settings.top_k)
            .context("similarity search failed")?;
        let page_ids: Vec<String> = hits.into_iter().map(|(id, _)| id).collect();

        let fetched = self.fetch_clean(&page_ids).await;
        // restore ranked order; the fan-out completes out of order
        let contexts: Vec<String> = page_ids
            .iter()
            .filter_map(|id| {
                fetched
                    .iter()
                    .find(|(fetched_id, _)| fetched_id == id)
                    .map(|(_, text)| text.clone())
            })
            .collect();

        let prompt = build_prompt(question, &contexts);
        let system = SYSTEM_PROMPT.to_string();
        let text = task::spawn_blocking(move || answerer.complete(&system, &prompt))
            .await
            .context("answer task panicked")?
            .unwrap_or_else(|err| {
                eprintln!("{err}");
                FALLBACK_ANSWER.to_string()
            });

        Ok(Answer { text, page_ids })
    }

    /// Fetches and cleans page bodies with a bounded fan-out.
    ///
    /// Per-page failures and empty bodies are logged and skipped; each task
    /// returns its `(id, text)` pair so ids and texts can never drift apart.
    async fn fetch_clean(&self, page_ids: &[String]) -> Vec<(String, String)> {
        let wiki = &self.wiki;
        let clean = self.settings.clean;
        let results: Vec<Option<(String, String)>> =
            stream::iter(page_ids.iter().cloned().map(|id| async move {
                match wiki.page_content(&id).await {
                    Ok(html) => {
                        let text = clean_html(&html, &clean);
                        if text.is_empty() {
                            eprintln!("page {id}: empty after cleaning, skipping");
                            None
                        } else {
                            Some((id, text))
                        }
                    }
                    Err(err) => {
                        eprintln!("page {id}: fetch failed, skipping: {err}");
                        None
                    }
                }
            }))
            .buffer_unordered(self.settings.fetch_concurrency.max(1))
            .collect()
            .await;
        results.into_iter().flatten().collect()
    }
}
