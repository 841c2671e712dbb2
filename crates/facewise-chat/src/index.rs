//! In-memory vector index over face documents.

use crate::document::Document;
use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Brute-force nearest-neighbour index. Rebuilt wholesale on reload.
pub struct VectorIndex {
    entries: Vec<(Vec<f32>, Document)>,
}

impl VectorIndex {
    pub fn new(entries: Vec<(Vec<f32>, Document)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `k` documents ordered by ascending L2 distance to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Document> {
        let mut scored: Vec<(f32, &Document)> = self
            .entries
            .iter()
            .map(|(vector, doc)| (squared_distance(vector, query), doc))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.into_iter().take(k).map(|(_, doc)| doc.clone()).collect()
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Keyword retrieval used when no vector index is available.
///
/// A document matches when the lowercased query is a substring of its name,
/// or when one of the name's words appears as a whole word in the query.
/// Documents without a name segment match on their whole text. With no
/// match, a random sample of up to three documents is returned as context.
pub fn keyword_search(documents: &[Document], query: &str) -> Vec<Document> {
    let query = query.trim().to_lowercase();
    let query_words: HashSet<&str> = words(&query).collect();

    let matches: Vec<Document> = documents
        .iter()
        .filter(|doc| match doc.name_segment() {
            Some(name) => name.contains(&query) || words(&name).any(|w| query_words.contains(w)),
            None => doc.content.to_lowercase().contains(&query),
        })
        .cloned()
        .collect();

    if !matches.is_empty() {
        return matches;
    }

    documents
        .choose_multiple(&mut rand::thread_rng(), documents.len().min(3))
        .cloned()
        .collect()
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}
