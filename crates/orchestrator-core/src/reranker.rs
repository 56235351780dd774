//! Context rerankers: BM25, density (BM25 + MMR), structural (cosine
//! fusion), and reciprocal rank fusion for multi-source merges. All
//! reranking is pure CPU work dispatched to the shared worker pool in
//! `orchestrator-api`'s application container — never run on the
//! request-handling task directly.

use crate::model::QueryComplexity;
use std::collections::{HashMap, HashSet};

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;
/// Collections here are short and statistics unstable across them, so
/// IDF is approximated as a constant rather than computed per corpus.
const APPROXIMATE_IDF: f32 = std::f32::consts::LN_2;

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub id: String,
    pub text: String,
    pub score: f32,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Okapi BM25 over a candidate set against a query, with a fixed
/// IDF approximation (short documents, unstable collection stats).
pub fn bm25_rank(query: &str, candidates: &[(String, String)]) -> Vec<RankedCandidate> {
    let query_terms = tokenize(query);
    let docs: Vec<Vec<String>> = candidates.iter().map(|(_, text)| tokenize(text)).collect();
    let avg_doc_len = if docs.is_empty() {
        0.0
    } else {
        docs.iter().map(|d| d.len() as f32).sum::<f32>() / docs.len() as f32
    };

    let mut ranked: Vec<RankedCandidate> = candidates
        .iter()
        .zip(docs.iter())
        .map(|((id, text), doc_terms)| {
            let doc_len = doc_terms.len() as f32;
            let mut term_freqs: HashMap<&str, u32> = HashMap::new();
            for term in doc_terms {
                *term_freqs.entry(term.as_str()).or_insert(0) += 1;
            }

            let score: f32 = query_terms
                .iter()
                .map(|qt| {
                    let freq = *term_freqs.get(qt.as_str()).unwrap_or(&0) as f32;
                    if freq == 0.0 {
                        return 0.0;
                    }
                    let numerator = freq * (BM25_K1 + 1.0);
                    let denominator =
                        freq + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_doc_len.max(1.0));
                    APPROXIMATE_IDF * numerator / denominator
                })
                .sum();

            RankedCandidate {
                id: id.clone(),
                text: text.clone(),
                score,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// BM25 followed by maximal marginal relevance: balances normalized
/// relevance against redundancy with already-selected items. Falls
/// back to plain BM25 below `min_candidates`.
pub fn density_rank(query: &str, candidates: &[(String, String)], lambda: f32, min_candidates: usize) -> Vec<RankedCandidate> {
    let bm25 = bm25_rank(query, candidates);
    if bm25.len() < min_candidates {
        return bm25;
    }

    let max_score = bm25.iter().map(|c| c.score).fold(0.0_f32, f32::max).max(1e-9);
    let token_sets: HashMap<String, HashSet<String>> = bm25
        .iter()
        .map(|c| (c.id.clone(), tokenize(&c.text).into_iter().collect()))
        .collect();

    let mut remaining: Vec<RankedCandidate> = bm25;
    let mut selected: Vec<RankedCandidate> = Vec::new();

    while !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_mmr = f32::MIN;
        for (idx, candidate) in remaining.iter().enumerate() {
            let normalized = candidate.score / max_score;
            let max_jaccard = selected
                .iter()
                .map(|s| jaccard(&token_sets[&candidate.id], &token_sets[&s.id]))
                .fold(0.0_f32, f32::max);
            let mmr = lambda * normalized - (1.0 - lambda) * max_jaccard;
            if mmr > best_mmr {
                best_mmr = mmr;
                best_idx = idx;
            }
        }
        let mut chosen = remaining.remove(best_idx);
        chosen.score = best_mmr;
        selected.push(chosen);
    }

    selected
}

/// Complexity-dependent fusion weight `(text_weight, structural_weight)`.
#[must_use]
pub fn structural_fusion_weights(complexity: QueryComplexity) -> (f32, f32) {
    match complexity {
        QueryComplexity::EntityLookup => (0.9, 0.1),
        QueryComplexity::SingleHop => (0.6, 0.4),
        QueryComplexity::MultiHop => (0.3, 0.7),
        QueryComplexity::Aggregate => (0.4, 0.6),
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Cosine similarity between a query structural vector and a node's
/// embedding, fused with its text score by a complexity-dependent
/// weight.
pub fn structural_rank(
    query_structural_vector: &[f32],
    candidates: &[(String, String, Vec<f32>)],
    text_scores: &HashMap<String, f32>,
    complexity: QueryComplexity,
) -> Vec<RankedCandidate> {
    let (text_weight, structural_weight) = structural_fusion_weights(complexity);
    let mut ranked: Vec<RankedCandidate> = candidates
        .iter()
        .map(|(id, text, embedding)| {
            let structural_score = cosine(query_structural_vector, embedding);
            let text_score = *text_scores.get(id).unwrap_or(&0.0);
            RankedCandidate {
                id: id.clone(),
                text: text.clone(),
                score: text_weight * text_score + structural_weight * structural_score,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

const RRF_K: f32 = 60.0;

/// Reciprocal rank fusion over multiple ranked source lists, k=60.
#[must_use]
pub fn reciprocal_rank_fusion(sources: &[Vec<String>]) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for source in sources {
        for (rank, id) in source.iter().enumerate() {
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        }
    }
    let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));
    fused
}
