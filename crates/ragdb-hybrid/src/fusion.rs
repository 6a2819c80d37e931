//! Weighted reciprocal rank fusion.
//!
//! An item at 1-based position `r` of a list with weight `w` gains `w / r`;
//! absent from a list, it gains nothing from it. Only list positions matter,
//! never the sub-search scores, so the output depends on nothing but the two
//! input orders. Ties break by id ascending.
use std::collections::HashMap;

use ragdb_core::types::{assign_ranks, SearchResult, SearchType};

#[allow(clippy::cast_precision_loss)]
fn contribution(weight: f32, position: usize) -> f32 {
	weight / (position + 1) as f32
}

pub fn reciprocal_rank_fusion(
	semantic: &[SearchResult],
	keyword: &[SearchResult],
	semantic_weight: f32,
	keyword_weight: f32,
	limit: usize,
) -> Vec<SearchResult> {
	let mut fused: HashMap<&str, SearchResult> = HashMap::new();
	let lists = [(semantic, semantic_weight, "semantic_rank"), (keyword, keyword_weight, "keyword_rank")];
	for (list, weight, rank_key) in lists {
		for (position, hit) in list.iter().enumerate() {
			let entry = fused.entry(hit.id.as_str()).or_insert_with(|| SearchResult {
				score: 0.0,
				rank: 0,
				search_type: SearchType::Hybrid,
				..hit.clone()
			});
			entry.score += contribution(weight, position);
			entry.metadata.insert(rank_key.to_string(), (position + 1).to_string());
		}
	}
	let mut results: Vec<SearchResult> = fused.into_values().collect();
	results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
	results.truncate(limit);
	assign_ranks(&mut results);
	results
}
