//! Rendering of search results for the terminal or for scripts.

use serde::Serialize;

use ragdb_core::types::SearchResult;

const SNIPPET_MAX_LEN: usize = 200;

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    results: &'a [SearchResult],
}

pub fn format_json(query: &str, results: &[SearchResult]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonOutput { query, results })
}

pub fn format_human(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results for \"{query}\"");
    }
    let mut out = format!("{} results for \"{query}\"\n", results.len());
    for r in results {
        let source = r.metadata.get("file_path").map_or(r.id.as_str(), String::as_str);
        let lines = match (r.metadata.get("start_line"), r.metadata.get("end_line")) {
            (Some(start), Some(end)) => format!(":{start}-{end}"),
            _ => String::new(),
        };
        out.push_str(&format!("\n{:>3}. [{:.4}] {source}{lines}\n", r.rank, r.score));
        out.push_str(&format!("     {}\n", snippet(&r.text)));
    }
    out
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_MAX_LEN {
        return flat;
    }
    let cut: String = flat.chars().take(SNIPPET_MAX_LEN).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdb_core::types::{Meta, SearchType};

    fn hit(id: &str, text: &str) -> SearchResult {
        let mut metadata = Meta::new();
        metadata.insert("file_path".into(), "/docs/a.md".into());
        metadata.insert("start_line".into(), "3".into());
        metadata.insert("end_line".into(), "9".into());
        SearchResult { id: id.into(), text: text.into(), score: 0.5, metadata, rank: 1, search_type: SearchType::Hybrid }
    }

    #[test]
    fn human_output_shows_source_and_lines() {
        let out = format_human("fox", &[hit("a.md_0", "the quick\n brown fox")]);
        assert!(out.contains("/docs/a.md:3-9"));
        assert!(out.contains("the quick brown fox"));
    }

    #[test]
    fn long_text_is_cut() {
        let long = "word ".repeat(100);
        assert!(snippet(&long).ends_with("..."));
        assert_eq!(snippet(&long).chars().count(), SNIPPET_MAX_LEN + 3);
    }

    #[test]
    fn empty_results_message() {
        assert_eq!(format_human("q", &[]), "No results for \"q\"");
    }

    #[test]
    fn json_carries_query() {
        let json = format_json("fox", &[hit("a.md_0", "fox")]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["query"], "fox");
        assert_eq!(value["results"][0]["search_type"], "hybrid");
    }
}
