//! Token pipeline shared by indexing and querying.
//!
//! Word-boundary split on non-alphanumerics, lowercased, with absurdly long
//! tokens (minified blobs, base64) dropped.
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer, TokenStream};

const MAX_TOKEN_LEN: usize = 40;

pub fn build_analyzer() -> TextAnalyzer {
	TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
		.filter(LowerCaser)
		.build()
}

/// Run `text` through `analyzer`, returning tokens in order (duplicates kept).
pub fn tokenize(analyzer: &TextAnalyzer, text: &str) -> Vec<String> {
	let mut analyzer = analyzer.clone();
	let mut stream = analyzer.token_stream(text);
	let mut tokens = Vec::new();
	while stream.advance() {
		tokens.push(stream.token().text.clone());
	}
	tokens
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn splits_on_word_boundaries_and_lowercases() {
		let a = build_analyzer();
		assert_eq!(tokenize(&a, "Hello, World! fn parse_args()"), vec!["hello", "world", "fn", "parse", "args"]);
	}

	#[test]
	fn drops_overlong_tokens() {
		let a = build_analyzer();
		let blob = "x".repeat(200);
		assert_eq!(tokenize(&a, &format!("keep {blob} this")), vec!["keep", "this"]);
	}
}
