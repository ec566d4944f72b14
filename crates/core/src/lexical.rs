use std::collections::{BTreeSet, HashMap};

const STOPWORDS: &[&str] = &[
    "about", "after", "all", "also", "and", "any", "are", "been", "before", "being", "but",
    "can", "could", "did", "does", "doing", "for", "from", "had", "has", "have", "her", "his",
    "how", "into", "its", "may", "more", "not", "our", "should", "such", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "those", "through", "was", "were",
    "what", "when", "where", "which", "while", "who", "whom", "whose", "why", "will", "with",
    "would", "you", "your",
];

/// Lowercased alphanumeric tokens longer than two chars, stopwords removed.
pub fn content_terms(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|token| token.chars().count() > 2)
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .collect()
}

pub fn term_set(text: &str) -> BTreeSet<String> {
    content_terms(text).into_iter().collect()
}

/// Number of `terms` that also occur in `other`.
pub fn shared_terms(terms: &BTreeSet<String>, other: &BTreeSet<String>) -> usize {
    terms.intersection(other).count()
}

/// Share of `query` terms found in `candidate`, in `[0, 1]`.
pub fn coverage(query: &BTreeSet<String>, candidate: &BTreeSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    shared_terms(query, candidate) as f64 / query.len() as f64
}

/// Idf-weighted term overlap of `query` against each text in `texts`.
///
/// Document frequency is taken over `texts` themselves; a term present in every
/// text still scores above zero.
pub fn idf_scores(query: &str, texts: &[&str]) -> Vec<f64> {
    let query_terms = term_set(query);
    if query_terms.is_empty() || texts.is_empty() {
        return vec![0.0; texts.len()];
    }

    let text_terms: Vec<BTreeSet<String>> = texts.iter().map(|text| term_set(text)).collect();
    let total = texts.len() as f64;
    let mut document_frequency = HashMap::<&str, f64>::new();
    for terms in &text_terms {
        for term in query_terms.intersection(terms) {
            *document_frequency.entry(term.as_str()).or_default() += 1.0;
        }
    }

    text_terms
        .iter()
        .map(|terms| {
            query_terms
                .intersection(terms)
                .map(|term| {
                    let df = document_frequency.get(term.as_str()).copied().unwrap_or(0.0);
                    (1.0 + (total - df + 0.5) / (df + 0.5)).ln()
                })
                .sum()
        })
        .collect()
}
