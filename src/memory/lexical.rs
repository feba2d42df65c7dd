// Lexical ranking: stemmed term-frequency vectors compared by cosine

use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;

pub struct LexicalIndex {
    stemmer: Stemmer,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Rank `documents` against `query`, best first.
    ///
    /// Documents sharing no term with the query are dropped.
    pub fn rank(&self, query: &str, documents: &[(i64, String)], top_k: usize) -> Vec<(i64, f32)> {
        let query_vec = self.term_frequencies(query);
        if query_vec.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(i64, f32)> = documents
            .iter()
            .map(|(id, text)| {
                let doc_vec = self.term_frequencies(text);
                (*id, cosine(&query_vec, &doc_vec) as f32)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));
        scored.truncate(top_k);
        scored
    }

    fn tokenize_and_stem(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(|word| {
                let clean_word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
                self.stemmer.stem(&clean_word).to_string()
            })
            .filter(|word| !word.is_empty())
            .collect()
    }

    /// Normalised term frequencies
    fn term_frequencies(&self, text: &str) -> HashMap<String, f64> {
        let mut tf: HashMap<String, f64> = HashMap::new();
        for token in self.tokenize_and_stem(text) {
            *tf.entry(token).or_insert(0.0) += 1.0;
        }

        let total: f64 = tf.values().sum();
        if total > 0.0 {
            for value in tf.values_mut() {
                *value /= total;
            }
        }
        tf
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let mag_a: f64 = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b: f64 = b.values().map(|x| x * x).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
