//! Finds the counterpart of a title in another catalog.
//!
//! Normal search trusts the catalog's own ranking. Smart search cleans the title, issues
//! several narrower queries and re-ranks every hit by normalized Levenshtein similarity.

use futures::future::join_all;

use crate::catalog::{CatalogCandidate, CatalogSource};

/// Minimum similarity a smart search hit needs to be accepted.
pub const MIN_SMART_ELIGIBLE_THRESHOLD: f64 = 0.4;

/// Titles this short after stripping brackets are re-parsed from the end.
const SUSPICIOUSLY_SHORT_TITLE: usize = 5;

const BRACKET_PAIRS: [(char, char); 4] = [('(', ')'), ('[', ']'), ('<', '>'), ('{', '}')];

/// Runs title searches against a [`CatalogSource`]. Never fails: errors become `None`.
#[derive(Debug, Clone, Default)]
pub struct SmartSearchEngine {
    extra_search_params: Option<String>,
}

impl SmartSearchEngine {
    /// `extra_search_params` is appended to every query. Blank strings are ignored.
    #[must_use]
    pub fn new(extra_search_params: Option<String>) -> Self {
        let extra_search_params = extra_search_params
            .map(|params| params.trim().to_string())
            .filter(|params| !params.is_empty());
        Self {
            extra_search_params,
        }
    }

    /// Searches `source` for `title` in the requested mode.
    pub async fn search(
        &self,
        source: &dyn CatalogSource,
        title: &str,
        smart: bool,
    ) -> Option<CatalogCandidate> {
        if smart {
            self.smart_search(source, title).await
        } else {
            self.normal_search(source, title).await
        }
    }

    /// Returns the catalog's first hit for `title`.
    pub async fn normal_search(
        &self,
        source: &dyn CatalogSource,
        title: &str,
    ) -> Option<CatalogCandidate> {
        let query = self.build_query(title);
        match source.search_catalog(query.clone()).await {
            Ok(results) => results.into_iter().next(),
            Err(e) => {
                crate::debug!(
                    "smart_search.normal_failed source_id={} query={query:?} error={e}",
                    source.id()
                );
                None
            }
        }
    }

    /// Returns the hit most similar to `title`, if it is similar enough.
    pub async fn smart_search(
        &self,
        source: &dyn CatalogSource,
        title: &str,
    ) -> Option<CatalogCandidate> {
        let cleaned_title = clean_title(title);
        let queries = search_queries(&cleaned_title);

        let searches = queries.iter().map(|query| {
            let query = self.build_query(query);
            async move {
                match source.search_catalog(query.clone()).await {
                    Ok(results) => results,
                    Err(e) => {
                        crate::debug!(
                            "smart_search.query_failed source_id={} query={query:?} error={e}",
                            source.id()
                        );
                        Vec::new()
                    }
                }
            }
        });

        let mut best: Option<(CatalogCandidate, f64)> = None;
        for candidate in join_all(searches).await.into_iter().flatten() {
            let similarity = normalized_similarity(&cleaned_title, &clean_title(&candidate.title));
            if similarity < MIN_SMART_ELIGIBLE_THRESHOLD {
                continue;
            }
            // first hit wins ties
            if best.as_ref().is_none_or(|(_, top)| similarity > *top) {
                best = Some((candidate, similarity));
            }
        }

        best.map(|(candidate, _)| candidate)
    }

    fn build_query(&self, query: &str) -> String {
        match &self.extra_search_params {
            Some(params) => format!("{query} {params}"),
            None => query.to_string(),
        }
    }
}

/// Normalizes a title for comparison.
///
/// Lowercases, drops bracketed text (reading from the end instead when that leaves a
/// suspiciously short title), folds everything but letters, digits, `-` and spaces to
/// spaces, removes ` - ` splitters and collapses whitespace.
#[must_use]
pub fn clean_title(title: &str) -> String {
    let lowered = title.to_lowercase();

    let mut cleaned = remove_text_in_brackets(&lowered, true);
    if cleaned.chars().count() <= SUSPICIOUSLY_SHORT_TITLE {
        cleaned = remove_text_in_brackets(&lowered, false);
    }

    let folded: String = cleaned
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == ' ' { c } else { ' ' })
        .collect();

    folded
        .trim()
        .replace(" - ", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Query variants for a cleaned title: the title, its two longest words, its longest word,
/// its first two words and its first word. Duplicates and blanks are dropped.
#[must_use]
pub fn search_queries(cleaned_title: &str) -> Vec<String> {
    let words: Vec<&str> = cleaned_title.split(' ').collect();
    let mut by_length = words.clone();
    // stable, so equally long words keep title order
    by_length.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

    let variants = [
        cleaned_title.to_string(),
        by_length.iter().take(2).copied().collect::<Vec<_>>().join(" "),
        by_length.iter().take(1).copied().collect::<Vec<_>>().join(" "),
        words.iter().take(2).copied().collect::<Vec<_>>().join(" "),
        words.iter().take(1).copied().collect::<Vec<_>>().join(" "),
    ];

    let mut queries: Vec<String> = Vec::with_capacity(variants.len());
    for variant in variants {
        let variant = variant.trim().to_string();
        if !variant.is_empty() && !queries.contains(&variant) {
            queries.push(variant);
        }
    }
    queries
}

fn remove_text_in_brackets(text: &str, read_forward: bool) -> String {
    let mut depths = [0_i32; BRACKET_PAIRS.len()];
    let mut kept: Vec<char> = Vec::with_capacity(text.len());

    let chars: Box<dyn Iterator<Item = char>> = if read_forward {
        Box::new(text.chars())
    } else {
        Box::new(text.chars().rev())
    };

    for c in chars {
        let opening = BRACKET_PAIRS.iter().position(|&(open, close)| {
            c == if read_forward { open } else { close }
        });
        let closing = BRACKET_PAIRS.iter().position(|&(open, close)| {
            c == if read_forward { close } else { open }
        });

        if let Some(index) = opening {
            depths[index] += 1;
        } else if let Some(index) = closing {
            depths[index] -= 1;
        } else if depths.iter().all(|depth| *depth <= 0) {
            kept.push(c);
        }
    }

    if !read_forward {
        kept.reverse();
    }
    kept.into_iter().collect()
}

/// `1 - distance / longest length`, so identical strings score `1.0`.
#[must_use]
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let similarity = 1.0 - levenshtein_distance(a, b) as f64 / longest as f64;
    similarity
}

/// Minimum number of single character edits turning `a` into `b`.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev_row: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;

        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);

            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }

        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_chars.len()]
}
