//! Ranked tool search and "did you mean" suggestions

use serde::Serialize;
use serde_json::Value;

use super::snapshot::RegistrySnapshot;

// Higher scores rank first
const SCORE_EXACT_NAME: u32 = 1000;
const SCORE_UPSTREAM_NAME: u32 = 800;
const SCORE_NAME_PREFIX: u32 = 300;
const SCORE_ALL_TERMS_IN_NAME: u32 = 200;
const SCORE_ALL_TERMS_CROSSED: u32 = 150;
const SCORE_ALL_TERMS_IN_DESC: u32 = 100;
const SCORE_PARTIAL_NAME: u32 = 50;
const SCORE_PARTIAL_DESC: u32 = 25;
const SCORE_FUZZY: u32 = 10;

/// Minimum similarity (percent) for a suggestion
const SUGGESTION_THRESHOLD: usize = 40;
const MAX_SUGGESTIONS: usize = 5;

/// One search result: a tool as its upstream knows it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolHit {
    pub name: String,
    pub description: String,
    pub mcp_name: String,
    pub input_schema: Option<Value>,
    #[serde(skip)]
    pub score: u32,
}

/// `code_insight`, `code-insight` and `Code Insight` all become `codeinsight`
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| c.is_whitespace() || matches!(c, '_' | '-' | '.'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

struct Query {
    lower: String,
    norm: String,
    terms: Vec<String>,
}

fn score(query: &Query, upstream: &str, name: &str, description: &str) -> u32 {
    let name_lower = name.to_lowercase();
    let desc_lower = description.to_lowercase();
    let name_norm = normalize(name);
    let desc_norm = normalize(description);
    let upstream_lower = upstream.to_lowercase();

    let mut score = 0;
    if name_lower == query.lower || name_norm == query.norm {
        score += SCORE_EXACT_NAME;
    }
    if upstream_lower == query.lower || normalize(upstream) == query.norm {
        score += SCORE_UPSTREAM_NAME;
    }
    if name_lower.starts_with(&query.lower) || name_norm.starts_with(&query.norm) {
        score += SCORE_NAME_PREFIX;
    }

    if !query.terms.is_empty() {
        let all_in = |text: &str| query.terms.iter().all(|t| text.contains(t.as_str()));
        let count_in = |text: &str| query.terms.iter().filter(|t| text.contains(t.as_str())).count() as u32;

        if all_in(&name_lower) {
            score += SCORE_ALL_TERMS_IN_NAME;
        }
        if all_in(&format!("{upstream_lower} {name_lower}")) {
            score += SCORE_ALL_TERMS_CROSSED;
        }
        if all_in(&desc_lower) {
            score += SCORE_ALL_TERMS_IN_DESC;
        }
        score += count_in(&name_lower) * SCORE_PARTIAL_NAME;
        score += count_in(&desc_lower) * SCORE_PARTIAL_DESC;
    }

    if score == 0
        && (name_lower.contains(&query.lower)
            || desc_lower.contains(&query.lower)
            || name_norm.contains(&query.norm)
            || desc_norm.contains(&query.norm))
    {
        score += SCORE_FUZZY;
    }
    score
}

/// Search tools of every available upstream
///
/// An empty query returns everything (optionally filtered by upstream) in
/// registration order; otherwise results are ranked by score, ties by
/// upstream then tool name.
pub fn search_tools(
    snapshot: &RegistrySnapshot,
    query: &str,
    upstream_filter: Option<&str>,
) -> Vec<ToolHit> {
    let query = query.trim();
    let parsed = Query {
        lower: query.to_lowercase(),
        norm: normalize(query),
        terms: tokenize(query),
    };

    let mut hits = Vec::new();
    for upstream in snapshot.upstreams().iter().filter(|u| u.available) {
        if upstream_filter.is_some_and(|f| f != upstream.name) {
            continue;
        }
        for tool in &upstream.catalog.tools {
            let description = tool.description.clone().unwrap_or_default();
            let score = if query.is_empty() {
                0
            } else {
                match score(&parsed, &upstream.name, &tool.name, &description) {
                    0 => continue,
                    s => s,
                }
            };
            hits.push(ToolHit {
                name: tool.name.clone(),
                description,
                mcp_name: upstream.name.clone(),
                input_schema: tool.input_schema().cloned(),
                score,
            });
        }
    }

    if !query.is_empty() {
        hits.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.mcp_name.cmp(&b.mcp_name))
                .then_with(|| a.name.cmp(&b.name))
        });
    }
    hits
}

fn normalize_ident(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Percentage similarity of two normalized strings
fn similarity(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let longer = a.len().max(b.len());
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if long.windows(short.len()).any(|w| w == short) {
        return short.len() * 100 / longer;
    }
    longest_common_subsequence(a, b) * 100 / longer
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Up to five names similar to `query`, best first
pub fn suggest<'a>(query: &str, available: impl Iterator<Item = &'a str>) -> Vec<String> {
    let query: Vec<char> = normalize_ident(query).chars().collect();
    let mut scored: Vec<(usize, &str)> = available
        .filter_map(|name| {
            let candidate: Vec<char> = normalize_ident(name).chars().collect();
            let score = similarity(&query, &candidate);
            (score >= SUGGESTION_THRESHOLD).then_some((score, name))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, name)| name.to_string())
        .collect()
}
