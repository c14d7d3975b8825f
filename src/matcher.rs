use std::collections::BTreeSet;

/// Words that carry no routing signal in a department name.
const FILLER_WORDS: &[&str] = &[
    "and",
    "county",
    "department",
    "departments",
    "dept",
    "directorate",
    "for",
    "ministry",
    "of",
    "office",
    "the",
];

pub const DEFAULT_MATCH_THRESHOLD: f64 = 70.0;

/// Resolves free-text department guesses onto the caller's catalog names.
#[derive(Debug, Clone, Copy)]
pub struct DepartmentMatcher {
    threshold: f64,
}

impl Default for DepartmentMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl DepartmentMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Returns the canonical catalog name, or `None` when nothing is close enough.
    pub fn resolve(&self, candidate: Option<&str>, known: &[String]) -> Option<String> {
        let candidate = candidate.map(str::trim).filter(|value| !value.is_empty())?;
        let needle = candidate.to_lowercase();
        let names: Vec<(&String, String)> = known
            .iter()
            .filter(|name| !name.trim().is_empty())
            .map(|name| (name, name.trim().to_lowercase()))
            .collect();

        if let Some((name, _)) = names.iter().find(|(_, lower)| *lower == needle) {
            return Some((*name).clone());
        }

        if let Some((name, _)) = names
            .iter()
            .find(|(_, lower)| needle.contains(lower.as_str()) || lower.contains(needle.as_str()))
        {
            return Some((*name).clone());
        }

        let mut best: Option<(&String, f64)> = None;
        for (name, _) in names.iter() {
            let score = similarity(candidate, name);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((*name, score));
            }
        }

        match best {
            Some((name, score)) if score > self.threshold => {
                tracing::debug!(candidate, matched = %name, score, "fuzzy department match");
                Some(name.clone())
            }
            Some((name, score)) => {
                tracing::debug!(candidate, closest = %name, score, "no department above threshold");
                None
            }
            None => None,
        }
    }
}

/// Best of the plain token-sort ratio and a filler-insensitive token-set ratio, 0..=100.
pub fn similarity(a: &str, b: &str) -> f64 {
    let sorted = token_sort_ratio(a, b);
    let significant_a = significant_tokens(a);
    let significant_b = significant_tokens(b);
    if significant_a.is_empty() || significant_b.is_empty() {
        return sorted;
    }
    sorted.max(token_set_ratio(&significant_a, &significant_b))
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let mut left = tokens(a);
    let mut right = tokens(b);
    left.sort();
    right.sort();
    ratio(&left.join(" "), &right.join(" "))
}

fn token_set_ratio(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let common: Vec<&str> = a.intersection(b).map(String::as_str).collect();
    let only_a: Vec<&str> = a.difference(b).map(String::as_str).collect();
    let only_b: Vec<&str> = b.difference(a).map(String::as_str).collect();

    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let joined = common.join(" ");
    let combined_a = join_nonempty(&joined, &only_a.join(" "));
    let combined_b = join_nonempty(&joined, &only_b.join(" "));

    [
        ratio(&joined, &combined_a),
        ratio(&joined, &combined_b),
        ratio(&combined_a, &combined_b),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

fn join_nonempty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{head} {tail}"),
    }
}

fn tokens(value: &str) -> Vec<String> {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn significant_tokens(value: &str) -> BTreeSet<String> {
    tokens(value)
        .into_iter()
        .filter(|token| !FILLER_WORDS.contains(&token.as_str()))
        .collect()
}

/// Indel similarity: `100 * 2 * lcs / (len_a + len_b)`.
fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for left in &a {
        for (j, right) in b.iter().enumerate() {
            current[j + 1] = if left == right {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    100.0 * (2 * previous[b.len()]) as f64 / total as f64
}
