//! Identifier tokenization and fuzzy match helpers.
//!
//! Both backends use these so completion and identifier search behave
//! identically whether a query is answered from slabs or from SQL.

use crate::models::Symbol;

/// Split an identifier into lowercase word tokens.
///
/// Boundaries are non-alphanumeric characters, lower-to-upper case
/// transitions, and the last capital of an acronym run followed by a
/// lowercase letter (`XMLHttp` splits as `xml`, `http`).
pub fn tokenize_identifier(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() {
            let prev = chars[i - 1];
            let upper_after_word = c.is_uppercase() && (prev.is_lowercase() || prev.is_numeric());
            let acronym_end = prev.is_uppercase()
                && c.is_uppercase()
                && chars.get(i + 1).is_some_and(|next| next.is_lowercase());
            if upper_after_word || acronym_end {
                tokens.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Space-joined token form stored in the SQLite `tokens` column.
pub fn token_text(name: &str) -> String {
    tokenize_identifier(name).join(" ")
}

/// Expand a completion prefix into a SQL `LIKE` pattern: every UTF-8
/// character is followed by `%`. The empty prefix collapses to `%`,
/// which matches everything.
pub fn fuzzy_like_pattern(prefix: &str) -> String {
    if prefix.is_empty() {
        return "%".to_string();
    }
    let mut pattern = String::with_capacity(prefix.len() * 2);
    for c in prefix.chars() {
        pattern.push(c);
        pattern.push('%');
    }
    pattern
}

/// In-memory equivalent of `label LIKE fuzzy_like_pattern(prefix)`.
///
/// The label must start with the first prefix character and contain
/// the remaining characters in order. Case folding is ASCII-only to
/// mirror SQLite's `LIKE`.
pub fn fuzzy_label_match(prefix: &str, label: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    let label: Vec<char> = label.chars().collect();
    let mut pos = 0usize;
    for (i, want) in prefix.chars().enumerate() {
        if i == 0 {
            match label.first() {
                Some(&first) if chars_eq(first, want) => pos = 1,
                _ => return false,
            }
            continue;
        }
        match label[pos..].iter().position(|&c| chars_eq(c, want)) {
            Some(offset) => pos += offset + 1,
            None => return false,
        }
    }
    true
}

fn chars_eq(a: char, b: char) -> bool {
    a == b || a.eq_ignore_ascii_case(&b)
}

/// Score a symbol name against pre-tokenized query words.
///
/// Every query token must be a prefix of some name token; `None`
/// means no match. Lower ranks sort first: names with fewer spare
/// tokens and shorter spellings win.
pub fn match_score(query_tokens: &[String], name: &str) -> Option<f32> {
    let name_tokens = tokenize_identifier(name);
    for qt in query_tokens {
        if !name_tokens.iter().any(|nt| nt.starts_with(qt.as_str())) {
            return None;
        }
    }
    let spare = name_tokens.len().saturating_sub(query_tokens.len());
    Some(spare as f32 + name.len() as f32 / 1024.0)
}

/// Order symbols by ascending rank with a deterministic tie-break.
pub fn sort_by_rank(symbols: &mut [Symbol]) {
    symbols.sort_by(|a, b| {
        a.rank
            .partial_cmp(&b.rank)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}
