//! Auto-generated lock names.
//!
//! Mutexes constructed without a name draw one from a per-context seed that
//! advances through successor strings (`"__@"` → `"__@a"` → `"__@b"` … →
//! `"__@z"` → `"__@aa"`), suffixed `.lock`. The sequence is deterministic so
//! generated names collide neither with each other nor, in practice, with
//! user-chosen names.

use std::sync::Mutex;
use std::sync::PoisonError;

const NAME_SEED: &str = "__@";
const NAME_SUFFIX: &str = ".lock";

/// Successor of a seed string.
///
/// The rightmost alphanumeric character is incremented within its class
/// (digit, lowercase, uppercase), carrying leftward; a carry off the left end
/// grows the string. A seed with no alphanumerics is extended with `'a'`.
fn successor(seed: &str) -> String {
    let mut chars: Vec<char> = seed.chars().collect();
    let alnum: Vec<usize> = chars
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_ascii_alphanumeric())
        .map(|(i, _)| i)
        .collect();

    if alnum.is_empty() {
        chars.push('a');
        return chars.into_iter().collect();
    }

    for &i in alnum.iter().rev() {
        let (next, carry) = bump(chars[i]);
        chars[i] = next;
        if !carry {
            return chars.into_iter().collect();
        }
    }

    // Carried off the left end: grow by one character of the leading class.
    let first = alnum[0];
    let lead = match chars[first] {
        '0'..='9' => '1',
        c if c.is_ascii_lowercase() => 'a',
        _ => 'A',
    };
    chars.insert(first, lead);
    chars.into_iter().collect()
}

fn bump(c: char) -> (char, bool) {
    match c {
        '9' => ('0', true),
        'z' => ('a', true),
        'Z' => ('A', true),
        _ => ((c as u8 + 1) as char, false),
    }
}

/// Per-context generator for anonymous lock names.
pub(crate) struct NameGenerator {
    seed: Mutex<String>,
}

impl NameGenerator {
    pub(crate) fn new() -> Self {
        Self {
            seed: Mutex::new(NAME_SEED.to_string()),
        }
    }

    /// Advance the seed and return the next generated name.
    pub(crate) fn next(&self) -> String {
        let mut seed = self.seed.lock().unwrap_or_else(PoisonError::into_inner);
        *seed = successor(&seed);
        format!("{seed}{NAME_SUFFIX}")
    }

    /// Reset to the initial seed (tests).
    pub(crate) fn reset(&self) {
        *self.seed.lock().unwrap_or_else(PoisonError::into_inner) = NAME_SEED.to_string();
    }
}
