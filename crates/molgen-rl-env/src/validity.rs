//! Syntax-level validity checks for generated SMILES strings

use std::collections::HashSet;
use std::sync::Arc;

use molgen_rl_core::{ValidityOracle, Vocabulary};

/// Checks the grammar of a SMILES string without any chemistry.
///
/// A string is accepted when, after removing start/end/pad symbols, it is
/// non-empty, its branches `()` and atom brackets `[]` are balanced and not
/// empty, and every ring-closure label (`1`-`9` or `%nn`) is opened and
/// closed. The canonical form is the stripped string.
#[derive(Debug, Clone)]
pub struct SmilesSyntaxOracle {
    vocab: Option<Arc<Vocabulary>>,
}

impl SmilesSyntaxOracle {
    /// Oracle that strips the special symbols of `vocab` before checking
    #[must_use]
    pub fn new(vocab: Arc<Vocabulary>) -> Self {
        Self { vocab: Some(vocab) }
    }

    /// Oracle for strings without special symbols
    #[must_use]
    pub fn bare() -> Self {
        Self { vocab: None }
    }

    fn check(smiles: &str) -> bool {
        let chars: Vec<char> = smiles.chars().collect();
        if chars.is_empty() || matches!(chars[0], '(' | ')' | '%') || chars[0].is_ascii_digit() {
            return false;
        }

        let mut branch_depth = 0_usize;
        let mut open_rings: HashSet<u32> = HashSet::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '(' => {
                    if chars.get(i + 1) == Some(&')') {
                        return false;
                    }
                    branch_depth += 1;
                }
                ')' => {
                    if branch_depth == 0 {
                        return false;
                    }
                    branch_depth -= 1;
                }
                '[' => {
                    // Atom brackets do not nest; digits inside are charges
                    // or isotopes, not ring labels.
                    let Some(len) = chars[i + 1..].iter().position(|&c| c == ']') else {
                        return false;
                    };
                    let inner = &chars[i + 1..i + 1 + len];
                    if inner.is_empty() || inner.iter().any(|&c| matches!(c, '[' | '(' | ')')) {
                        return false;
                    }
                    i += len + 1;
                }
                ']' => return false,
                '%' => {
                    let label = chars
                        .get(i + 1..i + 3)
                        .filter(|d| d.iter().all(char::is_ascii_digit))
                        .and_then(|d| d.iter().collect::<String>().parse::<u32>().ok());
                    let Some(label) = label else {
                        return false;
                    };
                    if !open_rings.remove(&(label + 10)) {
                        open_rings.insert(label + 10);
                    }
                    i += 2;
                }
                c => {
                    if let Some(label) = c.to_digit(10) {
                        if !open_rings.remove(&label) {
                            open_rings.insert(label);
                        }
                    }
                }
            }
            i += 1;
        }

        branch_depth == 0 && open_rings.is_empty()
    }
}

impl ValidityOracle for SmilesSyntaxOracle {
    fn canonicalize(&self, sequence: &str) -> Option<String> {
        let stripped = match &self.vocab {
            Some(vocab) => vocab.strip(sequence),
            None => sequence.to_string(),
        };
        Self::check(&stripped).then_some(stripped)
    }
}
