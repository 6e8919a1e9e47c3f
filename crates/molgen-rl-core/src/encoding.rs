//! Fixed-width numeric encoding of token sequences

use std::sync::Arc;

use ndarray::Array2;

use crate::state::SequenceState;
use crate::vocab::Vocabulary;
use crate::{RLError, Result};

/// A padded batch of encoded sequences.
///
/// Row `i` holds token indices in its first `lengths[i]` cells and the pad
/// index everywhere else.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    /// Token indices, `[batch, width]`
    pub indices: Array2<usize>,
    /// True (unpadded) length of each row
    pub lengths: Vec<usize>,
}

impl EncodedBatch {
    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Whether the batch has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Encoded width (maximum supported sequence length)
    #[must_use]
    pub fn width(&self) -> usize {
        self.indices.ncols()
    }

    /// Valid token indices of row `i`
    #[must_use]
    pub fn row_tokens(&self, i: usize) -> Vec<usize> {
        self.indices
            .row(i)
            .iter()
            .take(self.lengths[i])
            .copied()
            .collect()
    }

    /// A batch holding the given rows, in the given order
    #[must_use]
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            indices: self.indices.select(ndarray::Axis(0), rows),
            lengths: rows.iter().map(|&r| self.lengths[r]).collect(),
        }
    }
}

/// Maps token sequences to [`EncodedBatch`]es of a fixed width
#[derive(Debug, Clone)]
pub struct SequenceEncoder {
    vocab: Arc<Vocabulary>,
    width: usize,
}

impl SequenceEncoder {
    /// Create an encoder for sequences of at most `width` tokens
    #[must_use]
    pub fn new(vocab: Arc<Vocabulary>, width: usize) -> Self {
        Self { vocab, width }
    }

    /// The vocabulary used for token indices
    #[must_use]
    pub fn vocab(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    /// Maximum encodable length
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Encode a batch of states
    pub fn encode_states<'a, I>(&self, states: I) -> Result<EncodedBatch>
    where
        I: IntoIterator<Item = &'a SequenceState>,
    {
        let rows: Vec<&[char]> = states.into_iter().map(SequenceState::tokens).collect();
        self.encode_rows(&rows)
    }

    /// Encode a single state as a one-row batch
    pub fn encode_state(&self, state: &SequenceState) -> Result<EncodedBatch> {
        self.encode_rows(&[state.tokens()])
    }

    /// Encode raw strings
    pub fn encode_strings<S: AsRef<str>>(&self, sequences: &[S]) -> Result<EncodedBatch> {
        let chars: Vec<Vec<char>> = sequences.iter().map(|s| s.as_ref().chars().collect()).collect();
        let rows: Vec<&[char]> = chars.iter().map(Vec::as_slice).collect();
        self.encode_rows(&rows)
    }

    fn encode_rows(&self, rows: &[&[char]]) -> Result<EncodedBatch> {
        let mut indices = Array2::from_elem((rows.len(), self.width), self.vocab.pad_index());
        let mut lengths = Vec::with_capacity(rows.len());

        for (i, row) in rows.iter().enumerate() {
            if row.len() > self.width {
                return Err(RLError::DimensionMismatch {
                    expected: self.width,
                    actual: row.len(),
                });
            }
            for (t, &token) in row.iter().enumerate() {
                indices[[i, t]] = self.vocab.index_of(token).ok_or_else(|| {
                    RLError::InvalidState(format!("token {token:?} not in vocabulary"))
                })?;
            }
            lengths.push(row.len());
        }

        Ok(EncodedBatch { indices, lengths })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> SequenceEncoder {
        let vocab = Vocabulary::new(vec![' ', 'A', 'B', '>'], '>', None, Some(' ')).unwrap();
        SequenceEncoder::new(Arc::new(vocab), 4)
    }

    #[test]
    fn pads_and_records_lengths() {
        let batch = encoder().encode_strings(&["AB>", "B"]).unwrap();
        assert_eq!(batch.lengths, vec![3, 1]);
        assert_eq!(batch.indices.row(0).to_vec(), vec![1, 2, 3, 0]);
        assert_eq!(batch.indices.row(1).to_vec(), vec![2, 0, 0, 0]);
        assert_eq!(batch.row_tokens(1), vec![2]);

        let picked = batch.select(&[1]);
        assert_eq!(picked.lengths, vec![1]);
    }

    #[test]
    fn rejects_unknown_tokens_and_overlong_rows() {
        let enc = encoder();
        assert!(matches!(
            enc.encode_strings(&["AC"]),
            Err(RLError::InvalidState(_))
        ));
        assert!(matches!(
            enc.encode_strings(&["ABABA"]),
            Err(RLError::DimensionMismatch { expected: 4, actual: 5 })
        ));
    }
}
