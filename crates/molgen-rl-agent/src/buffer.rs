//! Trajectory replay buffer for reward learning

use rand::Rng;

use molgen_rl_core::{RLError, Result, Trajectory};

/// Fixed-capacity circular store of completed trajectories.
///
/// Once full, each insertion overwrites the oldest entry.
#[derive(Debug, Clone)]
pub struct TrajectoriesBuffer {
    /// Buffer storage
    buffer: Vec<Trajectory>,
    /// Maximum capacity
    capacity: usize,
    /// Slot the next insertion goes to once full
    position: usize,
}

impl TrajectoriesBuffer {
    /// Create a new buffer
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RLError::Config("buffer capacity must be positive".into()));
        }
        Ok(Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            position: 0,
        })
    }

    fn push(&mut self, trajectory: Trajectory) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(trajectory);
        } else {
            self.buffer[self.position] = trajectory;
        }
        self.position = (self.position + 1) % self.capacity;
    }

    /// Append each trajectory, overwriting the oldest once full
    pub fn populate<I>(&mut self, trajectories: I)
    where
        I: IntoIterator<Item = Trajectory>,
    {
        for trajectory in trajectories {
            self.push(trajectory);
        }
    }

    /// Everything when at most `batch_size` entries are stored, otherwise
    /// `batch_size` entries drawn uniformly with replacement.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<Trajectory> {
        if self.buffer.len() <= batch_size {
            return self.buffer.clone();
        }
        (0..batch_size)
            .map(|_| self.buffer[rng.gen_range(0..self.buffer.len())].clone())
            .collect()
    }

    /// Stored trajectories, in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Trajectory> {
        self.buffer.iter()
    }

    /// Get the current size of the buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of stored trajectories
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
