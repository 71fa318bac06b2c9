use std::collections::VecDeque;
use std::rc::Rc;

use rand::Rng;

use crate::prelude::{ActionIndex, QlError};

/// One recorded experience step
#[derive(Debug)]
pub struct Transition<S> {
    pub state: Rc<S>,
    pub action: ActionIndex,
    pub reward: f32,
    pub next_state: Rc<S>,
    pub done: bool,
}

// manual impl: a derived Clone would require `S: Clone`
impl<S> Clone for Transition<S> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            action: self.action,
            reward: self.reward,
            next_state: Rc::clone(&self.next_state),
            done: self.done,
        }
    }
}

/// Bounded FIFO store - the oldest element is dropped when a new one arrives at full capacity.
#[derive(Debug, Clone)]
pub struct ReplayBuffer<T> {
    max_buffer_len: usize,
    buffer: VecDeque<T>,
}

impl<T> ReplayBuffer<T> {
    pub fn new(max_buffer_len: usize) -> Self {
        assert!(max_buffer_len > 0);
        Self {
            max_buffer_len,
            buffer: VecDeque::with_capacity(max_buffer_len),
        }
    }

    pub fn len(&self) -> usize { self.buffer.len() }

    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    pub fn capacity(&self) -> usize { self.max_buffer_len }

    pub fn add(
        &mut self,
        element: T,
    ) {
        if self.buffer.len() == self.max_buffer_len {
            self.buffer.pop_front();
        }
        self.buffer.push_back(element);
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> { self.buffer.iter() }

    /// Draws `amount` distinct elements, uniformly without replacement
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        amount: usize,
    ) -> Result<Vec<&T>, QlError> {
        let indices = generate_distinct_random_ids(rng, self.buffer.len(), amount)?;
        Ok(indices.into_iter().map(|i| &self.buffer[i]).collect())
    }
}

impl ReplayBuffer<f32> {
    pub fn mean(&self) -> Option<f32> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.iter().sum::<f32>() / self.buffer.len() as f32)
        }
    }

    pub fn min(&self) -> Option<f32> { self.buffer.iter().copied().reduce(f32::min) }
}

fn generate_distinct_random_ids<R: Rng + ?Sized>(
    rng: &mut R,
    len: usize,
    amount: usize,
) -> Result<Vec<usize>, QlError> {
    if len < amount {
        return Err(QlError::InsufficientData { requested: amount, available: len });
    }
    Ok(rand::seq::index::sample(rng, len, amount).into_vec())
}
