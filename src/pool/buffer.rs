//! Ordered result slots, filled out of order and drained in order.

#[derive(Debug)]
enum Slot<T> {
    Pending,
    Filled(T),
    Taken,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("result index {index} outside batch of {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("result {index} delivered twice")]
    AlreadyFilled { index: usize },
}

/// One slot per task. Each slot goes pending → filled → taken exactly once.
#[derive(Debug)]
pub struct ResultBuffer<T> {
    slots: Vec<Slot<T>>,
    cursor: usize,
}

impl<T> ResultBuffer<T> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| Slot::Pending).collect(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Position of the next result to be taken.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn fill(&mut self, index: usize, value: T) -> Result<(), BufferError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(BufferError::OutOfRange { index, len })?;
        match slot {
            Slot::Pending => {
                *slot = Slot::Filled(value);
                Ok(())
            }
            Slot::Filled(_) | Slot::Taken => Err(BufferError::AlreadyFilled { index }),
        }
    }

    /// Take the result at the cursor if it has arrived.
    pub fn take_next(&mut self) -> Option<T> {
        let slot = self.slots.get_mut(self.cursor)?;
        if !matches!(slot, Slot::Filled(_)) {
            return None;
        }
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Filled(value) => {
                self.cursor += 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// True once every result has been taken.
    pub fn is_finished(&self) -> bool {
        self.cursor == self.slots.len()
    }

    /// Results not yet taken.
    pub fn remaining(&self) -> usize {
        self.slots.len() - self.cursor
    }
}
