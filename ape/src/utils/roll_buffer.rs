//! Rolling history buffers for the adaptive filters.
//!
//! Keeps the newest samples of a filter's input contiguous so the dot
//! product runs over a plain slice.

use std::collections::TryReserveError;

/// Number of pushes between two compactions of a [`RollBuffer`].
pub const WINDOW_ELEMENTS: usize = 512;

/// Append-only history that always exposes its newest `history` elements as
/// one contiguous slice.
///
/// Elements are written into a buffer of `history + WINDOW_ELEMENTS` slots.
/// When the buffer fills up the newest `history` elements are copied back to
/// the front, so the cost of keeping the window contiguous is paid once every
/// `WINDOW_ELEMENTS` pushes.
#[derive(Debug, Clone)]
pub struct RollBuffer<T> {
    data: Vec<T>,
    history: usize,
    pos: usize,
}

impl<T: Copy + Default> RollBuffer<T> {
    /// Creates a buffer whose window initially holds `history` default values.
    pub fn new(history: usize) -> Result<Self, TryReserveError> {
        let len = history + WINDOW_ELEMENTS;
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, T::default());

        Ok(Self {
            data,
            history,
            pos: history,
        })
    }

    #[inline(always)]
    pub fn push(&mut self, value: T) {
        self.data[self.pos] = value;
        self.pos += 1;

        if self.pos == self.data.len() {
            self.data.copy_within(self.pos - self.history.., 0);
            self.pos = self.history;
        }
    }

    /// The newest `history` elements, oldest first.
    #[inline(always)]
    pub fn window(&self) -> &[T] {
        &self.data[self.pos - self.history..self.pos]
    }

    /// Element pushed `lag` pushes ago; `lag = 0` is the newest.
    #[inline(always)]
    pub fn back_mut(&mut self, lag: usize) -> &mut T {
        &mut self.data[self.pos - 1 - lag]
    }

    pub fn history(&self) -> usize {
        self.history
    }
}
