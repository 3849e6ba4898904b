//! Scrolling waterfall history

/// Fixed-size grid of intensity rows, oldest at index 0, newest last
///
/// New rows shift the whole history up by one instead of rotating a write
/// index, so row `rows() - 1` is always the latest frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumBuffer {
    rows: usize,
    bins: usize,
    data: Vec<u8>,
}

impl SpectrumBuffer {
    pub fn new(rows: usize, bins: usize) -> Self {
        Self {
            rows,
            bins,
            data: vec![0; rows * bins],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Scroll up one row and write `row` at the bottom
    pub fn push_row(&mut self, row: &[u8]) {
        debug_assert_eq!(row.len(), self.bins);
        if self.rows == 0 {
            return;
        }
        self.data.copy_within(self.bins.., 0);
        let last = (self.rows - 1) * self.bins;
        self.data[last..].copy_from_slice(&row[..self.bins]);
    }

    pub fn row(&self, index: usize) -> Option<&[u8]> {
        (index < self.rows).then(|| &self.data[index * self.bins..(index + 1) * self.bins])
    }

    /// Most recent row; empty when the buffer has no rows
    pub fn newest(&self) -> &[u8] {
        self.row(self.rows().saturating_sub(1)).unwrap_or_default()
    }
}
