use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

/// Anything that can apply `y = A x`.
pub trait LinearOperator: Sync {
    fn dimension(&self) -> usize;
    fn apply(&self, x: &[f64], y: &mut [f64]);
}

impl LinearOperator for CsrMatrix<f64> {
    fn dimension(&self) -> usize {
        self.nrows()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        let offsets = self.row_offsets();
        let cols = self.col_indices();
        let values = self.values();
        y.par_iter_mut().enumerate().for_each(|(row, yi)| {
            let range = offsets[row]..offsets[row + 1];
            *yi = cols[range.clone()]
                .iter()
                .zip(&values[range])
                .map(|(&c, &v)| v * x[c])
                .sum();
        });
    }
}

pub fn diagonal(matrix: &CsrMatrix<f64>) -> Vec<f64> {
    let mut diag = vec![0.0; matrix.nrows()];
    for (row, col, &v) in matrix.triplet_iter() {
        if row == col {
            diag[row] += v;
        }
    }
    diag
}

/// Accumulates element contributions; duplicate entries are summed on conversion.
pub struct TripletBuilder {
    coo: CooMatrix<f64>,
}

impl TripletBuilder {
    pub fn new(rows: usize, cols: usize) -> Self {
        TripletBuilder {
            coo: CooMatrix::new(rows, cols),
        }
    }

    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        if value != 0.0 {
            self.coo.push(row, col, value);
        }
    }

    /// Adds a diagonal entry even when it is zero, so the row is never empty.
    pub fn add_diagonal(&mut self, row: usize, value: f64) {
        self.coo.push(row, row, value);
    }

    pub fn build(self) -> CsrMatrix<f64> {
        CsrMatrix::from(&self.coo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sums_duplicates_and_applies() {
        let mut b = TripletBuilder::new(2, 2);
        b.add(0, 0, 1.0);
        b.add(0, 0, 1.0);
        b.add(0, 1, -1.0);
        b.add(1, 0, -1.0);
        b.add_diagonal(1, 3.0);
        let a = b.build();
        assert_eq!(diagonal(&a), vec![2.0, 3.0]);
        let mut y = [0.0; 2];
        a.apply(&[1.0, 2.0], &mut y);
        assert_eq!(y, [0.0, 5.0]);
    }
}
