//! Operators for in-place snapshot transformation
//!
//! An operator rewrites the current version of the archive into a new one
//! row by row, without materializing a full intermediate table. Rows are
//! visited in merge-key order; that order is part of the operator contract.

use crate::types::Scalar;

/// Row transformer for [`Archive::apply`](crate::archive::Archive::apply)
pub trait DatasetOperator {
    /// Evaluate the operator on one row of the current version. The input
    /// is the row's position and cell values at the current version;
    /// returning `None` deletes the row from the new version.
    fn eval(&mut self, pos: usize, values: Vec<Scalar>) -> Option<Vec<Scalar>>;
}

impl<F> DatasetOperator for F
where
    F: FnMut(usize, Vec<Scalar>) -> Option<Vec<Scalar>>,
{
    fn eval(&mut self, pos: usize, values: Vec<Scalar>) -> Option<Vec<Scalar>> {
        self(pos, values)
    }
}
