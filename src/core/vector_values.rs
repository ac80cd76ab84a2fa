//! Assignment of dense vectors to integer-indexed variables.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::DVector;

use crate::core::Index;
use crate::error::{TerraceError, TerraceResult};

/// A mapping from variable index to a dense value vector, the linearization
/// point and solution container of the linear system.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorValues {
    values: BTreeMap<Index, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        VectorValues {
            values: BTreeMap::new(),
        }
    }

    /// Insert or replace the value of a variable.
    pub fn insert(&mut self, key: Index, value: DVector<f64>) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: Index) -> Option<&DVector<f64>> {
        self.values.get(&key)
    }

    pub fn get_mut(&mut self, key: Index) -> Option<&mut DVector<f64>> {
        self.values.get_mut(&key)
    }

    pub fn contains(&self, key: Index) -> bool {
        self.values.contains_key(&key)
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total dimension over all variables.
    pub fn dim(&self) -> usize {
        self.values.values().map(|v| v.len()).sum()
    }

    pub fn keys(&self) -> impl Iterator<Item = Index> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index, &DVector<f64>)> {
        self.values.iter().map(|(&k, v)| (k, v))
    }

    /// A zero-valued clone: same variables, same dimensions, all zeros.
    pub fn zero_like(&self) -> VectorValues {
        VectorValues {
            values: self
                .values
                .iter()
                .map(|(&k, v)| (k, DVector::zeros(v.len())))
                .collect(),
        }
    }

    /// Zero every value in place, keeping the structure.
    pub fn make_zero(&mut self) {
        for v in self.values.values_mut() {
            v.fill(0.0);
        }
    }

    /// Whether `other` has the same variables with the same dimensions.
    pub fn same_structure(&self, other: &VectorValues) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|((k1, v1), (k2, v2))| k1 == k2 && v1.len() == v2.len())
    }

    /// `self += alpha * other`, requiring identical structure.
    pub fn axpy(&mut self, alpha: f64, other: &VectorValues) -> TerraceResult<()> {
        if !self.same_structure(other) {
            return Err(TerraceError::InvalidInput(
                "axpy requires identically structured values".to_string(),
            ));
        }
        for (v, w) in self.values.values_mut().zip(other.values.values()) {
            v.axpy(alpha, w, 1.0);
        }
        Ok(())
    }
}

impl std::ops::Index<Index> for VectorValues {
    type Output = DVector<f64>;

    fn index(&self, key: Index) -> &DVector<f64> {
        &self.values[&key]
    }
}

impl FromIterator<(Index, DVector<f64>)> for VectorValues {
    fn from_iter<T: IntoIterator<Item = (Index, DVector<f64>)>>(iter: T) -> Self {
        VectorValues {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for VectorValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.values {
            writeln!(f, "x[{}] = {}", k, v.transpose())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_insert_and_index() {
        let mut x = VectorValues::new();
        x.insert(3, dvector![1.0, 2.0]);
        assert_eq!(x[3], dvector![1.0, 2.0]);
        assert_eq!(x.dim(), 2);
        assert!(x.get(1).is_none());
    }

    #[test]
    fn test_zero_like_and_axpy() {
        let x: VectorValues = [(0, dvector![1.0]), (5, dvector![2.0, 3.0])]
            .into_iter()
            .collect();
        let mut z = x.zero_like();
        assert!(z.same_structure(&x));
        assert_eq!(z[5], dvector![0.0, 0.0]);
        z.axpy(2.0, &x).unwrap();
        assert_eq!(z[0], dvector![2.0]);
        assert_eq!(z[5], dvector![4.0, 6.0]);
    }

    #[test]
    fn test_axpy_structure_mismatch() {
        let x: VectorValues = [(0, dvector![1.0])].into_iter().collect();
        let mut y = VectorValues::new();
        assert!(y.axpy(1.0, &x).is_err());
    }

    #[test]
    fn test_make_zero() {
        let mut x: VectorValues = [(1, dvector![4.0])].into_iter().collect();
        x.make_zero();
        assert_eq!(x[1], dvector![0.0]);
    }
}
