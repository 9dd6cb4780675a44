use std::fmt::{self, Display};
use crate::constant::{BATCH_DIM, ELEMENT_BYTES};

pub mod constant;

/// Dimensions of an engine buffer. The first dimension is the batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorShape(Vec<usize>);

impl TensorShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Size of the batch dimension; a scalar shape counts as one item
    pub fn batch(&self) -> usize {
        self.0.get(BATCH_DIM).copied().unwrap_or(1)
    }

    /// Total number of elements
    pub fn count(&self) -> usize {
        self.0.iter().product()
    }

    /// Total number of bytes at [`ELEMENT_BYTES`] per element
    pub fn byte_len(&self) -> usize {
        self.count() * ELEMENT_BYTES
    }

    /// The same shape with its batch dimension replaced
    pub fn with_batch(&self, batch: usize) -> Self {
        let mut dims = self.0.clone();
        match dims.first_mut() {
            Some(first) => *first = batch,
            None => dims.push(batch),
        }
        Self(dims)
    }
}

impl<const N: usize> From<[usize; N]> for TensorShape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

impl From<Vec<usize>> for TensorShape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A host-resident `f32` tensor, as exchanged with a [`NetModel`](crate::net::NetModel).
#[derive(Clone, Debug, PartialEq)]
pub struct HostTensor {
    pub shape: TensorShape,
    pub data: Vec<f32>,
}

impl HostTensor {
    /// Pair `data` with its shape. The element count is not checked here.
    pub fn new(shape: impl Into<TensorShape>, data: Vec<f32>) -> Self {
        Self {
            shape: shape.into(),
            data,
        }
    }
}

/// Little-endian bytes of a float slice, as rows and buffers store them.
pub fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Floats from little-endian bytes. Trailing bytes short of a float are dropped.
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(ELEMENT_BYTES)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_counts() {
        let shape = TensorShape::from([4, 3, 224, 224]);
        assert_eq!(shape.batch(), 4);
        assert_eq!(shape.count(), 4 * 3 * 224 * 224);
        assert_eq!(shape.byte_len(), shape.count() * 4);
        assert_eq!(shape.to_string(), "[4, 3, 224, 224]");
    }

    #[test]
    fn test_with_batch_keeps_other_dims() {
        let shape = TensorShape::from([4, 1000]).with_batch(2);
        assert_eq!(shape.dims(), &[2, 1000]);
        assert_eq!(TensorShape::new(vec![]).with_batch(3).dims(), &[3]);
    }

    #[test]
    fn test_float_bytes() {
        let values = [1.5f32, -2.0, 0.0];
        let bytes = f32_to_bytes(&values);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_f32(&bytes), values.to_vec());
    }
}
