use std::ops::Mul;

use ndarray::{ArrayD, IxDyn, arr0};

use super::{DType, TensorRecord};
use crate::{DbErr, Result};

/// An immutable N-dimensional array of model parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: ArrayD<f32>,
    dtype: DType,
}

impl Tensor {
    /// Creates a new `float32` tensor.
    ///
    /// # Arguments
    /// * `data` - The tensor's values.
    ///
    /// # Returns
    /// A new `Tensor` instance.
    pub fn new(data: ArrayD<f32>) -> Self {
        Self {
            data,
            dtype: DType::Float32,
        }
    }

    /// Creates a new rank zero `float32` tensor.
    pub fn scalar(value: f32) -> Self {
        Self::new(arr0(value).into_dyn())
    }

    /// Creates a new `float32` tensor from a shape and its row-major values.
    ///
    /// # Arguments
    /// * `shape` - The dimensions of the tensor.
    /// * `values` - The flattened values.
    ///
    /// # Returns
    /// The tensor or `DbErr::MalformedRecord` if `values` doesn't fit `shape`.
    pub fn from_shape_vec(shape: &[usize], values: Vec<f32>) -> Result<Self> {
        Self::decode(TensorRecord {
            values,
            shape: shape.to_vec(),
            dtype: DType::Float32,
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn as_array(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Builds a tensor out of its transportable record.
    ///
    /// Fails closed: nothing is padded, truncated or rounded.
    ///
    /// # Arguments
    /// * `record` - The record to decode.
    ///
    /// # Returns
    /// The tensor or `DbErr::MalformedRecord` if a dimension is zero, the
    /// amount of values doesn't match the shape or a value isn't valid
    /// for the record's element type.
    pub fn decode(record: TensorRecord) -> Result<Self> {
        let TensorRecord {
            values,
            shape,
            dtype,
        } = record;

        if let Some(i) = shape.iter().position(|&dim| dim == 0) {
            return Err(DbErr::MalformedRecord(format!(
                "dimension {i} of shape {shape:?} is not positive"
            )));
        }

        let size = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| DbErr::MalformedRecord(format!("shape {shape:?} overflows")))?;

        if values.len() != size {
            return Err(DbErr::MalformedRecord(format!(
                "shape {shape:?} holds {size} values, got {}",
                values.len()
            )));
        }

        if let Some(value) = values.iter().find(|&&v| !dtype.admits(v)) {
            return Err(DbErr::MalformedRecord(format!(
                "value {value} is not a valid {dtype:?}"
            )));
        }

        let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| DbErr::MalformedRecord(e.to_string()))?;

        Ok(Self { data, dtype })
    }

    /// Flattens this tensor into a transportable record in row-major order.
    pub fn encode(&self) -> TensorRecord {
        TensorRecord {
            values: self.data.iter().copied().collect(),
            shape: self.shape().to_vec(),
            dtype: self.dtype,
        }
    }

    /// Returns a new `float32` tensor with every element multiplied by `factor`.
    pub fn scale(&self, factor: f32) -> Self {
        Self::new(&self.data * factor)
    }

    /// Elementwise addition, the result is always `float32`.
    ///
    /// # Arguments
    /// * `other` - A tensor with exactly the same shape.
    ///
    /// # Returns
    /// The sum or `DbErr::ShapeMismatch` (with index 0) if the shapes differ.
    pub fn add(&self, other: &Tensor) -> Result<Self> {
        if self.shape() != other.shape() {
            return Err(DbErr::ShapeMismatch {
                index: 0,
                got: other.shape().to_vec(),
                expected: self.shape().to_vec(),
            });
        }

        Ok(Self::new(&self.data + &other.data))
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(value: ArrayD<f32>) -> Self {
        Self::new(value)
    }
}

impl Mul<f32> for &Tensor {
    type Output = Tensor;

    fn mul(self, rhs: f32) -> Tensor {
        self.scale(rhs)
    }
}
