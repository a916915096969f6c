use serde::{Deserialize, Serialize};

/// 2^31, the first `f32` above `i32::MAX` (which isn't representable).
const INT32_LIMIT: f32 = 2_147_483_648.;

/// The element type tag of a tensor.
///
/// Every element type is held as `f32` in memory, the tag only constrains
/// which values are valid and is carried along when encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// The element type assumed when a record carries no `dtype` field.
    #[default]
    Float32,
    Int32,
    Bool,
}

impl DType {
    /// Checks whether `value` is representable with this element type.
    ///
    /// # Arguments
    /// * `value` - The value to check.
    ///
    /// # Returns
    /// `true` if `value` is finite and valid for this element type.
    pub fn admits(self, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }

        match self {
            DType::Float32 => true,
            DType::Int32 => {
                value.fract() == 0. && value >= i32::MIN as f32 && value < INT32_LIMIT
            }
            DType::Bool => value == 0. || value == 1.,
        }
    }
}

/// The transportable representation of a tensor.
///
/// `values` holds the elements flattened in row-major order, so its length
/// must equal the product of `shape`. An empty `shape` denotes a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub values: Vec<f32>,
    pub shape: Vec<usize>,
    #[serde(default)]
    pub dtype: DType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dtype_defaults_to_float32() {
        let json = r#"{"values": [1, 2, 3], "shape": [3]}"#;
        let record: TensorRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.dtype, DType::Float32);
        assert_eq!(record.values, vec![1., 2., 3.]);
    }

    #[test]
    fn dtype_uses_lowercase_tags() {
        let json = r#"{"values": [1, 0], "shape": [2], "dtype": "bool"}"#;
        let record: TensorRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.dtype, DType::Bool);

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["dtype"], "bool");
    }

    #[test]
    fn unknown_dtype_is_rejected() {
        let json = r#"{"values": [1], "shape": [1], "dtype": "complex64"}"#;
        assert!(serde_json::from_str::<TensorRecord>(json).is_err());
    }

    #[test]
    fn admits_checks_element_type() {
        assert!(DType::Float32.admits(0.5));
        assert!(!DType::Float32.admits(f32::NAN));
        assert!(DType::Int32.admits(-3.));
        assert!(!DType::Int32.admits(1.5));
        assert!(DType::Int32.admits(i32::MIN as f32));
        assert!(DType::Int32.admits(2_147_483_520.));
        assert!(!DType::Int32.admits(2_147_483_648.));
        assert!(DType::Bool.admits(1.));
        assert!(!DType::Bool.admits(2.));
    }
}
