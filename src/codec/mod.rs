mod record;
mod tensor;

pub use record::{DType, TensorRecord};
pub use tensor::Tensor;
