use std::any::Any;
use super::Backend;
use candle_core::{DType, Device, Tensor};
use crate::tensor::{ArrayData, DenseArray, EngineBuffer, EngineTensor, TensorError, TensorHandle};

const ENGINE: &str = "candle";

fn engine_err(err: candle_core::Error) -> TensorError {
    TensorError::Engine {
        engine: ENGINE,
        message: err.to_string(),
    }
}

impl Backend for Tensor {
    fn shape(&self) -> Vec<usize> {
        self.dims().to_vec()
    }

    fn cat(tensors: &[Self], dim: usize) -> Result<Self, TensorError> {
        Tensor::cat(tensors, dim).map_err(engine_err)
    }

    fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self, TensorError> {
        self.narrow(dim, start, len).map_err(engine_err)
    }

    fn zeros_like(&self) -> Result<Self, TensorError> {
        self.zeros_like().map_err(engine_err)
    }
}

impl EngineTensor for Tensor {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    fn shape(&self) -> Vec<usize> {
        self.dims().to_vec()
    }

    fn to_dense(&self) -> Result<DenseArray, TensorError> {
        let shape = self.dims().to_vec();
        let flat = self.flatten_all().map_err(engine_err)?;
        let data = match self.dtype() {
            DType::U8 | DType::U32 | DType::I64 => ArrayData::I64(
                flat.to_dtype(DType::I64)
                    .and_then(|t| t.to_vec1::<i64>())
                    .map_err(engine_err)?
            ),
            _ => ArrayData::F32(
                flat.to_dtype(DType::F32)
                    .and_then(|t| t.to_vec1::<f32>())
                    .map_err(engine_err)?
            ),
        };
        DenseArray::new(shape, data)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Wraps a candle tensor as an engine buffer handle without copying it.
pub fn handle_from_candle(name: impl Into<String>, tensor: Tensor) -> TensorHandle {
    TensorHandle::engine(name, EngineBuffer::new(tensor))
}

/// Copies a dense array onto `device`.
pub fn dense_to_candle(array: &DenseArray, device: &Device) -> Result<Tensor, TensorError> {
    let shape = array.shape().to_vec();
    let tensor = match array.data() {
        ArrayData::F32(values) => Tensor::from_vec(values.clone(), shape, device),
        ArrayData::I64(values) => Tensor::from_vec(values.clone(), shape, device),
    };
    tensor.map_err(engine_err)
}
