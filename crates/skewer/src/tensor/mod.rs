//! # Tensor handles
//!
//! A [`TensorHandle`] is one named tensor artifact passed between pipeline
//! stages, whatever runtime produced it. Its payload is a single sum type:
//!
//! - [`TensorPayload::Scalar`] - one `f32`
//! - [`TensorPayload::Dense`] - an n-dimensional `f32` / `i64` array with a shape
//! - [`TensorPayload::Engine`] - an opaque, engine-owned buffer
//!
//! Conversions between the variants are explicit ([`TensorPayload::to_dense`],
//! [`TensorPayload::as_scalar`]) and every consumer matches on the variant.
//!
//! Handles move by value: the stage that created a handle owns it until it is
//! handed to the next stage.

pub mod constant;
pub(crate) mod operations;

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use crate::backend::Backend;
use constant::BATCH_DIM;

/// Shape and layout failures of tensor operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("shape {shape:?} holds {expected} elements but data has {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("cannot combine tensors: {0}")]
    Incompatible(String),

    #[error("dimension {dim} out of range for rank {rank}")]
    DimOutOfRange { dim: usize, rank: usize },

    #[error("batch is empty")]
    EmptyBatch,

    #[error("expected {expected} tensor, found {found}")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{engine} engine error: {message}")]
    Engine {
        engine: &'static str,
        message: String,
    },
}

/// The element storage of a [`DenseArray`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    F32(Vec<f32>),
    I64(Vec<i64>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::F32(values) => values.len(),
            ArrayData::I64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            ArrayData::F32(_) => "f32",
            ArrayData::I64(_) => "i64",
        }
    }
}

/// A dense, row-major array whose shape always matches its element count.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl DenseArray {
    /// Builds an array, checking that `shape` describes exactly `data.len()` elements.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Result<Self, TensorError> {
        let expected = element_count(&shape);
        if expected != data.len() {
            return Err(TensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn from_f32(shape: Vec<usize>, values: Vec<f32>) -> Result<Self, TensorError> {
        Self::new(shape, ArrayData::F32(values))
    }

    pub fn from_i64(shape: Vec<usize>, values: Vec<i64>) -> Result<Self, TensorError> {
        Self::new(shape, ArrayData::I64(values))
    }

    /// A zero-filled `f32` array.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = element_count(&shape);
        Self {
            shape,
            data: ArrayData::F32(vec![0.0; len]),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            ArrayData::F32(values) => Some(values),
            ArrayData::I64(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            ArrayData::I64(values) => Some(values),
            ArrayData::F32(_) => None,
        }
    }

    /// Element values widened to `f32`, whatever the storage type.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            ArrayData::F32(values) => values.clone(),
            ArrayData::I64(values) => values.iter().map(|v| *v as f32).collect(),
        }
    }

    /// Same data, new shape. The element count must not change.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, TensorError> {
        Self::new(shape, self.data)
    }
}

pub(crate) fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// A tensor owned by an inference engine, kept opaque by the pipeline.
///
/// Implementations expose enough to describe the tensor and to copy it into
/// a [`DenseArray`] when a converter needs the values.
pub trait EngineTensor: Debug + Send + Sync + 'static {
    /// Short name of the owning engine, used as the variant tag.
    fn engine(&self) -> &'static str;

    fn shape(&self) -> Vec<usize>;

    /// Copies the values out of the engine.
    fn to_dense(&self) -> Result<DenseArray, TensorError>;

    fn as_any(&self) -> &dyn Any;
}

/// Shared reference to an engine-owned tensor.
#[derive(Debug, Clone)]
pub struct EngineBuffer(Arc<dyn EngineTensor>);

impl EngineBuffer {
    pub fn new<T: EngineTensor>(tensor: T) -> Self {
        Self(Arc::new(tensor))
    }

    pub fn engine(&self) -> &'static str {
        self.0.engine()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.shape()
    }

    pub fn to_dense(&self) -> Result<DenseArray, TensorError> {
        self.0.to_dense()
    }

    /// Typed access to the engine tensor. Returns `None` when the buffer holds
    /// a different type.
    pub fn downcast_ref<T: EngineTensor>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

/// Buffers are equal only when they share the same engine tensor.
impl PartialEq for EngineBuffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// The payload of a [`TensorHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorPayload {
    Scalar(f32),
    Dense(DenseArray),
    Engine(EngineBuffer),
}

impl TensorPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            TensorPayload::Scalar(_) => "scalar",
            TensorPayload::Dense(_) => "dense",
            TensorPayload::Engine(_) => "engine",
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            TensorPayload::Scalar(_) => vec![],
            TensorPayload::Dense(array) => array.shape().to_vec(),
            TensorPayload::Engine(buffer) => buffer.shape(),
        }
    }

    /// Dense view of the payload. A scalar becomes a rank-0 array.
    pub fn to_dense(&self) -> Result<DenseArray, TensorError> {
        match self {
            TensorPayload::Scalar(value) => DenseArray::from_f32(vec![], vec![*value]),
            TensorPayload::Dense(array) => Ok(array.clone()),
            TensorPayload::Engine(buffer) => buffer.to_dense(),
        }
    }

    /// Consuming variant of [`TensorPayload::to_dense`], avoids the copy for dense payloads.
    pub fn into_dense(self) -> Result<DenseArray, TensorError> {
        match self {
            TensorPayload::Dense(array) => Ok(array),
            other => other.to_dense(),
        }
    }

    /// The single value of a scalar or of a one-element array.
    pub fn as_scalar(&self) -> Result<f32, TensorError> {
        let array = match self {
            TensorPayload::Scalar(value) => return Ok(*value),
            TensorPayload::Dense(array) => array.clone(),
            TensorPayload::Engine(buffer) => buffer.to_dense()?,
        };
        match array.to_f32_vec().as_slice() {
            [value] => Ok(*value),
            _ => Err(TensorError::WrongKind {
                expected: "single element",
                found: "multi element",
            }),
        }
    }
}

/// A named tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorHandle {
    name: String,
    payload: TensorPayload,
}

impl TensorHandle {
    pub fn new(name: impl Into<String>, payload: TensorPayload) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn scalar(name: impl Into<String>, value: f32) -> Self {
        Self::new(name, TensorPayload::Scalar(value))
    }

    pub fn dense(name: impl Into<String>, array: DenseArray) -> Self {
        Self::new(name, TensorPayload::Dense(array))
    }

    pub fn engine(name: impl Into<String>, buffer: EngineBuffer) -> Self {
        Self::new(name, TensorPayload::Engine(buffer))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &TensorPayload {
        &self.payload
    }

    pub fn into_payload(self) -> TensorPayload {
        self.payload
    }

    pub fn into_parts(self) -> (String, TensorPayload) {
        (self.name, self.payload)
    }
}

/// # NamedTensorList
///
/// Ordered `(name, tensor)` pairs. Order is insertion order and is part of the
/// contract: an inferer may consume its inputs positionally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedTensorList {
    tensors: Vec<TensorHandle>,
}

impl NamedTensorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tensor: TensorHandle) {
        self.tensors.push(tensor);
    }

    /// Builder form of [`NamedTensorList::push`].
    pub fn with(mut self, tensor: TensorHandle) -> Self {
        self.push(tensor);
        self
    }

    /// First tensor called `name`.
    pub fn get(&self, name: &str) -> Option<&TensorHandle> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Removes and returns the first tensor called `name`.
    pub fn take(&mut self, name: &str) -> Option<TensorHandle> {
        let idx = self.tensors.iter().position(|t| t.name == name)?;
        Some(self.tensors.remove(idx))
    }

    pub fn first(&self) -> Option<&TensorHandle> {
        self.tensors.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TensorHandle> {
        self.tensors.iter()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tensors.iter().map(|t| t.name.as_str()).collect()
    }

    /// Concatenates per-item lists into one batched list.
    ///
    /// Items are matched positionally and must carry the same names in the same
    /// order. Every tensor is concatenated along the batch dimension, so items
    /// that each carry a leading dimension of `1` produce a leading dimension of
    /// `items.len()`. Engine buffers are copied to dense arrays first and scalars
    /// become arrays of shape `[1]`.
    pub fn stack(items: Vec<NamedTensorList>) -> Result<NamedTensorList, TensorError> {
        let Some(first) = items.first() else {
            return Err(TensorError::EmptyBatch);
        };
        let names: Vec<String> = first.names().into_iter().map(String::from).collect();

        let mut columns: Vec<Vec<DenseArray>> = vec![Vec::with_capacity(items.len()); names.len()];
        for (item_idx, item) in items.into_iter().enumerate() {
            if item.len() != names.len() {
                return Err(TensorError::Incompatible(format!(
                    "item {} has {} tensors, expected {}", item_idx, item.len(), names.len()
                )));
            }
            for (col, (tensor, expected)) in item.tensors.into_iter().zip(names.iter()).enumerate() {
                if &tensor.name != expected {
                    return Err(TensorError::Incompatible(format!(
                        "item {} tensor {} is named `{}`, expected `{}`", item_idx, col, tensor.name, expected
                    )));
                }
                let dense = tensor.payload.into_dense()?;
                // scalars gain a batch dimension of one
                let dense = if dense.rank() == 0 { dense.reshape(vec![1])? } else { dense };
                columns[col].push(dense);
            }
        }

        let mut stacked = NamedTensorList::new();
        for (name, column) in names.into_iter().zip(columns) {
            let batched = operations::concat_batch(&column)?;
            stacked.push(TensorHandle::dense(name, batched));
        }
        Ok(stacked)
    }

    /// Splits a batched list into `count` per-item lists, each tensor keeping a
    /// leading dimension of `1`. Every tensor's leading dimension must equal `count`.
    pub fn split(self, count: usize) -> Result<Vec<NamedTensorList>, TensorError> {
        let mut items = vec![NamedTensorList::new(); count];
        for tensor in self.tensors {
            let (name, payload) = tensor.into_parts();
            let dense = payload.into_dense()?;
            let leading = dense.shape().get(BATCH_DIM).copied();
            if leading != Some(count) {
                return Err(TensorError::Incompatible(format!(
                    "tensor `{}` has leading dimension {:?}, expected {}", name, leading, count
                )));
            }
            let rows = operations::slice_tensor_by_batch_dimension(&dense)?;
            for (item, row) in items.iter_mut().zip(rows) {
                item.push(TensorHandle::dense(name.clone(), row));
            }
        }
        Ok(items)
    }
}

impl IntoIterator for NamedTensorList {
    type Item = TensorHandle;
    type IntoIter = std::vec::IntoIter<TensorHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

impl FromIterator<TensorHandle> for NamedTensorList {
    fn from_iter<I: IntoIterator<Item = TensorHandle>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl Backend for DenseArray {
    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn cat(tensors: &[Self], dim: usize) -> Result<Self, TensorError> {
        let first = tensors.first().ok_or(TensorError::EmptyBatch)?;
        let rank = first.rank();
        if dim >= rank {
            return Err(TensorError::DimOutOfRange { dim, rank });
        }
        for other in tensors.iter().skip(1) {
            let compatible = other.rank() == rank
                && other.data.dtype() == first.data.dtype()
                && other.shape.iter().zip(first.shape.iter())
                    .enumerate()
                    .all(|(d, (a, b))| d == dim || a == b);
            if !compatible {
                return Err(TensorError::Incompatible(format!(
                    "{} {:?} and {} {:?} along dimension {}",
                    first.data.dtype(), first.shape, other.data.dtype(), other.shape, dim
                )));
            }
        }

        let outer: usize = first.shape[..dim].iter().product();
        let mut shape = first.shape.clone();
        shape[dim] = tensors.iter().map(|t| t.shape[dim]).sum();

        // each outer index contributes one contiguous chunk per tensor
        let chunks = |t: &DenseArray| element_count(&t.shape[dim..]);
        let data = match &first.data {
            ArrayData::F32(_) => {
                let mut out = Vec::with_capacity(element_count(&shape));
                for o in 0..outer {
                    for t in tensors {
                        let chunk = chunks(t);
                        if let ArrayData::F32(values) = &t.data {
                            out.extend_from_slice(&values[o * chunk..(o + 1) * chunk]);
                        }
                    }
                }
                ArrayData::F32(out)
            }
            ArrayData::I64(_) => {
                let mut out = Vec::with_capacity(element_count(&shape));
                for o in 0..outer {
                    for t in tensors {
                        let chunk = chunks(t);
                        if let ArrayData::I64(values) = &t.data {
                            out.extend_from_slice(&values[o * chunk..(o + 1) * chunk]);
                        }
                    }
                }
                ArrayData::I64(out)
            }
        };
        DenseArray::new(shape, data)
    }

    fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self, TensorError> {
        let rank = self.rank();
        if dim >= rank {
            return Err(TensorError::DimOutOfRange { dim, rank });
        }
        if start + len > self.shape[dim] {
            return Err(TensorError::Incompatible(format!(
                "slice {}..{} out of bounds for dimension {} of size {}",
                start, start + len, dim, self.shape[dim]
            )));
        }
        let outer: usize = self.shape[..dim].iter().product();
        let inner = element_count(&self.shape[dim + 1..]);
        let stride = self.shape[dim] * inner;
        let mut shape = self.shape.clone();
        shape[dim] = len;

        let data = match &self.data {
            ArrayData::F32(values) => ArrayData::F32(
                (0..outer)
                    .flat_map(|o| values[o * stride + start * inner..o * stride + (start + len) * inner].iter().copied())
                    .collect()
            ),
            ArrayData::I64(values) => ArrayData::I64(
                (0..outer)
                    .flat_map(|o| values[o * stride + start * inner..o * stride + (start + len) * inner].iter().copied())
                    .collect()
            ),
        };
        DenseArray::new(shape, data)
    }

    fn zeros_like(&self) -> Result<Self, TensorError> {
        let len = self.len();
        let data = match &self.data {
            ArrayData::F32(_) => ArrayData::F32(vec![0.0; len]),
            ArrayData::I64(_) => ArrayData::I64(vec![0; len]),
        };
        DenseArray::new(self.shape.clone(), data)
    }
}
