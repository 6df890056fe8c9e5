use std::fmt::Debug;
use crate::tensor::TensorError;


/// The backend trait that must be fulfilled by any tensor type the batch
/// helpers operate on
pub trait Backend: Debug + Clone + Send + Sync + 'static {
    /// Return the shape of this tensor
    fn shape(&self) -> Vec<usize>;

    /// Concatenate several tensors to each other along dimension `dim`, in the order supplied
    fn cat(tensors: &[Self], dim: usize) -> Result<Self, TensorError>;

    /// Slice a given `dim` from `start` to `start + len`, keeping the dimension
    fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self, TensorError>;

    /// Slice a tensor into size `1` tensors along the supplied `dim`.
    /// The sliced dimension is kept, with size `1`
    fn vectorize_dim(&self, dim: usize) -> Result<Vec<Self>, TensorError> {
        let shape = self.shape();
        let size = *shape.get(dim).ok_or(TensorError::DimOutOfRange { dim, rank: shape.len() })?;
        (0..size).map(|i| self.narrow(dim, i, 1)).collect()
    }

    /// A tensor of the same shape and element type, filled with zeros
    fn zeros_like(&self) -> Result<Self, TensorError>;
}
