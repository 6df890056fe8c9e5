use crate::backend::Backend;
use super::constant::{BATCH_DIM, SEQ_DIM};
use super::{DenseArray, TensorError};

/// Concatenates per-item tensors into one batch tensor.
///
/// Every item is expected to carry a leading batch dimension of size `1`
/// (the shape a single-request pre-process produces), so the result has a
/// leading dimension equal to the number of items.
///
/// # Parameters
///
/// * `items` - Tensors of shape `(1, ...)`, in request order
///
/// # Returns
///
/// A tensor of shape `(items.len(), ...)`, or [`TensorError::EmptyBatch`] when
/// `items` is empty.
pub(crate) fn concat_batch<B>(items: &[B]) -> Result<B, TensorError>
where B: Backend
{
    if items.is_empty() {
        return Err(TensorError::EmptyBatch);
    }
    B::cat(items, BATCH_DIM)
}


/// Splits a tensor into individual samples along the batch dimension.
///
/// This is the inverse of [`concat_batch`]: each returned tensor keeps a
/// leading dimension of size `1`, so it can be handed to a single-request
/// post-process unchanged.
///
/// # Parameters
///
/// * `tensor` - Tensor of shape `(batch, ...)` to split along the batch dimension
///
/// # Returns
///
/// A vector of `batch` tensors of shape `(1, ...)`, in batch order.
pub(crate) fn slice_tensor_by_batch_dimension<B>(
    tensor: &B
) -> Result<Vec<B>, TensorError>
where B: Backend
{
    tensor.vectorize_dim(BATCH_DIM)
}


/// Pads a single sequence at its end to a longer length.
///
/// # Parameters
///
/// * `sequence` - Tensor of shape `(1, seq, ...)`
/// * `amount` - Number of padding tokens to append
/// * `padding_token` - Tensor of shape `(1, 1, ...)` used for every padded position
///
/// # Returns
///
/// A tensor of shape `(1, seq + amount, ...)`.
pub(crate) fn pad_sequence_end<B>(
    sequence: &B,
    amount: usize,
    padding_token: &B
) -> Result<B, TensorError>
where B: Backend
{
    if amount == 0 {
        return Ok(sequence.clone());
    }
    let mut pieces = Vec::with_capacity(amount + 1);
    pieces.push(sequence.clone());
    pieces.extend(std::iter::repeat(padding_token.clone()).take(amount));
    B::cat(&pieces, SEQ_DIM)
}


/// Index of the largest value. Ties resolve to the first index.
pub(crate) fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, value) in values.iter().copied().enumerate() {
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}


/// Top-1 index of every row of `array`.
///
/// The leading dimension is read as the row count and every remaining
/// dimension is flattened into the row. Arrays of rank `0` or `1` are a single row.
pub(crate) fn argmax_rows(array: &DenseArray) -> Result<Vec<usize>, TensorError> {
    let values = array.to_f32_vec();
    let rows = if array.rank() <= 1 { 1 } else { array.shape()[BATCH_DIM] };
    if rows == 0 || values.is_empty() {
        return Err(TensorError::EmptyBatch);
    }
    values
        .chunks(values.len() / rows)
        .map(|row| argmax(row).ok_or(TensorError::EmptyBatch))
        .collect()
}
