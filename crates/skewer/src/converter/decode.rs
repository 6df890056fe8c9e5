//! Parallel decoding of batch items.
//!
//! A [`DecodePool`] decodes every item of a batch on the blocking thread pool,
//! with at most `workers` decodes in flight, and returns only once every item
//! has finished.

use std::sync::Arc;
use bytes::Bytes;
use futures::future::join_all;
use image::imageops::{self, FilterType};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::warn;
use crate::error::{PipelineError, Result};
use crate::tensor::DenseArray;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decodes one encoded item into a dense array with a leading batch dimension of `1`.
pub trait ItemDecoder: Send + Sync + 'static {
    fn decode(&self, data: &[u8]) -> Result<DenseArray>;

    /// Shape every successfully decoded item has.
    fn item_shape(&self) -> Vec<usize>;
}

/// What a batch decode does with an item that cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Substitute zeros of the item shape and keep the batch.
    #[default]
    ZeroFill,
    /// Fail the whole batch.
    Fail,
}

/// Decodes encoded images into normalized `[1, 3, S, S]` CHW float arrays.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    size: u32,
    normalize: bool,
}

impl ImageDecoder {
    pub fn new(size: u32, normalize: bool) -> Self {
        Self { size, normalize }
    }
}

impl ItemDecoder for ImageDecoder {
    fn decode(&self, data: &[u8]) -> Result<DenseArray> {
        if data.is_empty() {
            return Err(PipelineError::input("image data is empty."));
        }
        let image = image::load_from_memory(data)
            .map_err(|err| PipelineError::input(format!("image decode failed: {}", err)))?
            .to_rgb8();
        let resized = imageops::resize(&image, self.size, self.size, FilterType::Triangle);

        let plane = (self.size * self.size) as usize;
        let mut values = vec![0f32; 3 * plane];
        for (idx, pixel) in resized.pixels().enumerate() {
            for channel in 0..3 {
                let mut value = f32::from(pixel[channel]) / 255.0;
                if self.normalize {
                    value = (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
                }
                values[channel * plane + idx] = value;
            }
        }
        DenseArray::from_f32(self.item_shape(), values)
            .map_err(|err| PipelineError::input(err.to_string()))
    }

    fn item_shape(&self) -> Vec<usize> {
        let size = self.size as usize;
        vec![1, 3, size, size]
    }
}

/// A bounded pool of blocking decode workers.
#[derive(Debug, Clone)]
pub struct DecodePool {
    permits: Arc<Semaphore>,
    workers: usize,
    policy: DecodeFailurePolicy,
}

impl DecodePool {
    pub fn new(workers: usize, policy: DecodeFailurePolicy) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            policy,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn policy(&self) -> DecodeFailurePolicy {
        self.policy
    }

    /// Decodes a single item. Failures are always returned.
    pub async fn decode_one<D: ItemDecoder>(&self, decoder: Arc<D>, data: Bytes) -> Result<DenseArray> {
        self.run(decoder, data).await
    }

    /// Decodes every item and waits for all of them.
    ///
    /// # Returns
    ///
    /// One array per item, in item order. A failed item is replaced by zeros
    /// under [`DecodeFailurePolicy::ZeroFill`]; under
    /// [`DecodeFailurePolicy::Fail`] the first failed index is reported as
    /// [`PipelineError::Input`].
    pub async fn decode_all<D: ItemDecoder>(&self, decoder: Arc<D>, items: Vec<Bytes>) -> Result<Vec<DenseArray>> {
        let tasks = items
            .into_iter()
            .map(|data| self.run(Arc::clone(&decoder), data));
        let results = join_all(tasks).await;

        let mut decoded = Vec::with_capacity(results.len());
        for (idx, result) in results.into_iter().enumerate() {
            match (result, self.policy) {
                (Ok(array), _) => decoded.push(array),
                (Err(err), DecodeFailurePolicy::ZeroFill) => {
                    warn!(item = idx, error = %err, "decode failed, substituting zeros");
                    decoded.push(DenseArray::zeros(decoder.item_shape()));
                }
                (Err(err), DecodeFailurePolicy::Fail) => {
                    return Err(PipelineError::input(format!("batch item {}: {}", idx, err.message())));
                }
            }
        }
        Ok(decoded)
    }

    async fn run<D: ItemDecoder>(&self, decoder: Arc<D>, data: Bytes) -> Result<DenseArray> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|err| PipelineError::input(format!("decode pool closed: {}", err)))?;
        tokio::task::spawn_blocking(move || decoder.decode(&data))
            .await
            .map_err(|err| PipelineError::input(format!("decode worker failed: {}", err)))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use image::{ImageFormat, Rgb, RgbImage};
    use crate::error::ErrorKind;

    pub(crate) fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Bytes {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        Bytes::from(buffer.into_inner())
    }

    #[test]
    fn test_image_decoder_layout() {
        let decoder = ImageDecoder::new(4, false);
        let array = decoder.decode(&png_bytes(8, 6, [255, 0, 51])).unwrap();
        assert_eq!(array.shape(), &[1, 3, 4, 4]);

        let values = array.as_f32().unwrap();
        assert!(values[..16].iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert!(values[16..32].iter().all(|v| v.abs() < 1e-6));
        assert!(values[32..].iter().all(|v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_image_decoder_normalizes() {
        let decoder = ImageDecoder::new(2, true);
        let array = decoder.decode(&png_bytes(2, 2, [0, 0, 0])).unwrap();
        let expected = -IMAGENET_MEAN[0] / IMAGENET_STD[0];
        assert!((array.as_f32().unwrap()[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_image_decoder_rejects_garbage() {
        let decoder = ImageDecoder::new(2, true);
        assert_eq!(decoder.decode(b"").unwrap_err().message(), "image data is empty.");
        assert_eq!(decoder.decode(b"not an image").unwrap_err().kind(), ErrorKind::Input);
    }

    /// Decodes `[n]` into a `[1, 1]` array holding `n`, fails on anything else.
    struct ByteDecoder {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ItemDecoder for ByteDecoder {
        fn decode(&self, data: &[u8]) -> Result<DenseArray> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match data {
                [value] => DenseArray::from_f32(vec![1, 1], vec![f32::from(*value)])
                    .map_err(|err| PipelineError::input(err.to_string())),
                _ => Err(PipelineError::input("corrupt")),
            }
        }

        fn item_shape(&self) -> Vec<usize> {
            vec![1, 1]
        }
    }

    fn byte_decoder() -> Arc<ByteDecoder> {
        Arc::new(ByteDecoder { in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_decode_all_keeps_order_and_bounds_workers() {
        let pool = DecodePool::new(2, DecodeFailurePolicy::ZeroFill);
        let decoder = byte_decoder();
        let items: Vec<Bytes> = (1..=6u8).map(|n| Bytes::from(vec![n])).collect();

        let decoded = pool.decode_all(decoder.clone(), items).await.unwrap();
        let values: Vec<f32> = decoded.iter().map(|a| a.as_f32().unwrap()[0]).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(decoder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_zero_fill_replaces_corrupt_item() {
        let pool = DecodePool::new(4, DecodeFailurePolicy::ZeroFill);
        let items = vec![Bytes::from(vec![7u8]), Bytes::from_static(b"bad"), Bytes::from(vec![9u8])];

        let decoded = pool.decode_all(byte_decoder(), items).await.unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1], DenseArray::zeros(vec![1, 1]));
        assert_eq!(decoded[2].as_f32().unwrap(), &[9.0]);
    }

    #[tokio::test]
    async fn test_fail_policy_names_item() {
        let pool = DecodePool::new(4, DecodeFailurePolicy::Fail);
        let items = vec![Bytes::from(vec![7u8]), Bytes::from_static(b"bad")];

        let err = pool.decode_all(byte_decoder(), items).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(err.message(), "batch item 1: corrupt");
    }

    #[tokio::test]
    async fn test_decode_one_propagates_failure() {
        let pool = DecodePool::new(0, DecodeFailurePolicy::ZeroFill);
        assert_eq!(pool.workers(), 1);
        assert!(pool.decode_one(byte_decoder(), Bytes::from_static(b"bad")).await.is_err());
    }

    #[test]
    fn test_policy_from_args() {
        let policy: DecodeFailurePolicy = serde_json::from_str("\"fail\"").unwrap();
        assert_eq!(policy, DecodeFailurePolicy::Fail);
        assert_eq!(DecodeFailurePolicy::default(), DecodeFailurePolicy::ZeroFill);
    }
}
