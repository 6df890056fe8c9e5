use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};
use crate::config::PluginArgs;
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use crate::message::{Payload, Status, TEXT_PLAIN, WireMessage};
use crate::tensor::operations::{argmax, argmax_rows, concat_batch};
use crate::tensor::{NamedTensorList, TensorHandle};
use super::core_trait::{check_batch_len, item_error_response};
use super::decode::{DecodeFailurePolicy, DecodePool, ImageDecoder};
use super::labels::LabelTable;
use super::Converter;

const INPUT_NAME: &str = "inputs";
const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Encoded images in, class labels out.
///
/// The converter's path is the label table. Pre-processing decodes the
/// request's binary payload into a normalized `[1, 3, S, S]` tensor named
/// `inputs`; post-processing takes the top-1 class of the first output tensor
/// and answers with its label as text.
///
/// Batches decode on a [`DecodePool`]; see [`DecodeFailurePolicy`] for what
/// happens to items that cannot be decoded.
///
/// Arguments:
/// - `image_size` - side of the square model input (default `224`)
/// - `normalize` - apply ImageNet mean / std (default `true`)
/// - `decode_workers` - concurrent batch decodes (default: number of CPUs)
/// - `on_decode_error` - `"zero_fill"` (default) or `"fail"`
#[derive(Debug)]
pub struct ImageClassifierConverter {
    labels: Arc<LabelTable>,
    decoder: Arc<ImageDecoder>,
    pool: DecodePool,
}

impl Default for ImageClassifierConverter {
    fn default() -> Self {
        Self {
            labels: Arc::new(LabelTable::default()),
            decoder: Arc::new(ImageDecoder::new(DEFAULT_IMAGE_SIZE, true)),
            pool: DecodePool::new(num_cpus::get(), DecodeFailurePolicy::default()),
        }
    }
}

impl ImageClassifierConverter {
    pub fn new() -> Self {
        Self::default()
    }

    fn image_data(request: &WireMessage) -> Result<Bytes> {
        match request.payload() {
            Payload::Bytes(data) if !data.is_empty() => Ok(data.clone()),
            Payload::Empty | Payload::Bytes(_) => Err(PipelineError::input("image data is empty.")),
            Payload::Text(_) | Payload::Fields(_) => Err(PipelineError::input("expected binary image data")),
        }
    }

    fn label(&self, index: usize) -> Result<WireMessage> {
        let label = self.labels.get(index).ok_or_else(|| {
            PipelineError::output(format!("class {} is outside the label table ({} labels)", index, self.labels.len()))
        })?;
        Ok(WireMessage::text(label)
            .with_status(Status::OK)
            .with_content_type(TEXT_PLAIN))
    }
}

#[async_trait]
impl Converter for ImageClassifierConverter {
    fn name(&self) -> &str {
        "image_classifier"
    }

    fn init(&mut self, path: &Path, args: &PluginArgs) -> Result<()> {
        let image_size = args.get_or("image_size", DEFAULT_IMAGE_SIZE)?;
        if image_size == 0 {
            return Err(PipelineError::config("arg `image_size` must be positive"));
        }
        let normalize = args.get_or("normalize", true)?;
        let workers = args.get_or("decode_workers", num_cpus::get())?;
        let policy = args.get_or("on_decode_error", DecodeFailurePolicy::default())?;

        self.labels = Arc::new(LabelTable::from_file(path)?);
        self.decoder = Arc::new(ImageDecoder::new(image_size, normalize));
        self.pool = DecodePool::new(workers, policy);
        info!(
            labels = self.labels.len(),
            image_size,
            normalize,
            workers = self.pool.workers(),
            policy = ?policy,
            "image_classifier converter init"
        );
        Ok(())
    }

    async fn preprocess(&self, request: &WireMessage, ctx: &mut RequestContext) -> Result<NamedTensorList> {
        let data = Self::image_data(request).map_err(|err| ctx.fail(err))?;
        let image = self.pool
            .decode_one(Arc::clone(&self.decoder), data)
            .await
            .map_err(|err| ctx.fail(err))?;
        debug!(request_id = %ctx.request_id(), shape = ?image.shape(), "image_classifier preprocess");
        Ok(NamedTensorList::new().with(TensorHandle::dense(INPUT_NAME, image)))
    }

    async fn postprocess(&self, outputs: NamedTensorList, ctx: &mut RequestContext) -> Result<WireMessage> {
        let Some(first) = outputs.first() else {
            return Err(ctx.fail(PipelineError::output("Infer out is empty.")));
        };
        let scores = first
            .payload()
            .to_dense()
            .map_err(|err| ctx.fail(PipelineError::output(err)))?
            .to_f32_vec();
        let index = argmax(&scores)
            .ok_or_else(|| ctx.fail(PipelineError::output("Infer out is empty.")))?;
        self.label(index).map_err(|err| ctx.fail(err))
    }

    async fn batch_preprocess(
        &self,
        requests: &[Arc<WireMessage>],
        ctxs: &mut [RequestContext]
    ) -> Result<NamedTensorList> {
        check_batch_len(requests.len(), ctxs.len())?;
        let mut items = Vec::with_capacity(requests.len());
        for (request, ctx) in requests.iter().zip(ctxs.iter_mut()) {
            // an empty item fails the whole batch before anything is decoded
            items.push(Self::image_data(request).map_err(|err| ctx.fail(err))?);
        }

        let images = self.pool.decode_all(Arc::clone(&self.decoder), items).await?;
        let batch = concat_batch(&images).map_err(PipelineError::input)?;
        debug!(batch = requests.len(), shape = ?batch.shape(), "image_classifier batch preprocess");
        Ok(NamedTensorList::new().with(TensorHandle::dense(INPUT_NAME, batch)))
    }

    async fn batch_postprocess(
        &self,
        outputs: NamedTensorList,
        ctxs: &mut [RequestContext]
    ) -> Result<Vec<WireMessage>> {
        let first = outputs
            .first()
            .ok_or_else(|| PipelineError::output("Infer out is empty."))?;
        let scores = first.payload().to_dense().map_err(PipelineError::output)?;
        let indices = argmax_rows(&scores).map_err(PipelineError::output)?;
        if indices.len() != ctxs.len() {
            return Err(PipelineError::output(format!(
                "model returned {} rows for a batch of {}", indices.len(), ctxs.len()
            )));
        }

        Ok(indices
            .into_iter()
            .zip(ctxs.iter_mut())
            .map(|(index, ctx)| match self.label(index) {
                Ok(response) => response,
                Err(err) => item_error_response(ctx, err),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use crate::converter::decode::tests::png_bytes;
    use crate::error::ErrorKind;
    use crate::tensor::DenseArray;

    fn label_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{0: 'tench',\n1: 'goldfish',\n2: 'great white shark'}}").unwrap();
        file
    }

    fn converter(args: PluginArgs) -> (ImageClassifierConverter, NamedTempFile) {
        let labels = label_file();
        let mut converter = ImageClassifierConverter::new();
        converter.init(labels.path(), &args.with("image_size", 8)).unwrap();
        (converter, labels)
    }

    fn image_request(data: Bytes) -> Arc<WireMessage> {
        Arc::new(WireMessage::bytes(data))
    }

    #[test]
    fn test_init_requires_labels() {
        let mut converter = ImageClassifierConverter::new();
        let err = converter.init(Path::new("/nonexistent/labels"), &PluginArgs::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);

        let bad_size = PluginArgs::new().with("image_size", "large");
        let err = converter.init(label_file().path(), &bad_size).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_preprocess_shape() {
        let (converter, _labels) = converter(PluginArgs::new());
        let request = image_request(png_bytes(20, 10, [10, 20, 30]));
        let mut ctx = RequestContext::new(request.clone());

        let tensors = converter.preprocess(&request, &mut ctx).await.unwrap();
        assert_eq!(tensors.names(), vec![INPUT_NAME]);
        assert_eq!(tensors.first().unwrap().payload().shape(), vec![1, 3, 8, 8]);
    }

    #[tokio::test]
    async fn test_preprocess_rejects_empty_and_corrupt() {
        let (converter, _labels) = converter(PluginArgs::new());
        for (payload, message) in [
            (WireMessage::empty(), Some("image data is empty.")),
            (WireMessage::bytes(Vec::<u8>::new()), Some("image data is empty.")),
            (WireMessage::bytes(&b"\x89PNG garbage"[..]), None),
        ] {
            let request = Arc::new(payload);
            let mut ctx = RequestContext::new(request.clone());
            let err = converter.preprocess(&request, &mut ctx).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Input);
            if let Some(message) = message {
                assert_eq!(err.message(), message);
            }
            assert!(ctx.has_error());
        }
    }

    #[tokio::test]
    async fn test_postprocess_top1_label() {
        let (converter, _labels) = converter(PluginArgs::new());
        let mut ctx = RequestContext::new(image_request(Bytes::new()));
        let scores = DenseArray::from_f32(vec![1, 3], vec![0.1, 0.2, 0.7]).unwrap();

        let response = converter
            .postprocess(NamedTensorList::new().with(TensorHandle::dense("scores", scores)), &mut ctx)
            .await
            .unwrap();
        assert_eq!(response.as_text(), Some("great white shark"));
    }

    #[tokio::test]
    async fn test_postprocess_class_outside_table() {
        let (converter, _labels) = converter(PluginArgs::new());
        let mut ctx = RequestContext::new(image_request(Bytes::new()));
        let scores = DenseArray::from_f32(vec![1, 5], vec![0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();

        let err = converter
            .postprocess(NamedTensorList::new().with(TensorHandle::dense("scores", scores)), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Output);
    }

    #[tokio::test]
    async fn test_batch_with_corrupt_item_zero_fills() {
        let (converter, _labels) = converter(PluginArgs::new().with("normalize", false));
        let requests = vec![
            image_request(png_bytes(4, 4, [255, 255, 255])),
            image_request(Bytes::from_static(b"corrupt")),
            image_request(png_bytes(4, 4, [255, 255, 255])),
        ];
        let mut ctxs: Vec<_> = requests.iter().cloned().map(RequestContext::new).collect();

        let batch = converter.batch_preprocess(&requests, &mut ctxs).await.unwrap();
        let inputs = batch.first().unwrap().payload().to_dense().unwrap();
        assert_eq!(inputs.shape(), &[3, 3, 8, 8]);

        let item = 3 * 8 * 8;
        let values = inputs.as_f32().unwrap();
        assert!(values[..item].iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert!(values[item..2 * item].iter().all(|v| *v == 0.0));
        assert!(ctxs.iter().all(|ctx| !ctx.has_error()));
    }

    #[tokio::test]
    async fn test_batch_fail_policy() {
        let (converter, _labels) = converter(PluginArgs::new().with("on_decode_error", "fail"));
        let requests = vec![
            image_request(png_bytes(4, 4, [0, 0, 0])),
            image_request(Bytes::from_static(b"corrupt")),
        ];
        let mut ctxs: Vec<_> = requests.iter().cloned().map(RequestContext::new).collect();

        let err = converter.batch_preprocess(&requests, &mut ctxs).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(err.message().starts_with("batch item 1"));
    }

    #[tokio::test]
    async fn test_batch_with_empty_item_fails() {
        let (converter, _labels) = converter(PluginArgs::new());
        let requests = vec![
            image_request(png_bytes(4, 4, [0, 0, 0])),
            image_request(Bytes::new()),
        ];
        let mut ctxs: Vec<_> = requests.iter().cloned().map(RequestContext::new).collect();

        let err = converter.batch_preprocess(&requests, &mut ctxs).await.unwrap_err();
        assert_eq!(err.message(), "image data is empty.");
        assert!(ctxs[1].has_error());
    }

    #[tokio::test]
    async fn test_batch_postprocess_per_row() {
        let (converter, _labels) = converter(PluginArgs::new());
        let mut ctxs: Vec<_> = (0..3).map(|_| RequestContext::new(image_request(Bytes::new()))).collect();
        let scores = DenseArray::from_f32(vec![3, 4], vec![
            0.9, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.8, 0.0,
            0.0, 0.0, 0.0, 0.5,
        ]).unwrap();

        let responses = converter
            .batch_postprocess(NamedTensorList::new().with(TensorHandle::dense("scores", scores)), &mut ctxs)
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].as_text(), Some("tench"));
        assert_eq!(responses[1].as_text(), Some("great white shark"));
        assert_eq!(responses[2].status(), Some(Status::INTERNAL_SERVER_ERROR));
        assert!(ctxs[2].has_error());
        assert!(!ctxs[0].has_error());
    }

    #[tokio::test]
    async fn test_batch_postprocess_row_count_mismatch() {
        let (converter, _labels) = converter(PluginArgs::new());
        let mut ctxs: Vec<_> = (0..2).map(|_| RequestContext::new(image_request(Bytes::new()))).collect();
        let scores = DenseArray::from_f32(vec![1, 3], vec![0.0, 1.0, 0.0]).unwrap();

        let err = converter
            .batch_postprocess(NamedTensorList::new().with(TensorHandle::dense("scores", scores)), &mut ctxs)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Output);
    }
}
