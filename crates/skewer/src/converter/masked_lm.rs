use std::fmt;
use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use tokenizers::decoders::wordpiece::WordPiece as WordPieceDecoder;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{AddedToken, Model, Tokenizer, TokenizerBuilder, TruncationParams};
use tracing::{debug, info};
use crate::config::PluginArgs;
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use crate::message::{Status, TEXT_PLAIN, WireMessage};
use crate::tensor::operations::{argmax, concat_batch, pad_sequence_end};
use crate::tensor::constant::SEQ_DIM;
use crate::tensor::{ArrayData, DenseArray, NamedTensorList, TensorHandle};
use super::core_trait::check_batch_len;
use super::Converter;

const INPUT_NAME: &str = "input_ids";
const TOKEN_SEPARATOR: &str = "||";

const CLS_TOKEN: &str = "[CLS]";
const SEP_TOKEN: &str = "[SEP]";
const UNK_TOKEN: &str = "[UNK]";
const PAD_TOKEN: &str = "[PAD]";
const MASK_TOKEN: &str = "[MASK]";

/// Builds a BERT tokenizer over a `vocab.txt` (one token per line, the id is
/// the line number): BERT normalization and pre-tokenization, wordpieces,
/// `[CLS] .. [SEP]` around the sequence and truncation to `max_length`.
fn bert_tokenizer(path: &Path, do_lower_case: bool, max_length: usize) -> Result<Tokenizer> {
    let vocab = path
        .to_str()
        .ok_or_else(|| PipelineError::config(format!("vocab path {} is not valid UTF-8", path.display())))?;
    let wordpiece = WordPiece::from_file(vocab)
        .unk_token(UNK_TOKEN.to_string())
        .build()
        .map_err(|err| PipelineError::resource(format!("Failed to open vocab file {}: {}", path.display(), err)))?;

    let marker = |token: &str| {
        wordpiece
            .token_to_id(token)
            .map(|id| (token.to_string(), id))
            .ok_or_else(|| PipelineError::resource(format!("vocabulary has no `{}` token", token)))
    };
    marker(UNK_TOKEN)?;
    let processing = BertProcessing::new(marker(SEP_TOKEN)?, marker(CLS_TOKEN)?);
    let specials: Vec<AddedToken> = [CLS_TOKEN, SEP_TOKEN, UNK_TOKEN, PAD_TOKEN, MASK_TOKEN]
        .into_iter()
        .filter(|token| wordpiece.token_to_id(token).is_some())
        .map(|token| AddedToken::from(token, true))
        .collect();

    let tokenizer = TokenizerBuilder::new()
        .with_model(wordpiece)
        .with_normalizer(Some(BertNormalizer::new(true, true, None, do_lower_case)))
        .with_pre_tokenizer(Some(BertPreTokenizer))
        .with_post_processor(Some(processing))
        .with_decoder(Some(WordPieceDecoder::default()))
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .build()
        .map_err(PipelineError::resource)?;
    let mut tokenizer = Tokenizer::from(tokenizer);
    // matched on the raw text, so `[MASK]` survives normalization
    tokenizer.add_special_tokens(&specials);
    Ok(tokenizer)
}

/// Indices of the mask token in a request's `input_ids`, handed from
/// pre- to post-process through the request's user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskPositions(pub Vec<usize>);

/// Fill-mask converter for BERT-style models.
///
/// The converter's path is the model's `vocab.txt`. Pre-processing tokenizes
/// the request text into `input_ids` (`[1, L]`, i64) and remembers where the
/// mask token is. Post-processing reads the prediction at each mask position
/// and answers with the predicted tokens joined by `||`.
///
/// The model output may be logits (`[1, L, V]` or `[L, V]`, f32) or already
/// predicted ids (`[1, L]` or `[L]`, i64).
///
/// Arguments:
/// - `max_length` - longest encoded sequence, markers included (required)
/// - `mask_token_id` - id of `[MASK]` in the vocabulary (required)
/// - `do_lower_case` - lower-case the text before tokenizing (default `true`)
#[derive(Default)]
pub struct MaskedLmConverter {
    tokenizer: Option<Arc<Tokenizer>>,
    max_length: usize,
    mask_token_id: i64,
}

impl MaskedLmConverter {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokenizer(&self) -> Result<&Tokenizer> {
        self.tokenizer
            .as_deref()
            .ok_or_else(|| PipelineError::config("masked_lm converter used before init"))
    }

    fn encode(&self, request: &WireMessage) -> Result<(DenseArray, MaskPositions)> {
        let text = request
            .as_text()
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| PipelineError::input("text is empty."))?;
        let encoding = self.tokenizer()?
            .encode(text, true)
            .map_err(PipelineError::input)?;
        let ids: Vec<i64> = encoding.get_ids().iter().map(|id| i64::from(*id)).collect();
        let positions = ids
            .iter()
            .enumerate()
            .filter(|(_, id)| **id == self.mask_token_id)
            .map(|(idx, _)| idx)
            .collect();
        let len = ids.len();
        let input_ids = DenseArray::from_i64(vec![1, len], ids)
            .map_err(PipelineError::input)?;
        Ok((input_ids, MaskPositions(positions)))
    }

    /// Predicted token id at every position in `positions`.
    fn predicted_ids(output: &DenseArray, positions: &[usize]) -> Result<Vec<i64>> {
        let shape = output.shape();
        match output.data() {
            ArrayData::F32(logits) => {
                let vocab = match shape {
                    [1, _, vocab] | [_, vocab] => *vocab,
                    _ => return Err(PipelineError::output(format!(
                        "expected logits of shape [1, L, V] or [L, V], got {:?}", shape
                    ))),
                };
                let rows: Vec<&[f32]> = logits.chunks(vocab.max(1)).collect();
                positions
                    .iter()
                    .map(|pos| {
                        rows.get(*pos)
                            .and_then(|row| argmax(row))
                            .map(|id| id as i64)
                            .ok_or_else(|| out_of_range(*pos, rows.len()))
                    })
                    .collect()
            }
            ArrayData::I64(ids) => {
                if !matches!(shape, [_] | [1, _]) {
                    return Err(PipelineError::output(format!(
                        "expected predicted ids of shape [1, L] or [L], got {:?}", shape
                    )));
                }
                positions
                    .iter()
                    .map(|pos| ids.get(*pos).copied().ok_or_else(|| out_of_range(*pos, ids.len())))
                    .collect()
            }
        }
    }

    fn decode(&self, outputs: &NamedTensorList, positions: &MaskPositions) -> Result<String> {
        if positions.0.is_empty() {
            return Ok(String::new());
        }
        let first = outputs
            .first()
            .ok_or_else(|| PipelineError::output("Infer out is empty."))?;
        let output = first.payload().to_dense().map_err(PipelineError::output)?;
        let ids = Self::predicted_ids(&output, &positions.0)?;
        let tokenizer = self.tokenizer()?;
        let tokens: Vec<String> = ids
            .iter()
            .map(|id| {
                u32::try_from(*id)
                    .ok()
                    .and_then(|id| tokenizer.id_to_token(id))
                    .unwrap_or_else(|| UNK_TOKEN.to_string())
            })
            .collect();
        Ok(tokens.join(TOKEN_SEPARATOR))
    }
}

impl fmt::Debug for MaskedLmConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskedLmConverter")
            .field("vocab", &self.tokenizer.as_ref().map(|t| t.get_vocab_size(false)))
            .field("max_length", &self.max_length)
            .field("mask_token_id", &self.mask_token_id)
            .finish()
    }
}

fn out_of_range(position: usize, len: usize) -> PipelineError {
    PipelineError::output(format!("mask position {} is outside the model output (length {})", position, len))
}

#[async_trait]
impl Converter for MaskedLmConverter {
    fn name(&self) -> &str {
        "masked_lm"
    }

    fn init(&mut self, path: &Path, args: &PluginArgs) -> Result<()> {
        let max_length: usize = args.required("max_length")?;
        if max_length < 2 {
            return Err(PipelineError::config("arg `max_length` must leave room for [CLS] and [SEP]"));
        }
        let mask_token_id: i64 = args.required("mask_token_id")?;
        let do_lower_case = args.get_or("do_lower_case", true)?;

        let tokenizer = bert_tokenizer(path, do_lower_case, max_length)?;
        info!(
            path = %path.display(),
            vocab = tokenizer.get_vocab_size(false),
            max_length,
            mask_token_id,
            "masked_lm converter init"
        );
        self.tokenizer = Some(Arc::new(tokenizer));
        self.max_length = max_length;
        self.mask_token_id = mask_token_id;
        Ok(())
    }

    async fn preprocess(&self, request: &WireMessage, ctx: &mut RequestContext) -> Result<NamedTensorList> {
        let (input_ids, positions) = self.encode(request).map_err(|err| ctx.fail(err))?;
        debug!(request_id = %ctx.request_id(), len = input_ids.len(), mask_pos = ?positions.0, "masked_lm preprocess");
        ctx.put(positions).map_err(|err| ctx.fail(err))?;
        Ok(NamedTensorList::new().with(TensorHandle::dense(INPUT_NAME, input_ids)))
    }

    async fn postprocess(&self, outputs: NamedTensorList, ctx: &mut RequestContext) -> Result<WireMessage> {
        let positions = ctx.take::<MaskPositions>().map_err(|err| ctx.fail(err))?;
        let text = self.decode(&outputs, &positions).map_err(|err| ctx.fail(err))?;
        Ok(WireMessage::text(text)
            .with_status(Status::OK)
            .with_content_type(TEXT_PLAIN))
    }

    /// Pads every sequence of the batch at its end with `[PAD]` up to the
    /// longest one.
    async fn batch_preprocess(
        &self,
        requests: &[Arc<WireMessage>],
        ctxs: &mut [RequestContext]
    ) -> Result<NamedTensorList> {
        check_batch_len(requests.len(), ctxs.len())?;
        let mut sequences = Vec::with_capacity(requests.len());
        for (request, ctx) in requests.iter().zip(ctxs.iter_mut()) {
            let mut item = self.preprocess(request, ctx).await?;
            let input_ids = item
                .take(INPUT_NAME)
                .ok_or_else(|| PipelineError::input("missing input_ids"))?
                .into_payload()
                .into_dense()
                .map_err(PipelineError::input)?;
            sequences.push(input_ids);
        }

        let longest = sequences.iter().map(|s| s.shape()[SEQ_DIM]).max().unwrap_or(0);
        let pad_id = self.tokenizer()?.token_to_id(PAD_TOKEN).map(i64::from).unwrap_or(0);
        let pad = DenseArray::from_i64(vec![1, 1], vec![pad_id]).map_err(PipelineError::input)?;
        let padded = sequences
            .iter()
            .map(|s| pad_sequence_end(s, longest - s.shape()[SEQ_DIM], &pad))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(PipelineError::input)?;
        let batch = concat_batch(&padded).map_err(PipelineError::input)?;
        debug!(batch = requests.len(), shape = ?batch.shape(), "masked_lm batch preprocess");
        Ok(NamedTensorList::new().with(TensorHandle::dense(INPUT_NAME, batch)))
    }
}
