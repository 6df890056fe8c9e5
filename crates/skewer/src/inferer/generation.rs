use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use crate::config::{Device, PluginArgs};
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use crate::message::{Status, TEXT_PLAIN, WireMessage};
use crate::tensor::{DenseArray, NamedTensorList, TensorHandle};
use super::step_model::{required, STEP_HIDDEN, STEP_INPUT, STEP_OUTPUT, StepModel, TransitionModel};
use super::vocabulary::Vocabulary;
use super::Inferer;

const DEFAULT_VOCAB_FILE: &str = "word_to_ix.txt";
const PRIME_WORDS: usize = 2;

/// Word-level text generator over a recurrent step model.
///
/// Served without a converter: the request is a two-word prime text, and
/// each of `pred_length` steps samples the next word from the model's scores
/// and feeds the last two words back in. In a streaming call the prime and
/// every predicted word are emitted as they are produced, and generation
/// stops early once the client disconnects. The final response carries the
/// whole text.
///
/// Arguments:
/// - `pred_length` - number of words to generate (required)
/// - `vocab_path` - `<word> <index>` file (default `word_to_ix.txt` next to the model)
/// - `temperature` - sampling temperature (default `1.0`)
/// - `seed` - makes sampling deterministic
/// - `hidden_size` - overrides the hidden size stored with the model
pub struct RnnGenerator {
    model_path: PathBuf,
    vocab_path: PathBuf,
    device: Device,
    pred_length: usize,
    temperature: f32,
    hidden_size: Option<usize>,
    rng: Mutex<StdRng>,
    vocab: Option<Arc<Vocabulary>>,
    model: Option<Arc<dyn StepModel>>,
}

impl Default for RnnGenerator {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            vocab_path: PathBuf::from(DEFAULT_VOCAB_FILE),
            device: Device::Cpu,
            pred_length: 0,
            temperature: 1.0,
            hidden_size: None,
            rng: Mutex::new(StdRng::from_entropy()),
            vocab: None,
            model: None,
        }
    }
}

impl std::fmt::Debug for RnnGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RnnGenerator")
            .field("model_path", &self.model_path)
            .field("vocab_path", &self.vocab_path)
            .field("device", &self.device)
            .field("pred_length", &self.pred_length)
            .field("temperature", &self.temperature)
            .field("loaded", &self.model.is_some())
            .finish()
    }
}

impl RnnGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn loaded(&self) -> Result<(&Vocabulary, &dyn StepModel)> {
        match (self.vocab.as_deref(), self.model.as_deref()) {
            (Some(vocab), Some(model)) => Ok((vocab, model)),
            _ => Err(PipelineError::infer("rnn_generator is not loaded")),
        }
    }

    /// Draws an index with probability proportional to `exp(score / temperature)`.
    fn sample(&self, scores: &[f32]) -> Result<usize> {
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let weights: Vec<f32> = scores
            .iter()
            .map(|score| ((score - max) / self.temperature).exp())
            .collect();
        let dist = WeightedIndex::new(&weights)
            .map_err(|err| PipelineError::infer(format!("cannot sample from model output: {}", err)))?;
        Ok(dist.sample(&mut *self.rng.lock()))
    }

    fn prime(vocab: &Vocabulary, request: &WireMessage) -> Result<(Vec<String>, [i64; PRIME_WORDS])> {
        let text = request
            .as_text()
            .ok_or_else(|| PipelineError::input("expected a text prime"))?;
        let words: Vec<String> = text.split_whitespace().map(String::from).collect();
        if words.len() != PRIME_WORDS {
            return Err(PipelineError::input(format!("input length must be {}", PRIME_WORDS)));
        }
        let mut window = [0i64; PRIME_WORDS];
        for (slot, word) in window.iter_mut().zip(&words) {
            *slot = vocab
                .index(word)
                .ok_or_else(|| PipelineError::input(format!("unknown word `{}`", word)))?;
        }
        Ok((words, window))
    }

    /// Runs one model step and samples the next token.
    async fn next_token(&self, model: &dyn StepModel, window: [i64; PRIME_WORDS], hidden: DenseArray) -> Result<(i64, DenseArray)> {
        let inputs = NamedTensorList::new()
            .with(TensorHandle::dense(STEP_INPUT, DenseArray::from_i64(vec![PRIME_WORDS], window.to_vec()).map_err(PipelineError::infer)?))
            .with(TensorHandle::dense(STEP_HIDDEN, hidden));
        let outputs = model.step(inputs).await?;
        let scores = required(&outputs, STEP_OUTPUT)?.to_f32_vec();
        let hidden = required(&outputs, STEP_HIDDEN)?;
        let token = self.sample(&scores)?;
        Ok((token as i64, hidden))
    }

    async fn generate(&self, request: &WireMessage, ctx: &mut RequestContext) -> Result<String> {
        let (vocab, model) = self.loaded()?;
        let (words, mut window) = Self::prime(vocab, request)?;
        let mut hidden = DenseArray::zeros(vec![1, 1, model.hidden_size()]);
        let mut text = words.join(" ");
        let mut predicted = text.clone();
        let streaming = ctx.is_streaming();

        for step in 0..self.pred_length {
            if streaming {
                if ctx.is_disconnected() {
                    debug!(request_id = %ctx.request_id(), step, "client disconnected");
                    return Ok(text);
                }
                ctx.streaming_respond(WireMessage::text(predicted.as_str()));
                if ctx.is_disconnected() {
                    debug!(request_id = %ctx.request_id(), step, "client disconnected");
                    return Ok(text);
                }
            }

            let (token, next_hidden) = self.next_token(model, window, hidden).await?;
            hidden = next_hidden;
            predicted = vocab
                .word(token)
                .ok_or_else(|| PipelineError::output(format!("predicted index {} has no word", token)))?
                .to_string();
            window = [window[1], token];
            text.push(' ');
            text.push_str(&predicted);
        }

        if streaming {
            ctx.streaming_respond(WireMessage::text(predicted));
        }
        Ok(text)
    }
}

#[async_trait]
impl Inferer for RnnGenerator {
    fn name(&self) -> &str {
        "rnn_generator"
    }

    fn init(&mut self, path: &Path, device: Device, args: &PluginArgs) -> Result<()> {
        self.pred_length = args.required("pred_length")?;
        self.temperature = args.get_or("temperature", 1.0f32)?;
        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return Err(PipelineError::config("arg `temperature` must be positive"));
        }
        self.hidden_size = args.optional("hidden_size")?;
        if let Some(seed) = args.optional::<u64>("seed")? {
            self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        }
        self.model_path = path.to_path_buf();
        self.vocab_path = match args.optional::<PathBuf>("vocab_path")? {
            Some(vocab_path) => vocab_path,
            None => path.parent().unwrap_or(Path::new("")).join(DEFAULT_VOCAB_FILE),
        };
        self.device = device;
        if device != Device::Cpu {
            warn!(device = %device, "rnn_generator transition models run on cpu");
        }
        info!(
            path = %self.model_path.display(),
            vocab = %self.vocab_path.display(),
            pred_length = self.pred_length,
            temperature = self.temperature,
            "rnn_generator init"
        );
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        if self.model.is_some() {
            debug!("rnn_generator already loaded");
            return Ok(());
        }
        let vocab = Vocabulary::from_file(&self.vocab_path)
            .await
            .map_err(|err| PipelineError::load(err.message()))?;
        let mut model = TransitionModel::from_file(&self.model_path).await?;
        if let Some(hidden_size) = self.hidden_size {
            model = model.with_hidden_size(hidden_size);
        }
        if model.vocab_size() < vocab.len() {
            warn!(model = model.vocab_size(), vocab = vocab.len(), "model scores fewer tokens than the vocabulary holds");
        }
        info!(words = vocab.len(), hidden_size = model.hidden_size(), "rnn_generator load");
        self.vocab = Some(Arc::new(vocab));
        self.model = Some(Arc::new(model));
        Ok(())
    }

    /// One model step: `input` and `hidden` in, `output` and `hidden` out.
    async fn infer(&self, inputs: NamedTensorList, ctx: &mut RequestContext) -> Result<NamedTensorList> {
        let (_, model) = self.loaded().map_err(|err| ctx.fail(err))?;
        model.step(inputs).await.map_err(|err| ctx.fail(err))
    }

    fn supports_messages(&self) -> bool {
        true
    }

    async fn infer_message(&self, request: &WireMessage, ctx: &mut RequestContext) -> Result<WireMessage> {
        let text = self.generate(request, ctx).await.map_err(|err| ctx.fail(err))?;
        Ok(WireMessage::text(text)
            .with_status(Status::OK)
            .with_content_type(TEXT_PLAIN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use crate::context::test_support::streaming_context;
    use crate::error::ErrorKind;

    /// A vocabulary of four words where every word is always followed by the next one.
    fn write_model(dir: &Path) -> PathBuf {
        let mut vocab = std::fs::File::create(dir.join(DEFAULT_VOCAB_FILE)).unwrap();
        writeln!(vocab, "the 0\nquick 1\nbrown 2\nfox 3").unwrap();

        let certain = 50.0;
        let logits: Vec<Vec<f32>> = (0..4)
            .map(|row| (0..4).map(|col| if col == (row + 1) % 4 { 0.0 } else { -certain }).collect())
            .collect();
        let model_path = dir.join("model.json");
        let body = serde_json::json!({ "hidden_size": 100, "logits": logits });
        std::fs::write(&model_path, body.to_string()).unwrap();
        model_path
    }

    fn generator_args(pred_length: usize) -> PluginArgs {
        PluginArgs::new().with("pred_length", pred_length).with("seed", 7)
    }

    async fn generator(pred_length: usize) -> (RnnGenerator, TempDir) {
        let dir = TempDir::new().unwrap();
        let model_path = write_model(dir.path());
        let mut generator = RnnGenerator::new();
        generator.init(&model_path, Device::Cpu, &generator_args(pred_length)).unwrap();
        generator.load().await.unwrap();
        (generator, dir)
    }

    #[test]
    fn test_init_requires_pred_length() {
        let mut generator = RnnGenerator::new();
        let err = generator.init(Path::new("model.json"), Device::Cpu, &PluginArgs::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let args = generator_args(3).with("temperature", 0.0);
        assert_eq!(generator.init(Path::new("model.json"), Device::Cpu, &args).unwrap_err().kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_load_failures_are_load_errors() {
        let dir = TempDir::new().unwrap();
        let mut generator = RnnGenerator::new();
        generator.init(&dir.path().join("model.json"), Device::Cpu, &generator_args(3)).unwrap();
        assert_eq!(generator.load().await.unwrap_err().kind(), ErrorKind::Load);

        write_model(dir.path());
        std::fs::write(dir.path().join("model.json"), "{").unwrap();
        assert_eq!(generator.load().await.unwrap_err().kind(), ErrorKind::Load);
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let (mut generator, dir) = generator(1).await;
        std::fs::remove_file(dir.path().join("model.json")).unwrap();
        generator.load().await.unwrap();
    }

    #[tokio::test]
    async fn test_unary_appends_words() {
        let (generator, _dir) = generator(3).await;
        let request = WireMessage::text("the quick");
        let mut ctx = RequestContext::new(Arc::new(request.clone()));

        let response = generator.infer_message(&request, &mut ctx).await.unwrap();
        assert_eq!(response.as_text(), Some("the quick brown fox the"));
        assert_eq!(response.status(), Some(Status::OK));
    }

    #[tokio::test]
    async fn test_streaming_emits_prime_then_words() {
        let (generator, _dir) = generator(3).await;
        let request = WireMessage::text("quick brown");
        let (mut ctx, sink) = streaming_context(request.clone(), None);

        let response = generator.infer_message(&request, &mut ctx).await.unwrap();
        assert_eq!(sink.texts(), vec!["quick brown", "fox", "the", "quick"]);
        assert_eq!(response.as_text(), Some("quick brown fox the quick"));
    }

    #[tokio::test]
    async fn test_streaming_stops_on_disconnect() {
        let (generator, _dir) = generator(10).await;
        let request = WireMessage::text("the quick");
        let (mut ctx, sink) = streaming_context(request.clone(), Some(2));

        generator.infer_message(&request, &mut ctx).await.unwrap();
        assert_eq!(sink.texts(), vec!["the quick", "brown"]);
        assert!(ctx.is_disconnected());
        assert!(!ctx.has_error());
    }

    #[tokio::test]
    async fn test_rejects_bad_prime() {
        let (generator, _dir) = generator(3).await;
        for text in ["the", "the quick brown", "the zebra"] {
            let request = WireMessage::text(text);
            let mut ctx = RequestContext::new(Arc::new(request.clone()));
            let err = generator.infer_message(&request, &mut ctx).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Input);
            assert!(ctx.has_error());
        }
    }

    #[tokio::test]
    async fn test_seeded_sampling_is_reproducible() {
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("model.json");
        std::fs::write(dir.path().join(DEFAULT_VOCAB_FILE), "a 0\nb 1\nc 2\n").unwrap();
        std::fs::write(&model_path, r#"{"hidden_size": 4, "logits": [[0,0,0],[0,0,0],[0,0,0]]}"#).unwrap();

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let mut generator = RnnGenerator::new();
            generator.init(&model_path, Device::Cpu, &generator_args(20)).unwrap();
            generator.load().await.unwrap();
            let request = WireMessage::text("a b");
            let mut ctx = RequestContext::new(Arc::new(request.clone()));
            outputs.push(generator.infer_message(&request, &mut ctx).await.unwrap());
        }
        assert_eq!(outputs[0].as_text(), outputs[1].as_text());
    }

    #[tokio::test]
    async fn test_single_step_infer() {
        let (generator, _dir) = generator(1).await;
        let mut ctx = RequestContext::new(Arc::new(WireMessage::empty()));
        let inputs = NamedTensorList::new()
            .with(TensorHandle::dense(STEP_INPUT, DenseArray::from_i64(vec![2], vec![0, 2]).unwrap()))
            .with(TensorHandle::dense(STEP_HIDDEN, DenseArray::zeros(vec![1, 1, 100])));

        let outputs = generator.infer(inputs, &mut ctx).await.unwrap();
        assert_eq!(outputs.names(), vec![STEP_OUTPUT, STEP_HIDDEN]);
        assert_eq!(outputs.get(STEP_OUTPUT).unwrap().payload().shape(), vec![1, 4]);
    }

    #[tokio::test]
    async fn test_not_loaded() {
        let mut generator = RnnGenerator::new();
        generator.init(Path::new("model.json"), Device::Cpu, &generator_args(1)).unwrap();
        let request = WireMessage::text("the quick");
        let mut ctx = RequestContext::new(Arc::new(request.clone()));
        let err = generator.infer_message(&request, &mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infer);
    }
}
