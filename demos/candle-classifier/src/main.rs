mod model;

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use futures::future::join_all;
use image::{ImageFormat, Rgb, RgbImage};
use rand::{thread_rng, Rng};
use skewer::{init_logging, Pipeline, PipelineConfig, Registry, WireMessage};
use crate::model::LinearClassifier;

const IMAGE_SIZE: usize = 32;

fn random_png() -> Vec<u8> {
    let mut rng = thread_rng();
    let color = Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()]);
    let image = RgbImage::from_pixel(64, 48, color);
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).expect("encodes png");
    buffer.into_inner()
}

#[tokio::main]
async fn main() -> skewer::Result<()> {
    init_logging("info");

    let mut registry = Registry::with_builtins();
    registry.register_inferer("candle_linear", || Box::new(LinearClassifier::new()))?;

    let labels = Path::new(env!("CARGO_MANIFEST_DIR")).join("data").join("labels.txt");
    let config = PipelineConfig::from_toml_str(&format!(
        r#"
        max_batch_size = 10

        [converter]
        name = "image_classifier"
        path = "{labels}"

        [converter.args]
        image_size = {size}

        [inferer]
        name = "candle_linear"
        device = "cpu"

        [inferer.args]
        classes = 3
        image_size = {size}
        "#,
        labels = labels.display(),
        size = IMAGE_SIZE,
    ))?;
    let pipeline = Arc::new(Pipeline::build(&registry, &config).await?);

    let handles = (0..100).map(|e| {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let response = pipeline.handle(Arc::new(WireMessage::bytes(random_png()))).await;
            println!("Index {} status {:?} label {:?}", e, response.status(), response.as_text());
        })
    }).collect::<Vec<_>>();

    // Wait for all tasks to complete
    for handle in join_all(handles).await {
        if let Err(e) = handle {
            println!("Err joining handle: {:?}", e);
        }
    }

    // one corrupt image in the batch is answered from a zero placeholder
    let mut batch: Vec<_> = (0..24).map(|_| Arc::new(WireMessage::bytes(random_png()))).collect();
    batch[5] = Arc::new(WireMessage::bytes(&b"not an image"[..]));
    let responses = pipeline.handle_batch(batch).await;
    for (idx, response) in responses.iter().enumerate() {
        println!("Batch item {} label {:?}", idx, response.as_text());
    }
    Ok(())
}
