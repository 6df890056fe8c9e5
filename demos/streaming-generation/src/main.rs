use std::path::Path;
use std::sync::Arc;
use futures::StreamExt;
use skewer::{init_logging, Pipeline, PipelineConfig, Registry, WireMessage};

/// Chunks read before the client hangs up.
const MAX_CHUNKS: usize = 8;

#[tokio::main]
async fn main() -> skewer::Result<()> {
    init_logging("info");

    let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
    let mut config = PipelineConfig::from_file(data.join("pipeline.toml"))?;
    config.inferer.path = data.join(&config.inferer.path);
    let pipeline = Arc::new(Pipeline::build(&Registry::with_builtins(), &config).await?);

    let prime = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prime = if prime.is_empty() { "the quick".to_string() } else { prime };

    // full stream
    let mut session = pipeline.clone().stream(Arc::new(WireMessage::text(prime.as_str())));
    while let Some(chunk) = session.chunks().next().await {
        println!("chunk: {:?}", chunk.as_text());
    }
    let response = session.finish().await;
    println!("final ({:?}): {:?}", response.status(), response.as_text());

    // client hangs up early
    let mut session = pipeline.stream(Arc::new(WireMessage::text(prime)));
    let mut received = 0;
    while let Some(chunk) = session.chunks().next().await {
        println!("chunk: {:?}", chunk.as_text());
        received += 1;
        if received == MAX_CHUNKS {
            session.disconnect();
        }
    }
    let response = session.finish().await;
    println!("after disconnect ({:?}): {:?}", response.status(), response.as_text());
    Ok(())
}
