use normalizer::runtime::{boot, serve};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    boot::init_logging();
    let (processor, config) = boot::boot()?;
    serve::serve(processor, config).await
}
