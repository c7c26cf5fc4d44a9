use std::process::exit;
use std::sync::Arc;

use log::{error, info};

use squadron::config::AppConfig;
use squadron::error::SquadronError;
use squadron::pipeline::{Answerer, QaPipeline};
use squadron::server;

async fn run() -> Result<(), SquadronError> {
    let cfg = AppConfig::from_env();
    info!("loading {} (revision {})", cfg.model_id, cfg.revision);

    let pipeline = tokio::task::spawn_blocking({
        let cfg = cfg.clone();
        move || QaPipeline::load(&cfg)
    })
    .await
    .map_err(|e| SquadronError::model(format!("loader task died: {}", e)))??;

    // answer a known pair once before accepting traffic
    let question = String::from("Where does Amy live ?");
    let context = String::from("Amy lives in Amsterdam");
    match pipeline.answer(&context, &question) {
        Ok(answer) => info!("self check: {:?} (score {:.4})", answer.answer, answer.score),
        Err(e) => error!("self check failed: {}", e),
    }

    server::serve(&cfg, Arc::new(pipeline)).await
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        eprintln!("[squadron] service failed: {err:?}");
        exit(1);
    }
}
