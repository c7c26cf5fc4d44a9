use squadron::config::AppConfig;
use squadron::pipeline::{Answerer, QaPipeline};

// cargo run --example ask -- "Amy lives in Amsterdam" "Where does Amy live ?"
fn main() {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let context = args
        .next()
        .unwrap_or_else(|| String::from("Amy lives in Amsterdam"));
    let question = args
        .next()
        .unwrap_or_else(|| String::from("Where does Amy live ?"));

    let cfg = AppConfig::from_env();
    let pipeline = QaPipeline::load(&cfg).expect("model");

    let answer = pipeline.answer(&context, &question).expect("answer");
    println!("answer: {:?}", answer)
}
