/// # squadron
///
/// Extractive question answering over ONNX, served as a small web form.
///
/// Apache-2.0 License.
///

pub mod config;
/// Error taxonomy
///
pub mod error;
/// Artifact acquisition and cache
///
pub mod hub;
/// Span-selection algorithms
///
pub mod ml;
/// ONNX interface
///
pub mod onnx;
/// Tokenize, infer, extract
///
pub mod pipeline;
/// Scoped proxy environment
///
pub mod proxy;
/// HTTP host for the pipeline
///
pub mod server;
