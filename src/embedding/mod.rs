// Embedding infrastructure: backends, validation, caching, and the
// concurrency gate.
//
// Every embedding enters the pipeline through exactly one boundary
// (EmbeddingProvider), which normalizes heterogeneous backend output into
// the frozen EmbeddingWithNorm type. Downstream code never sees a raw
// vector that hasn't been shape- and finiteness-checked.

pub mod cache;
pub mod download;
pub mod gate;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod openai;
pub mod provider;
pub mod rate_limit;
pub mod traits;
pub mod vector;
