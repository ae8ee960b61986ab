// Skein: embedding-based thematic analysis for research corpora.
//
// This is the library root. Each module corresponds to a stage of the
// theme extraction pipeline.

pub mod cluster;
pub mod coding;
pub mod coherence;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod output;
pub mod pipeline;
pub mod refine;
pub mod strategy;
