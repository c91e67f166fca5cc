// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// RAG (Retrieval-Augmented Generation) module
// Corpus model, exhaustive vector search, and the query engine

pub mod chunk;
pub mod engine;
pub mod errors;
pub mod vector_index;

pub use chunk::{Chunk, Corpus, GENERAL_SECTION};
pub use engine::{Confidence, QueryEngine, QueryResponse, Source, NO_ANSWER_MESSAGE};
pub use errors::{CorpusError, QueryError};
pub use vector_index::VectorIndex;
