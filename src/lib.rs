// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kbqa
//!
//! Question answering over a knowledge base: a natural-language question is
//! turned into a triple pattern by a chat model, its mentions are linked to
//! knowledge-base entities, and the result is compiled into statement filters.
//!
//! ## Architecture
//!
//! - **Extraction** (`extract`): few-shot prompting for `(subject, property, object)` patterns
//! - **Disambiguation** (`disambig`): pluggable strategies (`llm`, `sim`, `simple`) behind a registry
//! - **Resolution** (`resolve`): item linking, fast property path, per-item property workers
//! - **Compilation** (`compile`): resolved triples to [`kb::Filter`]s
//! - **Knowledge base** (`kb`): `Search` and `Store` traits, an in-memory backend, retry wrapper
//! - **Pipeline** (`pipeline`): the orchestrator tying the stages together
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use kbqa::config::QaConfig;
//! use kbqa::kb::memory::MemoryKb;
//! use kbqa::pipeline::QaPipeline;
//!
//! let kb = Arc::new(MemoryKb::load("kb.json".as_ref()).unwrap());
//! let pipeline = QaPipeline::from_config(&QaConfig::default(), kb).unwrap();
//! let outcome = pipeline.query("Where was Freddie Mercury born?").unwrap();
//! for value in pipeline.values(&outcome) {
//!     println!("{:?}", value.unwrap());
//! }
//! ```

pub mod candidate;
pub mod compile;
pub mod config;
pub mod disambig;
pub mod embed;
pub mod error;
pub mod extract;
pub mod kb;
pub mod llm;
pub mod pipeline;
pub mod resolve;
pub mod retry;
pub mod session;
