//! Rich diagnostic error types for the question-answering pipeline.
//!
//! Each pipeline stage defines its own error type with miette `#[diagnostic]`
//! derives, so a failing question tells the caller which stage gave up, on
//! which label, and what to try next.

use miette::Diagnostic;
use thiserror::Error;

use crate::disambig::DisambigError;
use crate::embed::EmbedError;
use crate::extract::fewshot::FewShotError;
use crate::llm::LlmError;

/// Top-level error type for the pipeline.
///
/// Each variant wraps a stage-specific error, preserving the full diagnostic
/// chain (error codes, help text, sources) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum QaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Linking(#[from] LinkingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Disambiguation(#[from] DisambigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Kb(#[from] KbError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    FewShot(#[from] FewShotError),
}

// ---------------------------------------------------------------------------
// Extraction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractionError {
    #[error("could not interpret model output as triple patterns for `{question}`: {message}")]
    #[diagnostic(
        code(kbqa::extract::invalid_output),
        help(
            "The model must answer with a list of objects with `subject`, `property` and \
             `object` keys. Try a stronger model or add few-shot examples."
        )
    )]
    InvalidOutput { question: String, message: String },

    #[error("could not extract triples from question: `{question}`")]
    #[diagnostic(
        code(kbqa::extract::no_triples),
        help("Rephrase the question so it asks for exactly one fact about one entity.")
    )]
    NoTriples { question: String },

    #[error("multiple draft triples generated for `{question}` ({count} triples)")]
    #[diagnostic(
        code(kbqa::extract::multiple_triples),
        help("Only single-relation questions are supported. Split the question into parts.")
    )]
    MultipleTriples { question: String, count: usize },

    #[error("malformed draft triple {pattern}")]
    #[diagnostic(
        code(kbqa::extract::malformed),
        help(
            "Exactly one of subject/object must be the unknown marker \"?x\" and the \
             other slot plus the property must be text mentions."
        )
    )]
    Malformed { pattern: String },

    #[error("extraction model call failed for `{question}`")]
    #[diagnostic(code(kbqa::extract::model))]
    Model {
        question: String,
        #[source]
        #[diagnostic_source]
        source: LlmError,
    },

    #[error("few-shot example selection failed for `{question}`")]
    #[diagnostic(code(kbqa::extract::few_shot))]
    FewShot {
        question: String,
        #[source]
        #[diagnostic_source]
        source: EmbedError,
    },
}

// ---------------------------------------------------------------------------
// Linking errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LinkingError {
    #[error("could not disambiguate item `{label}`")]
    #[diagnostic(
        code(kbqa::link::unresolved),
        help(
            "No knowledge-base entity matched the mention. Check the spelling, raise the \
             candidates limit, or switch to a more permissive disambiguation strategy."
        )
    )]
    Unresolved { label: String },

    #[error("linking `{label}` failed")]
    #[diagnostic(code(kbqa::link::failed))]
    Failed {
        label: String,
        #[source]
        #[diagnostic_source]
        source: DisambigError,
    },
}

// ---------------------------------------------------------------------------
// Property resolution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("could not fetch candidates for label `{label}`")]
    #[diagnostic(
        code(kbqa::resolve::no_candidates),
        help(
            "The linked entity has no observed statements with real properties. \
             The entity may be a stub, or linking picked the wrong entity."
        )
    )]
    NoPropertyCandidates { label: String },

    #[error("could not disambiguate property `{label}`")]
    #[diagnostic(code(kbqa::resolve::property))]
    Property {
        label: String,
        #[source]
        #[diagnostic_source]
        source: DisambigError,
    },

    #[error("failed to start the property worker pool: {message}")]
    #[diagnostic(
        code(kbqa::resolve::pool),
        help("Lower `resolution.workers` in the configuration.")
    )]
    WorkerPool { message: String },
}

// ---------------------------------------------------------------------------
// Knowledge-base errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KbError {
    #[error("knowledge-base request failed: {message}")]
    #[diagnostic(
        code(kbqa::kb::request),
        help("The backend may be overloaded or unreachable. Requests are retried automatically.")
    )]
    Request { message: String },

    #[error("knowledge-base request timed out after {timeout_secs}s")]
    #[diagnostic(code(kbqa::kb::timeout), help("Increase the client timeout."))]
    Timeout { timeout_secs: u64 },

    #[error("failed to read knowledge base from {path}")]
    #[diagnostic(
        code(kbqa::kb::io),
        help("Check that the file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse knowledge base {path}: {message}")]
    #[diagnostic(
        code(kbqa::kb::parse),
        help("The knowledge-base file must be JSON with `entities` and `statements` arrays.")
    )]
    Parse { path: String, message: String },

    #[error("statement references unknown entity `{iri}`")]
    #[diagnostic(
        code(kbqa::kb::dangling),
        help("Declare every subject, property and entity value under `entities`.")
    )]
    DanglingReference { iri: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("no model name provided for provider `{provider}`")]
    #[diagnostic(
        code(kbqa::config::model_name),
        help("Set `model.name` in the configuration file.")
    )]
    MissingModelName { provider: String },

    #[error("no endpoint provided for provider `{provider}`")]
    #[diagnostic(
        code(kbqa::config::endpoint),
        help("Set `model.endpoint` or the LLM_API_ENDPOINT environment variable.")
    )]
    MissingEndpoint { provider: String },

    #[error("no API key provided for provider `{provider}`")]
    #[diagnostic(
        code(kbqa::config::api_key),
        help("Set `model.api_key` or the LLM_API_KEY environment variable.")
    )]
    MissingApiKey { provider: String },

    #[error("unknown model provider `{provider}`")]
    #[diagnostic(
        code(kbqa::config::provider),
        help("Supported providers are `ollama` and `openai`.")
    )]
    UnknownProvider { provider: String },

    #[error("pipeline is missing a {component}")]
    #[diagnostic(
        code(kbqa::config::missing_component),
        help("Pass the component to the pipeline builder before calling `build()`.")
    )]
    MissingComponent { component: &'static str },

    #[error("invalid value for {key}: {message}")]
    #[diagnostic(code(kbqa::config::invalid))]
    Invalid { key: String, message: String },

    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(kbqa::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}: {message}")]
    #[diagnostic(
        code(kbqa::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(kbqa::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for pipeline results.
pub type QaResult<T> = std::result::Result<T, QaError>;

/// Result alias for knowledge-base reads.
pub type KbResult<T> = std::result::Result<T, KbError>;
