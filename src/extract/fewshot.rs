//! Few-shot examples for triple extraction.
//!
//! Examples are question/answer pairs shown to the model before the real
//! question. They load from JSON Lines, a JSON array, or CSV/TSV with
//! `input,output` headers. An [`ExampleIndex`] embeds the questions once,
//! persists them with bincode, and picks the nearest examples per question.

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embed::{EmbedError, Embedder, cosine};

/// Errors from loading or indexing few-shot examples.
#[derive(Debug, Error, Diagnostic)]
pub enum FewShotError {
    #[error("failed to read examples from {path}")]
    #[diagnostic(code(kbqa::fewshot::io), help("Check that the file exists and is readable."))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse examples in {path}: {message}")]
    #[diagnostic(
        code(kbqa::fewshot::parse),
        help("Every example needs an `input` and an `output` field.")
    )]
    Parse { path: String, message: String },

    #[error("cannot tell the example format of {path}")]
    #[diagnostic(
        code(kbqa::fewshot::format),
        help("Use a .jsonl, .json, .csv or .tsv extension, or pass the format explicitly.")
    )]
    UnknownFormat { path: String },

    #[error("failed to encode example index for {path}: {message}")]
    #[diagnostic(
        code(kbqa::fewshot::index),
        help("Rebuild the index with `kbqa index-examples`.")
    )]
    Index { path: String, message: String },

    #[error("failed to embed examples")]
    #[diagnostic(code(kbqa::fewshot::embed))]
    Embed(
        #[from]
        #[diagnostic_source]
        EmbedError,
    ),
}

/// A question and the answer the model should give for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Example {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            embedding: None,
        }
    }
}

/// On-disk layout of an example file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExampleFormat {
    JsonLines,
    Json,
    Csv,
    Tsv,
}

impl ExampleFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            _ => None,
        }
    }
}

/// Load examples, detecting the format from the extension unless given.
pub fn load_examples(
    path: &Path,
    format: Option<ExampleFormat>,
) -> Result<Vec<Example>, FewShotError> {
    let display = path.display().to_string();
    let format = format
        .or_else(|| ExampleFormat::from_path(path))
        .ok_or_else(|| FewShotError::UnknownFormat {
            path: display.clone(),
        })?;

    let examples = match format {
        ExampleFormat::JsonLines | ExampleFormat::Json => {
            let text = std::fs::read_to_string(path).map_err(|source| FewShotError::Io {
                path: display.clone(),
                source,
            })?;
            if format == ExampleFormat::Json {
                parse_json(&text, &display)?
            } else {
                parse_json_lines(&text, &display)?
            }
        }
        ExampleFormat::Csv => read_delimited(path, b',')?,
        ExampleFormat::Tsv => read_delimited(path, b'\t')?,
    };
    tracing::info!(path = %path.display(), count = examples.len(), "loaded few-shot examples");
    Ok(examples)
}

fn parse_json(text: &str, path: &str) -> Result<Vec<Example>, FewShotError> {
    serde_json::from_str(text).map_err(|e| FewShotError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn parse_json_lines(text: &str, path: &str) -> Result<Vec<Example>, FewShotError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| FewShotError::Parse {
                path: path.to_string(),
                message: format!("line {}: {e}", i + 1),
            })
        })
        .collect()
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<Vec<Example>, FewShotError> {
    let display = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| FewShotError::Parse {
            path: display.clone(),
            message: e.to_string(),
        })?;

    #[derive(Deserialize)]
    struct Row {
        input: String,
        output: String,
    }

    reader
        .deserialize::<Row>()
        .map(|row| {
            row.map(|r| Example::new(r.input, r.output))
                .map_err(|e| FewShotError::Parse {
                    path: display.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Examples with embeddings, searchable by question similarity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExampleIndex {
    examples: Vec<Example>,
}

impl ExampleIndex {
    /// Embed every example lacking a precomputed embedding.
    pub fn build(mut examples: Vec<Example>, embedder: &dyn Embedder) -> Result<Self, FewShotError> {
        let missing: Vec<usize> = examples
            .iter()
            .enumerate()
            .filter(|(_, e)| e.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            let texts: Vec<&str> = missing.iter().map(|&i| examples[i].input.as_str()).collect();
            let vectors = embedder.encode(&texts)?;
            if vectors.len() != missing.len() {
                return Err(EmbedError::Backend {
                    message: format!(
                        "asked for {} embeddings, got {}",
                        missing.len(),
                        vectors.len()
                    ),
                }
                .into());
            }
            for (i, v) in missing.into_iter().zip(vectors) {
                examples[i].embedding = Some(v);
            }
        }
        Ok(Self { examples })
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// The `k` examples closest to `query` by cosine similarity, best first.
    /// Ties keep file order.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<&Example>, EmbedError> {
        let mut scored = Vec::with_capacity(self.examples.len());
        for (i, example) in self.examples.iter().enumerate() {
            let Some(vector) = example.embedding.as_deref() else {
                continue;
            };
            if vector.len() != query.len() {
                return Err(EmbedError::DimensionMismatch {
                    expected: query.len(),
                    actual: vector.len(),
                });
            }
            scored.push((i, cosine(query, vector)));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, _)| &self.examples[i])
            .collect())
    }

    /// Embed `question` and return its `k` nearest examples.
    pub fn select(
        &self,
        question: &str,
        embedder: &dyn Embedder,
        k: usize,
    ) -> Result<Vec<Example>, EmbedError> {
        if k == 0 || self.examples.is_empty() {
            return Ok(Vec::new());
        }
        let query = embedder.encode_one(question)?;
        Ok(self.top_k(&query, k)?.into_iter().cloned().collect())
    }

    pub fn save(&self, path: &Path) -> Result<(), FewShotError> {
        let display = path.display().to_string();
        let bytes = bincode::serialize(self).map_err(|e| FewShotError::Index {
            path: display.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(path, bytes).map_err(|source| FewShotError::Io {
            path: display,
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, FewShotError> {
        let display = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| FewShotError::Io {
            path: display.clone(),
            source,
        })?;
        bincode::deserialize(&bytes).map_err(|e| FewShotError::Index {
            path: display,
            message: e.to_string(),
        })
    }
}

/// Three single-hop questions covering a start date, a birthplace and a creator.
pub fn default_examples() -> Vec<Example> {
    [
        ("When did World War II begin?", "World War II", "begin"),
        ("Where was Freddie Mercury born?", "Freddie Mercury", "born"),
        ("Who was the creator of the Mona Lisa?", "Mona Lisa", "creator"),
    ]
    .into_iter()
    .map(|(question, subject, property)| {
        Example::new(
            question,
            format!(
                "[\n    {{\n        \"subject\": \"{subject}\",\n        \"property\": \"{property}\",\n        \"object\": \"?x\"\n    }}\n]"
            ),
        )
    })
    .collect()
}
