//! Question to triple-pattern extraction.
//!
//! A chat model reads the question (after an optional set of few-shot
//! turns) and answers with a list of `{subject, property, object}` objects
//! in which exactly one of subject/object is the unknown marker `"?x"`.
//! Replies may be JSON or Python literal syntax, optionally fenced.

pub mod fewshot;

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::embed::Embedder;
use crate::error::ExtractionError;
use crate::llm::parse::{strip_code_fence, strip_reasoning};
use crate::llm::{ChatMessage, ChatModel};

use fewshot::{Example, ExampleIndex};

/// The unknown-slot marker.
pub const UNKNOWN: &str = "?x";

/// System instruction for triple extraction.
pub const EXTRACTION_PROMPT: &str = r#"You are responsible for recognizing incomplete subject-predicate-object triple patterns from simple natural language questions
- Subjects are items (e.g., people, organizations, locations), and objects can be either items or literals (e.g., dates, numbers).
- The property describes the relationship between the subject and the object.
- Each triple must have exactly one unknown element, represented as the string "?x".
- Return a Python list of dictionaries, where each dictionary contains exactly one triple, represented as three string values under the keys "subject", "property", and "object".
- Your output must be valid Python syntax only. Do not include any extra explanations or text.

Example format:
[
    {
        "subject": "Item",
        "property": "relation",
        "object": "?x"
    }
]"#;

/// A subject–property–object pattern with one unknown slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplePattern {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<TriplePattern>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<TriplePattern>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<TriplePattern>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Which slot of a pattern holds [`UNKNOWN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSlot {
    Subject,
    Object,
}

impl TriplePattern {
    pub fn new(subject: &str, property: &str, object: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            property: Some(property.to_string()),
            object: Some(object.to_string()),
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: TriplePattern) -> Self {
        self.constraints.push(constraint);
        self
    }

    fn is_unknown(slot: &Option<String>) -> bool {
        slot.as_deref().map(str::trim) == Some(UNKNOWN)
    }

    fn mention(slot: &Option<String>) -> Option<&str> {
        slot.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != UNKNOWN)
    }

    /// The unknown slot, if the pattern is well formed: exactly one of
    /// subject/object is `?x`, and the other and the property are mentions.
    pub fn unknown_slot(&self) -> Result<UnknownSlot, ExtractionError> {
        let slot = match (Self::is_unknown(&self.subject), Self::is_unknown(&self.object)) {
            (true, false) if Self::mention(&self.object).is_some() => UnknownSlot::Subject,
            (false, true) if Self::mention(&self.subject).is_some() => UnknownSlot::Object,
            _ => return Err(self.malformed()),
        };
        if Self::mention(&self.property).is_none() {
            return Err(self.malformed());
        }
        Ok(slot)
    }

    /// The known entity mention: whichever of subject/object is not `?x`.
    pub fn main_mention(&self) -> Result<&str, ExtractionError> {
        let mention = match self.unknown_slot()? {
            UnknownSlot::Subject => Self::mention(&self.object),
            UnknownSlot::Object => Self::mention(&self.subject),
        };
        mention.ok_or_else(|| self.malformed())
    }

    pub fn property_mention(&self) -> Result<&str, ExtractionError> {
        Self::mention(&self.property).ok_or_else(|| self.malformed())
    }

    fn malformed(&self) -> ExtractionError {
        ExtractionError::Malformed {
            pattern: self.to_string(),
        }
    }
}

impl std::fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |s: &Option<String>| s.clone().unwrap_or_else(|| "None".into());
        write!(
            f,
            "({}, {}, {})",
            show(&self.subject),
            show(&self.property),
            show(&self.object)
        )?;
        for c in &self.constraints {
            write!(f, " where {c}")?;
        }
        Ok(())
    }
}

/// Parse a model reply into triple patterns.
///
/// Accepts JSON or Python literals (single quotes, `None`, `True`/`False`,
/// trailing commas), a single object instead of a list, a Markdown fence,
/// and chatter around the outermost brackets.
pub fn parse_patterns(reply: &str) -> Result<Vec<TriplePattern>, String> {
    let body = strip_code_fence(reply);
    let value = parse_literal(body).or_else(|first_err| {
        match (body.find('['), body.rfind(']')) {
            (Some(start), Some(end)) if start < end => parse_literal(&body[start..=end]),
            _ => Err(first_err),
        }
    })?;
    let value = match value {
        serde_json::Value::Object(_) => serde_json::Value::Array(vec![value]),
        other => other,
    };
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn parse_literal(text: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(text).or_else(|_| {
        serde_json::from_str(&python_literal_to_json(text)).map_err(|e| e.to_string())
    })
}

/// Rewrite a Python literal as JSON.
fn python_literal_to_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                out.push('"');
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(other) => {
                                out.push('\\');
                                out.push(other);
                            }
                            None => out.push_str("\\\\"),
                        },
                        '"' if quote == '\'' => out.push_str("\\\""),
                        c if c == quote => break,
                        '\n' => out.push_str("\\n"),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            ',' => {
                // Drop trailing commas before a closing bracket.
                let mut lookahead = chars.clone();
                while lookahead.next_if(|c| c.is_whitespace()).is_some() {}
                if !matches!(lookahead.peek(), Some(']') | Some('}')) {
                    out.push(',');
                }
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "None" => "null",
                    "True" => "true",
                    "False" => "false",
                    _ => word.as_str(),
                });
            }
            c => out.push(c),
        }
    }
    out
}

/// Where few-shot examples come from.
#[derive(Clone, Default)]
pub enum FewShot {
    /// No examples.
    #[default]
    None,
    /// The same examples for every question.
    Fixed(Vec<Example>),
    /// The `k` examples nearest to each question.
    Nearest {
        index: Arc<ExampleIndex>,
        embedder: Arc<dyn Embedder>,
        k: usize,
    },
}

impl std::fmt::Debug for FewShot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Fixed(examples) => f.debug_tuple("Fixed").field(&examples.len()).finish(),
            Self::Nearest { index, k, .. } => f
                .debug_struct("Nearest")
                .field("examples", &index.len())
                .field("k", k)
                .finish(),
        }
    }
}

/// Turns questions into triple patterns with a chat model.
pub struct TripleExtractor {
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    few_shot: FewShot,
}

impl TripleExtractor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            system_prompt: EXTRACTION_PROMPT.to_string(),
            few_shot: FewShot::None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_few_shot(mut self, few_shot: FewShot) -> Self {
        self.few_shot = few_shot;
        self
    }

    pub fn few_shot(&self) -> &FewShot {
        &self.few_shot
    }

    fn examples_for(&self, question: &str) -> Result<Vec<Example>, ExtractionError> {
        match &self.few_shot {
            FewShot::None => Ok(Vec::new()),
            FewShot::Fixed(examples) => Ok(examples.clone()),
            FewShot::Nearest { index, embedder, k } => index
                .select(question, embedder.as_ref(), *k)
                .map_err(|source| ExtractionError::FewShot {
                    question: question.to_string(),
                    source,
                }),
        }
    }

    /// Extract patterns using the configured few-shot source.
    pub fn extract(&self, question: &str) -> Result<Vec<TriplePattern>, ExtractionError> {
        let examples = self.examples_for(question)?;
        self.extract_with(question, &examples)
    }

    /// Extract patterns with an explicit set of few-shot examples.
    pub fn extract_with(
        &self,
        question: &str,
        examples: &[Example],
    ) -> Result<Vec<TriplePattern>, ExtractionError> {
        let messages = self.messages(question, examples);
        tracing::debug!(question, examples = examples.len(), "extracting triples");

        let reply = self
            .model
            .invoke(&messages)
            .map_err(|source| ExtractionError::Model {
                question: question.to_string(),
                source,
            })?;
        let cleaned = strip_reasoning(&reply);
        tracing::debug!(question, reply = %cleaned, "extraction reply");

        let patterns = parse_patterns(&cleaned).map_err(|message| {
            tracing::error!(question, %message, "failed to parse extraction reply");
            ExtractionError::InvalidOutput {
                question: question.to_string(),
                message,
            }
        })?;
        tracing::info!(question, count = patterns.len(), "extracted triple patterns");
        Ok(patterns)
    }

    fn messages(&self, question: &str, examples: &[Example]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2 + 2 * examples.len());
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        for example in examples {
            messages.push(ChatMessage::user(example.input.clone()));
            messages.push(ChatMessage::assistant(example.output.clone()));
        }
        messages.push(ChatMessage::user(question));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::llm::{LlmError, Role};
    use std::sync::Mutex;

    struct Scripted {
        reply: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl ChatModel for Scripted {
        fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            *self.seen.lock().unwrap() = messages.to_vec();
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn single_relation_question_yields_one_pattern() {
        let model = Scripted::new(
            "<think>born means place of birth</think>\n\
             [{'subject': 'Freddie Mercury', 'property': 'born', 'object': '?x'}]",
        );
        let patterns = TripleExtractor::new(model)
            .extract("Where was Freddie Mercury born?")
            .unwrap();
        assert_eq!(patterns, vec![TriplePattern::new("Freddie Mercury", "born", "?x")]);
        assert_eq!(patterns[0].unknown_slot().unwrap(), UnknownSlot::Object);
        assert_eq!(patterns[0].main_mention().unwrap(), "Freddie Mercury");
    }

    #[test]
    fn few_shot_turns_precede_question() {
        let model = Scripted::new("[]");
        let extractor = TripleExtractor::new(model.clone())
            .with_few_shot(FewShot::Fixed(fewshot::default_examples()));
        assert!(extractor.extract("Who wrote Dune?").unwrap().is_empty());

        let seen = model.seen.lock().unwrap();
        let roles: Vec<Role> = seen.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User
            ]
        );
        assert_eq!(seen.last().unwrap().content, "Who wrote Dune?");
        assert_eq!(seen[0].content, EXTRACTION_PROMPT);
    }

    #[test]
    fn nearest_few_shot_uses_index() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(128));
        let index = ExampleIndex::build(fewshot::default_examples(), embedder.as_ref()).unwrap();
        let model = Scripted::new("[]");
        let extractor = TripleExtractor::new(model.clone()).with_few_shot(FewShot::Nearest {
            index: Arc::new(index),
            embedder,
            k: 1,
        });
        extractor.extract("Who was the creator of the Mona Lisa?").unwrap();
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[1].content, "Who was the creator of the Mona Lisa?");
    }

    #[test]
    fn unparseable_reply_is_invalid_output() {
        let model = Scripted::new("I think the answer is Zanzibar.");
        let err = TripleExtractor::new(model).extract("Where?").unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidOutput { .. }));
    }

    #[test]
    fn parses_fenced_json_with_null_constraints() {
        let reply = "```json\n[{\"subject\": \"?x\", \"property\": \"directed\", \
                     \"object\": \"Alien\", \"constraints\": null}]\n```";
        let patterns = parse_patterns(reply).unwrap();
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].constraints.is_empty());
        assert_eq!(patterns[0].unknown_slot().unwrap(), UnknownSlot::Subject);
        assert_eq!(patterns[0].main_mention().unwrap(), "Alien");
    }

    #[test]
    fn parses_python_literals() {
        let reply = "Here you go:\n[\n  {'subject': \"O'Hare\", 'property': 'named after', \
                     'object': '?x', 'constraints': [{'subject': '?x', 'property': 'a', \
                     'object': 'human', 'extra': None, 'flag': True},],},\n]";
        let patterns = parse_patterns(reply).unwrap();
        assert_eq!(patterns[0].subject.as_deref(), Some("O'Hare"));
        assert_eq!(patterns[0].constraints.len(), 1);
        assert_eq!(patterns[0].constraints[0].object.as_deref(), Some("human"));
    }

    #[test]
    fn single_object_reply_is_wrapped() {
        let patterns =
            parse_patterns("{'subject': 'Mona Lisa', 'property': 'creator', 'object': '?x'}")
                .unwrap();
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        for bad in [
            TriplePattern::new("?x", "born", "?x"),
            TriplePattern::new("Freddie", "born", "Zanzibar"),
            TriplePattern::new("Freddie", "", "?x"),
            TriplePattern {
                subject: None,
                property: Some("born".into()),
                object: Some("?x".into()),
                constraints: Vec::new(),
            },
        ] {
            assert!(
                matches!(bad.unknown_slot(), Err(ExtractionError::Malformed { .. })),
                "{bad}"
            );
        }
    }
}
