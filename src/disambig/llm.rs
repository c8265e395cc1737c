//! LLM-judged strategy: a chat model picks candidate IDs from a numbered block.

use std::sync::Arc;

use crate::candidate::{Candidate, Selection};
use crate::llm::parse::{ID_DELIMITER, parse_delimited_list};
use crate::llm::{ChatMessage, ChatModel};

use super::{DisambigError, DisambiguationContext, Disambiguator, DisambiguatorOptions};

pub const NAME: &str = "llm";

/// Instruction given to the judge.
pub const LINKING_PROMPT: &str = "\
You are a precise entity-linking assistant.
Your task is to select the ID of the candidate that unambiguously matches the target term in the sentence, ensuring factual accuracy and semantic coherence.

Rules:

1. Strict Matching: Only return a candidate ID if the context in the sentence explicitly aligns with the candidate's description.

2. No Guessing: Do not infer or assume missing information. If the sentence lacks sufficient context, return nothing.

3. Output Format:

- if there's a match, your response should be a list of comma separated IDs, eg: `C102, C103, C110` or `C102,C103,C110`

- if there is no clear match respond an empty string. Do not include any extra explanations.";

/// Worked examples appended to [`LINKING_PROMPT`].
pub const LINKING_EXAMPLES: &str = r#"Input:
    Sentence: "The Eiffel Tower is located in Paris"
    Term: "Paris"

    Candidates:
        ID: C101
        Label: Paris
        Description: capital city and largest city of France

        ID: C102
        Label: Paris Saint-Germain FC
        Description: association football club in Paris, France

        ID: C103
        Label: Paris
        Description: genus of plants

Output: C101

Input:
    Sentence: "Where was James Brown born?"
    Term: "James Brown"

    Candidates:
        ID: C101
        Label: James Brown
        Description: American musician (1933–2006)

        ID: C102
        Label: James H. Brown
        Description: American biologist and academic

        ID: C103
        Label: James Brown
        Description: American-born painter active in Paris and Oaxaca (Mexico) (1951-2020)

        ID: C104
        Label: Joao
        Description: researcher

Output: C101, C102, C103

Input:
    Sentence: "The capital of Brazil is Brasilia."
    Term: "Brazil"

    Candidates:
        ID: D101
        Label: Argentina
        Description: state in South America

        ID: D102
        Label: Argentina
        Description: genus of plants

Output:"#;

/// Asks a chat model which candidates match the mention in its sentence.
pub struct LlmDisambiguator {
    model: Arc<dyn ChatModel>,
}

pub(super) fn factory(
    options: &DisambiguatorOptions,
) -> Result<Arc<dyn Disambiguator>, DisambigError> {
    let model = options
        .model
        .clone()
        .ok_or_else(|| DisambigError::MissingModel {
            strategy: NAME.to_string(),
        })?;
    Ok(Arc::new(LlmDisambiguator::new(model)))
}

impl LlmDisambiguator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    /// Render the system and user turns for one decision.
    pub fn prompt(
        label: &str,
        candidates: &[Candidate],
        sentence: &str,
        textual_context: Option<&str>,
    ) -> Vec<ChatMessage> {
        let system = format!("{LINKING_PROMPT}\n\nExamples:\n{LINKING_EXAMPLES}");
        let context_line = textual_context
            .map(|c| format!("Context: {c}"))
            .unwrap_or_default();
        let user = format!(
            "Now follow the format strictly.\n\n\
             Input:\n    Sentence: \"{sentence}\"\n    Term: \"{label}\"\n    {context_line}\n\n    \
             Candidates:\n{block}\nOutput:",
            block = candidate_block(candidates),
        );
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

/// One `ID / Label / Description` stanza per candidate.
fn candidate_block(candidates: &[Candidate]) -> String {
    let mut block = String::new();
    for c in candidates {
        block.push_str(&format!("        ID: {}", c.key()));
        block.push_str(&format!("\n        Label: {}", c.label.trim()));
        if let Some(description) = c.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            block.push_str(&format!("\n        Description: {description}"));
        }
        block.push_str("\n\n");
    }
    block
}

impl Disambiguator for LlmDisambiguator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn select(
        &self,
        label: &str,
        candidates: &[Candidate],
        limit: usize,
        context: &DisambiguationContext,
    ) -> Result<Vec<Selection>, DisambigError> {
        if candidates.is_empty() {
            return Err(DisambigError::NoCandidates {
                label: label.to_string(),
            });
        }
        let sentence = context
            .sentence
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DisambigError::MissingContext {
                label: label.to_string(),
            })?;

        let messages = Self::prompt(label, candidates, sentence, context.textual_context.as_deref());
        tracing::debug!(label, model = self.model.model_name(), "asking judge");
        let reply = self.model.invoke(&messages).map_err(|source| {
            tracing::warn!(label, error = %source, "judge call failed");
            DisambigError::Llm {
                label: label.to_string(),
                source,
            }
        })?;
        let reply = crate::llm::parse::strip_reasoning(&reply);
        tracing::debug!(label, reply = %reply, "judge replied");

        // The parsed ids are distinct, so taking the first candidate per id
        // also collapses candidates the search returned more than once.
        let mut picks: Vec<Selection> = parse_delimited_list(&reply, ID_DELIMITER)
            .iter()
            .filter(|id| !id.is_empty())
            .filter_map(|id| candidates.iter().find(|c| c.key() == id.as_str()))
            .map(Selection::from)
            .collect();
        if picks.is_empty() {
            return Err(DisambigError::Unresolved {
                label: label.to_string(),
            });
        }
        if limit > 0 {
            picks.truncate(limit);
        }
        Ok(picks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::EntityKind;
    use crate::llm::LlmError;
    use std::sync::Mutex;

    /// Replies with a fixed answer and remembers the last prompt.
    struct Scripted {
        reply: Result<String, String>,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl Scripted {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl ChatModel for Scripted {
        fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            *self.seen.lock().unwrap() = messages.to_vec();
            self.reply.clone().map_err(|message| LlmError::RequestFailed { message })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("http://kb/Q28865", "Python").with_description("programming language"),
            Candidate::new("http://kb/Q464424", "Python regius").with_description("species of reptile"),
            Candidate::new("http://kb/Q1", "Monty Python"),
        ]
    }

    fn ctx() -> DisambiguationContext {
        DisambiguationContext::sentence("Python is used in coding")
    }

    #[test]
    fn maps_ids_back_in_reply_order() {
        let judge = LlmDisambiguator::new(Scripted::ok("http://kb/Q464424, http://kb/Q28865"));
        let out = judge
            .disambiguate_candidates("Python", &candidates(), EntityKind::Item, 10, &ctx())
            .unwrap();
        let iris: Vec<_> = out.iter().map(|d| d.entity.iri.as_str()).collect();
        assert_eq!(iris, vec!["http://kb/Q464424", "http://kb/Q28865"]);
    }

    #[test]
    fn duplicate_ids_collapse_and_limit_applies() {
        let judge = LlmDisambiguator::new(Scripted::ok(
            "http://kb/Q28865, http://kb/Q28865, http://kb/Q1",
        ));
        let out = judge.select("Python", &candidates(), 1, &ctx()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "Python");
    }

    #[test]
    fn repeated_search_hits_are_selected_once() {
        let mut repeated = candidates();
        repeated.push(Candidate::new("http://kb/Q28865", "Python").with_description("programming language"));
        let judge = LlmDisambiguator::new(Scripted::ok("http://kb/Q28865, http://kb/Q1"));
        let out = judge.select("Python", &repeated, 0, &ctx()).unwrap();
        let iris: Vec<_> = out.iter().map(|s| s.iri.as_str()).collect();
        assert_eq!(iris, vec!["http://kb/Q28865", "http://kb/Q1"]);
    }

    #[test]
    fn zero_limit_keeps_every_pick() {
        let judge = LlmDisambiguator::new(Scripted::ok(
            "http://kb/Q1, http://kb/Q28865, http://kb/Q464424",
        ));
        assert_eq!(judge.select("Python", &candidates(), 0, &ctx()).unwrap().len(), 3);
        assert_eq!(judge.select("Python", &candidates(), 2, &ctx()).unwrap().len(), 2);
    }

    #[test]
    fn empty_reply_is_unresolved() {
        let judge = LlmDisambiguator::new(Scripted::ok("<think>hmm</think>\n"));
        assert!(matches!(
            judge.select("Python", &candidates(), 10, &ctx()),
            Err(DisambigError::Unresolved { .. })
        ));
    }

    #[test]
    fn unknown_ids_are_unresolved() {
        let judge = LlmDisambiguator::new(Scripted::ok("C999"));
        assert!(matches!(
            judge.select("Python", &candidates(), 10, &ctx()),
            Err(DisambigError::Unresolved { .. })
        ));
    }

    #[test]
    fn model_failure_surfaces() {
        let judge = LlmDisambiguator::new(Arc::new(Scripted {
            reply: Err("boom".into()),
            seen: Mutex::new(Vec::new()),
        }));
        assert!(matches!(
            judge.select("Python", &candidates(), 10, &ctx()),
            Err(DisambigError::Llm { .. })
        ));
    }

    #[test]
    fn sentence_is_required() {
        let judge = LlmDisambiguator::new(Scripted::ok("http://kb/Q1"));
        assert!(matches!(
            judge.select("Python", &candidates(), 10, &DisambiguationContext::default()),
            Err(DisambigError::MissingContext { .. })
        ));
    }

    #[test]
    fn prompt_lists_every_candidate_and_context() {
        let model = Scripted::ok("http://kb/Q1");
        let judge = LlmDisambiguator::new(model.clone());
        let context = ctx().with_textual_context(Some("a programming topic".into()));
        judge.select("Python", &candidates(), 10, &context).unwrap();

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].content.starts_with("You are a precise entity-linking assistant."));
        assert!(seen[0].content.contains("Examples:\nInput:"));
        let user = &seen[1].content;
        assert!(user.contains("Sentence: \"Python is used in coding\""));
        assert!(user.contains("Term: \"Python\""));
        assert!(user.contains("Context: a programming topic"));
        assert!(user.contains("ID: http://kb/Q464424\n        Label: Python regius\n        Description: species of reptile"));
        assert!(user.contains("ID: http://kb/Q1\n        Label: Monty Python\n\n"));
        assert!(user.ends_with("Output:"));
    }
}
