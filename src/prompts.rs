//! Prompt templates for rephrasing and evaluation.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the rewrite instructions or the
//!    scoring contract requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the filled prompts directly
//!    without a live backend, making prompt regressions easy to catch.
//!
//! Templates use named `{placeholder}` markers substituted by the builder
//! functions below; the constants are never sent unfilled.

/// Template for the first rephrase attempt of a chunk (no feedback yet).
pub const BASE_PROMPT: &str = r#"You are an expert technical editor. Rewrite the following passage in clear, precise language.

Rules:
- Preserve every fact, number, and named entity exactly as given.
- Do not add information that is not in the original text.
- Do not drop information that is in the original text.
- Keep the register formal and the terminology consistent.
- Output ONLY the rewritten passage, with no commentary or preamble.

Section: {header}

Original text:
{input_text}"#;

/// Template for follow-up attempts, carrying the evaluator's feedback and
/// the previous rewrite so the model can correct rather than start over.
pub const FEEDBACK_PROMPT: &str = r#"You are an expert technical editor. Your previous rewrite of this passage was rejected by a reviewer. Produce an improved rewrite that addresses the feedback.

Rules:
- Preserve every fact, number, and named entity exactly as given.
- Do not add information that is not in the original text.
- Do not drop information that is in the original text.
- Output ONLY the rewritten passage, with no commentary or preamble.

Section: {header}

Original text:
{input_text}

Your previous rewrite:
{previous_rephrased_text}

Reviewer feedback:
{feedback}"#;

/// Template for the rubric-scoring request.
///
/// The backend is asked for a strict JSON object; the response is validated
/// against the schema in [`crate::pipeline::evaluate`] and rejected on any
/// deviation.
pub const EVALUATOR_PROMPT: &str = r#"You are a strict reviewer comparing a rewritten passage against its original. Score the rewrite on each of the following metrics with a value between 0.0 and 1.0:

{metric_descriptions}

Original text:
{input_text}

Rewritten text:
{rephrased_text}

Respond with a single JSON object and nothing else, in exactly this shape:
{"scores": {"correctness": 0.0, "completeness": 0.0, "consistency": 0.0, "relevance": 0.0, "interpretability": 0.0}, "missing_items": [], "hallucinated_items": [], "feedback": ""}

List any facts present in the original but absent from the rewrite in "missing_items", any facts invented by the rewrite in "hallucinated_items", and put concrete, actionable advice for the next revision in "feedback". Do not add any other fields."#;

/// Fill the base rephrase template.
pub fn rephrase_prompt(header: &str, input_text: &str) -> String {
    BASE_PROMPT
        .replace("{header}", header)
        .replace("{input_text}", input_text)
}

/// Fill the feedback rephrase template.
pub fn feedback_prompt(
    header: &str,
    input_text: &str,
    previous_rephrased_text: &str,
    feedback: &str,
) -> String {
    FEEDBACK_PROMPT
        .replace("{header}", header)
        .replace("{input_text}", input_text)
        .replace("{previous_rephrased_text}", previous_rephrased_text)
        .replace("{feedback}", feedback)
}

/// Fill the evaluator template.
///
/// `metric_descriptions` is the pre-rendered "- Name: description" block
/// built from the loaded metric set.
pub fn evaluator_prompt(metric_descriptions: &str, input_text: &str, rephrased_text: &str) -> String {
    EVALUATOR_PROMPT
        .replace("{metric_descriptions}", metric_descriptions)
        .replace("{input_text}", input_text)
        .replace("{rephrased_text}", rephrased_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_prompt_fills_all_placeholders() {
        let p = rephrase_prompt("Introduction", "some text");
        assert!(p.contains("Introduction"));
        assert!(p.contains("some text"));
        assert!(!p.contains("{header}") && !p.contains("{input_text}"));
    }

    #[test]
    fn feedback_prompt_carries_previous_attempt() {
        let p = feedback_prompt("Intro", "orig", "prev rewrite", "too wordy");
        assert!(p.contains("prev rewrite"));
        assert!(p.contains("too wordy"));
        assert!(!p.contains("{feedback}"));
    }

    #[test]
    fn evaluator_prompt_embeds_metric_block() {
        let p = evaluator_prompt("- Correctness: is it right", "a", "b");
        assert!(p.contains("- Correctness: is it right"));
        // The literal JSON shape survives substitution untouched.
        assert!(p.contains(r#""missing_items": []"#));
    }
}
