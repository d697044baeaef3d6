// Prompt constants for batched block enhancement.
// The whole batch travels as one instruction string in the backend's `resume` field.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(block_count|job_description|blocks)\}").expect("valid placeholder regex")
});

/// Batch enhancement prompt template.
/// Replace: {block_count}, {job_description}, {blocks}
pub const BATCH_ENHANCE_TEMPLATE: &str = r#"You are a professional resume writer. I will give you {block_count} resume blocks numbered [BLOCK 1], [BLOCK 2], etc.

For each block, enhance it to be more impactful and ATS-friendly based on this job description:

{job_description}

IMPORTANT RULES:
1. Keep enhancements concise (within roughly ±10 words of the original)
2. Use strong action verbs
3. Add quantifiable results where the original supports them
4. Match keywords from the job description
5. Maintain a professional tone
6. Keep the same structure (bullet points stay as bullets, skill lists stay as lists)

Original blocks:
{blocks}

Respond with ONLY the enhanced blocks in this EXACT format:

[BLOCK 1]
<enhanced version of block 1>

[BLOCK 2]
<enhanced version of block 2>

...and so on for all {block_count} blocks.

DO NOT add any other text. Just the blocks with their numbers."#;

/// Builds the `[BLOCK n]` section of the batch prompt, numbered from 1.
pub fn render_block_list<S: AsRef<str>>(texts: &[S]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(idx, text)| format!("[BLOCK {}]\n{}", idx + 1, text.as_ref().trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fills the batch template for the given block texts.
///
/// Placeholders are substituted in a single pass over the template, so braces
/// inside the job description or the blocks are never expanded.
pub fn build_batch_prompt<S: AsRef<str>>(texts: &[S], job_description: &str) -> String {
    let block_count = texts.len().to_string();
    let blocks = render_block_list(texts);
    let job_description = job_description.trim();

    PLACEHOLDER
        .replace_all(BATCH_ENHANCE_TEMPLATE, |caps: &Captures| match &caps[1] {
            "block_count" => block_count.clone(),
            "job_description" => job_description.to_string(),
            _ => blocks.clone(),
        })
        .into_owned()
}
