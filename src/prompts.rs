//! Prompts sent to the text- and image-generation services.
//!
//! Keeping every prompt here means wording can change in one place, and unit
//! tests can inspect prompts without a live model.

use crate::model::TextLine;

/// System message for the structuring call.
pub const STRUCTURING_SYSTEM_PROMPT: &str = "You extract structured menu data from OCR text.";

/// User message for the structuring call: fixed instructions plus the OCR
/// lines joined by newlines, in reading order.
pub fn structuring_user_prompt(lines: &[TextLine]) -> String {
    let text = lines
        .iter()
        .map(TextLine::as_str)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a helpful assistant. The following lines were extracted from a restaurant menu using OCR.

Please extract and group the items. Each item should have:
- name
- description
- price

Handle varying menu formats. Output must be a JSON list of objects with fields 'name', 'price', 'description'.

Text:
{text}

Return JSON only."#
    )
}

/// Prompt for one dish photo. The description is embedded only when present.
pub fn dish_prompt(name: &str, description: Option<&str>) -> String {
    let mut prompt = format!("A realistic, appetizing photo of {}.", name.trim());
    if let Some(desc) = description.map(str::trim).filter(|d| !d.is_empty()) {
        prompt.push_str(&format!(" The dish is described as: {desc}."));
    }
    prompt.push_str(" The photo should be in a restaurant menu style.");
    prompt
}
