//! Planner prompt rendering within a byte budget.
//!
//! The template marks each section with `<!-- section:KEY required|droppable -->`.
//! When the rendered prompt exceeds the budget, droppable sections are removed
//! in a fixed order, then the last remaining section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::tools::registry::ToolDefinition;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 2] = ["example", "feedback"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex should be valid")
});

#[derive(Debug, Clone, Serialize)]
struct ParamEntry {
    name: String,
    kind: &'static str,
    required: bool,
    description: Option<String>,
    allowed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ToolEntry {
    name: String,
    description: String,
    writes_file: bool,
    params: Vec<ParamEntry>,
}

impl ToolEntry {
    fn from_definition(definition: &ToolDefinition) -> Self {
        let params = definition
            .parameters
            .iter()
            .map(|(name, spec)| ParamEntry {
                name: name.clone(),
                kind: spec.kind.as_str(),
                required: spec.required,
                description: spec.description.clone(),
                allowed: spec.allowed.as_ref().map(|values| {
                    values
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                }),
            })
            .collect();
        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            writes_file: definition.writes_file,
            params,
        }
    }
}

/// Everything the planner prompt is rendered from.
#[derive(Debug, Clone)]
pub struct PlannerPromptInputs {
    pub task: String,
    tools: Vec<ToolEntry>,
    /// Why the previous attempt was rejected, if any.
    pub feedback: Option<String>,
}

impl PlannerPromptInputs {
    pub fn new<'a>(
        task: impl Into<String>,
        tools: impl IntoIterator<Item = &'a ToolDefinition>,
        feedback: Option<String>,
    ) -> Self {
        Self {
            task: task.into(),
            tools: tools.into_iter().map(ToolEntry::from_definition).collect(),
            feedback,
        }
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|section| section.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections
            .iter()
            .position(|section| section.key == key && !section.required)
        {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    let Some(last) = sections.last_mut() else {
        return;
    };
    if total <= budget {
        return;
    }
    let allowed = budget.saturating_sub(total - last.content.len());
    let before_len = last.content.len();
    if allowed > TRUNCATION_MARKER.len() {
        truncate_at_char_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
        last.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_at_char_boundary(&mut last.content, allowed);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    let mut cut = max_len.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|section| section.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_planner(&self, input: &PlannerPromptInputs) -> Result<PromptPack> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .context("load planner template")?;
        let rendered = env
            .get_template("planner")
            .context("get planner template")?
            .render(context! {
                task => input.task.trim(),
                tools => &input.tools,
                feedback => input.feedback.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            })
            .context("render planner template")?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(PromptPack {
            content: render_sections(&sections),
        })
    }
}

/// A rendered prompt ready to send to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn into_string(self) -> String {
        self.content
    }
}
