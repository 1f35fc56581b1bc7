//! Prompt rendering with minijinja.

use crate::adaptation::Directive;
use crate::agent::context::MemoryContext;
use crate::agent::repetition::Repetition;
use crate::error::Result;
use crate::memory::ChatMessage;

use anyhow::Context as _;
use minijinja::{Environment, context};

const SYSTEM_TEMPLATE: &str = include_str!("../prompts/system.md.j2");
const USER_TEMPLATE: &str = include_str!("../prompts/user.md.j2");

/// Relevant history lines included in the user prompt.
const RELEVANT_LINES: usize = 5;

/// Renders system and user prompts from the embedded templates.
pub struct PromptEngine {
    env: Environment<'static>,
    persona: String,
}

impl PromptEngine {
    pub fn new(persona: impl Into<String>) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .context("failed to parse system prompt template")?;
        env.add_template("user", USER_TEMPLATE)
            .context("failed to parse user prompt template")?;
        Ok(Self {
            env,
            persona: persona.into(),
        })
    }

    pub fn render_system_prompt(
        &self,
        directive: &Directive,
        memory: &MemoryContext,
        repetition: Option<&Repetition>,
    ) -> Result<String> {
        let template = self.env.get_template("system").context("missing system template")?;
        let topics: Vec<&str> = memory.topics.iter().map(|t| t.topic.as_str()).collect();
        let events: Vec<String> = memory.events.iter().map(|e| e.summary()).collect();
        let rendered = template
            .render(context! {
                persona => self.persona,
                directive => directive,
                strategy => directive.flags.active(),
                repetition_hint => repetition.and_then(|r| r.level.hint()),
                relationship => memory.relationship.as_ref().map(|r| r.summary()),
                topics => topics,
                events => events,
            })
            .context("failed to render system prompt")?;
        Ok(rendered)
    }

    pub fn render_user_prompt(&self, message: &ChatMessage, memory: &MemoryContext) -> Result<String> {
        let template = self.env.get_template("user").context("missing user template")?;
        let recent: Vec<String> = memory.recent.iter().map(format_line).collect();
        let relevant: Vec<String> = memory
            .relevant
            .iter()
            .take(RELEVANT_LINES)
            .map(|r| format!("[{}] {}", r.message.timestamp.format("%d.%m"), format_line(&r.message)))
            .collect();
        let rendered = template
            .render(context! {
                author => message.author,
                content => message.content,
                recent => recent,
                relevant => relevant,
            })
            .context("failed to render user prompt")?;
        Ok(rendered)
    }
}

fn format_line(message: &ChatMessage) -> String {
    format!("{}: {}", message.author, message.content)
}
