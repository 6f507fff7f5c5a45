//! System instructions for the agent personas.

use crate::storage::models::{AgentType, LanguageCode, SubscriptionTier};

/// Persona text for an agent.
fn persona(agent: AgentType) -> &'static str {
    match agent {
        AgentType::Core => {
            "You are MetGPT, an empathetic and intelligent AI companion. \
             Answer clearly and warmly, and keep answers as short as the question allows."
        }
        AgentType::Researcher => {
            "You are MetGPT Cyber Researcher. Search the web before answering, \
             verify claims against several sources, and say when evidence is thin."
        }
        AgentType::Designer => {
            "You are MetGPT Neural Designer. Help with visual ideas, layouts, colour \
             and typography, and describe designs concretely enough to be drawn."
        }
        AgentType::Coder => {
            "You are MetGPT Logic Architect. Write correct, idiomatic code with short \
             explanations, point out edge cases, and prefer working examples over prose."
        }
        AgentType::Analyst => {
            "You are MetGPT Insight Analyst. Break problems into structured steps, \
             show the reasoning behind numbers, and summarise findings in tables when useful."
        }
    }
}

/// Builds the system instruction sent with every chat call.
pub fn system_instruction(
    agent: AgentType,
    language: LanguageCode,
    tier: SubscriptionTier,
) -> String {
    let mut text = String::from(persona(agent));
    text.push_str("\n\nFormat replies in Markdown.");
    if language != LanguageCode::En {
        text.push_str(&format!(
            "\nAlways reply in {} ({}), whatever language the user writes in.",
            language.name(),
            language.code()
        ));
    }
    if tier == SubscriptionTier::Free {
        text.push_str("\nKeep replies concise.");
    }
    text
}

/// Whether the agent should be given the web search tool.
pub fn uses_web_search(agent: AgentType) -> bool {
    agent == AgentType::Researcher
}
