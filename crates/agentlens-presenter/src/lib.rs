// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Pure derivation of status-bar and tooltip text from a live
//! [`agentlens_tree::AgentTree`] snapshot (spec.md §4.8). Nothing here
//! mutates the tree or talks to a host; every function takes a `&AgentTree`
//! and returns owned strings.

use agentlens_tree::{Agent, AgentStatus, AgentTree};

/// A figure space, used instead of an ASCII space to pad percentages so a
/// proportional-width UI font doesn't jitter the status bar as digits come
/// and go.
const FIGURE_SPACE: char = '\u{2007}';

/// How prominently the host should draw the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    Normal,
    /// Input usage at or above 75% of the model's context window.
    Prominent,
    /// Input usage at or above 90% of the model's context window.
    Warning,
}

/// The rendered one-line status: `<icon> <mainText>[ | <subagentText>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub icon: &'static str,
    pub main_text: String,
    pub subagent_text: Option<String>,
    pub background: Background,
}

impl StatusLine {
    pub fn render(&self) -> String {
        match &self.subagent_text {
            Some(sub) => format!("{} {} | {}", self.icon, self.main_text, sub),
            None => format!("{} {}", self.icon, self.main_text),
        }
    }
}

/// Tokens the main agent is currently known to be carrying: the last
/// reported actual if a turn has completed, otherwise the outstanding
/// estimate from the in-flight `startAgent` call.
fn current_input_tokens(agent: &Agent) -> u64 {
    if agent.input_tokens > 0 {
        agent.input_tokens
    } else {
        agent.estimated_input_tokens.unwrap_or(0)
    }
}

fn percent_of(agent: &Agent) -> Option<u64> {
    let max = agent.max_input_tokens?;
    if max == 0 {
        return None;
    }
    let current = current_input_tokens(agent);
    Some(((current as f64 / max as f64) * 100.0).round() as u64)
}

fn pad_percent(pct: u64) -> String {
    let digits = pct.to_string();
    let width = 3;
    if digits.len() >= width {
        digits
    } else {
        let pad: String = std::iter::repeat(FIGURE_SPACE).take(width - digits.len()).collect();
        format!("{pad}{digits}")
    }
}

fn has_context_compaction(agent: &Agent) -> bool {
    agent.context_management.as_ref().map(|cm| !cm.applied_edits.is_empty()).unwrap_or(false)
}

fn icon_for(agent: &Agent) -> &'static str {
    if agent.status == AgentStatus::Streaming {
        "$(loading~spin)"
    } else if has_context_compaction(agent) {
        "$(fold)"
    } else {
        "$(symbol-number)"
    }
}

fn background_for(pct: Option<u64>) -> Background {
    match pct {
        Some(p) if p >= 90 => Background::Warning,
        Some(p) if p >= 75 => Background::Prominent,
        _ => Background::Normal,
    }
}

/// The subagent whose progress should ride alongside the main agent's
/// segment: the most-recently-active streaming non-main agent if one
/// exists, else the most-recently-completed non-main agent.
fn select_subagent(tree: &AgentTree) -> Option<&Agent> {
    let streaming = tree.agents().filter(|a| !a.is_main && a.status == AgentStatus::Streaming).max_by_key(|a| a.last_update_time);
    if streaming.is_some() {
        return streaming;
    }

    tree.agents()
        .filter(|a| !a.is_main && a.status == AgentStatus::Complete)
        .max_by_key(|a| a.completion_order.unwrap_or(0))
}

/// Renders the status bar's one-line text. `None` if the tree holds no main
/// agent yet (nothing has started).
pub fn render_status(tree: &AgentTree) -> Option<StatusLine> {
    let main = tree.main_agent_id().and_then(|id| tree.get(id))?;
    let pct = percent_of(main);
    let icon = icon_for(main);
    let main_text = format!("{}%", pad_percent(pct.unwrap_or(0)));
    let subagent_text = select_subagent(tree).map(|sub| {
        let spct = percent_of(sub);
        format!("{} {}%", sub.name, pad_percent(spct.unwrap_or(0)))
    });
    let background = background_for(pct);

    Some(StatusLine {
        icon,
        main_text,
        subagent_text,
        background,
    })
}

fn render_agent_block(agent: &Agent) -> String {
    let role = if agent.is_main { "main" } else { "sub" };
    match agent.status {
        AgentStatus::Streaming => {
            format!("{} ({role}, streaming) — turn {} in progress", agent.name, agent.turn_count + 1)
        }
        AgentStatus::Complete => format!(
            "{} ({role}, complete) — {} turn(s), last input {} tokens, {} output tokens",
            agent.name, agent.turn_count, agent.input_tokens, agent.output_tokens
        ),
        AgentStatus::Error => format!("{} ({role}, error) — stopped after {} turn(s)", agent.name, agent.turn_count),
    }
}

/// Renders the tooltip: a block per agent (ordered main-first, then by
/// start time) followed by a "known tokens" section summarizing what the
/// estimator has confirmed for each agent so far.
pub fn render_tooltip(tree: &AgentTree) -> String {
    let mut agents: Vec<&Agent> = tree.agents().collect();
    agents.sort_by_key(|a| (!a.is_main, a.start_time));

    let mut lines: Vec<String> = agents.iter().map(|a| render_agent_block(a)).collect();

    lines.push(String::new());
    lines.push("Known tokens:".to_string());
    for agent in &agents {
        lines.push(format!(
            "  {}: {} known / {} max observed input, {} total output",
            agent.name, agent.input_tokens, agent.max_observed_input_tokens, agent.total_output_tokens
        ));
    }

    lines.join("\n")
}
