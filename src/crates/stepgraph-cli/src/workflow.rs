//! The palette conversation workflow
//!
//! ```text
//!   entry ─► chat_agent ─► input_analyzer ─┬─► image_agent ──┐
//!              ▲  (suspends from            ├─► palette_agent ─┤ (fan-out when both)
//!              │   the 2nd pass on)         ├─► slot_checker ◄─┘
//!              │                            └─► chat_agent / end
//!              │                                   │
//!              └──────── incomplete ◄── slot_checker ──► recolor_agent ─► end
//! ```
//!
//! Both loop-backs to `chat_agent` go through the iteration guard, which counts
//! passes through `chat_agent` in `chat_iterations`.
//!
//! Node bodies are deterministic stand-ins: keyword intent classification, hex
//! palette parsing and preset palettes instead of model calls.

use crate::palette::{self, PaletteCandidate, Variation};
use anyhow::bail;
use serde_json::{json, Value};
use stepgraph_core::{
    AppendReducer, CompiledGraph, Engine, InspectResult, Intent, IntentTable, IterationGuard,
    NodeError, NodeId, NodeOutput, ResumeInput, Route, State, StateGraph, Suspension, TERMINAL,
};
use tracing::{debug, info};

pub const CHAT_AGENT: &str = "chat_agent";
pub const INPUT_ANALYZER: &str = "input_analyzer";
pub const IMAGE_AGENT: &str = "image_agent";
pub const PALETTE_AGENT: &str = "palette_agent";
pub const SLOT_CHECKER: &str = "slot_checker";
pub const RECOLOR_AGENT: &str = "recolor_agent";

/// State field counting chat turns
pub const ITERATION_FIELD: &str = "chat_iterations";

const SUPPORTED_FORMATS: [&str; 6] = ["png", "jpg", "jpeg", "webp", "bmp", "tiff"];

fn obj(value: Value) -> State {
    match value {
        Value::Object(map) => map,
        _ => State::new(),
    }
}

fn text<'a>(state: &'a State, field: &str) -> Option<&'a str> {
    state.get(field).and_then(Value::as_str)
}

fn has_image(state: &State) -> bool {
    text(state, "image").is_some()
}

fn has_palette(state: &State) -> bool {
    palette::is_ready(state.get("palette"))
}

fn assistant(content: impl Into<String>) -> Value {
    json!({"role": "assistant", "content": content.into()})
}

/// One user turn: a message and an optional image path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Turn {
    pub message: String,
    pub image_file: Option<String>,
}

impl Turn {
    pub fn from_value(value: &Value) -> Self {
        Self {
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            image_file: value
                .get("image_file")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({"message": self.message, "image_file": self.image_file})
    }
}

/// Keyword stand-in for the intent classifier
pub fn classify(message: &str, uploaded: bool) -> Vec<Intent> {
    let text = message.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
    let mut intents = Vec::new();

    if uploaded {
        intents.push(Intent::UploadImage);
    }
    if !palette::parse_hex_colors(message).is_empty() {
        intents.push(Intent::SetPalette);
    } else if has(&["extract", "from the image", "from my image", "from this image"]) {
        intents.push(Intent::ExtractPalette);
    } else if has(&["variation", "vary", "another version"]) {
        intents.push(Intent::Variation);
    } else if has(&["warmer", "cooler", "brighter", "darker", "more ", "less ", "adjust"]) {
        intents.push(Intent::AdjustPalette);
    } else if has(&[
        "palette", "colors", "colours", "mood", "theme", "vibe", "warm", "cool", "autumn",
        "ocean", "sunset",
    ]) {
        intents.push(Intent::DescribePalette);
    }
    if has(&["recolor", "recolour", "apply it", "go ahead"]) {
        intents.push(Intent::Recolor);
    }

    if intents.is_empty() {
        intents.push(Intent::GeneralChat);
    }
    intents
}

fn chat_reply(intents: &[Intent]) -> String {
    if intents == [Intent::GeneralChat] {
        return "I can recolor an image for you: upload one and describe the palette you'd like."
            .to_string();
    }
    let labels = intents.iter().map(Intent::as_str).collect::<Vec<_>>();
    format!("On it: {}.", labels.join(", "))
}

/// Update produced by one chat pass for `turn`
fn respond(state: &State, turn: Turn) -> State {
    let intents = classify(&turn.message, turn.image_file.is_some());
    info!(
        iteration = state.get(ITERATION_FIELD).and_then(serde_json::Value::as_u64).unwrap_or(0) + 1,
        intents = ?intents,
        "Classified chat turn"
    );

    let mut update = obj(json!({
        "messages": [
            {"role": "user", "content": turn.message},
            assistant(chat_reply(&intents)),
        ],
        "user_intents": intents,
        "last_message": turn.message,
        "image_file": Value::Null,
    }));
    if let Some(image) = turn.image_file {
        update.insert("pending_image".to_string(), Value::String(image));
    }
    update
}

async fn chat_agent(state: State) -> Result<NodeOutput, NodeError> {
    let iteration = state.get(ITERATION_FIELD).and_then(Value::as_u64).unwrap_or(0) + 1;
    if iteration > 1 {
        debug!(iteration, "Waiting for user input");
        return Ok(NodeOutput::Suspend(
            Suspension::new(json!({"type": "waiting_for_input", "iteration": iteration}))
                .with_context(json!({"iteration": iteration})),
        ));
    }
    let turn = Turn {
        message: text(&state, "message").unwrap_or_default().to_string(),
        image_file: text(&state, "image_file").map(str::to_string),
    };
    Ok(NodeOutput::Update(respond(&state, turn)))
}

async fn chat_agent_resume(input: ResumeInput) -> Result<State, NodeError> {
    let turn = Turn::from_value(&input.payload);
    debug!(
        iteration = input.context.get("iteration").and_then(serde_json::Value::as_u64),
        "Resumed with user input"
    );
    Ok(respond(&input.state, turn))
}

/// Turn intents and slot completeness into an execution plan.
fn input_analyzer(state: State) -> Result<State, NodeError> {
    let intents = Intent::from_labels(state.get("user_intents").unwrap_or(&Value::Null));
    let table = IntentTable::palette_workflow();
    let mut plan: Vec<&str> = table.targets(&intents);
    let mut messages = Vec::new();

    if intents.contains(&Intent::Recolor) {
        let image_ready = has_image(&state) || text(&state, "pending_image").is_some();
        if image_ready && has_palette(&state) {
            plan.push(RECOLOR_AGENT);
        } else {
            if !image_ready {
                plan.push(IMAGE_AGENT);
                messages.push(assistant("I'd love to recolor that. Please upload an image first!"));
            }
            if !has_palette(&state) {
                plan.push(PALETTE_AGENT);
                messages.push(assistant(
                    "Almost ready! I just need a 6-color palette. Describe a mood or I can suggest one.",
                ));
            }
        }
    }

    let mut deduped: Vec<&str> = Vec::new();
    for node in plan {
        if !deduped.contains(&node) {
            deduped.push(node);
        }
    }
    debug!(plan = ?deduped, "Execution plan");

    Ok(obj(json!({"next_nodes": deduped, "messages": messages})))
}

fn route_after_analyzer(state: &State, guard: &IterationGuard) -> Route {
    let plan: Vec<NodeId> = state
        .get("next_nodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let agents: Vec<NodeId> = plan
        .iter()
        .filter(|n| n.as_str() == IMAGE_AGENT || n.as_str() == PALETTE_AGENT)
        .cloned()
        .collect();

    if agents.is_empty() {
        if plan.iter().any(|n| n == RECOLOR_AGENT) {
            return Route::to(SLOT_CHECKER);
        }
        return guard.loop_back(state, CHAT_AGENT);
    }

    let intents = Intent::from_labels(state.get("user_intents").unwrap_or(&Value::Null));
    IntentTable::palette_workflow()
        .plan_route(&agents, &intents, "user_intent")
        .unwrap_or_else(|| guard.loop_back(state, CHAT_AGENT))
}

fn image_agent(state: State) -> Result<State, NodeError> {
    let Some(path) = text(&state, "pending_image") else {
        return Ok(obj(json!({
            "messages": [assistant("I don't see an image yet. Pass one with --image-file.")],
        })));
    };
    let name = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string();
    let extension = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if !SUPPORTED_FORMATS.contains(&extension.as_str()) {
        return Ok(obj(json!({
            "pending_image": Value::Null,
            "error": format!("Unsupported format: {}", name),
            "messages": [assistant("I can't process that file. Please use PNG, JPEG or WEBP.")],
        })));
    }

    let reply = if has_palette(&state) {
        format!("Image received ({}). You already have a palette ready.", name)
    } else {
        format!("Image received ({}). Now let's build a palette!", name)
    };
    Ok(obj(json!({
        "image": path,
        "image_filename": name,
        "pending_image": Value::Null,
        "messages": [assistant(reply)],
    })))
}

fn palette_intent(state: &State) -> Intent {
    if let Some(intent) = text(state, "user_intent") {
        return Intent::parse_lenient(intent);
    }
    Intent::from_labels(state.get("user_intents").unwrap_or(&Value::Null))
        .into_iter()
        .find(|i| {
            matches!(
                i,
                Intent::SetPalette
                    | Intent::DescribePalette
                    | Intent::ExtractPalette
                    | Intent::Variation
                    | Intent::AdjustPalette
            )
        })
        .unwrap_or(Intent::DescribePalette)
}

fn palette_agent(state: State) -> Result<State, NodeError> {
    let intent = palette_intent(&state);
    let message = text(&state, "last_message").unwrap_or_default();
    let current = palette::from_value(state.get("palette"));
    let mut candidates: Vec<PaletteCandidate> = Vec::new();

    match intent {
        Intent::ExtractPalette => {
            let image = text(&state, "image").or_else(|| text(&state, "pending_image"));
            let Some(image) = image else {
                return Ok(obj(json!({
                    "messages": [assistant("I need an image to extract colors from. Please upload one first.")],
                })));
            };
            candidates.push(PaletteCandidate::new(
                palette::extract(image),
                "extracted",
                "Dominant colors from your image",
            ));
        }
        Intent::SetPalette => {
            let parsed = palette::parse_hex_colors(message);
            if parsed.len() >= palette::PALETTE_SIZE {
                candidates.push(PaletteCandidate::new(
                    parsed[..palette::PALETTE_SIZE].to_vec(),
                    "user_manual",
                    "Your hand-picked palette",
                ));
            } else if !parsed.is_empty() {
                candidates.push(PaletteCandidate::new(
                    palette::pad(&parsed),
                    "user_manual",
                    format!("Your {} color(s), padded to 6", parsed.len()),
                ));
            } else {
                candidates.push(palette::describe(message));
            }
        }
        Intent::Variation | Intent::AdjustPalette => {
            let Some(current) = current else {
                return Ok(obj(json!({
                    "messages": [assistant("There's no palette to vary yet. Describe one first.")],
                })));
            };
            let requested = Variation::detect(message);
            for variation in [requested, Variation::Warmer, Variation::Cooler, Variation::Complementary] {
                if candidates.iter().any(|c| c.description.starts_with(variation.label())) {
                    continue;
                }
                candidates.push(PaletteCandidate::new(
                    variation.apply(&current),
                    "variation",
                    format!("{} variation", variation.label()),
                ));
            }
        }
        _ => candidates.push(palette::describe(message)),
    }

    let Some(selected) = candidates.first().cloned() else {
        return Ok(obj(json!({
            "error": "Could not generate any palettes",
            "messages": [assistant("I wasn't able to generate a palette. Could you describe it differently?")],
        })));
    };

    let mut lines = vec!["Here are some palette options:".to_string()];
    for (i, candidate) in candidates.iter().enumerate() {
        let marker = if i == 0 { " (selected)" } else { "" };
        lines.push(format!(
            "{}. {}{}: {}",
            i + 1,
            candidate.description,
            marker,
            palette::to_hex(&candidate.colors)
        ));
    }
    info!(intent = %intent, candidates = candidates.len(), "Palette candidates generated");

    Ok(obj(json!({
        "palette": selected.colors,
        "palette_source": selected.source,
        "palette_candidates": candidates,
        "messages": [assistant(lines.join("\n"))],
    })))
}

fn slot_checker(state: State) -> Result<State, NodeError> {
    let image = has_image(&state);
    let palette_ready = has_palette(&state);
    debug!(has_image = image, has_palette = palette_ready, "Slot check");

    if image && palette_ready {
        return Ok(obj(json!({"next_node": RECOLOR_AGENT})));
    }
    let mut missing = Vec::new();
    if !image {
        missing.push("- an image (--image-file)");
    }
    if !palette_ready {
        missing.push("- a 6-color palette (describe a theme, give hex codes, or ask to extract one)");
    }
    Ok(obj(json!({
        "next_node": CHAT_AGENT,
        "messages": [assistant(format!("Almost there! To recolor, I still need:\n{}", missing.join("\n")))],
    })))
}

fn route_after_slot_check(state: &State, guard: &IterationGuard) -> Route {
    if text(state, "next_node") == Some(RECOLOR_AGENT) {
        Route::to(RECOLOR_AGENT)
    } else {
        guard.loop_back(state, CHAT_AGENT)
    }
}

fn recolor_agent(state: State) -> Result<State, NodeError> {
    let image = text(&state, "image").ok_or("recolor requires an uploaded image")?;
    let colors = palette::from_value(state.get("palette"))
        .filter(|p| p.len() == palette::PALETTE_SIZE)
        .ok_or("recolor requires a 6-color palette")?;
    let count = state.get("recolor_count").and_then(Value::as_u64).unwrap_or(0) + 1;

    let stem = std::path::Path::new(image)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let output = format!("{}_recolored_{}.png", stem, count);
    info!(output = %output, "Recolored image");

    Ok(obj(json!({
        "result": {
            "source": image,
            "palette": palette::to_hex(&colors),
            "output": output,
        },
        "recolor_count": count,
        "messages": [assistant(format!("Done! Recolored {} with {}.", stem, palette::to_hex(&colors)))],
    })))
}

/// Assemble and compile the workflow with the given chat-turn ceiling.
pub fn build(max_chat_iterations: u64) -> stepgraph_core::Result<CompiledGraph> {
    let guard = IterationGuard::new(max_chat_iterations)
        .with_field(ITERATION_FIELD)
        .counting(CHAT_AGENT);
    let analyzer_guard = guard.clone();
    let slot_guard = guard.clone();

    let mut graph = StateGraph::new();
    graph
        .add_interruptible_node(CHAT_AGENT, chat_agent, chat_agent_resume)
        .add_node(INPUT_ANALYZER, |s| async move { input_analyzer(s) })
        .add_node(IMAGE_AGENT, |s| async move { image_agent(s) })
        .add_node(PALETTE_AGENT, |s| async move { palette_agent(s) })
        .add_node(SLOT_CHECKER, |s| async move { slot_checker(s) })
        .add_node(RECOLOR_AGENT, |s| async move { recolor_agent(s) });

    graph
        .set_entry(CHAT_AGENT)
        .add_edge(CHAT_AGENT, INPUT_ANALYZER)
        .add_conditional_edge(
            INPUT_ANALYZER,
            move |s: &State| route_after_analyzer(s, &analyzer_guard),
            [CHAT_AGENT, TERMINAL, SLOT_CHECKER, IMAGE_AGENT, PALETTE_AGENT],
        )
        .add_edge(IMAGE_AGENT, SLOT_CHECKER)
        .add_edge(PALETTE_AGENT, SLOT_CHECKER)
        .add_conditional_edge(
            SLOT_CHECKER,
            move |s: &State| route_after_slot_check(s, &slot_guard),
            [RECOLOR_AGENT, CHAT_AGENT, TERMINAL],
        )
        .add_finish(RECOLOR_AGENT);

    graph
        .register_reducer("messages", AppendReducer)
        .set_iteration_guard(guard)
        .set_initial_state(obj(json!({
            "messages": [],
            "palette_candidates": [],
            "recolor_count": 0,
        })));

    graph.compile()
}

/// Make candidate `index` (zero-based) the session's active palette.
pub async fn select_palette(
    engine: &Engine,
    session_id: &str,
    index: usize,
) -> anyhow::Result<InspectResult> {
    let current = engine.inspect(session_id).await?;
    let candidates: Vec<PaletteCandidate> = current
        .state
        .get("palette_candidates")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    if candidates.is_empty() {
        bail!("session '{}' has no palette candidates", session_id);
    }
    let Some(chosen) = candidates.get(index) else {
        bail!(
            "palette index {} out of range (session has {} candidates)",
            index,
            candidates.len()
        );
    };

    let patch = json!({
        "palette": chosen.colors,
        "palette_source": chosen.source,
        "messages": [assistant(format!("Selected palette: {}", chosen.description))],
    });
    Ok(engine.update_state(session_id, patch).await?)
}
