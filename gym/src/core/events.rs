//! Agent event protocol: one JSON object per stdout line, tagged by `type`.
//!
//! The generic kinds (`text`, `tool_use`, `result`) are accepted alongside the
//! claude CLI `stream-json` kinds so the same parser serves both real and
//! scripted agents. Anything else is protocol noise.

use serde::Deserialize;
use serde_json::Value;

use crate::core::types::ToolUse;

/// One parsed protocol record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental response text.
    Text { text: String },
    /// A tool invocation.
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Terminal event of a turn.
    Result(ResultEvent),
    /// A complete assistant message (claude CLI).
    Assistant { message: AssistantMessage },
    /// Partial-message delta (claude CLI `--include-partial-messages`).
    StreamEvent { event: StreamDelta },
    /// Session initialization and status records.
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    /// Tool results echoed back to the agent.
    User {
        #[serde(default)]
        message: Option<Value>,
    },
}

/// Terminal result payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct ResultEvent {
    #[serde(default, alias = "cost_usd")]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub is_error: bool,
    /// Final response text.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub num_turns: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// Content block inside an assistant message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Inner event of a `stream_event` record. Only text deltas carry data we use.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamDelta {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub delta: Option<DeltaBody>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeltaBody {
    #[serde(default)]
    pub text: Option<String>,
}

impl AgentEvent {
    /// Text this event contributes to the response transcript.
    pub fn text_chunks(&self) -> Vec<&str> {
        match self {
            AgentEvent::Text { text } => vec![text.as_str()],
            AgentEvent::Assistant { message } => message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::ToolUse { .. } | ContentBlock::Other => None,
                })
                .collect(),
            // Deltas duplicate the assistant message that follows them.
            AgentEvent::StreamEvent { .. }
            | AgentEvent::ToolUse { .. }
            | AgentEvent::Result(_)
            | AgentEvent::System { .. }
            | AgentEvent::User { .. } => Vec::new(),
        }
    }

    /// Tool invocations carried by this event.
    pub fn tool_uses(&self) -> Vec<ToolUse> {
        match self {
            AgentEvent::ToolUse { name, input } => vec![ToolUse {
                name: name.clone(),
                input: input.clone(),
            }],
            AgentEvent::Assistant { message } => message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { name, input } => Some(ToolUse {
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    ContentBlock::Text { .. } | ContentBlock::Other => None,
                })
                .collect(),
            AgentEvent::Text { .. }
            | AgentEvent::Result(_)
            | AgentEvent::StreamEvent { .. }
            | AgentEvent::System { .. }
            | AgentEvent::User { .. } => Vec::new(),
        }
    }

    /// Streamed delta text, for live display only.
    pub fn delta_text(&self) -> Option<&str> {
        match self {
            AgentEvent::StreamEvent { event } if event.kind == "content_block_delta" => {
                event.delta.as_ref().and_then(|d| d.text.as_deref())
            }
            _ => None,
        }
    }
}

/// Why a line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Noise {
    /// Not valid JSON.
    Malformed,
    /// Valid JSON without a recognized `type`.
    Unrecognized,
}

/// Classification of one raw stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Blank,
    Event(AgentEvent),
    Noise(Noise),
}

/// Parse a single protocol line.
pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParsedLine::Blank;
    }
    match serde_json::from_str::<AgentEvent>(trimmed) {
        Ok(event) => ParsedLine::Event(event),
        Err(_) => match serde_json::from_str::<Value>(trimmed) {
            Ok(_) => ParsedLine::Noise(Noise::Unrecognized),
            Err(_) => ParsedLine::Noise(Noise::Malformed),
        },
    }
}

/// Tracks consecutive noise lines against an abort threshold.
#[derive(Debug, Clone)]
pub struct NoiseCounter {
    threshold: usize,
    consecutive: usize,
    total: usize,
}

impl NoiseCounter {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            consecutive: 0,
            total: 0,
        }
    }

    /// Record a noise line. Returns `true` once the threshold is exceeded.
    pub fn record_noise(&mut self) -> bool {
        self.consecutive += 1;
        self.total += 1;
        self.consecutive > self.threshold
    }

    pub fn record_event(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> usize {
        self.consecutive
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
