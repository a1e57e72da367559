use serde::{Deserialize, Serialize};

/// Relative execution priority for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Per-call metadata supplied by the caller.
///
/// Every field is independently optional; an absent field leaves the
/// corresponding wire field at its protocol default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub priority: Option<Priority>,
    pub tag: Option<String>,
    pub max_batching_delay_ms: Option<u32>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn max_batching_delay_ms(mut self, delay_ms: u32) -> Self {
        self.max_batching_delay_ms = Some(delay_ms);
        self
    }
}

/// Wire-level priority field. `Unspecified` is the protocol default and
/// lets the server pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WirePriority {
    #[default]
    Unspecified,
    Low,
    Medium,
    High,
}

/// Request options in the shape the transport sends them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireRequestOptions {
    pub priority: WirePriority,
    pub request_tag: String,
    pub max_batching_delay_ms: u32,
}

/// Compose caller options into wire options.
///
/// Pure mapping: each present option sets exactly one wire field, absent
/// options leave the field at its default. Order independent, no failure
/// modes.
pub fn build_wire_options(options: &RequestOptions) -> WireRequestOptions {
    let mut wire = WireRequestOptions::default();
    if let Some(priority) = options.priority {
        wire.priority = match priority {
            Priority::Low => WirePriority::Low,
            Priority::Medium => WirePriority::Medium,
            Priority::High => WirePriority::High,
        };
    }
    if let Some(tag) = &options.tag {
        wire.request_tag = tag.clone();
    }
    if let Some(delay_ms) = options.max_batching_delay_ms {
        wire.max_batching_delay_ms = delay_ms;
    }
    wire
}
