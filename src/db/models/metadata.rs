/// Named slots in the `metadata` collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKey {
    BreakRatio,
    LastFlowDuration,
    Insights,
    ActiveTimer,
}

impl MetadataKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKey::BreakRatio => "breakRatio",
            MetadataKey::LastFlowDuration => "lastFlowDuration",
            MetadataKey::Insights => "insights",
            MetadataKey::ActiveTimer => "activeTimer",
        }
    }
}
