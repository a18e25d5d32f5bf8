/// Number of entries shown in the published "recent" list unless configured.
pub const DEFAULT_RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How many entries the derived view keeps in `recent`
    pub recent_limit: usize,
}

impl EngineConfig {
    pub fn with_recent_limit(mut self, recent_limit: usize) -> Self {
        self.recent_limit = recent_limit;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}
