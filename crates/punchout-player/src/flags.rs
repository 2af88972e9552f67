use std::collections::HashMap;

use crate::engine::Engine;

/// Lazily resolved pipeline flag values, keyed by nickname.
///
/// Owned by the worker, so lookups never cross threads.
#[derive(Debug, Default)]
pub struct FlagCache {
    values: HashMap<String, u32>,
}

impl FlagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `nick`, asking the engine only on the first lookup. Unknown nicknames map to 0.
    pub fn value(&mut self, engine: &dyn Engine, nick: &str) -> u32 {
        if let Some(value) = self.values.get(nick) {
            return *value;
        }
        let value = engine.flag_value(nick).unwrap_or_else(|| {
            tracing::warn!(flag = nick, "engine does not know pipeline flag");
            0
        });
        self.values.insert(nick.to_string(), value);
        value
    }

    /// OR of all `nicks`.
    pub fn combine<S: AsRef<str>>(&mut self, engine: &dyn Engine, nicks: &[S]) -> u32 {
        nicks
            .iter()
            .fold(0, |acc, nick| acc | self.value(engine, nick.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::SimEngine;

    #[test]
    fn resolves_each_nick_once() {
        let engine = SimEngine::new();
        let mut cache = FlagCache::new();
        let combined = cache.combine(&engine, &["video", "audio", "video"]);
        assert_eq!(cache.len(), 2);
        assert_eq!(engine.flag_lookups(), 2);
        assert_eq!(cache.combine(&engine, &["audio", "video"]), combined);
        assert_eq!(engine.flag_lookups(), 2);
        assert_eq!(combined, 1 | 2);
    }

    #[test]
    fn unknown_flag_contributes_nothing() {
        let engine = SimEngine::new();
        let mut cache = FlagCache::new();
        assert_eq!(cache.value(&engine, "teleport"), 0);
        assert_eq!(cache.value(&engine, "teleport"), 0);
        assert_eq!(engine.flag_lookups(), 1);
    }
}
