//! World configuration.

/// Tunables for a [`World`](crate::World).
#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// Number of entity slots to preallocate.
    pub entity_capacity: usize,
    /// Flush passes allowed before a feedback loop between observers and
    /// deferred commands is treated as fatal.
    pub max_flush_iterations: usize,
    /// Hops followed by `up` traversal before giving up.
    pub max_traversal_depth: usize,
    /// Drop tables left empty after a deleted entity was cleaned out of them.
    pub delete_empty_tables_on_cleanup: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 0,
            max_flush_iterations: 1024,
            max_traversal_depth: 64,
            delete_empty_tables_on_cleanup: true,
        }
    }
}

impl WorldConfig {
    #[must_use]
    pub fn with_entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_flush_iterations(mut self, passes: usize) -> Self {
        self.max_flush_iterations = passes;
        self
    }

    #[must_use]
    pub fn with_max_traversal_depth(mut self, depth: usize) -> Self {
        self.max_traversal_depth = depth;
        self
    }
}
