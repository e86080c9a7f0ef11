// Ranked provider selection
//
// Both the completion registry and the capability router pick "the best
// available" entry from a preference-ordered list. Instead of trying entries
// until one stops throwing, callers get a tagged result saying which entry was
// chosen and whether it substituted for the one they asked for.

/// Outcome of a ranked selection
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<T> {
    /// An available entry was found
    Found {
        /// Name of the selected entry
        name: String,
        /// The selected entry
        item: T,
        /// True when a specific entry was requested but another was chosen
        substituted: bool,
    },
    /// Nothing in the chain is available
    NotFound {
        /// The entry the caller asked for, if any
        requested: Option<String>,
    },
}

impl<T> Selection<T> {
    /// Convert into an Option, discarding provenance
    pub fn into_item(self) -> Option<T> {
        match self {
            Selection::Found { item, .. } => Some(item),
            Selection::NotFound { .. } => None,
        }
    }

    /// Name of the selected entry
    pub fn name(&self) -> Option<&str> {
        match self {
            Selection::Found { name, .. } => Some(name),
            Selection::NotFound { .. } => None,
        }
    }

    /// Whether an entry was found
    pub fn is_found(&self) -> bool {
        matches!(self, Selection::Found { .. })
    }
}

/// Preference-ordered list of named entries
///
/// # Example
///
/// ```
/// use orator_core::selection::RankedChain;
///
/// let mut chain = RankedChain::new();
/// chain.push("claude", false);
/// chain.push("openai", true);
///
/// // "claude" is unavailable, so the chain falls back to "openai"
/// let selection = chain.select(Some("claude"), |available| *available);
/// assert_eq!(selection.name(), Some("openai"));
/// ```
#[derive(Debug, Clone)]
pub struct RankedChain<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for RankedChain<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Clone> RankedChain<T> {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the lowest preference; replaces an entry with the same name in place
    pub fn push(&mut self, name: impl Into<String>, item: T) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = item;
        } else {
            self.entries.push((name, item));
        }
    }

    /// Move an entry to the front of the preference order
    ///
    /// Returns false if no entry has that name.
    pub fn prefer(&mut self, name: &str) -> bool {
        match self.entries.iter().position(|(n, _)| n == name) {
            Some(index) => {
                let entry = self.entries.remove(index);
                self.entries.insert(0, entry);
                true
            }
            None => false,
        }
    }

    /// Look up an entry by name
    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, item)| item)
    }

    /// Check if an entry with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entry names in preference order
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Select the requested entry if available, else the first available one
    pub fn select<F>(&self, requested: Option<&str>, is_available: F) -> Selection<T>
    where
        F: Fn(&T) -> bool,
    {
        if let Some(name) = requested {
            if let Some(item) = self.get(name).filter(|item| is_available(*item)) {
                return Selection::Found {
                    name: name.to_string(),
                    item: item.clone(),
                    substituted: false,
                };
            }
        }

        self.entries
            .iter()
            .find(|(_, item)| is_available(item))
            .map(|(name, item)| Selection::Found {
                name: name.clone(),
                item: item.clone(),
                substituted: requested.is_some(),
            })
            .unwrap_or_else(|| Selection::NotFound {
                requested: requested.map(str::to_string),
            })
    }
}
