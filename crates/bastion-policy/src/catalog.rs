use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Static facts about an action name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    /// Upstream provider the action calls out to, if any.
    #[serde(default)]
    pub provider: Option<String>,
    /// Dangerous actions are always routed through the license gate.
    #[serde(default)]
    pub dangerous: bool,
    /// Runs without a human in the loop.
    #[serde(default)]
    pub autonomous: bool,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self
    }

    pub fn autonomous(mut self) -> Self {
        self.autonomous = true;
        self
    }
}

/// Registry of known actions. Unknown actions have no provider and are not
/// dangerous.
#[derive(Clone, Debug, Default)]
pub struct ActionCatalog {
    actions: HashMap<String, ActionSpec>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = ActionSpec>) -> Self {
        let mut catalog = Self::new();
        for spec in specs {
            catalog.register(spec);
        }
        catalog
    }

    pub fn register(&mut self, spec: ActionSpec) {
        self.actions.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, action: &str) -> Option<&ActionSpec> {
        self.actions.get(action)
    }

    pub fn provider_of(&self, action: &str) -> Option<&str> {
        self.get(action).and_then(|s| s.provider.as_deref())
    }

    pub fn is_dangerous(&self, action: &str) -> bool {
        self.get(action).is_some_and(|s| s.dangerous)
    }

    pub fn is_autonomous(&self, action: &str) -> bool {
        self.get(action).is_some_and(|s| s.autonomous)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
