use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// How merged sections are turned back into a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOptions {
    pub include_version: bool,
    pub include_precisions: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            include_version: true,
            include_precisions: true,
        }
    }
}

/// Host engine settings the compiler consults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub name: String,
    /// Identifiers the engine binds itself (`modelMatrix`, `position`, ...);
    /// never mangled.
    #[serde(default)]
    pub preserve: HashSet<String>,
    /// Object-like macros seeded into the preprocessor.
    #[serde(default)]
    pub defines: HashMap<String, String>,
    #[serde(default)]
    pub merge_options: MergeOptions,
}

impl EngineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_preserved<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preserve.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }

    pub fn with_merge_options(mut self, merge_options: MergeOptions) -> Self {
        self.merge_options = merge_options;
        self
    }

    /// Stable text of the settings that change how a node is prepared.
    pub(crate) fn preparation_key(&self) -> String {
        let mut preserve: Vec<&str> = self.preserve.iter().map(String::as_str).collect();
        preserve.sort_unstable();
        let mut defines: Vec<(&str, &str)> = self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        defines.sort_unstable();
        format!("{preserve:?}{defines:?}")
    }
}
