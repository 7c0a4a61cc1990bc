//! Shared types for Kestrel plugin runtime components.
//!
//! This crate provides the data model used across kestrel-rpc, kestrel-core
//! and kestrel-daemon. All types are serializable for RPC transport.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Trigger keyword that routes every query to a plugin
pub const GLOBAL_TRIGGER_KEYWORD: &str = "*";

/// Deserialize a Vec that may be null or missing (both become empty vec)
fn deserialize_null_as_empty_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Language runtime a plugin is executed by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Compiled into the core, called in-process
    #[default]
    Native,
    /// Hosted by the Python host process
    Python,
    /// Hosted by the Node.js host process
    Nodejs,
}

impl RuntimeKind {
    /// Whether plugins of this kind live in an out-of-process host
    #[must_use]
    pub fn is_host(self) -> bool {
        !matches!(self, RuntimeKind::Native)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeKind::Native => "native",
            RuntimeKind::Python => "python",
            RuntimeKind::Nodejs => "nodejs",
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(RuntimeKind::Native),
            "python" => Ok(RuntimeKind::Python),
            "nodejs" | "node" => Ok(RuntimeKind::Nodejs),
            other => Err(format!("Unknown runtime: {other}")),
        }
    }
}

/// Feature flags a plugin can declare in its metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureName {
    /// Results keep the plugin's own emission order instead of being score-sorted
    IgnoreAutoScore,
    /// Plugin talks to AI providers
    Ai,
    /// Plugin accepts selection queries (text/files selected in the OS)
    QuerySelection,
    /// Plugin asks for a custom preview panel width
    ResultPreviewWidthRatio,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFeature {
    pub name: FeatureName,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
}

impl MetadataFeature {
    #[must_use]
    pub fn new(name: FeatureName) -> Self {
        Self {
            name,
            params: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataCommand {
    pub command: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    Head,
    Textbox,
    Checkbox,
    Select,
    Label,
    Newline,
    Table,
}

/// Declared setting in a plugin's schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingDefinition {
    #[serde(rename = "type")]
    pub kind: SettingKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Value is stored per operating system instead of shared
    #[serde(default)]
    pub is_platform_specific: bool,
}

/// Immutable plugin descriptor, read from `plugin.json` or supplied by a native plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    #[serde(default)]
    pub runtime: RuntimeKind,
    /// Entry file inside the plugin directory (host plugins only)
    #[serde(default)]
    pub entry: String,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub trigger_keywords: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub commands: Vec<MetadataCommand>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub supported_os: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub setting_definitions: Vec<SettingDefinition>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub features: Vec<MetadataFeature>,
}

impl PluginMetadata {
    /// Minimal metadata, mostly useful for native plugins and tests
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, runtime: RuntimeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            author: String::new(),
            version: String::new(),
            min_version: None,
            description: String::new(),
            icon: None,
            runtime,
            entry: String::new(),
            trigger_keywords: Vec::new(),
            commands: Vec::new(),
            supported_os: Vec::new(),
            setting_definitions: Vec::new(),
            features: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_trigger_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_feature(mut self, name: FeatureName) -> Self {
        self.features.push(MetadataFeature::new(name));
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(MetadataCommand {
            command: command.into(),
            description: String::new(),
        });
        self
    }

    #[must_use]
    pub fn has_feature(&self, name: FeatureName) -> bool {
        self.features.iter().any(|f| f.name == name)
    }

    #[must_use]
    pub fn has_command(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c.command == command)
    }

    #[must_use]
    pub fn setting_definition(&self, key: &str) -> Option<&SettingDefinition> {
        self.setting_definitions
            .iter()
            .find(|d| d.key.as_deref() == Some(key))
    }
}

/// Mutable per-plugin settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSettings {
    #[serde(default)]
    pub disabled: bool,
    /// User override of the metadata trigger keywords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_keywords: Option<Vec<String>>,
    #[serde(default)]
    pub values: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    Input,
    Selection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    #[default]
    Text,
    File,
}

/// Active OS selection attached to a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(rename = "type")]
    pub kind: SelectionKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_paths: Vec<PathBuf>,
}

/// Parsed user query, immutable once dispatched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default)]
    pub query_type: QueryType,
    pub raw_query: String,
    #[serde(default)]
    pub trigger_keyword: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub search: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl Query {
    /// Unparsed input query: no keyword, the whole text is the search
    #[must_use]
    pub fn plain(raw: impl Into<String>) -> Self {
        let raw_query = raw.into();
        Self {
            query_type: QueryType::Input,
            search: raw_query.clone(),
            raw_query,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn has_trigger_keyword(&self) -> bool {
        !self.trigger_keyword.is_empty()
    }

    /// The view a global plugin receives: keyword and command stripped
    #[must_use]
    pub fn global_view(&self) -> Self {
        Self {
            query_type: self.query_type,
            raw_query: self.raw_query.clone(),
            trigger_keyword: String::new(),
            command: String::new(),
            search: self.raw_query.clone(),
            selection: self.selection.clone(),
        }
    }
}

/// Icon reference (wire format is `{"type": ..., "value": ...}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Icon {
    Material(String),
    Path(PathBuf),
    Url(String),
    Svg(String),
    Emoji(String),
    Base64(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewType {
    #[default]
    Text,
    Markdown,
    Image,
    Url,
    File,
    Chat,
    Remote,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollPosition {
    #[default]
    Top,
    Bottom,
}

/// Preview panel payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub preview_type: PreviewType,
    #[serde(default)]
    pub preview_data: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub preview_properties: HashMap<String, String>,
    #[serde(default)]
    pub scroll_position: ScrollPosition,
}

/// Action attached to a result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultAction {
    /// Identifier the owning plugin uses to resolve the action
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    /// UI must stay open after the action runs
    #[serde(default)]
    pub prevent_hide_after_action: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotkey: Option<String>,
}

impl ResultAction {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn keep_open(mut self) -> Self {
        self.prevent_hide_after_action = true;
        self
    }
}

/// A single candidate returned by a plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Empty ids are filled in by the ranker
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, rename = "subTitle")]
    pub subtitle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub group_score: i64,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_vec")]
    pub actions: Vec<ResultAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
    /// Opaque data echoed back to the plugin on action invocation
    #[serde(default)]
    pub context_data: String,
}

impl QueryResult {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: i64) -> Self {
        self.score = score;
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>, group_score: i64) -> Self {
        self.group = group.into();
        self.group_score = group_score;
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: ResultAction) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn with_context_data(mut self, context_data: impl Into<String>) -> Self {
        self.context_data = context_data.into();
        self
    }

    /// The action used when the caller names none: the default one, else the first
    #[must_use]
    pub fn default_action(&self) -> Option<&ResultAction> {
        self.actions
            .iter()
            .find(|a| a.is_default)
            .or_else(|| self.actions.first())
    }
}

/// Result as handed to the UI after ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    pub plugin_id: String,
    #[serde(default)]
    pub is_fallback: bool,
    #[serde(flatten)]
    pub result: QueryResult,
    /// Id the plugin issued. Differs from `result.id` when ranking had to
    /// reassign a duplicate.
    #[serde(skip)]
    pub source_id: String,
}

impl RankedResult {
    #[must_use]
    pub fn new(plugin_id: impl Into<String>, result: QueryResult) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            is_fallback: false,
            source_id: result.id.clone(),
            result,
        }
    }
}

/// Partial update to a result - only specified fields are updated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPatch {
    /// ID of the result to update (required)
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, rename = "subTitle", skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ResultAction>>,
}

impl ResultPatch {
    /// Apply the set fields onto a result
    pub fn apply(&self, result: &mut QueryResult) {
        if let Some(title) = &self.title {
            result.title.clone_from(title);
        }
        if let Some(subtitle) = &self.subtitle {
            result.subtitle.clone_from(subtitle);
        }
        if let Some(icon) = &self.icon {
            result.icon = Some(icon.clone());
        }
        if let Some(preview) = &self.preview {
            result.preview = Some(preview.clone());
        }
        if let Some(actions) = &self.actions {
            result.actions.clone_from(actions);
        }
    }
}

/// Data passed to a plugin when one of its actions runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
    pub result_id: String,
    pub action_id: String,
    #[serde(default)]
    pub context_data: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

/// Updates sent from the runtime to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiUpdate {
    /// Ranked results for one query generation (full replacement)
    Results {
        session: String,
        generation: u64,
        results: Vec<RankedResult>,
    },

    /// In-place update of a previously shown result
    ResultUpdated { patch: ResultPatch },

    /// Replace the text in the query box
    ChangeQuery { query: Query },

    ShowApp,

    HideApp,

    ToggleApp,

    /// Non-fatal user notification
    Notify {
        title: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,
    },

    /// Incremental chat/stream data from a plugin
    ChatResponse {
        plugin_id: String,
        data: serde_json::Value,
    },
}
