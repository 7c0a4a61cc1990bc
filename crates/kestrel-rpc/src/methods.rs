//! Method catalogue for the core ↔ host protocol.
//!
//! Param and result structs use camelCase on the wire, matching the plugin
//! manifest format.

use std::path::PathBuf;

use kestrel_types::{LogLevel, PluginMetadata, Query, ResultPatch, RuntimeKind};
use serde::{Deserialize, Serialize};

/// Protocol revision sent in the `initialize` handshake
pub const PROTOCOL_VERSION: u32 = 1;

// Core -> host
pub const INITIALIZE: &str = "initialize";
pub const PING: &str = "ping";
pub const LOAD_PLUGIN: &str = "load_plugin";
pub const UNLOAD_PLUGIN: &str = "unload_plugin";
pub const INIT: &str = "init";
pub const QUERY: &str = "query";
pub const QUERY_FALLBACK: &str = "query_fallback";
pub const ACTION: &str = "action";
pub const SETTING_CHANGED: &str = "setting_changed";
pub const SHUTDOWN: &str = "shutdown";

// Host -> core
pub const LOG: &str = "log";
pub const GET_SETTING: &str = "get_setting";
pub const SAVE_SETTING: &str = "save_setting";
pub const CHANGE_QUERY: &str = "change_query";
pub const SHOW_APP: &str = "show_app";
pub const HIDE_APP: &str = "hide_app";
pub const TOGGLE_APP: &str = "toggle_app";
pub const NOTIFY: &str = "notify";
pub const UPDATE_RESULT: &str = "update_result";
pub const CHAT_STREAM: &str = "chat_stream";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: u32,
    pub runtime: RuntimeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: u32,
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub host_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPluginParams {
    pub plugin_id: String,
    pub directory: PathBuf,
    pub entry: String,
    pub metadata: PluginMetadata,
}

/// Params for calls that only name a plugin (`unload_plugin`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRef {
    pub plugin_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitParams {
    pub plugin_id: String,
    pub directory: PathBuf,
}

/// Params for `query` and `query_fallback`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub plugin_id: String,
    pub query: Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionParams {
    pub plugin_id: String,
    pub result_id: String,
    pub action_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingChangedParams {
    pub plugin_id: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogParams {
    pub plugin_id: String,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSettingParams {
    pub plugin_id: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSettingParams {
    pub plugin_id: String,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub is_platform_specific: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeQueryParams {
    pub plugin_id: String,
    pub query: Query,
}

/// Params for `show_app`, `hide_app` and `toggle_app`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppVisibilityParams {
    pub plugin_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyParams {
    pub plugin_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResultParams {
    pub plugin_id: String,
    pub patch: ResultPatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamParams {
    pub plugin_id: String,
    pub data: serde_json::Value,
}
