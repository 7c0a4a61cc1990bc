//! Handlers for calls a host makes back into the core.
//!
//! Every call names the plugin it acts for. Calls naming a plugin the host
//! does not carry are rejected with `PLUGIN_NOT_FOUND`.

use std::sync::{Arc, Weak};

use kestrel_rpc::methods::{
    self, AppVisibilityParams, ChangeQueryParams, ChatStreamParams, GetSettingParams, LogParams,
    NotifyParams, SaveSettingParams, UpdateResultParams,
};
use kestrel_rpc::{HandlerMap, RpcError, handler_fn, parse_params};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::HostProcess;
use crate::plugin::PluginApi;

/// Methods served to hosts, advertised during the handshake
pub(crate) const METHODS: &[&str] = &[
    methods::LOG,
    methods::GET_SETTING,
    methods::SAVE_SETTING,
    methods::CHANGE_QUERY,
    methods::SHOW_APP,
    methods::HIDE_APP,
    methods::TOGGLE_APP,
    methods::NOTIFY,
    methods::UPDATE_RESULT,
    methods::CHAT_STREAM,
];

trait ForPlugin {
    fn plugin_id(&self) -> &str;
}

macro_rules! for_plugin {
    ($($ty:ty),* $(,)?) => {
        $(impl ForPlugin for $ty {
            fn plugin_id(&self) -> &str {
                &self.plugin_id
            }
        })*
    };
}

for_plugin!(
    LogParams,
    GetSettingParams,
    SaveSettingParams,
    ChangeQueryParams,
    AppVisibilityParams,
    NotifyParams,
    UpdateResultParams,
    ChatStreamParams,
);

fn resolve(host: &Weak<HostProcess>, plugin_id: &str) -> Result<PluginApi, RpcError> {
    let host = host
        .upgrade()
        .ok_or_else(|| RpcError::host_unavailable("host is shutting down"))?;
    host.plugin_api(plugin_id)
        .ok_or_else(|| RpcError::plugin_not_found(plugin_id))
}

fn route<P, F>(map: &HandlerMap, host: &Weak<HostProcess>, method: &'static str, f: F)
where
    P: DeserializeOwned + ForPlugin + Send + 'static,
    F: Fn(&PluginApi, P) -> Result<Value, RpcError> + Send + Sync + 'static,
{
    let host = host.clone();
    let f = Arc::new(f);
    map.on_call(
        method,
        handler_fn(move |params| {
            let host = host.clone();
            let f = Arc::clone(&f);
            async move {
                let params: P = parse_params(params)?;
                let api = resolve(&host, params.plugin_id())?;
                f(&api, params)
            }
        }),
    );
}

pub(crate) fn handlers(host: Weak<HostProcess>) -> HandlerMap {
    let map = HandlerMap::new();

    route(&map, &host, methods::LOG, |api, p: LogParams| {
        api.log(p.level, &p.message);
        Ok(Value::Null)
    });
    route(&map, &host, methods::GET_SETTING, |api, p: GetSettingParams| {
        Ok(api.get_setting(&p.key).map_or(Value::Null, Value::String))
    });
    route(&map, &host, methods::SAVE_SETTING, |api, p: SaveSettingParams| {
        api.save_setting(&p.key, &p.value, p.is_platform_specific)?;
        Ok(Value::Null)
    });
    route(&map, &host, methods::CHANGE_QUERY, |api, p: ChangeQueryParams| {
        api.change_query(p.query);
        Ok(Value::Null)
    });
    route(&map, &host, methods::SHOW_APP, |api, _: AppVisibilityParams| {
        api.show_app();
        Ok(Value::Null)
    });
    route(&map, &host, methods::HIDE_APP, |api, _: AppVisibilityParams| {
        api.hide_app();
        Ok(Value::Null)
    });
    route(&map, &host, methods::TOGGLE_APP, |api, _: AppVisibilityParams| {
        api.toggle_app();
        Ok(Value::Null)
    });
    route(&map, &host, methods::NOTIFY, |api, p: NotifyParams| {
        api.notify(&p.title, &p.description);
        Ok(Value::Null)
    });
    route(&map, &host, methods::UPDATE_RESULT, |api, p: UpdateResultParams| {
        Ok(Value::Bool(api.update_result(p.patch)))
    });
    route(&map, &host, methods::CHAT_STREAM, |api, p: ChatStreamParams| {
        api.chat_stream(p.data);
        Ok(Value::Null)
    });

    map
}
