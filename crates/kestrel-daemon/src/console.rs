//! Line-oriented console that drives the runtime from stdin.
//!
//! Plain lines are typed input and go straight to the query pipeline. Lines
//! starting with `/` are commands (`/help` lists them).

use std::fmt::Write as _;
use std::sync::Arc;

use kestrel_core::Runtime;
use kestrel_types::{RankedResult, Selection, SelectionKind, UiUpdate};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

/// The console is a single input box
pub const SESSION: &str = "console";

const HELP: &str = "\
<text>                      query (e.g. `shop shoes`)
/sel <text>                 offer text as an OS selection
/act <result-id> [action]   run a result's action (default action if omitted)
/enable <plugin>            enable a plugin
/disable <plugin>           disable a plugin
/set <plugin> <key> <value> change a plugin setting
/plugins                    list registered plugins
/hosts                      show plugin host status
/close                      forget this session's results
/help                       this text
/quit                       shut down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Query(String),
    Select(String),
    Action {
        result_id: String,
        action_id: Option<String>,
    },
    Enable(String),
    Disable(String),
    Set {
        plugin_id: String,
        key: String,
        value: String,
    },
    Plugins,
    Hosts,
    Close,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command '/{0}', try /help")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parse one console line. Typed input keeps its spacing since a trailing
/// space after a keyword is meaningful.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Command::Query(line.to_string()));
    };

    let (name, rest) = command
        .trim_start()
        .split_once(' ')
        .map_or((command.trim(), ""), |(n, r)| (n, r.trim()));
    let args: Vec<&str> = rest.split_whitespace().collect();

    match name {
        "sel" | "select" if !rest.is_empty() => Ok(Command::Select(rest.to_string())),
        "sel" | "select" => Err(ParseError::Usage("/sel <text>")),
        "act" | "action" => match args.as_slice() {
            [result_id] => Ok(Command::Action {
                result_id: (*result_id).to_string(),
                action_id: None,
            }),
            [result_id, action_id] => Ok(Command::Action {
                result_id: (*result_id).to_string(),
                action_id: Some((*action_id).to_string()),
            }),
            _ => Err(ParseError::Usage("/act <result-id> [action-id]")),
        },
        "enable" => match args.as_slice() {
            [id] => Ok(Command::Enable((*id).to_string())),
            _ => Err(ParseError::Usage("/enable <plugin>")),
        },
        "disable" => match args.as_slice() {
            [id] => Ok(Command::Disable((*id).to_string())),
            _ => Err(ParseError::Usage("/disable <plugin>")),
        },
        "set" => {
            let mut parts = rest.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(plugin_id), Some(key), Some(value))
                    if !plugin_id.is_empty() && !key.is_empty() =>
                {
                    Ok(Command::Set {
                        plugin_id: plugin_id.to_string(),
                        key: key.to_string(),
                        value: value.to_string(),
                    })
                }
                _ => Err(ParseError::Usage("/set <plugin> <key> <value>")),
            }
        }
        "plugins" => Ok(Command::Plugins),
        "hosts" => Ok(Command::Hosts),
        "close" => Ok(Command::Close),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

/// Read stdin until EOF, `/quit` or Ctrl-C, printing UI updates as they come.
pub async fn run(runtime: Arc<Runtime>, mut updates: UnboundedReceiver<UiUpdate>) {
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            println!("{}", render(&update));
        }
    });

    println!("kestrel console - type to search, /help for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        match parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => execute(&runtime, command).await,
            Err(e) => println!("{e}"),
        }
    }

    runtime.shutdown().await;
    printer.abort();
}

async fn execute(runtime: &Arc<Runtime>, command: Command) {
    match command {
        // Queries run detached so newer input can supersede them
        Command::Query(text) => {
            let runtime = Arc::clone(runtime);
            tokio::spawn(async move {
                if runtime.query(SESSION, &text).await.is_none() {
                    debug!("Query '{}' was superseded", text);
                }
            });
        }
        Command::Select(text) => {
            let runtime = Arc::clone(runtime);
            tokio::spawn(async move {
                let selection = Selection {
                    kind: SelectionKind::Text,
                    text,
                    file_paths: Vec::new(),
                };
                runtime.query_selection(SESSION, selection).await;
            });
        }
        Command::Action {
            result_id,
            action_id,
        } => {
            // Failures already reach the user as a notification
            if let Ok(outcome) = runtime
                .invoke_action(SESSION, &result_id, action_id.as_deref())
                .await
            {
                println!("ran {}/{}", outcome.plugin_id, outcome.action_id);
            } else {
                debug!("Action on {} did not complete", result_id);
            }
        }
        Command::Enable(id) => report(runtime.set_enabled(&id, true)),
        Command::Disable(id) => report(runtime.set_enabled(&id, false)),
        Command::Set {
            plugin_id,
            key,
            value,
        } => report(runtime.update_setting(&plugin_id, &key, &value).await),
        Command::Plugins => print!("{}", render_plugins(runtime)),
        Command::Hosts => print!("{}", render_hosts(runtime)),
        Command::Close => runtime.close_session(SESSION),
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

fn report(result: kestrel_core::Result<()>) {
    match result {
        Ok(()) => println!("ok"),
        Err(e) => println!("error: {e}"),
    }
}

fn render_result(out: &mut String, ranked: &RankedResult) {
    let r = &ranked.result;
    let _ = write!(out, "  [{}] {}", r.id, r.title);
    if !r.subtitle.is_empty() {
        let _ = write!(out, " - {}", r.subtitle);
    }
    let _ = write!(out, "  ({}, score {}", ranked.plugin_id, r.score);
    if !r.group.is_empty() {
        let _ = write!(out, ", group {}", r.group);
    }
    if ranked.is_fallback {
        out.push_str(", fallback");
    }
    out.push(')');
    let actions: Vec<&str> = r.actions.iter().map(|a| a.id.as_str()).collect();
    if !actions.is_empty() {
        let _ = write!(out, " actions: {}", actions.join(","));
    }
}

/// Human-readable form of one UI update
pub fn render(update: &UiUpdate) -> String {
    match update {
        UiUpdate::Results {
            session,
            generation,
            results,
        } => {
            let mut out = format!("-- {session} #{generation}: {} result(s)", results.len());
            for ranked in results {
                out.push('\n');
                render_result(&mut out, ranked);
            }
            out
        }
        UiUpdate::ResultUpdated { patch } => match &patch.title {
            Some(title) => format!("~ [{}] {}", patch.id, title),
            None => format!("~ [{}] updated", patch.id),
        },
        UiUpdate::ChangeQuery { query } => format!("> {}", query.raw_query),
        UiUpdate::ShowApp => "(show)".to_string(),
        UiUpdate::HideApp => "(hide)".to_string(),
        UiUpdate::ToggleApp => "(toggle)".to_string(),
        UiUpdate::Notify { title, description } if description.is_empty() => {
            format!("! {title}")
        }
        UiUpdate::Notify { title, description } => format!("! {title}: {description}"),
        UiUpdate::ChatResponse { plugin_id, data } => format!("{plugin_id}> {data}"),
    }
}

fn render_plugins(runtime: &Runtime) -> String {
    let mut out = String::new();
    for plugin in runtime.registry().all() {
        let _ = writeln!(
            out,
            "{:<20} {:<8} {:<9} {}",
            plugin.id(),
            plugin.metadata().runtime,
            if plugin.is_enabled() { "enabled" } else { "disabled" },
            plugin.trigger_keywords().join(" ")
        );
    }
    if out.is_empty() {
        out.push_str("no plugins registered\n");
    }
    out
}

fn render_hosts(runtime: &Runtime) -> String {
    let mut out = String::new();
    for host in runtime.host_snapshots() {
        let seen = host.last_seen_alive.map_or_else(
            || "never".to_string(),
            |t| {
                t.with_timezone(&chrono::Local)
                    .format("%H:%M:%S")
                    .to_string()
            },
        );
        let _ = writeln!(
            out,
            "{:<8} {:<10} restarts {:<3} seen {:<8} plugins: {}",
            host.runtime,
            host.state,
            host.restart_count,
            seen,
            host.hosted_plugins.join(", ")
        );
    }
    if out.is_empty() {
        out.push_str("no hosts started\n");
    }
    out
}
