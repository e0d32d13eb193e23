//! `mws`: command-line front end for the mwsession engine.
//!
//! Every subcommand logs in first, runs one operation, prints the result
//! as JSON (or a plain table for `namespaces`) and logs out.
//!
//! - **`whoami`**: identity, groups, rights and query limit.
//! - **`namespaces`**: the namespace table.
//! - **`tokens`**: the cached action tokens.
//! - **`recent-changes`** / **`logs`**: the typed list builders.
//! - **`list`**: any list module, with raw parameters.
//! - **`purge`**: purge pages from the server cache.
//!
//! Connection settings come from flags or the `MWS_*` environment
//! variables documented on `SessionConfig`.

use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use mwsession::{
    Direction, Error, ListQuery, LogEvents, RecentChanges, Session, SessionConfig, TokenVariant,
};
use mwsession_http::HttpTransport;
use serde_json::{json, Value};

/// mws: log in to a MediaWiki site and run paginated queries.
#[derive(Parser)]
#[command(name = "mws", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Connection {
    /// URL of the wiki's api.php.
    #[arg(long, env = "MWS_BASE_URL", global = true)]
    api: Option<String>,

    /// Account to log in as.
    #[arg(long, env = "MWS_USERNAME", global = true)]
    user: Option<String>,

    /// Password or bot password.
    #[arg(long, env = "MWS_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Replication lag ceiling in seconds; 0 disables.
    #[arg(long, env = "MWS_MAXLAG", global = true)]
    maxlag: Option<u32>,

    /// Log every request URL at info level.
    #[arg(long, global = true)]
    echo: bool,

    /// Skip the pre-login version check.
    #[arg(long, global = true)]
    no_version_check: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show who the session is logged in as.
    Whoami,

    /// Print the namespace table: id, name, and whether subpages are allowed.
    Namespaces {
        /// Fetch the table even if it is cached.
        #[arg(long)]
        refresh: bool,
    },

    /// Print the session's action tokens.
    Tokens {
        /// Also fetch the rollback token.
        #[arg(long)]
        rollback: bool,
    },

    /// List recent changes.
    RecentChanges {
        /// Namespace id to include. Repeat for several; defaults to 0.
        #[arg(long = "namespace", value_name = "ID")]
        namespaces: Vec<i64>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        exclude_user: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        /// Timestamp to start enumerating from.
        #[arg(long)]
        start: Option<String>,
        /// Timestamp to stop enumerating at.
        #[arg(long)]
        end: Option<String>,
        /// Oldest first instead of newest first.
        #[arg(long)]
        newer: bool,
        /// Only minor (true) or only non-minor (false) edits.
        #[arg(long, value_name = "BOOL")]
        minor: Option<bool>,
        /// Only bot (true) or only non-bot (false) edits.
        #[arg(long, value_name = "BOOL")]
        bot: Option<bool>,
        /// Only anonymous (true) or only logged-in (false) edits.
        #[arg(long, value_name = "BOOL")]
        anon: Option<bool>,
        /// Maximum number of rows.
        #[arg(long, value_name = "N")]
        limit: Option<String>,
    },

    /// List log events.
    Logs {
        /// Log type, e.g. block or delete. Repeat for several.
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        newer: bool,
        #[arg(long, value_name = "N")]
        limit: Option<String>,
    },

    /// Run any list module to completion.
    ///
    /// Examples:
    ///   mws list categorymembers --param cmtitle=Category:Physics --hoist title
    ///   mws list mylist --prefix ml --limit 100
    List {
        /// The list module, e.g. allpages.
        list: String,
        /// Two-letter parameter prefix; required for unknown modules.
        #[arg(long)]
        prefix: Option<String>,
        /// Extra parameter as KEY=VALUE. Repeat for several.
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        #[arg(long, value_name = "N")]
        limit: Option<String>,
        /// Print only this field of each row.
        #[arg(long, value_name = "FIELD")]
        hoist: Option<String>,
    },

    /// Purge pages from the server-side cache.
    Purge {
        #[arg(required = true)]
        titles: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mwsession=info,mws=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli.connection);
    let transport = HttpTransport::new(&config)
        .unwrap_or_else(|e| fatal(&e.to_string()));
    let mut session = Session::login(config, Arc::new(transport))
        .unwrap_or_else(|e| fatal(&format!("login failed: {e}")));

    let output = session
        .run_then_logout(|session| run(session, cli.command))
        .unwrap_or_else(|e| fatal(&e.to_string()));
    if let Some(value) = output {
        println!("{}", pretty(&value));
    }
}

/// Execute one subcommand. Returns the JSON to print, if any.
fn run(session: &mut Session, command: Command) -> mwsession::Result<Option<Value>> {
    match command {
        Command::Whoami => Ok(Some(json!({
            "username": session.username(),
            "bot": session.is_bot(),
            "groups": session.groups(),
            "rights": session.rights(),
            "query_limit": session.query_limit(),
            "version": session.site().map(|s| s.version.clone()),
        }))),

        Command::Namespaces { refresh } => {
            for ns in session.namespaces(refresh)?.values() {
                let subpages = if ns.allows_subpages { "subpages" } else { "" };
                println!("{}\t{}\t{}", ns.id, ns.name, subpages);
            }
            Ok(None)
        }

        Command::Tokens { rollback } => {
            if rollback {
                session.token("rollback", false, TokenVariant::Rollback)?;
            }
            let tokens: serde_json::Map<String, Value> = session
                .tokens()
                .iter()
                .map(|(action, token)| (action.to_string(), json!(token)))
                .collect();
            Ok(Some(Value::Object(tokens)))
        }

        Command::RecentChanges {
            namespaces,
            user,
            exclude_user,
            tag,
            start,
            end,
            newer,
            minor,
            bot,
            anon,
            limit,
        } => {
            let mut request = RecentChanges {
                user,
                exclude_user,
                tag,
                start,
                end,
                dir: direction(newer),
                minor,
                bot,
                anon,
                limit: parse_limit(limit.as_deref())?,
                ..RecentChanges::default()
            };
            if !namespaces.is_empty() {
                request.namespaces = namespaces;
            }
            Ok(Some(Value::Array(session.recent_changes(&request)?)))
        }

        Command::Logs {
            types,
            user,
            title,
            newer,
            limit,
        } => {
            let request = LogEvents {
                types,
                user,
                title,
                dir: direction(newer),
                limit: parse_limit(limit.as_deref())?,
                ..LogEvents::default()
            };
            Ok(Some(Value::Array(session.log_events(&request)?)))
        }

        Command::List {
            list,
            prefix,
            params,
            limit,
            hoist,
        } => {
            let mut query = match prefix {
                Some(prefix) => ListQuery::with_prefix(&list, &prefix)?,
                None => ListQuery::new(&list)?,
            };
            for raw in &params {
                let (key, value) = raw.split_once('=').ok_or_else(|| {
                    Error::InvalidArgument(format!("--param {raw:?}: expected KEY=VALUE"))
                })?;
                query = query.param(key, value);
            }
            if let Some(limit) = parse_limit(limit.as_deref())? {
                query = query.limit(limit);
            }
            if let Some(field) = hoist {
                query = query.hoist(field);
            }
            Ok(Some(Value::Array(session.paginate(&query)?)))
        }

        Command::Purge { titles } => Ok(Some(session.purge(titles)?)),
    }
}

fn build_config(connection: &Connection) -> SessionConfig {
    // Flags win; anything not given on the command line falls back to the
    // environment.
    let lookup = |key: &str| -> Option<String> {
        let flag = match key {
            "MWS_BASE_URL" => connection.api.clone(),
            "MWS_USERNAME" => connection.user.clone(),
            "MWS_PASSWORD" => connection.password.clone(),
            "MWS_MAXLAG" => connection.maxlag.map(|m| m.to_string()),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    };
    let mut config = SessionConfig::from_lookup(lookup).unwrap_or_else(|e| fatal(&e.to_string()));
    if connection.echo {
        config.http_echo = true;
    }
    if connection.no_version_check {
        config.check_version = false;
    }
    config
}

fn direction(newer: bool) -> Direction {
    if newer {
        Direction::Newer
    } else {
        Direction::Older
    }
}

fn parse_limit(raw: Option<&str>) -> mwsession::Result<Option<i64>> {
    raw.map(ListQuery::parse_limit).transpose()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| fatal(&format!("failed to encode output: {e}")))
}

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("mws: {msg}");
    process::exit(2);
}
