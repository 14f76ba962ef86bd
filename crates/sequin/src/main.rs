//! Chat with a text-generation backend from the terminal, keeping a
//! token-bounded context and a full transcript per named session.
//!
//! # Examples
//!
//! ```sh
//! # One question, answered in the default session
//! sequin sequin.json --input "What's the weather in Oslo?"
//!
//! # Interactive chat in a named session, archiving evicted messages
//! sequin sequin.json --session research --chat --memory
//!
//! # Talk to a local llama.cpp server
//! sequin local.json --chat --model mistral-7b-instruct
//!
//! # Housekeeping
//! sequin sequin.json --list
//! sequin sequin.json --delete research
//! ```

use clap::{ArgGroup, Parser};
use sequin::agent::mediator::{Mediator, RoundOutcome};
use sequin::agent::session::{Session, SessionDirectory, SessionStart};
use sequin::api::client::ChatClient;
use sequin::config::Config;
use sequin::context::archive::{Archive, JsonlArchive};
use sequin::error::MediatorError;
use sequin::functions::FunctionRegistry;
use sequin::{Message, Role};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Chat with a language model while keeping the conversation inside its
/// context window.
#[derive(Parser)]
#[command(name = "sequin", version)]
#[command(group(ArgGroup::new("mode").required(true).args(["input", "chat", "list", "delete"])))]
struct Cli {
    /// Path to the JSON configuration file
    config: PathBuf,

    /// Session name
    #[arg(short, long, default_value = "default")]
    session: String,

    /// Send one message and print the reply
    #[arg(short, long)]
    input: Option<String>,

    /// Start an interactive chat
    #[arg(short, long)]
    chat: bool,

    /// Archive evicted messages to <session>_archive.jsonl and, with functions
    /// enabled, offer the memory functions
    #[arg(short, long)]
    memory: bool,

    /// Override the configured model
    #[arg(long)]
    model: Option<String>,

    /// List stored sessions
    #[arg(long)]
    list: bool,

    /// Delete a stored session
    #[arg(long, value_name = "NAME")]
    delete: Option<String>,

    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(short, long)]
    verbose: bool,
}

// ── Helpers ────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_delta(delta: &str) {
    print!("{delta}");
    let _ = std::io::stdout().flush();
}

fn print_token_counts(session: &Session) {
    let (context, transcript) = session.token_counts();
    let budget = session.budget();
    eprintln!(
        "[tokens] context {context} (+{} offset) / {}, transcript {transcript}",
        budget.offset(),
        budget.upper_bound(),
    );
}

/// Print a stored conversation, skipping the system prompt.
fn replay(session: &Session) {
    for message in session.history().iter().filter(|m| !m.is_system()) {
        match (message.role(), message.call()) {
            (_, Some(call)) => println!("[call] {}({})", call.name, call.arguments),
            (Role::Function, None) => println!(
                "[{}] {}",
                message.name().unwrap_or("function"),
                message.content().unwrap_or_default()
            ),
            (role, None) => println!("{role}> {}", message.content().unwrap_or_default()),
        }
    }
}

fn save_or_report(session: &Session) {
    if let Err(e) = session.save() {
        eprintln!("error: {e}");
    }
}

enum Turn {
    Done,
    Interrupted,
}

/// One user message through the mediator, cancellable with Ctrl-C.
async fn turn(
    session: &mut Session,
    client: &ChatClient,
    mediator: &Mediator<'_>,
    text: &str,
) -> Turn {
    let mut on_delta = print_delta;
    print!("assistant> ");
    let _ = std::io::stdout().flush();

    let result = tokio::select! {
        r = mediator.respond(session, client, Message::user(text), &mut on_delta) => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };
    println!();

    match result {
        Some(Ok(RoundOutcome {
            admission, calls, ..
        })) => {
            for call in &calls {
                eprintln!(
                    "[function] {}({}) -> {} bytes",
                    call.name,
                    call.arguments,
                    call.result.len()
                );
            }
            if admission.is_rejected() {
                eprintln!(
                    "warning: reply was too large for the context and is kept in the transcript only"
                );
            }
            Turn::Done
        }
        Some(Err(e @ MediatorError::ChainLimit { .. })) => {
            eprintln!("error: {e}; the last request is kept in the conversation");
            Turn::Done
        }
        Some(Err(e)) => {
            eprintln!("error: {e}");
            Turn::Done
        }
        None => {
            eprintln!("interrupted");
            Turn::Interrupted
        }
    }
}

async fn chat_loop(session: &mut Session, client: &ChatClient, mediator: &Mediator<'_>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("user> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            l = lines.next_line() => l,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let text = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("error: failed to read input: {e}");
                break;
            }
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit" | "/exit" | "/quit") {
            break;
        }

        let outcome = turn(session, client, mediator, text).await;
        save_or_report(session);
        print_token_counts(session);
        if matches!(outcome, Turn::Interrupted) {
            break;
        }
    }
}

// ── Main ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    if let Some(model) = cli.model.as_deref() {
        config = config.with_model(model);
    }

    let sessions = SessionDirectory::new(&config.sessions_dir);

    if cli.list {
        match sessions.list() {
            Ok(names) if names.is_empty() => {
                eprintln!("no sessions in {}", sessions.dir().display())
            }
            Ok(names) => names.iter().for_each(|n| println!("{n}")),
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        }
        return;
    }
    if let Some(name) = cli.delete.as_deref() {
        match sessions.delete(name) {
            Ok(true) => eprintln!("deleted session {name}"),
            Ok(false) => eprintln!("no session named {name}"),
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let oracle = config.context.tokenizer.build(&config.provider.model);
    let archive: Option<Box<dyn Archive>> = cli.memory.then(|| {
        Box::new(JsonlArchive::new(sessions.archive_path(&cli.session), &cli.session))
            as Box<dyn Archive>
    });

    let mut session = match Session::open(&cli.session, &config, oracle, archive) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    let start = match session.load(Message::system(&config.system_prompt)) {
        Ok(start) => start,
        Err(e) => {
            eprintln!("warning: {e}");
            SessionStart::Created
        }
    };

    let registry = if config.functions.enabled {
        let registry = FunctionRegistry::new()
            .with_timeout(Some(Duration::from_secs(config.provider.timeout_secs)))
            .with_builtin_functions(&config.functions.workdir);
        if cli.memory {
            registry.with_memory_functions(
                sessions.memory_path(&cli.session),
                Some(JsonlArchive::new(sessions.archive_path(&cli.session), &cli.session)),
            )
        } else {
            registry
        }
    } else {
        FunctionRegistry::new()
    };
    let client = match ChatClient::from_config(&config) {
        Ok(c) => c.with_functions(registry.definitions()),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    let max_chain = if config.functions.enabled {
        config.functions.max_chain
    } else {
        0
    };
    let mediator = Mediator::new(&registry, max_chain);

    if let Some(text) = cli.input.as_deref() {
        turn(&mut session, &client, &mediator, text).await;
        save_or_report(&session);
        return;
    }

    if let SessionStart::Resumed { .. } = start {
        replay(&session);
    }
    print_token_counts(&session);
    chat_loop(&mut session, &client, &mediator).await;
    save_or_report(&session);
}
