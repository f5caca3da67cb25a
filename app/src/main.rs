use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lexis::{format_sources, format_turn, Lexis, TerminalPrinter};
use lexis_core::{
    telemetry, AskOutcome, AuthScheme, ChatSession, ClientSettings, ConfigError, Transcript,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "lexis", version, about = "Ask the Lexis legal assistant from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Overrides LEXIS_API_URL and lexis.yaml.
    #[arg(long, global = true)]
    api_url: Option<Url>,
    /// `cookie` or `bearer`.
    #[arg(long, global = true)]
    scheme: Option<AuthScheme>,
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with a Google ID token.
    Login {
        #[arg(long)]
        credential: String,
    },
    Logout,
    /// Show the signed-in user.
    Whoami,
    /// Ask a single question.
    Ask {
        #[arg(required = true)]
        question: Vec<String>,
        /// Wait for the whole answer instead of streaming it.
        #[arg(long)]
        no_stream: bool,
    },
    /// Interactive conversation.
    Chat {
        /// Sign in first when no session is stored.
        #[arg(long)]
        credential: Option<String>,
    },
}

fn main() -> Result<()> {
    telemetry::init_tracing(telemetry::default_filter())?;
    let cli = Cli::parse();

    let settings = resolve_settings(&cli).map_err(|err| {
        tracing::error!(%err, "invalid configuration");
        anyhow::anyhow!(err.user_message())
    })?;
    let runtime = Runtime::new()?;
    runtime.block_on(run(cli.command, settings))
}

fn resolve_settings(cli: &Cli) -> Result<ClientSettings, ConfigError> {
    let mut settings = ClientSettings::load()?;
    if let Some(url) = &cli.api_url {
        settings.api_base_url = url.clone();
    }
    if let Some(scheme) = cli.scheme {
        settings.auth_scheme = scheme;
    }
    if let Some(dir) = &cli.data_dir {
        settings.data_dir = dir.clone();
    }
    Ok(settings)
}

async fn run(command: Command, settings: ClientSettings) -> Result<()> {
    tracing::debug!(api = %settings.api_base_url, scheme = ?settings.auth_scheme, "starting");
    let lexis = Lexis::connect(&settings)?;

    match command {
        Command::Login { credential } => {
            let user = lexis.auth().login_google(&credential).await?;
            println!("Signed in as {} <{}>", user.display_name(), user.email);
        }
        Command::Logout => {
            lexis.auth().logout().await;
            println!("Signed out.");
        }
        Command::Whoami => {
            let user = lexis.require_user()?;
            println!("{} <{}>", user.display_name(), user.email);
        }
        Command::Ask {
            question,
            no_stream,
        } => {
            lexis.require_user()?;
            let question = question.join(" ");
            if no_stream {
                let reply = lexis.client().send_message(&question).await?;
                println!("{}", reply.answer);
                if !reply.sources.is_empty() {
                    println!("{}", format_sources(&reply.sources));
                }
            } else {
                let chat = ChatSession::new(lexis.consumer(), Transcript::new());
                let outcome = stream_answer(&chat, &question).await?;
                if let Some(AskOutcome::ErroredExplicit(_) | AskOutcome::ErroredTransport(_)) =
                    outcome
                {
                    bail!("the answer did not complete");
                }
            }
        }
        Command::Chat { credential } => {
            if let (None, Some(credential)) = (lexis.session().user(), credential) {
                lexis.auth().login_google(&credential).await?;
            }
            let user = lexis.require_user()?;
            repl(&lexis, Transcript::greeting(Some(&user))).await?;
        }
    }
    Ok(())
}

async fn repl(lexis: &Lexis, transcript: Transcript) -> Result<()> {
    if let Some(welcome) = transcript.last() {
        println!("{}", format_turn(welcome));
    }
    println!("(type /quit or press Ctrl-D to leave)");
    let chat = ChatSession::new(lexis.consumer(), transcript);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        let line = line.trim();
        if matches!(line, "/quit" | "/exit") {
            break;
        }
        if line.is_empty() {
            continue;
        }
        stream_answer(&chat, line).await?;
        if !lexis.session().is_authenticated() {
            break;
        }
    }
    Ok(())
}

/// Stream one answer to stdout. Ctrl-C stops the answer, not the program.
async fn stream_answer(chat: &ChatSession, question: &str) -> Result<Option<AskOutcome>> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut printer = TerminalPrinter::stdout();
    let submitted = chat.submit_with(question, &mut printer, cancel).await;
    watcher.abort();
    printer.finish()?;

    let outcome = submitted.map(|submitted| submitted.outcome);
    match &outcome {
        Some(AskOutcome::Cancelled) => println!("[stopped]"),
        Some(AskOutcome::ErroredExplicit(detail)) => {
            tracing::error!(%detail, "server reported an error")
        }
        Some(AskOutcome::ErroredTransport(detail)) => {
            tracing::error!(%detail, "answer stream failed")
        }
        _ => {}
    }
    Ok(outcome)
}
