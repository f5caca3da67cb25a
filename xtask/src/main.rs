use anyhow::{ensure, Result};
use clap::{Parser, Subcommand};
use lexis_core::auth::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use lexis_core::chat::STREAM_PATH;
use lexis_core::client::CHAT_PATH;
use lexis_core::fake::{Reply, ScriptedTransport};
use lexis_core::{
    telemetry, ApiClient, AskOutcome, AuthApi, AuthScheme, ChatConsumer, ChatSession, LogRedirect,
    SessionFile, SessionStore, Transcript,
};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Lexis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scripted login, refresh and streamed answer without a server.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_transport() -> ScriptedTransport {
    ScriptedTransport::new()
        .route(
            Method::POST,
            LOGIN_PATH,
            [Reply::json(
                200,
                json!({
                    "access_token": "a1",
                    "refresh_token": "r1",
                    "token_type": "bearer",
                    "user": {"id": "smoke", "email": "smoke@example.com", "full_name": "Smoke Test"}
                }),
            )],
        )
        .route(
            Method::POST,
            CHAT_PATH,
            [
                Reply::status(401),
                Reply::json(200, json!({"answer": "pong", "sources": []})),
            ],
        )
        .route(
            Method::POST,
            REFRESH_PATH,
            [Reply::json(200, json!({"access_token": "a2", "refresh_token": "r2"}))],
        )
        .route(
            Method::POST,
            STREAM_PATH,
            [Reply::status(200)
                .chunk("{\"type\":\"sources\",\"data\":[\"Điều_1\"]}\n{\"type\":\"con")
                .chunk("tent\",\"data\":\"pong \"}\n{\"type\":\"content\",\"data\":\"again\"}\n")],
        )
        .route(Method::POST, LOGOUT_PATH, [Reply::status(200)])
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let temp_dir = TempDir::new()?;
    let transport = smoke_transport();
    let session = SessionStore::with_file(SessionFile::new(temp_dir.path().to_path_buf()));
    let scheme = AuthScheme::Bearer;
    let auth = AuthApi::new(Arc::new(transport.clone()), session.clone(), scheme);
    let client = ApiClient::new(
        Arc::new(transport.clone()),
        session.clone(),
        scheme,
        Arc::new(LogRedirect),
    );

    runtime.block_on(async {
        let user = auth.login_google("smoke-credential").await?;
        info!(user = %user.email, "logged in");

        let reply = client.send_message("ping").await?;
        ensure!(reply.answer == "pong", "unexpected reply {:?}", reply.answer);
        ensure!(
            session.access_token().as_deref() == Some("a2"),
            "refresh did not rotate the access token"
        );
        info!(
            refreshes = transport.count(Method::POST, REFRESH_PATH),
            "request recovered after refresh"
        );

        let chat = ChatSession::new(
            ChatConsumer::from_client(&client),
            Transcript::greeting(Some(&user)),
        );
        let submitted = chat
            .submit("ping again")
            .await
            .ok_or_else(|| anyhow::anyhow!("question was ignored"))?;
        ensure!(
            submitted.outcome == AskOutcome::Completed,
            "stream ended with {:?}",
            submitted.outcome
        );
        let transcript = chat.transcript();
        info!(turns = transcript.turns().len(), "smoke conversation streamed");

        auth.logout().await;
        ensure!(!session.is_authenticated(), "logout left a session behind");
        Ok::<(), anyhow::Error>(())
    })
}
