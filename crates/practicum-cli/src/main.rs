//! Command-line front end for the Practicum verification pipeline.
//!
//! `verify` runs a full submission through the dispatcher and prints the
//! verdict as JSON; the remaining subcommands are offline operator tools
//! (token minting/checking, URL parsing, provider health).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;

use practicum_core::token::signing::issue_token;
use practicum_core::{
    parse_profile, parse_pull_url, parse_repo_url, Requirement, Submission, SubmissionKind,
    TokenConfig, TokenVerifier, PLACEHOLDER_SECRET,
};
use practicum_runtime::dispatcher::TOKEN_SECRET_ENV;
use practicum_runtime::{Dispatcher, PipelineConfig};

#[derive(Parser)]
#[command(
    name = "practicum",
    version,
    about = "Evidence verification for the Practicum learning platform"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify one submission against a requirement definition
    Verify(VerifyArgs),

    /// Mint and check signed completion tokens
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },

    /// Show how an evidence value parses (PR URL, repo URL or profile)
    Parse {
        /// The value to parse
        value: String,
    },

    /// Check that the grading provider answers
    Health,
}

#[derive(Args)]
struct VerifyArgs {
    /// Evidence kind: challenge_token, network_lab_token, profile, fork,
    /// pull_request, repo_analysis, devops_analysis, security_posture or
    /// deployment
    #[arg(long)]
    kind: String,

    /// The submitted evidence: a token, URL or username depending on kind
    #[arg(long)]
    value: String,

    /// The learner's linked GitHub username
    #[arg(long)]
    owner: Option<String>,

    /// Path to a requirement definition (JSON); defaults apply when omitted
    #[arg(long)]
    requirement: Option<PathBuf>,
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Mint a signed completion token (development tooling)
    Mint {
        /// Learner the token is issued to
        #[arg(long)]
        learner: String,

        /// Token kind: cli_challenges, netlab_aws, netlab_gcp or netlab_azure
        #[arg(long, default_value = "cli_challenges")]
        kind: String,

        /// Completed-unit count to embed
        #[arg(long)]
        count: u32,

        /// Issuing instance identifier
        #[arg(long, default_value = "practicum-dev")]
        instance: String,
    },

    /// Verify a token offline
    Check {
        /// The base64 token envelope
        #[arg(long)]
        token: String,

        /// The learner the token must belong to
        #[arg(long)]
        owner: String,

        /// Treat as a network-lab token instead of a challenge token
        #[arg(long)]
        network_lab: bool,

        /// Override the required completed-unit count
        #[arg(long)]
        required: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Verify(args) => verify(args).await,
        Command::Token { command } => token(command),
        Command::Parse { value } => parse(&value),
        Command::Health => health().await,
    }
}

async fn verify(args: VerifyArgs) -> Result<()> {
    let kind = parse_kind(&args.kind)?;
    let requirement: Requirement = match &args.requirement {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading requirement file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing requirement file {}", path.display()))?
        }
        None => Requirement {
            id: "adhoc".to_string(),
            ..Requirement::default()
        },
    };

    let submission = Submission {
        kind,
        value: args.value,
        requirement_id: requirement.id.clone(),
        expected_owner: args.owner,
    };

    let config = PipelineConfig::from_env();
    let dispatcher = Dispatcher::from_env(&config).context("wiring the pipeline")?;
    tracing::debug!(kind = %args.kind, requirement = %requirement.id, "dispatching verification");
    let verdict = dispatcher.verify_submission(&submission, &requirement).await;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    if verdict.is_valid {
        Ok(())
    } else {
        std::process::exit(1)
    }
}

fn token(command: TokenCommand) -> Result<()> {
    match command {
        TokenCommand::Mint {
            learner,
            kind,
            count,
            instance,
        } => {
            let now = chrono::Utc::now();
            let payload = serde_json::json!({
                "instance_id": instance,
                "learner": learner,
                "kind": kind,
                "count": count,
                "issued_at": now.timestamp(),
                "issued_on": now.format("%Y-%m-%d").to_string(),
            });
            let token =
                issue_token(&master_secret(), &payload).context("payload was not signable")?;
            println!("{}", token);
            Ok(())
        }
        TokenCommand::Check {
            token,
            owner,
            network_lab,
            required,
        } => {
            let config = PipelineConfig::from_env();
            let verifier = TokenVerifier::new(TokenConfig {
                master_secret: SecretString::from(master_secret()),
                environment: config.environment,
            })?;
            let verdict = if network_lab {
                verifier.verify_network_token(&token, &owner, required)
            } else {
                verifier.verify_challenge_token(&token, &owner, required)
            };
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if verdict.is_valid {
                Ok(())
            } else {
                std::process::exit(1)
            }
        }
    }
}

fn parse(value: &str) -> Result<()> {
    if let Ok(pull) = parse_pull_url(value) {
        println!(
            "pull request: owner={} repo={} number={}",
            pull.owner, pull.repo, pull.number
        );
        return Ok(());
    }
    if let Ok(repo) = parse_repo_url(value) {
        match repo.file_path {
            Some(path) => println!(
                "repository file: owner={} repo={} path={}",
                repo.owner, repo.repo, path
            ),
            None => println!("repository: owner={} repo={}", repo.owner, repo.repo),
        }
        return Ok(());
    }
    if let Ok(username) = parse_profile(value) {
        println!("profile: {}", username);
        return Ok(());
    }
    bail!("'{}' is not a recognizable GitHub URL, repository or profile", value)
}

async fn health() -> Result<()> {
    let config = PipelineConfig::from_env();
    let dispatcher = Dispatcher::from_env(&config).context("wiring the pipeline")?;
    if dispatcher.health_check().await {
        println!("ok");
        Ok(())
    } else {
        bail!("grading provider did not answer its health check")
    }
}

fn parse_kind(raw: &str) -> Result<SubmissionKind> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_string()))
        .map_err(|_| anyhow::anyhow!("unknown evidence kind '{}'", raw))
}

fn master_secret() -> String {
    std::env::var(TOKEN_SECRET_ENV).unwrap_or_else(|_| PLACEHOLDER_SECRET.to_string())
}
