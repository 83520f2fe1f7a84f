//! Legal Sathi CLI.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use sathi::assist::{AssistClient, ChatMessage};
use sathi::auth::{AuthStore, UserRole};
use sathi::voice::{Role, SessionStatus, VoiceConfig, VoiceSessionManager};
use sathi::{Config, Language};

#[derive(Parser)]
#[command(name = "sathi", version, about = "Legal Sathi — AI legal assistant")]
struct Cli {
    /// Path to a config file (default: sathi.toml, then the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Response language: en, hi, mr, pa, raj
    #[arg(long, short, global = true)]
    language: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hold a live voice conversation with the assistant
    Voice {
        /// Output volume, 0.0..=1.0
        #[arg(long)]
        volume: Option<f32>,
    },
    /// Ask a legal question
    Chat {
        /// The question to ask
        message: Vec<String>,
    },
    /// Upload a document (image/PDF) for analysis
    Analyze {
        path: PathBuf,
    },
    /// Create an account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Account role: user, lawyer, admin
        #[arg(long, default_value = "user")]
        role: String,
    },
    /// Log in to an existing account
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Revoke the saved login session
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sathi=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    let language = match &cli.language {
        Some(code) => Language::from_str_code(code)
            .with_context(|| format!("unknown language '{code}' (expected en/hi/mr/pa/raj)"))?,
        None => config.language(),
    };

    match cli.command {
        Command::Voice { volume } => run_voice(&config, language, volume).await,
        Command::Chat { message } => run_chat(&config, language, &message.join(" ")).await,
        Command::Analyze { path } => run_analyze(&config, language, &path).await,
        Command::Register {
            name,
            email,
            password,
            role,
        } => {
            let role = UserRole::from_str_code(&role)
                .with_context(|| format!("unknown role '{role}' (expected user/lawyer/admin)"))?;
            let store = open_store(&config)?;
            let (user, token) = store.register(&name, &email, &password, role)?;
            save_token(&config, &token)?;
            println!("Welcome, {}! You are registered and logged in.", user.name);
            Ok(())
        }
        Command::Login { email, password } => {
            let store = open_store(&config)?;
            let (user, token) = store.login(&email, &password)?;
            save_token(&config, &token)?;
            println!("Welcome back, {}.", user.name);
            Ok(())
        }
        Command::Logout => {
            let token_path = config.data_dir().join("session.token");
            if let Ok(token) = std::fs::read_to_string(&token_path) {
                let store = open_store(&config)?;
                store.logout(token.trim())?;
                let _ = std::fs::remove_file(&token_path);
                println!("Logged out.");
            } else {
                println!("No saved session.");
            }
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> anyhow::Result<AuthStore> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("cannot create data dir {}", data_dir.display()))?;
    Ok(AuthStore::new(&data_dir.join("identity.db"), None)?)
}

fn save_token(config: &Config, token: &str) -> anyhow::Result<()> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    std::fs::write(data_dir.join("session.token"), token)?;
    Ok(())
}

async fn run_chat(config: &Config, language: Language, message: &str) -> anyhow::Result<()> {
    anyhow::ensure!(!message.trim().is_empty(), "empty question");
    let client = AssistClient::new(config.resolve_api_key()?);
    let history: Vec<ChatMessage> = Vec::new();
    let reply = client
        .legal_advice(&config.assist.advice_model, &history, message, language)
        .await?;
    println!("{reply}");
    Ok(())
}

async fn run_analyze(config: &Config, language: Language, path: &PathBuf) -> anyhow::Result<()> {
    let data = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let mime_type = mime_guess::from_path(path).first_or_octet_stream();
    let client = AssistClient::new(config.resolve_api_key()?);
    let report = client
        .analyze_document(
            &config.assist.analysis_model,
            &data,
            mime_type.essence_str(),
            language,
        )
        .await?;
    println!("{report}");
    Ok(())
}

async fn run_voice(
    config: &Config,
    language: Language,
    volume: Option<f32>,
) -> anyhow::Result<()> {
    let mut voice_config = VoiceConfig::from_config(config, language)?;
    if let Some(volume) = volume {
        voice_config.volume = volume.clamp(0.0, 1.0);
    }

    let manager = VoiceSessionManager::new(voice_config);
    manager.connect().await?;
    println!(
        "Connected ({}). Speak naturally; press Ctrl-C to hang up.",
        language.display_name()
    );

    let mut printed = 0;
    let mut was_speaking = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                let snapshot = manager.snapshot();
                for entry in &snapshot.transcript[printed..] {
                    let speaker = match entry.role {
                        Role::User => "you",
                        Role::Model => "sathi",
                    };
                    println!("{speaker}: {}", entry.text);
                }
                printed = snapshot.transcript.len();

                if snapshot.speaking != was_speaking {
                    was_speaking = snapshot.speaking;
                    if was_speaking {
                        println!("(speaking...)");
                    }
                }

                if snapshot.status == SessionStatus::Idle {
                    // The session ended on its own (remote close or error).
                    if let Some(error) = &snapshot.error {
                        eprintln!("Session ended: {error}");
                    } else {
                        println!("Session ended.");
                    }
                    return Ok(());
                }
            }
        }
    }

    manager.disconnect();
    println!("Disconnected.");
    Ok(())
}
