//! interview-coach - live voice interview practice
//!
//! Subcommands:
//! - `interview-coach interview --role <role>` - Run one interview in the terminal
//! - `interview-coach serve` - Run the HTTP control API
//! - `interview-coach roles` - List the built-in roles

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interview_coach::session::JobRole;
use interview_coach::{create_router, AppState, Config, SessionFactory};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "interview-coach")]
#[command(about = "Practice job interviews against a live voice model")]
#[command(version)]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/interview-coach", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single interview until Ctrl-C or the interviewer hangs up
    Interview {
        /// Role to interview for (e.g. "Software Engineer", "data-scientist")
        #[arg(short, long, default_value = "Software Engineer")]
        role: String,

        /// Interviewer voice
        #[arg(long)]
        voice: Option<String>,

        /// Replay this audio file instead of using the microphone
        #[arg(short, long)]
        input: Option<String>,

        /// Play through the headless clock and write the timeline to this WAV
        #[arg(long)]
        render: Option<String>,
    },

    /// Run the HTTP control API
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the built-in roles
    Roles,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Roles => {
            for role in JobRole::KNOWN {
                println!("{}", role.title());
            }
            Ok(())
        }
        Commands::Interview {
            role,
            voice,
            input,
            render,
        } => {
            let mut cfg = Config::load(&cli.config)?;
            if let Some(input) = input {
                cfg.audio.input = input;
            }
            if let Some(render) = render {
                cfg.audio.output = "clocked".to_string();
                cfg.audio.render_path = Some(render);
            }
            run_interview(cfg, JobRole::from(role.as_str()), voice).await
        }
        Commands::Serve { port } => {
            let mut cfg = Config::load(&cli.config)?;
            if let Some(port) = port {
                cfg.service.http.port = port;
            }
            serve(cfg).await
        }
    }
}

async fn run_interview(cfg: Config, role: JobRole, voice: Option<String>) -> Result<()> {
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let factory = SessionFactory::from_config(cfg)?;
    let session_config = factory.session_config(role, voice);
    let mut session = factory.create(session_config)?;

    if let Err(e) = session.start().await {
        let outcome = session.stop();
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Err(e).context("Interview could not start");
    }

    info!("Interview is live. Press Ctrl-C to end it.");

    let outcome = session
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Some(remark) = &outcome.closing_remark {
        info!("Interviewer: {}", remark);
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn serve(cfg: Config) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let name = cfg.service.name.clone();

    let factory = SessionFactory::from_config(cfg)?;
    let app = create_router(AppState::new(factory));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("{} listening on http://{}", name, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
