use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coqpod::config::PodConfig;
use coqpod::kernel::{Kernel, LoopbackKernel, ProcessKernel};
use coqpod::pod::Pod;
use coqpod::{cli, protocol::Message};

#[derive(Parser)]
#[command(name = "coqpod")]
#[command(about = "Session bridge for a sandboxed proof kernel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the kernel and speak the host protocol over stdio
    Stdio {
        /// Kernel implementation to drive
        #[arg(short, long, value_enum, default_value_t = KernelKind::Process)]
        kernel: KernelKind,
    },
    /// Install packages into the sandbox without booting a kernel
    Install {
        /// Package URIs; `+name` refers to a bundled package
        #[arg(required = true)]
        uris: Vec<String>,
    },
    /// Print a file from the sandbox
    Get {
        /// Virtual path; relative paths resolve under the library root
        path: String,
    },
    /// Show the effective configuration
    Config {
        /// Persist it to the user config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KernelKind {
    /// Spawn the installed image as a child process
    Process,
    /// In-process reference kernel
    Loopback,
}

/// Initialize tracing with output to stderr (for stdio mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "coqpod=debug".into()),
    );

    if use_stderr {
        // stdio mode: stdout carries the event stream
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn serve(config: PodConfig, kind: KernelKind) -> anyhow::Result<()> {
    let kernel: Box<dyn Kernel> = match kind {
        KernelKind::Process => Box::new(ProcessKernel::new(config.kernel_args.clone())),
        KernelKind::Loopback => Box::new(LoopbackKernel::new()),
    };
    let pod = Arc::new(Pod::new(config, kernel)?);
    let root = pod.boot().await?;
    tracing::info!("Session ready at state {}", root);
    cli::run_stdio(pod).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = matches!(cli.command, None | Some(Commands::Stdio { .. }));
    init_tracing(use_stderr);

    let config = PodConfig::from_env();

    match cli.command {
        Some(Commands::Stdio { kernel }) => serve(config, kernel).await?,
        Some(Commands::Install { uris }) => {
            let kernel = Box::new(ProcessKernel::new(config.kernel_args.clone()));
            let pod = Pod::new(config, kernel)?;
            let mut events = pod.subscribe();
            let result = pod.install_packages(&uris, false).await;
            for message in events.drain_messages() {
                if let Message::Notice(notice) = message {
                    println!("{}", notice.encode());
                }
            }
            let loaded = result?;
            tracing::info!("Installed {} package(s)", loaded.len());
        }
        Some(Commands::Get { path }) => {
            let kernel = Box::new(ProcessKernel::new(Vec::new()));
            let pod = Pod::new(config, kernel)?;
            match pod.vfs().get(&path)? {
                Some(bytes) => {
                    use std::io::Write;
                    std::io::stdout().write_all(&bytes)?;
                }
                None => anyhow::bail!("{}: no such file", path),
            }
        }
        Some(Commands::Config { save }) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = config.save()?;
                tracing::info!("Configuration saved to {}", path.display());
            }
        }
        None => serve(config, KernelKind::Process).await?,
    }

    Ok(())
}
