mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sessionjar")]
#[command(about = "Capture authenticated browser requests over CDP and replay them", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// DevTools endpoint overrides; defaults come from the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct BrowserArgs {
    /// DevTools host
    #[arg(long)]
    pub host: Option<String>,

    /// DevTools port
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct KeyArgs {
    /// Encryption key (base64 32-byte key or passphrase)
    #[arg(long)]
    pub encryption_key: Option<String>,

    /// Environment variable holding the key
    #[arg(long)]
    pub encryption_key_env: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen on a tab and record requests that carry session headers
    Capture {
        /// Start from a saved recipe instead of the config file
        #[arg(long)]
        recipe: Option<String>,

        #[command(flatten)]
        browser: BrowserArgs,

        #[command(flatten)]
        key: KeyArgs,

        /// Capture duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Stop after this many records
        #[arg(long)]
        max_records: Option<usize>,

        /// Tab selector and URL filter (case-insensitive substring)
        #[arg(long)]
        hint: Option<String>,

        /// Capture file to append to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Header to keep (repeatable); replaces the configured allowlist
        #[arg(long = "header")]
        headers: Vec<String>,

        /// Keep every header
        #[arg(long)]
        all_headers: bool,

        /// Keep requests whose host contains this fragment
        #[arg(long)]
        host_contains: Option<String>,

        /// Keep requests whose path contains this fragment
        #[arg(long)]
        path_contains: Option<String>,

        /// Keep requests with this method
        #[arg(long)]
        method: Option<String>,

        /// Keep requests with this resource type (XHR, Fetch, Document, ...)
        #[arg(long)]
        resource_type: Option<String>,

        /// Reload a tab once the listener is attached
        #[arg(long)]
        refresh: bool,

        /// Tab to reload or navigate (defaults to the hinted tab)
        #[arg(long)]
        tab_id: Option<String>,

        /// Navigate the tab to this URL instead of reloading
        #[arg(long)]
        navigate: Option<String>,

        /// Bypass the browser cache on reload
        #[arg(long)]
        ignore_cache: bool,

        /// Record request bodies
        #[arg(long)]
        capture_body: bool,

        /// Body size cap in bytes
        #[arg(long)]
        max_body_bytes: Option<usize>,
    },

    /// Send a request using headers from the most recent matching capture
    Replay {
        /// Start from a saved recipe instead of the config file
        #[arg(long)]
        recipe: Option<String>,

        #[command(flatten)]
        key: KeyArgs,

        /// Target URL (required unless the recipe sets one)
        #[arg(long)]
        url: Option<String>,

        /// Capture file to read
        #[arg(long)]
        capture_file: Option<PathBuf>,

        /// HTTP method
        #[arg(short, long)]
        method: Option<String>,

        /// Only use captures whose URL contains this substring
        #[arg(long)]
        url_contains: Option<String>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Total attempts
        #[arg(long)]
        retries: Option<u32>,

        /// Delay between attempts in milliseconds
        #[arg(long)]
        backoff_ms: Option<u64>,

        /// Permitted destination domain (repeatable)
        #[arg(long = "allowed-domain")]
        allowed_domains: Vec<String>,

        /// Forbidden destination domain (repeatable)
        #[arg(long = "denied-domain")]
        denied_domains: Vec<String>,

        /// Forbidden path token (repeatable)
        #[arg(long = "deny-path")]
        deny_paths: Vec<String>,

        /// Allow a target host different from the captured one
        #[arg(long)]
        allow_host_mismatch: bool,

        /// Literal request body
        #[arg(long)]
        body: Option<String>,

        /// JSON request body file (wins over --body)
        #[arg(long)]
        json_body_file: Option<PathBuf>,

        /// Write headers and response to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep credential values in the output
        #[arg(long)]
        no_redact: bool,
    },

    /// List DevTools page targets
    Targets {
        #[command(flatten)]
        browser: BrowserArgs,

        /// Show which target a capture with this hint would attach to
        #[arg(long)]
        hint: Option<String>,
    },

    /// Drive long-lived tabs
    Tabs {
        #[command(flatten)]
        browser: BrowserArgs,

        /// Page-load wait in seconds
        #[arg(long)]
        load_timeout: Option<f64>,

        #[command(subcommand)]
        command: TabsCommands,
    },

    /// Summarize session credentials found in a capture file
    Tokens {
        #[command(flatten)]
        key: KeyArgs,

        /// Capture file to read
        #[arg(long)]
        capture_file: Option<PathBuf>,

        /// Header to report (repeatable); defaults to the capture allowlist
        #[arg(long = "header")]
        headers: Vec<String>,

        /// One entry per distinct value and audience domain
        #[arg(long)]
        details: bool,
    },

    /// Manage named capture/replay presets
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },

    /// Generate a capture-file encryption key
    Keygen,

    /// Run environment diagnostics
    Doctor {
        #[command(flatten)]
        browser: BrowserArgs,

        #[command(flatten)]
        key: KeyArgs,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Save the configured capture and replay settings under a name
    Save {
        name: String,
        /// Tab selector and URL filter for capture
        #[arg(long)]
        hint: Option<String>,
        /// Replay target URL
        #[arg(long)]
        url: Option<String>,
        /// Only replay captures whose URL contains this substring
        #[arg(long)]
        url_contains: Option<String>,
        /// Replay HTTP method
        #[arg(short, long)]
        method: Option<String>,
    },
    /// List saved recipes
    List,
    /// Print a saved recipe
    Show { name: String },
}

#[derive(Subcommand)]
enum TabsCommands {
    /// List open tabs
    List,
    /// Open a new tab
    Open {
        /// URL to open
        #[arg(default_value = "about:blank")]
        url: String,
    },
    /// Reload a tab and wait for the load event
    Refresh {
        target_id: String,
        /// Bypass the browser cache
        #[arg(long)]
        ignore_cache: bool,
    },
    /// Navigate a tab and wait for the load event
    Navigate { target_id: String, url: String },
    /// Close a tab
    Close { target_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Capture {
            recipe,
            browser,
            key,
            duration,
            max_records,
            hint,
            output,
            headers,
            all_headers,
            host_contains,
            path_contains,
            method,
            resource_type,
            refresh,
            tab_id,
            navigate,
            ignore_cache,
            capture_body,
            max_body_bytes,
        } => {
            commands::capture::run(commands::capture::CaptureArgs {
                recipe,
                browser,
                key,
                duration,
                max_records,
                hint,
                output,
                headers,
                all_headers,
                host_contains,
                path_contains,
                method,
                resource_type,
                refresh,
                tab_id,
                navigate,
                ignore_cache,
                capture_body,
                max_body_bytes,
            })
            .await?;
        }
        Commands::Replay {
            recipe,
            key,
            url,
            capture_file,
            method,
            url_contains,
            timeout,
            retries,
            backoff_ms,
            allowed_domains,
            denied_domains,
            deny_paths,
            allow_host_mismatch,
            body,
            json_body_file,
            output,
            no_redact,
        } => {
            commands::replay::run(commands::replay::ReplayArgs {
                recipe,
                key,
                url,
                capture_file,
                method,
                url_contains,
                timeout,
                retries,
                backoff_ms,
                allowed_domains,
                denied_domains,
                deny_paths,
                allow_host_mismatch,
                body,
                json_body_file,
                output,
                no_redact,
            })
            .await?;
        }
        Commands::Targets { browser, hint } => {
            commands::targets::run(browser, hint).await?;
        }
        Commands::Tabs {
            browser,
            load_timeout,
            command,
        } => {
            let mut controller = commands::tabs::controller(browser, load_timeout)?;
            let result = match command {
                TabsCommands::List => commands::tabs::list(&controller).await,
                TabsCommands::Open { url } => commands::tabs::open(&mut controller, &url).await,
                TabsCommands::Refresh {
                    target_id,
                    ignore_cache,
                } => commands::tabs::refresh(&mut controller, &target_id, ignore_cache).await,
                TabsCommands::Navigate { target_id, url } => {
                    commands::tabs::navigate(&mut controller, &target_id, &url).await
                }
                TabsCommands::Close { target_id } => {
                    commands::tabs::close(&mut controller, &target_id).await
                }
            };
            controller.close().await;
            result?;
        }
        Commands::Tokens {
            key,
            capture_file,
            headers,
            details,
        } => {
            commands::tokens::run(key, capture_file, headers, details)?;
        }
        Commands::Recipe { command } => match command {
            RecipeCommands::Save {
                name,
                hint,
                url,
                url_contains,
                method,
            } => commands::recipe::save(commands::recipe::SaveArgs {
                name,
                hint,
                url,
                url_contains,
                method,
            })?,
            RecipeCommands::List => commands::recipe::list()?,
            RecipeCommands::Show { name } => commands::recipe::show(&name)?,
        },
        Commands::Keygen => {
            commands::keygen::run()?;
        }
        Commands::Doctor { browser, key } => {
            commands::doctor::run(browser, key).await?;
        }
    }

    Ok(())
}
