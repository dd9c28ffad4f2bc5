//! Caltrack CLI - Command-line client for the calorie tracker backend
//!
//! Signs in, keeps the session token on disk and checks role access the same
//! way the web client does

use caltrack_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success,
    CaltrackConfig, CaltrackError, CaltrackResult, Clock, ErrorContext, LoggingConfig, SystemClock,
};
use caltrack_session::{
    AuthClient, HistoryNavigator, Navigator, PageLoad, PasswordResetFlow, RegisterRequest, Role,
    SessionManager, StoredToken, UnloadAction,
};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "caltrack")]
#[command(about = "Session client for the calorie tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session token
    Login {
        #[arg(short, long)]
        email: String,

        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create an account
    Register {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        name: String,

        /// Prompted for (twice) when omitted
        #[arg(short, long)]
        password: Option<String>,

        /// Store the returned token instead of requiring a separate login
        #[arg(long)]
        sign_in: bool,
    },

    /// End the current session
    Logout,

    /// Show the stored session
    Status,

    /// Check whether the session may open a view
    Authorize {
        /// Role the view requires (ADMIN, USER)
        #[arg(short, long)]
        role: Option<String>,

        /// View path to open when access is granted
        #[arg(long, default_value = "/dashboard")]
        path: String,
    },

    /// Keep the session alive while watching backend and frontend liveness
    Watch {
        /// End the session on Ctrl-C unless unload handling is disabled
        #[arg(long)]
        close_on_exit: bool,
    },

    /// Reset a forgotten password with an emailed code
    ResetPassword {
        #[arg(short, long)]
        email: String,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> CaltrackResult<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut logging_config = LoggingConfig::default();
    if cli.verbose {
        logging_config.level = "debug".to_string();
        logging_config.filter_directives.retain(|d| !d.starts_with("caltrack"));
    }

    init_logging(&logging_config).map_err(|e| CaltrackError::Config {
        message: format!("Failed to initialize logging: {}", e),
        source: Some(e),
        context: ErrorContext::new("cli")
            .with_operation("init_logging")
            .with_suggestion("Check the RUST_LOG filter"),
    })?;

    info!("Starting Caltrack CLI v{}", env!("CARGO_PKG_VERSION"));

    // `config` loads (or creates) the file itself
    let config = match cli.command {
        Commands::Config { .. } => CaltrackConfig::default(),
        _ => load_config(cli.config.as_ref())?,
    };

    if let Err(e) = run(cli.command, cli.config.as_ref(), &config).await {
        e.log();
        return Err(e);
    }

    Ok(())
}

async fn run(
    command: Commands,
    config_path: Option<&PathBuf>,
    config: &CaltrackConfig,
) -> CaltrackResult<()> {
    match command {
        Commands::Login { email, password } => handle_login(email, password, config).await,
        Commands::Register {
            email,
            name,
            password,
            sign_in,
        } => handle_register(email, name, password, sign_in, config).await,
        Commands::Logout => handle_logout(config).await,
        Commands::Status => handle_status(config),
        Commands::Authorize { role, path } => handle_authorize(role, path, config),
        Commands::Watch { close_on_exit } => handle_watch(close_on_exit, config).await,
        Commands::ResetPassword { email } => handle_reset_password(email, config).await,
        Commands::Config {
            show,
            init,
            validate,
        } => handle_config(show, init, validate, config_path),
    }
}

fn load_config(config_path: Option<&PathBuf>) -> CaltrackResult<CaltrackConfig> {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            CaltrackConfig::from_file(path)?
        }
        None => match CaltrackConfig::default_paths()
            .into_iter()
            .find(|path| path.exists())
        {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                CaltrackConfig::from_file(&path)?
            }
            None => {
                info!("No configuration file found, using defaults");
                CaltrackConfig::default()
            }
        },
    };

    config.apply_env_overrides()?;
    Ok(config)
}

fn build_session(
    config: &CaltrackConfig,
    navigator: Arc<HistoryNavigator>,
) -> CaltrackResult<SessionManager> {
    SessionManager::builder(config.clone())
        .navigator(navigator)
        .build()
}

/// Commands that only touch the token do not need liveness polling
fn one_shot_session(config: &CaltrackConfig) -> CaltrackResult<SessionManager> {
    let mut config = config.clone();
    config.liveness.enabled = false;
    build_session(&config, Arc::new(HistoryNavigator::new(config.routes.landing.clone())))
}

fn prompt(label: &str) -> CaltrackResult<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn handle_login(
    email: String,
    password: Option<String>,
    config: &CaltrackConfig,
) -> CaltrackResult<()> {
    log_operation_start!("login", email = %email);

    let password = match password {
        Some(password) => password,
        None => prompt("Password")?,
    };

    let client = AuthClient::new(&config.api, one_shot_session(config)?)?;
    let result = match client.login(&email, &password).await {
        Err(e) if e.is_recoverable() => {
            let delay_ms = e.retry_delay_ms().unwrap_or(1000);
            warn!(error = %e, delay_ms, "Login failed; retrying once");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            client.login(&email, &password).await
        }
        other => other,
    };
    result.map_err(|e| {
        log_operation_error!("login", e, email = %email);
        e
    })?;

    log_operation_success!("login", email = %email);
    println!("✅ Login successful");
    Ok(())
}

async fn handle_register(
    email: String,
    name: String,
    password: Option<String>,
    sign_in: bool,
    config: &CaltrackConfig,
) -> CaltrackResult<()> {
    log_operation_start!("register", email = %email);

    let (password, confirm) = match password {
        Some(password) => (password.clone(), password),
        None => (prompt("Password")?, prompt("Confirm password")?),
    };

    let request = RegisterRequest::new(email, password, name);
    request.validate(&confirm)?;

    let client = AuthClient::new(&config.api, one_shot_session(config)?)?;
    let result = if sign_in {
        client.register_and_sign_in(&request).await
    } else {
        client.register(&request).await
    };
    let response = result.map_err(|e| {
        log_operation_error!("register", e, email = %request.email);
        e
    })?;

    log_operation_success!("register", email = %request.email);
    if sign_in {
        println!("✅ Registration successful; you are signed in");
    } else {
        println!("✅ Registration successful; run `caltrack login` to sign in");
    }
    println!("{}", serde_json::to_string_pretty(&response.user)?);
    Ok(())
}

async fn handle_logout(config: &CaltrackConfig) -> CaltrackResult<()> {
    let client = AuthClient::new(&config.api, one_shot_session(config)?)?;
    client.logout().await;
    println!("👋 Logged out");
    Ok(())
}

fn handle_status(config: &CaltrackConfig) -> CaltrackResult<()> {
    let session = one_shot_session(config)?;
    let now = SystemClock.now_millis();

    match session.stored_token() {
        StoredToken::Absent => println!("Not signed in"),
        StoredToken::Malformed => println!("Stored session is corrupt and will be discarded"),
        StoredToken::Expired(token) => {
            println!(
                "Session expired {}s ago",
                token.remaining_ms(now).saturating_neg() / 1000
            );
        }
        StoredToken::Valid(token) => {
            println!(
                "Signed in; session valid for another {}s",
                token.remaining_ms(now) / 1000
            );
            if let Some(claims) = session.claims() {
                println!("  subject: {}", claims.sub.as_deref().unwrap_or("-"));
                println!(
                    "  role:    {}",
                    claims.role.as_ref().map(Role::as_str).unwrap_or("-")
                );
            }
        }
    }

    // reading the slot above does no cleanup; this does
    session.check_token_validity();
    Ok(())
}

fn handle_authorize(role: Option<String>, path: String, config: &CaltrackConfig) -> CaltrackResult<()> {
    let navigator = Arc::new(HistoryNavigator::new(config.routes.landing.clone()));
    let mut one_shot = config.clone();
    one_shot.liveness.enabled = false;
    let session = build_session(&one_shot, navigator.clone())?;

    let required = role.as_deref().map(Role::from);
    let decision = session.navigate_protected(&path, required.as_ref());

    println!("{}", serde_json::to_string_pretty(&decision)?);
    println!("→ {}", navigator.current_path());
    Ok(())
}

async fn handle_watch(close_on_exit: bool, config: &CaltrackConfig) -> CaltrackResult<()> {
    if !config.liveness.enabled {
        warn!("Liveness monitoring is disabled in the configuration");
    }

    let navigator = Arc::new(HistoryNavigator::new(config.routes.dashboard.clone()));
    let session = build_session(config, navigator.clone())?;

    session.bootstrap(PageLoad::Navigate);
    if !session.check_token_validity() {
        return Err(CaltrackError::Authentication {
            message: "No valid session to watch".to_string(),
            status: None,
            context: ErrorContext::new("cli")
                .with_operation("watch")
                .with_suggestion("Run `caltrack login` first"),
        });
    }

    log_operation_start!("watch", interval_ms = config.liveness.poll_interval_ms);
    println!("👀 Watching session; press Ctrl-C to stop");

    let mut ticker = tokio::time::interval(Duration::from_millis(config.liveness.poll_interval_ms));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if close_on_exit && session.close_on_exit() == UnloadAction::Preserve {
                    warn!("Unload handling is disabled; keeping the session");
                }
                session.shutdown();
                log_operation_success!("watch");
                println!("Stopped watching");
                break;
            }
            _ = ticker.tick() => {
                if navigator.current_path() == config.routes.login {
                    println!("⚠️  Backend or frontend unreachable; you have been logged out");
                    break;
                }
                if !session.check_token_validity() {
                    println!("⌛ Session expired");
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn handle_reset_password(email: String, config: &CaltrackConfig) -> CaltrackResult<()> {
    log_operation_start!("reset_password", email = %email);

    let client = AuthClient::new(&config.api, one_shot_session(config)?)?;
    let flow = PasswordResetFlow::new(client);

    flow.send_confirmation_code(&email).await.map_err(|e| {
        log_operation_error!("send_confirmation_code", e, email = %email);
        e
    })?;
    println!("📧 A confirmation code was sent to {}", email);

    let code = prompt("Confirmation code")?;
    if !flow.verify_code(&code) {
        flow.clear();
        return Err(CaltrackError::Validation {
            message: "Invalid confirmation code".to_string(),
            field: Some("code".to_string()),
            context: ErrorContext::new("cli").with_operation("reset_password"),
        });
    }

    let password = prompt("New password")?;
    let confirm = prompt("Confirm new password")?;
    if password != confirm {
        flow.clear();
        return Err(CaltrackError::Validation {
            message: "Passwords don't match".to_string(),
            field: Some("password".to_string()),
            context: ErrorContext::new("cli").with_operation("reset_password"),
        });
    }

    flow.reset_password(&password).await?;
    log_operation_success!("reset_password", email = %email);
    println!("✅ Password reset successfully");
    Ok(())
}

fn handle_config(
    show: bool,
    init: bool,
    validate: bool,
    config_path: Option<&PathBuf>,
) -> CaltrackResult<()> {
    if init {
        let path = match config_path {
            Some(path) => path.clone(),
            None => CaltrackConfig::default_paths()
                .into_iter()
                .next()
                .unwrap_or_else(|| PathBuf::from("caltrack.toml")),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        CaltrackConfig::default().save_to_file(&path)?;
        println!("✅ Configuration initialized at: {:?}", path);
    }

    if show {
        let config = load_config(config_path)?;
        let rendered = toml::to_string_pretty(&config).map_err(|e| CaltrackError::Config {
            message: format!("Failed to render configuration: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("cli").with_operation("show_config"),
        })?;
        println!("📋 Current configuration:");
        println!("{}", rendered);
    }

    if validate {
        let config = load_config(config_path)?;
        match config.validate() {
            Ok(()) => println!("✅ Configuration is valid"),
            Err(e) => {
                println!("❌ Configuration validation failed: {}", e);
                return Err(e);
            }
        }
    }

    Ok(())
}
