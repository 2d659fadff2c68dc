use std::path::PathBuf;
use std::sync::Arc;

use cinema_session::auth::{AuthSession, AuthState, Registration};
use cinema_session::checkout::{CheckoutError, CheckoutOutcome, CheckoutReconciler, CheckoutStart, History, MemoryHistory};
use cinema_session::client::SessionClient;
use cinema_session::config::{ClientConfig, ConfigError};
use cinema_session::error::{ApiError, TransportError};
use cinema_session::guard::{self, GuardDecision};
use cinema_session::store::FileTokenStore;
use cinema_session::subscription::SubscriptionStatus;
use cinema_session::transport::ReqwestTransport;
use cinema_session::types::RegisterForm;
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("http client setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("{code}: {0}", code = .0.error_code())]
    Api(#[from] ApiError),
    #[error("checkout failed: {0}")]
    Checkout(#[from] CheckoutError),
    #[error("not signed in; run `cinema-session login` first")]
    NotSignedIn,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "cinema-session", about = "Streaming account session CLI")]
struct Cli {
    #[arg(long, env = "CINEMA_API_BASE_URL")]
    api_base_url: Option<String>,

    #[arg(long, env = "CINEMA_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Log at debug level on stderr.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CINEMA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register(RegisterArgs),
    Logout,
    /// Resolve the stored session and print the current user.
    Whoami,
    /// Print subscription status for the stored session.
    Status,
    Plans,
    /// Show what the route guard decides for `path`.
    Guard {
        path: String,
    },
    Checkout(CheckoutCommand),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "CINEMA_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    password_confirm: Option<String>,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
}

#[derive(Args, Debug)]
struct CheckoutCommand {
    #[command(subcommand)]
    command: CheckoutSubcommand,
}

#[derive(Subcommand, Debug)]
enum CheckoutSubcommand {
    /// Create a hosted checkout for a plan and print the payment URL.
    Start {
        #[arg(long)]
        plan_id: i64,
        /// Cancel an existing pending payment and start over.
        #[arg(long, default_value_t = false)]
        replace_pending: bool,
    },
    /// Consume a payment return URL (`.../subscribe?success=1&session_id=...`).
    Return { url: String },
    CancelPending,
}

/// Everything a command needs, wired once per invocation.
struct Session {
    config: ClientConfig,
    client: SessionClient,
    auth: AuthSession,
    subscription: SubscriptionStatus,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self, CliError> {
        let config = ClientConfig::from_lookup(|key| match key {
            "CINEMA_API_BASE_URL" if cli.api_base_url.is_some() => cli.api_base_url.clone(),
            "CINEMA_TOKEN_FILE" if cli.token_file.is_some() => {
                cli.token_file.as_ref().map(|path| path.to_string_lossy().into_owned())
            }
            _ => std::env::var(key).ok(),
        })?;

        let transport = Arc::new(ReqwestTransport::new(&config)?);
        let store = Arc::new(FileTokenStore::open(&config.token_file));
        let client = SessionClient::new(transport, store, config.refresh_timeout());
        let auth = AuthSession::new(client.clone());
        let subscription = SubscriptionStatus::new(&auth);
        Ok(Self { config, client, auth, subscription })
    }

    async fn require_user(&self) -> Result<(), CliError> {
        match self.auth.bootstrap().await {
            AuthState::Authenticated(_) => Ok(()),
            AuthState::Unknown | AuthState::Anonymous => Err(CliError::NotSignedIn),
        }
    }

    fn reconciler(&self) -> CheckoutReconciler {
        CheckoutReconciler::new(self.client.clone(), self.subscription.clone(), self.config.frontend_url.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(level).init();

    let session = Session::open(&cli)?;
    match cli.command {
        Command::Login { email, password } => run_login(&session, &email, &password).await,
        Command::Register(args) => run_register(&session, args).await,
        Command::Logout => {
            session.auth.logout().await;
            print_json(&json!({ "signed_in": false }))
        }
        Command::Whoami => run_whoami(&session).await,
        Command::Status => run_status(&session).await,
        Command::Plans => {
            let plans = session.subscription.plans().await?;
            print_json(&serde_json::to_value(plans)?)
        }
        Command::Guard { path } => run_guard(&session, &path).await,
        Command::Checkout(checkout) => run_checkout(&session, checkout).await,
    }
}

async fn run_login(session: &Session, email: &str, password: &str) -> Result<(), CliError> {
    let profile = session.auth.login_with_credentials(email, password).await?;
    let active = session.subscription.refresh().await.active;
    print_json(&json!({
        "user": profile,
        "subscription_active": active,
        "next": guard::post_auth_destination(None, active),
    }))
}

async fn run_register(session: &Session, args: RegisterArgs) -> Result<(), CliError> {
    let form = RegisterForm {
        username: args.username,
        email: args.email,
        password_confirm: args.password_confirm.unwrap_or_else(|| args.password.clone()),
        password: args.password,
        first_name: args.first_name,
        last_name: args.last_name,
    };
    match session.auth.register(&form).await? {
        Registration::Authenticated(profile) => print_json(&json!({ "user": profile, "signed_in": true })),
        Registration::Created { message } => print_json(&json!({ "signed_in": false, "message": message })),
    }
}

async fn run_whoami(session: &Session) -> Result<(), CliError> {
    match session.auth.bootstrap().await {
        AuthState::Authenticated(profile) => print_json(&json!({
            "user": profile,
            "display_name": profile.display_name(),
        })),
        AuthState::Unknown | AuthState::Anonymous => Err(CliError::NotSignedIn),
    }
}

async fn run_status(session: &Session) -> Result<(), CliError> {
    session.require_user().await?;
    let state = session.subscription.refresh().await;
    print_json(&json!({
        "active": state.active,
        "plan": state.plan,
    }))
}

async fn run_guard(session: &Session, path: &str) -> Result<(), CliError> {
    let auth = session.auth.bootstrap().await;
    session.subscription.refresh().await;
    let class = guard::classify(path);
    let decision = guard::decide(&auth, &session.subscription.view(), class, path);
    let (verdict, location) = match &decision {
        GuardDecision::Allow => ("allow", Value::Null),
        GuardDecision::Defer => ("defer", Value::Null),
        GuardDecision::Redirect(redirect) => ("redirect", Value::String(redirect.location())),
    };
    print_json(&json!({
        "path": path,
        "class": format!("{class:?}"),
        "decision": verdict,
        "location": location,
    }))
}

async fn run_checkout(session: &Session, checkout: CheckoutCommand) -> Result<(), CliError> {
    let reconciler = session.reconciler();
    match checkout.command {
        CheckoutSubcommand::Start { plan_id, replace_pending } => {
            session.require_user().await?;
            let start = if replace_pending {
                reconciler.start_checkout_replacing_pending(plan_id).await?
            } else {
                reconciler.start_checkout(plan_id).await?
            };
            match start {
                CheckoutStart::Redirect { url, session_id } => {
                    print_json(&json!({ "checkout_url": url, "session_id": session_id }))
                }
                CheckoutStart::PendingConflict { resume_url, session_id, message } => print_json(&json!({
                    "pending": true,
                    "message": message,
                    "resume_url": resume_url,
                    "session_id": session_id,
                    "hint": "resume the payment, or rerun with --replace-pending",
                })),
            }
        }
        CheckoutSubcommand::Return { url } => {
            let location = url::Url::parse(&url).map_err(|e| CliError::InvalidUrl(e.to_string()))?;
            session.require_user().await?;
            let history = MemoryHistory::new(location);
            let outcome = reconciler.reconcile(&history).await;
            print_json(&json!({
                "outcome": outcome_name(&outcome),
                "notice": outcome.notice(),
                "location": history.location().as_str(),
                "subscription_active": session.subscription.is_active(),
            }))
        }
        CheckoutSubcommand::CancelPending => {
            session.require_user().await?;
            reconciler.cancel_pending().await?;
            print_json(&json!({ "canceled": true }))
        }
    }
}

fn outcome_name(outcome: &CheckoutOutcome) -> &'static str {
    match outcome {
        CheckoutOutcome::NoReturn => "no_return",
        CheckoutOutcome::Activated { .. } => "activated",
        CheckoutOutcome::ConfirmFailed { .. } => "confirm_failed",
        CheckoutOutcome::AlreadyProcessed { .. } => "already_processed",
        CheckoutOutcome::Canceled => "canceled",
        CheckoutOutcome::Incomplete => "incomplete",
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
