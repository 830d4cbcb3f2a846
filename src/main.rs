use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use jid::BareJid;
use owo_colors::OwoColorize;

use ejabberd_reconcile::config_store::ConfigStore;
use ejabberd_reconcile::diagnostic::FatalError;
use ejabberd_reconcile::sync_engine::Env;
use ejabberd_reconcile::system::{System, SystemConfig};
use ejabberd_reconcile::validate;

/// Exit codes mirror a conventional CLI split: 0 valid, 1 invalid (a
/// rejected document), 2 a tool error (bad arguments, I/O, an unreachable
/// remote) — the same three-way split the teacher's own CLI returns via
/// `ExitCode::from(2)` for infrastructure failures as opposed to `1` for
/// findings against the input itself.
const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_TOOL_ERROR: u8 = 2;

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

fn default_db_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("ejabberd-reconcile").join("db"))
        .unwrap_or_else(|| PathBuf::from("./db"))
}

#[derive(Parser)]
#[command(name = "ejabberd-reconcile", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the long-lived service: file watcher, admin bot, and periodic sync.
    Serve {
        #[arg(long, env = "EJABBERD_RECONCILE_DB_FOLDER")]
        db_folder: Option<PathBuf>,

        #[arg(long, env = "EJABBERD_RECONCILE_ADMIN_API_URL")]
        admin_api_url: String,

        #[arg(long, env = "EJABBERD_RECONCILE_XMPP_DOMAIN")]
        xmpp_domain: String,

        #[arg(long, env = "EJABBERD_RECONCILE_MUC_SERVICE")]
        muc_service: String,

        #[arg(long, env = "EJABBERD_RECONCILE_BOT_JID")]
        bot_jid: String,

        /// Selects how newly-registered users get a password: a fresh
        /// high-entropy secret in prod, a fixed one in dev/test.
        #[arg(long, env = "EJABBERD_RECONCILE_ENV", value_enum, default_value = "prod")]
        env: Env,

        /// Password assigned to newly-registered users in `dev`/`test` env;
        /// ignored in `prod`, where a random one is generated instead.
        #[arg(long, env = "EJABBERD_RECONCILE_DEFAULT_TEST_PASSWORD", default_value = "test-password")]
        default_test_password: String,

        /// A default MUC creation option as `key=value`; repeatable. Merged
        /// under the `moderated`/`members_by_default` flags the engine
        /// derives from each room's `only-admins-can-speak?` (spec §6
        /// `managedMucOptions`).
        #[arg(long = "muc-option", value_parser = parse_key_value)]
        muc_options: Vec<(String, String)>,

        /// How many seconds a mutation's lock is held before it's considered
        /// abandoned (spec §6 `syncTimeoutS`).
        #[arg(long, env = "EJABBERD_RECONCILE_SYNC_TIMEOUT_S", default_value_t = 120)]
        sync_timeout_s: u64,
    },

    /// Validate the document on disk without contacting ejabberd, and exit.
    Validate {
        #[arg(long, env = "EJABBERD_RECONCILE_DB_FOLDER")]
        db_folder: Option<PathBuf>,
    },

    /// Print the current effective document as canonical JSON.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print a shell completion script to stdout.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum ConfigAction {
    Print {
        #[arg(long, env = "EJABBERD_RECONCILE_DB_FOLDER")]
        db_folder: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve {
            db_folder,
            admin_api_url,
            xmpp_domain,
            muc_service,
            bot_jid,
            env,
            default_test_password,
            muc_options,
            sync_timeout_s,
        } => {
            run_serve(
                db_folder,
                admin_api_url,
                xmpp_domain,
                muc_service,
                bot_jid,
                env,
                default_test_password,
                muc_options,
                sync_timeout_s,
            )
            .await
        }
        Command::Validate { db_folder } => run_validate(db_folder).await,
        Command::Config {
            action: ConfigAction::Print { db_folder },
        } => run_config_print(db_folder).await,
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "ejabberd-reconcile", &mut std::io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(err) => {
            eprintln!("{}", err.to_string().red());
            let code = match err {
                FatalError::Invalid(_) => EXIT_FAILURE,
                FatalError::Store(_) | FatalError::Usage(_) => EXIT_TOOL_ERROR,
            };
            ExitCode::from(code)
        }
    }
}

async fn run_serve(
    db_folder: Option<PathBuf>,
    admin_api_url: String,
    xmpp_domain: String,
    muc_service: String,
    bot_jid: String,
    env: Env,
    default_test_password: String,
    managed_muc_options: Vec<(String, String)>,
    sync_timeout_s: u64,
) -> Result<(), FatalError> {
    let bot_jid: BareJid = bot_jid
        .parse()
        .map_err(|e| FatalError::Usage(format!("invalid --bot-jid: {e}")))?;
    let db_folder = db_folder.unwrap_or_else(default_db_folder);

    let system = System::start(SystemConfig {
        db_folder,
        admin_api_url,
        xmpp_domain,
        muc_service,
        bot_jid,
        env,
        default_test_password,
        managed_muc_options,
        sync_timeout: std::time::Duration::from_secs(sync_timeout_s),
    })
    .await?;

    system.run().await;
    Ok(())
}

async fn run_validate(db_folder: Option<PathBuf>) -> Result<(), FatalError> {
    let store = ConfigStore::new(db_folder.unwrap_or_else(default_db_folder));
    store.ensure_seeded().await?;
    let document = store.read().await?;
    validate::validate(&document).map_err(FatalError::Invalid)?;
    println!("{}", "document is valid".green());
    Ok(())
}

async fn run_config_print(db_folder: Option<PathBuf>) -> Result<(), FatalError> {
    let store = ConfigStore::new(db_folder.unwrap_or_else(default_db_folder));
    store.ensure_seeded().await?;
    let document = store.read().await?;
    let body = serde_json::to_string_pretty(&document).map_err(|e| FatalError::Usage(e.to_string()))?;
    println!("{body}");
    Ok(())
}
