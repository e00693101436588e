use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use rowdeck_adapters::MysqlBackend;
use rowdeck_core::connection::ConnectionState;
use rowdeck_core::error::SessionError;
use rowdeck_core::model::{ColumnName, ConnectionParams, Row};
use rowdeck_core::session::BrowserSession;
use rowdeck_core::settings::{config_path, Config, ConfigError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rowdeck", version, about = "Browse the tables of a MySQL database")]
struct Cli {
    /// Saved connection profile; overrides the host/port/user/database flags.
    #[arg(long)]
    profile: Option<String>,
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 3306)]
    port: u16,
    #[arg(long, default_value = "root")]
    user: String,
    #[arg(long, default_value = "")]
    database: String,
    #[arg(long, env = "ROWDECK_DB_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,
    /// Config file to use instead of the platform default.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Table to show instead of the first one.
    #[arg(long)]
    table: Option<String>,
    /// Maximum number of rows to print.
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("profile `{name}` is not defined in {}", path.display())]
    UnknownProfile { name: String, path: PathBuf },
    #[error("could not connect: {0}")]
    Connect(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<(PathBuf, Config), ConfigError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => config_path()?,
    };
    let config = Config::load(&path)?;
    Ok((path, config))
}

fn resolve_params(cli: &Cli, config: &Config, path: &Path) -> Result<ConnectionParams, AppError> {
    match &cli.profile {
        Some(name) => config
            .profile(name)
            .map(|profile| profile.params(cli.password.clone()))
            .ok_or_else(|| AppError::UnknownProfile {
                name: name.clone(),
                path: path.to_path_buf(),
            }),
        None => Ok(ConnectionParams::new(
            cli.host.clone(),
            cli.port,
            cli.user.clone(),
            cli.password.clone(),
            cli.database.clone(),
        )),
    }
}

/// Drives the handshake until it either succeeds or fails, waking for the
/// backend's ready push or the session's next timer.
async fn wait_until_settled(
    session: &mut BrowserSession<MysqlBackend>,
    ready: &mut watch::Receiver<bool>,
) {
    let mut listening = true;
    while session.connection().is_connecting() {
        let deadline = session.next_wakeup().map_or_else(
            || Instant::now() + Duration::from_millis(200),
            Instant::from_std,
        );
        tokio::select! {
            changed = ready.changed(), if listening => {
                if changed.is_err() {
                    listening = false;
                } else if *ready.borrow_and_update() {
                    session.on_backend_ready().await;
                }
            }
            () = tokio::time::sleep_until(deadline) => session.tick().await,
        }
    }
}

fn render_table(columns: &[ColumnName], rows: &[Row], limit: usize) -> String {
    let mut lines = Vec::with_capacity(rows.len().min(limit) + 1);
    lines.push(columns.join(" | "));
    for row in rows.iter().take(limit) {
        let cells = columns
            .iter()
            .map(|column| row.render(column))
            .collect::<Vec<_>>();
        lines.push(cells.join(" | "));
    }
    if rows.len() > limit {
        lines.push(format!("... {} more", rows.len() - limit));
    }
    lines.join("\n")
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let (path, config) = load_config(&cli)?;
    let params = resolve_params(&cli, &config, &path)?;

    let backend = MysqlBackend::new();
    let mut ready = backend.ready_signal();
    let mut session = BrowserSession::new(backend, &config.settings);

    session.connect(&params).await;
    wait_until_settled(&mut session, &mut ready).await;
    if let ConnectionState::Failed(reason) = session.connection_state() {
        let detail = session
            .notification()
            .map_or_else(|| reason.clone(), |notice| notice.message.clone());
        return Err(AppError::Connect(detail));
    }

    if let Some(table) = &cli.table {
        session.select_table(table).await?;
    }

    println!("tables: {}", session.tables().join(", "));
    if let Some(table) = session.active_table() {
        println!("\n[{table}]");
        println!(
            "{}",
            render_table(session.display_columns(), session.record_set().rows(), cli.limit)
        );
        let count = session.count_records().await?;
        println!("{count} record(s)");
    }

    session.disconnect().await?;
    info!("session closed");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "rowdeck failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rowdeck_core::model::{Row, Value};
    use std::path::Path;

    use rowdeck_core::settings::{Config, ConnectionProfile};

    use super::{render_table, resolve_params, AppError, Cli};

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["rowdeck"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("arguments should parse")
    }

    fn config_file() -> &'static Path {
        Path::new("/etc/rowdeck/config.toml")
    }

    #[test]
    fn flags_build_connection_params() {
        let cli = cli(&[
            "--host", "db.local", "--port", "3307", "--database", "shop", "--password", "pw",
        ]);

        let params = resolve_params(&cli, &Config::default(), config_file())
            .expect("params should resolve");

        assert_eq!(params.host, "db.local");
        assert_eq!(params.port, 3307);
        assert_eq!(params.user, "root");
        assert_eq!(params.database, "shop");
        assert_eq!(params.password, "pw");
    }

    #[test]
    fn profile_overrides_connection_flags() {
        let mut config = Config::default();
        config.set_profile("prod", ConnectionProfile::new("10.0.0.5", "reader", "warehouse"));
        let cli = cli(&["--profile", "prod", "--host", "ignored", "--password", "pw"]);

        let params = resolve_params(&cli, &config, config_file()).expect("profile should resolve");

        assert_eq!(params.host, "10.0.0.5");
        assert_eq!(params.user, "reader");
        assert_eq!(params.database, "warehouse");
        assert_eq!(params.password, "pw");
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let cli = cli(&["--profile", "missing"]);

        let err = resolve_params(&cli, &Config::default(), config_file())
            .expect_err("profile does not exist");

        assert!(matches!(err, AppError::UnknownProfile { ref name, .. } if name == "missing"));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn rendered_rows_distinguish_null_from_empty() {
        let columns = ["id", "note"].map(String::from);
        let rows = vec![
            Row::new().with("id", Value::int(1)).with("note", Value::text("")),
            Row::new().with("id", Value::int(2)).with("note", Value::Null),
        ];

        let rendered = render_table(&columns, &rows, 10);

        assert_eq!(rendered, "id | note\n1 | \n2 | NULL");
    }

    #[test]
    fn rendering_stops_at_limit() {
        let columns = vec!["id".to_string()];
        let rows = (1..=3)
            .map(|id| Row::new().with("id", Value::int(id)))
            .collect::<Vec<_>>();

        let rendered = render_table(&columns, &rows, 2);

        assert_eq!(rendered, "id\n1\n2\n... 1 more");
    }
}
