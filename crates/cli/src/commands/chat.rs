use std::io::{self, BufRead, Write};
use std::sync::Arc;

use cabbot_agent::{
    AgentRuntime, CachedDriverLookup, DriverLookup, HttpDriverLookup, RuntimeSettings,
    SessionStore, StaticDriverLookup,
};
use cabbot_core::config::{AppConfig, LoadOptions};
use cabbot_core::domain::session::UserId;
use tracing::Level;

use crate::commands::CommandResult;

#[derive(Clone, Debug)]
pub struct ChatOptions {
    pub demo: bool,
    pub user_id: String,
}

pub fn run(options: ChatOptions) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    // stdout belongs to the conversation; logs go to stderr.
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .compact()
        .try_init();

    let lookup: Arc<dyn DriverLookup> = if options.demo {
        Arc::new(StaticDriverLookup::demo())
    } else {
        match HttpDriverLookup::new(&config.lookup) {
            Ok(http) => Arc::new(CachedDriverLookup::new(http, config.lookup.cache_ttl())),
            Err(error) => {
                return CommandResult::failure(
                    "chat",
                    "lookup_client",
                    format!("driver lookup client could not be built: {error}"),
                    3,
                );
            }
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let engine = AgentRuntime::new(
        Arc::new(SessionStore::from_config(&config.session)),
        lookup,
        RuntimeSettings::from_config(&config.lookup),
    );
    let user_id = UserId::new(options.user_id);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result =
        runtime.block_on(converse(&engine, &user_id, stdin.lock(), &mut stdout.lock()));

    match result {
        Ok(turns) => CommandResult::success("chat", format!("{turns} turn(s) processed")),
        Err(error) => CommandResult::failure("chat", "terminal_io", error.to_string(), 4),
    }
}

/// Reads one message per line until EOF or `exit`, printing each reply.
/// `/state` shows the filters remembered for the user. Returns the number of turns sent.
pub async fn converse<R, W>(
    engine: &AgentRuntime,
    user_id: &UserId,
    input: R,
    output: &mut W,
) -> io::Result<usize>
where
    R: BufRead,
    W: Write,
{
    let mut turns = 0;
    let mut lines = input.lines();

    loop {
        write!(output, "you> ")?;
        output.flush()?;

        let Some(line) = lines.next().transpose()? else {
            writeln!(output)?;
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }
        if message == "/state" {
            let filters = engine
                .sessions()
                .snapshot(user_id)
                .await
                .map(|session| session.filters.describe())
                .unwrap_or_else(|| "no session".to_string());
            writeln!(output, "state> {filters}")?;
            continue;
        }

        turns += 1;
        let correlation_id = format!("cli-{}-{turns}", user_id.as_str());
        let outcome = engine.handle_turn(user_id, message, &correlation_id).await;
        writeln!(output, "bot> {}", outcome.reply.text())?;
    }

    Ok(turns)
}
