mod agent;
mod bridge;
mod chatlog;
mod config;
mod core;
mod cron;
mod memory;
mod providers;
mod skills;
mod state;
mod tide;
mod traits;

#[cfg(test)]
mod testing;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("moobot {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("moobot {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: moobot [COMMAND]\n");
                println!("Commands:");
                println!("  send <message>    Run one agent turn and print the reply");
                println!("                    (reply is wrapped in E2E_REPLY_START/END markers)");
                println!("\nWith no command, moobot runs as a daemon.");
                println!("\nState directory: ~/.moobot, or $MOOBOT_STATE_DIR when set.");
                return Ok(());
            }
            "send" => {
                let message = args[2..].join(" ");
                if message.trim().is_empty() {
                    eprintln!("Usage: moobot send <message>");
                    std::process::exit(1);
                }
                return run_send(&message);
            }
            other => {
                eprintln!("Unknown command '{}'. See moobot --help.", other);
                std::process::exit(1);
            }
        }
    }

    let paths = state::StatePaths::resolve()?;
    let config = config::AppConfig::load(&paths.config_file())?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(crate::core::run(config, paths))
}

/// Test entry-point: one message in, the final reply between literal
/// markers on stdout, exit 0.
fn run_send(message: &str) -> anyhow::Result<()> {
    let paths = state::StatePaths::resolve()?;
    let config = config::AppConfig::load(&paths.config_file())?;

    let reply = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(crate::core::send_once(config, paths, message))?;

    println!("E2E_REPLY_START");
    println!("{}", reply);
    println!("E2E_REPLY_END");
    Ok(())
}
