use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

/// Secrets (webhook secrets, API keys, the admin token) are deliberately left off this list.
const DISPLAY_ENVS: [&str; 22] = [
    "RUST_LOG",
    "SGW_HOST",
    "SGW_PORT",
    "SGW_DATABASE_URL",
    "SGW_DB_MAX_CONNECTIONS",
    "SGW_AUTO_MIGRATE",
    "SGW_SETTLEMENT_TIMEOUT_MS",
    "SGW_RETRY_DELAY_SECS",
    "SGW_RETRY_MAX_ATTEMPTS",
    "SGW_RETRY_POLL_SECS",
    "SGW_RETRY_BATCH_SIZE",
    "SGW_RETRY_LEASE_SECS",
    "SGW_RETRY_STALE_AFTER_SECS",
    "SGW_IDEMPOTENCY_RETENTION_HOURS",
    "SGW_IDEMPOTENCY_CLAIM_LEASE_SECS",
    "SGW_STRIPE_SIGNATURE_TOLERANCE_SECS",
    "SGW_RAZORPAY_KEY_ID",
    "SGW_SQUARE_NOTIFICATION_URL",
    "SGW_PROVIDER_TIMEOUT_MS",
    "SGW_STRIPE_API_URL",
    "SGW_RAZORPAY_API_URL",
    "SGW_SQUARE_API_URL",
];

fn display_envs() {
    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<40} {val:<15}");
    })
}
