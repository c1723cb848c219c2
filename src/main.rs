mod cli;

use stowage::config::{self, Config};
use stowage::quota::QuotaEnforcer;
use stowage::repo::DbUsage;
use stowage_common::RequestContext;
use stowage_db::{migrations, pool};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, DbCommands, QuotaCommands};
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "stowage=trace,stowage_db=debug,stowage_common=debug,notification=info".to_string()
        } else {
            "stowage=debug,stowage_db=info,notification=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Db { command } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            match command {
                DbCommands::Version => db_version(&config),
                DbCommands::Sync => db_sync(&config),
            }
        }
        Commands::Quota { command } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            match command {
                QuotaCommands::Usage { owner } => quota_usage(&config, &owner),
                QuotaCommands::Show => {
                    quota_show(&config);
                    Ok(())
                }
            }
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("stowage {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn db_path(config: &Config) -> String {
    config.database.path.to_string_lossy().into_owned()
}

fn db_version(config: &Config) -> Result<()> {
    let conn = pool::open(&db_path(config))?;
    let current = migrations::current_version(&conn)?;
    let pending = migrations::pending(&conn)?;

    println!("Schema version: {} (latest {})", current, migrations::latest_version());
    if !pending.is_empty() {
        println!("Pending migrations, run `stowage db sync`:");
        for m in &pending {
            println!("  {:03} {}", m.version, m.name);
        }
    }
    Ok(())
}

fn db_sync(config: &Config) -> Result<()> {
    let path = db_path(config);
    let conn = pool::open(&path)?;
    let applied = migrations::run_migrations(&conn)
        .with_context(|| format!("Failed to migrate database {}", path))?;

    if applied == 0 {
        println!("Database is up to date (version {})", migrations::latest_version());
    } else {
        println!(
            "Applied {} migration(s), now at version {}",
            applied,
            migrations::current_version(&conn)?
        );
    }
    Ok(())
}

fn quota_usage(config: &Config, owner: &str) -> Result<()> {
    let db_pool = pool::init_pool(&db_path(config))?;
    let enforcer = QuotaEnforcer::new(
        Arc::new(config.quota.clone()),
        Arc::new(DbUsage::new(db_pool)),
    );

    let ctx = RequestContext {
        tenant: Some(owner.to_string()),
        ..Default::default()
    };
    let consumed = enforcer.consumed(&ctx, None)?;

    println!("Owner: {}", owner);
    println!("  Consumed: {} bytes", consumed);
    println!("  Limit: {}", config.quota.user_storage_quota);
    match enforcer.remaining(&ctx, None)? {
        Some(remaining) => println!("  Remaining: {} bytes", remaining),
        None => println!("  Remaining: unlimited"),
    }
    Ok(())
}

fn count_limit(limit: i64) -> String {
    if limit < 0 {
        "unlimited".to_string()
    } else {
        limit.to_string()
    }
}

fn quota_show(config: &Config) {
    let quota = &config.quota;
    println!("user_storage_quota: {}", quota.user_storage_quota);
    println!("image_property_quota: {}", count_limit(quota.image_property_quota));
    println!("image_tag_quota: {}", count_limit(quota.image_tag_quota));
    println!("image_member_quota: {}", count_limit(quota.image_member_quota));
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Storage quota: {}", config.quota.user_storage_quota);
            println!("  Notifier: {} ({})", config.notifier.strategy, config.notifier.publisher_id);
            println!("  Task time to live: {}h", config.tasks.time_to_live_hours);
            println!("  Database: {}", config.database.path.display());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            config::validate_config(&config)?;
            println!("Default config:");
            println!("  Storage quota: {}", config.quota.user_storage_quota);
            println!("  Notifier: {}", config.notifier.strategy);
        }
    }

    Ok(())
}
