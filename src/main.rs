use clap::{Parser, Subcommand};
use log::{error, info};
use std::collections::BTreeSet;
use std::path::PathBuf;
use stockmaster::configuration::StorageConfig;
use stockmaster::storage::{MigrationReport, NewProduct, Storage, StorageState};

#[derive(Parser)]
#[command(name = "stockmaster")]
#[command(version)]
#[command(about = "Inspect and maintain StockMaster inventory storage")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "STOCKMASTER_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show backend state and key counts
    Status,
    /// Print the value stored under a key
    Get { key: String },
    /// Store a JSON value (non-JSON input is stored as a string)
    Set { key: String, value: String },
    /// Delete a key from both backends
    Remove { key: String },
    /// List keys from both backends
    Keys,
    /// Run the one-shot migration and print its report
    Migrate,
    /// Manage the structured products table
    #[command(subcommand)]
    Products(ProductCommand),
}

#[derive(Subcommand)]
enum ProductCommand {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0.0)]
        price: f64,
        #[arg(long, default_value_t = 0)]
        stock: i64,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        image_url: Option<String>,
    },
    Delete { id: i64 },
}

fn load_config(args: &Args) -> StorageConfig {
    let config = match &args.config {
        Some(path) => StorageConfig::from_file(path).unwrap_or_else(|e| {
            error!("Unable to import configuration from {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => StorageConfig::default().with_env_overrides(),
    };
    match &args.data_dir {
        Some(dir) => StorageConfig {
            data_dir: dir.clone(),
            ..config
        },
        None => config,
    }
}

fn print_report(report: Option<&MigrationReport>) {
    let Some(report) = report else {
        println!("migration: not run (durable backend unavailable)");
        return;
    };
    if let MigrationReport::Completed { keys } = report {
        for entry in keys {
            println!("{:<32} {:?}", entry.key, entry.outcome);
        }
        println!(
            "migration: {} migrated, {} absent, {} failed",
            report.migrated(),
            report.absent(),
            report.failed()
        );
    } else {
        println!("migration: already completed");
    }
}

/// Runs a product subcommand and returns the process exit code.
async fn run_products(storage: &Storage, command: ProductCommand) -> i32 {
    let result = match command {
        ProductCommand::List => storage.list_products().await.map(|products| {
            for p in products {
                println!(
                    "{:>5}  {:<24} {:>10.2} {:>6}  {}",
                    p.id,
                    p.name,
                    p.price,
                    p.stock,
                    p.category.unwrap_or_default()
                );
            }
        }),
        ProductCommand::Add {
            name,
            price,
            stock,
            category,
            description,
            image_url,
        } => {
            let product = NewProduct {
                name,
                description,
                price,
                stock,
                category,
                image_url,
            };
            storage
                .insert_product(&product)
                .await
                .map(|created| println!("created product {}", created.id))
        }
        ProductCommand::Delete { id } => storage.delete_product(id).await.map(|removed| {
            if removed {
                println!("deleted product {}", id);
            } else {
                println!("product {} not found", id);
            }
        }),
    };
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("Product operation failed: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let args = Args::parse();
    let config = load_config(&args);
    info!("Using data directory {}", config.data_dir.display());

    let mut storage = Storage::new(config);
    let state = storage.initialize().await;
    if state == StorageState::Degraded {
        info!("Durable backend unavailable, using local store only");
    }

    let mut exit_code = 0;
    match args.command {
        Command::Status => {
            println!("state: {:?}", storage.state());
            println!(
                "local store: {} key(s), {}/{} byte(s)",
                storage.local_store().len(),
                storage.local_store().used_bytes(),
                storage.local_store().quota_bytes()
            );
            if let Some(db) = storage.authoritative() {
                match db.keys().await {
                    Ok(keys) => println!("database: {} key(s) at {}", keys.len(), db.path().display()),
                    Err(e) => error!("Unable to list database keys: {}", e),
                }
            }
        }
        Command::Get { key } => match storage.get_raw(&key).await {
            Some(raw) => println!("{}", raw),
            None => {
                println!("{} is not set", key);
                exit_code = 2;
            }
        },
        Command::Set { key, value } => {
            let parsed = serde_json::from_str::<serde_json::Value>(&value)
                .unwrap_or(serde_json::Value::String(value));
            storage.set_item(&key, &parsed).await;
        }
        Command::Remove { key } => storage.remove_item(&key).await,
        Command::Keys => {
            let mut keys: BTreeSet<String> = storage.local_store().keys().into_iter().collect();
            if let Some(db) = storage.authoritative() {
                match db.keys().await {
                    Ok(db_keys) => keys.extend(db_keys),
                    Err(e) => error!("Unable to list database keys: {}", e),
                }
            }
            for key in keys {
                println!("{}", key);
            }
        }
        Command::Migrate => print_report(storage.last_migration()),
        Command::Products(command) => exit_code = run_products(&storage, command).await,
    }

    storage.close().await;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_product_failure_yields_exit_code_instead_of_exiting() {
        let dir = TempDir::new().unwrap();
        // never initialized, so the products table is unreachable
        let storage = Storage::new(StorageConfig::in_dir(dir.path()));
        assert_eq!(run_products(&storage, ProductCommand::List).await, 1);
        assert_eq!(run_products(&storage, ProductCommand::Delete { id: 1 }).await, 1);
    }

    #[tokio::test]
    async fn test_product_success_yields_zero() {
        let dir = TempDir::new().unwrap();
        let mut storage = Storage::new(StorageConfig::in_dir(dir.path()));
        storage.initialize().await;
        assert_eq!(run_products(&storage, ProductCommand::List).await, 0);
        storage.close().await;
    }
}
