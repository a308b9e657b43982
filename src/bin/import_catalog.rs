use anyhow::{anyhow, Context};
use catalog_admin::{
    cache::{NoCache, SafeCache},
    catalog::CatalogService,
    catalog_api::{Connector, HttpConnector},
    config::{self, Settings},
    import,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Bulk-inserts catalog spreadsheets into the catalog API.
#[derive(Parser, Debug)]
#[command(name = "import-catalog", version)]
struct Cli {
    /// Files to import. Defaults to every supported file of IMPORT_FILES_DIR.
    files: Vec<PathBuf>,
    /// Parse and summarize without sending anything.
    #[arg(long)]
    dry_run: bool,
    /// Agent code for catalogs whose rows do not name one.
    #[arg(long)]
    agent: Option<String>,
}

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(std::env::VarError::NotPresent) = std::env::var("RUST_LOG") {
        std::env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();
    config::load_env_file()?;
    let settings = Settings::from_env()?;
    let cli = Cli::parse();
    let agent = cli.agent.unwrap_or_else(|| settings.default_agent.clone());

    let files = if cli.files.is_empty() {
        let files = import::list_import_files(&settings.import_files_dir);
        if files.is_empty() {
            println!(
                "No importable files in {}",
                settings.import_files_dir.display()
            );
            return Ok(());
        }
        files
    } else {
        if let Some(missing) = cli.files.iter().find(|f| !f.is_file()) {
            return Err(anyhow!("File not found: {}", missing.display()));
        }
        cli.files
    };

    let service = if cli.dry_run {
        None
    } else {
        let username = envmnt::get_or("CATALOG_USERNAME", "");
        let password = envmnt::get_or("CATALOG_PASSWORD", "");
        if username.is_empty() || password.is_empty() {
            return Err(anyhow!(
                "CATALOG_USERNAME and CATALOG_PASSWORD must be set unless --dry-run is given"
            ));
        }
        let connector = HttpConnector::new(
            &settings.api_url,
            settings.api_timeout,
            settings.api_retries,
        )?;
        let token = connector
            .authenticate(&username, &password)
            .await
            .context("Unable to authenticate with the catalog API")?;
        Some(CatalogService::new(
            connector.connect(&token),
            SafeCache::new(Arc::new(NoCache)),
            settings.fetch_workers,
        ))
    };

    let mut failed = 0;
    for path in &files {
        let (request, summary) = match import::load_file(path, &agent) {
            Ok(loaded) => loaded,
            Err(err) => {
                log::error!("Unable to read {}: {err}", path.display());
                failed += 1;
                continue;
            }
        };
        println!("{summary}");
        let Some(service) = &service else {
            continue;
        };
        match service.bulk_insert(&request).await {
            Ok(()) => println!("  Imported {} lots", request.lots().count()),
            Err(err) => {
                log::error!("Bulk insert of {} failed: {err}", path.display());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(anyhow!("{failed} of {} files failed", files.len()));
    }
    Ok(())
}
