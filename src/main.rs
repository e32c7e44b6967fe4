use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use deckmedia::{
    AssignOutcome, BucketClient, Config, ConfigApi, JpegCompressor, LocalStore, MediaLibrary,
    NewImageFile, ObjectStore, ReloadOptions, RestConfigClient,
};

struct Cli {
    config_path: Option<PathBuf>,
    command: Command,
}

enum Command {
    Status,
    Sync { force: bool },
    Add { paths: Vec<PathBuf> },
    Restore { published: bool },
    Reset,
    Cleanup { orphans: bool, unused: bool },
    Publish { slide_id: String, image_id: Option<String>, alt: Option<String> },
}

fn parse_args() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut command = None;
    let mut force = false;
    let mut published = false;
    let mut orphans = false;
    let mut unused = false;
    let mut image_id = None;
    let mut alt = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("deckmedia {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--force" => force = true,
            "--published" => published = true,
            "--orphans" => orphans = true,
            "--unused" => unused = true,
            "--image" => {
                if i + 1 < args.len() {
                    image_id = Some(args[i + 1].clone());
                    i += 1;
                } else {
                    eprintln!("Error: --image requires an id argument");
                    std::process::exit(1);
                }
            }
            "--alt" => {
                if i + 1 < args.len() {
                    alt = Some(args[i + 1].clone());
                    i += 1;
                } else {
                    eprintln!("Error: --alt requires a text argument");
                    std::process::exit(1);
                }
            }
            name if command.is_none() && !name.starts_with('-') => {
                command = Some(name.to_string());
            }
            value if !value.starts_with('-') => positional.push(value.to_string()),
            other => {
                eprintln!("Unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let command = match command.as_deref() {
        Some("status") | None => Command::Status,
        Some("sync") => Command::Sync { force },
        Some("add") => {
            if positional.is_empty() {
                eprintln!("Error: add requires at least one file path");
                std::process::exit(1);
            }
            Command::Add {
                paths: positional.iter().map(PathBuf::from).collect(),
            }
        }
        Some("restore") => Command::Restore { published },
        Some("reset") => Command::Reset,
        Some("cleanup") => Command::Cleanup { orphans, unused },
        Some("publish") => {
            let Some(slide_id) = positional.first().cloned() else {
                eprintln!("Error: publish requires a slide id");
                std::process::exit(1);
            };
            Command::Publish { slide_id, image_id, alt }
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    };

    Cli { config_path, command }
}

fn print_help() {
    println!(
        r#"deckmedia - local/cloud media sync for slide decks

USAGE:
    deckmedia [OPTIONS] [COMMAND]

COMMANDS:
    status              Show library contents and storage usage (default)
    sync [--force]      Load and merge local + cloud views; --force re-arms auto-restore
    add PATH...         Compress, upload and cache image files
    restore             Rebuild the cache from cloud storage
        --published     Restore from the active published slides instead
    reset               Wipe the local cache, keeping cloud references
    cleanup             Run the configured age/count cleanup
        --orphans       Only remove assignments whose image is gone
        --unused        Only remove images no slide references
    publish SLIDE_ID    Publish a slide's current assignment
        --image ID      Assign this image first (rolls back if publish fails)
        --alt TEXT      Alt text for the assignment

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    DECKMEDIA_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/deckmedia/config.toml"#
    );
}

fn build_library(config: Config) -> Arc<MediaLibrary> {
    let store = Arc::new(LocalStore::new(config.db_path.clone()));
    let objects: Arc<dyn ObjectStore> = Arc::new(BucketClient::new(
        &config.cloud.endpoint,
        &config.cloud.bucket,
        &config.cloud.prefix,
        config.cloud.api_key.clone(),
    ));
    let api: Arc<dyn ConfigApi> = Arc::new(RestConfigClient::new(
        &config.cloud.endpoint,
        config.cloud.api_key.clone(),
    ));
    let compressor = Arc::new(JpegCompressor::new(
        config.upload.max_dimension,
        config.upload.jpeg_quality,
    ));
    MediaLibrary::new(store, objects, api, compressor, config)
}

fn print_status_log(library: &MediaLibrary) {
    for entry in library.status_log() {
        match &entry.details {
            Some(details) => println!("  [{}] {} ({details})", entry.level.as_str(), entry.message),
            None => println!("  [{}] {}", entry.level.as_str(), entry.message),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args();

    // Journald on Linux, file fallback otherwise.
    let _ = deckmedia::logging::init(Some(Config::config_dir().join("logs")));

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let library = build_library(config);

    match cli.command {
        Command::Status => {
            library.load().await?;
            let images = library.list_images().await;
            let info = library.get_storage_info().await?;
            println!("{} images", images.len());
            for image in &images {
                let size = image
                    .byte_size
                    .map(|b| format!("{b} bytes"))
                    .unwrap_or_else(|| "-".to_string());
                println!("  {}  {}  [{}]  {}", image.id, image.name, image.source.as_str(), size);
            }
            println!(
                "storage: {} / {} bytes used ({:.1}%)",
                info.used_bytes, info.max_bytes, info.percent_used
            );
            print_status_log(&library);
        }
        Command::Sync { force } => {
            library.reload_library(ReloadOptions { force }).await?;
            let cloud = library.reload_cloud_images().await?;
            println!(
                "synced: {} images in view, {} known in cloud",
                library.list_images().await.len(),
                cloud
            );
            print_status_log(&library);
        }
        Command::Add { paths } => {
            library.load().await?;
            library.set_progress_listener(Arc::new(|p| {
                eprintln!("  {} {}% {}", p.file_name, p.progress, p.stage.as_str());
            }));
            let mut files = Vec::new();
            for path in &paths {
                files.push(NewImageFile::from_path(path)?);
            }
            let outcome = library.add_images(files).await?;
            for record in &outcome.success {
                println!("added {} ({})", record.name, record.id);
            }
            for error in &outcome.errors {
                eprintln!("failed: {error}");
            }
            if !outcome.errors.is_empty() {
                std::process::exit(1);
            }
        }
        Command::Restore { published } => {
            library.load().await?;
            let restored = if published {
                library.restore_from_published_slides().await?
            } else {
                library.restore_from_cloud().await?
            };
            println!("restored {restored} images");
        }
        Command::Reset => {
            library.load().await?;
            library.reset_local_cache().await?;
            println!("local cache reset");
        }
        Command::Cleanup { orphans, unused } => {
            library.load().await?;
            let removed = if orphans {
                library.cleanup_orphaned_assignments().await?
            } else if unused {
                library.cleanup_unused_media().await?
            } else {
                library.auto_cleanup().await?
            };
            println!("removed {removed} entries");
        }
        Command::Publish { slide_id, image_id, alt } => {
            library.load().await?;
            match image_id {
                Some(image_id) => {
                    match library.assign_and_publish(&slide_id, &image_id, alt).await? {
                        AssignOutcome::Committed(assignment) => {
                            println!("published {} -> {}", assignment.slide_id, assignment.image_id);
                        }
                        AssignOutcome::RolledBack { error, .. } => {
                            eprintln!("publish failed, assignment rolled back: {error}");
                            std::process::exit(1);
                        }
                    }
                }
                None => {
                    library.publish_slide(&slide_id).await?;
                    println!("published {slide_id}");
                }
            }
        }
    }

    Ok(())
}
