use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tokio::runtime::Handle;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgfetch::application::CacheAdminUseCase;
use imgfetch::domain::entities::{CacheSerializer, FetchEvent, FetchOptions, FetchRequest};
use imgfetch::infrastructure::config::{Command, FetchArgs, resolve_locator};
use imgfetch::infrastructure::{
    AppConfig, CliArgs, FetchCoordinator, HttpImageFetcher, ImageCache, StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

async fn fetch(config: &AppConfig, cache: Arc<ImageCache>, args: FetchArgs) -> Result<()> {
    let fetcher = Arc::new(HttpImageFetcher::new(&config.fetcher_config())?);
    let coordinator = FetchCoordinator::new(cache, fetcher, config.coordinator_config());

    let mut request = FetchRequest::new(resolve_locator(&args.locator)?)
        .with_pipeline(args.pipeline.to_pipeline())
        .with_options(FetchOptions {
            force_refresh: args.force_refresh,
            only_from_cache: args.only_from_cache,
            cache_original_image: args.cache_original,
            serializer: if args.force_png {
                CacheSerializer::ForcePng
            } else {
                CacheSerializer::Original
            },
            progressive: args.progressive.then(|| config.progressive_options()),
            only_load_first_frame: args.first_frame,
            wait_for_cache: true,
            ..FetchOptions::default()
        });
    if let Some(key) = &args.pipeline.key {
        request = request.with_cache_key(key.clone());
    }

    let (_handle, mut events) = coordinator.fetch(request);
    while let Some(event) = events.next().await {
        match event {
            FetchEvent::Progress { received, total } => {
                debug!(received, total = ?total, "Downloading");
            }
            FetchEvent::Frame(frame) => {
                info!(
                    index = frame.index,
                    received = frame.bytes_received,
                    "Partial frame {}x{}",
                    frame.image.width(),
                    frame.image.height()
                );
            }
            FetchEvent::Completed(result) => {
                let loaded = result?;
                println!(
                    "{} {}x{} ({} frames) from {}",
                    loaded.key.source(),
                    loaded.image.width(),
                    loaded.image.height(),
                    loaded.image.frames.len().max(1),
                    loaded.source
                );
                if let Some(output) = args.output.clone() {
                    let image = loaded.image.clone();
                    tokio::task::spawn_blocking(move || image.image.save(&output))
                        .await?
                        .wrap_err("Failed to write output image")?;
                }
            }
        }
    }
    Ok(())
}

async fn run(config: AppConfig, command: Command) -> Result<()> {
    let cache = Arc::new(ImageCache::open(&config.image_cache_config()).await);
    let admin = CacheAdminUseCase::new(cache.clone(), Handle::current());

    let result = match command {
        Command::Fetch(args) => fetch(&config, cache.clone(), args).await,
        Command::Remove { locator, pipeline } => {
            let locator = resolve_locator(&locator)?;
            let source = pipeline.key.as_deref().unwrap_or_else(|| locator.as_str());
            admin
                .remove(source, &pipeline.to_pipeline().identifier())
                .await
                .map_err(Into::into)
        }
        Command::Clear { memory, disk } => {
            if memory {
                admin.clear_memory_cache();
                Ok(())
            } else if disk {
                admin.clear_disk_cache().await.map_err(Into::into)
            } else {
                admin.clean_cache().await.map_err(Into::into)
            }
        }
        Command::Clean => match admin.clean_expired_disk_cache().await {
            Ok(removed) => {
                println!("Removed {removed} expired entries");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Command::Stats => {
            println!("{}", admin.report().await);
            Ok(())
        }
    };

    cache.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = imgfetch::VERSION, "Starting {}", imgfetch::NAME);

    run(config, args.command).await
}
