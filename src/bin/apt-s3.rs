use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use apt_s3::config::{Config, LockScope, S3Config, StoreConfig};
use apt_s3::control::DpkgDebExtractor;
use apt_s3::publish::{PublishRequest, Publisher};
use apt_s3::store::{open_store, Visibility};

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage an APT repository kept in an S3 bucket")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    logging: apt_s3::logging::LoggingArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Uploads the given FILE to a bucket as an APT repository.
    Upload(UploadArgs),
}

#[derive(clap::Args, Debug)]
struct UploadArgs {
    /// Package file to upload.
    file: PathBuf,

    /// JSON configuration file.
    #[clap(long)]
    config: Option<PathBuf>,

    /// The name of the S3 bucket to upload to.
    #[clap(long, conflicts_with = "local_root")]
    bucket: Option<String>,

    /// Publish into a directory instead of a bucket.
    #[clap(long)]
    local_root: Option<PathBuf>,

    /// The codename of the APT repository.
    #[clap(long)]
    codename: Option<String>,

    /// The section of the APT repository.
    #[clap(long, alias = "component")]
    section: Option<String>,

    /// The architecture of the package in the APT repository.
    #[clap(long)]
    arch: Option<String>,

    /// The access policy for the uploaded files.
    #[clap(long, value_enum)]
    visibility: Option<Visibility>,

    /// The access key for connecting to S3. Falls back to the configuration
    /// file, then to $AMAZON_ACCESS_KEY_ID.
    #[clap(long)]
    access_key: Option<String>,

    /// The secret key for connecting to S3. Falls back to the configuration
    /// file, then to $AMAZON_SECRET_ACCESS_KEY.
    #[clap(long)]
    secret_key: Option<String>,

    /// Bucket region.
    #[clap(long)]
    region: Option<String>,

    /// Endpoint of an S3-compatible service.
    #[clap(long)]
    endpoint: Option<String>,

    /// Key prefix of the repository within the bucket.
    #[clap(long)]
    prefix: Option<String>,

    /// Lock per architecture index or per codename.
    #[clap(long, value_enum)]
    lock_scope: Option<LockScope>,

    /// Seconds after which another publisher's lock is considered abandoned.
    #[clap(long)]
    lock_stale_after: Option<u64>,

    /// Seconds to wait for the lock before giving up.
    #[clap(long)]
    lock_max_wait: Option<u64>,
}

impl UploadArgs {
    fn config(&self) -> Result<Config, String> {
        let mut config = match (&self.config, &self.bucket, &self.local_root) {
            (Some(path), _, _) => Config::from_file(path).map_err(|e| e.to_string())?,
            (None, Some(bucket), _) => Config::new(StoreConfig::S3(S3Config::new(bucket.as_str()))),
            (None, None, Some(root)) => Config::new(StoreConfig::Local { path: root.clone() }),
            (None, None, None) => {
                return Err("No bucket given. Please specify one with --bucket.".to_string())
            }
        };

        if self.config.is_some() {
            if let Some(bucket) = &self.bucket {
                config.store = StoreConfig::S3(S3Config::new(bucket.as_str()));
            } else if let Some(root) = &self.local_root {
                config.store = StoreConfig::Local { path: root.clone() };
            }
        }

        if let StoreConfig::S3(s3) = &mut config.store {
            if self.access_key.is_some() {
                s3.access_key_id = self.access_key.clone();
            }
            if self.secret_key.is_some() {
                s3.secret_access_key = self.secret_key.clone();
            }
            if self.region.is_some() {
                s3.region = self.region.clone();
            }
            if self.endpoint.is_some() {
                s3.endpoint = self.endpoint.clone();
            }
            if self.prefix.is_some() {
                s3.prefix = self.prefix.clone();
            }
        }

        if let Some(codename) = &self.codename {
            config.codename = codename.clone();
        }
        if let Some(section) = &self.section {
            config.component = section.clone();
        }
        if let Some(visibility) = self.visibility {
            config.visibility = visibility;
        }
        if let Some(scope) = self.lock_scope {
            config.lock.scope = scope;
        }
        if let Some(secs) = self.lock_stale_after {
            config.lock.stale_after_secs = secs;
        }
        if let Some(secs) = self.lock_max_wait {
            config.lock.max_wait_secs = secs;
        }

        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

fn log(message: &str) {
    println!(">> {}", message);
}

fn sublog(message: &str) {
    println!("   -- {}", message);
}

async fn upload(args: &UploadArgs) -> Result<(), String> {
    if !args.file.is_file() {
        return Err(format!("File doesn't exist: {}", args.file.display()));
    }
    let config = args.config()?;

    let store = open_store(&config.store).await.map_err(|e| e.to_string())?;

    log(&format!(
        "Examining package file {}",
        args.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    let publisher = Publisher::from_config(&config, store, Arc::new(DpkgDebExtractor::new()))
        .with_progress(|path| sublog(&format!("Transferring {}", path)));

    let mut request = PublishRequest::new(
        config.codename.as_str(),
        config.component.as_str(),
        args.file.clone(),
    )
    .visibility(config.visibility);
    if let Some(arch) = &args.arch {
        request = request.architecture(arch.as_str());
    }

    log("Uploading package and new manifests");
    let result = publisher.publish(&request).await.map_err(|e| e.to_string())?;
    if let Some(replaced) = &result.replaced {
        log(&format!(
            "Replaced {} {} with {}",
            result.package.package, replaced.version, result.package.version
        ));
    }
    log("Update complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    args.logging.init();

    let outcome = match &args.command {
        Command::Upload(upload_args) => upload(upload_args).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("!! {}", message);
            ExitCode::FAILURE
        }
    }
}
