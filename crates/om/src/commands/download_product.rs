//! `download-product`: fetch a product, and optionally its stemcell, from
//! the vendor network or a blob store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _};
use tracing::{debug, info};

use super::{file_sha256, Context};
use crate::download::{
    cleanup_cache, determine_product_version, write_assign_stemcell, write_download_file,
    AzureBlobstore, AzureConfig, BlobSource, Blobstore, DownloadError, DownloadFile, FileArtifact,
    GcsBlobstore, GcsConfig, ProductSource, S3Blobstore, S3Config, VendorConfig, VendorSource,
    CACHE_CLEANUP_ACK, DEFAULT_VENDOR_HOST,
};
use crate::extractor;
use crate::network::BarSink;
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};

pub const DOWNLOAD_PRODUCT: CommandSpec = CommandSpec {
    name: "download-product",
    summary: "downloads a specified product file from the vendor network or a blobstore",
    description: "This command attempts to download a single product file from the vendor network or an s3|gcs|azure compatible blobstore. The API token used must be associated with a user account that has already accepted the EULA for the specified product",
    options: &[
        OptionSpec::string("source", "enables download from external sources when set to [pivnet|s3|gcs|azure]").short('s').default("pivnet"),
        OptionSpec::string("output-directory", "directory path to which the file will be outputted. File Name will be preserved from the source").short('o').required(),
        OptionSpec::string("stemcell-output-directory", "directory path to which the stemcell file will be outputted. If not provided, output-directory will be used.").short('d'),
        OptionSpec::string("pivnet-product-slug", "path to product").short('p').required(),
        OptionSpec::string("pivnet-api-token", "API token to use when interacting with the vendor network").short('t'),
        OptionSpec::string("pivnet-host", "the API endpoint for the vendor network").default(DEFAULT_VENDOR_HOST),
        OptionSpec::flag("pivnet-disable-ssl", "whether to disable ssl validation when contacting the vendor network"),
        OptionSpec::string("file-glob", "glob to match files within the product to be downloaded.").short('f'),
        OptionSpec::string("pivnet-file-glob", "glob to match files within the product to be downloaded.").hidden(),
        OptionSpec::string("product-version", "version of the product-slug to download files from. Incompatible with --product-version-regex flag."),
        OptionSpec::string("product-version-regex", "regex pattern matching versions of the product-slug to download files from. Highest-versioned match will be used. Incompatible with --product-version flag.").short('r'),
        OptionSpec::string("blobstore-bucket", "bucket name where the product resides in the s3|gcs|azure compatible blobstore"),
        OptionSpec::string("blobstore-product-path", "specify the lookup path where the s3|gcs|azure product artifacts are stored"),
        OptionSpec::string("blobstore-stemcell-path", "specify the lookup path where the s3|gcs|azure stemcell artifacts are stored"),
        OptionSpec::string("cache-cleanup", "Delete everything except the latest artifact in output-dir and stemcell-output-dir, set to 'I acknowledge this will delete files in the output directories' to accept these terms").env("CACHE_CLEANUP"),
        OptionSpec::flag("check-already-uploaded", "Check if product is already uploaded on Ops Manager before downloading. This command is authenticated."),
        OptionSpec::string("s3-bucket", "").hidden(),
        OptionSpec::string("gcs-bucket", "").hidden(),
        OptionSpec::string("azure-container", "").hidden(),
        OptionSpec::string("s3-product-path", "").hidden(),
        OptionSpec::string("gcs-product-path", "").hidden(),
        OptionSpec::string("azure-product-path", "").hidden(),
        OptionSpec::string("s3-stemcell-path", "").hidden(),
        OptionSpec::string("gcs-stemcell-path", "").hidden(),
        OptionSpec::string("azure-stemcell-path", "").hidden(),
        OptionSpec::string("s3-access-key-id", "access key for the s3 compatible blobstore"),
        OptionSpec::string("s3-secret-access-key", "secret key for the s3 compatible blobstore"),
        OptionSpec::string("s3-auth-type", "can be set to \"iam\" in order to allow use of instance credentials").default("accesskey"),
        OptionSpec::string("s3-region-name", "bucket region in the s3 compatible blobstore. If not using AWS, this value is 'region'"),
        OptionSpec::string("s3-endpoint", "the endpoint to access the s3 compatible blobstore. If not using AWS, this is required"),
        OptionSpec::flag("s3-disable-ssl", "whether to disable ssl (https or http) when contacting the s3 compatible blobstore"),
        OptionSpec::flag("s3-enable-v2-signing", "whether to use v2 signing with your s3 compatible blobstore. (if you don't know what this is, leave blank, or set to 'false')"),
        OptionSpec::string("gcs-service-account-json", "the service account key JSON"),
        OptionSpec::string("gcs-project-id", "the project id for the bucket's gcp account"),
        OptionSpec::string("gcp-service-account-json", "").hidden(),
        OptionSpec::string("gcp-project-id", "").hidden(),
        OptionSpec::string("azure-storage-account", "the name of the storage account where the container exists"),
        OptionSpec::string("azure-storage-key", "the access key for the storage account"),
        OptionSpec::string("stemcell-iaas", "download the latest available stemcell for the product for the specified iaas. for example 'vsphere' or 'vcloud' or 'openstack' or 'google' or 'azure' or 'aws'"),
        OptionSpec::string("stemcell-version", "the version number of the stemcell to download (ie 458.61)"),
        OptionSpec::flag("stemcell-heavy", "force the downloading of a heavy stemcell, will fail if non exists"),
    ],
    config: ConfigMode::Flags,
};

/// First non-empty value among `names`, later names winning like aliases do.
fn aliased<'a>(options: &'a Bound, names: &[&str]) -> &'a str {
    names
        .iter()
        .rev()
        .find_map(|name| options.str(name))
        .unwrap_or_default()
}

/// Settings of one invocation after aliases are folded in.
struct Plan<'a> {
    slug: &'a str,
    glob: &'a str,
    version: Option<&'a str>,
    version_regex: Option<&'a str>,
    output_dir: PathBuf,
    stemcell_output_dir: PathBuf,
    stemcell_iaas: Option<&'a str>,
    stemcell_version: Option<&'a str>,
    stemcell_heavy: bool,
    cleanup: bool,
    check_uploaded: bool,
}

fn require_directory(flag: &str, dir: &str) -> anyhow::Result<()> {
    let path = Path::new(dir);
    if !path.exists() {
        bail!("--{flag} \"{dir}\" does not exist");
    }
    if !path.is_dir() {
        bail!("--{flag} \"{dir}\" is not a directory");
    }
    Ok(())
}

fn validate<'a>(ctx: &Context, options: &'a Bound) -> anyhow::Result<Plan<'a>> {
    let glob = aliased(options, &["file-glob", "pivnet-file-glob"]);
    if glob.is_empty() {
        bail!("--file-glob is required");
    }
    let version = options.str("product-version");
    let version_regex = options.str("product-version-regex");
    match (version, version_regex) {
        (Some(_), Some(_)) => bail!("cannot use both --product-version and --product-version-regex; please choose one or the other"),
        (None, None) => bail!("no version information provided; please provide either --product-version or --product-version-regex"),
        _ => {}
    }
    if options.string("source") == "pivnet" && options.str("pivnet-api-token").is_none() {
        bail!("could not execute \"download-product\": could not parse download-product flags: missing required flag \"--pivnet-api-token\"");
    }
    let stemcell_iaas = options.str("stemcell-iaas");
    if options.flag("stemcell-heavy") && stemcell_iaas.is_none() {
        bail!("--stemcell-heavy requires --stemcell-iaas to be defined");
    }
    if options.str("stemcell-version").is_some() && stemcell_iaas.is_none() {
        bail!("--stemcell-version requires --stemcell-iaas to be defined");
    }

    let output_dir = options.string("output-directory");
    require_directory("output-directory", &output_dir)?;
    let stemcell_output_dir = match options.str("stemcell-output-directory") {
        Some(dir) => {
            require_directory("stemcell-output-directory", dir)?;
            PathBuf::from(dir)
        }
        None => PathBuf::from(&output_dir),
    };

    let cleanup = match options.str("cache-cleanup") {
        Some(CACHE_CLEANUP_ACK) => true,
        Some(other) => {
            ctx.console.warn(format!(
                "--cache-cleanup value {other:?} was not the acknowledgement; no files will be deleted"
            ));
            false
        }
        None => false,
    };

    Ok(Plan {
        slug: options.str("pivnet-product-slug").unwrap_or_default(),
        glob,
        version,
        version_regex,
        output_dir: PathBuf::from(output_dir),
        stemcell_output_dir,
        stemcell_iaas,
        stemcell_version: options.str("stemcell-version"),
        stemcell_heavy: options.flag("stemcell-heavy"),
        cleanup,
        check_uploaded: options.flag("check-already-uploaded") && ctx.global.target.is_some(),
    })
}

/// The configured source, with a progress bar attached.
fn build_source(ctx: &Context, options: &Bound) -> anyhow::Result<Box<dyn ProductSource>> {
    let source = options.string("source");
    let progress = Arc::new(BarSink::new(&ctx.console));
    let bucket = aliased(options, &["blobstore-bucket", "s3-bucket", "gcs-bucket", "azure-container"]);

    let store: Arc<dyn Blobstore> = match source.as_str() {
        "pivnet" => {
            let vendor = VendorSource::new(VendorConfig {
                host: options.string("pivnet-host"),
                token: options.string("pivnet-api-token"),
                disable_ssl: options.flag("pivnet-disable-ssl"),
            })?;
            return Ok(Box::new(vendor.with_progress(progress)));
        }
        "s3" => Arc::new(S3Blobstore::new(S3Config {
            bucket: bucket.to_string(),
            access_key_id: options.string("s3-access-key-id"),
            secret_access_key: options.string("s3-secret-access-key"),
            region: options.string("s3-region-name"),
            endpoint: options.string("s3-endpoint"),
            disable_ssl: options.flag("s3-disable-ssl"),
            enable_v2_signing: options.flag("s3-enable-v2-signing"),
            auth_type: options.string("s3-auth-type").parse()?,
        })?),
        "gcs" => Arc::new(GcsBlobstore::new(GcsConfig {
            bucket: bucket.to_string(),
            project_id: aliased(options, &["gcs-project-id", "gcp-project-id"]).to_string(),
            service_account_json: aliased(
                options,
                &["gcs-service-account-json", "gcp-service-account-json"],
            )
            .to_string(),
            endpoint: None,
        })?),
        "azure" => Arc::new(AzureBlobstore::new(AzureConfig {
            storage_account: options.string("azure-storage-account"),
            key: options.string("azure-storage-key"),
            container: bucket.to_string(),
            endpoint: None,
        })?),
        other => bail!("could not find valid source for '{other}': expected one of pivnet, s3, gcs or azure"),
    };

    let product_path = aliased(
        options,
        &["blobstore-product-path", "s3-product-path", "gcs-product-path", "azure-product-path"],
    );
    let stemcell_path = aliased(
        options,
        &["blobstore-stemcell-path", "s3-stemcell-path", "gcs-stemcell-path", "azure-stemcell-path"],
    );
    Ok(Box::new(
        BlobSource::new(store, product_path, stemcell_path).with_progress(progress),
    ))
}

/// Outcome of fetching one file.
struct Fetched {
    path: PathBuf,
    file: FileArtifact,
    /// The file was left on the source because the appliance already has it.
    skipped: bool,
}

fn is_tile(name: &str) -> bool {
    Path::new(name).extension().is_some_and(|ext| ext == "pivotal")
}

/// Whether the appliance already holds `file`.
async fn already_uploaded(
    ctx: &Context,
    source: &dyn ProductSource,
    file: &FileArtifact,
) -> anyhow::Result<bool> {
    let api = ctx.api()?;
    if is_tile(&file.name) {
        ctx.console
            .log("checking if product already available on Ops Manager...");
        let metadata = match source.product_metadata(file).await {
            Ok(metadata) => metadata,
            Err(err) => {
                ctx.console.warn(format!(
                    "could not extract metadata from product, downloading it anyway: {err}"
                ));
                return Ok(false);
            }
        };
        let found = api
            .check_product_availability(&metadata.name, &metadata.version)
            .await
            .context("could not check Ops Manager for product")?;
        ctx.console.log(if found {
            "product found. Skipping download."
        } else {
            "product not found. Continuing download..."
        });
        Ok(found)
    } else {
        ctx.console
            .log("checking if stemcell already available on Ops Manager...");
        let filename = crate::download::basename(&file.name);
        let report = api
            .diagnostic_report()
            .await
            .context("could not check Ops Manager for stemcell")?;
        let found = report.has_stemcell(filename);
        ctx.console.log(if found {
            "stemcell found. Skipping download."
        } else {
            "stemcell not found. Continuing download..."
        });
        Ok(found)
    }
}

async fn fetch_file(
    ctx: &Context,
    source: &dyn ProductSource,
    plan: &Plan<'_>,
    (slug, version, glob): (&str, &str, &str),
    output_dir: &Path,
) -> anyhow::Result<Fetched> {
    let file = source.latest_product_file(slug, version, glob).await?;
    let basename = crate::download::basename(&file.name);
    let local_name = if source.prefixes_files() {
        basename.to_string()
    } else {
        format!("[{slug},{version}]{basename}")
    };
    let path = output_dir.join(local_name);
    ctx.console.log(format!(
        "attempting to download the file {} from source {}",
        file.name,
        source.name()
    ));

    if plan.check_uploaded {
        match already_uploaded(ctx, source, &file).await {
            Ok(true) => {
                return Ok(Fetched {
                    path,
                    file,
                    skipped: true,
                })
            }
            Ok(false) => {}
            Err(err) => ctx
                .console
                .warn(format!("{err:#}; downloading {} anyway", file.name)),
        }
    }

    let cleanup = |keep: &Path| -> anyhow::Result<()> {
        if plan.cleanup {
            cleanup_cache(output_dir, slug, glob, keep, &ctx.console)
                .context("could not cleanup cache")?;
        }
        Ok(())
    };

    if let Ok(local) = std::fs::metadata(&path) {
        let remote = source
            .file_size(&file)
            .await
            .with_context(|| format!("could not determine size of {}", file.name))?;
        if local.len() == remote {
            ctx.console
                .log(format!("{} already exists, skip downloading", path.display()));
            cleanup(&path)?;
            return Ok(Fetched {
                path,
                file,
                skipped: false,
            });
        }
        ctx.console.log(format!(
            "{} is {} bytes but the remote file is {remote} bytes, downloading again",
            path.display(),
            local.len()
        ));
    }
    cleanup(&path)?;

    let mut partial = path.clone().into_os_string();
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    info!(file = %file.name, destination = %partial.display(), "downloading");
    if let Err(err) = source.download(&file, &partial).await {
        let _ = std::fs::remove_file(&partial);
        return Err(err.into());
    }

    if let Some(expected) = &file.sha256 {
        ctx.console
            .log(format!("calculating sha sum for {}", partial.display()));
        let actual = file_sha256(&partial)
            .with_context(|| format!("could not checksum {}", partial.display()))?;
        if &actual != expected {
            let _ = std::fs::remove_file(&partial);
            let mismatch = DownloadError::Checksum {
                expected: expected.clone(),
                source_name: source.name().to_string(),
                actual,
                path: path.display().to_string(),
            };
            ctx.console.error(mismatch.to_string());
            return Err(mismatch.into());
        }
    }

    tokio::fs::rename(&partial, &path)
        .await
        .with_context(|| format!("could not move {} into place", partial.display()))?;
    debug!(path = %path.display(), "download complete");
    Ok(Fetched {
        path,
        file,
        skipped: false,
    })
}

async fn fetch_stemcell(
    ctx: &Context,
    source: &dyn ProductSource,
    plan: &Plan<'_>,
    iaas: &str,
    product: &Fetched,
) -> anyhow::Result<(String, PathBuf)> {
    ctx.console.log("Downloading stemcell");
    let stemcell = source
        .latest_stemcell(&product.file, &product.path)
        .await
        .context("could not get information about stemcell")?;
    let version = plan
        .stemcell_version
        .map_or_else(|| stemcell.version.clone(), ToString::to_string);

    let globs = if plan.stemcell_heavy {
        vec![format!("bosh*{iaas}*")]
    } else {
        vec![format!("light*bosh*{iaas}*"), format!("bosh*{iaas}*")]
    };

    let mut last_error = None;
    for glob in &globs {
        match fetch_file(
            ctx,
            source,
            plan,
            (&stemcell.slug, &version, glob),
            &plan.stemcell_output_dir,
        )
        .await
        {
            Ok(fetched) => return Ok((version, fetched.path)),
            Err(err) => last_error = Some(err),
        }
    }

    let heavy = if plan.stemcell_heavy { "heavy " } else { "" };
    let cause = last_error.map(|e| format!("{e:#}")).unwrap_or_default();
    Err(anyhow!(
        "could not download stemcell: {cause}\nNo {heavy}stemcell identified for IaaS \"{iaas}\" on the vendor network. Correct the `stemcell-iaas` option to match the IaaS portion of the stemcell filename, or remove the option."
    ))
}

/// Name of the product for `assign-stemcell.yml`.
async fn product_name(
    ctx: &Context,
    source: &dyn ProductSource,
    product: &Fetched,
) -> anyhow::Result<Option<String>> {
    if product.skipped {
        return match source.product_metadata(&product.file).await {
            Ok(metadata) => Ok(Some(metadata.name)),
            Err(err) => {
                ctx.console.log(format!(
                    "cannot extract metadata because the product file was not downloaded, will not create assign-stemcell input: {err}"
                ));
                Ok(None)
            }
        };
    }
    let metadata = extractor::extract_from_file(&product.path)
        .context("cannot parse product metadata")?;
    Ok(Some(metadata.name))
}

/// Run a download against `source` with already validated options.
async fn run_with_source(
    ctx: &Context,
    plan: &Plan<'_>,
    source: &dyn ProductSource,
) -> anyhow::Result<()> {
    let version = determine_product_version(
        source,
        plan.slug,
        plan.version,
        plan.version_regex,
        &ctx.console,
    )
    .await?;

    let product = fetch_file(
        ctx,
        source,
        plan,
        (plan.slug, &version, plan.glob),
        &plan.output_dir,
    )
    .await
    .context("could not download product")?;

    let mut manifest = DownloadFile {
        product_path: product.path.display().to_string(),
        product_slug: plan.slug.to_string(),
        product_version: version,
        ..DownloadFile::default()
    };

    let Some(iaas) = plan.stemcell_iaas else {
        write_download_file(&plan.output_dir, &manifest, &ctx.console)?;
        return Ok(());
    };
    if !is_tile(&product.file.name) {
        ctx.console.log("the downloaded file is not a .pivotal file. Not determining and fetching required stemcell.");
        write_download_file(&plan.output_dir, &manifest, &ctx.console)?;
        return Ok(());
    }

    let (stemcell_version, stemcell_path) =
        fetch_stemcell(ctx, source, plan, iaas, &product).await?;
    manifest.stemcell_path = stemcell_path.display().to_string();
    manifest.stemcell_version.clone_from(&stemcell_version);
    write_download_file(&plan.output_dir, &manifest, &ctx.console)?;

    if let Some(name) = product_name(ctx, source, &product).await? {
        write_assign_stemcell(&plan.output_dir, &name, &stemcell_version, &ctx.console)?;
    }
    Ok(())
}

pub async fn download_product(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let plan = validate(ctx, options)?;
    let source = build_source(ctx, options)?;
    run_with_source(ctx, &plan, source.as_ref()).await
}
