//! rvpatch - ReVanced patch manager
//!
//! Command-line front end: keeps the tools current, shows patches per APK,
//! edits selections and options, and runs the patcher.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use rvpatch::apk::{self, Apk};
use rvpatch::catalog::{Application, Catalog};
use rvpatch::command::{self, SynthesisError};
use rvpatch::config::{Config, Settings};
use rvpatch::runner;
use rvpatch::store::{self, PatchState};
use rvpatch::tools::{SyncMode, ToolError, ToolKind, ToolManager, ToolSet};

#[derive(Parser)]
#[command(name = "rvpatch")]
#[command(version)]
#[command(about = "Manage ReVanced patch selections for a folder of APKs and run the patcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Never contact the tools feed
    #[arg(long, global = true)]
    offline: bool,

    /// Settings file (default: ~/.config/rvpatch/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the APK folder
    #[arg(long, global = true)]
    apk_folder: Option<PathBuf>,

    /// Override the output folder
    #[arg(long, global = true)]
    output_folder: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a settings file with the defaults and create the folders
    Init,

    /// Check for and download new ReVanced tools
    Tools {
        /// Check the feed even if the last check is recent
        #[arg(long)]
        force: bool,
    },

    /// List the applications in the patch catalog
    Apps,

    /// List the APKs in the APK folder
    List,

    /// Show the patches and options for an APK
    Patches {
        /// Path to the APK
        apk: PathBuf,
    },

    /// Choose which patches to apply to an APK
    Select {
        /// Path to the APK
        apk: PathBuf,

        /// Patch names to include
        names: Vec<String>,

        /// Store the catalog's default patches
        #[arg(long, conflicts_with_all = ["names", "clear"])]
        defaults: bool,

        /// Remove the stored selection
        #[arg(long, conflicts_with = "names")]
        clear: bool,
    },

    /// Set a patch option for an APK
    SetOption {
        /// Path to the APK
        apk: PathBuf,
        /// Patch name
        patch: String,
        /// Option key
        key: String,
        /// New value (empty or "null" clears it)
        value: String,
    },

    /// Print the patcher command for an APK
    Command {
        /// Path to the APK
        apk: PathBuf,
    },

    /// Patch APKs (all APKs in the APK folder if none are given)
    Run {
        /// APKs to patch
        apks: Vec<PathBuf>,

        /// Print the commands without running them
        #[arg(long)]
        dry_run: bool,

        /// Rename each APK to <title>-<version>.apk first
        #[arg(long)]
        normalize: bool,
    },

    /// Rename an APK to <title>-<version>.apk
    Normalize {
        /// Path to the APK
        apk: PathBuf,
    },

    /// Print the APKMirror search link for an APK's package
    Mirror {
        /// Path to the APK
        apk: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = match &cli.config {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    let mut settings = Settings::load(&settings_path)?;
    if let Some(folder) = &cli.apk_folder {
        settings.apk_folder = folder.clone();
    }
    if let Some(folder) = &cli.output_folder {
        settings.output_folder = folder.clone();
    }

    let _guard = init_logging(cli.verbose, settings.log_file.as_deref())?;

    let config = Config::from_settings(settings.clone())
        .with_context(|| format!("Invalid settings in {}", settings_path.display()))?;
    config.ensure_directories()?;

    let sync_mode = if cli.offline { SyncMode::Offline } else { SyncMode::Auto };

    match cli.command {
        Commands::Init => {
            if settings_path.exists() {
                println!("Settings already exist at {}", settings_path.display());
            } else {
                settings.save(&settings_path)?;
                println!("Wrote {}", settings_path.display());
            }
            println!("APK folder:    {}", config.apk_folder.display());
            println!("Output folder: {}", config.output_folder.display());
            println!("Tools folder:  {}", config.tools_folder.display());
        }

        Commands::Tools { force } => {
            let mode = match (cli.offline, force) {
                (true, _) => SyncMode::Offline,
                (false, true) => SyncMode::Force,
                (false, false) => SyncMode::Auto,
            };
            let manager = ToolManager::new(&config)?;
            let report = manager.sync(mode).await;

            match (report.due, report.checked) {
                (_, true) => println!("Checked {}", config.tools_endpoint),
                (true, false) => println!("Could not reach {}; keeping local tools", config.tools_endpoint),
                (false, false) if cli.offline => println!("Offline; using local tools"),
                (false, false) => println!(
                    "Checked within the last {} hours; use --force to check now",
                    manager.policy().interval().num_hours()
                ),
            }
            for path in &report.downloaded {
                println!("Downloaded {}", path.display());
            }
            for (name, error) in &report.failed {
                println!("Failed      {}: {}", name, error);
            }
            println!();
            print_tools(&report.tools);
        }

        Commands::Apps => {
            let (_, catalog) = load_catalog(&config, sync_mode).await?;
            println!("{:<45} {:>7}  {}", "Application", "Patches", "Latest version");
            for app in catalog.applications() {
                println!("{:<45} {:>7}  {}", app.name, app.patches.len(), app.latest_version());
            }
        }

        Commands::List => {
            let (_, catalog) = load_catalog(&config, sync_mode).await?;
            let inspector = config.inspector();
            let paths = apk::discover_apks(&config.apk_folder);
            if paths.is_empty() {
                println!("No APKs found in {}", config.apk_folder.display());
            }

            for path in paths {
                let Some(apk) = inspector.inspect(&path) else {
                    println!("{}  (unreadable, see {})", path.display(), config.error_log.display());
                    continue;
                };
                let app = catalog.application_for(&apk.package);
                let selection = match store::load_selection(&apk) {
                    Ok(Some(names)) => format!("{} selected", names.len()),
                    Ok(None) if app.has_defaults() => "defaults".to_string(),
                    Ok(None) => "nothing selected".to_string(),
                    Err(e) => format!("unreadable selection: {}", e),
                };
                println!(
                    "{} {} ({}) [{}]  {}",
                    apk.title,
                    apk.version,
                    apk.package,
                    selection,
                    apk.path.display()
                );
            }
        }

        Commands::Patches { apk } => {
            let (_, catalog) = load_catalog(&config, sync_mode).await?;
            let apk = inspect(&config, &apk)?;
            let app = store::load_options(&apk, catalog.application_for(&apk.package))?;
            let selection = store::load_selection(&apk)?;
            print_patches(&apk, &app, selection.as_deref());
        }

        Commands::Select {
            apk,
            names,
            defaults,
            clear,
        } => {
            let (_, catalog) = load_catalog(&config, sync_mode).await?;
            let apk = inspect(&config, &apk)?;
            let app = store::load_options(&apk, catalog.application_for(&apk.package))?;

            if clear {
                if store::clear_selection(&apk)? {
                    println!("Selection cleared; catalog defaults apply");
                } else {
                    println!("No selection stored");
                }
            } else {
                let names = if defaults {
                    store::default_selection(&apk, &app)
                } else {
                    names
                };
                if names.is_empty() {
                    bail!("No patches to select");
                }
                store::validate_selection(&apk, &app, &names)?;
                store::save_selection(&apk, &names)?;
                println!("Selected {} patches for {}", names.len(), apk.path.display());
            }
        }

        Commands::SetOption { apk, patch, key, value } => {
            let (_, catalog) = load_catalog(&config, sync_mode).await?;
            let apk = inspect(&config, &apk)?;
            let app = store::set_option(&apk, catalog.application_for(&apk.package), &patch, &key, &value)?;
            if let Some(option) = app.patch(&patch).and_then(|p| p.option(&key)) {
                println!("{} / {} = {}", patch, option.key, option.value);
            }
        }

        Commands::Command { apk } => {
            let (tools, catalog) = load_catalog(&config, sync_mode).await?;
            let apk = inspect(&config, &apk)?;
            let app = store::load_options(&apk, catalog.application_for(&apk.package))?;
            match command::synthesize(&apk, &app, &tools, &config.java) {
                Ok(command) => println!("{}", command.command_line()),
                Err(e @ SynthesisError::NoPatchesSelected) => println!("{}", e),
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Run {
            apks,
            dry_run,
            normalize,
        } => {
            let (tools, catalog) = load_catalog(&config, sync_mode).await?;
            let paths = if apks.is_empty() {
                apk::discover_apks(&config.apk_folder)
            } else {
                apks
            };
            let summary = run_patches(&config, &tools, &catalog, paths, dry_run, normalize).await;
            if summary.failed > 0 {
                bail!("{} APK(s) failed", summary.failed);
            }
        }

        Commands::Mirror { apk } => {
            let apk = inspect(&config, &apk)?;
            println!("{}", apk.mirror_search_url());
        }

        Commands::Normalize { apk } => {
            let mut apk = inspect(&config, &apk)?;
            let original = apk.path.clone();
            if apk.normalize_name()? {
                println!("{} -> {}", original.display(), apk.path.display());
            } else {
                println!("{} left unchanged", original.display());
            }
        }
    }

    Ok(())
}

/// Set up the stderr subscriber and, if configured, a plain-text log file.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the program.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env()
        .add_directive(if verbose { "rvpatch=debug".parse()? } else { "rvpatch=warn".parse()? });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().context("Log file path has no file name")?;
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Sync the tools, then load the current patch catalog
async fn load_catalog(config: &Config, mode: SyncMode) -> Result<(ToolSet, Catalog)> {
    let manager = ToolManager::new(config)?;
    let tools = manager.sync(mode).await.tools;

    let path = tools.patch_catalog.clone().ok_or_else(|| ToolError::Missing {
        kind: ToolKind::PatchCatalog,
        folder: manager.folders().patches.clone(),
    })?;

    let catalog = Catalog::load(&path).with_context(|| format!("Failed to load patch catalog {}", path.display()))?;
    info!("Loaded {} applications from {}", catalog.len(), path.display());
    Ok((tools, catalog))
}

fn inspect(config: &Config, path: &Path) -> Result<Apk> {
    if !path.is_file() {
        bail!("APK not found: {}", path.display());
    }
    config.inspector().inspect(path).with_context(|| {
        format!(
            "Could not read package info from {} (see {})",
            path.display(),
            config.error_log.display()
        )
    })
}

fn print_tools(tools: &ToolSet) {
    for kind in ToolKind::ALL {
        match tools.get(kind) {
            Some(path) => println!("{:<17} {}", kind.to_string(), path.display()),
            None => println!("{:<17} (missing)", kind.to_string()),
        }
    }

    let missing = tools.missing();
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
        println!();
        println!("Patching needs: {}", names.join(", "));
    }
}

fn print_patches(apk: &Apk, app: &Application, selection: Option<&[String]>) {
    println!("=== {} {} ({}) ===", apk.title, apk.version, app.name);
    println!("Suggested version: {}", app.latest_version());
    if selection.is_some() {
        println!("Using stored selection from {}", apk.selection_path().display());
    }
    println!();

    for patch in &app.patches {
        let state = store::patch_state(patch, &apk.version);
        let marker = match (selection, state) {
            (_, PatchState::Incompatible) => state.marker(),
            (Some(names), _) if names.contains(&patch.name) => PatchState::Selected.marker(),
            (Some(_), _) => PatchState::Unselected.marker(),
            (None, _) => state.marker(),
        };
        println!("{} {}", marker, patch.name);
        if let Some(description) = patch.description.as_deref().filter(|d| !d.is_empty()) {
            println!("      {}", description);
        }
        for option in &patch.options {
            let required = if option.required { " (required)" } else { "" };
            println!("      {} = {}{}  [{}]", option.key, option.value, required, option.kind());
        }
    }
}

/// Per-batch counts for `run`
#[derive(Debug, Default, PartialEq)]
struct BatchSummary {
    patched: usize,
    skipped: usize,
    failed: usize,
}

/// Patch each APK in turn; a failure on one APK never stops the batch
async fn run_patches(
    config: &Config,
    tools: &ToolSet,
    catalog: &Catalog,
    paths: Vec<PathBuf>,
    dry_run: bool,
    normalize: bool,
) -> BatchSummary {
    let inspector = config.inspector();
    let (mut patched, mut skipped, mut failed) = (0usize, 0usize, 0usize);

    for path in paths {
        let Some(mut apk) = inspector.inspect(&path) else {
            warn!("Skipping {}: package info unavailable", path.display());
            skipped += 1;
            continue;
        };

        if normalize {
            if let Err(e) = apk.normalize_name() {
                warn!("Could not rename {}: {}", apk.path.display(), e);
            }
        }

        let app = match store::load_options(&apk, catalog.application_for(&apk.package)) {
            Ok(app) => app,
            Err(e) => {
                println!("{}: {}", apk.path.display(), e);
                failed += 1;
                continue;
            }
        };
        let command = match command::synthesize(&apk, &app, tools, &config.java) {
            Ok(command) => command,
            Err(e @ SynthesisError::NoPatchesSelected) => {
                println!("{}: {}", apk.path.display(), e);
                skipped += 1;
                continue;
            }
            Err(e) => {
                println!("{}: {}", apk.path.display(), e);
                failed += 1;
                continue;
            }
        };

        println!("{}", command.command_line());
        if dry_run {
            continue;
        }

        let outcome = match runner::run(&command, &apk).await {
            Ok(outcome) => outcome,
            Err(e) => {
                println!("Patching {} failed: {:#}", apk.path.display(), e);
                failed += 1;
                continue;
            }
        };
        if outcome.succeeded() {
            patched += 1;
            if let Some(output) = &outcome.output {
                println!("Patched -> {}", output.display());
            }
        } else {
            failed += 1;
            match &outcome.error_log {
                Some(log) => println!("Patching {} failed, see {}", apk.path.display(), log.display()),
                None => println!("Patching {} failed ({})", apk.path.display(), outcome.status),
            }
        }
    }

    println!();
    if dry_run {
        println!("Skipped: {}  Failed: {}", skipped, failed);
    } else {
        println!("Patched: {}  Skipped: {}  Failed: {}", patched, skipped, failed);
    }
    BatchSummary {
        patched,
        skipped,
        failed,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const CATALOG: &str = r#"[
        {"name": "Patch A", "compatiblePackages": [{"name": "a"}, {"name": "b"}, {"name": "c"}]}
    ]"#;

    /// aapt stand-in reporting the APK's file stem as package and title
    fn fake_aapt(dir: &Path) -> PathBuf {
        let script = dir.join("aapt");
        std::fs::write(
            &script,
            "#!/bin/sh\nname=$(basename \"$3\" .apk)\n\
             echo \"package: name='$name' versionCode='1' versionName='1.0'\"\n\
             echo \"application-label:'$name'\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        let settings = Settings {
            apk_folder: root.join("apks"),
            output_folder: root.join("out"),
            tools_folder: root.join("revanced"),
            aapt: Some(fake_aapt(root)),
            error_log: root.join("error.txt"),
            ..Settings::default()
        };
        let mut config = Config::from_settings(settings).unwrap();
        config.java = root.join("no-such-java");
        config.ensure_directories().unwrap();

        let apks: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|name| config.apk_folder.join(format!("{}.apk", name)))
            .collect();
        for path in &apks {
            std::fs::write(path, b"apk").unwrap();
        }
        // a: malformed options sidecar, b: selected but the runtime is missing, c: nothing selected
        std::fs::write(config.apk_folder.join("a.json"), "{broken").unwrap();
        std::fs::write(config.apk_folder.join("b.patches.json"), r#"["Patch A"]"#).unwrap();

        let tools = ToolSet {
            cli: Some(root.join("revanced-cli-4.6.0-all.jar")),
            patch_bundle: Some(root.join("revanced-patches-4.7.0.jar")),
            patch_catalog: None,
            integrations: Some(root.join("revanced-integrations-1.8.0.apk")),
        };
        let catalog = Catalog::parse(CATALOG).unwrap();

        let summary = run_patches(&config, &tools, &catalog, apks.clone(), false, false).await;
        assert_eq!(
            summary,
            BatchSummary {
                patched: 0,
                skipped: 1,
                failed: 2,
            }
        );

        let dry = run_patches(&config, &ToolSet::default(), &catalog, apks, true, false).await;
        assert_eq!(dry.skipped, 1);
        assert_eq!(dry.failed, 2);
    }
}
