use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use plugctl_core::config::{default_base_dir, Config};
use plugctl_core::discovery::{Discovered, DiscoverySource};
use plugctl_core::{
    Context, DefaultFetcher, DeleteOptions, DiscoverOptions, FetchOptions, FileConfigStore,
    GroupCriteria, InstallAction, InstallOptions, InstallOutcome, ManagerPaths,
    PluginCriteria, PluginError, PluginManager, PluginStatus, Result, SyncReport, LATEST,
};

mod args;
use args::{
    Cli, Commands, ConfigAction, ContextAction, GroupAction, PluginAction, Shell, SourceAction,
};

const LOG_ENV: &str = "PLUGCTL_LOG";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = resolve_base_dir(cli.base_dir).and_then(|base_dir| match cli.command {
        Some(Commands::Plugin { action }) => handle_plugin(action, &base_dir),
        Some(Commands::Context { action }) => handle_context(action, &base_dir),
        Some(Commands::Config { action }) => handle_config(action, &base_dir),
        Some(Commands::Completions { shell }) => {
            handle_completions(shell);
            Ok(())
        }
        None => {
            Cli::command().print_help().ok();
            Ok(())
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "[ERROR]".red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", "[HINT]".yellow(), hint);
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let shell = match shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
        Shell::Elvish => clap_complete::Shell::Elvish,
    };
    generate(shell, &mut cmd, "plugctl", &mut io::stdout());
}

fn resolve_base_dir(cli_base: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(base) = cli_base {
        return Ok(base);
    }

    if let Ok(base) = std::env::var("PLUGCTL_HOME") {
        return Ok(PathBuf::from(base));
    }

    default_base_dir()
}

fn build_manager(base_dir: &Path) -> Result<PluginManager> {
    tracing::debug!(base_dir = %base_dir.display(), "loading configuration");
    let config = Config::load(base_dir)?;
    let paths = ManagerPaths::from_base_dir(base_dir);
    let fetcher = Arc::new(DefaultFetcher::new(paths.cache_dir.join("work")));
    Ok(PluginManager::new(
        paths,
        &config.settings,
        fetcher,
        Box::new(FileConfigStore::new(base_dir.to_path_buf())),
    ))
}

fn confirm(prompt: &str) -> Result<bool> {
    println!();
    println!("{}", prompt);
    print!("Type 'yes' to confirm: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    if input.trim() != "yes" {
        println!("Aborted.");
        return Ok(false);
    }
    Ok(true)
}

/// Print per-source failures; fail only when nothing could be queried
fn report_failures<T>(discovered: &mut Discovered<T>) -> Result<()> {
    for failure in &discovered.failures {
        eprintln!(
            "{} discovery source '{}': {}",
            "[WARN]".yellow(),
            failure.source,
            failure.error
        );
    }
    if discovered.items.is_empty() {
        if let Some(error) = discovered.failure_error() {
            return Err(error);
        }
    }
    Ok(())
}

// ========== plugin ==========

fn handle_plugin(action: PluginAction, base_dir: &Path) -> Result<()> {
    let manager = build_manager(base_dir)?;

    match action {
        PluginAction::Search {
            name,
            target,
            show_details,
            include_hidden,
            local,
        } => {
            let criteria = PluginCriteria {
                name,
                target,
                include_hidden,
            };
            let opts = DiscoverOptions {
                fetch: if local {
                    FetchOptions::offline()
                } else {
                    FetchOptions::default()
                },
                include_hidden,
            };
            let mut discovered = manager.discover_standalone_plugins(&criteria, &opts)?;
            report_failures(&mut discovered)?;

            if discovered.items.is_empty() {
                println!("No plugins found.");
                return Ok(());
            }

            println!();
            println!(
                "  {:<24} {:<16} {:<14} {:<18} {}",
                "NAME".bold(),
                "TARGET".bold(),
                "LATEST".bold(),
                "STATUS".bold(),
                "DESCRIPTION".bold()
            );
            for plugin in &discovered.items {
                let status = match plugin.status {
                    PluginStatus::NotInstalled => plugin.status.to_string().normal(),
                    PluginStatus::Installed => plugin.status.to_string().green(),
                    PluginStatus::UpdateAvailable => plugin.status.to_string().yellow(),
                };
                println!(
                    "  {:<24} {:<16} {:<14} {:<18} {}",
                    plugin.name.cyan(),
                    plugin.target.to_string(),
                    plugin.recommended_version,
                    status,
                    plugin.description.dimmed()
                );
                if show_details {
                    println!("      versions: {}", plugin.supported_versions.join(", "));
                    println!("      source:   {}", plugin.source);
                }
            }
            println!();
        }

        PluginAction::List => {
            let records = manager.get_installed_plugins()?;
            if records.is_empty() {
                println!("No plugins installed.");
                println!();
                println!("Install one with: plugctl plugin install <name>");
                return Ok(());
            }

            println!();
            println!(
                "  {:<24} {:<16} {:<12} {:<14} {:<8} {}",
                "NAME".bold(),
                "TARGET".bold(),
                "VERSION".bold(),
                "CONTEXT".bold(),
                "ACTIVE".bold(),
                "UPDATED".bold()
            );
            for record in &records {
                let active = if manager.is_active(record)? {
                    "yes".green()
                } else {
                    "no".red()
                };
                println!(
                    "  {:<24} {:<16} {:<12} {:<14} {:<8} {}",
                    record.name.cyan(),
                    record.target.to_string(),
                    record.version,
                    record.context_name.as_deref().unwrap_or("-"),
                    active,
                    record
                        .updated_at
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M")
                );
            }
            println!();
        }

        PluginAction::Install {
            name,
            version,
            group,
            target,
            reinstall,
            local,
        } => {
            let opts = InstallOptions {
                fetch: if local {
                    FetchOptions::offline()
                } else {
                    FetchOptions::default()
                },
                reinstall,
            };

            match group {
                Some(group) => {
                    let report = manager.install_plugins_from_group(&name, &group, target, &opts)?;
                    println!();
                    println!("Plugin group {}", report.group.to_string().cyan());
                    for outcome in &report.installed {
                        print_outcome(outcome);
                    }
                    for id in &report.deferred {
                        println!(
                            "  {} {} (installed when a matching context is active)",
                            "Deferred:".yellow(),
                            id
                        );
                    }
                    for (id, error) in &report.failures {
                        println!("  {} {}: {}", "Failed:".red(), id, error);
                    }
                    println!();
                }
                None => {
                    let constraint = version.as_deref().unwrap_or(LATEST);
                    let outcome =
                        manager.install_standalone_plugin(&name, constraint, target, &opts)?;
                    print_outcome(&outcome);
                }
            }
        }

        PluginAction::Upgrade { name, target } => {
            let outcome = manager.upgrade_plugin(&name, target, &InstallOptions::default())?;
            print_outcome(&outcome);
        }

        PluginAction::Delete {
            name,
            target,
            all,
            force,
            yes,
        } => {
            let subject = match target {
                Some(t) if all => format!("all plugins of target '{}'", t),
                Some(t) => format!("plugin '{}' ({})", name, t),
                None => format!("plugin '{}'", name),
            };
            if !yes && !confirm(&format!("Delete {}?", subject.yellow()))? {
                return Ok(());
            }

            let removed = manager.delete_plugin(
                &name,
                target,
                &DeleteOptions {
                    force_delete: force,
                    all,
                },
            )?;
            for record in &removed {
                println!(
                    "{} {} {}",
                    "Deleted:".green(),
                    record.identifier().to_string().cyan(),
                    record.version
                );
            }
        }

        PluginAction::Sync { refresh } => {
            let opts = InstallOptions {
                fetch: if refresh {
                    FetchOptions::refresh()
                } else {
                    FetchOptions::default()
                },
                reinstall: false,
            };
            let report = manager.sync_plugins(&opts)?;
            print_sync_report(&report);
            report.into_result()?;
        }

        PluginAction::Clean { yes } => {
            if !yes
                && !confirm(&format!(
                    "Remove all plugins under {}?",
                    manager.paths().plugin_root.display()
                ))?
            {
                return Ok(());
            }
            manager.clean()?;
            println!("{} all plugins and caches removed", "Cleaned:".green());
        }

        PluginAction::Refresh => {
            let mut discovered = manager.refresh_sources()?;
            for index in &discovered.items {
                let count = index
                    .find_plugins(&PluginCriteria {
                        include_hidden: true,
                        ..Default::default()
                    })
                    .len();
                println!(
                    "{} {} ({} plugins)",
                    "Refreshed:".green(),
                    index.source_name().cyan(),
                    count
                );
            }
            if let Some(error) = discovered.failure_error() {
                return Err(error);
            }
        }

        PluginAction::Group { action } => handle_group(action, &manager)?,
        PluginAction::Source { action } => handle_source(action, base_dir, &manager)?,
    }

    Ok(())
}

fn print_outcome(outcome: &InstallOutcome) {
    let id = outcome.id.to_string();
    match &outcome.action {
        InstallAction::Installed => {
            println!("{} {} {}", "Installed:".green(), id.cyan(), outcome.version)
        }
        InstallAction::Upgraded { from } => println!(
            "{} {} {} -> {}",
            "Upgraded:".green(),
            id.cyan(),
            from,
            outcome.version
        ),
        InstallAction::Downgraded { from } => println!(
            "{} {} {} -> {}",
            "Downgraded:".yellow(),
            id.cyan(),
            from,
            outcome.version
        ),
        InstallAction::AlreadyInstalled => println!(
            "{} {} {} is already installed",
            "Skipped:".dimmed(),
            id.cyan(),
            outcome.version
        ),
    }
}

fn print_sync_report(report: &SyncReport) {
    if report.is_noop() {
        println!("All plugins are up to date.");
        return;
    }
    for (context, outcome) in &report.installed {
        print!("[{}] ", context.cyan());
        print_outcome(outcome);
    }
    for record in &report.removed {
        println!(
            "[{}] {} {}",
            record.context_name.as_deref().unwrap_or("-").cyan(),
            "Removed:".yellow(),
            record.identifier()
        );
    }
}

// ========== plugin group ==========

fn handle_group(action: GroupAction, manager: &PluginManager) -> Result<()> {
    match action {
        GroupAction::Search {
            name,
            show_details,
            include_hidden,
        } => {
            let criteria = GroupCriteria {
                name,
                include_hidden,
                ..Default::default()
            };
            let mut discovered =
                manager.discover_plugin_groups(&criteria, &FetchOptions::default())?;
            report_failures(&mut discovered)?;

            if discovered.items.is_empty() {
                println!("No plugin groups found.");
                return Ok(());
            }

            println!();
            println!(
                "  {:<36} {:<14} {}",
                "GROUP".bold(),
                "LATEST".bold(),
                "DESCRIPTION".bold()
            );
            for group in &discovered.items {
                println!(
                    "  {:<36} {:<14} {}",
                    group.id().to_string().cyan(),
                    group.recommended_version().unwrap_or_else(|| "-".into()),
                    group.description.dimmed()
                );
                if show_details {
                    println!("      versions: {}", group.sorted_versions().join(", "));
                }
            }
            println!();
        }

        GroupAction::Get { group } => {
            let found = manager.get_plugin_group(&group, &FetchOptions::default())?;
            let version = found.sorted_versions().pop().unwrap_or_default();
            println!();
            println!(
                "{} {}",
                "Plugin group:".bold(),
                found.id().with_version(version.clone()).to_string().cyan()
            );
            if !found.description.is_empty() {
                println!("{}", found.description.dimmed());
            }
            println!();
            println!(
                "  {:<24} {:<16} {:<12} {:<10} {}",
                "NAME".bold(),
                "TARGET".bold(),
                "VERSION".bold(),
                "MANDATORY".bold(),
                "SCOPE".bold()
            );
            for entry in found.plugins(&version).unwrap_or_default() {
                println!(
                    "  {:<24} {:<16} {:<12} {:<10} {}",
                    entry.name.cyan(),
                    entry.target.to_string(),
                    entry.version,
                    if entry.mandatory { "yes" } else { "no" },
                    if entry.context_scoped {
                        "context"
                    } else {
                        "standalone"
                    }
                );
            }
            println!();
        }
    }
    Ok(())
}

// ========== plugin source ==========

fn handle_source(action: SourceAction, base_dir: &Path, manager: &PluginManager) -> Result<()> {
    match action {
        SourceAction::Add { name, uri } => {
            let mut config = Config::load(base_dir)?;
            let source = DiscoverySource::from_uri(&name, &uri);
            println!(
                "{} {} ({}: {})",
                "Added:".green(),
                name.cyan(),
                source.kind,
                source.locator
            );
            config.add_source(source)?;
            config.save(base_dir)?;
        }

        SourceAction::List => {
            let config = Config::load(base_dir)?;
            if config.discovery_sources.is_empty() {
                println!("No discovery sources configured.");
                println!();
                println!("Add one with: plugctl plugin source add <name> --uri <image-or-path>");
                return Ok(());
            }
            println!();
            println!("  {:<20} {:<8} {}", "NAME".bold(), "KIND".bold(), "LOCATION".bold());
            for source in &config.discovery_sources {
                println!(
                    "  {:<20} {:<8} {}",
                    source.name.cyan(),
                    source.kind.to_string(),
                    source.locator
                );
            }
            println!();
        }

        SourceAction::Update { name, uri } => {
            let mut config = Config::load(base_dir)?;
            let old = config.remove_source(&name)?;
            manager.client().invalidate(&old)?;
            let source = DiscoverySource::from_uri(&name, &uri);
            println!(
                "{} {} -> {}",
                "Updated:".green(),
                name.cyan(),
                source.locator
            );
            config.add_source(source)?;
            config.save(base_dir)?;
        }

        SourceAction::Delete { name } => {
            let mut config = Config::load(base_dir)?;
            let old = config.remove_source(&name)?;
            config.save(base_dir)?;
            manager.client().invalidate(&old)?;
            println!("{} {}", "Deleted:".green(), name.cyan());
        }
    }
    Ok(())
}

// ========== context ==========

fn handle_context(action: ContextAction, base_dir: &Path) -> Result<()> {
    let manager = build_manager(base_dir)?;
    let store = manager.config_store();

    match action {
        ContextAction::Create {
            name,
            context_type,
            endpoint,
            group,
            metadata,
            no_sync,
        } => {
            let mut context = Context::new(&name, context_type);
            context.endpoint = endpoint;
            for id in &group {
                context = context.with_group(&id.to_string());
            }
            for pair in &metadata {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    PluginError::InvalidConfigValue {
                        key: "metadata".to_string(),
                        message: format!("expected KEY=VALUE, got '{}'", pair),
                    }
                })?;
                context = context.with_metadata(key.trim(), value.trim());
            }

            store.add_context(context)?;
            store.set_active_context(&name)?;
            println!(
                "{} {} ({})",
                "Created:".green(),
                name.cyan(),
                context_type
            );

            if !no_sync {
                sync_after_context_change(&manager)?;
            }
        }

        ContextAction::Use { name, no_sync } => {
            store.set_active_context(&name)?;
            println!("{} {}", "Active:".green(), name.cyan());

            if !no_sync {
                sync_after_context_change(&manager)?;
            }
        }

        ContextAction::List => {
            let contexts = store.contexts()?;
            if contexts.is_empty() {
                println!("No contexts.");
                println!();
                println!("Create one with: plugctl context create <name> --type <type>");
                return Ok(());
            }
            let active: Vec<String> = store
                .active_contexts()?
                .into_iter()
                .map(|c| c.name)
                .collect();

            println!();
            println!(
                "  {:<2}{:<20} {:<16} {}",
                "",
                "NAME".bold(),
                "TYPE".bold(),
                "ENDPOINT".bold()
            );
            for context in &contexts {
                let marker = if active.contains(&context.name) { "*" } else { "" };
                println!(
                    "  {:<2}{:<20} {:<16} {}",
                    marker.green(),
                    context.name.cyan(),
                    context.context_type.to_string(),
                    context.endpoint.as_deref().unwrap_or("-")
                );
            }
            println!();
        }

        ContextAction::Delete { name, yes } => {
            if store.context(&name)?.is_none() {
                return Err(PluginError::ContextNotFound { name });
            }
            if !yes
                && !confirm(&format!(
                    "Delete context '{}' and the plugins installed for it?",
                    name.yellow()
                ))?
            {
                return Ok(());
            }

            let deletion = manager.delete_context(&name)?;
            println!(
                "{} {} ({} plugins removed)",
                "Deleted:".green(),
                deletion.context.name.cyan(),
                deletion.removed.len()
            );
        }
    }

    Ok(())
}

fn sync_after_context_change(manager: &PluginManager) -> Result<()> {
    match manager.sync_plugins(&InstallOptions::default()) {
        Ok(report) => {
            print_sync_report(&report);
            report.into_result()?;
            Ok(())
        }
        Err(PluginError::NoDiscoverySources) => {
            eprintln!(
                "{} no discovery sources configured, skipping plugin sync",
                "[WARN]".yellow()
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// ========== config ==========

fn handle_config(action: ConfigAction, base_dir: &Path) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load(base_dir)?;
            match config.get(&key) {
                Some(value) => {
                    println!("{}", value);
                }
                None => {
                    return Err(PluginError::ConfigKeyNotFound { key });
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load(base_dir)?;
            config.set(&key, &value)?;
            config.save(base_dir)?;
            println!("{} {} = {}", "Set:".green(), key, value);
        }
        ConfigAction::List => {
            let config = Config::load(base_dir)?;
            println!();
            for (key, value) in config.list() {
                println!("{} = {}", key.cyan(), value);
            }
            println!();
        }
        ConfigAction::Path => {
            let path = Config::path(base_dir);
            println!("{}", path.display());
        }
        ConfigAction::Init => {
            let path = Config::init(base_dir)?;
            println!("{} {}", "Initialized:".green(), path.display());
        }
    }

    Ok(())
}
