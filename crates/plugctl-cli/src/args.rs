use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use plugctl_core::{ContextType, GroupId, Target};

#[derive(Parser)]
#[command(name = "plugctl")]
#[command(about = "Discover, install and sync plugins of a multi-plugin CLI")]
#[command(version)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Base directory (default: ~/.plugctl)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage plugins
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Manage contexts
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum PluginAction {
    /// Search plugins available in the discovery sources
    Search {
        /// Plugin name
        #[arg(short, long)]
        name: Option<String>,

        /// Plugin target (kubernetes, mission-control, global, operations)
        #[arg(short, long)]
        target: Option<Target>,

        /// Show every published version
        #[arg(long)]
        show_details: bool,

        /// Include hidden plugins
        #[arg(long)]
        include_hidden: bool,

        /// Use cached inventories only
        #[arg(long)]
        local: bool,
    },

    /// List installed plugins
    List,

    /// Install a plugin, or plugins of a plugin group
    Install {
        /// Plugin name ('all' with --group installs the whole group)
        name: String,

        /// Version constraint: latest, an exact version, vMAJOR or vMAJOR.MINOR
        #[arg(long, conflicts_with = "group")]
        version: Option<String>,

        /// Plugin group (vendor-publisher/name[:version])
        #[arg(long)]
        group: Option<GroupId>,

        /// Plugin target
        #[arg(short, long)]
        target: Option<Target>,

        /// Fetch again even when already installed
        #[arg(long)]
        reinstall: bool,

        /// Use cached inventories only
        #[arg(long)]
        local: bool,
    },

    /// Upgrade an installed plugin to the latest version
    Upgrade {
        /// Plugin name
        name: String,

        /// Plugin target
        #[arg(short, long)]
        target: Option<Target>,
    },

    /// Delete installed plugins
    Delete {
        /// Plugin name ('all' with --target deletes every plugin of the target)
        name: String,

        /// Plugin target
        #[arg(short, long)]
        target: Option<Target>,

        /// Delete every plugin of the target
        #[arg(long)]
        all: bool,

        /// Also delete copies installed for contexts
        #[arg(short, long)]
        force: bool,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Install the plugins recommended for the active contexts
    Sync {
        /// Refresh inventories before syncing
        #[arg(long)]
        refresh: bool,
    },

    /// Remove all plugins and inventory caches
    Clean {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Refresh the inventories of all discovery sources
    Refresh,

    /// Plugin groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },

    /// Discovery sources
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
}

#[derive(Subcommand)]
pub enum GroupAction {
    /// Search plugin groups
    Search {
        /// Group name
        #[arg(short, long)]
        name: Option<String>,

        /// Show every group version
        #[arg(long)]
        show_details: bool,

        /// Include hidden groups
        #[arg(long)]
        include_hidden: bool,
    },

    /// Show the plugins of a group version
    Get {
        /// Group id (vendor-publisher/name[:version])
        group: GroupId,
    },
}

#[derive(Subcommand)]
pub enum SourceAction {
    /// Add a discovery source
    Add {
        /// Source name
        name: String,

        /// OCI image reference or local directory
        #[arg(short, long)]
        uri: String,
    },

    /// List discovery sources
    List,

    /// Point a discovery source at a new location
    Update {
        /// Source name
        name: String,

        /// OCI image reference or local directory
        #[arg(short, long)]
        uri: String,
    },

    /// Delete a discovery source
    Delete {
        /// Source name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum ContextAction {
    /// Create a context and make it active for its type
    Create {
        /// Context name
        name: String,

        /// Context type (kubernetes, mission-control, tanzu)
        #[arg(long = "type", value_name = "TYPE")]
        context_type: ContextType,

        /// Server endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Plugin group whose context-scoped plugins the context uses
        #[arg(long, value_name = "GROUP")]
        group: Vec<GroupId>,

        /// Server metadata matched by recommendations (KEY=VALUE)
        #[arg(long, value_name = "KEY=VALUE")]
        metadata: Vec<String>,

        /// Do not sync plugins afterwards
        #[arg(long)]
        no_sync: bool,
    },

    /// Make a context the active one of its type
    Use {
        /// Context name
        name: String,

        /// Do not sync plugins afterwards
        #[arg(long)]
        no_sync: bool,
    },

    /// List contexts
    List,

    /// Delete a context and the plugins installed for it
    Delete {
        /// Context name
        name: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g., settings.cache_ttl_secs)
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key (e.g., features.show-hidden-plugins)
        key: String,

        /// Value to set
        value: String,
    },

    /// List all config values
    List,

    /// Show config file path
    Path,

    /// Initialize config file with defaults
    Init,
}
