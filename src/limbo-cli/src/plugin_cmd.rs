//! Plugin management commands.
//!
//! - List installed plugins
//! - Install from a directory or URL
//! - Uninstall, enable and disable plugins
//! - Show and change plugin settings
//! - Load every enabled plugin once, as the app does on startup

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use limbo_plugins::{
    AfterChatCreatedOptions, FsPluginBackend, InstallSource, PluginBackend, PluginConfig,
    PluginRecord, PluginSystem, SettingsMap, WasmModuleLoader, resolve_settings,
};

/// Plugin CLI command.
#[derive(Debug, Parser)]
pub struct PluginCli {
    #[command(subcommand)]
    pub subcommand: PluginSubcommand,
}

/// Plugin subcommands.
#[derive(Debug, clap::Subcommand)]
pub enum PluginSubcommand {
    /// List installed plugins
    #[command(visible_alias = "ls")]
    List(PluginListArgs),

    /// Install a plugin from a directory or URL (starts disabled)
    #[command(visible_alias = "add")]
    Install(PluginInstallArgs),

    /// Remove a plugin and its files
    #[command(visible_aliases = ["rm", "remove"])]
    Uninstall(PluginIdArgs),

    /// Enable a plugin and check that it activates
    Enable(PluginIdArgs),

    /// Disable a plugin
    Disable(PluginIdArgs),

    /// Show or change plugin settings
    Settings(PluginSettingsArgs),

    /// Load every enabled plugin and report the result
    Load(PluginLoadArgs),
}

/// Arguments for plugin list command.
#[derive(Debug, Parser)]
pub struct PluginListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show only enabled plugins
    #[arg(long, conflicts_with = "disabled")]
    pub enabled: bool,

    /// Show only disabled plugins
    #[arg(long)]
    pub disabled: bool,
}

/// Arguments for plugin install command.
#[derive(Debug, Parser)]
pub struct PluginInstallArgs {
    /// Plugin directory, or base URL serving plugin.toml
    pub source: String,

    /// Enable the plugin right after installing it
    #[arg(long)]
    pub enable: bool,
}

/// Arguments naming a single plugin.
#[derive(Debug, Parser)]
pub struct PluginIdArgs {
    /// Plugin id
    pub id: String,
}

/// Arguments for plugin settings command.
#[derive(Debug, Parser)]
pub struct PluginSettingsArgs {
    /// Plugin id
    pub id: String,

    /// Values to set, as KEY=VALUE (VALUE is parsed as JSON, else taken as text)
    #[arg(value_parser = parse_setting)]
    pub values: Vec<(String, serde_json::Value)>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for plugin load command.
#[derive(Debug, Parser)]
pub struct PluginLoadArgs {
    /// Also run the after-chat-created hooks for this chat id
    #[arg(long, value_name = "CHAT_ID")]
    pub chat_created: Option<String>,
}

/// Plugin information for display.
#[derive(Debug, Serialize)]
struct PluginInfo {
    id: String,
    name: String,
    version: String,
    description: String,
    enabled: bool,
}

impl From<&PluginRecord> for PluginInfo {
    fn from(record: &PluginRecord) -> Self {
        let meta = &record.manifest.plugin;
        Self {
            id: meta.id.clone(),
            name: meta.name.clone(),
            version: meta.version.clone(),
            description: meta.description.clone(),
            enabled: record.data.enabled,
        }
    }
}

/// Resolve the runtime configuration from an optional file and overrides.
pub fn load_config(path: Option<&Path>, plugins_dir: Option<PathBuf>) -> Result<PluginConfig> {
    let mut config = match path {
        Some(path) => PluginConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PluginConfig::default(),
    };
    if let Some(dir) = plugins_dir {
        config.plugins_dir = dir;
    }
    tracing::debug!(
        config_file = ?path,
        plugins_dir = %config.plugins_dir.display(),
        "Resolved plugin configuration"
    );
    Ok(config)
}

fn build_system(config: PluginConfig) -> Result<PluginSystem> {
    let backend = Arc::new(FsPluginBackend::new(&config.plugins_dir));
    let loader = Arc::new(WasmModuleLoader::from_config(&config)?);
    tracing::debug!(
        activation_timeout_ms = config.activation_timeout_ms,
        hook_timeout_ms = config.hook_timeout_ms,
        "Plugin system ready"
    );
    Ok(PluginSystem::new(config, backend, loader))
}

/// Parse `KEY=VALUE`, reading VALUE as JSON when possible.
fn parse_setting(raw: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err("setting key cannot be empty".to_string());
    }

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Interpret an install argument as a URL when it has an http(s) scheme.
fn parse_source(raw: &str) -> Result<InstallSource> {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        let url = url::Url::parse(raw).with_context(|| format!("Invalid plugin URL: {raw}"))?;
        return Ok(InstallSource::Remote(url));
    }

    let path = PathBuf::from(raw);
    if !path.is_dir() {
        bail!("Plugin source '{}' is not a directory or URL", raw);
    }
    Ok(InstallSource::Directory(path))
}

impl PluginCli {
    /// Run the plugin command.
    pub async fn run(self, config: PluginConfig) -> Result<()> {
        let system = build_system(config)?;
        let result = match self.subcommand {
            PluginSubcommand::List(args) => run_list(&system, args).await,
            PluginSubcommand::Install(args) => run_install(&system, args).await,
            PluginSubcommand::Uninstall(args) => run_uninstall(&system, args).await,
            PluginSubcommand::Enable(args) => run_enable(&system, args).await,
            PluginSubcommand::Disable(args) => run_disable(&system, args).await,
            PluginSubcommand::Settings(args) => run_settings(&system, args).await,
            PluginSubcommand::Load(args) => run_load(&system, args).await,
        };
        system.unload_all().await;
        result
    }
}

async fn run_list(system: &PluginSystem, args: PluginListArgs) -> Result<()> {
    let plugins: Vec<PluginInfo> = system
        .backend()
        .get_all_plugins()
        .await?
        .iter()
        .map(PluginInfo::from)
        .filter(|p| !(args.enabled && !p.enabled) && !(args.disabled && p.enabled))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plugins)?);
    } else if plugins.is_empty() {
        println!("No plugins installed.");
        println!(
            "\nPlugin directory: {}",
            system.config().plugins_dir.display()
        );
        println!("Use 'limbo plugin install <dir|url>' to install a plugin.");
    } else {
        println!("Installed Plugins:");
        println!("{}", "-".repeat(60));
        for plugin in &plugins {
            let status = if plugin.enabled { "enabled" } else { "disabled" };
            println!(
                "  {} ({}) v{} [{}]",
                plugin.name, plugin.id, plugin.version, status
            );
            if !plugin.description.is_empty() {
                println!("    {}", plugin.description);
            }
        }
        println!("\nTotal: {} plugin(s)", plugins.len());
    }

    Ok(())
}

async fn run_install(system: &PluginSystem, args: PluginInstallArgs) -> Result<()> {
    let source = parse_source(&args.source)?;
    let manifest = system.install_plugin(source).await?;
    println!(
        "Installed plugin '{}' v{}",
        manifest.id(),
        manifest.plugin.version
    );

    if args.enable {
        system.enable_plugin(manifest.id()).await?;
        println!("Plugin '{}' enabled.", manifest.id());
    } else {
        println!("Run 'limbo plugin enable {}' to enable it.", manifest.id());
    }
    Ok(())
}

async fn run_uninstall(system: &PluginSystem, args: PluginIdArgs) -> Result<()> {
    system.uninstall_plugin(&args.id).await?;
    println!("Plugin '{}' uninstalled.", args.id);
    Ok(())
}

async fn run_enable(system: &PluginSystem, args: PluginIdArgs) -> Result<()> {
    system.enable_plugin(&args.id).await?;

    let llms: Vec<_> = system
        .manager()
        .registered_llms_list()
        .into_iter()
        .filter(|llm| llm.plugin_id == args.id)
        .collect();
    println!("Plugin '{}' enabled.", args.id);
    for llm in llms {
        println!("  provides LLM {} ({})", llm.id, llm.llm.name);
    }
    Ok(())
}

async fn run_disable(system: &PluginSystem, args: PluginIdArgs) -> Result<()> {
    system.disable_plugin(&args.id).await?;
    println!("Plugin '{}' disabled.", args.id);
    Ok(())
}

async fn run_settings(system: &PluginSystem, args: PluginSettingsArgs) -> Result<()> {
    if !args.values.is_empty() {
        let update: SettingsMap = args.values.into_iter().collect();
        system.update_plugin_settings(&args.id, update).await?;
    }

    let record = system.backend().get_plugin(&args.id).await?;
    let settings = resolve_settings(&record.manifest.settings, &record.data.settings);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
    } else if settings.is_empty() {
        println!("Plugin '{}' declares no settings.", args.id);
    } else {
        for setting in &settings {
            let value = setting
                .value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "<unset>".to_string());
            println!("  {} = {}", setting.id(), value);
            println!("    {}", setting.declaration.label);
        }
    }
    Ok(())
}

async fn run_load(system: &PluginSystem, args: PluginLoadArgs) -> Result<()> {
    let report = system.load_all_plugins().await?;

    for id in &report.loaded {
        println!("  loaded  {id}");
    }
    for id in &report.skipped {
        println!("  skipped {id}");
    }
    for (id, error) in &report.failed {
        println!("  FAILED  {id}: {error}");
    }

    let llms = system.manager().registered_llms_list();
    if !llms.is_empty() {
        println!("\nLLMs:");
        for llm in &llms {
            println!("  {} ({})", llm.id, llm.llm.name);
        }
    }

    if let Some(chat_id) = args.chat_created {
        system
            .execute_on_after_chat_created_hooks(&AfterChatCreatedOptions::new(chat_id))
            .await;
    }

    if !report.is_success() {
        bail!("{} plugin(s) failed to load", report.failed.len());
    }
    Ok(())
}
