//! # Limbo Plugin Runtime
//!
//! The plugin runtime of the limbo chat application: tracks installed
//! plugins, loads their code into isolated modules, wires the capabilities
//! they declare (LLM providers, settings, lifecycle hooks) into the host and
//! keeps one misbehaving plugin from affecting the others.
//!
//! ## Components
//!
//! - [`PluginManager`]: registry of active plugins and the `plugin:*` channel
//! - [`PluginSystem`]: lifecycle orchestration, per-id serialization, hooks
//! - [`ModuleLoader`]: turns plugin source into a [`PluginModule`]
//!   ([`WasmModuleLoader`] for sandboxed WebAssembly, [`NativeModuleLoader`]
//!   for plugins compiled into the host)
//! - [`PluginContext`]: the capability-scoped handle a plugin receives
//! - [`PluginBackend`]: persistence of installed plugins
//!
//! ## Plugin Structure
//!
//! ```text
//! weather/
//! ├── plugin.toml      # Plugin manifest
//! ├── plugin.wasm      # Entry point
//! └── data.json        # Persisted enabled flag and settings
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use limbo_plugins::{FsPluginBackend, PluginConfig, PluginSystem, WasmModuleLoader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PluginConfig::default();
//!     let backend = Arc::new(FsPluginBackend::new(&config.plugins_dir));
//!     let loader = Arc::new(WasmModuleLoader::from_config(&config)?);
//!     let system = PluginSystem::new(config, backend, loader);
//!
//!     let report = system.load_all_plugins().await?;
//!     for llm in system.manager().registered_llms_list() {
//!         println!("{} ({})", llm.id, llm.llm.name);
//!     }
//!     println!("{} plugins failed", report.failed.len());
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backend;
pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod hooks;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod plugin;
pub mod runtime;
pub mod settings;
pub mod system;

// Re-exports for convenience
pub use api::{
    Chat, ChatMessage, DetachedApiBridge, GetChatMessagesOptions, HostBridge, LoggingHostBridge,
    MessageRole, Notification, NotificationLevel, PluginApi, PluginApiBridge,
};
pub use backend::{
    FsPluginBackend, InMemoryPluginBackend, InstallSource, PluginBackend, PluginData, PluginRecord,
};
pub use capability::{
    Llm, NAMESPACE_SEPARATOR, RegisteredLlm, build_namespaced_resource_id, extract_plugin_id,
    parse_namespaced_resource_id,
};
pub use config::PluginConfig;
pub use context::PluginContext;
pub use error::{PluginError, Result};
pub use events::{ContextEvent, EventEmitter, PluginEvent, Subscription};
pub use hooks::{AfterChatCreatedOptions, HookName};
pub use loader::{ModuleFactory, ModuleLoader, NativeModuleLoader};
pub use manager::PluginManager;
pub use manifest::{PluginManifest, PluginMetadata, PluginPermission};
pub use plugin::{ActivePlugin, PluginModule, PluginState, PluginStatus};
pub use runtime::{WasmModule, WasmModuleLoader, WasmRuntime};
pub use settings::{Setting, SettingDeclaration, SettingKind, SettingsMap, resolve_settings};
pub use system::{LoadReport, PluginSystem};

/// Plugin runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Plugin manifest file name.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Default entry point file name.
pub const WASM_FILE: &str = "plugin.wasm";

/// Persisted plugin state file name.
pub const DATA_FILE: &str = "data.json";
