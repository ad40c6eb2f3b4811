//! WASM runtime for executing plugins.
//!
//! Each plugin gets its own `Store` and `Instance`, so plugins never share
//! linear memory. The store lives as long as the plugin is loaded and is
//! refuelled before every call into guest code.
//!
//! # Guest ABI
//!
//! Exports:
//! - `activate() -> i32` (required, `0` means success)
//! - `deactivate() -> i32` (optional)
//! - `on_after_chat_created() -> i32` (optional, input via `input_*`)
//! - `memory`
//!
//! Imports from the `limbo` module (strings are UTF-8 JSON in guest memory):
//! - `register_llm(ptr, len) -> i32`
//! - `log(level, ptr, len)`
//! - `input_len() -> i32`, `input_read(ptr) -> i32`
//! - `get_setting(ptr, len) -> i32`, `setting_read(ptr) -> i32` (the
//!   value has its own buffer, so the hook input stays readable)
//! - `show_notification(ptr, len) -> i32`
//! - `rename_chat(ptr, len) -> i32`
//!
//! # Security
//!
//! - CPU: fuel limit per call, with periodic async yields so timeouts apply
//! - Memory: capped per instance by [`PluginStoreLimits`]

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use wasmtime::{
    Caller, Config, Engine, Instance, Linker, Memory, Module, ResourceLimiter, Store, TypedFunc,
};

use crate::api::Notification;
use crate::capability::Llm;
use crate::config::PluginConfig;
use crate::context::PluginContext;
use crate::hooks::{AfterChatCreatedOptions, HookName};
use crate::loader::ModuleLoader;
use crate::manifest::PluginManifest;
use crate::plugin::PluginModule;
use crate::{PluginError, Result};

/// Import module name for host functions.
pub const HOST_MODULE: &str = "limbo";

/// Fuel consumed between cooperative yields to the async executor.
const FUEL_YIELD_INTERVAL: u64 = 10_000;

/// Maximum number of table elements.
const MAX_TABLE_ELEMENTS: usize = 10_000;

/// Maximum number of instances per store.
const MAX_INSTANCES: usize = 1;

/// Maximum number of tables per instance.
const MAX_TABLES: usize = 10;

/// Maximum number of memories per instance.
const MAX_MEMORIES: usize = 1;

/// Status returned by host functions on success.
const STATUS_OK: i32 = 0;

/// Status returned by host functions on failure.
const STATUS_ERR: i32 = -1;

/// WASM runtime for executing plugins.
pub struct WasmRuntime {
    engine: Engine,
    fuel_per_call: u64,
    max_memory_bytes: usize,
}

impl WasmRuntime {
    /// Create a new WASM runtime with security limits.
    pub fn new(config: &PluginConfig) -> Result<Self> {
        let mut wasm_config = Config::new();
        wasm_config.async_support(true);

        // SECURITY: fuel bounds CPU usage of a single call
        wasm_config.consume_fuel(true);

        let engine = Engine::new(&wasm_config)?;

        Ok(Self {
            engine,
            fuel_per_call: config.wasm_fuel_per_call,
            max_memory_bytes: config.wasm_max_memory_bytes,
        })
    }

    /// Compile a WASM module from binary or text format.
    pub fn compile(&self, plugin_id: &str, wasm_bytes: &[u8]) -> Result<Module> {
        Module::new(&self.engine, wasm_bytes)
            .map_err(|e| PluginError::load_error(plugin_id, format!("compilation failed: {e}")))
    }

    /// Get the engine reference.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile, link and instantiate a plugin.
    pub async fn instantiate(&self, manifest: &PluginManifest, source: &[u8]) -> Result<WasmModule> {
        let plugin_id = manifest.id();
        let module = self.compile(plugin_id, source)?;

        let state = HostState {
            plugin_id: plugin_id.to_string(),
            context: None,
            input: Vec::new(),
            setting: Vec::new(),
            limits: PluginStoreLimits::new(self.max_memory_bytes),
        };

        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        store.set_fuel(self.fuel_per_call)?;
        store.fuel_async_yield_interval(Some(FUEL_YIELD_INTERVAL))?;

        let mut linker = Linker::new(&self.engine);
        define_host_functions(&mut linker)?;

        let instance = linker
            .instantiate_async(&mut store, &module)
            .await
            .map_err(|e| PluginError::load_error(plugin_id, format!("instantiation failed: {e}")))?;

        let activate = instance
            .get_typed_func::<(), i32>(&mut store, "activate")
            .map_err(|e| {
                PluginError::load_error(plugin_id, format!("missing `activate` export: {e}"))
            })?;

        let deactivate = instance.get_typed_func::<(), i32>(&mut store, "deactivate").ok();
        let after_chat_created = instance
            .get_typed_func::<(), i32>(&mut store, HookName::AfterChatCreated.as_str())
            .ok();

        tracing::debug!(
            plugin_id,
            has_deactivate = deactivate.is_some(),
            has_after_chat_created = after_chat_created.is_some(),
            "Instantiated WASM plugin"
        );

        Ok(WasmModule {
            plugin_id: plugin_id.to_string(),
            fuel_per_call: self.fuel_per_call,
            store: Mutex::new(store),
            _instance: instance,
            activate,
            deactivate,
            after_chat_created,
        })
    }
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime")
            .field("fuel_per_call", &self.fuel_per_call)
            .field("max_memory_bytes", &self.max_memory_bytes)
            .finish()
    }
}

/// [`ModuleLoader`] backed by [`WasmRuntime`].
#[derive(Debug, Clone)]
pub struct WasmModuleLoader {
    runtime: Arc<WasmRuntime>,
}

impl WasmModuleLoader {
    pub fn new(runtime: Arc<WasmRuntime>) -> Self {
        Self { runtime }
    }

    /// Create a loader with its own runtime.
    pub fn from_config(config: &PluginConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(WasmRuntime::new(config)?)))
    }
}

#[async_trait]
impl ModuleLoader for WasmModuleLoader {
    async fn load(&self, manifest: &PluginManifest, source: &[u8]) -> Result<Box<dyn PluginModule>> {
        let module = self.runtime.instantiate(manifest, source).await?;
        Ok(Box::new(module))
    }
}

/// Per-store host data.
struct HostState {
    plugin_id: String,

    /// Set when `activate` is called
    context: Option<Arc<PluginContext>>,

    /// Buffer the guest reads with `input_len`/`input_read`
    input: Vec<u8>,

    /// Last value loaded by `get_setting`, read with `setting_read`
    setting: Vec<u8>,

    limits: PluginStoreLimits,
}

/// A loaded WASM plugin instance.
pub struct WasmModule {
    plugin_id: String,
    fuel_per_call: u64,
    store: Mutex<Store<HostState>>,
    _instance: Instance,
    activate: TypedFunc<(), i32>,
    deactivate: Option<TypedFunc<(), i32>>,
    after_chat_created: Option<TypedFunc<(), i32>>,
}

impl WasmModule {
    /// Run an export with a fresh fuel budget and the given input buffer.
    async fn call(
        &self,
        store: &mut Store<HostState>,
        name: &str,
        func: &TypedFunc<(), i32>,
        input: Vec<u8>,
    ) -> anyhow::Result<()> {
        store.set_fuel(self.fuel_per_call)?;
        store.data_mut().input = input;

        let status = func.call_async(&mut *store, ()).await?;
        store.data_mut().input.clear();
        store.data_mut().setting.clear();

        if status != STATUS_OK {
            anyhow::bail!("`{name}` returned status {status}");
        }

        tracing::trace!(plugin_id = %self.plugin_id, export = name, "WASM call returned");
        Ok(())
    }
}

#[async_trait]
impl PluginModule for WasmModule {
    async fn activate(&self, context: Arc<PluginContext>) -> anyhow::Result<()> {
        let mut store = self.store.lock().await;
        store.data_mut().context = Some(context);
        self.call(&mut store, "activate", &self.activate, Vec::new())
            .await
    }

    async fn deactivate(&self) -> anyhow::Result<()> {
        let mut store = self.store.lock().await;
        let result = match &self.deactivate {
            Some(func) => self.call(&mut store, "deactivate", func, Vec::new()).await,
            None => Ok(()),
        };
        store.data_mut().context = None;
        result
    }

    async fn on_after_chat_created(&self, opts: &AfterChatCreatedOptions) -> anyhow::Result<()> {
        let Some(func) = &self.after_chat_created else {
            return Ok(());
        };

        let input = serde_json::to_vec(opts)?;
        let mut store = self.store.lock().await;
        self.call(&mut store, HookName::AfterChatCreated.as_str(), func, input)
            .await
    }
}

impl std::fmt::Debug for WasmModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmModule")
            .field("plugin_id", &self.plugin_id)
            .field("has_deactivate", &self.deactivate.is_some())
            .field("has_after_chat_created", &self.after_chat_created.is_some())
            .finish()
    }
}

/// Store limits for WASM plugin execution.
///
/// SECURITY: Implements wasmtime's ResourceLimiter trait to enforce
/// memory and resource constraints on plugin execution.
#[derive(Debug, Clone)]
struct PluginStoreLimits {
    max_memory_bytes: usize,
}

impl PluginStoreLimits {
    fn new(max_memory_bytes: usize) -> Self {
        Self { max_memory_bytes }
    }
}

impl ResourceLimiter for PluginStoreLimits {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.max_memory_bytes {
            tracing::warn!(
                current_bytes = current,
                desired_bytes = desired,
                max_bytes = self.max_memory_bytes,
                "Plugin memory request denied: exceeds maximum allowed"
            );
            return Ok(false);
        }

        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > MAX_TABLE_ELEMENTS {
            tracing::warn!(
                desired_elements = desired,
                max_elements = MAX_TABLE_ELEMENTS,
                "Plugin table growth denied: exceeds maximum allowed"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn instances(&self) -> usize {
        MAX_INSTANCES
    }

    fn tables(&self) -> usize {
        MAX_TABLES
    }

    fn memories(&self) -> usize {
        MAX_MEMORIES
    }
}

// ========== Host functions ==========

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameChatArgs {
    chat_id: String,
    name: String,
}

fn define_host_functions(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "log",
        |mut caller: Caller<'_, HostState>, level: i32, ptr: i32, len: i32| {
            let message = match read_string(&mut caller, ptr, len) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(plugin_id = %caller.data().plugin_id, error = %e, "Bad log call");
                    return;
                }
            };
            let plugin_id = caller.data().plugin_id.as_str();
            match level {
                0 => tracing::trace!(plugin_id, "{message}"),
                1 => tracing::debug!(plugin_id, "{message}"),
                2 => tracing::info!(plugin_id, "{message}"),
                3 => tracing::warn!(plugin_id, "{message}"),
                _ => tracing::error!(plugin_id, "{message}"),
            }
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "input_len",
        |caller: Caller<'_, HostState>| -> i32 { caller.data().input.len() as i32 },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "input_read",
        |mut caller: Caller<'_, HostState>, ptr: i32| -> i32 {
            let input = std::mem::take(&mut caller.data_mut().input);
            let written = write_bytes(&mut caller, ptr, &input).unwrap_or(STATUS_ERR);
            caller.data_mut().input = input;
            written
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "get_setting",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i32 {
            let Ok(key) = read_string(&mut caller, ptr, len) else {
                return STATUS_ERR;
            };
            let value = caller
                .data()
                .context
                .as_ref()
                .and_then(|ctx| ctx.get_setting_value(&key));
            let Some(value) = value else {
                return STATUS_ERR;
            };
            match serde_json::to_vec(&value) {
                Ok(bytes) => {
                    let len = bytes.len() as i32;
                    caller.data_mut().setting = bytes;
                    len
                }
                Err(_) => STATUS_ERR,
            }
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "setting_read",
        |mut caller: Caller<'_, HostState>, ptr: i32| -> i32 {
            let setting = std::mem::take(&mut caller.data_mut().setting);
            let written = write_bytes(&mut caller, ptr, &setting).unwrap_or(STATUS_ERR);
            caller.data_mut().setting = setting;
            written
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "register_llm",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i32 {
            let result = read_json::<Llm>(&mut caller, ptr, len).and_then(|llm| {
                let ctx = caller
                    .data()
                    .context
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("register_llm called before activate"))?;
                ctx.register_llm(llm)?;
                Ok(())
            });
            status(&caller, "register_llm", result)
        },
    )?;

    linker.func_wrap_async(
        HOST_MODULE,
        "show_notification",
        |mut caller: Caller<'_, HostState>, (ptr, len): (i32, i32)| {
            Box::new(async move {
                let parsed = read_json::<Notification>(&mut caller, ptr, len);
                let context = caller.data().context.clone();
                let result = match (parsed, context) {
                    (Ok(notification), Some(ctx)) => ctx
                        .api()
                        .show_notification(notification)
                        .await
                        .map_err(anyhow::Error::from),
                    (Ok(_), None) => Err(anyhow::anyhow!("no active context")),
                    (Err(e), _) => Err(e),
                };
                Ok::<_, wasmtime::Error>(status(&caller, "show_notification", result))
            })
        },
    )?;

    linker.func_wrap_async(
        HOST_MODULE,
        "rename_chat",
        |mut caller: Caller<'_, HostState>, (ptr, len): (i32, i32)| {
            Box::new(async move {
                let parsed = read_json::<RenameChatArgs>(&mut caller, ptr, len);
                let context = caller.data().context.clone();
                let result = match (parsed, context) {
                    (Ok(args), Some(ctx)) => ctx
                        .api()
                        .rename_chat(&args.chat_id, &args.name)
                        .await
                        .map_err(anyhow::Error::from),
                    (Ok(_), None) => Err(anyhow::anyhow!("no active context")),
                    (Err(e), _) => Err(e),
                };
                Ok::<_, wasmtime::Error>(status(&caller, "rename_chat", result))
            })
        },
    )?;

    Ok(())
}

/// Map a host call result to the guest status code, logging failures.
fn status(caller: &Caller<'_, HostState>, function: &str, result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(e) => {
            tracing::warn!(
                plugin_id = %caller.data().plugin_id,
                function,
                error = %e,
                "Host call from plugin failed"
            );
            STATUS_ERR
        }
    }
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> anyhow::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| anyhow::anyhow!("Plugin has no memory export"))
}

/// Read a string from WASM memory.
fn read_string(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> anyhow::Result<String> {
    let memory = guest_memory(caller)?;

    let data = memory.data(&*caller);
    let start = usize::try_from(ptr)?;
    let end = start + usize::try_from(len)?;

    if end > data.len() {
        anyhow::bail!("Memory access out of bounds");
    }

    Ok(String::from_utf8(data[start..end].to_vec())?)
}

fn read_json<T: serde::de::DeserializeOwned>(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> anyhow::Result<T> {
    let raw = read_string(caller, ptr, len)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write bytes to WASM memory, returns bytes written.
fn write_bytes(caller: &mut Caller<'_, HostState>, ptr: i32, bytes: &[u8]) -> anyhow::Result<i32> {
    let memory = guest_memory(caller)?;

    let data = memory.data_mut(&mut *caller);
    let start = usize::try_from(ptr)?;
    let end = start + bytes.len();

    if end > data.len() {
        anyhow::bail!("Memory access out of bounds");
    }

    data[start..end].copy_from_slice(bytes);
    Ok(bytes.len() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DetachedApiBridge;
    use crate::settings::SettingsMap;

    const REGISTERING_PLUGIN: &str = r#"
        (module
          (import "limbo" "register_llm" (func $register_llm (param i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "{\"id\":\"model1\",\"name\":\"Model One\"}")
          (func (export "activate") (result i32)
            (call $register_llm (i32.const 0) (i32.const 34))))
    "#;

    fn runtime() -> WasmRuntime {
        WasmRuntime::new(&PluginConfig::default()).unwrap()
    }

    fn context(manifest: &PluginManifest) -> Arc<PluginContext> {
        context_with(manifest, SettingsMap::new())
    }

    fn context_with(manifest: &PluginManifest, settings: SettingsMap) -> Arc<PluginContext> {
        Arc::new(PluginContext::new(
            Arc::new(manifest.clone()),
            settings,
            Arc::new(DetachedApiBridge),
        ))
    }

    #[test]
    fn test_wasm_runtime_creation() {
        assert!(WasmRuntime::new(&PluginConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_activate_registers_llm() {
        let manifest = PluginManifest::new("wasm-llm", "Wasm LLM");
        let module = runtime()
            .instantiate(&manifest, REGISTERING_PLUGIN.as_bytes())
            .await
            .unwrap();

        let ctx = context(&manifest);
        module.activate(ctx.clone()).await.unwrap();

        let llms = ctx.get_llms();
        assert_eq!(llms.len(), 1);
        assert_eq!(llms[0].id, "model1");
        assert_eq!(llms[0].name, "Model One");
    }

    #[tokio::test]
    async fn test_missing_activate_is_load_error() {
        let manifest = PluginManifest::new("empty", "Empty");
        let err = runtime()
            .instantiate(&manifest, b"(module)")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::LoadError { .. }));
    }

    #[tokio::test]
    async fn test_invalid_source_is_load_error() {
        let manifest = PluginManifest::new("garbage", "Garbage");
        let err = runtime()
            .instantiate(&manifest, b"not wasm at all")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::LoadError { .. }));
    }

    #[tokio::test]
    async fn test_nonzero_status_fails_activation() {
        let manifest = PluginManifest::new("failing", "Failing");
        let module = runtime()
            .instantiate(
                &manifest,
                br#"(module (func (export "activate") (result i32) (i32.const 1)))"#,
            )
            .await
            .unwrap();

        let err = module.activate(context(&manifest)).await.unwrap_err();
        assert!(err.to_string().contains("status 1"));
    }

    #[tokio::test]
    async fn test_fuel_exhaustion_traps() {
        let manifest = PluginManifest::new("spinner", "Spinner");
        let module = runtime()
            .instantiate(
                &manifest,
                br#"(module (func (export "activate") (result i32) (loop $l (br $l)) (i32.const 0)))"#,
            )
            .await
            .unwrap();

        assert!(module.activate(context(&manifest)).await.is_err());
    }

    #[tokio::test]
    async fn test_hook_reads_input() {
        // Echoes the hook input length back as the status when it is not 13.
        let wat = r#"
            (module
              (import "limbo" "input_len" (func $input_len (result i32)))
              (memory (export "memory") 1)
              (func (export "activate") (result i32) (i32.const 0))
              (func (export "on_after_chat_created") (result i32)
                (local $n i32)
                (local.set $n (call $input_len))
                (if (result i32) (i32.eq (local.get $n) (i32.const 13))
                  (then (i32.const 0))
                  (else (local.get $n)))))
        "#;
        let manifest = PluginManifest::new("hooked", "Hooked");
        let module = runtime().instantiate(&manifest, wat.as_bytes()).await.unwrap();
        module.activate(context(&manifest)).await.unwrap();

        // {"chatId":"c1"} is 15 bytes, {"chatId":""} is 13
        module
            .on_after_chat_created(&AfterChatCreatedOptions::new(""))
            .await
            .unwrap();
        let err = module
            .on_after_chat_created(&AfterChatCreatedOptions::new("c1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("status 15"));
    }

    #[tokio::test]
    async fn test_setting_lookup_keeps_hook_input() {
        // Reads setting "k" ("\"v\"", 3 bytes) before the 13-byte hook input.
        // Distinct nonzero statuses name the step that went wrong.
        let wat = r#"
            (module
              (import "limbo" "get_setting" (func $get_setting (param i32 i32) (result i32)))
              (import "limbo" "setting_read" (func $setting_read (param i32) (result i32)))
              (import "limbo" "input_len" (func $input_len (result i32)))
              (memory (export "memory") 1)
              (data (i32.const 0) "k")
              (func (export "activate") (result i32) (i32.const 0))
              (func (export "on_after_chat_created") (result i32)
                (if (i32.ne (call $get_setting (i32.const 0) (i32.const 1)) (i32.const 3))
                  (then (return (i32.const 100))))
                (if (i32.ne (call $input_len) (i32.const 13))
                  (then (return (i32.const 101))))
                (if (i32.ne (call $setting_read (i32.const 64)) (i32.const 3))
                  (then (return (i32.const 102))))
                (if (i32.ne (i32.load8_u (i32.const 65)) (i32.const 118))
                  (then (return (i32.const 103))))
                (i32.const 0)))
        "#;
        let manifest = PluginManifest::new("configured", "Configured");
        let module = runtime().instantiate(&manifest, wat.as_bytes()).await.unwrap();
        let settings = SettingsMap::from([("k".to_string(), serde_json::json!("v"))]);
        module
            .activate(context_with(&manifest, settings))
            .await
            .unwrap();

        module
            .on_after_chat_created(&AfterChatCreatedOptions::new(""))
            .await
            .unwrap();
    }
}
