//! Integration tests for the limbo-plugins crate.
//!
//! End-to-end runs over the filesystem backend and the WASM loader, using
//! WAT guests so no toolchain is needed to build plugin binaries.

mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use common::{RecordingChats, RecordingHost, added, record_events, test_config};
use limbo_plugins::{
    AfterChatCreatedOptions, DATA_FILE, FsPluginBackend, HookName, InstallSource, MANIFEST_FILE,
    PluginBackend, PluginConfig, PluginError, PluginManifest, PluginPermission, PluginState,
    PluginSystem, SettingsMap, WASM_FILE, WasmModuleLoader,
};

/// Registers `model1` on activation.
const LLM_PLUGIN: &str = r#"
    (module
      (import "limbo" "register_llm" (func $register_llm (param i32 i32) (result i32)))
      (memory (export "memory") 1)
      (data (i32.const 0) "{\"id\":\"model1\",\"name\":\"Model One\"}")
      (func (export "activate") (result i32)
        (call $register_llm (i32.const 0) (i32.const 34))))
"#;

/// Renames chat `c1` whenever a chat is created.
const RENAMING_PLUGIN: &str = r#"
    (module
      (import "limbo" "rename_chat" (func $rename_chat (param i32 i32) (result i32)))
      (memory (export "memory") 1)
      (data (i32.const 0) "{\"chatId\":\"c1\",\"name\":\"Renamed\"}")
      (func (export "activate") (result i32) (i32.const 0))
      (func (export "on_after_chat_created") (result i32)
        (call $rename_chat (i32.const 0) (i32.const 32))))
"#;

/// Never returns from `activate`.
const SPINNING_PLUGIN: &str = r#"
    (module
      (func (export "activate") (result i32)
        (loop $spin (br $spin))
        (i32.const 0)))
"#;

struct WasmHarness {
    dir: TempDir,
    backend: Arc<FsPluginBackend>,
    host: Arc<RecordingHost>,
    chats: Arc<RecordingChats>,
    system: PluginSystem,
}

impl WasmHarness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self::in_dir(dir)
    }

    /// A fresh system over an existing plugins directory, as after a restart.
    fn in_dir(dir: TempDir) -> Self {
        let config = PluginConfig {
            plugins_dir: dir.path().to_path_buf(),
            // Plenty of fuel so only the deadline stops a spinning guest.
            wasm_fuel_per_call: 1 << 40,
            ..test_config()
        };

        let backend = Arc::new(FsPluginBackend::new(dir.path()));
        let loader = Arc::new(WasmModuleLoader::from_config(&config).unwrap());
        let host = Arc::new(RecordingHost::default());
        let chats = Arc::new(RecordingChats::default());

        let system = PluginSystem::new(config, backend.clone(), loader)
            .with_host_bridge(host.clone())
            .with_api_bridge(chats.clone());

        Self {
            dir,
            backend,
            host,
            chats,
            system,
        }
    }

    fn restart(self) -> Self {
        Self::in_dir(self.dir)
    }

    async fn install(&self, manifest: PluginManifest, wat: &str) {
        assert_ok!(
            self.system
                .install_plugin(InstallSource::Inline {
                    manifest,
                    source: wat.as_bytes().to_vec(),
                })
                .await
        );
    }
}

#[tokio::test]
async fn test_wasm_plugin_registers_namespaced_llm() {
    let h = WasmHarness::new();
    h.install(PluginManifest::new("wasm-llm", "Wasm LLM"), LLM_PLUGIN)
        .await;
    let events = record_events(h.system.manager());

    assert_ok!(h.system.enable_plugin("wasm-llm").await);

    assert_eq!(*events.lock(), vec![added("wasm-llm")]);
    let llms = h.system.manager().registered_llms_list();
    assert_eq!(llms.len(), 1);
    assert_eq!(llms[0].id, "wasm-llm:model1");
    assert_eq!(llms[0].plugin_id, "wasm-llm");
    assert_eq!(llms[0].llm.name, "Model One");
}

#[tokio::test]
async fn test_enabled_plugins_load_after_restart() {
    let h = WasmHarness::new();
    h.install(PluginManifest::new("wasm-llm", "Wasm LLM"), LLM_PLUGIN)
        .await;
    h.install(PluginManifest::new("idle", "Idle"), LLM_PLUGIN)
        .await;
    assert_ok!(h.system.enable_plugin("wasm-llm").await);
    h.system.unload_all().await;

    let h = h.restart();
    let report = assert_ok!(h.system.load_all_plugins().await);

    assert_eq!(report.loaded, vec!["wasm-llm"]);
    assert_eq!(report.skipped, vec!["idle"]);
    assert!(h.system.manager().is_active("wasm-llm"));
    assert!(
        h.system
            .manager()
            .registered_llms()
            .contains_key("wasm-llm:model1")
    );
}

#[tokio::test]
async fn test_module_without_activate_fails_to_load() {
    let h = WasmHarness::new();
    h.install(PluginManifest::new("hollow", "Hollow"), "(module)")
        .await;

    let err = assert_err!(h.system.enable_plugin("hollow").await);

    assert!(matches!(err, PluginError::LoadError { .. }));
    assert_eq!(h.system.plugin_state("hollow"), PluginState::Failed);
    assert_eq!(h.host.activation_error_ids(), vec!["hollow"]);
    assert!(h.system.manager().get_plugin("hollow").is_none());
}

#[tokio::test]
async fn test_spinning_activate_is_cut_off() {
    let h = WasmHarness::new();
    h.install(PluginManifest::new("spinner", "Spinner"), SPINNING_PLUGIN)
        .await;
    h.install(PluginManifest::new("wasm-llm", "Wasm LLM"), LLM_PLUGIN)
        .await;
    h.backend.enable_plugin("spinner").await.unwrap();
    h.backend.enable_plugin("wasm-llm").await.unwrap();

    let report = assert_ok!(h.system.load_all_plugins().await);

    assert_eq!(report.loaded, vec!["wasm-llm"]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        report.failed[0].1,
        PluginError::ActivationError { .. }
    ));
    assert!(report.failed[0].1.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_hook_renames_chat_with_permission() {
    let h = WasmHarness::new();
    let mut manifest = PluginManifest::new("renamer", "Renamer");
    manifest.hooks.push(HookName::AfterChatCreated);
    manifest.permissions.push(PluginPermission::WriteChats);
    h.install(manifest, RENAMING_PLUGIN).await;
    assert_ok!(h.system.enable_plugin("renamer").await);

    h.system
        .execute_on_after_chat_created_hooks(&AfterChatCreatedOptions::new("c1"))
        .await;

    assert_eq!(
        *h.chats.renamed.lock(),
        vec![("c1".to_string(), "Renamed".to_string())]
    );
    assert!(h.host.plugin_errors.lock().is_empty());
}

#[tokio::test]
async fn test_hook_without_permission_is_reported() {
    let h = WasmHarness::new();
    let mut manifest = PluginManifest::new("renamer", "Renamer");
    manifest.hooks.push(HookName::AfterChatCreated);
    h.install(manifest, RENAMING_PLUGIN).await;
    assert_ok!(h.system.enable_plugin("renamer").await);

    h.system
        .execute_on_after_chat_created_hooks(&AfterChatCreatedOptions::new("c1"))
        .await;

    assert!(h.chats.renamed.lock().is_empty());
    let errors = h.host.plugin_errors.lock().clone();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "renamer");
    assert!(errors[0].1.contains("status -1"));
    assert!(h.system.manager().is_active("renamer"));
}

#[tokio::test]
async fn test_install_from_directory() {
    let source = TempDir::new().unwrap();
    let manifest = PluginManifest::new("from-dir", "From Dir");
    std::fs::write(
        source.path().join(MANIFEST_FILE),
        manifest.to_toml().unwrap(),
    )
    .unwrap();
    std::fs::write(source.path().join(WASM_FILE), LLM_PLUGIN).unwrap();

    let h = WasmHarness::new();
    let installed = assert_ok!(
        h.system
            .install_plugin(InstallSource::Directory(source.path().to_path_buf()))
            .await
    );
    assert_eq!(installed.id(), "from-dir");

    let dir = h.backend.plugins_dir().join("from-dir");
    assert!(dir.join(MANIFEST_FILE).exists());
    assert!(dir.join(WASM_FILE).exists());
    assert!(dir.join(DATA_FILE).exists());

    assert_ok!(h.system.enable_plugin("from-dir").await);
    assert!(
        h.system
            .manager()
            .registered_llms()
            .contains_key("from-dir:model1")
    );
}

#[tokio::test]
async fn test_uninstall_removes_files() {
    let h = WasmHarness::new();
    h.install(PluginManifest::new("wasm-llm", "Wasm LLM"), LLM_PLUGIN)
        .await;
    assert_ok!(h.system.enable_plugin("wasm-llm").await);

    assert_ok!(h.system.uninstall_plugin("wasm-llm").await);

    assert!(!h.backend.plugins_dir().join("wasm-llm").exists());
    assert!(h.system.manager().registered_llms().is_empty());
    assert!(h.backend.get_all_plugins().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_enable_and_settings_update_both_persist() {
    let h = WasmHarness::new();

    for round in 0..20 {
        let id = format!("racer-{round}");
        h.install(PluginManifest::new(&id, "Racer"), LLM_PLUGIN)
            .await;
        let update = SettingsMap::from([("temp".to_string(), json!(round))]);

        let (enabled, updated) = tokio::join!(
            h.system.enable_plugin(&id),
            h.system.update_plugin_settings(&id, update)
        );
        assert_ok!(enabled);
        assert_ok!(updated);

        let record = h.backend.get_plugin(&id).await.unwrap();
        assert!(record.is_enabled(), "{id} lost its enabled flag");
        assert_eq!(record.data.settings.get("temp"), Some(&json!(round)));

        let plugin = h.system.manager().get_plugin(&id).unwrap();
        assert_eq!(plugin.context.get_setting_value("temp"), Some(json!(round)));
    }
}
