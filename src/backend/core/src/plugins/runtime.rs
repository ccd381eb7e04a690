//! Per-plugin wasmtime sandbox.
//!
//! Each plugin gets its own engine, store and instance. Artifacts are
//! compiled as reactor modules: the host drives `_initialize` once after
//! instantiation and then talks to the nine well-known service exports.
//!
//! ## Call convention
//!
//! Requests are written into guest memory through the guest's exported
//! `malloc`, the export is invoked with `(pointer, length)` as two `i64`s,
//! and the return value packs `(pointer << 32) | length` with bit 31 of the
//! length marking the error channel. Both buffers are released through the
//! guest's `free`; the response buffer is released before decoding so a
//! decode failure cannot leak it.
//!
//! ## Serialization
//!
//! A single `tokio::sync::Mutex` around the store serializes every guest
//! call. The event dispatcher and the HTTP router may target the same plugin
//! concurrently; the lock guarantees at most one invocation is in flight per
//! plugin, which is what keeps single-writer guest memory sound.
//!
//! Engines run with fuel-based cooperative yielding so a runaway guest can
//! be preempted by the host-side call timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use wasmtime::{Caller, Config, Engine, Extern, Instance, Linker, Memory, Module, Store, TypedFunc};

use super::capabilities::CapabilityHub;
use super::codec;
use super::{GuestPlugin, PluginError, PLUGIN_API_VERSION};

/// Fuel units executed between forced yields to the async executor.
const FUEL_YIELD_INTERVAL: u64 = 10_000;

/// Host state threaded through the store; available to every host function.
pub struct HostState {
    /// Compact plugin id, set once the identity is known. Used for logging
    /// and capability namespacing.
    pub plugin_id: String,
    pub hub: Arc<CapabilityHub>,
}

/// Resolved guest exports. `TypedFunc` handles stay valid for the lifetime
/// of the store they were resolved against.
struct GuestExports {
    memory: Memory,
    malloc: TypedFunc<u32, u32>,
    free: TypedFunc<u32, ()>,
    get_info: TypedFunc<(i64, i64), i64>,
    initialize: TypedFunc<(i64, i64), i64>,
    shutdown: TypedFunc<(i64, i64), i64>,
    handle_event: TypedFunc<(i64, i64), i64>,
    get_subscribed_events: TypedFunc<(i64, i64), i64>,
    get_http_routes: TypedFunc<(i64, i64), i64>,
    handle_http_request: TypedFunc<(i64, i64), i64>,
    get_frontend_bundle: Option<TypedFunc<(i64, i64), i64>>,
}

/// A loaded plugin sandbox. Dropping the value releases the engine.
pub struct WasmPlugin {
    store: Mutex<Store<HostState>>,
    exports: GuestExports,
    call_timeout: Duration,
}

impl std::fmt::Debug for WasmPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmPlugin")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl WasmPlugin {
    /// Compile and instantiate a plugin artifact.
    ///
    /// Installs the WASI shims and the capability host call, drives the
    /// reactor entry point, resolves the required exports and verifies the
    /// guest's API version. Any failure releases the sandbox via drop.
    pub async fn instantiate(
        artifact: &[u8],
        hub: Arc<CapabilityHub>,
        call_timeout: Duration,
    ) -> Result<Self, PluginError> {
        let mut config = Config::new();
        config.async_support(true);
        config.consume_fuel(true);
        let engine = Engine::new(&config)?;

        let mut linker: Linker<HostState> = Linker::new(&engine);
        install_wasi_shims(&mut linker)?;
        install_host_call(&mut linker)?;

        let module = Module::new(&engine, artifact)?;

        let mut store = Store::new(
            &engine,
            HostState {
                plugin_id: String::new(),
                hub,
            },
        );
        store.set_fuel(u64::MAX)?;
        store.fuel_async_yield_interval(Some(FUEL_YIELD_INTERVAL))?;

        let instance = linker.instantiate_async(&mut store, &module).await?;

        // Reactor entry point; some toolchains emit _start instead.
        if let Some(init) = instance.get_func(&mut store, "_initialize") {
            init.typed::<(), ()>(&store)?
                .call_async(&mut store, ())
                .await?;
        } else if let Some(start) = instance.get_func(&mut store, "_start") {
            start
                .typed::<(), ()>(&store)?
                .call_async(&mut store, ())
                .await?;
        }

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(PluginError::MissingExport("memory"))?;

        let exports = GuestExports {
            memory,
            malloc: typed_export(&instance, &mut store, "malloc")?,
            free: typed_export(&instance, &mut store, "free")?,
            get_info: typed_export(&instance, &mut store, "plugin_service_get_info")?,
            initialize: typed_export(&instance, &mut store, "plugin_service_initialize")?,
            shutdown: typed_export(&instance, &mut store, "plugin_service_shutdown")?,
            handle_event: typed_export(&instance, &mut store, "plugin_service_handle_event")?,
            get_subscribed_events: typed_export(
                &instance,
                &mut store,
                "plugin_service_get_subscribed_events",
            )?,
            get_http_routes: typed_export(&instance, &mut store, "plugin_service_get_http_routes")?,
            handle_http_request: typed_export(
                &instance,
                &mut store,
                "plugin_service_handle_http_request",
            )?,
            get_frontend_bundle: instance
                .get_func(&mut store, "plugin_service_get_frontend_bundle")
                .map(|f| f.typed(&store))
                .transpose()?,
        };

        let api_version: TypedFunc<(), u64> =
            typed_export(&instance, &mut store, "plugin_service_api_version")?;
        let guest_version = api_version.call_async(&mut store, ()).await?;
        if guest_version != PLUGIN_API_VERSION {
            return Err(PluginError::ApiVersionMismatch {
                host: PLUGIN_API_VERSION,
                guest: guest_version,
            });
        }

        Ok(Self {
            store: Mutex::new(store),
            exports,
            call_timeout,
        })
    }

    /// Record the plugin's compact id in the host state for logging and
    /// capability namespacing.
    pub async fn set_label(&self, compact_id: &str) {
        self.store.lock().await.data_mut().plugin_id = compact_id.to_string();
    }

    /// Invoke a service export with the marshalled request.
    ///
    /// Holds the store lock for the whole marshal -> call -> unmarshal
    /// sequence; this is the plugin's serialization point.
    async fn call_raw(
        &self,
        func: &TypedFunc<(i64, i64), i64>,
        request: &[u8],
    ) -> Result<Vec<u8>, PluginError> {
        let mut store = self.store.lock().await;

        let len = request.len() as u32;
        let ptr = self.exports.malloc.call_async(&mut *store, len).await?;
        self.exports
            .memory
            .write(&mut *store, ptr as usize, request)
            .map_err(|_| PluginError::MemoryOutOfRange)?;

        let call = func.call_async(&mut *store, (ptr as i64, len as i64));
        let packed = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result?,
            Err(_) => return Err(PluginError::Timeout),
        };

        self.exports.free.call_async(&mut *store, ptr).await?;

        let (response_ptr, response_len, is_error) = codec::unpack(packed as u64);
        let mut buffer = vec![0u8; response_len as usize];
        self.exports
            .memory
            .read(&*store, response_ptr as usize, &mut buffer)
            .map_err(|_| PluginError::MemoryOutOfRange)?;
        self.exports
            .free
            .call_async(&mut *store, response_ptr)
            .await?;

        if is_error {
            Err(PluginError::Guest(
                String::from_utf8_lossy(&buffer).into_owned(),
            ))
        } else {
            Ok(buffer)
        }
    }
}

#[async_trait]
impl GuestPlugin for WasmPlugin {
    async fn get_info(&self) -> Result<codec::PluginInfo, PluginError> {
        let bytes = self.call_raw(&self.exports.get_info, &[]).await?;
        Ok(codec::decode(&bytes)?)
    }

    async fn initialize(
        &self,
        config: &[(String, String)],
    ) -> Result<codec::InitializeResult, PluginError> {
        let request = codec::encode(&codec::InitializeRequest {
            config: config.to_vec(),
        })?;
        let bytes = self.call_raw(&self.exports.initialize, &request).await?;
        Ok(codec::decode(&bytes)?)
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        self.call_raw(&self.exports.shutdown, &[]).await?;
        Ok(())
    }

    async fn handle_event(
        &self,
        event: &codec::EventEnvelope,
    ) -> Result<codec::HandleEventResult, PluginError> {
        let request = codec::encode(event)?;
        let bytes = self.call_raw(&self.exports.handle_event, &request).await?;
        Ok(codec::decode(&bytes)?)
    }

    async fn subscribed_events(&self) -> Result<Vec<String>, PluginError> {
        let bytes = self
            .call_raw(&self.exports.get_subscribed_events, &[])
            .await?;
        let subscribed: codec::SubscribedEvents = codec::decode(&bytes)?;
        Ok(subscribed.events)
    }

    async fn http_routes(&self) -> Result<Vec<codec::RouteSpec>, PluginError> {
        let bytes = self.call_raw(&self.exports.get_http_routes, &[]).await?;
        Ok(codec::decode(&bytes)?)
    }

    async fn handle_http_request(
        &self,
        request: &codec::HttpRequest,
    ) -> Result<codec::HttpResponse, PluginError> {
        let encoded = codec::encode(request)?;
        let bytes = self
            .call_raw(&self.exports.handle_http_request, &encoded)
            .await?;
        Ok(codec::decode(&bytes)?)
    }

    async fn frontend_bundle(&self) -> Result<Option<codec::FrontendBundle>, PluginError> {
        let Some(func) = &self.exports.get_frontend_bundle else {
            return Ok(None);
        };
        let bytes = self.call_raw(func, &[]).await?;
        Ok(Some(codec::decode(&bytes)?))
    }
}

fn typed_export<P, R>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &'static str,
) -> Result<TypedFunc<P, R>, PluginError>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    let func = instance
        .get_func(&mut *store, name)
        .ok_or(PluginError::MissingExport(name))?;
    Ok(func.typed(&*store)?)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Capability host call
// ═══════════════════════════════════════════════════════════════════════════════

fn install_host_call(linker: &mut Linker<HostState>) -> Result<(), PluginError> {
    linker.func_wrap_async(
        "gshub",
        "host_call",
        |mut caller: Caller<'_, HostState>, (ptr, len): (i64, i64)| {
            Box::new(async move {
                match dispatch_host_call(&mut caller, ptr as u32, len as u32).await {
                    Ok(packed) => packed as i64,
                    Err(message) => {
                        // Report through the error channel; a zero-length
                        // packed value is the last resort when the guest
                        // allocator itself is broken.
                        deliver(&mut caller, message.as_bytes(), true)
                            .await
                            .unwrap_or(0) as i64
                    }
                }
            })
        },
    )?;
    Ok(())
}

/// Decode the envelope, run the capability, and deliver the reply into
/// guest memory. All failures become error-channel strings; nothing host-side
/// crosses the boundary as a trap.
async fn dispatch_host_call(
    caller: &mut Caller<'_, HostState>,
    ptr: u32,
    len: u32,
) -> Result<u64, String> {
    let memory = guest_memory(caller)?;

    let mut request = vec![0u8; len as usize];
    memory
        .read(&mut *caller, ptr as usize, &mut request)
        .map_err(|_| "host call pointer out of range".to_string())?;

    let envelope: codec::CallEnvelope =
        codec::decode(&request).map_err(|e| format!("invalid call envelope: {}", e))?;

    let (hub, plugin_id) = {
        let state = caller.data();
        (state.hub.clone(), state.plugin_id.clone())
    };

    match hub
        .invoke(&plugin_id, &envelope.capability, &envelope.method, &envelope.body)
        .await
    {
        Ok(response) => deliver(caller, &response, false).await,
        Err(message) => deliver(caller, message.as_bytes(), true).await,
    }
}

/// Allocate in guest memory via the guest's `malloc`, write `bytes`, and
/// return the packed pointer/length. The guest owns the returned buffer.
async fn deliver(
    caller: &mut Caller<'_, HostState>,
    bytes: &[u8],
    is_error: bool,
) -> Result<u64, String> {
    let memory = guest_memory(caller)?;

    let malloc = caller
        .get_export("malloc")
        .and_then(Extern::into_func)
        .ok_or_else(|| "missing guest malloc".to_string())?
        .typed::<u32, u32>(&*caller)
        .map_err(|e| e.to_string())?;

    let ptr = malloc
        .call_async(&mut *caller, bytes.len() as u32)
        .await
        .map_err(|e| e.to_string())?;

    memory
        .write(&mut *caller, ptr as usize, bytes)
        .map_err(|_| "guest memory write out of range".to_string())?;

    Ok(codec::pack(ptr, bytes.len() as u32, is_error))
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory, String> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| "missing guest memory".to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// WASI shims
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimal `wasi_snapshot_preview1` surface for reactor-style guest
/// toolchains: a real clock, discarded stdout/stderr, an empty environment
/// and a random source. Everything else is intentionally absent.
fn install_wasi_shims(linker: &mut Linker<HostState>) -> Result<(), PluginError> {
    const WASI: &str = "wasi_snapshot_preview1";

    const ERRNO_SUCCESS: i32 = 0;
    const ERRNO_FAULT: i32 = 21;

    linker.func_wrap(
        WASI,
        "clock_time_get",
        |mut caller: Caller<'_, HostState>, _id: i32, _precision: i64, out: i32| -> i32 {
            let Ok(memory) = guest_memory(&mut caller) else {
                return ERRNO_FAULT;
            };
            let nanos = chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default() as u64;
            if memory
                .write(&mut caller, out as usize, &nanos.to_le_bytes())
                .is_err()
            {
                return ERRNO_FAULT;
            }
            ERRNO_SUCCESS
        },
    )?;

    linker.func_wrap(
        WASI,
        "fd_write",
        |mut caller: Caller<'_, HostState>,
         _fd: i32,
         iovs: i32,
         iovs_len: i32,
         nwritten: i32|
         -> i32 {
            let Ok(memory) = guest_memory(&mut caller) else {
                return ERRNO_FAULT;
            };

            // Sum the iovec lengths and report everything as written;
            // guest stdout and stderr are discarded.
            let mut total: u32 = 0;
            for index in 0..iovs_len {
                let mut iovec = [0u8; 8];
                let offset = iovs as usize + index as usize * 8;
                if memory.read(&caller, offset, &mut iovec).is_err() {
                    return ERRNO_FAULT;
                }
                total = total.wrapping_add(u32::from_le_bytes(iovec[4..8].try_into().unwrap()));
            }

            if memory
                .write(&mut caller, nwritten as usize, &total.to_le_bytes())
                .is_err()
            {
                return ERRNO_FAULT;
            }
            ERRNO_SUCCESS
        },
    )?;

    linker.func_wrap(
        WASI,
        "environ_sizes_get",
        |mut caller: Caller<'_, HostState>, count: i32, size: i32| -> i32 {
            let Ok(memory) = guest_memory(&mut caller) else {
                return ERRNO_FAULT;
            };
            let zero = 0u32.to_le_bytes();
            if memory.write(&mut caller, count as usize, &zero).is_err()
                || memory.write(&mut caller, size as usize, &zero).is_err()
            {
                return ERRNO_FAULT;
            }
            ERRNO_SUCCESS
        },
    )?;

    linker.func_wrap(
        WASI,
        "environ_get",
        |_caller: Caller<'_, HostState>, _environ: i32, _buf: i32| -> i32 { ERRNO_SUCCESS },
    )?;

    linker.func_wrap(
        WASI,
        "random_get",
        |mut caller: Caller<'_, HostState>, buf: i32, len: i32| -> i32 {
            let Ok(memory) = guest_memory(&mut caller) else {
                return ERRNO_FAULT;
            };
            let mut bytes = vec![0u8; len as usize];
            if getrandom::getrandom(&mut bytes).is_err() {
                return ERRNO_FAULT;
            }
            if memory.write(&mut caller, buf as usize, &bytes).is_err() {
                return ERRNO_FAULT;
            }
            ERRNO_SUCCESS
        },
    )?;

    linker.func_wrap(WASI, "sched_yield", |_caller: Caller<'_, HostState>| -> i32 {
        ERRNO_SUCCESS
    })?;

    linker.func_wrap(
        WASI,
        "proc_exit",
        |_caller: Caller<'_, HostState>, code: i32| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("guest called proc_exit({})", code))
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal reactor module in WAT form.
    ///
    /// `get_info` returns `info_bytes` (pre-encoded into a data segment)
    /// through the packed return convention; `get_subscribed_events` answers
    /// through the error channel with the message "boom".
    fn test_module_wat(api_version: u64, info_bytes: &[u8]) -> String {
        let info_offset: u32 = 4096;
        let info_packed = codec::pack(info_offset, info_bytes.len() as u32, false);
        let error_offset: u32 = 8192;
        let error_packed = codec::pack(error_offset, 4, true);

        let info_data: String = info_bytes.iter().map(|b| format!("\\{:02x}", b)).collect();

        format!(
            r#"(module
  (memory (export "memory") 1)
  (data (i32.const {info_offset}) "{info_data}")
  (data (i32.const {error_offset}) "boom")
  (global $next (mut i32) (i32.const 64))
  (func (export "malloc") (param i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $next))
    (global.set $next (i32.add (global.get $next) (i32.add (local.get 0) (i32.const 16))))
    (local.get $ptr))
  (func (export "free") (param i32))
  (func (export "_initialize"))
  (func (export "plugin_service_api_version") (result i64) (i64.const {api_version}))
  (func (export "plugin_service_get_info") (param i64 i64) (result i64)
    (i64.const {info_packed}))
  (func (export "plugin_service_initialize") (param i64 i64) (result i64)
    (i64.const {info_packed}))
  (func (export "plugin_service_shutdown") (param i64 i64) (result i64)
    (i64.const {info_packed}))
  (func (export "plugin_service_handle_event") (param i64 i64) (result i64)
    (i64.const {info_packed}))
  (func (export "plugin_service_get_subscribed_events") (param i64 i64) (result i64)
    (i64.const {error_packed}))
  (func (export "plugin_service_get_http_routes") (param i64 i64) (result i64)
    (i64.const {info_packed}))
  (func (export "plugin_service_handle_http_request") (param i64 i64) (result i64)
    (i64.const {info_packed}))
)"#
        )
    }

    fn test_info_bytes() -> Vec<u8> {
        codec::encode(&codec::PluginInfo {
            id: "com.example.wat".into(),
            name: "Wat".into(),
            version: "1.0.0".into(),
            description: String::new(),
            author: "tests".into(),
            api_version: "1".into(),
        })
        .unwrap()
    }

    async fn instantiate(wat: &str) -> Result<WasmPlugin, PluginError> {
        WasmPlugin::instantiate(
            wat.as_bytes(),
            Arc::new(CapabilityHub::new()),
            Duration::from_secs(5),
        )
        .await
    }

    #[tokio::test]
    async fn test_load_and_decode_through_guest_memory() {
        let wat = test_module_wat(PLUGIN_API_VERSION, &test_info_bytes());
        let plugin = instantiate(&wat).await.unwrap();

        let info = plugin.get_info().await.unwrap();
        assert_eq!(info.id, "com.example.wat");
        assert_eq!(info.name, "Wat");
    }

    #[tokio::test]
    async fn test_error_channel_surfaces_guest_message() {
        let wat = test_module_wat(PLUGIN_API_VERSION, &test_info_bytes());
        let plugin = instantiate(&wat).await.unwrap();

        let err = plugin.subscribed_events().await.unwrap_err();
        match err {
            PluginError::Guest(message) => assert_eq!(message, "boom"),
            other => panic!("expected guest error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_api_version_mismatch_rejected() {
        let wat = test_module_wat(PLUGIN_API_VERSION + 1, &test_info_bytes());
        let err = instantiate(&wat).await.unwrap_err();
        match err {
            PluginError::ApiVersionMismatch { host, guest } => {
                assert_eq!(host, PLUGIN_API_VERSION);
                assert_eq!(guest, PLUGIN_API_VERSION + 1);
            }
            other => panic!("expected version mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_export_rejected() {
        // Strip one required service export from the module.
        let wat = test_module_wat(PLUGIN_API_VERSION, &test_info_bytes()).replace(
            "plugin_service_handle_event",
            "plugin_service_handle_event_gone",
        );

        let err = instantiate(&wat).await.unwrap_err();
        match err {
            PluginError::MissingExport(name) => {
                assert_eq!(name, "plugin_service_handle_event");
            }
            other => panic!("expected missing export, got {:?}", other),
        }
    }
}
