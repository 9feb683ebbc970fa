//! A host-side execution boundary for WebAssembly plugins.
//!
//! `wasm_dock` loads core WASM modules as sandboxed plugins, lets them call back into
//! host functions, and moves byte payloads across the boundary through the plugin's
//! own linear memory.
//!
//! # Core Concepts
//!
//! - [`Manifest`]: what to load. One or more [`ModuleSource`]s (bytes, optional SHA-256
//! 	hash, optional name), a [`MemoryConfig`] ceiling, string config and an optional
//! 	fuel budget. Manifests can be built in code or parsed from JSON.
//!
//! - [`HostFunctionRegistry`]: named [`HostFunction`]s guests import from the `env`
//! 	namespace. Each declares a [`Signature`] in terms of [`ValueType`]s, where
//! 	[`ValueType::Buffer`] stands for an `( offset, length )` pair in guest memory.
//!
//! - [`MemoryManager`]: bounds-checked access to one plugin's memory, handed to host
//! 	functions during calls and available between calls through [`Plugin::memory`].
//!
//! - [`Plugin`]: a handle to an instantiated module. Exports following the
//! 	`( offset: i32, length: i32 ) -> ( offset: i32, length: i32 )` convention are
//! 	called with [`Plugin::call`], bytes in and bytes out.
//!
//! - [`Context`]: owns the [`Engine`] and every plugin created through it, and destroys
//! 	them all when closed or dropped.
//!
//! Besides `env`, every plugin may import the kernel functions of the `wasm_dock`
//! namespace (see [`kernel`]) and, for multi-module manifests, exports of the named
//! auxiliary modules.
//!
//! # Re-exports
//!
//! `wasm_dock` re-exports wasmtime's [`Engine`] and [`Config`] so that execution limits
//! such as fuel can be configured without depending on wasmtime directly.
//!
//! # Example
//!
//! ```
//! use std::sync::{ Arc, Mutex };
//! use wasm_dock::{ Context, HostFunctionRegistry, Manifest, ModuleSource, Value, ValueType };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // A guest that logs its input through the host and echoes it back.
//! let module = ModuleSource::new( r#"(module
//! 	(import "env" "log" (func $log (param i32 i32)))
//! 	(memory (export "memory") 1)
//! 	(func (export "echo") (param i32 i32) (result i32 i32)
//! 		(call $log (local.get 0) (local.get 1))
//! 		(local.get 0) (local.get 1)))"# );
//!
//! let logged = Arc::new( Mutex::new( Vec::new() ));
//! let sink = Arc::clone( &logged );
//! let mut registry = HostFunctionRegistry::new();
//! registry.register_fn( "log", [ ValueType::Buffer ], [], move | memory, args | {
//! 	if let Some( handle ) = args[ 0 ].as_buffer() {
//! 		sink.lock().unwrap().push( memory.read_handle( handle )? );
//! 	}
//! 	Ok( Vec::<Value>::new() )
//! });
//!
//! let mut context = Context::new();
//! let plugin = context.create_plugin( &Manifest::from( module ), &registry )?;
//! assert_eq!( plugin.call( "echo", b"hello" )?, b"hello" );
//! assert_eq!( logged.lock().unwrap().as_slice(), &[ b"hello".to_vec() ]);
//!
//! context.close()?;
//! # Ok(())
//! # }
//! ```

mod value ;
mod memory ;
mod host_function ;
mod registry ;
mod manifest ;
mod linker ;
mod plugin_instance ;
mod plugin ;
mod context ;
pub mod kernel ;

pub use wasmtime::{ Config, Engine };

pub use value::{ Value, ValueType, WasmType };
pub use memory::{ MemoryError, MemoryHandle, MemoryManager, PAGE_SIZE };
pub use host_function::{ HostError, HostFn, HostFunction, Signature };
pub use registry::HostFunctionRegistry ;
pub use manifest::{ Manifest, MemoryConfig, ModuleSource, MAIN_MODULE };
pub use linker::{ HOST_MODULE, KERNEL_MODULE };
pub use plugin_instance::CallError ;
pub use plugin::{ DestroyError, LoadError, Plugin, PluginId, PluginOptions, PluginStatus };
pub use context::{ Context, ContextError };
