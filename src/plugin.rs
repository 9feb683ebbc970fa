//! Loaded plugins and their lifecycle.
//!
//! A [`Plugin`] is a cheap, cloneable handle to one instantiated module. Handles stay
//! valid after the plugin is destroyed; every operation on a destroyed plugin then fails
//! with [`CallError::UseAfterFree`] instead of touching freed state.
//!
//! Calls into one plugin are serialised. A second call issued while one is in progress,
//! whether from another thread or reentrantly from a host function, is rejected with
//! [`CallError::ConcurrentCall`] rather than blocking. Destroying a plugin in the middle of a
//! call defers the teardown until that call returns.

use std::collections::BTreeMap ;
use std::path::PathBuf ;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard, TryLockError };
use thiserror::Error ;
use wasmtime::{ Engine, Module, Store };

use crate::linker::ImportResolver ;
use crate::manifest::Manifest ;
use crate::memory::MemoryManager ;
use crate::plugin_instance::{ CallError, PluginData, PluginInstance };
use crate::registry::HostFunctionRegistry ;



/// Identifier of a plugin, unique within the [`Context`]( crate::Context ) that created it.
#[derive( Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug )]
pub struct PluginId( pub(crate) u64 );

impl PluginId {
	#[inline] pub fn get( &self ) -> u64 { self.0 }
}

impl std::fmt::Display for PluginId {
	fn fmt( &self, f: &mut std::fmt::Formatter ) -> std::fmt::Result {
		write!( f, "plugin#{}", self.0 )
	}
}

/// Errors that can occur while loading a plugin.
#[derive( Error, Debug )]
pub enum LoadError {
	/// A module's SHA-256 digest doesn't match the hash it was declared with.
	#[error( "Integrity Error: expected sha256 {expected}, found {actual}" )]
	Integrity { expected: String, actual: String },
	/// The bytes are not a valid module, it exports no `memory`, or instantiation failed
	/// (including a trapping start function).
	#[error( "Instantiation Error: {0}" )] Instantiation( wasmtime::Error ),
	/// The module imports something no host function, kernel function or auxiliary module provides.
	#[error( "Missing Import: {module}::{name}" )] MissingImport { module: String, name: String },
	/// The module imports a host function with a different type than it was registered with.
	#[error( "Signature Mismatch for {module}::{name}: expected {expected}, found {found}" )]
	SignatureMismatch { module: String, name: String, expected: String, found: String },
	/// The manifest asks for fuel metering but the engine was not configured to consume fuel.
	#[error( "Fuel Unavailable: enable `consume_fuel` on the engine to use a fuel limit" )] FuelUnavailable,
	/// The owning context has been closed.
	#[error( "Context Closed" )] ContextClosed,
	/// The manifest lists no modules.
	#[error( "Empty Manifest" )] EmptyManifest,
	/// A module file listed in a manifest could not be read.
	#[error( "Manifest IO Error at {path}: {source}" )] ManifestIo { path: PathBuf, source: std::io::Error },
	/// A JSON manifest could not be parsed.
	#[error( "Invalid Manifest: {0}" )] InvalidManifest( #[from] serde_json::Error ),
	/// A JSON manifest entry gives neither `data` nor `path`.
	#[error( "Missing Module Source at index {0}: expected `data` or `path`" )] MissingSource( usize ),
	/// An auxiliary module (any but the main one) has no name to be imported under.
	#[error( "Unnamed Module at index {0}: auxiliary modules need a name" )] UnnamedModule( usize ),
	/// No live plugin with this id is owned by the context.
	#[error( "Unknown Plugin: {0}" )] UnknownPlugin( PluginId ),
	/// The plugin is executing a call and can't have its module replaced.
	#[error( "Plugin Busy: cannot replace the module of {0} while it is executing a call" )] PluginBusy( PluginId ),
}

/// Errors that can occur while destroying a plugin.
///
/// The plugin is destroyed regardless; these only report that cleanup around it failed
/// or had to wait.
#[derive( Error, Debug )]
pub enum DestroyError {
	/// The destroy hook returned an error.
	#[error( "Destroy Hook Failed: {0}" )] Hook( Box<dyn std::error::Error + Send + Sync> ),
	/// A call is in progress. The plugin rejects new work right away and is torn down
	/// as soon as that call returns.
	#[error( "Plugin Busy: destruction deferred until the current call returns" )] Busy,
}

/// Lifecycle state of a plugin.
#[derive( Copy, Clone, Eq, PartialEq, Hash, Debug )]
pub enum PluginStatus {
	/// Instantiated and idle.
	Ready,
	/// Executing a call.
	Calling,
	/// Destroyed; every further operation fails with [`CallError::UseAfterFree`].
	Destroyed,
}

type DestroyHook = Box<dyn FnOnce( PluginId ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

/// Per-plugin options that are not part of the [`Manifest`].
#[derive( Default )]
#[must_use]
pub struct PluginOptions {
	on_destroy: Option<DestroyHook>,
}

impl PluginOptions {

	pub fn new() -> Self { Self::default() }

	/// Runs `hook` once, when the plugin is destroyed.
	///
	/// An error returned from the hook is reported by [`Plugin::destroy`] (or collected by
	/// [`Context::close`]( crate::Context::close )) but doesn't keep the plugin alive.
	pub fn on_destroy(
		mut self,
		hook: impl FnOnce( PluginId ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
	) -> Self {
		self.on_destroy = Some( Box::new( hook ));
		self
	}

}

impl std::fmt::Debug for PluginOptions {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "PluginOptions" )
			.field( "on_destroy", &self.on_destroy.as_ref().map(| _ | "<closure>" ))
			.finish()
	}
}

struct Slot {
	instance: Option<PluginInstance>,
	on_destroy: Option<DestroyHook>,
}

struct Shared {
	slot: Mutex<Slot>,
	/// Set by a destroy that found the plugin mid-call.
	destroy_pending: AtomicBool,
}

/// Handle to a loaded plugin.
///
/// Cloning the handle doesn't clone the plugin; all clones refer to the same instance.
#[derive( Clone )]
pub struct Plugin {
	id: PluginId,
	shared: Arc<Shared>,
}

impl std::fmt::Debug for Plugin {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "Plugin" )
			.field( "id", &self.id )
			.field( "status", &self.status() )
			.finish()
	}
}

impl Plugin {

	pub(crate) fn load(
		id: PluginId,
		engine: &Engine,
		manifest: &Manifest,
		registry: &HostFunctionRegistry,
		options: PluginOptions,
	) -> Result<Self, LoadError> {
		let instance = Self::instantiate( id, engine, manifest, registry )?;
		Ok( Self {
			id,
			shared: Arc::new( Shared {
				slot: Mutex::new( Slot { instance: Some( instance ), on_destroy: options.on_destroy }),
				destroy_pending: AtomicBool::new( false ),
			}),
		})
	}

	/// Verifies, compiles, links and instantiates the modules of `manifest`.
	///
	/// Auxiliary modules are instantiated first, in manifest order, each registered under its
	/// name so that later modules can import from it. The main module is instantiated last.
	fn instantiate(
		id: PluginId,
		engine: &Engine,
		manifest: &Manifest,
		registry: &HostFunctionRegistry,
	) -> Result<PluginInstance, LoadError> {

		let ( main, auxiliary ) = manifest.split_main()?;
		auxiliary.iter().try_for_each(|( _, source )| source.verify() )?;
		main.verify()?;

		let mut store = Store::new( engine, PluginData::new( manifest ));
		store.limiter(| data | &mut data.limiter );

		// Fuel has to be available while start functions run. Plugins without a budget
		// on a fuel metering engine run unbounded.
		match manifest.fuel() {
			Some( fuel ) => store.set_fuel( fuel ).map_err(|_| LoadError::FuelUnavailable )?,
			None => if store.get_fuel().is_ok() { let _ = store.set_fuel( u64::MAX ); },
		}
		if let Some( ticks ) = manifest.epoch_deadline() { store.set_epoch_deadline( ticks ); }

		let mut resolver = ImportResolver::new( engine, registry );
		for ( name, source ) in auxiliary {
			let module = Module::new( engine, source.bytes() ).map_err( LoadError::Instantiation )?;
			resolver.resolve( &module )?;
			let instance = resolver.linker().instantiate( &mut store, &module ).map_err( LoadError::Instantiation )?;
			resolver.linker_mut().instance( &mut store, name, instance ).map_err( LoadError::Instantiation )?;
			resolver.add_module( name, &module );
			tracing::trace!( plugin = %id, "Instantiated auxiliary module {}", name );
		}

		let module = Module::new( engine, main.bytes() ).map_err( LoadError::Instantiation )?;
		resolver.resolve( &module )?;
		let instance = resolver.linker().instantiate( &mut store, &module ).map_err( LoadError::Instantiation )?;

		if manifest.fuel().is_some() { let _ = store.set_fuel( 0 ); }

		let memory = instance.get_memory( &mut store, "memory" ).ok_or_else(||
			LoadError::Instantiation( wasmtime::Error::msg( "the main module must export its linear memory as \"memory\"" ))
		)?;
		let initial_size = memory.data_size( &store );
		store.data_mut().memory.bind( memory, initial_size );

		tracing::debug!( plugin = %id, modules = manifest.wasm().len(), memory = initial_size, "Loaded plugin" );
		Ok( PluginInstance::new( store, instance, manifest.fuel(), manifest.epoch_deadline() ))

	}

	/// Loads `manifest` and swaps it in for the current instance, keeping the id, the handles
	/// and the destroy hook. Variables start out empty. On failure the old instance stays.
	pub(crate) fn replace(
		&self,
		engine: &Engine,
		manifest: &Manifest,
		registry: &HostFunctionRegistry,
	) -> Result<(), LoadError> {

		let instance = Self::instantiate( self.id, engine, manifest, registry )?;
		let mut slot = self.lock().map_err(| err | match err {
			CallError::ConcurrentCall => LoadError::PluginBusy( self.id ),
			_ => LoadError::UnknownPlugin( self.id ),
		})?;
		match slot.instance.as_mut() {
			Some( current ) => *current = instance,
			None => return Err( LoadError::UnknownPlugin( self.id )),
		}

		tracing::debug!( plugin = %self.id, "Replaced plugin module" );
		Ok(())

	}

	#[inline] pub fn id( &self ) -> PluginId { self.id }

	/// Current lifecycle state.
	pub fn status( &self ) -> PluginStatus {
		let mut slot = match self.shared.slot.try_lock() {
			Ok( slot ) => slot,
			Err( TryLockError::WouldBlock ) => return PluginStatus::Calling,
			Err( TryLockError::Poisoned( poisoned )) => poisoned.into_inner(),
		};
		if self.destroy_pending() { self.finish_destroy( &mut slot ); }
		match slot.instance {
			Some( _ ) => PluginStatus::Ready,
			None => PluginStatus::Destroyed,
		}
	}

	#[inline] fn destroy_pending( &self ) -> bool {
		self.shared.destroy_pending.load( Ordering::SeqCst )
	}

	fn lock( &self ) -> Result<MutexGuard<'_, Slot>, CallError> {
		let mut slot = match self.shared.slot.try_lock() {
			Ok( slot ) => slot,
			Err( TryLockError::WouldBlock ) if self.destroy_pending() => return Err( CallError::UseAfterFree ),
			Err( TryLockError::WouldBlock ) => return Err( CallError::ConcurrentCall ),
			Err( TryLockError::Poisoned( poisoned )) => {
				// A host function panicked mid-call, the instance can't be trusted anymore.
				tracing::warn!( plugin = %self.id, "Plugin lock poisoned, discarding instance" );
				let mut slot = poisoned.into_inner();
				slot.instance = None ;
				self.shared.slot.clear_poison();
				slot
			}
		};
		if self.destroy_pending() {
			self.finish_destroy( &mut slot );
			return Err( CallError::UseAfterFree );
		}
		Ok( slot )
	}

	/// Completes a destroy that was requested while a call was in progress.
	/// Nobody is left to report a hook failure to, so it is logged.
	fn finish_destroy( &self, slot: &mut Slot ) {
		if slot.instance.take().is_some() {
			tracing::debug!( plugin = %self.id, "Destroyed plugin after its call returned" );
		}
		if let Some( hook ) = slot.on_destroy.take() {
			if let Err( err ) = hook( self.id ) {
				tracing::warn!( plugin = %self.id, "Destroy hook failed: {}", err );
			}
		}
	}

	/// Calls the exported function `name` with `input`, returning the bytes it produced.
	///
	/// The export must have the type `( offset: i32, length: i32 ) -> ( offset: i32, length: i32 )`:
	/// it receives the input copied into its memory and returns the location of its output.
	///
	/// # Errors
	/// - [`CallError::UseAfterFree`] if the plugin was destroyed
	/// - [`CallError::ConcurrentCall`] if another call into this plugin is in progress
	/// - [`CallError::ExportNotFound`] / [`CallError::InvalidExport`] if `name` isn't a callable export
	/// - [`CallError::GuestTrap`] if the guest trapped; the plugin is destroyed as a result
	/// - [`CallError::GuestError`] if the guest reported an error; the plugin stays usable
	/// - [`CallError::Memory`] if input or output could not be transferred
	pub fn call( &self, name: &str, input: impl AsRef<[u8]> ) -> Result<Vec<u8>, CallError> {
		let mut slot = self.lock()?;
		let instance = slot.instance.as_mut().ok_or( CallError::UseAfterFree )?;
		tracing::debug!( plugin = %self.id, export = name, "Calling plugin" );
		let result = match instance.call( name, input.as_ref() ) {
			Err( CallError::GuestTrap( err )) => {
				tracing::warn!( plugin = %self.id, export = name, "Guest trapped, destroying plugin: {}", err );
				slot.instance = None ;
				Err( CallError::GuestTrap( err ))
			}
			result => result,
		};
		if self.destroy_pending() { self.finish_destroy( &mut slot ); }
		result
	}

	/// Merges `updates` into the config the guest reads through `config_get`.
	/// A `None` value removes the key.
	///
	/// # Errors
	/// Same locking and lifecycle errors as [`Plugin::call`].
	pub fn update_config( &self, updates: BTreeMap<String, Option<String>> ) -> Result<(), CallError> {
		let mut slot = self.lock()?;
		let config = &mut slot.instance.as_mut().ok_or( CallError::UseAfterFree )?.data_mut().config ;
		for ( key, value ) in updates {
			match value {
				Some( value ) => { config.insert( key, value ); }
				None => { config.remove( &key ); }
			}
		}
		tracing::trace!( plugin = %self.id, keys = config.len(), "Updated plugin config" );
		Ok(())
	}

	/// Whether the main module exports a function called `name`.
	///
	/// # Errors
	/// Same locking and lifecycle errors as [`Plugin::call`].
	pub fn function_exists( &self, name: &str ) -> Result<bool, CallError> {
		let mut slot = self.lock()?;
		Ok( slot.instance.as_mut().ok_or( CallError::UseAfterFree )?.function_exists( name ))
	}

	/// Gives `f` access to the plugin's memory between calls.
	///
	/// # Errors
	/// Same locking and lifecycle errors as [`Plugin::call`].
	pub fn memory<R>( &self, f: impl FnOnce( &mut MemoryManager<'_> ) -> R ) -> Result<R, CallError> {
		let mut slot = self.lock()?;
		let instance = slot.instance.as_mut().ok_or( CallError::UseAfterFree )?;
		Ok( f( &mut instance.memory() ))
	}

	/// Destroys the plugin, releasing its instance and memory.
	///
	/// Destroying an already destroyed plugin is a no-op. The destroy hook, if any,
	/// runs on the first call.
	///
	/// # Errors
	/// - [`DestroyError::Hook`] if the destroy hook failed; the plugin is destroyed anyway
	/// - [`DestroyError::Busy`] if the plugin is executing a call, from another thread or from
	///   inside that call; it fails further operations with [`CallError::UseAfterFree`] and
	///   is destroyed, running the hook, when the call returns
	pub fn destroy( &self ) -> Result<(), DestroyError> {

		let mut slot = match self.shared.slot.try_lock() {
			Ok( slot ) => slot,
			Err( TryLockError::WouldBlock ) => {
				self.shared.destroy_pending.store( true, Ordering::SeqCst );
				// The call may have returned before it could see the flag.
				match self.shared.slot.try_lock() {
					Ok( slot ) => slot,
					Err( TryLockError::Poisoned( poisoned )) => poisoned.into_inner(),
					Err( TryLockError::WouldBlock ) => {
						tracing::debug!( plugin = %self.id, "Plugin is busy, deferring destruction" );
						return Err( DestroyError::Busy );
					}
				}
			}
			Err( TryLockError::Poisoned( poisoned )) => poisoned.into_inner(),
		};
		let was_live = slot.instance.take().is_some();
		let hook = slot.on_destroy.take();
		drop( slot );

		if was_live { tracing::debug!( plugin = %self.id, "Destroyed plugin" ); }

		match hook {
			Some( hook ) => hook( self.id ).map_err( DestroyError::Hook ),
			None => Ok(()),
		}

	}

}
