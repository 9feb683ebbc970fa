use std::collections::{ BTreeMap, HashMap };
use thiserror::Error ;
use wasmtime::{ AsContextMut, Instance, Store };

use crate::manifest::Manifest ;
use crate::memory::{ MemoryError, MemoryHandle, MemoryLimiter, MemoryManager, MemoryState };
use crate::value::describe_func ;



/// Data stored inside a plugin's wasmtime [`Store`].
///
/// Host functions reach it through the [`MemoryManager`] they are handed.
#[derive( Debug )]
pub(crate) struct PluginData {
	pub(crate) memory: MemoryState,
	pub(crate) limiter: MemoryLimiter,
	pub(crate) config: BTreeMap<String, String>,
	pub(crate) vars: HashMap<String, Vec<u8>>,
	pub(crate) error: Option<String>,
}

impl PluginData {
	pub(crate) fn new( manifest: &Manifest ) -> Self {
		let ceiling = manifest.memory().max_bytes();
		Self {
			memory: MemoryState::new( ceiling ),
			limiter: MemoryLimiter::new( ceiling ),
			config: manifest.config().clone(),
			vars: HashMap::new(),
			error: None,
		}
	}
}

/// Errors that can occur when calling into a plugin.
#[derive( Error, Debug )]
pub enum CallError {
	/// The plugin was destroyed, explicitly, by its context, or after a trap.
	#[error( "Use After Free: plugin has been destroyed" )] UseAfterFree,
	/// Another call into the same plugin is in progress (concurrently or reentrantly).
	#[error( "Concurrent Call: plugin is already executing a call" )] ConcurrentCall,
	/// The module exports no function with this name.
	#[error( "Export Not Found: {0}" )] ExportNotFound( String ),
	/// The export doesn't follow the `( offset, length ) -> ( offset, length )` convention.
	#[error( "Invalid Export {name}: expected (i32, i32) -> (i32, i32), found {found}" )]
	InvalidExport { name: String, found: String },
	/// The guest trapped, ran out of fuel, hit its epoch deadline, or a host function it called failed.
	#[error( "Guest Trap: {0}" )] GuestTrap( wasmtime::Error ),
	/// The guest reported an error through the kernel `error_set` function.
	#[error( "Guest Error: {0}" )] GuestError( String ),
	/// Input or output could not be moved across the boundary.
	#[error( "Memory Error: {0}" )] Memory( #[from] MemoryError ),
}

/// An instantiated module with its store, ready for calls.
pub(crate) struct PluginInstance {
	store: Store<PluginData>,
	instance: Instance,
	fuel: Option<u64>,
	epoch_deadline: Option<u64>,
}

impl std::fmt::Debug for PluginInstance {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::result::Result<(), std::fmt::Error> {
		f.debug_struct( "PluginInstance" )
			.field( "data", self.store.data() )
			.field( "fuel", &self.fuel )
			.field( "epoch_deadline", &self.epoch_deadline )
			.finish_non_exhaustive()
	}
}

impl PluginInstance {

	pub(crate) fn new( store: Store<PluginData>, instance: Instance, fuel: Option<u64>, epoch_deadline: Option<u64> ) -> Self {
		Self { store, instance, fuel, epoch_deadline }
	}

	#[inline] pub(crate) fn data_mut( &mut self ) -> &mut PluginData { self.store.data_mut() }

	pub(crate) fn memory( &mut self ) -> MemoryManager<'_> {
		MemoryManager::new( self.store.as_context_mut() )
	}

	pub(crate) fn function_exists( &mut self, name: &str ) -> bool {
		self.instance.get_func( &mut self.store, name ).is_some()
	}

	pub(crate) fn call( &mut self, name: &str, input: &[u8] ) -> Result<Vec<u8>, CallError> {

		let func = self.instance
			.get_func( &mut self.store, name )
			.ok_or_else(|| CallError::ExportNotFound( name.to_string() ))?;
		let typed = func
			.typed::<( i32, i32 ), ( i32, i32 )>( &self.store )
			.map_err(|_| CallError::InvalidExport { name: name.to_string(), found: describe_func( &func.ty( &self.store )) })?;

		// Buffers from the previous call have already been copied out.
		self.store.data_mut().memory.reset();
		self.store.data_mut().error = None ;
		let input = self.memory().allocate_bytes( input )?;

		let fuel_was_set = if let Some( fuel ) = self.fuel {
			self.store.set_fuel( fuel ).map_err( CallError::GuestTrap )?;
			true
		} else { false };

		if let Some( ticks ) = self.epoch_deadline {
			self.store.set_epoch_deadline( ticks );
		}

		let call_result = typed.call( &mut self.store, ( input.guest_offset(), input.guest_length() ));

		// Reset fuel to 0 after call to prevent leakage to subsequent calls
		if fuel_was_set { let _ = self.store.set_fuel( 0 ); }

		let ( offset, length ) = call_result.map_err( CallError::GuestTrap )?;

		if let Some( message ) = self.store.data_mut().error.take() {
			return Err( CallError::GuestError( message ));
		}

		let output = MemoryHandle::from_guest( offset, length );
		tracing::trace!( export = name, offset = output.offset(), length = output.length(), "Reading plugin output" );
		Ok( self.memory().read_handle( output )? )

	}

}
