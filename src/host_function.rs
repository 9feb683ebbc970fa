//! Host functions callable from guest modules.
//!
//! A host function is anything implementing [`HostFunction`]: it declares a [`Signature`]
//! and is invoked with already-decoded [`Value`]s plus a [`MemoryManager`] for the calling
//! plugin's memory. Closures can be wrapped with [`HostFn`].
//!
//! ```
//! use wasm_dock::{ HostFn, HostError, Value, ValueType };
//!
//! // Receives a buffer from the guest and returns its length.
//! let measure = HostFn::new( "measure", [ ValueType::Buffer ], [ ValueType::I32 ], | memory, args | {
//! 	let handle = args[ 0 ].as_buffer().ok_or( HostError::Failed( "expected a buffer".into() ))?;
//! 	let bytes = memory.read_handle( handle )?;
//! 	Ok( vec![ Value::I32( bytes.len() as i32 )])
//! });
//! # let _ = measure ;
//! ```

use thiserror::Error ;

use crate::memory::{ MemoryManager, MemoryError };
use crate::plugin_instance::CallError ;
use crate::value::{ Value, ValueType, WasmType };



/// Name and type of a host function.
#[derive( Debug, Clone, PartialEq, Eq, Hash )]
pub struct Signature {
	name: String,
	params: Vec<ValueType>,
	results: Vec<ValueType>,
}

impl Signature {

	pub fn new(
		name: impl Into<String>,
		params: impl IntoIterator<Item = ValueType>,
		results: impl IntoIterator<Item = ValueType>,
	) -> Self {
		Self {
			name: name.into(),
			params: params.into_iter().collect(),
			results: results.into_iter().collect(),
		}
	}

	#[inline] pub fn name( &self ) -> &str { &self.name }

	#[inline] pub fn params( &self ) -> &[ValueType] { &self.params }

	#[inline] pub fn results( &self ) -> &[ValueType] { &self.results }

	/// Parameter types as they appear in the WASM import.
	pub fn lowered_params( &self ) -> Vec<WasmType> { ValueType::lower_all( &self.params ) }

	/// Result types as they appear in the WASM import.
	pub fn lowered_results( &self ) -> Vec<WasmType> { ValueType::lower_all( &self.results ) }

}

impl std::fmt::Display for Signature {
	fn fmt( &self, f: &mut std::fmt::Formatter ) -> std::fmt::Result {
		let join = | types: &[ValueType] | types.iter().map( ToString::to_string ).collect::<Vec<_>>().join( ", " );
		write!( f, "{}({}) -> ({})", self.name, join( &self.params ), join( &self.results ))
	}
}

/// Errors a host function may return. Any of these aborts the guest call with a trap.
#[derive( Debug, Error )]
pub enum HostError {
	/// Guest memory access failed.
	#[error( "Memory Error: {0}" )] Memory( #[from] MemoryError ),
	/// A nested plugin call failed.
	#[error( "Call Error: {0}" )] Call( #[from] CallError ),
	/// The function returned values that don't match its declared results.
	#[error( "Invalid Results from {name}: expected {expected}" )] InvalidResults { name: String, expected: String },
	/// The function reported a failure.
	#[error( "{0}" )] Failed( String ),
	/// Any other error raised by the host.
	#[error( "{0}" )] Custom( #[from] Box<dyn std::error::Error + Send + Sync> ),
}

/// A host-side implementation of an import.
///
/// Implementations must be thread safe since a plugin (and therefore the functions it
/// imported) may be called from any thread.
pub trait HostFunction: Send + Sync {

	/// Declared name and type.
	fn signature( &self ) -> &Signature ;

	/// Runs the function.
	///
	/// `args` match [`Signature::params`]; buffers arrive as [`Value::Buffer`] handles that can be
	/// resolved through `memory`. The returned values must match [`Signature::results`]. To return
	/// a byte payload, allocate it with [`MemoryManager::allocate_bytes`] and return the handle.
	///
	/// # Errors
	/// Any error traps the guest.
	fn invoke( &self, memory: &mut MemoryManager<'_>, args: &[Value] ) -> Result<Vec<Value>, HostError> ;

}

/// Boxed closure type accepted by [`HostFn`].
type HostClosure = dyn Fn( &mut MemoryManager<'_>, &[Value] ) -> Result<Vec<Value>, HostError> + Send + Sync ;

/// A [`HostFunction`] backed by a closure.
pub struct HostFn {
	signature: Signature,
	closure: Box<HostClosure>,
}

impl HostFn {

	pub fn new(
		name: impl Into<String>,
		params: impl IntoIterator<Item = ValueType>,
		results: impl IntoIterator<Item = ValueType>,
		closure: impl Fn( &mut MemoryManager<'_>, &[Value] ) -> Result<Vec<Value>, HostError> + Send + Sync + 'static,
	) -> Self {
		Self::from_signature( Signature::new( name, params, results ), closure )
	}

	pub fn from_signature(
		signature: Signature,
		closure: impl Fn( &mut MemoryManager<'_>, &[Value] ) -> Result<Vec<Value>, HostError> + Send + Sync + 'static,
	) -> Self {
		Self { signature, closure: Box::new( closure ) }
	}

}

impl HostFunction for HostFn {
	fn signature( &self ) -> &Signature { &self.signature }
	fn invoke( &self, memory: &mut MemoryManager<'_>, args: &[Value] ) -> Result<Vec<Value>, HostError> {
		( self.closure )( memory, args )
	}
}

impl std::fmt::Debug for HostFn {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "HostFn" )
			.field( "signature", &self.signature )
			.field( "closure", &"<closure>" )
			.finish()
	}
}

#[cfg( test )]
mod tests {
	use super::* ;

	#[test]
	fn signature_display() {
		let signature = Signature::new( "log", [ ValueType::Buffer, ValueType::I64 ], [] );
		assert_eq!( signature.to_string(), "log(buffer, i64) -> ()" );
		assert_eq!( signature.lowered_params(), vec![ WasmType::I32, WasmType::I32, WasmType::I64 ]);
	}
}
