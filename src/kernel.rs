//! Built-in host functions every plugin may import from the `wasm_dock` namespace.
//!
//! | function     | params                  | results | effect |
//! |--------------|-------------------------|---------|--------|
//! | `alloc`      | `length: i32`           | `i32`   | reserves host-managed memory, returns its offset |
//! | `free`       | `offset: i32`           |         | releases an allocation made with `alloc` |
//! | `length`     | `offset: i32`           | `i32`   | length of an allocation, `0` if unknown |
//! | `config_get` | `key: buffer`           | `i32`   | offset of the config value (query `length`), `0` if absent |
//! | `var_get`    | `key: buffer`           | `i32`   | offset of the variable's value, `0` if unset |
//! | `var_set`    | `key: buffer, value: buffer` |    | stores a variable; a value offset of `0` removes it |
//! | `error_set`  | `message: buffer`       |         | fails the current call with [`CallError::GuestError`]( crate::CallError::GuestError ) |
//!
//! Buffers are `( offset, length )` pairs in the plugin's own memory. Offsets returned by
//! `alloc`, `config_get` and `var_get` are only valid until the current call returns.

use crate::host_function::{ HostError, HostFn };
use crate::memory::{ MemoryHandle, MemoryManager };
use crate::registry::HostFunctionRegistry ;
use crate::value::{ Value, ValueType };



/// Upper bound on the combined size of a plugin's variable keys and values.
pub const VAR_STORE_LIMIT: usize = 100 * 1024 * 1024 ;

pub(crate) fn registry() -> HostFunctionRegistry {
	[
		HostFn::new( "alloc", [ ValueType::I32 ], [ ValueType::I32 ], alloc ),
		HostFn::new( "free", [ ValueType::I32 ], [], free ),
		HostFn::new( "length", [ ValueType::I32 ], [ ValueType::I32 ], length ),
		HostFn::new( "config_get", [ ValueType::Buffer ], [ ValueType::I32 ], config_get ),
		HostFn::new( "var_get", [ ValueType::Buffer ], [ ValueType::I32 ], var_get ),
		HostFn::new( "var_set", [ ValueType::Buffer, ValueType::Buffer ], [], var_set ),
		HostFn::new( "error_set", [ ValueType::Buffer ], [], error_set ),
	].into_iter().collect()
}

#[allow( clippy::cast_sign_loss )]
fn offset_arg( args: &[Value], index: usize ) -> Result<usize, HostError> {
	args.get( index )
		.and_then( Value::as_i32 )
		.map(| offset | offset as u32 as usize )
		.ok_or_else(|| HostError::Failed( format!( "expected an i32 argument at position {index}" )))
}

fn buffer_arg( args: &[Value], index: usize ) -> Result<MemoryHandle, HostError> {
	args.get( index )
		.and_then( Value::as_buffer )
		.ok_or_else(|| HostError::Failed( format!( "expected a buffer argument at position {index}" )))
}

fn read_key( memory: &MemoryManager<'_>, handle: MemoryHandle ) -> Result<String, HostError> {
	String::from_utf8( memory.read_handle( handle )? ).map_err(| err | HostError::Custom( err.into() ))
}

/// Copies `bytes` into a fresh allocation and returns its offset as an `i32`.
fn hand_out( memory: &mut MemoryManager<'_>, bytes: Option<&[u8]> ) -> Result<Vec<Value>, HostError> {
	let offset = match bytes {
		Some( bytes ) => memory.allocate_bytes( bytes )?.guest_offset(),
		None => 0,
	};
	Ok( vec![ Value::I32( offset )])
}

fn alloc( memory: &mut MemoryManager<'_>, args: &[Value] ) -> Result<Vec<Value>, HostError> {
	let handle = memory.allocate( offset_arg( args, 0 )? )?;
	Ok( vec![ Value::I32( handle.guest_offset() )])
}

fn free( memory: &mut MemoryManager<'_>, args: &[Value] ) -> Result<Vec<Value>, HostError> {
	memory.free( offset_arg( args, 0 )? );
	Ok( Vec::new() )
}

#[allow( clippy::cast_possible_truncation, clippy::cast_possible_wrap )]
fn length( memory: &mut MemoryManager<'_>, args: &[Value] ) -> Result<Vec<Value>, HostError> {
	let length = memory.length( offset_arg( args, 0 )? ).unwrap_or( 0 );
	Ok( vec![ Value::I32( length as u32 as i32 )])
}

fn config_get( memory: &mut MemoryManager<'_>, args: &[Value] ) -> Result<Vec<Value>, HostError> {
	let key = read_key( memory, buffer_arg( args, 0 )? )?;
	let value = memory.data().config.get( &key ).map(| value | value.as_bytes().to_vec() );
	hand_out( memory, value.as_deref() )
}

fn var_get( memory: &mut MemoryManager<'_>, args: &[Value] ) -> Result<Vec<Value>, HostError> {
	let key = read_key( memory, buffer_arg( args, 0 )? )?;
	let value = memory.data().vars.get( &key ).cloned();
	hand_out( memory, value.as_deref() )
}

fn var_set( memory: &mut MemoryManager<'_>, args: &[Value] ) -> Result<Vec<Value>, HostError> {

	let key = read_key( memory, buffer_arg( args, 0 )? )?;
	let value = buffer_arg( args, 1 )?;

	if value.offset() == 0 {
		memory.data_mut().vars.remove( &key );
		return Ok( Vec::new() );
	}

	let value = memory.read_handle( value )?;
	let vars = &memory.data().vars ;
	let used = vars.iter()
		.filter(|( existing, _ )| **existing != key )
		.map(|( existing, value )| existing.len() + value.len() )
		.sum::<usize>();
	if used + key.len() + value.len() > VAR_STORE_LIMIT {
		return Err( HostError::Failed( format!( "variable store is full ({VAR_STORE_LIMIT} bytes), cannot set {key}" )));
	}

	memory.data_mut().vars.insert( key, value );
	Ok( Vec::new() )

}

fn error_set( memory: &mut MemoryManager<'_>, args: &[Value] ) -> Result<Vec<Value>, HostError> {
	let handle = buffer_arg( args, 0 )?;
	let message = match handle.offset() {
		0 => None,
		_ => Some( String::from_utf8_lossy( &memory.read_handle( handle )? ).into_owned() ),
	};
	memory.data_mut().error = message ;
	Ok( Vec::new() )
}
