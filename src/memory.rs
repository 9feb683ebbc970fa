//! Guest linear memory access.
//!
//! Every plugin owns exactly one linear memory, the one its module exports as `memory`.
//! The host never holds pointers into it; all access goes through a [`MemoryManager`],
//! which checks every offset and length against the memory's size at the moment of access.
//! This matters because any call into the guest (or any allocation) may grow the memory
//! and move its backing storage.
//!
//! Host allocations live above the memory size the module was instantiated with, so they
//! never collide with the guest's static data, stack or heap. If the guest grows the memory
//! itself after the host did, the host starts a new region at the new end instead of
//! extending into the guest's pages.

use std::collections::BTreeMap ;
use thiserror::Error ;
use wasmtime::{ AsContext, Memory, StoreContextMut };

use crate::plugin_instance::PluginData ;



/// Size of a WASM page in bytes.
pub const PAGE_SIZE: usize = 65_536 ;

/// Alignment of every host allocation.
const ALIGN: usize = 8 ;

/// A region of guest memory, identified by its offset and length.
///
/// Offsets are guest-local and meaningless outside the plugin they came from.
#[derive( Copy, Clone, Eq, PartialEq, Hash, Debug, Default )]
pub struct MemoryHandle {
	offset: usize,
	length: usize,
}

impl MemoryHandle {

	#[inline] pub fn new( offset: usize, length: usize ) -> Self { Self { offset, length }}

	#[inline] pub fn offset( &self ) -> usize { self.offset }

	#[inline] pub fn length( &self ) -> usize { self.length }

	/// One past the last byte, or `None` if it does not fit in `usize`.
	#[inline] pub fn end( &self ) -> Option<usize> { self.offset.checked_add( self.length ) }

	/// Reinterprets a guest `( i32, i32 )` pair; guests address memory with unsigned 32-bit values.
	#[allow( clippy::cast_sign_loss )]
	pub(crate) fn from_guest( offset: i32, length: i32 ) -> Self {
		Self::new( offset as u32 as usize, length as u32 as usize )
	}

	#[allow( clippy::cast_possible_truncation, clippy::cast_possible_wrap )]
	pub(crate) fn guest_offset( &self ) -> i32 { self.offset as u32 as i32 }

	#[allow( clippy::cast_possible_truncation, clippy::cast_possible_wrap )]
	pub(crate) fn guest_length( &self ) -> i32 { self.length as u32 as i32 }

}

/// Errors raised by guest memory access.
#[derive( Debug, Error )]
pub enum MemoryError {
	/// Satisfying the allocation would grow memory past its ceiling, or the engine refused to grow it.
	#[error( "Out Of Memory: cannot allocate {requested} bytes (ceiling: {ceiling:?} bytes)" )]
	OutOfMemory { requested: usize, ceiling: Option<usize> },
	/// The accessed range lies outside the current memory.
	#[error( "Out Of Bounds: {length} bytes at offset {offset} exceed memory size {size}" )]
	OutOfBounds { offset: usize, length: usize, size: usize },
	/// The plugin's memory is not bound yet (e.g. during the module's start function).
	#[error( "Memory Unavailable" )] Unavailable,
}

#[derive( Copy, Clone, Debug )]
struct Region { start: usize, end: usize }

#[derive( Copy, Clone, Debug )]
struct Block { capacity: usize, length: usize }

/// Where the next allocation goes, and how far memory has to grow first.
#[derive( Copy, Clone, Debug )]
struct Plan { region: usize, offset: usize, grow_to: Option<usize> }

/// Host-side allocator bookkeeping for one plugin's memory.
///
/// Lives inside the store data so that host functions can reach it while the guest runs.
#[derive( Debug, Default )]
pub(crate) struct MemoryState {
	memory: Option<Memory>,
	ceiling: Option<usize>,
	regions: Vec<Region>,
	cursor_region: usize,
	cursor: usize,
	blocks: BTreeMap<usize, Block>,
	free: Vec<( usize, usize )>,
}

impl MemoryState {

	pub(crate) fn new( ceiling: Option<usize> ) -> Self {
		Self { ceiling, ..Self::default() }
	}

	/// Binds the instantiated memory. Host allocations start at `initial_size`.
	pub(crate) fn bind( &mut self, memory: Memory, initial_size: usize ) {
		self.memory = Some( memory );
		self.regions = match initial_size {
			0 => Vec::new(),
			size => vec![ Region { start: size, end: size }],
		};
		self.reset();
	}

	/// Releases every host allocation.
	pub(crate) fn reset( &mut self ) {
		self.blocks.clear();
		self.free.clear();
		self.cursor_region = 0 ;
		self.cursor = self.regions.first().map_or( 0, | region | region.start );
	}

	fn take_free( &mut self, aligned: usize ) -> Option<usize> {
		let index = self.free.iter().position(|( _, capacity )| *capacity >= aligned )?;
		let ( offset, capacity ) = self.free.swap_remove( index );
		if capacity - aligned >= ALIGN {
			self.free.push(( offset + aligned, capacity - aligned ));
		}
		Some( offset )
	}

	fn plan( &self, aligned: usize, memory_size: usize ) -> Option<Plan> {

		let mut index = self.cursor_region ;
		let mut position = self.cursor ;

		while let Some( region ) = self.regions.get( index ) {
			let end = position.checked_add( aligned )?;
			if end <= region.end {
				return Some( Plan { region: index, offset: position, grow_to: None });
			}
			if index + 1 == self.regions.len() && region.end == memory_size {
				return Some( Plan { region: index, offset: position, grow_to: Some( round_to_pages( end )? )});
			}
			index += 1 ;
			if let Some( next ) = self.regions.get( index ) { position = next.start }
		}

		// Nothing left in owned regions: open a new one at the current end of memory.
		// Offset 0 is never handed out so guests can use it as a null value.
		let start = memory_size.max( ALIGN );
		Some( Plan {
			region: self.regions.len(),
			offset: start,
			grow_to: Some( round_to_pages( start.checked_add( aligned )? )? ),
		})

	}

	fn commit( &mut self, plan: Plan, aligned: usize ) {
		match ( self.regions.get_mut( plan.region ), plan.grow_to ) {
			( Some( region ), Some( end )) => region.end = end,
			( Some( _ ), Option::None ) => {}
			( Option::None, grow_to ) => self.regions.push( Region {
				start: plan.offset,
				end: grow_to.unwrap_or( plan.offset + aligned ),
			}),
		}
		self.cursor_region = plan.region ;
		self.cursor = plan.offset + aligned ;
	}

	fn release( &mut self, offset: usize ) -> bool {
		let Some( block ) = self.blocks.remove( &offset ) else { return false };
		if offset + block.capacity == self.cursor {
			self.cursor = offset ;
		} else {
			self.free.push(( offset, block.capacity ));
		}
		true
	}

}

fn align( length: usize ) -> Option<usize> {
	Some( length.max( 1 ).checked_add( ALIGN - 1 )? & !( ALIGN - 1 ))
}

fn round_to_pages( bytes: usize ) -> Option<usize> {
	Some( bytes.checked_add( PAGE_SIZE - 1 )? / PAGE_SIZE * PAGE_SIZE )
}

/// Bounds-checked access to one plugin's guest memory.
///
/// Handed to host functions while the guest is running, and available between calls
/// through [`Plugin::memory`]( crate::Plugin::memory ).
pub struct MemoryManager<'a> {
	store: StoreContextMut<'a, PluginData>,
}

impl<'a> MemoryManager<'a> {

	pub(crate) fn new( store: StoreContextMut<'a, PluginData> ) -> Self {
		Self { store }
	}

	pub(crate) fn data( &self ) -> &PluginData { self.store.data() }

	pub(crate) fn data_mut( &mut self ) -> &mut PluginData { self.store.data_mut() }

	fn memory( &self ) -> Result<Memory, MemoryError> {
		self.store.data().memory.memory.ok_or( MemoryError::Unavailable )
	}

	/// Current size of guest memory in bytes.
	pub fn size( &self ) -> usize {
		self.memory().map_or( 0, | memory | memory.data_size( self.store.as_context() ))
	}

	/// Reserves `length` bytes of guest memory, growing it if needed.
	///
	/// # Errors
	/// Returns [`MemoryError::OutOfMemory`] if the memory ceiling would be exceeded
	/// or the engine refuses to grow the memory.
	pub fn allocate( &mut self, length: usize ) -> Result<MemoryHandle, MemoryError> {

		let memory = self.memory()?;
		let ceiling = self.store.data().memory.ceiling ;
		let out_of_memory = || MemoryError::OutOfMemory { requested: length, ceiling };
		let aligned = align( length ).ok_or_else( out_of_memory )?;

		if let Some( offset ) = self.store.data_mut().memory.take_free( aligned ) {
			self.store.data_mut().memory.blocks.insert( offset, Block { capacity: aligned, length });
			return Ok( MemoryHandle::new( offset, length ));
		}

		let size = memory.data_size( self.store.as_context() );
		let plan = self.store.data().memory.plan( aligned, size ).ok_or_else( out_of_memory )?;

		if let Some( grow_to ) = plan.grow_to {
			if ceiling.is_some_and(| ceiling | grow_to > ceiling ) {
				return Err( out_of_memory() );
			}
			let pages = ( grow_to.saturating_sub( size ) / PAGE_SIZE ) as u64 ;
			if pages > 0 {
				memory.grow( &mut self.store, pages ).map_err(| err | {
					tracing::debug!( "Guest memory growth by {} pages refused: {}", pages, err );
					out_of_memory()
				})?;
			}
		}

		let state = &mut self.store.data_mut().memory ;
		state.commit( plan, aligned );
		state.blocks.insert( plan.offset, Block { capacity: aligned, length });
		tracing::trace!( offset = plan.offset, length, "Allocated guest memory" );
		Ok( MemoryHandle::new( plan.offset, length ))

	}

	/// Allocates a region and copies `bytes` into it.
	///
	/// # Errors
	/// See [`MemoryManager::allocate`].
	pub fn allocate_bytes( &mut self, bytes: &[u8] ) -> Result<MemoryHandle, MemoryError> {
		let handle = self.allocate( bytes.len() )?;
		self.write( handle.offset(), bytes )?;
		Ok( handle )
	}

	/// Marks a previous allocation reusable. Unknown offsets are ignored.
	pub fn free( &mut self, offset: usize ) {
		if !self.store.data_mut().memory.release( offset ) {
			tracing::debug!( offset, "Ignoring free of unknown guest allocation" );
		}
	}

	/// Length of the live host allocation starting at `offset`.
	pub fn length( &self, offset: usize ) -> Option<usize> {
		self.store.data().memory.blocks.get( &offset ).map(| block | block.length )
	}

	/// Copies `bytes` into guest memory at `offset`.
	///
	/// # Errors
	/// Returns [`MemoryError::OutOfBounds`] if the range exceeds the current memory size.
	pub fn write( &mut self, offset: usize, bytes: &[u8] ) -> Result<(), MemoryError> {
		let memory = self.memory()?;
		let data = memory.data_mut( &mut self.store );
		let size = data.len();
		offset.checked_add( bytes.len() )
			.and_then(| end | data.get_mut( offset..end ))
			.ok_or( MemoryError::OutOfBounds { offset, length: bytes.len(), size })?
			.copy_from_slice( bytes );
		Ok(())
	}

	/// Copies `length` bytes out of guest memory.
	///
	/// # Errors
	/// Returns [`MemoryError::OutOfBounds`] if the range exceeds the current memory size.
	pub fn read( &self, offset: usize, length: usize ) -> Result<Vec<u8>, MemoryError> {
		let memory = self.memory()?;
		let data = memory.data( self.store.as_context() );
		offset.checked_add( length )
			.and_then(| end | data.get( offset..end ))
			.map( <[u8]>::to_vec )
			.ok_or( MemoryError::OutOfBounds { offset, length, size: data.len() })
	}

	/// Reads the region described by `handle`.
	///
	/// # Errors
	/// See [`MemoryManager::read`].
	#[inline]
	pub fn read_handle( &self, handle: MemoryHandle ) -> Result<Vec<u8>, MemoryError> {
		self.read( handle.offset(), handle.length() )
	}

}

/// Enforces the memory ceiling on growth requested by the guest itself.
#[derive( Debug )]
pub(crate) struct MemoryLimiter {
	max_bytes: Option<usize>,
}

impl MemoryLimiter {
	pub(crate) fn new( max_bytes: Option<usize> ) -> Self { Self { max_bytes }}
}

impl wasmtime::ResourceLimiter for MemoryLimiter {
	fn memory_growing( &mut self, _current: usize, desired: usize, _maximum: Option<usize> ) -> wasmtime::Result<bool> {
		Ok( self.max_bytes.is_none_or(| max | desired <= max ))
	}
	fn table_growing( &mut self, _current: usize, _desired: usize, _maximum: Option<usize> ) -> wasmtime::Result<bool> {
		Ok( true )
	}
}

#[cfg( test )]
mod tests {
	use super::* ;

	fn bound( initial: usize ) -> MemoryState {
		let mut state = MemoryState::new( None );
		state.regions = vec![ Region { start: initial, end: initial }];
		state.reset();
		state
	}

	#[test]
	fn alignment_never_returns_zero() {
		assert_eq!( align( 0 ), Some( 8 ));
		assert_eq!( align( 9 ), Some( 16 ));
		assert_eq!( align( usize::MAX ), None );
	}

	#[test]
	fn plan_grows_the_last_region_in_place() {
		let state = bound( PAGE_SIZE );
		let plan = state.plan( 16, PAGE_SIZE ).unwrap();
		assert_eq!( plan.offset, PAGE_SIZE );
		assert_eq!( plan.grow_to, Some( 2 * PAGE_SIZE ));
	}

	#[test]
	fn plan_opens_new_region_after_guest_growth() {
		let mut state = bound( PAGE_SIZE );
		let plan = state.plan( 16, PAGE_SIZE ).unwrap();
		state.commit( plan, 16 );
		// The guest grew memory by one page after the host's region.
		let plan = state.plan( PAGE_SIZE, 3 * PAGE_SIZE ).unwrap();
		assert_eq!( plan.offset, 3 * PAGE_SIZE );
		assert_eq!( plan.region, 1 );
	}

	#[test]
	fn freed_tail_block_rolls_back_cursor() {
		let mut state = bound( PAGE_SIZE );
		let plan = state.plan( 32, PAGE_SIZE ).unwrap();
		state.commit( plan, 32 );
		state.blocks.insert( plan.offset, Block { capacity: 32, length: 30 });
		assert!( state.release( plan.offset ));
		assert_eq!( state.cursor, PAGE_SIZE );
		assert!( !state.release( plan.offset ));
	}

	#[test]
	fn free_list_splits_large_blocks() {
		let mut state = bound( PAGE_SIZE );
		state.free.push(( 64, 64 ));
		assert_eq!( state.take_free( 16 ), Some( 64 ));
		assert_eq!( state.free, vec![( 80, 48 )]);
		assert_eq!( state.take_free( 128 ), None );
	}
}
