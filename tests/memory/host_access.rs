use wasm_dock::{ CallError, HostFunctionRegistry, MemoryError, PAGE_SIZE };
use crate::fixtures ;

#[test]
fn allocate_write_read_free() {

	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new() ).unwrap();

	plugin.memory(| memory | {

		let handle = memory.allocate_bytes( b"payload" ).unwrap();
		// Host allocations never overlap the memory the module started with.
		assert!( handle.offset() >= PAGE_SIZE );
		assert_eq!( handle.length(), 7 );
		assert_eq!( memory.length( handle.offset() ), Some( 7 ));
		assert_eq!( memory.read_handle( handle ).unwrap(), b"payload" );

		memory.write( handle.offset(), b"PAY" ).unwrap();
		assert_eq!( memory.read( handle.offset(), 7 ).unwrap(), b"PAYload" );

		memory.free( handle.offset() );
		assert_eq!( memory.length( handle.offset() ), None );

		// Freed space is reused.
		let again = memory.allocate( 4 ).unwrap();
		assert_eq!( again.offset(), handle.offset() );

	}).unwrap();

}

#[test]
fn allocations_do_not_overlap() {

	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new() ).unwrap();

	let handles = plugin.memory(| memory | {
		( 1..50 ).map(| length | memory.allocate( length * 37 ).unwrap() ).collect::<Vec<_>>()
	}).unwrap();

	let mut ranges = handles.iter().map(| handle | ( handle.offset(), handle.end().unwrap() )).collect::<Vec<_>>();
	ranges.sort_unstable();
	assert!( ranges.windows( 2 ).all(| pair | pair[ 0 ].1 <= pair[ 1 ].0 ));
	assert!( ranges.iter().all(|( start, _ )| *start != 0 ));

}

#[test]
fn out_of_bounds_access() {

	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new() ).unwrap();

	plugin.memory(| memory | {
		let size = memory.size();
		match memory.read( size - 2, 4 ) {
			Err( MemoryError::OutOfBounds { offset, length, size: reported }) => {
				assert_eq!(( offset, length, reported ), ( size - 2, 4, size ));
			}
			value => panic!( "Expected OutOfBounds error, found: {:#?}", value ),
		}
		assert!( matches!( memory.write( usize::MAX, b"x" ), Err( MemoryError::OutOfBounds { .. })));
		assert!( matches!( memory.read( usize::MAX, 2 ), Err( MemoryError::OutOfBounds { .. })));
	}).unwrap();

}

#[test]
fn unknown_frees_are_ignored() {
	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new() ).unwrap();
	plugin.memory(| memory | {
		memory.free( 12_345 );
		assert_eq!( memory.length( 12_345 ), None );
	}).unwrap();
}

#[test]
fn memory_access_after_destroy() {
	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new() ).unwrap();
	plugin.destroy().unwrap();
	match plugin.memory(| memory | memory.size() ) {
		Err( CallError::UseAfterFree ) => {}
		value => panic!( "Expected UseAfterFree error, found: {:#?}", value ),
	}
}
