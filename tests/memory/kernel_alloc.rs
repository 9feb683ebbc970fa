use wasm_dock::HostFunctionRegistry ;
use crate::fixtures ;

#[test]
fn guest_allocates_through_kernel() {
	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ALLOC ), &HostFunctionRegistry::new() ).unwrap();
	assert_eq!( plugin.call( "copy", b"duplicate me" ).unwrap(), b"duplicate me" );
	assert_eq!( plugin.call( "alloc_free", b"untouched" ).unwrap(), b"untouched" );
}

#[test]
fn kernel_allocations_are_released_between_calls() {

	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ALLOC ), &HostFunctionRegistry::new() ).unwrap();

	let input = vec![ 1u8; 100_000 ];
	plugin.call( "copy", &input ).unwrap();
	let size = plugin.memory(| memory | memory.size() ).unwrap();
	( 0..10 ).for_each(|_| assert_eq!( plugin.call( "copy", &input ).unwrap(), input ));
	assert_eq!( plugin.memory(| memory | memory.size() ).unwrap(), size );

}
