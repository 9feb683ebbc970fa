use wasm_dock::{ CallError, HostFunctionRegistry, PluginStatus };
use crate::fixtures ;

#[test]
fn guest_reported_error() {

	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::FAIL ), &HostFunctionRegistry::new() ).unwrap();

	match plugin.call( "fail", b"boom" ) {
		Err( CallError::GuestError( message )) => assert_eq!( message, "boom" ),
		value => panic!( "Expected GuestError error, found: {:#?}", value ),
	}
	assert_eq!( plugin.status(), PluginStatus::Ready );

	// The error doesn't leak into the next call.
	assert_eq!( plugin.call( "echo", b"recovered" ).unwrap(), b"recovered" );

	match plugin.call( "fail", b"again" ) {
		Err( CallError::GuestError( message )) => assert_eq!( message, "again" ),
		value => panic!( "Expected GuestError error, found: {:#?}", value ),
	}

}
