use wasm_dock::{ CallError, HostFunctionRegistry, PluginStatus };
use crate::fixtures ;

#[test]
fn trap_destroys_the_plugin() {

	let mut context = fixtures::context();
	let registry = HostFunctionRegistry::new();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &registry ).unwrap();
	let bystander = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &registry ).unwrap();

	match plugin.call( "trap", b"" ) {
		Err( CallError::GuestTrap( _ )) => {}
		value => panic!( "Expected GuestTrap error, found: {:#?}", value ),
	}
	assert_eq!( plugin.status(), PluginStatus::Destroyed );
	match plugin.call( "echo", b"" ) {
		Err( CallError::UseAfterFree ) => {}
		value => panic!( "Expected UseAfterFree error, found: {:#?}", value ),
	}

	// Other plugins are unaffected.
	assert_eq!( bystander.status(), PluginStatus::Ready );
	assert_eq!( bystander.call( "echo", b"fine" ).unwrap(), b"fine" );

	// The trapped plugin still gets torn down cleanly.
	assert!( context.close().is_ok() );

}
