use std::sync::{ Arc, Mutex };
use once_cell::sync::OnceCell ;
use wasm_dock::{ CallError, HostError, HostFunctionRegistry, Plugin, PluginStatus };
use crate::fixtures ;

#[test]
fn reentrant_call_is_rejected() {

	let mut context = fixtures::context();
	let target: Arc<OnceCell<Plugin>> = Arc::new( OnceCell::new() );
	let inner_result: Arc<Mutex<Option<Result<Vec<u8>, CallError>>>> = Arc::new( Mutex::new( None ));

	let plugin_ref = Arc::clone( &target );
	let result_ref = Arc::clone( &inner_result );
	let mut registry = HostFunctionRegistry::new();
	registry.register_fn( "callback", [], [], move |_, _| {
		let plugin = plugin_ref.get().ok_or( HostError::Failed( "plugin not set".into() ))?;
		assert_eq!( plugin.status(), PluginStatus::Calling );
		let result = plugin.call( "run", b"nested" );
		let failed = result.is_err();
		*result_ref.lock().unwrap() = Some( result );
		match failed {
			true => Err( HostError::Failed( "nested call rejected".into() )),
			false => Ok( Vec::new() ),
		}
	});

	let plugin = context.create_plugin( &fixtures::manifest( fixtures::CALLBACK ), &registry ).unwrap();
	target.set( plugin.clone() ).unwrap();

	match plugin.call( "run", b"outer" ) {
		Err( CallError::GuestTrap( _ )) => {}
		value => panic!( "Expected GuestTrap error, found: {:#?}", value ),
	}
	match inner_result.lock().unwrap().take() {
		Some( Err( CallError::ConcurrentCall )) => {}
		value => panic!( "Expected ConcurrentCall error, found: {:#?}", value ),
	};

}

#[test]
fn host_functions_may_call_other_plugins() {

	let mut context = fixtures::context();
	let echo = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new() ).unwrap();

	let mut registry = HostFunctionRegistry::new();
	registry.register_fn( "callback", [], [], move |_, _| {
		assert_eq!( echo.call( "echo", b"inner" )?, b"inner" );
		Ok( Vec::new() )
	});

	let plugin = context.create_plugin( &fixtures::manifest( fixtures::CALLBACK ), &registry ).unwrap();
	assert_eq!( plugin.call( "run", b"outer" ).unwrap(), b"outer" );

}
