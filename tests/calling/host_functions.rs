use std::sync::Arc ;
use std::sync::atomic::{ AtomicUsize, Ordering };
use wasm_dock::{ CallError, HostError, HostFn, HostFunctionRegistry, PluginStatus, Value, ValueType };
use crate::fixtures ;

fn reverse() -> HostFn {
	HostFn::new( "reverse", [ ValueType::Buffer ], [ ValueType::Buffer ], | memory, args | {
		let handle = args[ 0 ].as_buffer().ok_or( HostError::Failed( "expected a buffer".into() ))?;
		let mut bytes = memory.read_handle( handle )?;
		bytes.reverse();
		Ok( vec![ Value::Buffer( memory.allocate_bytes( &bytes )? )])
	})
}

#[test]
fn buffers_cross_in_both_directions() {
	let mut context = fixtures::context();
	let registry = [ reverse() ].into_iter().collect::<HostFunctionRegistry>();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::REVERSE ), &registry ).unwrap();
	assert_eq!( plugin.call( "reverse", b"stressed" ).unwrap(), b"desserts" );
	assert_eq!( plugin.call( "reverse", b"" ).unwrap(), b"" );
}

#[test]
fn numeric_arguments_and_results() {
	let mut context = fixtures::context();
	let mut registry = HostFunctionRegistry::new();
	registry.register_fn( "double", [ ValueType::I64 ], [ ValueType::I64 ], |_, args | {
		Ok( vec![ Value::I64( args[ 0 ].as_i64().unwrap_or_default() * 2 )])
	});
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::DOUBLE ), &registry ).unwrap();
	assert_eq!( plugin.call( "double", b"" ).unwrap(), 14i64.to_le_bytes() );
}

#[test]
fn last_registration_wins() {

	let mut context = fixtures::context();
	let mut registry = HostFunctionRegistry::new();
	registry
		.register_fn( "double", [ ValueType::I64 ], [ ValueType::I64 ], |_, _| Ok( vec![ Value::I64( 0 )]))
		.register_fn( "double", [ ValueType::I64 ], [ ValueType::I64 ], |_, _| Ok( vec![ Value::I64( 99 )]));

	let plugin = context.create_plugin( &fixtures::manifest( fixtures::DOUBLE ), &registry ).unwrap();
	assert_eq!( plugin.call( "double", b"" ).unwrap(), 99i64.to_le_bytes() );

}

#[test]
fn later_registry_changes_do_not_affect_loaded_plugins() {

	let mut context = fixtures::context();
	let mut registry = HostFunctionRegistry::new();
	registry.register_fn( "double", [ ValueType::I64 ], [ ValueType::I64 ], |_, _| Ok( vec![ Value::I64( 1 )]));
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::DOUBLE ), &registry ).unwrap();

	registry.register_fn( "double", [ ValueType::I64 ], [ ValueType::I64 ], |_, _| Ok( vec![ Value::I64( 2 )]));
	assert_eq!( plugin.call( "double", b"" ).unwrap(), 1i64.to_le_bytes() );

}

#[test]
fn host_errors_trap_the_guest() {

	let mut context = fixtures::context();
	let calls = Arc::new( AtomicUsize::new( 0 ));
	let counter = Arc::clone( &calls );
	let mut registry = HostFunctionRegistry::new();
	registry.register_fn( "callback", [], [], move |_, _| {
		counter.fetch_add( 1, Ordering::SeqCst );
		Err( HostError::Failed( "host refused".into() ))
	});

	let plugin = context.create_plugin( &fixtures::manifest( fixtures::CALLBACK ), &registry ).unwrap();
	match plugin.call( "run", b"" ) {
		Err( CallError::GuestTrap( _ )) => {}
		value => panic!( "Expected GuestTrap error, found: {:#?}", value ),
	}
	assert_eq!( calls.load( Ordering::SeqCst ), 1 );
	assert_eq!( plugin.status(), PluginStatus::Destroyed );

}

#[test]
fn wrong_results_trap_the_guest() {

	let mut context = fixtures::context();
	let mut registry = HostFunctionRegistry::new();
	registry.register_fn( "double", [ ValueType::I64 ], [ ValueType::I64 ], |_, _| Ok( vec![ Value::I32( 1 )]));

	let plugin = context.create_plugin( &fixtures::manifest( fixtures::DOUBLE ), &registry ).unwrap();
	match plugin.call( "double", b"" ) {
		Err( CallError::GuestTrap( err )) => assert!( format!( "{err:?}" ).contains( "Invalid Results" )),
		value => panic!( "Expected GuestTrap error, found: {:#?}", value ),
	}

}
