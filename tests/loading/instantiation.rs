use wasm_dock::{ Config, Context, Engine, HostFunctionRegistry, LoadError, Manifest, ModuleSource };
use crate::fixtures ;

#[test]
fn rejects_malformed_bytes() {
	let mut context = fixtures::context();
	let manifest = Manifest::from( ModuleSource::new( vec![ 0, 1, 2, 3 ]));
	match context.create_plugin( &manifest, &HostFunctionRegistry::new() ) {
		Err( LoadError::Instantiation( _ )) => {}
		value => panic!( "Expected Instantiation error, found: {:#?}", value ),
	}
}

#[test]
fn requires_exported_memory() {
	let mut context = fixtures::context();
	match context.create_plugin( &fixtures::manifest( fixtures::NO_MEMORY ), &HostFunctionRegistry::new() ) {
		Err( LoadError::Instantiation( err )) => assert!( err.to_string().contains( "memory" )),
		value => panic!( "Expected Instantiation error, found: {:#?}", value ),
	}
}

#[test]
fn trapping_start_function_fails_the_load() {
	let mut context = fixtures::context();
	let wat = r#"(module (memory (export "memory") 1) (func $start unreachable) (start $start))"#;
	match context.create_plugin( &fixtures::manifest( wat ), &HostFunctionRegistry::new() ) {
		Err( LoadError::Instantiation( _ )) => {}
		value => panic!( "Expected Instantiation error, found: {:#?}", value ),
	}
}

#[test]
fn empty_manifest_is_rejected() {
	let mut context = fixtures::context();
	match context.create_plugin( &Manifest::default(), &HostFunctionRegistry::new() ) {
		Err( LoadError::EmptyManifest ) => {}
		value => panic!( "Expected EmptyManifest error, found: {:#?}", value ),
	}
}

#[test]
fn fuel_requires_fuel_enabled_engine() {
	let mut context = fixtures::context();
	let manifest = fixtures::manifest( fixtures::ECHO ).with_fuel( 1_000 );
	match context.create_plugin( &manifest, &HostFunctionRegistry::new() ) {
		Err( LoadError::FuelUnavailable ) => {}
		value => panic!( "Expected FuelUnavailable error, found: {:#?}", value ),
	}

	let mut config = Config::new();
	config.consume_fuel( true );
	let mut context = Context::with_engine( Engine::new( &config ).unwrap() );
	assert!( context.create_plugin( &manifest, &HostFunctionRegistry::new() ).is_ok() );
}

#[test]
fn failed_loads_register_nothing() {

	let mut context = fixtures::context();
	let registry = HostFunctionRegistry::new();

	assert!( context.create_plugin( &fixtures::manifest( fixtures::NO_MEMORY ), &registry ).is_err() );
	assert!( context.create_plugin( &fixtures::manifest( fixtures::MISSING_IMPORT ), &registry ).is_err() );
	assert!( context.is_empty() );

	let first = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &registry ).unwrap();
	let second = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &registry ).unwrap();
	assert_eq!( context.len(), 2 );
	assert_ne!( first.id(), second.id() );
	assert!( first.id() < second.id() );

}
