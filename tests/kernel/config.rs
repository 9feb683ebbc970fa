use std::collections::BTreeMap ;
use wasm_dock::{ CallError, HostFunctionRegistry };
use crate::fixtures ;

#[test]
fn guest_reads_manifest_config() {

	let mut context = fixtures::context();
	let manifest = fixtures::manifest( fixtures::CONFIG )
		.with_config( "greeting", "hello" )
		.with_config( "thing", "world" );
	let plugin = context.create_plugin( &manifest, &HostFunctionRegistry::new() ).unwrap();

	assert_eq!( plugin.call( "config", b"greeting" ).unwrap(), b"hello" );
	assert_eq!( plugin.call( "config", b"thing" ).unwrap(), b"world" );
	assert_eq!( plugin.call( "config", b"missing" ).unwrap(), b"" );

}

#[test]
fn config_updates_are_merged() {

	let mut context = fixtures::context();
	let manifest = fixtures::manifest( fixtures::CONFIG )
		.with_config( "greeting", "hello" )
		.with_config( "thing", "world" );
	let plugin = context.create_plugin( &manifest, &HostFunctionRegistry::new() ).unwrap();

	plugin.update_config( BTreeMap::from([
		( "greeting".to_string(), Some( "hi".to_string() )),
		( "extra".to_string(), Some( "added".to_string() )),
	])).unwrap();
	assert_eq!( plugin.call( "config", b"greeting" ).unwrap(), b"hi" );
	assert_eq!( plugin.call( "config", b"extra" ).unwrap(), b"added" );
	assert_eq!( plugin.call( "config", b"thing" ).unwrap(), b"world" );

	plugin.update_config( BTreeMap::from([( "thing".to_string(), None )])).unwrap();
	assert_eq!( plugin.call( "config", b"thing" ).unwrap(), b"" );
	assert_eq!( plugin.call( "config", b"greeting" ).unwrap(), b"hi" );

	plugin.destroy().unwrap();
	assert!( matches!( plugin.update_config( BTreeMap::new() ), Err( CallError::UseAfterFree )));

}
