use std::sync::Arc ;
use std::sync::atomic::{ AtomicUsize, Ordering };
use wasm_dock::{ CallError, DestroyError, HostFunctionRegistry, PluginOptions, PluginStatus };
use crate::fixtures ;

#[test]
fn calls_after_destroy_fail() {

	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new() ).unwrap();

	plugin.destroy().unwrap();
	assert_eq!( plugin.status(), PluginStatus::Destroyed );
	match plugin.call( "echo", b"" ) {
		Err( CallError::UseAfterFree ) => {}
		value => panic!( "Expected UseAfterFree error, found: {:#?}", value ),
	}
	assert!( matches!( plugin.function_exists( "echo" ), Err( CallError::UseAfterFree )));

	// Second destroy is a no-op.
	assert!( plugin.destroy().is_ok() );

}

#[test]
fn clones_share_the_instance() {
	let mut context = fixtures::context();
	let plugin = context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new() ).unwrap();
	let clone = plugin.clone();
	clone.destroy().unwrap();
	assert_eq!( plugin.status(), PluginStatus::Destroyed );
}

#[test]
fn destroy_hook_runs_once() {

	let mut context = fixtures::context();
	let runs = Arc::new( AtomicUsize::new( 0 ));
	let counter = Arc::clone( &runs );
	let options = PluginOptions::new().on_destroy( move |_| {
		counter.fetch_add( 1, Ordering::SeqCst );
		Ok(())
	});
	let plugin = context.create_plugin_with( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new(), options ).unwrap();

	plugin.destroy().unwrap();
	plugin.destroy().unwrap();
	context.close().unwrap();
	assert_eq!( runs.load( Ordering::SeqCst ), 1 );

}

#[test]
fn failing_hook_still_destroys() {

	let mut context = fixtures::context();
	let options = PluginOptions::new().on_destroy(|_| Err( "cleanup failed".into() ));
	let plugin = context.create_plugin_with( &fixtures::manifest( fixtures::ECHO ), &HostFunctionRegistry::new(), options ).unwrap();

	match plugin.destroy() {
		Err( DestroyError::Hook( err )) => assert_eq!( err.to_string(), "cleanup failed" ),
		value => panic!( "Expected Hook error, found: {:#?}", value ),
	}
	assert_eq!( plugin.status(), PluginStatus::Destroyed );
	assert!( plugin.destroy().is_ok() );

}

#[test]
fn hook_receives_plugin_id() {

	let mut context = fixtures::context();
	let seen = Arc::new( AtomicUsize::new( usize::MAX ));
	let sink = Arc::clone( &seen );
	let options = PluginOptions::new().on_destroy( move | id | {
		sink.store( id.get() as usize, Ordering::SeqCst );
		Ok(())
	});

	let registry = HostFunctionRegistry::new();
	context.create_plugin( &fixtures::manifest( fixtures::ECHO ), &registry ).unwrap();
	let plugin = context.create_plugin_with( &fixtures::manifest( fixtures::ECHO ), &registry, options ).unwrap();
	plugin.destroy().unwrap();
	assert_eq!( seen.load( Ordering::SeqCst ) as u64, plugin.id().get() );

}

#[test]
fn destroy_during_call_is_deferred() {

	let mut context = fixtures::context();
	let target = Arc::new( once_cell::sync::OnceCell::<wasm_dock::Plugin>::new() );
	let plugin_ref = Arc::clone( &target );
	let mut registry = HostFunctionRegistry::new();
	registry.register_fn( "callback", [], [], move |_, _| {
		if let Some( plugin ) = plugin_ref.get() {
			assert!( matches!( plugin.destroy(), Err( DestroyError::Busy )));
			assert!( matches!( plugin.function_exists( "run" ), Err( CallError::UseAfterFree )));
		}
		Ok( Vec::new() )
	});

	let runs = Arc::new( AtomicUsize::new( 0 ));
	let counter = Arc::clone( &runs );
	let options = PluginOptions::new().on_destroy( move |_| {
		counter.fetch_add( 1, Ordering::SeqCst );
		Ok(())
	});
	let plugin = context.create_plugin_with( &fixtures::manifest( fixtures::CALLBACK ), &registry, options ).unwrap();
	target.set( plugin.clone() ).unwrap();

	// The call that requested it still completes, then the plugin is gone.
	assert_eq!( plugin.call( "run", b"ok" ).unwrap(), b"ok" );
	assert_eq!( plugin.status(), PluginStatus::Destroyed );
	assert_eq!( runs.load( Ordering::SeqCst ), 1 );
	assert!( matches!( plugin.call( "run", b"again" ), Err( CallError::UseAfterFree )));

}
