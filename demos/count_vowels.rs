//! Loads a vowel counting plugin, calls it, and checks its answer against a host-side count.
//!
//! ```sh
//! cargo run --example count_vowels -- "some text" [path/to/count_vowels.wasm]
//! ```
//!
//! Without a path, a built-in guest is used. Any module exporting `count_vowels` with the
//! `( offset, length ) -> ( offset, length )` convention, returning `{"count": N}`, will do.

use wasm_dock::{ Context, HostFunctionRegistry, Manifest, MemoryConfig, ModuleSource };



const GUEST: &str = include_str!( "count_vowels.wat" );

fn count_vowels( data: &[u8] ) -> usize {
	data.iter().filter(| byte | b"AaEeIiOoUu".contains( *byte )).count()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {

	tracing_subscriber::fmt()
		.with_env_filter( tracing_subscriber::EnvFilter::from_default_env() )
		.init();

	let mut args = std::env::args().skip( 1 );
	let data = args.next().unwrap_or_else(|| "some data from python!".to_string() ).into_bytes();
	let source = match args.next() {
		Some( path ) => ModuleSource::from_file( path )?,
		None => ModuleSource::new( GUEST ),
	};

	let hash = source.hash();
	let manifest = Manifest::from( source.with_hash( hash ))
		.with_memory( MemoryConfig::with_max_pages( 5 ));

	let mut registry = HostFunctionRegistry::new();
	registry.register_fn( "testing_123", [], [], |_, _| {
		println!( "Hello from the host!" );
		Ok( Vec::new() )
	});

	let ( count, teardown ) = Context::scope(| context | -> Result<u64, Box<dyn std::error::Error>> {
		let plugin = context.create_plugin( &manifest, &registry )?;
		let output: serde_json::Value = serde_json::from_slice( &plugin.call( "count_vowels", &data )? )?;
		output[ "count" ].as_u64().ok_or_else(|| format!( "unexpected plugin output: {output}" ).into() )
	});
	teardown?;
	let count = count?;

	println!( "Number of vowels: {count}" );
	match count == count_vowels( &data ) as u64 {
		true => Ok(()),
		false => Err( format!( "plugin counted {count} vowels, the host counted {}", count_vowels( &data )).into() ),
	}

}
