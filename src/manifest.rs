//! Module configuration: the binaries to load and the limits to load them with.
//!
//! A [`Manifest`] can be built in code or parsed from JSON:
//!
//! ```json
//! {
//! 	"wasm": [{ "data": [0, 97, 115, 109, 1, 0, 0, 0], "hash": "..." }],
//! 	"memory": { "max": 5 },
//! 	"config": { "greeting": "hello" },
//! 	"fuel": 1000000,
//! 	"epoch_deadline": 10
//! }
//! ```
//!
//! Each `wasm` entry provides its module either inline (`data`, as a byte array or WAT text)
//! or as a filesystem `path`. The optional `hash` is the hex SHA-256 digest the bytes must
//! match. The entry named `main`, or the last entry if none is, is the module plugins call
//! into; every other entry must be named and can be imported from by that name.

use std::collections::BTreeMap ;
use std::path::PathBuf ;
use pipe_trait::Pipe ;
use serde::{ Deserialize, Serialize };
use sha2::{ Digest, Sha256 };

use crate::memory::PAGE_SIZE ;
use crate::plugin::LoadError ;



/// Name reserved for the module plugins call into.
pub const MAIN_MODULE: &str = "main" ;

/// A WASM binary (or WAT text) with an optional expected content hash.
#[derive( Clone, PartialEq, Eq )]
pub struct ModuleSource {
	bytes: Vec<u8>,
	hash: Option<String>,
	name: Option<String>,
}

impl ModuleSource {

	pub fn new( bytes: impl Into<Vec<u8>> ) -> Self {
		Self { bytes: bytes.into(), hash: None, name: None }
	}

	/// Reads a module from disk.
	///
	/// # Errors
	/// Returns [`LoadError::ManifestIo`] if the file can't be read.
	pub fn from_file( path: impl Into<PathBuf> ) -> Result<Self, LoadError> {
		let path = path.into();
		std::fs::read( &path )
			.map_err(| source | LoadError::ManifestIo { path, source })?
			.pipe( Self::new )
			.pipe( Ok )
	}

	/// Sets the expected hex SHA-256 digest. Case is ignored when comparing.
	pub fn with_hash( mut self, hash: impl Into<String> ) -> Self {
		self.hash = Some( hash.into() );
		self
	}

	/// Names the module so that other modules in the same manifest can import from it.
	pub fn with_name( mut self, name: impl Into<String> ) -> Self {
		self.name = Some( name.into() );
		self
	}

	#[inline] pub fn bytes( &self ) -> &[u8] { &self.bytes }

	#[inline] pub fn expected_hash( &self ) -> Option<&str> { self.hash.as_deref() }

	#[inline] pub fn name( &self ) -> Option<&str> { self.name.as_deref() }

	/// Hex SHA-256 digest of `bytes`, the format expected by [`ModuleSource::with_hash`].
	pub fn digest( bytes: &[u8] ) -> String {
		hex::encode( Sha256::digest( bytes ))
	}

	/// Hex SHA-256 digest of this module's bytes.
	pub fn hash( &self ) -> String { Self::digest( &self.bytes ) }

	/// Checks the bytes against the expected hash, if one was given.
	///
	/// # Errors
	/// Returns [`LoadError::Integrity`] on mismatch.
	pub fn verify( &self ) -> Result<(), LoadError> {
		let Some( expected ) = &self.hash else { return Ok(()) };
		let actual = self.hash();
		match expected.eq_ignore_ascii_case( &actual ) {
			true => Ok(()),
			false => Err( LoadError::Integrity { expected: expected.clone(), actual }),
		}
	}

}

impl std::fmt::Debug for ModuleSource {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "ModuleSource" )
			.field( "bytes", &format_args!( "<{} bytes>", self.bytes.len() ))
			.field( "hash", &self.hash )
			.field( "name", &self.name )
			.finish()
	}
}

/// Ceiling on guest linear memory growth.
#[derive( Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize )]
pub struct MemoryConfig {
	/// Maximum size in WASM pages (64 KiB). `None` leaves growth unbounded.
	#[serde( rename = "max", default, skip_serializing_if = "Option::is_none" )]
	max_pages: Option<u32>,
}

impl MemoryConfig {

	pub fn unlimited() -> Self { Self::default() }

	pub fn with_max_pages( pages: u32 ) -> Self { Self { max_pages: Some( pages )}}

	/// Ceiling in bytes, rounded down to whole pages.
	pub fn with_max_bytes( bytes: usize ) -> Self {
		Self { max_pages: Some( u32::try_from( bytes / PAGE_SIZE ).unwrap_or( u32::MAX ))}
	}

	#[inline] pub fn max_pages( &self ) -> Option<u32> { self.max_pages }

	/// Ceiling in bytes.
	pub fn max_bytes( &self ) -> Option<usize> {
		self.max_pages.map(| pages | ( pages as usize ).saturating_mul( PAGE_SIZE ))
	}

}

/// Everything needed to create a plugin.
#[derive( Clone, Debug, Default )]
pub struct Manifest {
	wasm: Vec<ModuleSource>,
	memory: MemoryConfig,
	config: BTreeMap<String, String>,
	fuel: Option<u64>,
	epoch_deadline: Option<u64>,
}

impl Manifest {

	pub fn new( wasm: impl IntoIterator<Item = ModuleSource> ) -> Self {
		Self { wasm: wasm.into_iter().collect(), ..Self::default() }
	}

	pub fn with_memory( mut self, memory: MemoryConfig ) -> Self {
		self.memory = memory ;
		self
	}

	/// Adds a config entry, readable by the guest through the kernel `config_get` function.
	pub fn with_config( mut self, key: impl Into<String>, value: impl Into<String> ) -> Self {
		self.config.insert( key.into(), value.into() );
		self
	}

	/// Sets the fuel budget granted to every call.
	///
	/// Only has an effect if the engine was configured with
	/// [`Config::consume_fuel`]( wasmtime::Config::consume_fuel ). Running out of fuel traps the guest.
	pub fn with_fuel( mut self, fuel: u64 ) -> Self {
		self.fuel = Some( fuel );
		self
	}

	/// Sets how many epoch ticks every call may run for before it traps.
	///
	/// Only has an effect if the engine was configured with
	/// [`Config::epoch_interruption`]( wasmtime::Config::epoch_interruption ). The host decides what
	/// a tick is by calling [`Engine::increment_epoch`]( wasmtime::Engine::increment_epoch ), typically
	/// from a timer thread, which turns the deadline into a wall-clock timeout.
	pub fn with_epoch_deadline( mut self, ticks: u64 ) -> Self {
		self.epoch_deadline = Some( ticks );
		self
	}

	#[inline] pub fn wasm( &self ) -> &[ModuleSource] { &self.wasm }

	#[inline] pub fn memory( &self ) -> MemoryConfig { self.memory }

	#[inline] pub fn config( &self ) -> &BTreeMap<String, String> { &self.config }

	#[inline] pub fn fuel( &self ) -> Option<u64> { self.fuel }

	#[inline] pub fn epoch_deadline( &self ) -> Option<u64> { self.epoch_deadline }

	/// Parses a JSON manifest, reading any `path` sources from disk.
	///
	/// # Errors
	/// Returns [`LoadError::InvalidManifest`] for malformed JSON, [`LoadError::MissingSource`]
	/// for an entry with neither `data` nor `path`, and [`LoadError::ManifestIo`] for unreadable
	/// module files.
	pub fn from_json( json: impl AsRef<[u8]> ) -> Result<Self, LoadError> {
		let raw: RawManifest = serde_json::from_slice( json.as_ref() ).map_err( LoadError::InvalidManifest )?;
		let wasm = raw.wasm.into_iter().enumerate().map(|( index, source )| {
			let module = match ( source.data, source.path ) {
				( Some( RawData::Bytes( bytes )), _ ) => ModuleSource::new( bytes ),
				( Some( RawData::Text( text )), _ ) => ModuleSource::new( text ),
				( Option::None, Some( path )) => ModuleSource::from_file( path )?,
				( Option::None, Option::None ) => return Err( LoadError::MissingSource( index )),
			};
			let module = match source.hash { Some( hash ) => module.with_hash( hash ), None => module };
			Ok( match source.name { Some( name ) => module.with_name( name ), None => module })
		}).collect::<Result<Vec<_>, LoadError>>()?;
		Ok( Self { wasm, memory: raw.memory, config: raw.config, fuel: raw.fuel, epoch_deadline: raw.epoch_deadline })
	}

	/// Splits the sources into the main module and the named auxiliary modules.
	pub(crate) fn split_main( &self ) -> Result<( &ModuleSource, Vec<( &str, &ModuleSource )> ), LoadError> {

		let main_index = self.wasm.iter()
			.position(| source | source.name() == Some( MAIN_MODULE ))
			.or_else(|| self.wasm.len().checked_sub( 1 ))
			.ok_or( LoadError::EmptyManifest )?;

		let auxiliary = self.wasm.iter().enumerate()
			.filter(|( index, _ )| *index != main_index )
			.map(|( index, source )| match source.name() {
				Some( name ) => Ok(( name, source )),
				None => Err( LoadError::UnnamedModule( index )),
			})
			.collect::<Result<Vec<_>, _>>()?;

		Ok(( &self.wasm[ main_index ], auxiliary ))

	}

}

impl From<ModuleSource> for Manifest {
	fn from( source: ModuleSource ) -> Self { Self::new([ source ]) }
}

#[derive( Deserialize )]
struct RawManifest {
	#[serde( default )]
	wasm: Vec<RawSource>,
	#[serde( default )]
	memory: MemoryConfig,
	#[serde( default )]
	config: BTreeMap<String, String>,
	#[serde( default )]
	fuel: Option<u64>,
	#[serde( default )]
	epoch_deadline: Option<u64>,
}

#[derive( Deserialize )]
struct RawSource {
	data: Option<RawData>,
	path: Option<PathBuf>,
	hash: Option<String>,
	name: Option<String>,
}

#[derive( Deserialize )]
#[serde( untagged )]
enum RawData {
	Bytes( Vec<u8> ),
	Text( String ),
}

#[cfg( test )]
mod tests {
	use super::* ;

	#[test]
	fn digest_is_hex_sha256() {
		assert_eq!(
			ModuleSource::digest( b"" ),
			"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
		);
	}

	#[test]
	fn verify_ignores_case() {
		let source = ModuleSource::new( b"(module)".to_vec() );
		let hash = source.hash().to_uppercase();
		assert!( source.with_hash( hash ).verify().is_ok() );
	}

	#[test]
	fn verify_rejects_wrong_hash() {
		let source = ModuleSource::new( b"(module)".to_vec() ).with_hash( "00" );
		match source.verify() {
			Err( LoadError::Integrity { expected, .. }) => assert_eq!( expected, "00" ),
			other => panic!( "Expected Integrity error, found: {:?}", other ),
		}
	}

	#[test]
	fn memory_config_rounds_bytes_down() {
		assert_eq!( MemoryConfig::with_max_bytes( 3 * PAGE_SIZE + 1 ).max_pages(), Some( 3 ));
		assert_eq!( MemoryConfig::with_max_pages( 2 ).max_bytes(), Some( 2 * PAGE_SIZE ));
		assert_eq!( MemoryConfig::unlimited().max_bytes(), None );
	}

	#[test]
	fn parses_json_manifest() {
		let manifest = Manifest::from_json( r#"{
			"wasm": [
				{ "data": [1, 2, 3], "name": "helpers" },
				{ "data": "(module)", "hash": "abc" }
			],
			"memory": { "max": 5 },
			"config": { "key": "value" }
		}"# ).unwrap();
		assert_eq!( manifest.wasm().len(), 2 );
		assert_eq!( manifest.wasm()[ 0 ].bytes(), &[ 1u8, 2, 3 ]);
		assert_eq!( manifest.wasm()[ 1 ].bytes(), b"(module)" );
		assert_eq!( manifest.wasm()[ 1 ].expected_hash(), Some( "abc" ));
		assert_eq!( manifest.memory().max_pages(), Some( 5 ));
		assert_eq!( manifest.config().get( "key" ).map( String::as_str ), Some( "value" ));

		let ( main, auxiliary ) = manifest.split_main().unwrap();
		assert_eq!( main.bytes(), b"(module)" );
		assert_eq!( auxiliary.len(), 1 );
		assert_eq!( auxiliary[ 0 ].0, "helpers" );
	}

	#[test]
	fn main_module_can_be_named() {
		let manifest = Manifest::new([
			ModuleSource::new( b"a".to_vec() ).with_name( MAIN_MODULE ),
			ModuleSource::new( b"b".to_vec() ).with_name( "other" ),
		]);
		let ( main, _ ) = manifest.split_main().unwrap();
		assert_eq!( main.bytes(), b"a" );
	}

	#[test]
	fn rejects_empty_and_unnamed() {
		assert!( matches!( Manifest::default().split_main(), Err( LoadError::EmptyManifest )));
		let manifest = Manifest::new([ ModuleSource::new( b"a".to_vec() ), ModuleSource::new( b"b".to_vec() )]);
		assert!( matches!( manifest.split_main(), Err( LoadError::UnnamedModule( 0 ))));
	}

	#[test]
	fn invalid_json_is_reported() {
		assert!( matches!( Manifest::from_json( "{ not json" ), Err( LoadError::InvalidManifest( _ ))));
	}

	#[test]
	fn entries_without_a_source_are_rejected() {
		let json = r#"{ "wasm": [{ "data": "(module)", "name": "helpers" }, { "hash": "abc" }] }"#;
		assert!( matches!( Manifest::from_json( json ), Err( LoadError::MissingSource( 1 ))));
	}

	#[test]
	fn parses_limits() {
		let manifest = Manifest::from_json( r#"{ "wasm": [{ "data": "(module)" }], "fuel": 10, "epoch_deadline": 3 }"# ).unwrap();
		assert_eq!( manifest.fuel(), Some( 10 ));
		assert_eq!( manifest.epoch_deadline(), Some( 3 ));
	}
}
