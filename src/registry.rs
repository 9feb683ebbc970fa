//! Name to implementation table for host functions.

use std::collections::HashMap ;
use std::sync::Arc ;

use crate::host_function::{ HostFunction, HostFn, HostError };
use crate::memory::MemoryManager ;
use crate::value::{ Value, ValueType };



/// Host functions available to plugins, keyed by name.
///
/// Guests import these from the `env` namespace. Registering a name twice replaces the
/// earlier binding. A plugin only keeps the entries its module actually imports, and keeps
/// them for its whole lifetime; later changes to the registry don't affect loaded plugins.
///
/// Cloning is cheap, the functions themselves are shared.
#[derive( Clone, Default )]
pub struct HostFunctionRegistry {
	functions: HashMap<String, Arc<dyn HostFunction>>,
}

impl HostFunctionRegistry {

	pub fn new() -> Self { Self::default() }

	/// Adds a host function, replacing any previous one with the same name.
	pub fn register( &mut self, function: impl HostFunction + 'static ) -> &mut Self {
		self.register_shared( Arc::new( function ))
	}

	/// Adds an already shared host function, replacing any previous one with the same name.
	pub fn register_shared( &mut self, function: Arc<dyn HostFunction> ) -> &mut Self {
		let name = function.signature().name().to_string();
		if let Some( previous ) = self.functions.insert( name, function ) {
			tracing::debug!( "Host function {} replaced by a later registration", previous.signature() );
		}
		self
	}

	/// Registers a closure as a host function.
	pub fn register_fn(
		&mut self,
		name: impl Into<String>,
		params: impl IntoIterator<Item = ValueType>,
		results: impl IntoIterator<Item = ValueType>,
		closure: impl Fn( &mut MemoryManager<'_>, &[Value] ) -> Result<Vec<Value>, HostError> + Send + Sync + 'static,
	) -> &mut Self {
		self.register( HostFn::new( name, params, results, closure ))
	}

	pub fn get( &self, name: &str ) -> Option<&Arc<dyn HostFunction>> { self.functions.get( name ) }

	pub fn contains( &self, name: &str ) -> bool { self.functions.contains_key( name ) }

	pub fn len( &self ) -> usize { self.functions.len() }

	pub fn is_empty( &self ) -> bool { self.functions.is_empty() }

	pub fn names( &self ) -> impl Iterator<Item = &str> { self.functions.keys().map( String::as_str ) }

}

impl<F: HostFunction + 'static> FromIterator<F> for HostFunctionRegistry {
	fn from_iter<T: IntoIterator<Item = F>>( iter: T ) -> Self {
		let mut registry = Self::new();
		iter.into_iter().for_each(| function | { registry.register( function ); });
		registry
	}
}

impl std::fmt::Debug for HostFunctionRegistry {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_set().entries( self.functions.values().map(| function | function.signature().to_string() )).finish()
	}
}

#[cfg( test )]
mod tests {
	use super::* ;

	#[test]
	fn last_registration_wins() {
		let mut registry = HostFunctionRegistry::new();
		registry
			.register_fn( "answer", [], [ ValueType::I32 ], |_, _| Ok( vec![ Value::I32( 1 )]))
			.register_fn( "answer", [ ValueType::I64 ], [ ValueType::I64 ], |_, _| Ok( vec![ Value::I64( 2 )]));
		assert_eq!( registry.len(), 1 );
		let function = registry.get( "answer" ).unwrap();
		assert_eq!( function.signature().params(), &[ ValueType::I64 ]);
	}

	#[test]
	fn collects_from_iterator() {
		let registry = [ "a", "b" ].into_iter()
			.map(| name | HostFn::new( name, [], [], |_, _| Ok( Vec::new() )))
			.collect::<HostFunctionRegistry>();
		let mut names = registry.names().collect::<Vec<_>>();
		names.sort_unstable();
		assert_eq!( names, vec![ "a", "b" ]);
	}
}
