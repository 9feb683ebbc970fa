use std::collections::{ HashMap, HashSet };
use std::sync::Arc ;
use wasmtime::{ AsContextMut, Caller, Engine, ExternType, FuncType, Linker, Module, Val };

use crate::host_function::{ HostError, HostFunction };
use crate::memory::MemoryManager ;
use crate::plugin::LoadError ;
use crate::plugin_instance::PluginData ;
use crate::registry::HostFunctionRegistry ;
use crate::value::{ describe_func, display_types, func_types, Value };



/// Import namespace of user-registered host functions.
pub const HOST_MODULE: &str = "env" ;

/// Import namespace of the built-in kernel functions.
pub const KERNEL_MODULE: &str = "wasm_dock" ;

/// Resolves a plugin's imports against the host function registry, the kernel
/// and the auxiliary modules instantiated before it.
///
/// Every `( namespace, name )` pair is defined on the linker at most once, so that
/// modules sharing an import can be linked one after another.
pub(crate) struct ImportResolver<'a> {
	linker: Linker<PluginData>,
	registry: &'a HostFunctionRegistry,
	kernel: HostFunctionRegistry,
	defined: HashSet<( String, String )>,
	/// Exports of the auxiliary modules, by module name.
	modules: HashMap<String, HashMap<String, ExternType>>,
}

impl<'a> ImportResolver<'a> {

	pub(crate) fn new( engine: &Engine, registry: &'a HostFunctionRegistry ) -> Self {
		Self {
			linker: Linker::new( engine ),
			registry,
			kernel: crate::kernel::registry(),
			defined: HashSet::new(),
			modules: HashMap::new(),
		}
	}

	#[inline] pub(crate) fn linker( &self ) -> &Linker<PluginData> { &self.linker }

	#[inline] pub(crate) fn linker_mut( &mut self ) -> &mut Linker<PluginData> { &mut self.linker }

	/// Marks `name` as a namespace provided by an already instantiated `module`.
	pub(crate) fn add_module( &mut self, name: &str, module: &Module ) {
		let exports = module.exports()
			.map(| export | ( export.name().to_string(), export.ty() ))
			.collect();
		self.modules.insert( name.to_string(), exports );
	}

	/// Defines every host import of `module` on the linker.
	///
	/// # Errors
	/// - [`LoadError::MissingImport`] if an import is neither a registered host function,
	///   a kernel function, nor exported by an auxiliary module
	/// - [`LoadError::SignatureMismatch`] if the import's type differs from the declared
	///   signature or from the type of the auxiliary export
	pub(crate) fn resolve( &mut self, module: &Module ) -> Result<(), LoadError> {

		for import in module.imports() {

			let namespace = import.module();
			let name = import.name();
			let missing = || LoadError::MissingImport { module: namespace.to_string(), name: name.to_string() };

			// Auxiliary instances are already on the linker, only their types are checked here.
			if let Some( exports ) = self.modules.get( namespace ) {
				let export = exports.get( name ).ok_or_else( missing )?;
				check_export( namespace, name, export, &import.ty() )?;
				continue
			}

			let ExternType::Func( ty ) = import.ty() else { return Err( missing() ) };

			let function = match namespace {
				HOST_MODULE => self.registry.get( name ),
				KERNEL_MODULE => self.kernel.get( name ),
				_ => None,
			}.ok_or_else( missing )?;

			let ( found_params, found_results ) = func_types( &ty );
			let expected_params = function.signature().lowered_params();
			let expected_results = function.signature().lowered_results();
			if found_params != expected_params || found_results != expected_results {
				return Err( LoadError::SignatureMismatch {
					module: namespace.to_string(),
					name: name.to_string(),
					expected: format!( "{} -> {}", display_types( &expected_params ), display_types( &expected_results )),
					found: format!( "{} -> {}", display_types( &found_params ), display_types( &found_results )),
				});
			}

			if self.defined.insert(( namespace.to_string(), name.to_string() )) {
				tracing::trace!( "Linking {}::{}", namespace, function.signature() );
				define( &mut self.linker, namespace, name, ty, Arc::clone( function ))?;
			}

		}

		Ok(())

	}

}

fn check_export( namespace: &str, name: &str, export: &ExternType, import: &ExternType ) -> Result<(), LoadError> {
	let mismatch = | expected: String, found: String | LoadError::SignatureMismatch {
		module: namespace.to_string(),
		name: name.to_string(),
		expected,
		found,
	};
	match ( export, import ) {
		( ExternType::Func( export ), ExternType::Func( import )) => match func_types( export ) == func_types( import ) {
			true => Ok(()),
			false => Err( mismatch( describe_func( export ), describe_func( import ))),
		},
		// Limits of same-kind memories, tables and globals are left to the linker.
		( ExternType::Memory( _ ), ExternType::Memory( _ ))
			| ( ExternType::Table( _ ), ExternType::Table( _ ))
			| ( ExternType::Global( _ ), ExternType::Global( _ )) => Ok(()),
		( export, import ) => Err( mismatch( kind( export ).to_string(), kind( import ).to_string() )),
	}
}

fn kind( ty: &ExternType ) -> &'static str {
	match ty {
		ExternType::Func( _ ) => "function",
		ExternType::Global( _ ) => "global",
		ExternType::Table( _ ) => "table",
		ExternType::Memory( _ ) => "memory",
		_ => "extern",
	}
}

fn define(
	linker: &mut Linker<PluginData>,
	namespace: &str,
	name: &str,
	ty: FuncType,
	function: Arc<dyn HostFunction>,
) -> Result<(), LoadError> {
	linker.func_new( namespace, name, ty, move | mut caller: Caller<'_, PluginData>, params: &[Val], results: &mut [Val] | {

		let signature = function.signature();
		let args = Value::lift_all( signature.params(), params )
			.ok_or_else(|| wasmtime::Error::msg( format!( "Arguments to {signature} don't match its parameters" )))?;

		let mut memory = MemoryManager::new( caller.as_context_mut() );
		let values = function.invoke( &mut memory, &args ).map_err(| err | {
			tracing::debug!( "Host function {} failed: {}", signature.name(), err );
			wasmtime::Error::new( err )
		})?;

		match Value::lower_into( signature.results(), &values, results ) {
			true => Ok(()),
			false => Err( wasmtime::Error::new( HostError::InvalidResults {
				name: signature.name().to_string(),
				expected: signature.results().iter().map( ToString::to_string ).collect::<Vec<_>>().join( ", " ),
			})),
		}

	}).map_err( LoadError::Instantiation )?;
	Ok(())
}
