//! Ownership boundary over a set of plugins.

use itertools::Itertools ;
use thiserror::Error ;
use wasmtime::Engine ;

use crate::manifest::Manifest ;
use crate::plugin::{ DestroyError, LoadError, Plugin, PluginId, PluginOptions };
use crate::registry::HostFunctionRegistry ;



/// Errors that can occur when closing a [`Context`].
#[derive( Error, Debug )]
pub enum ContextError {
	/// The context was already closed.
	#[error( "Context Closed" )] Closed,
	/// Some plugins reported errors while being destroyed. All of them were destroyed regardless.
	#[error( "Teardown Error: {} plugin(s) failed to destroy cleanly", .0.len() )]
	Teardown( Vec<( PluginId, DestroyError )> ),
}

/// Owns a wasmtime [`Engine`] and every plugin created through it.
///
/// Closing the context, explicitly with [`Context::close`] or implicitly on drop, destroys
/// each of its plugins exactly once. [`Plugin`] handles held elsewhere outlive the context
/// but fail with [`CallError::UseAfterFree`]( crate::CallError::UseAfterFree ) afterwards.
///
/// ```
/// use wasm_dock::{ Context, HostFunctionRegistry, Manifest, ModuleSource };
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ( plugin, teardown ) = Context::scope(| context | {
/// 	let module = ModuleSource::new( r#"(module (memory (export "memory") 1))"# );
/// 	context.create_plugin( &Manifest::from( module ), &HostFunctionRegistry::new() )
/// });
/// let plugin = plugin?;
/// teardown?;
/// assert!( plugin.call( "anything", b"" ).is_err() );
/// # Ok(())
/// # }
/// ```
pub struct Context {
	engine: Engine,
	plugins: Vec<Plugin>,
	next_id: u64,
	closed: bool,
}

impl std::fmt::Debug for Context {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "Context" )
			.field( "plugins", &self.plugins )
			.field( "next_id", &self.next_id )
			.field( "closed", &self.closed )
			.finish_non_exhaustive()
	}
}

impl Default for Context {
	fn default() -> Self { Self::new() }
}

impl Context {

	/// Creates a context with a default engine.
	pub fn new() -> Self { Self::with_engine( Engine::default() ) }

	/// Creates a context around your own engine.
	///
	/// This is how execution limits are configured: enable `consume_fuel` on the engine's
	/// config to honour [`Manifest::with_fuel`], and `epoch_interruption` to honour
	/// [`Manifest::with_epoch_deadline`].
	pub fn with_engine( engine: Engine ) -> Self {
		Self { engine, plugins: Vec::new(), next_id: 0, closed: false }
	}

	/// Runs `f` with a fresh context and closes it afterwards, even if `f` panics.
	///
	/// Returns `f`'s result together with the result of closing the context.
	pub fn scope<R>( f: impl FnOnce( &mut Self ) -> R ) -> ( R, Result<(), ContextError> ) {
		let mut context = Self::new();
		let result = f( &mut context );
		let teardown = context.close();
		( result, teardown )
	}

	#[inline] pub fn engine( &self ) -> &Engine { &self.engine }

	/// Plugins owned by this context, in creation order.
	#[inline] pub fn plugins( &self ) -> &[Plugin] { &self.plugins }

	/// The live plugin with this id, if this context owns one.
	pub fn plugin( &self, id: PluginId ) -> Option<&Plugin> {
		self.plugins.iter().find(| plugin | plugin.id() == id )
	}

	#[inline] pub fn len( &self ) -> usize { self.plugins.len() }

	#[inline] pub fn is_empty( &self ) -> bool { self.plugins.is_empty() }

	#[inline] pub fn is_closed( &self ) -> bool { self.closed }

	/// Loads a plugin from `manifest`, resolving its `env` imports against `registry`.
	///
	/// # Errors
	/// Returns [`LoadError::ContextClosed`] after [`Context::close`], or any error from
	/// verifying, compiling, linking or instantiating the modules. A failed load leaves
	/// the context unchanged.
	pub fn create_plugin( &mut self, manifest: &Manifest, registry: &HostFunctionRegistry ) -> Result<Plugin, LoadError> {
		self.create_plugin_with( manifest, registry, PluginOptions::default() )
	}

	/// Like [`Context::create_plugin`], with extra [`PluginOptions`].
	///
	/// # Errors
	/// See [`Context::create_plugin`].
	pub fn create_plugin_with(
		&mut self,
		manifest: &Manifest,
		registry: &HostFunctionRegistry,
		options: PluginOptions,
	) -> Result<Plugin, LoadError> {
		if self.closed { return Err( LoadError::ContextClosed ) }
		let id = PluginId( self.next_id );
		let plugin = Plugin::load( id, &self.engine, manifest, registry, options ).inspect_err(| err | {
			tracing::debug!( plugin = %id, "Failed to load plugin: {}", err );
		})?;
		self.next_id += 1 ;
		self.plugins.push( plugin.clone() );
		Ok( plugin )
	}

	/// Replaces the modules of plugin `id` with those of `manifest`.
	///
	/// The plugin keeps its id and every existing [`Plugin`] handle calls into the new modules.
	/// Its config comes from `manifest` and its variables start out empty. If loading fails,
	/// the plugin keeps running its previous modules.
	///
	/// # Errors
	/// - [`LoadError::ContextClosed`] after [`Context::close`]
	/// - [`LoadError::UnknownPlugin`] if this context owns no live plugin with that id
	/// - [`LoadError::PluginBusy`] if the plugin is executing a call
	/// - any error from loading `manifest`
	pub fn update_plugin( &mut self, id: PluginId, manifest: &Manifest, registry: &HostFunctionRegistry ) -> Result<(), LoadError> {
		if self.closed { return Err( LoadError::ContextClosed ) }
		self.plugin( id )
			.ok_or( LoadError::UnknownPlugin( id ))?
			.replace( &self.engine, manifest, registry )
			.inspect_err(| err | tracing::debug!( plugin = %id, "Failed to update plugin: {}", err ))
	}

	/// Destroys every plugin owned by this context.
	///
	/// All plugins are destroyed even if some of them fail to clean up; those failures are
	/// reported together. A plugin that is executing a call is reported as
	/// [`DestroyError::Busy`] and destroyed as soon as that call returns.
	///
	/// # Errors
	/// - [`ContextError::Closed`] if the context was already closed
	/// - [`ContextError::Teardown`] listing every plugin whose destruction reported an error
	pub fn close( &mut self ) -> Result<(), ContextError> {

		if self.closed { return Err( ContextError::Closed ) }
		self.closed = true ;

		let ( _, failures ): ( Vec<PluginId>, Vec<( PluginId, DestroyError )> ) = self.plugins
			.drain( .. )
			.map(| plugin | plugin.destroy().map(|()| plugin.id() ).map_err(| err | ( plugin.id(), err )))
			.partition_result();

		tracing::debug!( failures = failures.len(), "Closed context" );
		match failures.is_empty() {
			true => Ok(()),
			false => Err( ContextError::Teardown( failures )),
		}

	}

}

impl Drop for Context {
	fn drop( &mut self ) {
		if self.closed { return }
		if let Err( ContextError::Teardown( failures )) = self.close() {
			failures.iter().for_each(|( id, err )| tracing::warn!( plugin = %id, "Failed to destroy plugin: {}", err ));
		}
	}
}
