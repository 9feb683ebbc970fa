//! Value types exchanged across the host/guest boundary.
//!
//! Host functions are declared in terms of [`ValueType`]s. Numeric types map
//! one to one onto WASM value types, while [`ValueType::Buffer`] is a pseudo-type
//! that lowers to two `i32` values: an offset into guest linear memory and a length.

use wasmtime::{ FuncType, Val, ValType };

use crate::memory::MemoryHandle ;



/// Type tag for a host function parameter or result.
#[derive( Copy, Clone, Eq, PartialEq, Hash, Debug )]
pub enum ValueType {
	I32,
	I64,
	F32,
	F64,
	/// A byte payload in guest memory, passed as `( offset: i32, length: i32 )`.
	Buffer,
}

impl ValueType {

	/// The WASM value types this type occupies in a function signature.
	pub fn lower( self ) -> &'static [WasmType] {
		match self {
			Self::I32 => &[ WasmType::I32 ],
			Self::I64 => &[ WasmType::I64 ],
			Self::F32 => &[ WasmType::F32 ],
			Self::F64 => &[ WasmType::F64 ],
			Self::Buffer => &[ WasmType::I32, WasmType::I32 ],
		}
	}

	/// Lowers a whole parameter or result list.
	pub fn lower_all( types: &[Self] ) -> Vec<WasmType> {
		types.iter().flat_map(| ty | ty.lower().iter().copied() ).collect()
	}

}

impl std::fmt::Display for ValueType {
	fn fmt( &self, f: &mut std::fmt::Formatter ) -> std::fmt::Result {
		match self {
			Self::I32 => write!( f, "i32" ),
			Self::I64 => write!( f, "i64" ),
			Self::F32 => write!( f, "f32" ),
			Self::F64 => write!( f, "f64" ),
			Self::Buffer => write!( f, "buffer" ),
		}
	}
}

/// A core WASM value type as seen in a module's import or export signatures.
///
/// Anything this crate cannot marshal (vectors, references) is reported as [`WasmType::Unsupported`]
/// so that signature checks fail with a readable description instead of being skipped.
#[derive( Copy, Clone, Eq, PartialEq, Hash, Debug )]
pub enum WasmType {
	I32,
	I64,
	F32,
	F64,
	Unsupported,
}

impl From<&ValType> for WasmType {
	fn from( ty: &ValType ) -> Self {
		match ty {
			ValType::I32 => Self::I32,
			ValType::I64 => Self::I64,
			ValType::F32 => Self::F32,
			ValType::F64 => Self::F64,
			_ => Self::Unsupported,
		}
	}
}

impl std::fmt::Display for WasmType {
	fn fmt( &self, f: &mut std::fmt::Formatter ) -> std::fmt::Result {
		match self {
			Self::I32 => write!( f, "i32" ),
			Self::I64 => write!( f, "i64" ),
			Self::F32 => write!( f, "f32" ),
			Self::F64 => write!( f, "f64" ),
			Self::Unsupported => write!( f, "<unsupported>" ),
		}
	}
}

/// Formats a lowered type list as `(i32, i64)`.
pub(crate) fn display_types( types: &[WasmType] ) -> String {
	format!( "({})", types.iter().map( ToString::to_string ).collect::<Vec<_>>().join( ", " ))
}

/// Parameter and result types of a wasmtime function type.
pub(crate) fn func_types( ty: &FuncType ) -> ( Vec<WasmType>, Vec<WasmType> ) {
	(
		ty.params().map(| ty | WasmType::from( &ty )).collect(),
		ty.results().map(| ty | WasmType::from( &ty )).collect(),
	)
}

/// Formats a function type as `(i32, i32) -> (i32)`.
pub(crate) fn describe_func( ty: &FuncType ) -> String {
	let ( params, results ) = func_types( ty );
	format!( "{} -> {}", display_types( &params ), display_types( &results ))
}

/// A value passed to or returned from a host function.
#[derive( Copy, Clone, PartialEq, Debug )]
pub enum Value {
	I32( i32 ),
	I64( i64 ),
	F32( f32 ),
	F64( f64 ),
	Buffer( MemoryHandle ),
}

impl Value {

	/// The type tag of this value.
	pub fn ty( &self ) -> ValueType {
		match self {
			Self::I32( _ ) => ValueType::I32,
			Self::I64( _ ) => ValueType::I64,
			Self::F32( _ ) => ValueType::F32,
			Self::F64( _ ) => ValueType::F64,
			Self::Buffer( _ ) => ValueType::Buffer,
		}
	}

	#[inline] pub fn as_i32( &self ) -> Option<i32> { match self { Self::I32( v ) => Some( *v ), _ => None }}
	#[inline] pub fn as_i64( &self ) -> Option<i64> { match self { Self::I64( v ) => Some( *v ), _ => None }}
	#[inline] pub fn as_f32( &self ) -> Option<f32> { match self { Self::F32( v ) => Some( *v ), _ => None }}
	#[inline] pub fn as_f64( &self ) -> Option<f64> { match self { Self::F64( v ) => Some( *v ), _ => None }}
	#[inline] pub fn as_buffer( &self ) -> Option<MemoryHandle> { match self { Self::Buffer( v ) => Some( *v ), _ => None }}

	/// Decodes guest values into host values according to `types`.
	///
	/// Returns `None` if `raw` does not have the lowered shape of `types`.
	pub(crate) fn lift_all( types: &[ValueType], raw: &[Val] ) -> Option<Vec<Value>> {
		let mut raw = raw.iter();
		let values = types.iter().map(| ty | Some( match ty {
			ValueType::I32 => Value::I32( raw.next()?.i32()? ),
			ValueType::I64 => Value::I64( raw.next()?.i64()? ),
			ValueType::F32 => Value::F32( raw.next()?.f32()? ),
			ValueType::F64 => Value::F64( raw.next()?.f64()? ),
			ValueType::Buffer => {
				let offset = raw.next()?.i32()?;
				let length = raw.next()?.i32()?;
				Value::Buffer( MemoryHandle::from_guest( offset, length ))
			}
		})).collect::<Option<Vec<_>>>()?;
		match raw.next() {
			Some( _ ) => None,
			Option::None => Some( values ),
		}
	}

	/// Encodes host values into `out`, which must already have the lowered length.
	///
	/// Returns `false` if the values do not match `types`.
	pub(crate) fn lower_into( types: &[ValueType], values: &[Value], out: &mut [Val] ) -> bool {
		if types.len() != values.len() { return false }
		let mut slots = out.iter_mut();
		for ( ty, value ) in types.iter().zip( values ) {
			if *ty != value.ty() { return false }
			let lowered: &[Val] = &match value {
				Value::I32( v ) => [ Val::I32( *v ), Val::I32( 0 )],
				Value::I64( v ) => [ Val::I64( *v ), Val::I32( 0 )],
				Value::F32( v ) => [ Val::F32( v.to_bits() ), Val::I32( 0 )],
				Value::F64( v ) => [ Val::F64( v.to_bits() ), Val::I32( 0 )],
				Value::Buffer( handle ) => [ Val::I32( handle.guest_offset() ), Val::I32( handle.guest_length() )],
			};
			let lowered = &lowered[ ..ty.lower().len() ];
			for val in lowered {
				match slots.next() {
					Some( slot ) => *slot = val.clone(),
					Option::None => return false,
				}
			}
		}
		slots.next().is_none()
	}

}

#[cfg( test )]
mod tests {
	use super::* ;

	#[test]
	fn buffer_lowers_to_two_i32() {
		assert_eq!( ValueType::lower_all( &[ ValueType::I64, ValueType::Buffer ]), vec![ WasmType::I64, WasmType::I32, WasmType::I32 ]);
	}

	#[test]
	fn lift_rejects_trailing_values() {
		let raw = [ Val::I32( 1 ), Val::I32( 2 )];
		assert!( Value::lift_all( &[ ValueType::I32 ], &raw ).is_none() );
		assert_eq!( Value::lift_all( &[ ValueType::Buffer ], &raw ), Some( vec![ Value::Buffer( MemoryHandle::new( 1, 2 ))]));
	}

	#[test]
	fn lower_checks_types() {
		let mut out = vec![ Val::I32( 0 ); 2 ];
		assert!( !Value::lower_into( &[ ValueType::Buffer ], &[ Value::I32( 4 )], &mut out ));
		assert!( Value::lower_into( &[ ValueType::Buffer ], &[ Value::Buffer( MemoryHandle::new( 8, 3 ))], &mut out ));
		assert!( matches!( out.as_slice(), [ Val::I32( 8 ), Val::I32( 3 )]));
	}
}
