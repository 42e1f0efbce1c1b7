//! # Heron VM Core
//!
//! The host model the inline-cache engine specializes against:
//! - `Value` and its `ValueType` tags
//! - `Shape` (hidden classes) and `ObjectGroup` (structural type classes)
//! - `TypeSet`, the observed-type record of a site or property
//! - `JsObject` with plain, array, function and iterator classes
//! - `ops`, the canonical non-cached implementation of every IC operation

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod group;
pub mod object;
pub mod ops;
pub mod realm;
pub mod shape;
pub mod types;
pub mod value;

pub use error::{VmError, VmResult};
pub use group::{FieldRepr, GroupId, ObjectGroup};
pub use object::{JsObject, NativeFn, ObjectClass, ObjectId, ObjectRef, PropertyKey};
pub use realm::Realm;
pub use shape::{Shape, ShapeId};
pub use types::{ObjectKey, PrimitiveTypeSet, TYPE_SET_MAX_OBJECTS, TypeSet, ValueType};
pub use value::{MagicKind, Value, same_value};
