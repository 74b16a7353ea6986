//! Text serialization of values and object graphs
//!
//! Objects implement [`NetworkObject`] and describe their fields with a
//! static table. Registered objects are written as `{id}` references and
//! resolved against the [`Registry`](crate::registry::Registry) on decode.

mod decoder;
mod encoder;
mod list;
mod object;
mod record;
mod value;

pub use decoder::{decode, unquote, Decoder, FetchPolicy, ParseError};
pub use encoder::{encode, Encoder};
pub use list::*;
pub use object::*;
pub use record::*;
pub(crate) use value::object_addr;
pub use value::{builtin_name, same_object, ObjectRef, Value, OBJECT_TYPE};
