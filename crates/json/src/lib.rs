mod compare;
mod defer;
mod number;
mod ser;
pub mod text;
mod value;

pub use compare::{compare, equal, equal_by_keys, get_path};
pub use defer::{DeferredArray, DeferredIter, Provider, RangeProvider};
pub use number::Number;
pub use ser::ParseError;
pub use value::{ErrorValue, Field, Value};
