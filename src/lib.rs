pub mod error;
pub mod frame;
pub mod codec;
pub mod fragments;
pub mod header;
pub mod writer;
pub mod reader;

pub use error::{BakedError, FormatError, Result};
pub use codec::{Dict, TypeRegistry, Value};
pub use fragments::{FragmentTable, IndexEntry};
pub use header::{Header, EXTENSION, HASH_KEY};
pub use writer::{BakeOptions, BakedWriter};
pub use reader::{BakedReader, Module};
