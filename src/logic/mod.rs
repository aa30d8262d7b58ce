pub mod assemble;
pub mod cancel;
pub mod filter_parser;
pub mod instance_filter;
pub mod path_resolver;
pub mod query_parser;
pub mod serialize;
pub mod service;
pub mod translate;

pub use assemble::*;
pub use cancel::*;
pub use filter_parser::*;
pub use instance_filter::*;
pub use path_resolver::*;
pub use query_parser::*;
pub use serialize::*;
pub use service::*;
pub use translate::*;
