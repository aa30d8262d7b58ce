pub mod common;
pub mod datastream;
pub mod entity;
pub mod feature_of_interest;
pub mod filter;
pub mod historical_location;
pub mod location;
pub mod navigation;
pub mod observation;
pub mod observed_property;
pub mod query;
pub mod resolution;
pub mod response;
pub mod sensor;
pub mod thing;

pub use common::*;
pub use datastream::*;
pub use entity::*;
pub use feature_of_interest::*;
pub use filter::*;
pub use historical_location::*;
pub use location::*;
pub use navigation::*;
pub use observation::*;
pub use observed_property::*;
pub use query::*;
pub use resolution::*;
pub use response::*;
pub use sensor::*;
pub use thing::*;
