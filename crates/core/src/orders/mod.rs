pub mod catalog;
pub mod pricing;
pub mod render;

pub use catalog::{Catalog, QuantityError, ResolvedItems};
pub use pricing::MoneyFormat;
