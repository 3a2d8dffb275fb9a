//! Department / process / file-type routing codes and the catalog that validates them.

mod catalog;
mod code;

pub use catalog::{
    DepartmentDefinition, FileTypeDefinition, Priority, ProcessDefinition, RoutingCatalog,
};
pub use code::{RoutingCode, RoutingCodeParseError, RoutingError};
