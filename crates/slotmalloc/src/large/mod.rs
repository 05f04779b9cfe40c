//! Support for page-granular mappings: groups with their own mapping and
//! direct allocations.

pub mod cache;
