pub use drawbridge_types::prelude::*;

// vim: ts=4
