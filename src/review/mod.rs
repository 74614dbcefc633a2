pub mod consensus;
pub mod cycle;
pub mod developer;
pub mod model;
pub mod parser;
pub mod source;
