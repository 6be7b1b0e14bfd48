pub mod hook;
pub mod validate;
