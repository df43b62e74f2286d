pub mod expand;
pub mod run;
pub mod validate;
