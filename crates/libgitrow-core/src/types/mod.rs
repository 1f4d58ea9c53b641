pub mod ids;
pub mod pack;
pub mod refs;
