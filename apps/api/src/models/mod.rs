pub mod block;
pub mod section;
