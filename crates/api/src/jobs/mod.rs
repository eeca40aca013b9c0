pub(crate) mod enqueue;
pub(crate) mod models;
