pub mod extract;
pub mod load;
pub mod monitoring;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod retry;

#[cfg(test)]
pub(crate) mod fakes;
