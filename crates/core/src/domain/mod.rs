pub mod order;
pub mod policy;
pub mod result;

#[cfg(test)]
pub(crate) mod fixtures;
