pub mod prices;
pub mod resolve;

#[cfg(test)]
pub(crate) mod support;
