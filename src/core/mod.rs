// Core modules implementing the numeral codec, enumeration, planning, digests and errors.
pub mod alphabet;
pub mod codec;
pub mod digest;
pub mod error;
pub mod keyspace;
pub mod plan;
pub(crate) mod wire;
