//! Substrate of the slatefs storage engine.
//!
//! This crate contains the pieces the engine is built *against* rather than
//! the engine itself: the sector geometry and identity types, the contracts
//! of the two collaborator services every engine instance consumes (a block
//! device and a free-space allocator), two device implementations, and the
//! substrate error type.
//!
//! The engine crate never touches a device or free-space bookkeeping except
//! through the traits defined here, which is what lets it run over a
//! memory-mapped image in one place and a plain in-memory vector in another
//! without changing a line.

#![deny(missing_docs)]

//Device implementations and the controller over their backing storage
pub mod controller;
pub mod error;

//Basic modules for types
pub mod types;

//Contracts of the collaborator services
pub mod dev;
