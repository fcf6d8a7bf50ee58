//! picoprog-core - serprog device core
//!
//! This crate turns a microcontroller's SPI bus into a serprog programmer.
//! It implements the device side of the Serial Flasher Protocol: a command
//! dispatcher that reads opcodes from a byte stream, drives the SPI bus and
//! up to four chip-select lines, and answers with byte-exact ACK/NAK framing.
//!
//! The crate is `no_std` and hardware agnostic. Boards plug in through three
//! boundaries:
//!
//! - [`transport::Transport`] - the host-facing byte stream (USB CDC, TCP, ...)
//! - [`bus::SpiController`] - the SPI peripheral
//! - [`cs::ChipSelectPin`] - one GPIO per chip-select line
//!
//! # Features
//!
//! - `std` - Enable standard library support (`std::error::Error` impls)
//! - `is_sync` - Compile the transport and dispatcher as blocking code
//!
//! # Example
//!
//! ```ignore
//! use picoprog_core::{bus::SpiBus, cs::ChipSelects, dispatch::Dispatcher};
//!
//! let bus = SpiBus::new(spi);
//! let cs = ChipSelects::new([cs0, cs1, cs2, cs3], delay);
//! let mut dispatcher = Dispatcher::new(link, bus, cs);
//! dispatcher.enable_bus();
//! let err = dispatcher.run().await.unwrap_err();
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
// Allow async fn in traits - we use maybe-async for dual sync/async support
#![allow(async_fn_in_trait)]

#[cfg(all(feature = "std", not(test)))]
extern crate std;

pub mod bus;
pub mod config;
pub mod cs;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod mock;

pub use dispatch::Dispatcher;
pub use error::{Error, Result};
