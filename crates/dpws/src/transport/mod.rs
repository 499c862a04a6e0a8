// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport boundary.
//!
//! Wire encoding and socket I/O live behind the [`Transport`] trait. This
//! module holds the message model the core exchanges with it, the outbound
//! [`Dispatcher`], protocol version fan-out and the communication manager
//! table.

mod comm_manager;
mod dispatcher;
mod fanout;
mod interface;
mod message;

pub use comm_manager::{CommunicationManagerRegistry, TransportFactory};
pub use dispatcher::Dispatcher;
pub use fanout::{FaultAggregatingCallback, ProtocolVersionFanout};
pub use interface::{ResponseCallback, SecurityProvider, Transport};
pub use message::{Message, MessageBody, Response};
