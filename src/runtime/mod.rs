// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// The client runtime: registration with the router, heartbeat upkeep, and
// the publisher/subscriber ports built on top of it.

mod client;
mod publisher;
mod subscriber;

pub use client::{Runtime, RuntimeError};
pub use publisher::{LoanedSample, Publisher};
pub use subscriber::{ReceivedSample, Subscriber};
