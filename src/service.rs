// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// The (service, instance, event) triple that keys every subscription.

use crate::fixed_string::{FixedString, StringCapacityError};

/// Capacity of each identifier component in bytes.
pub const IDENTIFIER_CAPACITY: usize = 64;

type IdString = FixedString<IDENTIFIER_CAPACITY>;

/// Identifies one event stream. Equality is componentwise byte equality;
/// publishers and subscribers match when all three components match.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ServiceDescription {
    service: IdString,
    instance: IdString,
    event: IdString,
}

impl ServiceDescription {
    /// Build from the three identifier components. Each must fit in
    /// [`IDENTIFIER_CAPACITY`] bytes.
    pub fn new(service: &str, instance: &str, event: &str) -> Result<Self, StringCapacityError> {
        Ok(Self {
            service: IdString::try_from_str(service)?,
            instance: IdString::try_from_str(instance)?,
            event: IdString::try_from_str(event)?,
        })
    }

    pub fn service(&self) -> &str {
        self.service.as_str()
    }

    pub fn instance(&self) -> &str {
        self.instance.as_str()
    }

    pub fn event(&self) -> &str {
        self.event.as_str()
    }
}

impl std::fmt::Display for ServiceDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.service, self.instance, self.event)
    }
}
