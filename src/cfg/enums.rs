// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Command execution placement.
///
/// `Single` runs every command inline on the reactor thread; `Pooled`
/// offloads completed commands to the worker pool and commits replies back
/// through the reactor waker.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threading {
    #[serde(rename = "single", alias = "Single", alias = "SINGLE", alias = "st")]
    Single,
    #[serde(rename = "pooled", alias = "Pooled", alias = "POOLED", alias = "mt")]
    Pooled,
}

impl fmt::Display for Threading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Threading::Single => "single",
            Threading::Pooled => "pooled",
        })
    }
}
