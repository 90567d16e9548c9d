// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod parser;

pub use crate::protocol::parser::{
    Command, DeleteCommand, GetCommand, LineTooLong, MAX_LINE, ParseOutcome, Parser,
    StoreCommand, StoreKind, UnknownCommand,
};
