// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use memcache_server_rs::{
    execute::Execute,
    protocol::{Command, ParseOutcome, Parser},
    storage::Storage,
};

/// Parse a single header line and hand back the descriptor.
fn command(line: &[u8]) -> Command {
    match Parser::new().parse(line).expect("line fits") {
        ParseOutcome::Complete { command, .. } => command,
        ParseOutcome::Incomplete => panic!("test line {line:?} is incomplete"),
    }
}

fn run(storage: &Storage, line: &[u8], body: &[u8]) -> Option<Bytes> {
    command(line).execute(storage, body)
}

#[test]
fn set_stores_and_get_renders_value() {
    let storage = Storage::new(1024);
    assert_eq!(
        run(&storage, b"set foo 0 0 3\r\n", b"bar\r\n"),
        Some(Bytes::from_static(b"STORED\r\n"))
    );
    assert_eq!(
        run(&storage, b"get foo\r\n", b""),
        Some(Bytes::from_static(b"VALUE foo 0 3\r\nbar\r\nEND\r\n"))
    );
}

#[test]
fn add_rejects_existing_key() {
    let storage = Storage::new(1024);
    assert_eq!(
        run(&storage, b"add foo 0 0 3\r\n", b"bar\r\n"),
        Some(Bytes::from_static(b"STORED\r\n"))
    );
    assert_eq!(
        run(&storage, b"add foo 0 0 1\r\n", b"q\r\n"),
        Some(Bytes::from_static(b"NOT_STORED\r\n"))
    );
    // The original value survives.
    assert_eq!(storage.get(b"foo"), Some(Bytes::from_static(b"bar")));
}

#[test]
fn replace_requires_presence() {
    let storage = Storage::new(1024);
    assert_eq!(
        run(&storage, b"replace foo 0 0 3\r\n", b"bar\r\n"),
        Some(Bytes::from_static(b"NOT_STORED\r\n"))
    );
    storage.put(b"foo", b"old");
    assert_eq!(
        run(&storage, b"replace foo 0 0 3\r\n", b"new\r\n"),
        Some(Bytes::from_static(b"STORED\r\n"))
    );
    assert_eq!(storage.get(b"foo"), Some(Bytes::from_static(b"new")));
}

#[test]
fn append_and_prepend_concatenate() {
    let storage = Storage::new(1024);
    storage.put(b"k", b"mid");
    assert_eq!(
        run(&storage, b"append k 0 0 4\r\n", b"-end\r\n"),
        Some(Bytes::from_static(b"STORED\r\n"))
    );
    assert_eq!(
        run(&storage, b"prepend k 0 0 6\r\n", b"start-\r\n"),
        Some(Bytes::from_static(b"STORED\r\n"))
    );
    assert_eq!(
        storage.get(b"k"),
        Some(Bytes::from_static(b"start-mid-end"))
    );
    // Appending to a missing key is a negative outcome, not an error.
    assert_eq!(
        run(&storage, b"append nope 0 0 1\r\n", b"x\r\n"),
        Some(Bytes::from_static(b"NOT_STORED\r\n"))
    );
}

#[test]
fn delete_reports_presence() {
    let storage = Storage::new(1024);
    storage.put(b"foo", b"bar");
    assert_eq!(
        run(&storage, b"delete foo\r\n", b""),
        Some(Bytes::from_static(b"DELETED\r\n"))
    );
    assert_eq!(
        run(&storage, b"delete foo\r\n", b""),
        Some(Bytes::from_static(b"NOT_FOUND\r\n"))
    );
}

#[test]
fn multi_key_get_emits_hits_only() {
    let storage = Storage::new(1024);
    storage.put(b"y", b"val");
    assert_eq!(
        run(&storage, b"get x y z\r\n", b""),
        Some(Bytes::from_static(b"VALUE y 0 3\r\nval\r\nEND\r\n"))
    );
    assert_eq!(
        run(&storage, b"get x z\r\n", b""),
        Some(Bytes::from_static(b"END\r\n"))
    );
}

#[test]
fn value_bytes_may_contain_crlf() {
    let storage = Storage::new(1024);
    assert_eq!(
        run(&storage, b"set bin 0 0 4\r\n", b"a\r\nb\r\n"),
        Some(Bytes::from_static(b"STORED\r\n"))
    );
    assert_eq!(
        run(&storage, b"get bin\r\n", b""),
        Some(Bytes::from_static(b"VALUE bin 0 4\r\na\r\nb\r\nEND\r\n"))
    );
}

#[test]
fn mismatched_chunk_is_a_client_error() {
    let storage = Storage::new(1024);
    // The terminator is not CRLF where the declared length says it must be.
    assert_eq!(
        run(&storage, b"set foo 0 0 3\r\n", b"barXY"),
        Some(Bytes::from_static(b"CLIENT_ERROR bad data chunk\r\n"))
    );
    assert_eq!(storage.len(), 0, "nothing may be stored");
}

#[test]
fn oversized_pair_is_not_stored() {
    let storage = Storage::new(8);
    assert_eq!(
        run(&storage, b"set foo 0 0 10\r\n", b"0123456789\r\n"),
        Some(Bytes::from_static(b"NOT_STORED\r\n"))
    );
}

#[test]
fn noreply_commands_produce_no_reply() {
    let storage = Storage::new(1024);
    assert_eq!(run(&storage, b"set foo 0 0 3 noreply\r\n", b"bar\r\n"), None);
    assert_eq!(storage.get(b"foo"), Some(Bytes::from_static(b"bar")));
    assert_eq!(run(&storage, b"delete foo noreply\r\n", b""), None);
    assert_eq!(storage.len(), 0);
}

#[test]
fn unrecognized_command_replies_error() {
    let storage = Storage::new(1024);
    assert_eq!(
        run(&storage, b"flush_all\r\n", b""),
        Some(Bytes::from_static(b"ERROR\r\n"))
    );
}
