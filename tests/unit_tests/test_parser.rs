// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use memcache_server_rs::protocol::{
    Command, MAX_LINE, ParseOutcome, Parser, StoreKind,
};

fn parse_all(input: &[u8]) -> (usize, Option<Command>) {
    let mut parser = Parser::new();
    match parser.parse(input).expect("no line overflow expected") {
        ParseOutcome::Incomplete => (0, None),
        ParseOutcome::Complete { consumed, command } => (consumed, Some(command)),
    }
}

#[test]
fn parses_storage_header_and_declares_body() {
    let (consumed, command) = parse_all(b"set foo 7 0 3\r\nbar\r\n");
    assert_eq!(consumed, 15);
    let command = command.expect("complete header");
    match &command {
        Command::Store(cmd) => {
            assert_eq!(cmd.kind, StoreKind::Set);
            assert_eq!(cmd.key, Bytes::from_static(b"foo"));
            assert_eq!(cmd.flags, 7);
            assert_eq!(cmd.exptime, 0);
            assert_eq!(cmd.bytes, 3);
            assert!(!cmd.noreply);
        },
        other => panic!("expected a store command, got {other:?}"),
    }
    // Value bytes plus the trailing CRLF stay on the wire for the caller.
    assert_eq!(command.body_len(), 5);
}

#[test]
fn parses_all_storage_verbs() {
    for (line, kind) in [
        (&b"set k 0 0 1\r\n"[..], StoreKind::Set),
        (&b"add k 0 0 1\r\n"[..], StoreKind::Add),
        (&b"replace k 0 0 1\r\n"[..], StoreKind::Replace),
        (&b"append k 0 0 1\r\n"[..], StoreKind::Append),
        (&b"prepend k 0 0 1\r\n"[..], StoreKind::Prepend),
    ] {
        match parse_all(line).1 {
            Some(Command::Store(cmd)) => assert_eq!(cmd.kind, kind),
            other => panic!("{line:?} parsed as {other:?}"),
        }
    }
}

#[test]
fn parses_noreply_suffix() {
    let (_, command) = parse_all(b"set foo 0 0 3 noreply\r\n");
    assert!(command.expect("complete").noreply());

    let (_, command) = parse_all(b"delete foo noreply\r\n");
    assert!(command.expect("complete").noreply());
}

#[test]
fn parses_multi_key_get() {
    let (consumed, command) = parse_all(b"get a bb ccc\r\n");
    assert_eq!(consumed, 14);
    match command.expect("complete") {
        Command::Get(cmd) => {
            assert_eq!(cmd.keys, vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"bb"),
                Bytes::from_static(b"ccc")
            ]);
        },
        other => panic!("expected get, got {other:?}"),
    }
}

#[test]
fn parses_delete() {
    let (_, command) = parse_all(b"delete foo\r\n");
    match command.expect("complete") {
        Command::Delete(cmd) => {
            assert_eq!(cmd.key, Bytes::from_static(b"foo"));
            assert!(!cmd.noreply);
        },
        other => panic!("expected delete, got {other:?}"),
    }
}

#[test]
fn incomplete_header_consumes_nothing() {
    let mut parser = Parser::new();
    assert_eq!(
        parser.parse(b"set foo 0 0").expect("within bounds"),
        ParseOutcome::Incomplete
    );
    // Retrying with the completed line must succeed from byte zero.
    match parser.parse(b"set foo 0 0 3\r\n").expect("within bounds") {
        ParseOutcome::Complete { consumed, .. } => assert_eq!(consumed, 15),
        ParseOutcome::Incomplete => panic!("header was complete"),
    }
}

#[test]
fn byte_at_a_time_feeding_completes_once() {
    let input = b"get split\r\n";
    let mut parser = Parser::new();
    for end in 1..input.len() {
        assert_eq!(
            parser.parse(&input[..end]).expect("within bounds"),
            ParseOutcome::Incomplete,
            "prefix of {end} bytes should not complete"
        );
    }
    match parser.parse(input).expect("within bounds") {
        ParseOutcome::Complete { consumed, command } => {
            assert_eq!(consumed, input.len());
            assert!(matches!(command, Command::Get(_)));
        },
        ParseOutcome::Incomplete => panic!("full line should complete"),
    }
}

#[test]
fn crlf_split_across_reads_is_found() {
    let mut parser = Parser::new();
    assert_eq!(
        parser.parse(b"get a\r").expect("within bounds"),
        ParseOutcome::Incomplete
    );
    match parser.parse(b"get a\r\n").expect("within bounds") {
        ParseOutcome::Complete { consumed, .. } => assert_eq!(consumed, 7),
        ParseOutcome::Incomplete => panic!("terminator arrived"),
    }
}

#[test]
fn unknown_and_malformed_lines_become_error_descriptors() {
    for line in [
        &b"quit\r\n"[..],
        &b"incr foo 1\r\n"[..],
        &b"get\r\n"[..],
        &b"set foo 0 0\r\n"[..],
        &b"set foo 0 0 abc\r\n"[..],
        &b"set foo 0 0 3 jumbo\r\n"[..],
        &b"delete\r\n"[..],
        &b"delete a b\r\n"[..],
        &b"\r\n"[..],
    ] {
        let (consumed, command) = parse_all(line);
        assert_eq!(consumed, line.len(), "whole line must be consumed");
        assert!(
            matches!(command, Some(Command::Unknown(_))),
            "{line:?} should be unrecognized"
        );
    }
}

#[test]
fn oversized_line_is_fatal() {
    let mut parser = Parser::new();
    let garbage = vec![b'g'; MAX_LINE];
    assert!(parser.parse(&garbage).is_err());
}

#[test]
fn reset_clears_the_scan_memo() {
    let mut parser = Parser::new();
    assert_eq!(
        parser.parse(b"get aaaaaa").expect("within bounds"),
        ParseOutcome::Incomplete
    );
    parser.reset();
    // A fresh shorter buffer must be scanned from the start again.
    match parser.parse(b"get a\r\n").expect("within bounds") {
        ParseOutcome::Complete { consumed, .. } => assert_eq!(consumed, 7),
        ParseOutcome::Incomplete => panic!("complete line after reset"),
    }
}
